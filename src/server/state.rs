use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::install::InstallSession;

#[derive(Clone)]
pub struct ServeState {
    pub(crate) session: Arc<InstallSession>,
    pub(crate) started_at: DateTime<Utc>,
}

impl ServeState {
    pub fn new(session: Arc<InstallSession>) -> Self {
        Self {
            session,
            started_at: Utc::now(),
        }
    }

    pub fn session(&self) -> &InstallSession {
        &self.session
    }
}
