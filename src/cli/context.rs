use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Config;

pub struct CliContext {
    config: Arc<Config>,
    config_path: PathBuf,
}

impl CliContext {
    pub fn new(config: Config, config_path: PathBuf) -> Self {
        Self {
            config: Arc::new(config),
            config_path,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }
}
