//! Engine tuning knobs

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default capacity of the observation channel.
pub const DEFAULT_SIGNAL_CAPACITY: usize = 256;

/// Default state key whose `ratio` field carries progress.
pub const DEFAULT_PROGRESS_KEY: &str = "download";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Buffered signals per observer before it starts lagging.
    pub signal_capacity: usize,

    /// State key read by `progress()`; its `ratio` field must be a number.
    pub progress_key: String,

    /// Deadline for a suspended step; `None` waits indefinitely.
    pub suspend_timeout_ms: Option<u64>,
}

impl EngineConfig {
    pub fn with_signal_capacity(mut self, capacity: usize) -> Self {
        self.signal_capacity = capacity;
        self
    }

    pub fn with_progress_key(mut self, key: impl Into<String>) -> Self {
        self.progress_key = key.into();
        self
    }

    pub fn with_suspend_timeout(mut self, timeout_ms: u64) -> Self {
        self.suspend_timeout_ms = Some(timeout_ms);
        self
    }

    pub fn suspend_timeout(&self) -> Option<Duration> {
        self.suspend_timeout_ms.map(Duration::from_millis)
    }

    pub(crate) fn progress_path(&self) -> String {
        format!("{}.ratio", self.progress_key)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            signal_capacity: DEFAULT_SIGNAL_CAPACITY,
            progress_key: DEFAULT_PROGRESS_KEY.to_string(),
            suspend_timeout_ms: None,
        }
    }
}
