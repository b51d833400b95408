//! Application configuration

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use step_flow::EngineConfig;
use tracing::{info, warn};

pub const PORT_ENV: &str = "ONBOARD_PORT";
pub const DEFAULT_EMAIL_ENV: &str = "ONBOARD_DEFAULT_EMAIL";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub installer: InstallerConfig,
    /// Delay between the first page render and the wizard start
    pub start_delay_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            engine: EngineConfig::default(),
            installer: InstallerConfig::default(),
            start_delay_ms: 500,
        }
    }
}

impl Config {
    /// Applies `ONBOARD_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(PORT_ENV) {
            match raw.trim().parse::<u16>() {
                Ok(port) => {
                    info!(port, "Using port from {}", PORT_ENV);
                    self.server.port = port;
                }
                Err(err) => warn!(value = %raw, ?err, "ignoring invalid {}", PORT_ENV),
            }
        }
        if let Ok(email) = env::var(DEFAULT_EMAIL_ENV) {
            let email = email.trim();
            if !email.is_empty() {
                self.installer.default_email = Some(email.to_string());
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 46624,
        }
    }
}

impl ServerConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct InstallerConfig {
    /// Email prefilled in the first form
    pub default_email: Option<String>,
    /// Accounts the simulated backend already knows
    pub known_accounts: Vec<String>,
    /// Password accepted for known accounts
    pub password: String,
    pub download_chunks: u32,
    pub chunk_delay_ms: u64,
    /// Directory offered for whitelisting
    pub whitelist_path: PathBuf,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            default_email: None,
            known_accounts: Vec::new(),
            password: "secret".to_string(),
            download_chunks: 10,
            chunk_delay_ms: 150,
            whitelist_path: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
        }
    }
}
