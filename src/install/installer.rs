//! Collaborator seam the wizard steps talk to

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::InstallerConfig;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InstallerError {
    #[error("Invalid email address")]
    InvalidEmail(String),

    #[error("An account already exists for {0}")]
    AccountExists(String),

    #[error("Unknown account {0}")]
    UnknownAccount(String),

    #[error("Invalid email or password")]
    BadCredentials,

    #[error("Download failed: {0}")]
    Download(String),

    #[error("Installation failed: {0}")]
    Install(String),

    #[error("Unable to start the service: {0}")]
    Start(String),

    #[error("Unable to enable access for {path}: {reason}")]
    Whitelist { path: String, reason: String },
}

/// Progress callback handed to [`Installer::download`], called with a ratio in `[0, 1]`.
pub type ProgressFn<'a> = &'a (dyn Fn(f64) + Send + Sync);

/// Account backend and local installation performed by the wizard.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn account_exists(&self, email: &str) -> Result<bool, InstallerError>;

    async fn create_account(&self, email: &str) -> Result<(), InstallerError>;

    async fn login(&self, email: &str, password: &str) -> Result<(), InstallerError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), InstallerError>;

    async fn download(&self, progress: ProgressFn<'_>) -> Result<(), InstallerError>;

    async fn install(&self) -> Result<(), InstallerError>;

    async fn start_and_authenticate(&self, email: &str) -> Result<(), InstallerError>;

    async fn whitelist(&self, path: &Path) -> Result<(), InstallerError>;
}

/// In-process installer: a fixed account list and a chunked fake download.
#[derive(Debug)]
pub struct SimulatedInstaller {
    accounts: Mutex<HashSet<String>>,
    password: String,
    chunks: u32,
    chunk_delay: Duration,
    resets: Mutex<Vec<String>>,
    whitelisted: Mutex<Vec<PathBuf>>,
}

impl SimulatedInstaller {
    pub fn new(config: &InstallerConfig) -> Self {
        Self {
            accounts: Mutex::new(
                config
                    .known_accounts
                    .iter()
                    .map(|email| email.trim().to_lowercase())
                    .collect(),
            ),
            password: config.password.clone(),
            chunks: config.download_chunks.max(1),
            chunk_delay: Duration::from_millis(config.chunk_delay_ms),
            resets: Mutex::new(Vec::new()),
            whitelisted: Mutex::new(Vec::new()),
        }
    }

    /// Addresses a password reset was requested for.
    pub fn reset_requests(&self) -> Vec<String> {
        self.resets.lock().clone()
    }

    pub fn whitelisted(&self) -> Vec<PathBuf> {
        self.whitelisted.lock().clone()
    }

    fn known(&self, email: &str) -> bool {
        self.accounts.lock().contains(&email.to_lowercase())
    }
}

#[async_trait]
impl Installer for SimulatedInstaller {
    async fn account_exists(&self, email: &str) -> Result<bool, InstallerError> {
        if !super::is_valid_email(email) {
            return Err(InstallerError::InvalidEmail(email.to_string()));
        }
        Ok(self.known(email))
    }

    async fn create_account(&self, email: &str) -> Result<(), InstallerError> {
        let mut accounts = self.accounts.lock();
        if !accounts.insert(email.to_lowercase()) {
            return Err(InstallerError::AccountExists(email.to_string()));
        }
        info!(email, "account created");
        Ok(())
    }

    async fn login(&self, email: &str, password: &str) -> Result<(), InstallerError> {
        if !self.known(email) || password != self.password {
            return Err(InstallerError::BadCredentials);
        }
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), InstallerError> {
        if !self.known(email) {
            return Err(InstallerError::UnknownAccount(email.to_string()));
        }
        self.resets.lock().push(email.to_string());
        info!(email, "password reset requested");
        Ok(())
    }

    async fn download(&self, progress: ProgressFn<'_>) -> Result<(), InstallerError> {
        for chunk in 1..=self.chunks {
            tokio::time::sleep(self.chunk_delay).await;
            let ratio = f64::from(chunk) / f64::from(self.chunks);
            debug!(chunk, ratio, "downloaded chunk");
            progress(ratio);
        }
        Ok(())
    }

    async fn install(&self) -> Result<(), InstallerError> {
        tokio::time::sleep(self.chunk_delay).await;
        Ok(())
    }

    async fn start_and_authenticate(&self, email: &str) -> Result<(), InstallerError> {
        tokio::time::sleep(self.chunk_delay).await;
        if !self.known(email) {
            return Err(InstallerError::Start(format!("no session for {}", email)));
        }
        Ok(())
    }

    async fn whitelist(&self, path: &Path) -> Result<(), InstallerError> {
        let metadata =
            tokio::fs::metadata(path)
                .await
                .map_err(|err| InstallerError::Whitelist {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                })?;
        if !metadata.is_dir() {
            return Err(InstallerError::Whitelist {
                path: path.display().to_string(),
                reason: "not a directory".to_string(),
            });
        }
        self.whitelisted.lock().push(path.to_path_buf());
        info!(path = %path.display(), "directory whitelisted");
        Ok(())
    }
}
