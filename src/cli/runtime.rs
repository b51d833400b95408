use std::env;
use std::fs as stdfs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const LOCAL_ENV_PATH: &str = "config/local.env";
const LOCAL_CONFIG_PATH: &str = "config/onboard.yaml";

/// Loads `KEY=VALUE` lines from `config/local.env` without overriding
/// variables that are already set.
pub fn load_local_env_overrides() {
    let path = Path::new(LOCAL_ENV_PATH);
    if !path.exists() {
        return;
    }

    match stdfs::read_to_string(path) {
        Ok(contents) => {
            for (key, value) in parse_env_lines(&contents) {
                if env::var(&key).is_ok() {
                    continue;
                }
                env::set_var(key, value);
            }
            info!(path = %path.display(), "Loaded environment overrides from local.env");
        }
        Err(err) => {
            warn!(path = %path.display(), ?err, "failed to read local.env overrides");
        }
    }
}

fn parse_env_lines(contents: &str) -> Vec<(String, String)> {
    let mut entries = Vec::new();
    for (idx, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            warn!(line = idx + 1, "invalid local.env entry; skipping");
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        entries.push((key.to_string(), unescape_value(value.trim())));
    }
    entries
}

pub fn init_logging(level: &str, debug: bool) -> Result<()> {
    let level = if debug {
        tracing::Level::DEBUG
    } else {
        level.parse().context("Invalid log level")?
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level.to_string())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

pub struct LoadedConfig {
    pub config: Config,
    pub path: PathBuf,
}

pub async fn load_config(config_path: Option<&PathBuf>) -> Result<LoadedConfig> {
    let config_path = match config_path {
        Some(path) => path.clone(),
        None => {
            // Priority: ./config/onboard.yaml > ~/.config/onboard/config.yaml
            let local_config = PathBuf::from(LOCAL_CONFIG_PATH);
            if local_config.exists() {
                local_config
            } else {
                let mut path = dirs::config_dir().context("Failed to get config directory")?;
                path.push("onboard");
                path.push("config.yaml");
                path
            }
        }
    };

    if config_path.exists() {
        let content = fs::read_to_string(&config_path)
            .await
            .context("Failed to read config file")?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded configuration from: {}", config_path.display());
        Ok(LoadedConfig {
            config,
            path: config_path,
        })
    } else {
        warn!(
            "Config file not found, using defaults: {}",
            config_path.display()
        );
        Ok(LoadedConfig {
            config: Config::default(),
            path: config_path,
        })
    }
}

fn unescape_value(value: &str) -> String {
    if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
        let inner = &value[1..value.len() - 1];
        inner
            .replace("\\\"", "\"")
            .replace("\\n", "\n")
            .replace("\\r", "\r")
            .replace("\\t", "\t")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_lines_skip_comments_and_unquote() {
        let entries = parse_env_lines(
            "# local overrides\nONBOARD_PORT=9000\n\nbroken line\nONBOARD_DEFAULT_EMAIL=\"dev@kite.io\"\n",
        );
        assert_eq!(
            entries,
            vec![
                ("ONBOARD_PORT".to_string(), "9000".to_string()),
                ("ONBOARD_DEFAULT_EMAIL".to_string(), "dev@kite.io".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn explicit_config_path_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("onboard.yaml");
        std::fs::write(&path, "start_delay_ms: 0\nserver:\n  port: 8123\n").unwrap();

        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.path, path);
        assert_eq!(loaded.config.server.port, 8123);
        assert_eq!(loaded.config.start_delay_ms, 0);
    }

    #[tokio::test]
    async fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        let loaded = load_config(Some(&path)).await.unwrap();
        assert_eq!(loaded.config, Config::default());
    }
}
