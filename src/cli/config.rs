use crate::cli::context::CliContext;
use crate::config::Config;
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::Value as JsonValue;
use tokio::fs;

#[derive(Args, Clone, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Clone, Debug)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Get configuration value
    Get {
        /// Configuration key, e.g. `installer.download_chunks`
        key: String,
    },

    /// Validate configuration
    Validate,
}

pub async fn cmd_config(args: ConfigArgs, ctx: &CliContext) -> Result<()> {
    let path = ctx.config_path();
    match args.action {
        ConfigAction::Show => {
            println!("Current configuration ({}):", path.display());
            println!("{}", serde_yaml::to_string(ctx.config())?);
        }
        ConfigAction::Get { key } => {
            let json = serde_json::to_value(ctx.config())?;
            let segments = split_key(&key)?;
            if let Some(value) = get_json_value(&json, &segments) {
                println!("{}", serde_yaml::to_string(value)?);
            } else {
                bail!("{} not found in configuration", key);
            }
        }
        ConfigAction::Validate => {
            if fs::try_exists(path).await? {
                let raw = fs::read_to_string(path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?;
                let config = serde_yaml::from_str::<Config>(&raw)
                    .with_context(|| format!("parsing {}", path.display()))?;
                validate(&config)?;
                println!("Configuration file {} is valid", path.display());
            } else {
                println!(
                    "No configuration file at {}; defaults are valid",
                    path.display()
                );
            }
        }
    }

    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.engine.signal_capacity == 0 {
        bail!("engine.signal_capacity must be greater than zero");
    }
    if config.engine.progress_key.trim().is_empty() {
        bail!("engine.progress_key cannot be empty");
    }
    if config.installer.download_chunks == 0 {
        bail!("installer.download_chunks must be greater than zero");
    }
    if let Some(email) = &config.installer.default_email {
        if !crate::install::is_valid_email(email) {
            bail!("installer.default_email '{}' is not a valid address", email);
        }
    }
    Ok(())
}

fn split_key(key: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = key
        .split('.')
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.is_empty() {
        bail!("configuration key cannot be empty");
    }
    Ok(segments)
}

fn get_json_value<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a JsonValue> {
    let mut current = value;
    for segment in path {
        match current {
            JsonValue::Object(map) => {
                current = map.get(*segment)?;
            }
            _ => return None,
        }
    }
    Some(current)
}
