use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Deserialize;
use step_flow::{FlowEngine, FlowResult};
use tokio::time::{sleep, timeout, Instant};
use tracing::{info, warn};

use crate::config::Config;
use crate::install::{InstallSession, Installer, SimulatedInstaller};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Args, Clone, Debug)]
pub struct RunArgs {
    /// YAML script of events to feed the wizard
    #[arg(long, value_name = "FILE")]
    pub events: PathBuf,

    /// How long to wait for a step to accept each event, and for the end
    #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
    pub timeout: Duration,
}

/// One scripted user action.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ScriptedEvent {
    pub event: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
    /// Pause before the event is sent
    #[serde(default)]
    pub delay_ms: u64,
}

pub async fn cmd_run(args: RunArgs, config: &Config) -> Result<()> {
    let script = load_script(&args.events).await?;
    info!(path = %args.events.display(), events = script.len(), "Loaded event script");

    let result = drive(config, &script, args.timeout).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_success() {
        bail!(
            "wizard failed at {}: {}",
            result.failed_step.as_deref().unwrap_or("unknown step"),
            result.error.as_deref().unwrap_or("no error recorded")
        );
    }
    Ok(())
}

async fn load_script(path: &Path) -> Result<Vec<ScriptedEvent>> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Runs the wizard against the simulated installer, feeding `script` in order.
pub async fn drive(
    config: &Config,
    script: &[ScriptedEvent],
    limit: Duration,
) -> Result<FlowResult> {
    let installer: Arc<dyn Installer> = Arc::new(SimulatedInstaller::new(&config.installer));
    let session = InstallSession::new(config, installer).context("failed to build the install flow")?;
    session.start_now();

    for scripted in script {
        if scripted.delay_ms > 0 {
            sleep(Duration::from_millis(scripted.delay_ms)).await;
        }
        if let Err(err) = wait_for_listener(session.engine(), &scripted.event, limit).await {
            session.shutdown();
            return Err(err);
        }
        let delivered = session
            .engine()
            .emit(&scripted.event, scripted.fields.clone());
        if delivered {
            info!(event = %scripted.event, step = ?session.engine().current_step(), "event delivered");
        } else {
            warn!(event = %scripted.event, "event was not accepted");
        }
    }

    let finished = timeout(limit, session.wait()).await;
    session.shutdown();
    match finished {
        Ok(result) => result.context("wizard did not finish"),
        Err(_) => bail!(
            "wizard did not finish within {}; still waiting in {:?}",
            humantime::format_duration(limit),
            session.engine().listening()
        ),
    }
}

async fn wait_for_listener(engine: &FlowEngine, event: &str, limit: Duration) -> Result<()> {
    let deadline = Instant::now() + limit;
    loop {
        let listening = engine.listening();
        if listening
            .iter()
            .any(|(_, events)| events.iter().any(|name| name == event))
        {
            return Ok(());
        }
        if engine.status().is_terminal() {
            bail!("wizard ended before '{}' could be delivered", event);
        }
        if Instant::now() >= deadline {
            bail!(
                "no step accepted '{}' within {}",
                event,
                humantime::format_duration(limit)
            );
        }
        sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_entries_default_fields_and_delay() {
        let script: Vec<ScriptedEvent> = serde_yaml::from_str(
            r#"
- event: did-submit-email
  fields:
    email: dev@kite.io
- event: did-skip-whitelist
  delay_ms: 100
"#,
        )
        .unwrap();
        assert_eq!(script.len(), 2);
        assert_eq!(script[0].fields.get("email").map(String::as_str), Some("dev@kite.io"));
        assert_eq!(script[0].delay_ms, 0);
        assert!(script[1].fields.is_empty());
        assert_eq!(script[1].delay_ms, 100);
    }
}
