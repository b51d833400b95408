//! One wizard run shared by the HTTP handlers and the CLI

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};
use step_flow::{FlowEngine, FlowError, FlowResult, FlowState, StepChange};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::installer::Installer;
use super::{build_install_flow, initial_state, views};
use crate::config::Config;

type Outcome = Option<Result<FlowResult, FlowError>>;

/// Wizard engine plus its lazily started run.
pub struct InstallSession {
    engine: FlowEngine,
    start_delay: Duration,
    scheduled: AtomicBool,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    outcome: watch::Sender<Outcome>,
}

impl InstallSession {
    pub fn new(config: &Config, installer: Arc<dyn Installer>) -> Result<Self, FlowError> {
        let flow = build_install_flow(installer, &config.installer)?;
        let engine = FlowEngine::with_config(flow, config.engine.clone())
            .with_state(initial_state(&config.installer));
        let (outcome, _) = watch::channel(None);
        Ok(Self {
            engine,
            start_delay: Duration::from_millis(config.start_delay_ms),
            scheduled: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
            outcome,
        })
    }

    pub fn engine(&self) -> &FlowEngine {
        &self.engine
    }

    /// Schedules the run after the configured delay. Only the first call
    /// has an effect; returns whether this call scheduled it.
    pub fn ensure_started(&self) -> bool {
        self.schedule(self.start_delay)
    }

    /// Starts the run without the delay.
    pub fn start_now(&self) -> bool {
        self.schedule(Duration::ZERO)
    }

    fn schedule(&self, delay: Duration) -> bool {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return false;
        }

        let state_log = self.engine.observe_state(|state: &FlowState| {
            debug!(state = %state.clone().into_value(), "wizard state changed");
        });
        let step_log = self.engine.on_did_change_current_step(|change: &StepChange| {
            info!(parent = %change.parent, step = %change.step, "wizard step changed");
        });

        let engine = self.engine.clone();
        let outcome = self.outcome.clone();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = engine.start().await;
            match &result {
                Ok(result) if result.is_success() => info!(
                    flow = %result.flow_name,
                    latency_ms = result.latency_ms,
                    "wizard finished"
                ),
                Ok(result) => warn!(
                    flow = %result.flow_name,
                    error = result.error.as_deref().unwrap_or_default(),
                    "wizard failed"
                ),
                Err(err) => warn!(error = %err, "wizard stopped"),
            }
            outcome.send_replace(Some(result));
        });

        self.listeners.lock().extend([state_log, step_log]);
        true
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.load(Ordering::SeqCst)
    }

    /// Result of the run, once it has ended.
    pub fn outcome(&self) -> Outcome {
        self.outcome.borrow().clone()
    }

    /// Waits until the run has ended.
    pub async fn wait(&self) -> Result<FlowResult, FlowError> {
        let mut receiver = self.outcome.subscribe();
        let outcome = receiver
            .wait_for(Option::is_some)
            .await
            .map_err(|_| FlowError::Internal("wizard task dropped".to_string()))?;
        match &*outcome {
            Some(result) => result.clone(),
            None => Err(FlowError::Internal("wizard ended without a result".to_string())),
        }
    }

    /// Full wizard page for the current step.
    pub fn render_page(&self) -> String {
        views::render_page(
            self.engine.render_current_view(),
            &self.engine.state(),
            self.engine.progress(),
        )
    }

    /// JSON view of where the wizard is.
    pub fn snapshot(&self) -> Value {
        let listening: Vec<Value> = self
            .engine
            .listening()
            .into_iter()
            .map(|(step, events)| json!({ "step": step, "events": events }))
            .collect();
        json!({
            "flow": self.engine.name(),
            "scheduled": self.is_scheduled(),
            "status": self.engine.status(),
            "current_step": self.engine.current_step(),
            "active_path": self.engine.active_path(),
            "listening": listening,
            "progress": self.engine.progress(),
            "state": self.engine.state(),
        })
    }

    /// Cancels the run and stops the log listeners.
    pub fn shutdown(&self) {
        self.engine.cancel();
        for listener in self.listeners.lock().drain(..) {
            listener.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::SimulatedInstaller;

    fn session(delay_ms: u64) -> InstallSession {
        let mut config = Config::default();
        config.start_delay_ms = delay_ms;
        config.installer.chunk_delay_ms = 0;
        let installer = Arc::new(SimulatedInstaller::new(&config.installer));
        InstallSession::new(&config, installer).unwrap()
    }

    #[tokio::test]
    async fn starts_once_after_the_delay() {
        let session = session(50);
        assert_eq!(session.snapshot()["status"], "not_started");
        assert!(session.ensure_started());
        assert!(!session.ensure_started());
        assert!(!session.engine().is_started());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(session.engine().is_started());
        assert_eq!(session.engine().current_step().as_deref(), Some("input-email"));
        session.shutdown();
    }

    #[tokio::test]
    async fn page_before_start_is_a_placeholder() {
        let session = session(0);
        let page = session.render_page();
        assert!(page.contains(r#"<div class="content">install</div>"#));
        assert!(session.outcome().is_none());
    }

    #[tokio::test]
    async fn shutdown_reports_cancellation() {
        let session = session(0);
        session.start_now();
        tokio::time::sleep(Duration::from_millis(50)).await;
        session.shutdown();
        assert!(matches!(session.wait().await, Err(FlowError::Cancelled)));
        assert!(session.outcome().is_some());
    }
}
