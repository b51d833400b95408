//! Running engine and the handle used to drive and observe it

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use onboard_event_bus::spawn_listener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bridge::EventBridge;
use crate::config::EngineConfig;
use crate::errors::FlowError;
use crate::executor::{Executor, Frame, NodeExit};
use crate::node::{Flow, Node};
use crate::observe::{FlowSignal, Monitor, Scope, Snapshot, StepChange};
use crate::state::{Event, FlowState};
use crate::step::ViewFn;
use crate::types::{BranchSnapshot, FlowResult, FlowStatus};

/// State shared by the executor, running steps and every engine handle.
pub(crate) struct Shared {
    pub config: EngineConfig,
    pub monitor: Monitor,
    pub bridge: EventBridge,
    pub cancel: CancellationToken,
    started: AtomicBool,
}

impl Shared {
    fn new(config: EngineConfig) -> Self {
        let monitor = Monitor::new(config.signal_capacity, config.progress_path());
        Self {
            config,
            monitor,
            bridge: EventBridge::new(),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn publish_state(&self, scope: &Scope, state: &FlowState) {
        self.monitor.publish_state(scope, state);
    }
}

/// Engine running one root flow.
///
/// Cloning yields another handle on the same run: the HTTP layer keeps one
/// to emit events and render views while a task drives `start()`.
#[derive(Clone)]
pub struct FlowEngine {
    root: Arc<Node>,
    name: String,
    initial: FlowState,
    shared: Arc<Shared>,
}

/// Handle on a running engine.
pub type FlowHandle = FlowEngine;

impl FlowEngine {
    pub fn new(flow: Flow) -> Self {
        Self::with_config(flow, EngineConfig::default())
    }

    pub fn with_config(flow: Flow, config: EngineConfig) -> Self {
        let name = flow.name().to_string();
        Self {
            root: Arc::new(Node::Flow(flow)),
            name,
            initial: FlowState::new(),
            shared: Arc::new(Shared::new(config)),
        }
    }

    /// State the root flow starts from.
    pub fn with_state(mut self, state: FlowState) -> Self {
        self.initial = state;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    /// Runs the root flow to its end.
    ///
    /// Step failures, unmatched branches and step faults all produce a
    /// `Failed` result carrying a diagnostic. `Err` is reserved for a second
    /// `start` on the same engine and for cancellation.
    pub async fn start(&self) -> Result<FlowResult, FlowError> {
        if self.shared.started.swap(true, Ordering::SeqCst) {
            return Err(FlowError::AlreadyStarted(self.name.clone()));
        }

        info!(flow = %self.name, "starting flow");
        let result = FlowResult::new(self.name.clone());
        let monitor = &self.shared.monitor;
        monitor.begin(&self.initial);

        let executor = Executor::new(Arc::clone(&self.shared));
        let frame = Frame::root(&self.name, self.shared.cancel.clone());
        let outcome = executor
            .execute_node(&self.root, &frame, self.initial.clone())
            .await;

        let (transitions, last_failure, observed) = {
            let snapshot = monitor.read();
            (
                snapshot.transitions.clone(),
                snapshot.last_failure.clone(),
                snapshot.state.clone(),
            )
        };
        let result = result.with_transitions(transitions);

        let result = match outcome {
            Ok(NodeExit::Completed(state)) => {
                info!(flow = %self.name, "flow completed");
                monitor.finish(FlowStatus::Completed);
                result.with_success(state)
            }
            Ok(NodeExit::Failed { origin, state }) => {
                let failed_step = last_failure.unwrap_or(origin);
                let message = state
                    .error_message()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Step '{}' failed", failed_step));
                warn!(flow = %self.name, step = %failed_step, error = %message, "flow failed");
                monitor.finish(FlowStatus::Failed);
                result
                    .with_error(state, message)
                    .with_failed_step(Some(failed_step))
            }
            Ok(NodeExit::Back { step, state, .. }) => {
                let err = FlowError::UnroutedBack(step.clone());
                warn!(flow = %self.name, error = %err, "flow failed");
                monitor.finish(FlowStatus::Failed);
                result
                    .with_error(state, err.to_string())
                    .with_failed_step(Some(step))
            }
            Err(FlowError::Cancelled) => {
                info!(flow = %self.name, "flow cancelled");
                monitor.finish(FlowStatus::Failed);
                return Err(FlowError::Cancelled);
            }
            Err(err) => {
                warn!(flow = %self.name, error = %err, "flow aborted");
                monitor.finish(FlowStatus::Failed);
                result
                    .with_error(observed, err.to_string())
                    .with_failed_step(last_failure)
            }
        };

        Ok(result.finish())
    }

    /// Starts the flow on its own task.
    pub fn spawn(&self) -> JoinHandle<Result<FlowResult, FlowError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.start().await })
    }

    /// Stops the run; suspended steps unwind with `Cancelled`.
    pub fn cancel(&self) {
        self.shared.cancel.cancel();
    }

    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::SeqCst)
    }

    /// Delivers an external event. Returns whether a suspended step took it.
    pub fn emit(&self, name: &str, payload: BTreeMap<String, String>) -> bool {
        self.emit_event(Event::new(name, payload))
    }

    pub fn emit_event(&self, event: Event) -> bool {
        self.shared.bridge.emit(event)
    }

    /// Steps currently suspended and the events they accept.
    pub fn listening(&self) -> Vec<(String, Vec<String>)> {
        self.shared.bridge.listening()
    }

    /// Ratio in `[0, 1]`, or `-1.0` before any progress was published.
    pub fn progress(&self) -> f64 {
        self.shared.monitor.progress()
    }

    pub fn status(&self) -> FlowStatus {
        self.shared.monitor.read().status
    }

    /// Observed state, including in-flight parallel changes.
    pub fn state(&self) -> FlowState {
        self.shared.monitor.read().state.clone()
    }

    /// Names from the root down to the active leaf, or to the parallel node
    /// during a parallel phase.
    pub fn active_path(&self) -> Vec<String> {
        let snapshot = self.shared.monitor.read();
        if snapshot.status == FlowStatus::NotStarted {
            return Vec::new();
        }
        let mut names = vec![self.root.name().to_string()];
        let mut node = self.root.as_ref();
        let mut path = Vec::new();
        while matches!(node, Node::Flow(_) | Node::Branch(_)) {
            let Some(child) = snapshot
                .cursors
                .get(&path)
                .and_then(|&index| node.child(index).map(|child| (index, child)))
            else {
                break;
            };
            path.push(child.0);
            node = child.1;
            names.push(node.name().to_string());
        }
        names
    }

    /// Innermost active node below the root.
    pub fn current_step(&self) -> Option<String> {
        let mut path = self.active_path();
        if path.len() < 2 {
            return None;
        }
        path.pop()
    }

    pub fn last_step_change(&self) -> Option<StepChange> {
        self.shared.monitor.read().last_change.clone()
    }

    /// View of the active leaf. During a parallel phase: the first child,
    /// in declaration order, whose active leaf has one.
    pub fn current_step_view(&self) -> Option<ViewFn> {
        let snapshot = self.shared.monitor.read();
        if snapshot.status == FlowStatus::NotStarted {
            return None;
        }
        view_at(&self.root, &mut Vec::new(), &snapshot)
    }

    /// Renders the current view against the observed state.
    pub fn render_current_view(&self) -> Option<String> {
        let view = self.current_step_view()?;
        Some(view(&self.state()))
    }

    /// Per-branch status of the parallel node named `name`, once it has run.
    pub fn parallel_branches(&self, name: &str) -> Option<Vec<BranchSnapshot>> {
        let path = self.root.find_path(name)?;
        if !matches!(self.node_at(&path), Some(Node::Parallel(_))) {
            return None;
        }
        self.shared.monitor.read().branches.get(&path).cloned()
    }

    fn node_at(&self, path: &[usize]) -> Option<&Node> {
        path.iter()
            .try_fold(self.root.as_ref(), |node, &index| node.child(index))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowSignal> {
        self.shared.monitor.subscribe()
    }

    /// Calls `callback` with the observed state after every mutation.
    pub fn observe_state<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&FlowState) + Send + 'static,
    {
        spawn_listener(self.subscribe(), move |signal| {
            if let FlowSignal::StateChanged(state) = signal {
                callback(&state);
            }
        })
    }

    /// Calls `callback` exactly once for every move of a composite to
    /// another child, however busy the state channel is.
    pub fn on_did_change_current_step<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&StepChange) + Send + 'static,
    {
        let mut changes = self.shared.monitor.watch_steps();
        tokio::spawn(async move {
            while let Some(change) = changes.recv().await {
                callback(&change);
            }
        })
    }
}

fn view_at(node: &Node, path: &mut Vec<usize>, snapshot: &Snapshot) -> Option<ViewFn> {
    match node {
        Node::Step(step) => step.view(),
        Node::Flow(_) | Node::Branch(_) => {
            let index = *snapshot.cursors.get(path.as_slice())?;
            let child = node.child(index)?;
            path.push(index);
            let view = view_at(child, path, snapshot);
            path.pop();
            view
        }
        Node::Parallel(_) => {
            for (index, child) in node.children().enumerate() {
                path.push(index);
                let view = view_at(child, path, snapshot);
                path.pop();
                if view.is_some() {
                    return view;
                }
            }
            None
        }
    }
}
