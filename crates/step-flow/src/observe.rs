//! Observation channel
//!
//! Every state mutation and every active-step move is first applied to the
//! engine snapshot and then published on a broadcast bus. Observers never
//! call back into the executor; they read the snapshot or react to signals.
//!
//! The bus is bounded, so a slow subscriber may skip state ticks. Step
//! changes additionally go to unbounded per-watcher queues and are never
//! dropped.

use std::collections::HashMap;
use std::sync::Arc;

use onboard_event_bus::{EventBus, InMemoryBus};
use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};
use tracing::trace;

use crate::bridge::ProgressTracker;
use crate::state::FlowState;
use crate::types::{BranchSnapshot, BranchStatus, FlowStatus};

/// Where a piece of state was published from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    /// The main line of execution; the published state is authoritative.
    Root,
    /// Child `index` of the parallel node at `parallel`; only its changes
    /// relative to the fork are merged into the observed state.
    Branch { parallel: Vec<usize>, index: usize },
}

/// Active child of a composite changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepChange {
    /// Composite whose cursor moved
    pub parent: String,
    /// The newly active child of `parent`
    pub step: String,
    /// Names from the root down to `step`
    pub path: Vec<String>,
}

impl StepChange {
    pub fn joined_path(&self) -> String {
        self.path.join("/")
    }
}

/// Notification published on the observation channel.
#[derive(Debug, Clone)]
pub enum FlowSignal {
    StateChanged(FlowState),
    StepChanged(StepChange),
    Finished(FlowStatus),
}

/// Observed view of a run.
#[derive(Debug, Clone)]
pub(crate) struct Snapshot {
    pub status: FlowStatus,
    pub state: FlowState,
    /// Active child index per flow or branch, keyed by the composite's index path
    pub cursors: HashMap<Vec<usize>, usize>,
    pub branches: HashMap<Vec<usize>, Vec<BranchSnapshot>>,
    forks: HashMap<Vec<usize>, FlowState>,
    pub transitions: Vec<String>,
    pub last_change: Option<StepChange>,
    pub last_failure: Option<String>,
}

impl Snapshot {
    fn new() -> Self {
        Self {
            status: FlowStatus::NotStarted,
            state: FlowState::new(),
            cursors: HashMap::new(),
            branches: HashMap::new(),
            forks: HashMap::new(),
            transitions: Vec::new(),
            last_change: None,
            last_failure: None,
        }
    }
}

pub(crate) struct Monitor {
    bus: Arc<InMemoryBus<FlowSignal>>,
    step_watchers: Mutex<Vec<mpsc::UnboundedSender<StepChange>>>,
    snapshot: RwLock<Snapshot>,
    progress: ProgressTracker,
}

impl Monitor {
    pub fn new(capacity: usize, progress_path: String) -> Self {
        Self {
            bus: InMemoryBus::new(capacity),
            step_watchers: Mutex::new(Vec::new()),
            snapshot: RwLock::new(Snapshot::new()),
            progress: ProgressTracker::new(progress_path),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FlowSignal> {
        self.bus.subscribe()
    }

    /// Every step change from now on, in transition order.
    pub fn watch_steps(&self) -> mpsc::UnboundedReceiver<StepChange> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.step_watchers.lock().push(tx);
        rx
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Snapshot> {
        self.snapshot.read()
    }

    pub fn progress(&self) -> f64 {
        self.progress.value()
    }

    /// Seeds the observed state without notifying anyone.
    pub fn begin(&self, initial: &FlowState) {
        let mut snapshot = self.snapshot.write();
        snapshot.status = FlowStatus::Running;
        snapshot.state = initial.clone();
        drop(snapshot);
        self.progress.observe(initial);
    }

    pub fn finish(&self, status: FlowStatus) {
        self.snapshot.write().status = status;
        self.bus.send(FlowSignal::Finished(status));
    }

    /// Moves the cursor of the composite at `parent_path` to `index`.
    pub fn enter(&self, parent_path: &[usize], parent_names: &[String], index: usize, step: &str) {
        let mut path = parent_names.to_vec();
        path.push(step.to_string());
        let change = StepChange {
            parent: parent_names.last().cloned().unwrap_or_default(),
            step: step.to_string(),
            path,
        };

        let mut snapshot = self.snapshot.write();
        snapshot.cursors.insert(parent_path.to_vec(), index);
        snapshot.transitions.push(change.joined_path());
        snapshot.last_change = Some(change.clone());
        // Queued under the snapshot lock so watchers see `transitions` order.
        self.step_watchers
            .lock()
            .retain(|watcher| watcher.send(change.clone()).is_ok());
        drop(snapshot);

        trace!(parent = %change.parent, step = %change.step, "current step changed");
        self.bus.send(FlowSignal::StepChanged(change));
    }

    pub fn publish_state(&self, scope: &Scope, state: &FlowState) {
        let mut snapshot = self.snapshot.write();
        match scope {
            Scope::Root => snapshot.state = state.clone(),
            Scope::Branch { parallel, index } => {
                let delta = snapshot.forks.get(parallel).map(|fork| state.diff_from(fork));
                if let Some(delta) = delta {
                    snapshot.state.apply(&delta);
                }
                if let Some(branch) = snapshot
                    .branches
                    .get_mut(parallel)
                    .and_then(|branches| branches.get_mut(*index))
                {
                    branch.state = state.clone();
                }
            }
        }
        let observed = snapshot.state.clone();
        drop(snapshot);

        self.progress.observe(&observed);
        self.bus.send(FlowSignal::StateChanged(observed));
    }

    pub fn begin_parallel(&self, path: &[usize], names: Vec<String>, fork: &FlowState) {
        let branches = names
            .into_iter()
            .map(|name| BranchSnapshot {
                name,
                status: BranchStatus::Running,
                state: fork.clone(),
            })
            .collect();
        let mut snapshot = self.snapshot.write();
        snapshot.forks.insert(path.to_vec(), fork.clone());
        snapshot.branches.insert(path.to_vec(), branches);
    }

    pub fn set_branch_status(&self, path: &[usize], index: usize, status: BranchStatus) {
        let mut snapshot = self.snapshot.write();
        if let Some(branch) = snapshot
            .branches
            .get_mut(path)
            .and_then(|branches| branches.get_mut(index))
        {
            branch.status = status;
        }
    }

    pub fn record_failure(&self, step: &str) {
        self.snapshot.write().last_failure = Some(step.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn enter_records_cursor_and_signal() {
        let monitor = Monitor::new(8, "download.ratio".into());
        let mut rx = monitor.subscribe();
        monitor.enter(&[], &names(&["install"]), 1, "input-email");

        let snapshot = monitor.read();
        assert_eq!(snapshot.cursors.get(&Vec::new()), Some(&1));
        assert_eq!(snapshot.transitions, vec!["install/input-email".to_string()]);
        drop(snapshot);

        match rx.try_recv().unwrap() {
            FlowSignal::StepChanged(change) => {
                assert_eq!(change.parent, "install");
                assert_eq!(change.step, "input-email");
            }
            other => panic!("unexpected signal {:?}", other),
        }
    }

    #[test]
    fn step_watchers_outlast_a_flood_of_state_ticks() {
        let monitor = Monitor::new(4, "download.ratio".into());
        let mut lagging = monitor.subscribe();
        let mut steps = monitor.watch_steps();

        monitor.enter(&[], &names(&["install"]), 0, "download");
        for tick in 0..32 {
            let mut state = FlowState::new();
            state.set_path("download.ratio", f64::from(tick) / 32.0);
            monitor.publish_state(&Scope::Root, &state);
        }
        monitor.enter(&[], &names(&["install"]), 1, "whitelist");

        assert!(matches!(
            lagging.try_recv(),
            Err(broadcast::error::TryRecvError::Lagged(_))
        ));
        assert_eq!(steps.try_recv().unwrap().step, "download");
        assert_eq!(steps.try_recv().unwrap().step, "whitelist");
        assert!(steps.try_recv().is_err());
    }

    #[test]
    fn dropped_step_watchers_are_forgotten() {
        let monitor = Monitor::new(4, "download.ratio".into());
        drop(monitor.watch_steps());
        monitor.enter(&[], &names(&["install"]), 0, "download");
        assert!(monitor.step_watchers.lock().is_empty());
    }

    #[test]
    fn branch_publishes_merge_only_their_changes() {
        let monitor = Monitor::new(8, "download.ratio".into());
        let fork = FlowState::new().with("a", 0).with("b", 0);
        monitor.begin(&fork);
        monitor.begin_parallel(&[2], names(&["x", "y"]), &fork);

        let x = fork.clone().with("a", 1);
        monitor.publish_state(&Scope::Branch { parallel: vec![2], index: 0 }, &x);
        let y = fork.clone().with("b", 2);
        monitor.publish_state(&Scope::Branch { parallel: vec![2], index: 1 }, &y);

        let snapshot = monitor.read();
        assert_eq!(snapshot.state, FlowState::new().with("a", 1).with("b", 2));
        assert_eq!(snapshot.branches[&vec![2]][1].state, y);
    }

    #[test]
    fn progress_follows_published_state() {
        let monitor = Monitor::new(8, "download.ratio".into());
        assert_eq!(monitor.progress(), crate::bridge::PROGRESS_SENTINEL);
        let mut state = FlowState::new();
        state.set_path("download.ratio", 0.25);
        monitor.publish_state(&Scope::Root, &state);
        assert_eq!(monitor.progress(), 0.25);
    }
}
