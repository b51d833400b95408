//! Core types for flow execution results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::FlowState;

/// What a leaf step reports when it stops running.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Advance to the next sibling
    Completed(FlowState),

    /// Recoverable failure, routed to the step's failure target
    Failed(FlowState),

    /// User asked to go back, routed to the step's back target
    Back(FlowState),
}

impl StepOutcome {
    pub fn state(&self) -> &FlowState {
        match self {
            StepOutcome::Completed(state) | StepOutcome::Failed(state) | StepOutcome::Back(state) => {
                state
            }
        }
    }

    pub fn into_state(self) -> FlowState {
        match self {
            StepOutcome::Completed(state) | StepOutcome::Failed(state) | StepOutcome::Back(state) => {
                state
            }
        }
    }
}

/// Lifecycle of a flow engine run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    NotStarted,
    Running,
    Completed,
    Failed,
}

impl FlowStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, FlowStatus::Completed | FlowStatus::Failed)
    }
}

/// Status of one child of a parallel node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Per-branch view of a parallel phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchSnapshot {
    /// Child name
    pub name: String,

    /// Current status
    pub status: BranchStatus,

    /// The branch's private state as last published
    pub state: FlowState,
}

/// Flow execution result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowResult {
    /// Root flow name
    pub flow_name: String,

    /// Identifier of this run
    pub run_id: Uuid,

    /// Terminal status
    pub status: FlowStatus,

    /// Final accumulated state
    pub state: FlowState,

    /// Leaf that produced the terminal failure, if any
    pub failed_step: Option<String>,

    /// Error message if failed
    pub error: Option<String>,

    /// Start time
    pub started_at: DateTime<Utc>,

    /// Finish time
    pub finished_at: DateTime<Utc>,

    /// Total latency in milliseconds
    pub latency_ms: u64,

    /// Active-step transitions, as slash-joined paths from the root
    pub transitions: Vec<String>,
}

impl FlowResult {
    /// Create a new flow result
    pub fn new(flow_name: String) -> Self {
        let now = Utc::now();
        Self {
            flow_name,
            run_id: Uuid::new_v4(),
            status: FlowStatus::Running,
            state: FlowState::new(),
            failed_step: None,
            error: None,
            started_at: now,
            finished_at: now,
            latency_ms: 0,
            transitions: Vec::new(),
        }
    }

    /// Mark as success
    pub fn with_success(mut self, state: FlowState) -> Self {
        self.status = FlowStatus::Completed;
        self.state = state;
        self
    }

    /// Mark as failure
    pub fn with_error(mut self, state: FlowState, error: String) -> Self {
        self.status = FlowStatus::Failed;
        self.state = state;
        self.error = Some(error);
        self
    }

    pub fn with_failed_step(mut self, step: Option<String>) -> Self {
        self.failed_step = step;
        self
    }

    pub fn with_transitions(mut self, transitions: Vec<String>) -> Self {
        self.transitions = transitions;
        self
    }

    /// Set finish time and calculate latency
    pub fn finish(mut self) -> Self {
        self.finished_at = Utc::now();
        self.latency_ms = (self.finished_at - self.started_at)
            .num_milliseconds()
            .max(0) as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == FlowStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_lifecycle() {
        let state = FlowState::new().with("x", 1);
        let result = FlowResult::new("install".into())
            .with_error(state.clone(), "boom".into())
            .with_failed_step(Some("download".into()))
            .finish();
        assert_eq!(result.status, FlowStatus::Failed);
        assert!(!result.is_success());
        assert_eq!(result.state, state);
        assert_eq!(result.failed_step.as_deref(), Some("download"));
        assert!(result.finished_at >= result.started_at);
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&FlowStatus::NotStarted).unwrap();
        assert_eq!(json, "\"not_started\"");
        assert!(FlowStatus::Failed.is_terminal());
        assert!(!FlowStatus::Running.is_terminal());
    }
}
