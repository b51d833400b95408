//! Flow execution error types

use std::fmt;

use thiserror::Error;

/// Which sibling reference a step declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKind {
    Failure,
    Back,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteKind::Failure => f.write_str("failure"),
            RouteKind::Back => f.write_str("back"),
        }
    }
}

/// Flow construction and execution errors
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FlowError {
    /// Invalid flow structure
    #[error("Invalid flow structure: {0}")]
    InvalidStructure(String),

    /// Two siblings share a name
    #[error("Duplicate step name '{name}' in '{parent}'")]
    DuplicateName { parent: String, name: String },

    /// A failure/back reference names no sibling of the declaring step
    #[error("Step '{step}' routes {kind} to '{target}', which is not a sibling in '{parent}'")]
    UnknownTarget {
        parent: String,
        step: String,
        kind: RouteKind,
        target: String,
    },

    /// No predicate of a branch step matched
    #[error("No branch of '{0}' matched the current state")]
    NoBranchMatched(String),

    /// A step went back but declares no back step
    #[error("Step '{0}' went back without a back step")]
    UnroutedBack(String),

    /// Step execution fault
    #[error("Step {step_id} failed: {reason}")]
    StepFailed { step_id: String, reason: String },

    /// A suspended step received nothing before the configured deadline
    #[error("Step '{step}' timed out after {timeout_ms}ms waiting for an event")]
    SuspendTimeout { step: String, timeout_ms: u64 },

    /// The flow was cancelled while running
    #[error("Flow execution was cancelled")]
    Cancelled,

    /// `start` called twice on the same engine
    #[error("Flow '{0}' has already been started")]
    AlreadyStarted(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlowError {
    pub fn step_failed(step_id: impl Into<String>, reason: impl fmt::Display) -> Self {
        FlowError::StepFailed {
            step_id: step_id.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors caused by the shape of the tree rather than by running it.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            FlowError::InvalidStructure(_)
                | FlowError::DuplicateName { .. }
                | FlowError::UnknownTarget { .. }
                | FlowError::NoBranchMatched(_)
                | FlowError::UnroutedBack(_)
        )
    }
}
