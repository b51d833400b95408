//! Step Orchestration Engine
//!
//! Composes named steps into sequential, branching and parallel flows that
//! thread one accumulated state, suspend on externally delivered events and
//! publish every state mutation and active-step move to observers.
//!
//! ```no_run
//! use step_flow::{FlowEngine, Flow, FnStep, Node};
//!
//! # async fn demo() -> Result<(), step_flow::FlowError> {
//! let flow = Flow::new(
//!     "hello",
//!     vec![Node::step(FnStep::completing("greet", |state| state.with("greeted", true)))],
//! )?;
//! let result = FlowEngine::new(flow).start().await?;
//! assert!(result.is_success());
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod config;
pub mod errors;
mod executor;
pub mod node;
pub mod observe;
pub mod predicate;
pub mod runtime;
pub mod state;
pub mod step;
pub mod types;

pub use bridge::{EventBridge, ProgressTracker, PROGRESS_SENTINEL};
pub use config::EngineConfig;
pub use errors::{FlowError, RouteKind};
pub use node::{Branch, BranchStep, Flow, Node, ParallelSteps, Routes};
pub use observe::{FlowSignal, StepChange};
pub use predicate::Predicate;
pub use runtime::{FlowEngine, FlowHandle};
pub use state::{Event, FlowState, StateDelta, ERROR_KEY};
pub use step::{FnStep, Step, StepContext, ViewFn, VoidStep};
pub use types::{BranchSnapshot, BranchStatus, FlowResult, FlowStatus, StepOutcome};
