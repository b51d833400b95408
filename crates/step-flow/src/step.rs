//! Leaf steps and the context they run in

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::FlowError;
use crate::observe::Scope;
use crate::runtime::Shared;
use crate::state::{Event, FlowState};
use crate::types::StepOutcome;

/// Renders the view of a step from the current state.
pub type ViewFn = Arc<dyn Fn(&FlowState) -> String + Send + Sync>;

/// Primitive unit of work.
///
/// A step receives the accumulated state and returns it, possibly modified,
/// wrapped in an outcome. Steps that need user input suspend on
/// [`StepContext::wait_for`]. Returning `Err` is an internal fault and ends
/// the whole flow; input problems should be reported as
/// [`StepOutcome::Failed`] with the `error` key set instead.
#[async_trait]
pub trait Step: Send + Sync {
    /// Name, unique among siblings
    fn name(&self) -> &str;

    /// View renderer shown while this step is active
    fn view(&self) -> Option<ViewFn> {
        None
    }

    /// Sibling that receives control on `Failed`
    fn failure_step(&self) -> Option<&str> {
        None
    }

    /// Sibling that receives control on `Back`
    fn back_step(&self) -> Option<&str> {
        None
    }

    async fn run(&self, state: FlowState, ctx: &StepContext) -> Result<StepOutcome, FlowError>;
}

/// Handle given to a running step.
pub struct StepContext {
    step: String,
    scope: Scope,
    shared: Arc<Shared>,
    cancel: CancellationToken,
}

impl StepContext {
    pub(crate) fn new(
        step: impl Into<String>,
        scope: Scope,
        shared: Arc<Shared>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            step: step.into(),
            scope,
            shared,
            cancel,
        }
    }

    pub fn step_name(&self) -> &str {
        &self.step
    }

    /// Suspends until one of `events` is emitted on the bridge.
    ///
    /// The step is registered as a listener before it suspends and removed
    /// again when this returns, so an event emitted while the step is busy
    /// elsewhere is dropped rather than queued.
    pub async fn wait_for(&self, events: &[&str]) -> Result<Event, FlowError> {
        let (_guard, receiver) = self.shared.bridge.register(&self.step, events);
        debug!(step = %self.step, events = ?events, "step suspended");

        let step = self.step.clone();
        let received = async move {
            receiver.await.map_err(|_| {
                FlowError::Internal(format!("listener for '{}' was dropped by the bridge", step))
            })
        };

        let result = match self.shared.config.suspend_timeout_ms {
            Some(timeout_ms) => {
                let limit = Duration::from_millis(timeout_ms);
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
                    outcome = tokio::time::timeout(limit, received) => match outcome {
                        Ok(result) => result,
                        Err(_) => Err(FlowError::SuspendTimeout {
                            step: self.step.clone(),
                            timeout_ms,
                        }),
                    },
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancel.cancelled() => Err(FlowError::Cancelled),
                    result = received => result,
                }
            }
        };

        if let Ok(event) = &result {
            debug!(step = %self.step, event = %event.name, "step resumed");
        }
        result
    }

    /// Publishes an intermediate state, e.g. a progress tick, to observers.
    pub fn publish(&self, state: &FlowState) {
        self.shared.publish_state(&self.scope, state);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token cancelled when the flow, or the enclosing parallel phase, stops.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for StepContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepContext")
            .field("step", &self.step)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Step that completes immediately with the state unchanged. Used for pure
/// view steps such as a final page.
#[derive(Clone)]
pub struct VoidStep {
    name: String,
    view: Option<ViewFn>,
    failure_step: Option<String>,
    back_step: Option<String>,
}

impl VoidStep {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            view: None,
            failure_step: None,
            back_step: None,
        }
    }

    pub fn with_view<F>(mut self, view: F) -> Self
    where
        F: Fn(&FlowState) -> String + Send + Sync + 'static,
    {
        self.view = Some(Arc::new(view));
        self
    }

    pub fn with_failure_step(mut self, target: impl Into<String>) -> Self {
        self.failure_step = Some(target.into());
        self
    }

    pub fn with_back_step(mut self, target: impl Into<String>) -> Self {
        self.back_step = Some(target.into());
        self
    }
}

#[async_trait]
impl Step for VoidStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn view(&self) -> Option<ViewFn> {
        self.view.clone()
    }

    fn failure_step(&self) -> Option<&str> {
        self.failure_step.as_deref()
    }

    fn back_step(&self) -> Option<&str> {
        self.back_step.as_deref()
    }

    async fn run(&self, state: FlowState, _ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        Ok(StepOutcome::Completed(state))
    }
}

type StepFn = Arc<dyn Fn(FlowState) -> Result<StepOutcome, FlowError> + Send + Sync>;

/// Step backed by a synchronous closure.
#[derive(Clone)]
pub struct FnStep {
    inner: VoidStep,
    run: StepFn,
}

impl FnStep {
    pub fn new<F>(name: impl Into<String>, run: F) -> Self
    where
        F: Fn(FlowState) -> Result<StepOutcome, FlowError> + Send + Sync + 'static,
    {
        Self {
            inner: VoidStep::new(name),
            run: Arc::new(run),
        }
    }

    /// Closure that only transforms state and always completes.
    pub fn completing<F>(name: impl Into<String>, update: F) -> Self
    where
        F: Fn(FlowState) -> FlowState + Send + Sync + 'static,
    {
        Self::new(name, move |state| Ok(StepOutcome::Completed(update(state))))
    }

    pub fn with_view<F>(mut self, view: F) -> Self
    where
        F: Fn(&FlowState) -> String + Send + Sync + 'static,
    {
        self.inner = self.inner.with_view(view);
        self
    }

    pub fn with_failure_step(mut self, target: impl Into<String>) -> Self {
        self.inner = self.inner.with_failure_step(target);
        self
    }

    pub fn with_back_step(mut self, target: impl Into<String>) -> Self {
        self.inner = self.inner.with_back_step(target);
        self
    }
}

#[async_trait]
impl Step for FnStep {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn view(&self) -> Option<ViewFn> {
        self.inner.view()
    }

    fn failure_step(&self) -> Option<&str> {
        self.inner.failure_step()
    }

    fn back_step(&self) -> Option<&str> {
        self.inner.back_step()
    }

    async fn run(&self, state: FlowState, _ctx: &StepContext) -> Result<StepOutcome, FlowError> {
        (self.run)(state)
    }
}
