//! Flow executor implementation

use std::sync::Arc;

use async_recursion::async_recursion;
use futures::stream::{FuturesUnordered, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::{FlowError, RouteKind};
use crate::node::{BranchStep, Flow, Node, ParallelSteps};
use crate::observe::Scope;
use crate::runtime::Shared;
use crate::state::FlowState;
use crate::step::{Step, StepContext};
use crate::types::{BranchStatus, StepOutcome};

/// How a node stopped. `origin` names the node that produced the outcome so
/// the enclosing flow can look up its routes. `step` is the leaf that went
/// back, kept for diagnostics while the exit climbs through nested flows.
#[derive(Debug)]
pub(crate) enum NodeExit {
    Completed(FlowState),
    Failed {
        origin: String,
        state: FlowState,
    },
    Back {
        origin: String,
        step: String,
        state: FlowState,
    },
}

/// Position of a node in the tree and the context it runs under.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Child indices from the root
    pub path: Vec<usize>,
    /// Names from the root, this node included
    pub names: Vec<String>,
    pub scope: Scope,
    pub cancel: CancellationToken,
}

impl Frame {
    pub fn root(name: &str, cancel: CancellationToken) -> Self {
        Self {
            path: Vec::new(),
            names: vec![name.to_string()],
            scope: Scope::Root,
            cancel,
        }
    }

    fn child(&self, index: usize, name: &str) -> Self {
        let mut path = self.path.clone();
        path.push(index);
        let mut names = self.names.clone();
        names.push(name.to_string());
        Self {
            path,
            names,
            scope: self.scope.clone(),
            cancel: self.cancel.clone(),
        }
    }

    fn fork(&self, index: usize, name: &str, cancel: CancellationToken) -> Self {
        let mut frame = self.child(index, name);
        frame.scope = Scope::Branch {
            parallel: self.path.clone(),
            index,
        };
        frame.cancel = cancel;
        frame
    }
}

pub(crate) struct Executor {
    shared: Arc<Shared>,
}

impl Executor {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Execute a flow node
    #[async_recursion]
    pub async fn execute_node(
        &self,
        node: &Node,
        frame: &Frame,
        state: FlowState,
    ) -> Result<NodeExit, FlowError> {
        if frame.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        match node {
            Node::Step(step) => self.execute_step(step, frame, state).await,
            Node::Flow(flow) => self.execute_flow(flow, frame, state).await,
            Node::Branch(branch) => self.execute_branch(branch, frame, state).await,
            Node::Parallel(parallel) => self.execute_parallel(parallel, frame, state).await,
        }
    }

    async fn execute_step(
        &self,
        step: &Arc<dyn Step>,
        frame: &Frame,
        state: FlowState,
    ) -> Result<NodeExit, FlowError> {
        let name = step.name().to_string();
        let ctx = StepContext::new(
            name.clone(),
            frame.scope.clone(),
            Arc::clone(&self.shared),
            frame.cancel.clone(),
        );
        debug!(step = %name, "running step");

        let outcome = tokio::select! {
            _ = frame.cancel.cancelled() => Err(FlowError::Cancelled),
            outcome = step.run(state, &ctx) => outcome,
        };

        match outcome {
            Ok(StepOutcome::Completed(state)) => {
                debug!(step = %name, "step completed");
                Ok(NodeExit::Completed(state))
            }
            Ok(StepOutcome::Failed(state)) => {
                warn!(
                    step = %name,
                    error = state.error_message().unwrap_or("unspecified"),
                    "step failed"
                );
                self.shared.monitor.record_failure(&name);
                Ok(NodeExit::Failed {
                    origin: name,
                    state,
                })
            }
            Ok(StepOutcome::Back(state)) => {
                debug!(step = %name, "step went back");
                Ok(NodeExit::Back {
                    origin: name.clone(),
                    step: name,
                    state,
                })
            }
            Err(FlowError::Cancelled) => Err(FlowError::Cancelled),
            Err(err) => {
                warn!(step = %name, error = %err, "step fault");
                self.shared.monitor.record_failure(&name);
                Err(err)
            }
        }
    }

    /// Runs children in order, following resolved failure/back routes.
    async fn execute_flow(
        &self,
        flow: &Flow,
        frame: &Frame,
        state: FlowState,
    ) -> Result<NodeExit, FlowError> {
        debug!(flow = flow.name(), steps = flow.len(), "entering flow");
        let mut state = state;
        let mut cursor = 0;

        while let Some(child) = flow.children().get(cursor) {
            if frame.cancel.is_cancelled() {
                return Err(FlowError::Cancelled);
            }
            self.shared
                .monitor
                .enter(&frame.path, &frame.names, cursor, child.name());

            let exit = self
                .execute_node(child, &frame.child(cursor, child.name()), state)
                .await?;

            match exit {
                NodeExit::Completed(next) => {
                    self.shared.publish_state(&frame.scope, &next);
                    state = next;
                    cursor += 1;
                }
                NodeExit::Failed {
                    origin,
                    state: next,
                } => {
                    self.shared.publish_state(&frame.scope, &next);
                    state = next;
                    match flow.route(cursor, &origin, RouteKind::Failure) {
                        Some(target) => {
                            info!(
                                flow = flow.name(),
                                from = %origin,
                                to = flow.children()[target].name(),
                                "routing failure"
                            );
                            cursor = target;
                        }
                        None => {
                            return Ok(NodeExit::Failed {
                                origin: flow.name().to_string(),
                                state,
                            })
                        }
                    }
                }
                NodeExit::Back {
                    origin,
                    step,
                    state: next,
                } => {
                    self.shared.publish_state(&frame.scope, &next);
                    state = next;
                    match flow.route(cursor, &origin, RouteKind::Back) {
                        Some(target) => {
                            debug!(
                                flow = flow.name(),
                                from = %origin,
                                to = flow.children()[target].name(),
                                "routing back"
                            );
                            cursor = target;
                        }
                        None => {
                            return Ok(NodeExit::Back {
                                origin: flow.name().to_string(),
                                step,
                                state,
                            })
                        }
                    }
                }
            }
        }

        debug!(flow = flow.name(), "flow completed");
        Ok(NodeExit::Completed(state))
    }

    async fn execute_branch(
        &self,
        branch: &BranchStep,
        frame: &Frame,
        state: FlowState,
    ) -> Result<NodeExit, FlowError> {
        let (index, candidate) = branch.select(&state)?;
        debug!(
            branch = branch.name(),
            selected = candidate.name(),
            "branch selected"
        );
        self.shared
            .monitor
            .enter(&frame.path, &frame.names, index, candidate.name());
        self.execute_node(candidate, &frame.child(index, candidate.name()), state)
            .await
    }

    /// Forks every child on a private copy of `state` and joins them.
    async fn execute_parallel(
        &self,
        parallel: &ParallelSteps,
        frame: &Frame,
        state: FlowState,
    ) -> Result<NodeExit, FlowError> {
        let children = parallel.children();
        debug!(
            parallel = parallel.name(),
            children = children.len(),
            "forking parallel steps"
        );

        let fork = state;
        self.shared.monitor.begin_parallel(
            &frame.path,
            children.iter().map(|child| child.name().to_string()).collect(),
            &fork,
        );

        let siblings = frame.cancel.child_token();
        let mut pending = FuturesUnordered::new();
        for (index, child) in children.iter().enumerate() {
            let child_frame = frame.fork(index, child.name(), siblings.clone());
            let seed = fork.clone();
            pending.push(async move {
                let result = self.execute_node(child, &child_frame, seed).await;
                (index, result)
            });
        }

        let mut outputs: Vec<Option<FlowState>> = vec![None; children.len()];
        let mut failure: Option<(usize, FlowState)> = None;
        let mut fault: Option<FlowError> = None;

        while let Some((index, result)) = pending.next().await {
            let stopping = failure.is_some() || fault.is_some();
            let status = match result {
                Ok(NodeExit::Completed(output)) => {
                    if !stopping {
                        outputs[index] = Some(output);
                    }
                    BranchStatus::Completed
                }
                Ok(NodeExit::Failed { state, .. }) => {
                    if !stopping {
                        failure = Some((index, state));
                        siblings.cancel();
                    }
                    BranchStatus::Failed
                }
                Ok(NodeExit::Back { step, .. }) => {
                    if !stopping {
                        fault = Some(FlowError::UnroutedBack(step));
                        siblings.cancel();
                    }
                    BranchStatus::Failed
                }
                Err(FlowError::Cancelled) if siblings.is_cancelled() => BranchStatus::Cancelled,
                Err(err) => {
                    if fault.is_none() {
                        fault = Some(err);
                    }
                    siblings.cancel();
                    BranchStatus::Failed
                }
            };
            debug!(
                parallel = parallel.name(),
                branch = children[index].name(),
                status = ?status,
                "parallel branch stopped"
            );
            self.shared
                .monitor
                .set_branch_status(&frame.path, index, status);
        }
        drop(pending);

        if frame.cancel.is_cancelled() {
            return Err(FlowError::Cancelled);
        }
        if let Some(err) = fault {
            return Err(err);
        }
        if let Some((index, state)) = failure {
            warn!(
                parallel = parallel.name(),
                branch = children[index].name(),
                "parallel phase failed; siblings cancelled"
            );
            return Ok(NodeExit::Failed {
                origin: parallel.name().to_string(),
                state,
            });
        }

        // Later children overwrite earlier ones on conflicting keys.
        let mut merged = fork.clone();
        for output in outputs.into_iter().flatten() {
            merged.apply(&output.diff_from(&fork));
        }
        debug!(parallel = parallel.name(), "parallel steps joined");
        Ok(NodeExit::Completed(merged))
    }
}
