//! Flow tree: sequential flows, branches and parallel fan-outs
//!
//! Composites own their children exclusively. Steps refer to their failure
//! and back targets by name; those names are resolved to sibling indices when
//! the enclosing [`Flow`] is built, so a flow that constructs is guaranteed to
//! route only to steps that exist.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::errors::{FlowError, RouteKind};
use crate::predicate::Predicate;
use crate::state::FlowState;
use crate::step::Step;

/// Any node of a flow tree.
pub enum Node {
    Step(Arc<dyn Step>),
    Flow(Flow),
    Branch(BranchStep),
    Parallel(ParallelSteps),
}

impl Node {
    /// Wraps a leaf step.
    pub fn step<S>(step: S) -> Self
    where
        S: Step + 'static,
    {
        Node::Step(Arc::new(step))
    }

    pub fn name(&self) -> &str {
        match self {
            Node::Step(step) => step.name(),
            Node::Flow(flow) => flow.name(),
            Node::Branch(branch) => branch.name(),
            Node::Parallel(parallel) => parallel.name(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Step(_) => "step",
            Node::Flow(_) => "flow",
            Node::Branch(_) => "branch",
            Node::Parallel(_) => "parallel",
        }
    }

    /// Child at `index`: flow child, branch candidate or parallel child.
    pub fn child(&self, index: usize) -> Option<&Node> {
        match self {
            Node::Step(_) => None,
            Node::Flow(flow) => flow.children.get(index),
            Node::Branch(branch) => branch.candidates.get(index).map(|candidate| &candidate.node),
            Node::Parallel(parallel) => parallel.children.get(index),
        }
    }

    pub fn children(&self) -> Box<dyn Iterator<Item = &Node> + '_> {
        match self {
            Node::Step(_) => Box::new(std::iter::empty()),
            Node::Flow(flow) => Box::new(flow.children.iter()),
            Node::Branch(branch) => Box::new(branch.candidates.iter().map(|candidate| &candidate.node)),
            Node::Parallel(parallel) => Box::new(parallel.children.iter()),
        }
    }

    /// Index path from this node to the first node named `name`, depth first.
    pub fn find_path(&self, name: &str) -> Option<Vec<usize>> {
        if self.name() == name {
            return Some(Vec::new());
        }
        self.children().enumerate().find_map(|(index, child)| {
            child.find_path(name).map(|mut rest| {
                rest.insert(0, index);
                rest
            })
        })
    }

    fn own_routes(&self) -> (Option<&str>, Option<&str>) {
        match self {
            Node::Step(step) => (step.failure_step(), step.back_step()),
            Node::Flow(flow) => (flow.failure_step.as_deref(), flow.back_step.as_deref()),
            Node::Branch(branch) => (branch.failure_step.as_deref(), branch.back_step.as_deref()),
            Node::Parallel(parallel) => {
                (parallel.failure_step.as_deref(), parallel.back_step.as_deref())
            }
        }
    }

    /// Routes this node asks its enclosing flow to resolve. A branch is
    /// transparent: its candidates' routes are resolved by the same flow.
    pub(crate) fn route_requests(&self) -> Vec<RouteRequest> {
        let mut requests = Vec::new();
        let (failure, back) = self.own_routes();
        if let Some(target) = failure {
            requests.push(RouteRequest::new(self.name(), RouteKind::Failure, target));
        }
        if let Some(target) = back {
            requests.push(RouteRequest::new(self.name(), RouteKind::Back, target));
        }
        if let Node::Branch(branch) = self {
            for candidate in &branch.candidates {
                requests.extend(candidate.node.route_requests());
            }
        }
        requests
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Step(step) => f.debug_tuple("Step").field(&step.name()).finish(),
            Node::Flow(flow) => fmt::Debug::fmt(flow, f),
            Node::Branch(branch) => fmt::Debug::fmt(branch, f),
            Node::Parallel(parallel) => fmt::Debug::fmt(parallel, f),
        }
    }
}

impl From<Flow> for Node {
    fn from(flow: Flow) -> Self {
        Node::Flow(flow)
    }
}

impl From<BranchStep> for Node {
    fn from(branch: BranchStep) -> Self {
        Node::Branch(branch)
    }
}

impl From<ParallelSteps> for Node {
    fn from(parallel: ParallelSteps) -> Self {
        Node::Parallel(parallel)
    }
}

impl From<Arc<dyn Step>> for Node {
    fn from(step: Arc<dyn Step>) -> Self {
        Node::Step(step)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RouteRequest {
    pub origin: String,
    pub kind: RouteKind,
    pub target: String,
}

impl RouteRequest {
    fn new(origin: &str, kind: RouteKind, target: &str) -> Self {
        Self {
            origin: origin.to_string(),
            kind,
            target: target.to_string(),
        }
    }
}

/// Resolved sibling indices for one origin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Routes {
    pub failure: Option<usize>,
    pub back: Option<usize>,
}

impl Routes {
    pub fn get(&self, kind: RouteKind) -> Option<usize> {
        match kind {
            RouteKind::Failure => self.failure,
            RouteKind::Back => self.back,
        }
    }
}

fn ensure_unique<'a>(parent: &str, names: impl Iterator<Item = &'a str>) -> Result<(), FlowError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(FlowError::DuplicateName {
                parent: parent.to_string(),
                name: name.to_string(),
            });
        }
    }
    Ok(())
}

/// Sequential composition of nodes threading one accumulated state.
pub struct Flow {
    name: String,
    children: Vec<Node>,
    routes: Vec<HashMap<String, Routes>>,
    failure_step: Option<String>,
    back_step: Option<String>,
}

impl Flow {
    /// Builds a flow, resolving every failure/back reference of its children.
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Result<Self, FlowError> {
        let name = name.into();
        if children.is_empty() {
            return Err(FlowError::InvalidStructure(format!(
                "flow '{}' has no steps",
                name
            )));
        }
        ensure_unique(&name, children.iter().map(Node::name))?;

        let index: HashMap<&str, usize> = children
            .iter()
            .enumerate()
            .map(|(position, child)| (child.name(), position))
            .collect();

        let mut routes = Vec::with_capacity(children.len());
        for child in &children {
            let mut table: HashMap<String, Routes> = HashMap::new();
            for request in child.route_requests() {
                let target = *index.get(request.target.as_str()).ok_or_else(|| {
                    FlowError::UnknownTarget {
                        parent: name.clone(),
                        step: request.origin.clone(),
                        kind: request.kind,
                        target: request.target.clone(),
                    }
                })?;
                let entry = table.entry(request.origin).or_default();
                match request.kind {
                    RouteKind::Failure => entry.failure = Some(target),
                    RouteKind::Back => entry.back = Some(target),
                }
            }
            routes.push(table);
        }

        Ok(Self {
            name,
            children,
            routes,
            failure_step: None,
            back_step: None,
        })
    }

    /// Sibling of this flow, in its parent, that receives control on failure.
    pub fn with_failure_step(mut self, target: impl Into<String>) -> Self {
        self.failure_step = Some(target.into());
        self
    }

    pub fn with_back_step(mut self, target: impl Into<String>) -> Self {
        self.back_step = Some(target.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Routes for an exit of child `child` that originated at `origin`.
    /// Each kind falls back to the child's own route when the origin
    /// declared none of that kind.
    pub fn routes_for(&self, child: usize, origin: &str) -> Routes {
        Routes {
            failure: self.route(child, origin, RouteKind::Failure),
            back: self.route(child, origin, RouteKind::Back),
        }
    }

    pub fn route(&self, child: usize, origin: &str, kind: RouteKind) -> Option<usize> {
        let table = self.routes.get(child)?;
        table
            .get(origin)
            .and_then(|routes| routes.get(kind))
            .or_else(|| {
                let node = self.children.get(child)?;
                table.get(node.name())?.get(kind)
            })
    }
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("name", &self.name)
            .field("children", &self.children)
            .finish()
    }
}

/// One candidate of a [`BranchStep`].
pub struct Branch {
    pub predicate: Predicate,
    pub node: Node,
}

impl Branch {
    pub fn new(predicate: Predicate, node: impl Into<Node>) -> Self {
        Self {
            predicate,
            node: node.into(),
        }
    }

    pub fn step<S>(predicate: Predicate, step: S) -> Self
    where
        S: Step + 'static,
    {
        Self {
            predicate,
            node: Node::step(step),
        }
    }
}

/// Picks exactly one candidate per evaluation; first match in declaration
/// order wins.
pub struct BranchStep {
    name: String,
    candidates: Vec<Branch>,
    failure_step: Option<String>,
    back_step: Option<String>,
}

impl BranchStep {
    pub fn new(name: impl Into<String>, candidates: Vec<Branch>) -> Result<Self, FlowError> {
        let name = name.into();
        if candidates.is_empty() {
            return Err(FlowError::InvalidStructure(format!(
                "branch '{}' has no candidates",
                name
            )));
        }
        ensure_unique(
            &name,
            std::iter::once(name.as_str()).chain(candidates.iter().map(|c| c.node.name())),
        )?;
        Ok(Self {
            name,
            candidates,
            failure_step: None,
            back_step: None,
        })
    }

    pub fn with_failure_step(mut self, target: impl Into<String>) -> Self {
        self.failure_step = Some(target.into());
        self
    }

    pub fn with_back_step(mut self, target: impl Into<String>) -> Self {
        self.back_step = Some(target.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[Branch] {
        &self.candidates
    }

    /// First candidate whose predicate holds for `state`.
    pub fn select(&self, state: &FlowState) -> Result<(usize, &Node), FlowError> {
        self.candidates
            .iter()
            .enumerate()
            .find(|(_, candidate)| candidate.predicate.evaluate(state))
            .map(|(index, candidate)| (index, &candidate.node))
            .ok_or_else(|| FlowError::NoBranchMatched(self.name.clone()))
    }
}

impl fmt::Debug for BranchStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let candidates: Vec<(&Predicate, &Node)> = self
            .candidates
            .iter()
            .map(|candidate| (&candidate.predicate, &candidate.node))
            .collect();
        f.debug_struct("BranchStep")
            .field("name", &self.name)
            .field("candidates", &candidates)
            .finish()
    }
}

/// Independent children run concurrently, each on a private copy of the
/// state, joined when all complete.
pub struct ParallelSteps {
    name: String,
    children: Vec<Node>,
    failure_step: Option<String>,
    back_step: Option<String>,
}

impl ParallelSteps {
    pub fn new(name: impl Into<String>, children: Vec<Node>) -> Result<Self, FlowError> {
        let name = name.into();
        if children.is_empty() {
            return Err(FlowError::InvalidStructure(format!(
                "parallel '{}' has no children",
                name
            )));
        }
        ensure_unique(&name, children.iter().map(Node::name))?;
        // Children have no siblings to jump to; routing only exists inside flows.
        if let Some(request) = children.iter().flat_map(Node::route_requests).next() {
            return Err(FlowError::InvalidStructure(format!(
                "'{}' inside parallel '{}' routes {} to '{}'; wrap it in a flow",
                request.origin, name, request.kind, request.target
            )));
        }
        Ok(Self {
            name,
            children,
            failure_step: None,
            back_step: None,
        })
    }

    pub fn with_failure_step(mut self, target: impl Into<String>) -> Self {
        self.failure_step = Some(target.into());
        self
    }

    pub fn with_back_step(mut self, target: impl Into<String>) -> Self {
        self.back_step = Some(target.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }
}

impl fmt::Debug for ParallelSteps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParallelSteps")
            .field("name", &self.name)
            .field("children", &self.children)
            .finish()
    }
}
