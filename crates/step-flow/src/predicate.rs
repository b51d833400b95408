//! Branch predicates evaluated against flow state

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::state::{is_truthy, FlowState};

type PredicateFn = Arc<dyn Fn(&FlowState) -> bool + Send + Sync>;

/// Condition selecting a branch candidate. Paths are dotted state lookups.
#[derive(Clone)]
pub enum Predicate {
    /// Always matches
    Always,

    /// Value at path exists and is truthy
    Truthy(String),

    /// Value at path is missing or falsy
    Falsy(String),

    /// Value at path exists, whatever it holds
    Exists(String),

    /// Value at path equals the given value
    Equals { path: String, value: Value },

    /// AND combination
    And(Vec<Predicate>),

    /// OR combination
    Or(Vec<Predicate>),

    /// NOT
    Not(Box<Predicate>),

    /// Arbitrary closure over the state
    Custom(PredicateFn),
}

impl Predicate {
    pub fn truthy(path: impl Into<String>) -> Self {
        Predicate::Truthy(path.into())
    }

    pub fn falsy(path: impl Into<String>) -> Self {
        Predicate::Falsy(path.into())
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Predicate::Exists(path.into())
    }

    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Equals {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&FlowState) -> bool + Send + Sync + 'static,
    {
        Predicate::Custom(Arc::new(f))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    pub fn evaluate(&self, state: &FlowState) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Truthy(path) => state.lookup(path).map(is_truthy).unwrap_or(false),
            Predicate::Falsy(path) => !state.lookup(path).map(is_truthy).unwrap_or(false),
            Predicate::Exists(path) => state.lookup(path).is_some(),
            Predicate::Equals { path, value } => state.lookup(path) == Some(value),
            Predicate::And(conditions) => conditions.iter().all(|cond| cond.evaluate(state)),
            Predicate::Or(conditions) => conditions.iter().any(|cond| cond.evaluate(state)),
            Predicate::Not(cond) => !cond.evaluate(state),
            Predicate::Custom(f) => f(state),
        }
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Always => f.write_str("Always"),
            Predicate::Truthy(path) => f.debug_tuple("Truthy").field(path).finish(),
            Predicate::Falsy(path) => f.debug_tuple("Falsy").field(path).finish(),
            Predicate::Exists(path) => f.debug_tuple("Exists").field(path).finish(),
            Predicate::Equals { path, value } => f
                .debug_struct("Equals")
                .field("path", path)
                .field("value", value)
                .finish(),
            Predicate::And(conditions) => f.debug_tuple("And").field(conditions).finish(),
            Predicate::Or(conditions) => f.debug_tuple("Or").field(conditions).finish(),
            Predicate::Not(cond) => f.debug_tuple("Not").field(cond).finish(),
            Predicate::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state() -> FlowState {
        FlowState::from_json(json!({
            "account": {"exists": true, "email": "dev@kite.io"},
            "count": 0
        }))
    }

    #[test]
    fn truthy_and_falsy_follow_paths() {
        let state = state();
        assert!(Predicate::truthy("account.exists").evaluate(&state));
        assert!(!Predicate::falsy("account.exists").evaluate(&state));
        assert!(Predicate::falsy("error").evaluate(&state));
        assert!(Predicate::falsy("count").evaluate(&state));
        assert!(Predicate::exists("count").evaluate(&state));
    }

    #[test]
    fn combinators() {
        let state = state();
        let both = Predicate::And(vec![
            Predicate::truthy("account.exists"),
            Predicate::equals("account.email", "dev@kite.io"),
        ]);
        assert!(both.evaluate(&state));
        assert!(!both.clone().negate().evaluate(&state));
        assert!(Predicate::Or(vec![Predicate::truthy("error"), Predicate::Always]).evaluate(&state));
        assert!(Predicate::custom(|s| s.contains_key("count")).evaluate(&state));
    }

    #[test]
    fn debug_hides_closures() {
        let rendered = format!("{:?}", Predicate::custom(|_| true));
        assert_eq!(rendered, "Custom(..)");
    }
}
