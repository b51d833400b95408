//! Accumulated flow state and external events

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Key holding a recoverable failure, read by later branch predicates and views.
pub const ERROR_KEY: &str = "error";

/// String-keyed state threaded through a flow. Values are arbitrary JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowState(Map<String, Value>);

impl FlowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a state from a JSON value; anything but an object yields an empty state.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Object(map) => Self(map),
            _ => Self::default(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Resolves a dotted path such as `account.email`.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.').filter(|segment| !segment.is_empty());
        let mut current = self.0.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    pub fn lookup_str(&self, path: &str) -> Option<&str> {
        self.lookup(path).and_then(Value::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Sets a dotted path, creating intermediate objects and replacing
    /// non-object values found on the way.
    pub fn set_path(&mut self, path: &str, value: impl Into<Value>) {
        let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
        let Some((last, parents)) = segments.split_last() else {
            return;
        };
        let mut current = &mut self.0;
        for segment in parents {
            let slot = current
                .entry((*segment).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            current = match slot.as_object_mut() {
                Some(map) => map,
                None => return,
            };
        }
        current.insert((*last).to_string(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Inserts every key of `other`, overwriting on conflict.
    pub fn merge(&mut self, other: &FlowState) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Keys this state added, changed or dropped relative to `base`.
    pub fn diff_from(&self, base: &FlowState) -> StateDelta {
        let changed = self
            .0
            .iter()
            .filter(|(key, value)| base.0.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        let removed = base
            .0
            .keys()
            .filter(|key| !self.0.contains_key(*key))
            .cloned()
            .collect();
        StateDelta { changed, removed }
    }

    pub fn apply(&mut self, delta: &StateDelta) {
        for key in &delta.removed {
            self.0.remove(key);
        }
        for (key, value) in &delta.changed {
            self.0.insert(key.clone(), value.clone());
        }
    }

    pub fn error(&self) -> Option<&Value> {
        self.0.get(ERROR_KEY)
    }

    pub fn has_error(&self) -> bool {
        self.error().map(is_truthy).unwrap_or(false)
    }

    /// Message of the recorded error, whether stored as `{message}` or a bare string.
    pub fn error_message(&self) -> Option<&str> {
        match self.error()? {
            Value::String(message) => Some(message),
            Value::Object(map) => map.get("message").and_then(Value::as_str),
            _ => None,
        }
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let mut error = Map::new();
        error.insert("message".to_string(), Value::String(message.into()));
        self.0.insert(ERROR_KEY.to_string(), Value::Object(error));
    }

    pub fn clear_error(&mut self) {
        self.0.remove(ERROR_KEY);
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for FlowState {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Changes one parallel branch made to its fork-time copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    pub changed: Map<String, Value>,
    pub removed: Vec<String>,
}

impl StateDelta {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Loose truthiness used by predicates: null, false, 0 and "" are false.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Out-of-band event delivered to a suspended step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    #[serde(default)]
    pub payload: BTreeMap<String, String>,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: BTreeMap<String, String>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, BTreeMap::new())
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_path_creates_nested_objects() {
        let mut state = FlowState::new();
        state.set_path("account.email", "a@b.io");
        state.set_path("account.exists", true);
        assert_eq!(state.lookup_str("account.email"), Some("a@b.io"));
        assert_eq!(state.lookup("account.exists"), Some(&json!(true)));
        assert_eq!(state.lookup("account.missing"), None);
    }

    #[test]
    fn set_path_replaces_scalars_on_the_way() {
        let mut state = FlowState::new().with("download", 3);
        state.set_path("download.ratio", 0.5);
        assert_eq!(state.get("download"), Some(&json!({"ratio": 0.5})));
    }

    #[test]
    fn diff_reports_changes_and_removals() {
        let base = FlowState::from_json(json!({"a": 1, "b": 2, "error": {"message": "x"}}));
        let mut branch = base.clone();
        branch.insert("b", 3);
        branch.insert("c", 4);
        branch.clear_error();

        let delta = branch.diff_from(&base);
        assert_eq!(delta.changed.get("b"), Some(&json!(3)));
        assert_eq!(delta.changed.get("c"), Some(&json!(4)));
        assert!(!delta.changed.contains_key("a"));
        assert_eq!(delta.removed, vec!["error".to_string()]);

        let mut merged = base.clone();
        merged.apply(&delta);
        assert_eq!(merged, branch);
    }

    #[test]
    fn error_helpers() {
        let mut state = FlowState::new();
        assert!(!state.has_error());
        state.set_error("Invalid email");
        assert!(state.has_error());
        assert_eq!(state.error_message(), Some("Invalid email"));
        state.insert(ERROR_KEY, "plain");
        assert_eq!(state.error_message(), Some("plain"));
        state.clear_error();
        assert_eq!(state.error(), None);
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!({})));
        assert!(is_truthy(&json!(0.1)));
    }

    #[test]
    fn event_fields() {
        let event = Event::named("did-submit-email").with_field("email", "a@b.io");
        assert_eq!(event.field("email"), Some("a@b.io"));
        assert_eq!(event.field("password"), None);
    }
}
