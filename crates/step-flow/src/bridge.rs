//! Event bridge and progress tracking
//!
//! The bridge is the only way external input reaches a running flow. A step
//! registers interest in a set of event names right before it suspends; the
//! matching `emit` hands the event over a oneshot channel and removes the
//! registration, so an event is consumed by at most one step.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, trace};

use crate::state::{Event, FlowState};

/// Reported by `progress()` before any progress-bearing state exists.
pub const PROGRESS_SENTINEL: f64 = -1.0;

struct Registration {
    id: u64,
    step: String,
    accepts: Vec<String>,
    sender: oneshot::Sender<Event>,
}

/// Routes externally emitted events to suspended steps.
#[derive(Default)]
pub struct EventBridge {
    listeners: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
}

/// Removes its registration when dropped, whether or not an event arrived.
pub struct ListenerGuard<'a> {
    bridge: &'a EventBridge,
    id: u64,
}

impl Drop for ListenerGuard<'_> {
    fn drop(&mut self) {
        self.bridge.listeners.lock().retain(|reg| reg.id != self.id);
    }
}

impl EventBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `step` as waiting for any of `events`.
    pub fn register(
        &self,
        step: &str,
        events: &[&str],
    ) -> (ListenerGuard<'_>, oneshot::Receiver<Event>) {
        let (sender, receiver) = oneshot::channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(Registration {
            id,
            step: step.to_string(),
            accepts: events.iter().map(|name| name.to_string()).collect(),
            sender,
        });
        (ListenerGuard { bridge: self, id }, receiver)
    }

    /// Delivers `event` to the earliest registered listener accepting its
    /// name. Returns whether a step received it; nobody listening is not an
    /// error.
    pub fn emit(&self, event: Event) -> bool {
        let mut event = event;
        let mut listeners = self.listeners.lock();
        while let Some(position) = listeners
            .iter()
            .position(|reg| reg.accepts.iter().any(|name| *name == event.name))
        {
            let registration = listeners.remove(position);
            match registration.sender.send(event) {
                Ok(()) => {
                    debug!(step = %registration.step, "event delivered");
                    return true;
                }
                // Receiver went away between suspension and delivery; try the next one.
                Err(returned) => event = returned,
            }
        }
        debug!(event = %event.name, "no listener for event, dropping");
        false
    }

    /// Steps currently suspended, with the events each accepts.
    pub fn listening(&self) -> Vec<(String, Vec<String>)> {
        self.listeners
            .lock()
            .iter()
            .map(|reg| (reg.step.clone(), reg.accepts.clone()))
            .collect()
    }

    pub fn is_listening(&self, event: &str) -> bool {
        self.listeners
            .lock()
            .iter()
            .any(|reg| reg.accepts.iter().any(|name| name == event))
    }
}

/// Monotonic progress read from `<key>.ratio` of the observed state.
pub struct ProgressTracker {
    path: String,
    value: Mutex<Option<f64>>,
}

impl ProgressTracker {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            value: Mutex::new(None),
        }
    }

    /// Folds the ratio found in `state`, if any, into the tracked value.
    pub fn observe(&self, state: &FlowState) {
        let Some(ratio) = state.lookup(&self.path).and_then(Value::as_f64) else {
            return;
        };
        if !ratio.is_finite() {
            return;
        }
        let ratio = ratio.clamp(0.0, 1.0);
        let mut value = self.value.lock();
        let next = value.map_or(ratio, |current| current.max(ratio));
        if *value != Some(next) {
            trace!(path = %self.path, progress = next, "progress advanced");
        }
        *value = Some(next);
    }

    /// Ratio in `[0, 1]`, or [`PROGRESS_SENTINEL`] before any was seen.
    pub fn value(&self) -> f64 {
        self.value.lock().unwrap_or(PROGRESS_SENTINEL)
    }
}
