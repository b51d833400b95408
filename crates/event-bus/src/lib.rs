use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{trace, warn};

/// Trait implemented by payload types that can be carried on the bus.
pub trait Event: Clone + Send + Sync + std::fmt::Debug + 'static {}

impl<T> Event for T where T: Clone + Send + Sync + std::fmt::Debug + 'static {}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("no active subscribers")]
    NoSubscribers,
}

#[async_trait]
pub trait EventBus<E>: Send + Sync
where
    E: Event,
{
    /// Publishes an event, returning how many subscribers will see it.
    async fn publish(&self, event: E) -> Result<usize, BusError>;
    fn subscribe(&self) -> broadcast::Receiver<E>;
}

/// In-memory broadcast bus. Every subscriber sees every event published after
/// it subscribed, in publish order.
pub struct InMemoryBus<E>
where
    E: Event,
{
    sender: broadcast::Sender<E>,
}

impl<E> InMemoryBus<E>
where
    E: Event,
{
    pub fn new(capacity: usize) -> Arc<Self> {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Arc::new(Self { sender })
    }

    /// Synchronous publish for callers that must not yield between a state
    /// transition and its notification. Having nobody listening is not an error.
    pub fn send(&self, event: E) -> usize {
        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                trace!("bus event dropped: no subscribers");
                0
            }
        }
    }
}

#[async_trait]
impl<E> EventBus<E> for InMemoryBus<E>
where
    E: Event,
{
    async fn publish(&self, event: E) -> Result<usize, BusError> {
        self.sender
            .send(event)
            .map_err(|_| BusError::NoSubscribers)
    }

    fn subscribe(&self) -> broadcast::Receiver<E> {
        self.sender.subscribe()
    }
}

/// Drives `callback` with every event received on `rx` until the bus closes.
/// Lagged receivers skip the missed events and keep going.
pub fn spawn_listener<E, F>(mut rx: broadcast::Receiver<E>, mut callback: F) -> JoinHandle<()>
where
    E: Event,
    F: FnMut(E) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ev) => callback(ev),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus listener lagged; skipping missed events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
