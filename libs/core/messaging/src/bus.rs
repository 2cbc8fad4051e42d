//! Event bus port.

use crate::error::BusError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Transport that delivers an encoded payload to a topic.
///
/// Implementations report failure through `BusError`; callers of the
/// [`EventPublisher`](crate::EventPublisher) never see it.
///
/// # Example
///
/// ```rust,ignore
/// use messaging::{EventBus, BusError};
///
/// struct StdoutBus;
///
/// #[async_trait]
/// impl EventBus for StdoutBus {
///     async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
///         println!("{topic}: {}", String::from_utf8_lossy(payload));
///         Ok(())
///     }
///
///     fn name(&self) -> &'static str {
///         "stdout"
///     }
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Deliver one message. Bounded by the transport's own timeout policy.
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError>;

    /// Bus name, used as a log field.
    fn name(&self) -> &'static str;
}

/// An event captured by [`RecordingBus`].
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub topic: String,
    pub payload: serde_json::Value,
}

/// In-memory bus that records every delivery (for testing).
#[derive(Debug, Clone, Default)]
pub struct RecordingBus {
    events: Arc<Mutex<Vec<PublishedEvent>>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far, in delivery order.
    pub fn published(&self) -> Vec<PublishedEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Deliveries on a single topic.
    pub fn published_on(&self, topic: &str) -> Vec<PublishedEvent> {
        self.published()
            .into_iter()
            .filter(|event| event.topic == topic)
            .collect()
    }
}

#[async_trait]
impl EventBus for RecordingBus {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let payload = serde_json::from_slice(payload)?;
        let mut events = self
            .events
            .lock()
            .map_err(|_| BusError::publish("recording bus lock poisoned"))?;
        events.push(PublishedEvent {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// A bus that is never reachable (for testing).
#[derive(Debug, Clone, Default)]
pub struct FailingBus {
    attempts: Arc<AtomicUsize>,
}

impl FailingBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many deliveries were attempted.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventBus for FailingBus {
    async fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), BusError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(BusError::connection("bus unreachable"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}
