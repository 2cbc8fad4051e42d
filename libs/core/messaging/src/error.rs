//! Error types for event publication.

use thiserror::Error;

/// Error returned by an [`EventBus`](crate::EventBus) delivery attempt.
///
/// These errors are terminal at the dispatcher: they are logged and the
/// event is dropped. They never reach the code that queued the event.
#[derive(Debug, Error)]
pub enum BusError {
    /// The bus could not be reached (initial or lazy connect failed)
    #[error("bus connection error: {0}")]
    Connection(String),

    /// The bus accepted the connection but rejected or lost the message
    #[error("publish error: {0}")]
    Publish(String),

    /// Payload could not be encoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The outbound queue is at capacity
    #[error("outbound queue is full")]
    QueueFull,

    /// The delivery worker has stopped
    #[error("outbound queue is closed")]
    QueueClosed,
}

impl BusError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a publish error.
    pub fn publish(msg: impl Into<String>) -> Self {
        Self::Publish(msg.into())
    }
}
