//! Outbound domain events.
//!
//! Producers queue events through an [`EventPublisher`]; a single
//! [`EventDispatcher`] worker delivers them to an [`EventBus`]. Delivery is
//! best effort: bus failures are logged and dropped, never returned to the
//! code that published.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  try_send  ┌─────────────┐  publish  ┌──────────────┐
//! │ EventPublisher│──────────▶│ mpsc queue  │──────────▶│   EventBus   │
//! │  (cloneable)  │           │ (bounded)   │  worker   │ NatsBus/...  │
//! └──────────────┘            └─────────────┘           └──────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use messaging::{EventDispatcher, nats::{NatsBus, NatsConfig}};
//!
//! let config = NatsConfig::from_env()?;
//! let capacity = config.queue_capacity;
//! let bus = NatsBus::connect(config).await;
//! let (publisher, dispatcher) = EventDispatcher::spawn(bus, capacity);
//!
//! publisher.publish("auth.user.created", &payload);
//!
//! // On shutdown
//! dispatcher.shutdown().await;
//! ```

mod bus;
mod error;
mod publisher;

#[cfg(feature = "nats")]
pub mod nats;

pub use bus::{EventBus, FailingBus, PublishedEvent, RecordingBus};
pub use error::BusError;
pub use publisher::{EventDispatcher, EventPublisher, DEFAULT_QUEUE_CAPACITY};
