//! Fire-and-forget event publication.
//!
//! [`EventPublisher`] hands events to a bounded queue and returns at once.
//! [`EventDispatcher`] owns the worker task that drains the queue into an
//! [`EventBus`]. A failed delivery is logged and the event is dropped; there
//! is no retry and the failure never reaches the publisher's caller.

use crate::bus::EventBus;
use crate::error::BusError;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default outbound queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

#[derive(Debug)]
struct OutboundEvent {
    topic: String,
    payload: Vec<u8>,
}

#[derive(Debug)]
enum Envelope {
    Event(OutboundEvent),
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle for queueing events.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: mpsc::Sender<Envelope>,
}

impl EventPublisher {
    /// Queue `payload` for delivery on `topic`.
    ///
    /// Never blocks and never fails from the caller's point of view. If the
    /// payload cannot be encoded, or the queue is full or closed, the event
    /// is dropped with a log line.
    pub fn publish<T: Serialize>(&self, topic: &str, payload: &T) {
        let payload = match serde_json::to_vec(payload) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(topic, error = %BusError::from(e), "Dropping event that failed to encode");
                return;
            }
        };

        let envelope = Envelope::Event(OutboundEvent {
            topic: topic.to_string(),
            payload,
        });

        match self.tx.try_send(envelope) {
            Ok(()) => debug!(topic, "Event queued"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(topic, error = %BusError::QueueFull, "Dropping event");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!(topic, error = %BusError::QueueClosed, "Dropping event");
            }
        }
    }

    /// Wait until every event queued before this call has been attempted.
    ///
    /// Returns immediately if the worker has already stopped.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Envelope::Flush(done_tx)).await.is_err() {
            return;
        }
        let _ = done_rx.await;
    }

    /// Whether the worker has stopped accepting events.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Owner of the delivery worker.
///
/// Dropping the dispatcher without calling [`shutdown`](Self::shutdown)
/// detaches the worker: it keeps delivering until every [`EventPublisher`]
/// is dropped, and nothing waits for it to finish.
#[must_use = "call `shutdown` to deliver queued events before exit"]
pub struct EventDispatcher {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl EventDispatcher {
    /// Start the delivery worker on the current tokio runtime.
    #[must_use]
    pub fn spawn<B>(bus: B, capacity: usize) -> (EventPublisher, Self)
    where
        B: EventBus + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(bus = bus.name(), capacity, "Starting event dispatcher");
        let handle = tokio::spawn(run(bus, rx, shutdown_rx));

        (EventPublisher { tx }, Self { shutdown_tx, handle })
    }

    /// Stop accepting events, deliver what is already queued, and wait for
    /// the worker to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "Event dispatcher task failed");
        }
    }
}

async fn run<B: EventBus>(
    bus: B,
    mut rx: mpsc::Receiver<Envelope>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut watching = true;

    loop {
        tokio::select! {
            biased;

            envelope = rx.recv() => match envelope {
                Some(envelope) => handle(&bus, envelope).await,
                None => break,
            },

            changed = shutdown_rx.changed(), if watching => {
                if changed.is_err() {
                    debug!("Dispatcher handle dropped, running until publishers close");
                    watching = false;
                    continue;
                }
                if !*shutdown_rx.borrow_and_update() {
                    continue;
                }

                info!("Shutdown signal received, draining event queue");
                rx.close();
                while let Some(envelope) = rx.recv().await {
                    handle(&bus, envelope).await;
                }
                break;
            }
        }
    }

    info!(bus = bus.name(), "Event dispatcher stopped");
}

async fn handle<B: EventBus>(bus: &B, envelope: Envelope) {
    match envelope {
        Envelope::Event(event) => {
            match bus.publish(&event.topic, &event.payload).await {
                Ok(()) => debug!(topic = %event.topic, bus = bus.name(), "Event published"),
                Err(e) => error!(
                    topic = %event.topic,
                    bus = bus.name(),
                    error = %e,
                    "Failed to publish event, dropping"
                ),
            }
        }
        Envelope::Flush(done) => {
            let _ = done.send(());
        }
    }
}
