//! NATS core pub/sub bus.
//!
//! Enabled with the `nats` feature. Messages are plain core-NATS publishes
//! (no JetStream), which matches the fire-and-forget contract of the
//! dispatcher.

use crate::bus::EventBus;
use crate::error::BusError;
use crate::publisher::DEFAULT_QUEUE_CAPACITY;
use async_nats::{Client, ConnectOptions};
use async_trait::async_trait;
use core_config::{env_or_default, env_parse, ConfigError, FromEnv};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

/// NATS connection settings.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub connect_timeout_secs: u64,
    /// Depth of the dispatcher queue in front of this bus.
    pub queue_capacity: usize,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://localhost:4222".to_string(),
            connect_timeout_secs: 5,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl FromEnv for NatsConfig {
    fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: env_or_default("NATS_URL", "nats://localhost:4222"),
            connect_timeout_secs: env_parse("NATS_CONNECT_TIMEOUT_SECS", 5)?,
            queue_capacity: env_parse("EVENT_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?,
        })
    }
}

/// [`EventBus`] backed by a NATS client.
///
/// An unreachable server at startup is not fatal: the bus retries the
/// connection on each delivery until one succeeds.
pub struct NatsBus {
    config: NatsConfig,
    client: Mutex<Option<Client>>,
}

impl NatsBus {
    /// Build the bus and try to connect once.
    pub async fn connect(config: NatsConfig) -> Self {
        let client = match open(&config).await {
            Ok(client) => {
                info!(url = %config.url, "Connected to NATS");
                Some(client)
            }
            Err(e) => {
                warn!(url = %config.url, error = %e, "NATS unavailable, will retry on publish");
                None
            }
        };

        Self {
            config,
            client: Mutex::new(client),
        }
    }

    /// Build a bus around an existing client.
    pub fn from_client(config: NatsConfig, client: Client) -> Self {
        Self {
            config,
            client: Mutex::new(Some(client)),
        }
    }

    async fn client(&self) -> Result<Client, BusError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }

        let client = open(&self.config).await?;
        info!(url = %self.config.url, "Connected to NATS");
        *guard = Some(client.clone());
        Ok(client)
    }
}

async fn open(config: &NatsConfig) -> Result<Client, BusError> {
    ConnectOptions::new()
        .connection_timeout(Duration::from_secs(config.connect_timeout_secs))
        .connect(config.url.as_str())
        .await
        .map_err(|e| BusError::connection(e.to_string()))
}

#[async_trait]
impl EventBus for NatsBus {
    #[instrument(skip(self, payload), fields(subject = %topic))]
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), BusError> {
        let client = self.client().await?;
        client
            .publish(topic.to_string(), payload.to_vec().into())
            .await
            .map_err(|e| BusError::publish(e.to_string()))
    }

    fn name(&self) -> &'static str {
        "nats"
    }
}
