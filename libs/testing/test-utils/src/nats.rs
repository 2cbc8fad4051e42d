//! NATS test infrastructure
//!
//! Provides a `TestNats` helper that starts a NATS container and hands out
//! raw clients (for subscribing) and [`NatsBus`] instances (for publishing).

use async_nats::Client;
use messaging::nats::{NatsBus, NatsConfig};
use testcontainers::ContainerAsync;
use testcontainers::runners::AsyncRunner;
use testcontainers_modules::nats::Nats;

// Re-export for test convenience (used by consumers of this crate)
#[allow(unused_imports)]
pub use futures::StreamExt;

/// Test NATS wrapper that ensures proper cleanup
///
/// # Example
///
/// ```no_run
/// use test_utils::{StreamExt, TestNats};
///
/// # async fn example() {
/// let nats = TestNats::new().await;
/// let mut sub = nats.client().subscribe("auth.user.>").await.unwrap();
/// let bus = nats.bus();
/// # }
/// ```
pub struct TestNats {
    #[allow(dead_code)]
    container: ContainerAsync<Nats>,
    client: Client,
    pub connection_string: String,
}

impl TestNats {
    pub async fn new() -> Self {
        let container = Nats::default()
            .start()
            .await
            .expect("Failed to start NATS container");

        let host_port = container
            .get_host_port_ipv4(4222)
            .await
            .expect("Failed to get NATS port");

        let connection_string = format!("nats://127.0.0.1:{}", host_port);

        let client = async_nats::connect(&connection_string)
            .await
            .expect("Failed to connect to NATS");

        tracing::info!(port = host_port, "Test NATS ready");

        Self {
            container,
            client,
            connection_string,
        }
    }

    /// Get a cloned client (useful for subscribing)
    pub fn client(&self) -> Client {
        self.client.clone()
    }

    /// An event bus sharing this helper's connection.
    pub fn bus(&self) -> NatsBus {
        let config = NatsConfig {
            url: self.connection_string.clone(),
            ..Default::default()
        };
        NatsBus::from_client(config, self.client())
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }
}

// Container is automatically cleaned up when TestNats is dropped
impl Drop for TestNats {
    fn drop(&mut self) {
        tracing::debug!("Cleaning up test NATS container");
    }
}
