//! Application State
//!
//! Shared state accessible by all API handlers.
//! Wrapped in Arc for thread-safe sharing across async tasks.

use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::auth::IdentityResolver;
use crate::bridge::PubSub;
use crate::permission::PermissionOracle;
use crate::websocket::BrokerHandle;

const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Shared application state for all handlers
pub struct AppState {
    /// Handle to the running broker
    pub broker: BrokerHandle,
    /// Permission oracle consulted at connect time and on filter updates
    pub oracle: Arc<dyn PermissionOracle>,
    /// Maps upgrade requests to identities
    pub identity: Arc<dyn IdentityResolver>,
    /// Transport the publish endpoint writes to
    pub pubsub: Arc<dyn PubSub>,
    /// Pub/sub channel name
    pub channel: String,
    /// Upgrades are refused at this many live sessions
    pub max_connections: usize,
    /// One permit per live connection, held from before the upgrade until release
    pub connections: Arc<Semaphore>,
    /// Cancelled on process shutdown; ends every session's read loop
    pub shutdown: CancellationToken,
    /// Server start time for uptime tracking
    pub start_time: Instant,
    /// Prometheus renderer, absent when no recorder was installed
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(
        broker: BrokerHandle,
        oracle: Arc<dyn PermissionOracle>,
        identity: Arc<dyn IdentityResolver>,
        pubsub: Arc<dyn PubSub>,
        channel: impl Into<String>,
    ) -> Self {
        Self {
            broker,
            oracle,
            identity,
            pubsub,
            channel: channel.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            connections: Arc::new(Semaphore::new(DEFAULT_MAX_CONNECTIONS)),
            shutdown: CancellationToken::new(),
            start_time: Instant::now(),
            prometheus: None,
        }
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self.connections = Arc::new(Semaphore::new(max_connections));
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }

    /// Get server uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
