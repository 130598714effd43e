//! # Pipewatch
//!
//! Real-time event notification for a CI/CD control plane. Pipeline,
//! workflow, application and environment events arrive on a pub/sub
//! channel and are pushed to WebSocket viewers, each of whom sees only
//! what their permissions and subscription filter allow.
//!
//! ## Modules
//!
//! - [`websocket`]: Broker actor, client sessions, filter and upgrade handler
//! - [`bridge`]: Pub/sub transport and the bridge feeding the broker
//! - [`permission`]: Identities, permission levels and the oracle seam
//! - [`auth`]: Identity resolution for incoming requests
//! - [`api`]: HTTP surface with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pipewatch::*;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::load_default()?;
//!     let stats = Arc::new(PrometheusStats);
//!     let cancel = CancellationToken::new();
//!
//!     let (broker, handle) = Broker::new(&config.broker, stats.clone());
//!     tokio::spawn(broker.run(cancel.clone()));
//!
//!     let pubsub = Arc::new(MemoryPubSub::default());
//!     let subscription = pubsub.subscribe(&config.bridge.channel).await?;
//!     let bridge = EventBridge::new(subscription, handle.events_sender(), &config.bridge, stats);
//!     tokio::spawn(bridge.run(cancel.clone()));
//!
//!     let state = AppState::new(
//!         handle,
//!         Arc::new(StaticPermissionOracle::new(config.permissions.clone())),
//!         Arc::new(StaticTokenResolver::new(config.auth.tokens.clone())),
//!         pubsub,
//!         config.bridge.channel.clone(),
//!     )
//!     .with_shutdown(cancel);
//!
//!     serve(state, &config.server).await?;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod event;
pub mod metrics;
pub mod permission;
pub mod websocket;

pub use api::{build_router, serve, serve_on, ApiError, AppState};

pub use auth::{AuthError, IdentityResolver, StaticTokenResolver, TokenIdentity};

pub use bridge::{BridgeError, EventBridge, MemoryPubSub, Poll, PubSub, Subscription};

pub use config::{
    AuthConfig, BridgeConfig, BrokerConfig, Config, ConfigError, LoggingConfig, ServerConfig,
};

pub use event::Event;

pub use metrics::{install_recorder, PrometheusStats, StatsRecorder};

pub use permission::{
    Favorite, Grant, GroupGrant, Identity, PermissionError, PermissionLevel, PermissionOracle,
    PermissionSnapshot, Role, Scope, StaticPermissionOracle,
};

pub use websocket::{
    websocket_handler, Broker, BrokerError, BrokerHandle, ClientSession, FilterError,
    SubscriptionFilter,
};
