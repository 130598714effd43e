//! Pub/Sub Transport
//!
//! The cross-process transport is an external collaborator. The bridge
//! only needs to subscribe to a channel and pull pending messages, which
//! is what [`PubSub`] and [`Subscription`] describe. [`MemoryPubSub`]
//! keeps everything in-process for single-instance deployments and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

use super::BridgeError;

/// A subscription to one channel
#[async_trait]
pub trait Subscription: Send {
    /// Pull one pending message, or `None` if nothing is waiting
    async fn try_next(&mut self) -> Result<Option<String>, BridgeError>;
}

/// A named-channel publish/subscribe transport
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BridgeError>;

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BridgeError>;
}

/// In-process transport built on broadcast channels
pub struct MemoryPubSub {
    channels: RwLock<HashMap<String, broadcast::Sender<String>>>,
    capacity: usize,
}

impl MemoryPubSub {
    /// `capacity` messages are retained per channel for slow subscribers
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    async fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        if let Some(tx) = self.channels.read().await.get(channel) {
            return tx.clone();
        }
        self.channels
            .write()
            .await
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for MemoryPubSub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl PubSub for MemoryPubSub {
    async fn subscribe(&self, channel: &str) -> Result<Box<dyn Subscription>, BridgeError> {
        let rx = self.sender(channel).await.subscribe();
        Ok(Box::new(MemorySubscription {
            channel: channel.to_string(),
            rx,
        }))
    }

    async fn publish(&self, channel: &str, payload: String) -> Result<(), BridgeError> {
        // No subscriber is not an error: the message is simply lost.
        let _ = self.sender(channel).await.send(payload);
        Ok(())
    }
}

struct MemorySubscription {
    channel: String,
    rx: broadcast::Receiver<String>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn try_next(&mut self) -> Result<Option<String>, BridgeError> {
        match self.rx.try_recv() {
            Ok(message) => Ok(Some(message)),
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                Err(BridgeError::Lagged(skipped))
            }
            Err(broadcast::error::TryRecvError::Closed) => {
                Err(BridgeError::Closed(self.channel.clone()))
            }
        }
    }
}
