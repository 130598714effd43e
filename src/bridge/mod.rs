//! Event Bridge
//!
//! Moves events from the cross-process pub/sub channel into the broker's
//! inbound queue. The bridge polls at a fixed cadence and pulls at most one
//! message per tick. Undecodable messages and suppressed kinds are dropped
//! without complaint: the transport is best-effort.

mod pubsub;

pub use pubsub::{MemoryPubSub, PubSub, Subscription};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::event::Event;
use crate::metrics::StatsRecorder;

/// Errors raised by the pub/sub transport or the bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Subscriber lagged, {0} messages skipped")]
    Lagged(u64),

    #[error("Channel {0} closed")]
    Closed(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Broker inbound queue closed")]
    BrokerGone,
}

/// What a single poll did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    /// Nothing was pending
    Idle,
    /// The message was not a valid event
    Undecodable,
    /// The event kind is suppressed
    Suppressed,
    /// The event was queued for fan-out
    Forwarded,
}

/// Pulls events from a subscription and feeds the broker
pub struct EventBridge {
    subscription: Box<dyn Subscription>,
    events: mpsc::Sender<Event>,
    suppressed: HashSet<String>,
    poll_interval: Duration,
    stats: Arc<dyn StatsRecorder>,
}

impl EventBridge {
    pub fn new(
        subscription: Box<dyn Subscription>,
        events: mpsc::Sender<Event>,
        config: &BridgeConfig,
        stats: Arc<dyn StatsRecorder>,
    ) -> Self {
        Self {
            subscription,
            events,
            suppressed: config.suppressed_kinds.iter().cloned().collect(),
            poll_interval: config.poll_interval(),
            stats,
        }
    }

    /// Poll until cancelled, the subscription closes or the broker goes away
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.poll_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(poll_interval = ?self.poll_interval, "Event bridge started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.poll_once() => result,
            };

            match result {
                Ok(_) => {}
                Err(e @ BridgeError::Lagged(_)) | Err(e @ BridgeError::Transport(_)) => {
                    tracing::warn!(error = %e, "Cannot get message from subscription");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Event bridge exiting");
                    return;
                }
            }
        }

        tracing::info!("Event bridge exiting: cancelled");
    }

    /// Pull at most one message and forward it if it is wanted
    pub async fn poll_once(&mut self) -> Result<Poll, BridgeError> {
        let Some(message) = self.subscription.try_next().await? else {
            return Ok(Poll::Idle);
        };

        let event: Event = match serde_json::from_str(&message) {
            Ok(event) => event,
            Err(e) => {
                tracing::trace!(error = %e, "Dropping undecodable message");
                return Ok(Poll::Undecodable);
            }
        };

        if self.suppressed.contains(&event.kind) {
            return Ok(Poll::Suppressed);
        }

        self.events
            .send(event)
            .await
            .map_err(|_| BridgeError::BrokerGone)?;
        self.stats.ws_event();
        Ok(Poll::Forwarded)
    }
}
