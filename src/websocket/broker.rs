//! WebSocket Broker
//!
//! Single owner of the session registry. The broker runs as an actor: it
//! waits on its input queues and handles exactly one ready input per turn.
//! Nothing else touches the registry, so it needs no lock.
//!
//! Fan-out is fire-and-forget: every (event, session) pair gets its own
//! task and the actor never waits for a delivery. A delivery that fails
//! asks the actor to remove its session; other sessions are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::session::{ClientSession, SessionId};
use crate::config::BrokerConfig;
use crate::event::Event;
use crate::metrics::StatsRecorder;

/// Errors returned by [`BrokerHandle`]
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("Broker is not running")]
    Stopped,
}

/// Cloneable entry point to a running [`Broker`]
#[derive(Clone)]
pub struct BrokerHandle {
    events: mpsc::Sender<Event>,
    add: mpsc::UnboundedSender<Arc<ClientSession>>,
    remove: mpsc::UnboundedSender<SessionId>,
    clients: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl BrokerHandle {
    /// Register a session
    pub fn add_session(&self, session: Arc<ClientSession>) -> Result<(), BrokerError> {
        self.add.send(session).map_err(|_| BrokerError::Stopped)
    }

    /// Ask for a session's removal. Unknown or already removed ids are ignored.
    pub fn remove_session(&self, id: &str) -> Result<(), BrokerError> {
        self.remove
            .send(id.to_string())
            .map_err(|_| BrokerError::Stopped)
    }

    /// Queue an event for fan-out, waiting if the inbound queue is full
    pub async fn publish(&self, event: Event) -> Result<(), BrokerError> {
        self.events
            .send(event)
            .await
            .map_err(|_| BrokerError::Stopped)
    }

    /// Inbound queue sender, for producers such as the bridge
    pub fn events_sender(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    /// Registered sessions as of the broker's last change
    pub fn client_count(&self) -> usize {
        self.clients.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// The registry-owning actor
pub struct Broker {
    registry: HashMap<SessionId, Arc<ClientSession>>,
    events_rx: mpsc::Receiver<Event>,
    add_rx: mpsc::UnboundedReceiver<Arc<ClientSession>>,
    remove_rx: mpsc::UnboundedReceiver<SessionId>,
    remove_tx: mpsc::UnboundedSender<SessionId>,
    stats: Arc<dyn StatsRecorder>,
    metrics_interval: Duration,
    clients: Arc<AtomicUsize>,
    running: Arc<AtomicBool>,
}

impl Broker {
    /// Create a broker and the handle used to reach it
    pub fn new(config: &BrokerConfig, stats: Arc<dyn StatsRecorder>) -> (Self, BrokerHandle) {
        let (events_tx, events_rx) = mpsc::channel(config.inbound_capacity.max(1));
        let (add_tx, add_rx) = mpsc::unbounded_channel();
        let (remove_tx, remove_rx) = mpsc::unbounded_channel();
        let clients = Arc::new(AtomicUsize::new(0));
        let running = Arc::new(AtomicBool::new(true));

        let handle = BrokerHandle {
            events: events_tx,
            add: add_tx,
            remove: remove_tx.clone(),
            clients: Arc::clone(&clients),
            running: Arc::clone(&running),
        };

        let broker = Self {
            registry: HashMap::new(),
            events_rx,
            add_rx,
            remove_rx,
            remove_tx,
            stats,
            metrics_interval: config.metrics_interval(),
            clients,
            running,
        };

        (broker, handle)
    }

    /// Run until `cancel` fires, then clear the registry and return
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.metrics_interval,
            self.metrics_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("WebSocket broker started");

        loop {
            // Adds are checked before removals so an add and a removal
            // queued by the same connection are applied in order.
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.shutdown();
                    return;
                }
                Some(session) = self.add_rx.recv() => self.add_session(session),
                Some(id) = self.remove_rx.recv() => self.remove_session(&id),
                Some(event) = self.events_rx.recv() => self.dispatch(event),
                _ = ticker.tick() => self.stats.ws_clients(self.registry.len()),
            }
        }
    }

    fn add_session(&mut self, session: Arc<ClientSession>) {
        if !session.is_alive() {
            tracing::debug!(session_id = %session.id(), "Ignoring closed session");
            return;
        }

        if self.registry.contains_key(session.id()) {
            tracing::warn!(session_id = %session.id(), "Session already registered");
            return;
        }

        tracing::info!(
            session_id = %session.id(),
            username = %session.username(),
            "WebSocket session added"
        );
        self.registry.insert(session.id().to_string(), session);
        self.publish_count();
    }

    fn remove_session(&mut self, id: &str) {
        let Some(session) = self.registry.remove(id) else {
            return;
        };
        session.mark_closing();
        tracing::info!(
            session_id = %id,
            username = %session.username(),
            "WebSocket session removed"
        );
        self.publish_count();
    }

    fn dispatch(&self, event: Event) {
        let event = Arc::new(event);
        tracing::trace!(
            event_kind = %event.kind,
            sessions = self.registry.len(),
            "Dispatching event"
        );

        for session in self.registry.values() {
            let session = Arc::clone(session);
            let event = Arc::clone(&event);
            let remove = self.remove_tx.clone();
            let stats = Arc::clone(&self.stats);

            tokio::spawn(async move {
                if let Err(e) = session.send(&event).await {
                    tracing::error!(
                        session_id = %session.id(),
                        username = %session.username(),
                        event_kind = %event.kind,
                        error = %e,
                        "Unable to send event, removing session"
                    );
                    stats.delivery_failure();
                    let _ = remove.send(session.id().to_string());
                }
            });
        }
    }

    fn shutdown(&mut self) {
        for (_, session) in self.registry.drain() {
            session.mark_closing();
        }
        self.publish_count();
        self.running.store(false, Ordering::Release);
        self.stats.ws_clients(0);
        tracing::info!("WebSocket broker stopped");
    }

    fn publish_count(&self) {
        self.clients.store(self.registry.len(), Ordering::Release);
    }
}
