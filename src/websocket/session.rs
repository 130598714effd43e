//! Client Sessions
//!
//! One connected viewer. A session owns its connection's write half, its
//! subscription filter and its permission snapshot, all behind a single
//! async mutex so a filter update and a delivery never interleave.
//!
//! Liveness moves `Alive -> Closing -> Closed` and never back. Once a
//! session leaves `Alive`, [`ClientSession::send`] is a no-op.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use futures_util::{stream::SplitSink, FutureExt, SinkExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::filter::{accepts, FilterError, SubscriptionFilter};
use super::messages::ServerFrame;
use crate::event::Event;
use crate::permission::{PermissionOracle, PermissionSnapshot};

/// Unique identifier for a session
pub type SessionId = String;

/// Errors raised while writing to a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Write failed: {0}")]
    Write(String),

    #[error("Failed to serialize frame: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Send panicked: {0}")]
    Panicked(String),
}

/// Write half of a viewer connection
#[async_trait]
pub trait Connection: Send {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError>;

    async fn close(&mut self) -> Result<(), SessionError>;
}

#[async_trait]
impl Connection for SplitSink<WebSocket, Message> {
    async fn send_text(&mut self, text: String) -> Result<(), SessionError> {
        self.send(Message::Text(text))
            .await
            .map_err(|e| SessionError::Write(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        SinkExt::close(self)
            .await
            .map_err(|e| SessionError::Write(e.to_string()))
    }
}

/// Liveness of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Liveness {
    Alive = 0,
    Closing = 1,
    Closed = 2,
}

impl Liveness {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Liveness::Alive,
            1 => Liveness::Closing,
            _ => Liveness::Closed,
        }
    }
}

/// Result of a send attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    Skipped,
}

struct SessionState {
    connection: Option<Box<dyn Connection>>,
    filter: SubscriptionFilter,
    permissions: PermissionSnapshot,
}

/// A connected viewer
pub struct ClientSession {
    id: SessionId,
    username: String,
    liveness: AtomicU8,
    state: Mutex<SessionState>,
}

impl ClientSession {
    /// Create an `Alive` session with an unconstrained filter
    pub fn new(permissions: PermissionSnapshot, connection: Box<dyn Connection>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), permissions, connection)
    }

    pub fn with_id(
        id: impl Into<SessionId>,
        permissions: PermissionSnapshot,
        connection: Box<dyn Connection>,
    ) -> Self {
        Self {
            id: id.into(),
            username: permissions.identity().username.clone(),
            liveness: AtomicU8::new(Liveness::Alive as u8),
            state: Mutex::new(SessionState {
                connection: Some(connection),
                filter: SubscriptionFilter::default(),
                permissions,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn liveness(&self) -> Liveness {
        Liveness::from_u8(self.liveness.load(Ordering::Acquire))
    }

    pub fn is_alive(&self) -> bool {
        self.liveness() == Liveness::Alive
    }

    /// Leave `Alive`. Returns false if the session was already closing.
    pub fn mark_closing(&self) -> bool {
        self.liveness
            .compare_exchange(
                Liveness::Alive as u8,
                Liveness::Closing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Current filter
    pub async fn filter(&self) -> SubscriptionFilter {
        self.state.lock().await.filter.clone()
    }

    /// Deliver an event if the viewer may see it and asked for it.
    ///
    /// Skipped deliveries are successes. A panic during the attempt is
    /// caught and reported as [`SessionError::Panicked`].
    pub async fn send(&self, event: &Event) -> Result<Delivery, SessionError> {
        match AssertUnwindSafe(self.try_send(event)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(SessionError::Panicked(panic_message(panic.as_ref()))),
        }
    }

    async fn try_send(&self, event: &Event) -> Result<Delivery, SessionError> {
        let mut guard = self.state.lock().await;
        if !self.is_alive() {
            return Ok(Delivery::Skipped);
        }

        let state = &mut *guard;
        if !accepts(event, &state.filter, &state.permissions) {
            return Ok(Delivery::Skipped);
        }
        let Some(connection) = state.connection.as_mut() else {
            return Ok(Delivery::Skipped);
        };

        let text = serde_json::to_string(&ServerFrame::event(event))?;
        connection.send_text(text).await?;
        Ok(Delivery::Sent)
    }

    /// Replace the filter after checking the viewer can read its scope.
    ///
    /// On failure the previous filter stays in place.
    pub async fn update_filter(
        &self,
        filter: SubscriptionFilter,
        oracle: &dyn PermissionOracle,
    ) -> Result<(), FilterError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(scope) = filter.required_scope()? {
            if !state.permissions.has_bypass() {
                let level = oracle
                    .max_permission_level(state.permissions.identity(), &scope)
                    .await?;
                if !level.can_read() {
                    return Err(FilterError::Forbidden(scope.to_string()));
                }
                state.permissions.record(scope, level);
            }
        }

        tracing::debug!(
            session_id = %self.id,
            username = %self.username,
            filter = ?filter,
            "Filter updated"
        );
        state.filter = filter;
        Ok(())
    }

    /// Tell the viewer a request was rejected
    pub async fn reject(&self, error: &str) -> Result<(), SessionError> {
        let mut guard = self.state.lock().await;
        if !self.is_alive() {
            return Ok(());
        }
        let Some(connection) = guard.connection.as_mut() else {
            return Ok(());
        };

        let text = serde_json::to_string(&ServerFrame::rejection(error))?;
        connection.send_text(text).await
    }

    /// Drop the connection and reach the terminal state
    pub async fn close(&self) {
        self.mark_closing();
        let connection = self.state.lock().await.connection.take();
        if let Some(mut connection) = connection {
            if let Err(e) = connection.close().await {
                tracing::debug!(session_id = %self.id, error = %e, "Error closing connection");
            }
        }
        self.liveness.store(Liveness::Closed as u8, Ordering::Release);
    }
}

impl std::fmt::Debug for ClientSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSession")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("liveness", &self.liveness())
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::permission::{
        GroupGrant, Identity, PermissionLevel, Role, StaticPermissionOracle,
    };

    fn oracle() -> StaticPermissionOracle {
        StaticPermissionOracle::new(vec![
            GroupGrant {
                group: "devs".to_string(),
                project_key: "P1".to_string(),
                workflow_name: None,
                level: PermissionLevel::Read,
            },
            GroupGrant {
                group: "devs".to_string(),
                project_key: "P1".to_string(),
                workflow_name: Some("secret".to_string()),
                level: PermissionLevel::None,
            },
        ])
    }

    async fn dev_permissions() -> PermissionSnapshot {
        PermissionSnapshot::resolve(&oracle(), Identity::new("alice").group("devs"))
            .await
            .unwrap()
    }

    fn run_event(project: &str, workflow: &str) -> Event {
        Event::new("sdk.EventRunWorkflow")
            .project(project)
            .workflow(workflow)
    }

    #[tokio::test]
    async fn test_send_delivers_ok_frame() {
        let (session, mut rx) = channel_session(dev_permissions().await);
        let result = session.send(&run_event("P1", "build")).await.unwrap();
        assert_eq!(result, Delivery::Sent);

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["status"], "OK");
        assert_eq!(frame["event"]["workflow_name"], "build");
    }

    #[tokio::test]
    async fn test_send_without_permission_is_silent_noop() {
        let (session, mut rx) = channel_session(dev_permissions().await);
        let result = session.send(&run_event("P2", "build")).await.unwrap();
        assert_eq!(result, Delivery::Skipped);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_after_closing_is_noop() {
        let (session, mut rx) = channel_session(dev_permissions().await);
        assert!(session.mark_closing());
        assert!(!session.mark_closing());

        let result = session.send(&run_event("P1", "build")).await.unwrap();
        assert_eq!(result, Delivery::Skipped);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_reaches_terminal_state() {
        let (session, _rx) = channel_session(dev_permissions().await);
        session.close().await;
        assert_eq!(session.liveness(), Liveness::Closed);
        assert_eq!(
            session.send(&run_event("P1", "build")).await.unwrap(),
            Delivery::Skipped
        );
    }

    #[tokio::test]
    async fn test_write_failure_is_error() {
        let session = ClientSession::new(dev_permissions().await, Box::new(BrokenConnection));
        let result = session.send(&run_event("P1", "build")).await;
        assert!(matches!(result, Err(SessionError::Write(_))));
    }

    #[tokio::test]
    async fn test_panic_during_send_is_caught() {
        let session = ClientSession::new(dev_permissions().await, Box::new(PanickingConnection));
        let result = session.send(&run_event("P1", "build")).await;
        match result {
            Err(SessionError::Panicked(message)) => assert!(message.contains("exploded")),
            other => panic!("expected panic error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_filter_narrows_delivery() {
        let (session, mut rx) = channel_session(dev_permissions().await);
        let oracle = oracle();
        session
            .update_filter(SubscriptionFilter::project("P1").workflow("W1"), &oracle)
            .await
            .unwrap();

        assert_eq!(
            session.send(&run_event("P1", "W2")).await.unwrap(),
            Delivery::Skipped
        );
        assert_eq!(
            session.send(&run_event("P1", "W1")).await.unwrap(),
            Delivery::Sent
        );
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_forbidden_update_keeps_previous_filter() {
        let (session, mut rx) = channel_session(dev_permissions().await);
        let oracle = oracle();
        let previous = SubscriptionFilter::project("P1").workflow("build");
        session.update_filter(previous.clone(), &oracle).await.unwrap();

        let result = session
            .update_filter(SubscriptionFilter::project("P1").workflow("secret"), &oracle)
            .await;
        assert!(matches!(result, Err(FilterError::Forbidden(_))));
        assert_eq!(session.filter().await, previous);

        assert_eq!(
            session.send(&run_event("P1", "build")).await.unwrap(),
            Delivery::Sent
        );
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_update_filter_unknown_project_forbidden() {
        let (session, _rx) = channel_session(dev_permissions().await);
        let result = session
            .update_filter(SubscriptionFilter::project("P9"), &oracle())
            .await;
        assert!(matches!(result, Err(FilterError::Forbidden(_))));
        assert_eq!(session.filter().await, SubscriptionFilter::default());
    }

    #[tokio::test]
    async fn test_bypass_role_skips_oracle() {
        let permissions =
            PermissionSnapshot::from_grants(Identity::new("bob").role(Role::Maintainer), Vec::new());
        let (session, _rx) = channel_session(permissions);
        session
            .update_filter(SubscriptionFilter::project("P9"), &oracle())
            .await
            .unwrap();
        assert_eq!(session.filter().await.project_key, "P9");
    }

    #[tokio::test]
    async fn test_reject_writes_ko_frame() {
        let (session, mut rx) = channel_session(dev_permissions().await);
        session.reject("Forbidden").await.unwrap();
        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["status"], "KO");
        assert_eq!(frame["error"], "Forbidden");
    }
}
