//! WebSocket Handler
//!
//! Authenticates the upgrade request, builds a session, registers it with
//! the broker and reads filter updates until the viewer goes away.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{Stream, StreamExt};
use std::sync::Arc;
use tokio::sync::OwnedSemaphorePermit;
use tokio_util::sync::CancellationToken;

use super::broker::BrokerHandle;
use super::filter::{FilterError, SubscriptionFilter};
use super::session::ClientSession;
use crate::api::{ApiError, AppState};
use crate::permission::{PermissionOracle, PermissionSnapshot};

/// WebSocket upgrade handler
///
/// Identity and permissions are resolved before the upgrade so that
/// unauthenticated viewers get a plain HTTP error.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let identity = state.identity.resolve(&headers).await?;
    let slot = reserve_slot(&state)?;

    let permissions = PermissionSnapshot::resolve(state.oracle.as_ref(), identity).await?;
    let broker = state.broker.clone();
    let oracle = Arc::clone(&state.oracle);
    let shutdown = state.shutdown.clone();

    Ok(ws.on_upgrade(move |socket| async move {
        handle_socket(socket, permissions, broker, oracle, shutdown).await;
        drop(slot);
    }))
}

/// Take a connection slot. The slot is released when the permit drops,
/// including when the upgrade never completes.
fn reserve_slot(state: &AppState) -> Result<OwnedSemaphorePermit, ApiError> {
    Arc::clone(&state.connections)
        .try_acquire_owned()
        .map_err(|_| {
            ApiError::ServiceUnavailable(format!(
                "Too many connections (limit: {})",
                state.max_connections
            ))
        })
}

/// Handle an established WebSocket connection
async fn handle_socket(
    socket: WebSocket,
    permissions: PermissionSnapshot,
    broker: BrokerHandle,
    oracle: Arc<dyn PermissionOracle>,
    shutdown: CancellationToken,
) {
    let (sink, stream) = socket.split();
    let session = Arc::new(ClientSession::new(permissions, Box::new(sink)));

    if let Err(e) = broker.add_session(Arc::clone(&session)) {
        tracing::warn!(session_id = %session.id(), error = %e, "Unable to register session");
        session.close().await;
        return;
    }

    read_loop(&session, stream, oracle.as_ref(), &shutdown).await;

    let _ = broker.remove_session(session.id());
    session.close().await;
    tracing::debug!(
        session_id = %session.id(),
        username = %session.username(),
        "WebSocket connection released"
    );
}

/// Read inbound frames until disconnect, read error or shutdown
async fn read_loop<S>(
    session: &ClientSession,
    mut stream: S,
    oracle: &dyn PermissionOracle,
    shutdown: &CancellationToken,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => break,
            next = stream.next() => next,
        };

        let message = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session.id(), error = %e, "WebSocket receive error");
                break;
            }
            None => break,
        };

        let outcome = match message {
            Message::Text(text) => apply_filter_update(session, &text, oracle).await,
            Message::Binary(_) => Err(FilterError::Invalid(
                "Binary messages not supported".to_string(),
            )),
            Message::Ping(_) | Message::Pong(_) => Ok(()),
            Message::Close(_) => {
                tracing::debug!(session_id = %session.id(), "Client requested close");
                break;
            }
        };

        if let Err(e) = outcome {
            tracing::warn!(
                session_id = %session.id(),
                username = %session.username(),
                error = %e,
                "Filter update rejected"
            );
            if let Err(e) = session.reject(&e.to_string()).await {
                tracing::debug!(session_id = %session.id(), error = %e, "Unable to send rejection");
                break;
            }
        }
    }
}

async fn apply_filter_update(
    session: &ClientSession,
    text: &str,
    oracle: &dyn PermissionOracle,
) -> Result<(), FilterError> {
    let filter: SubscriptionFilter = serde_json::from_str(text)?;
    session.update_filter(filter, oracle).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permission::{GroupGrant, Identity, PermissionLevel, StaticPermissionOracle};
    use crate::websocket::session::testing::channel_session;
    use futures_util::stream;

    fn oracle() -> StaticPermissionOracle {
        StaticPermissionOracle::new(vec![GroupGrant {
            group: "devs".to_string(),
            project_key: "P1".to_string(),
            workflow_name: None,
            level: PermissionLevel::Read,
        }])
    }

    async fn permissions() -> PermissionSnapshot {
        PermissionSnapshot::resolve(&oracle(), Identity::new("alice").group("devs"))
            .await
            .unwrap()
    }

    fn state(max_connections: usize) -> AppState {
        let stats = Arc::new(crate::metrics::testing::RecordingStats::default());
        let (_broker, handle) =
            crate::websocket::Broker::new(&crate::config::BrokerConfig::default(), stats);
        AppState::new(
            handle,
            Arc::new(oracle()),
            Arc::new(crate::auth::StaticTokenResolver::new(vec![])),
            Arc::new(crate::bridge::MemoryPubSub::default()),
            "events_pubsub",
        )
        .with_max_connections(max_connections)
    }

    fn text(s: &str) -> Result<Message, axum::Error> {
        Ok(Message::Text(s.to_string()))
    }

    #[test]
    fn test_slots_are_reserved_up_to_limit() {
        let state = state(2);
        let first = reserve_slot(&state).unwrap();
        let _second = reserve_slot(&state).unwrap();

        match reserve_slot(&state) {
            Err(ApiError::ServiceUnavailable(msg)) => assert!(msg.contains("limit: 2")),
            other => panic!("expected ServiceUnavailable, got {:?}", other.map(|_| ())),
        }

        drop(first);
        assert!(reserve_slot(&state).is_ok());
    }

    #[tokio::test]
    async fn test_filter_update_applied() {
        let (session, mut rx) = channel_session(permissions().await);
        let frames = stream::iter(vec![text(r#"{"project_key": "P1", "workflow_name": "W"}"#)]);

        read_loop(&session, frames, &oracle(), &CancellationToken::new()).await;

        let filter = session.filter().await;
        assert_eq!(filter.project_key, "P1");
        assert_eq!(filter.workflow_name, "W");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_forbidden_update_rejected_and_loop_continues() {
        let (session, mut rx) = channel_session(permissions().await);
        let frames = stream::iter(vec![
            text(r#"{"project_key": "P2"}"#),
            text(r#"{"project_key": "P1"}"#),
        ]);

        read_loop(&session, frames, &oracle(), &CancellationToken::new()).await;

        let frame: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(frame["status"], "KO");
        assert!(frame["error"].as_str().unwrap().contains("Forbidden"));
        assert_eq!(session.filter().await.project_key, "P1");
    }

    #[tokio::test]
    async fn test_malformed_frame_rejected() {
        let (session, mut rx) = channel_session(permissions().await);
        let frames = stream::iter(vec![text("{not json"), Ok(Message::Binary(vec![1, 2]))]);

        read_loop(&session, frames, &oracle(), &CancellationToken::new()).await;

        for _ in 0..2 {
            let frame: serde_json::Value =
                serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
            assert_eq!(frame["status"], "KO");
        }
        assert_eq!(session.filter().await, SubscriptionFilter::default());
    }

    #[tokio::test]
    async fn test_close_frame_ends_loop() {
        let (session, _rx) = channel_session(permissions().await);
        let frames = stream::iter(vec![
            Ok(Message::Close(None)),
            text(r#"{"project_key": "P1"}"#),
        ]);

        read_loop(&session, frames, &oracle(), &CancellationToken::new()).await;
        assert_eq!(session.filter().await, SubscriptionFilter::default());
    }

    #[tokio::test]
    async fn test_shutdown_ends_loop() {
        let (session, _rx) = channel_session(permissions().await);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        read_loop(&session, stream::pending(), &oracle(), &shutdown).await;
    }
}
