//! Event Routes
//!
//! - POST /api/v1/events - Publish an event on the pub/sub channel
//!
//! The event takes the same path as one emitted by the control plane: it
//! goes through the bridge, so suppression and permission filtering apply.

use axum::{body::Bytes, extract::State, http::HeaderMap, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::dto::PublishResponse;
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::event::Event;

/// POST /api/v1/events
pub async fn publish_event(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<PublishResponse>)> {
    let identity = state.identity.resolve(&headers).await?;

    // Decoded only once the caller is known
    let event: Event = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Invalid event: {}", e)))?;

    if event.kind.trim().is_empty() {
        return Err(ApiError::Validation("type_event cannot be empty".to_string()));
    }

    let payload = serde_json::to_string(&event)
        .map_err(|e| ApiError::Internal(format!("Failed to encode event: {}", e)))?;
    state.pubsub.publish(&state.channel, payload).await?;

    tracing::debug!(
        username = %identity.username,
        kind = %event.kind,
        project_key = %event.project_key,
        "Event published"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(PublishResponse {
            status: "accepted".to_string(),
            channel: state.channel.clone(),
        }),
    ))
}
