//! Metrics Route
//!
//! - GET /metrics - Prometheus text exposition

use axum::{extract::State, http::header, response::IntoResponse};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;

/// GET /metrics
pub async fn render(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    let handle = state
        .prometheus
        .as_ref()
        .ok_or_else(|| ApiError::ServiceUnavailable("Metrics recorder not installed".into()))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
