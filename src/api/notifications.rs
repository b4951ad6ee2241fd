//! Notification inspection and lifecycle endpoints.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::delivery_log::{DeliveryLogEntry, DeliveryLogStore};
use crate::error::Result;
use crate::notification::{Notification, NotificationStatus};
use crate::server::AppState;

/// Delivery report pushed by a provider
#[derive(Debug, Deserialize)]
pub struct StatusCallbackRequest {
    /// `DELIVERED` or `BOUNCED`
    pub status: NotificationStatus,
}

/// GET /api/v1/notifications/{id}
pub async fn get_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Notification>> {
    Ok(Json(state.orchestrator.get(id).await?))
}

/// GET /api/v1/notifications/{id}/attempts - delivery log, oldest first
pub async fn list_attempts(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<DeliveryLogEntry>>> {
    // 404 for unknown ids rather than an empty list
    state.orchestrator.get(id).await?;
    let entries = state
        .dispatcher
        .delivery_log()
        .list_for_notification(id)
        .await?;
    Ok(Json(entries))
}

/// POST /api/v1/notifications/{id}/retry
#[tracing::instrument(name = "http.retry_notification", skip(state))]
pub async fn retry_notification(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Notification>)> {
    let notification = state.dispatcher.retry_notification(id).await?;
    Ok((StatusCode::ACCEPTED, Json(notification)))
}

/// POST /api/v1/notifications/{id}/status
#[tracing::instrument(name = "http.status_callback", skip(state, request), fields(status = %request.status))]
pub async fn status_callback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<StatusCallbackRequest>,
) -> Result<Json<Notification>> {
    let notification = state
        .dispatcher
        .record_status_callback(id, request.status)
        .await?;
    Ok(Json(notification))
}
