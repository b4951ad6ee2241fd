use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{api_key_auth, AppState};

use super::health::health;
use super::metrics::prometheus_metrics;
use super::notifications::{get_notification, list_attempts, retry_notification, status_callback};

pub fn api_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                .route("/notifications/{id}", get(get_notification))
                .route("/notifications/{id}/attempts", get(list_attempts))
                .route("/notifications/{id}/retry", post(retry_notification))
                .route("/notifications/{id}/status", post(status_callback))
                .route_layer(middleware::from_fn_with_state(state, api_key_auth)),
        )
}
