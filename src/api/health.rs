//! Health check endpoint.

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::notification::DispatcherStatsSnapshot;
use crate::server::AppState;
use crate::template::ResolverStatsSnapshot;
use crate::worker::WorkerStatsSnapshot;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub queue: QueueHealthResponse,
    pub store: StoreHealthResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redis: Option<RedisHealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub postgres: Option<PostgresHealthResponse>,
    pub dispatcher: DispatcherStatsSnapshot,
    pub workers: WorkerStatsSnapshot,
    pub templates: ResolverStatsSnapshot,
}

#[derive(Debug, Serialize)]
pub struct QueueHealthResponse {
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct StoreHealthResponse {
    pub backend: String,
}

#[derive(Debug, Serialize)]
pub struct RedisHealthResponse {
    pub connected: bool,
    pub circuit_breaker_state: String,
}

#[derive(Debug, Serialize)]
pub struct PostgresHealthResponse {
    pub connected: bool,
    pub circuit_breaker_state: String,
    pub pool_size: u32,
    pub idle_connections: u32,
}

/// GET /health - 200 when every configured backend answers, 503 otherwise
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let redis = match &state.redis_pool {
        Some(pool) => Some(RedisHealthResponse {
            connected: pool.ping().await.is_ok(),
            circuit_breaker_state: pool.circuit_state().as_str().to_string(),
        }),
        None => None,
    };

    let postgres = match &state.postgres_pool {
        Some(pool) => Some(PostgresHealthResponse {
            connected: pool.ping().await.is_ok(),
            circuit_breaker_state: pool.circuit_breaker().state().as_str().to_string(),
            pool_size: pool.pool().size(),
            idle_connections: pool.pool().num_idle() as u32,
        }),
        None => None,
    };

    let healthy = redis.as_ref().map_or(true, |r| r.connected)
        && postgres.as_ref().map_or(true, |p| p.connected);
    let (code, status) = if healthy {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    let body = HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        queue: QueueHealthResponse {
            backend: state.queue.backend_name().to_string(),
        },
        store: StoreHealthResponse {
            backend: state.settings.store.backend.clone(),
        },
        redis,
        postgres,
        dispatcher: state.dispatcher.stats(),
        workers: state.workers.stats().snapshot(),
        templates: state.orchestrator.resolver().stats(),
    };

    (code, Json(body))
}
