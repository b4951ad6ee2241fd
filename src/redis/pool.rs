//! Redis connection pool for the task queue.

use std::sync::Arc;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError, RedisResult};
use tokio::sync::{Mutex, RwLock};

use crate::config::RedisConfig;

use super::{CircuitBreaker, CircuitState};

/// Error type for Redis pool operations.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Redis error: {0}")]
    Redis(#[from] RedisError),

    #[error("Circuit breaker is open")]
    CircuitOpen,
}

/// Shared multiplexed connection for ordinary commands plus a small stash
/// of dedicated connections for blocking commands (`BRPOP`), which would
/// otherwise stall every caller sharing the multiplexed connection.
pub struct RedisPool {
    client: Client,
    connection: RwLock<Option<MultiplexedConnection>>,
    blocking: Mutex<Vec<MultiplexedConnection>>,
    circuit_breaker: Arc<CircuitBreaker>,
    url: String,
}

impl RedisPool {
    pub fn new(config: &RedisConfig, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self, PoolError> {
        let client = Client::open(config.url.as_str())?;

        Ok(Self {
            client,
            connection: RwLock::new(None),
            blocking: Mutex::new(Vec::new()),
            circuit_breaker,
            url: config.url.clone(),
        })
    }

    /// Shared connection, established on first use.
    pub async fn get_connection(&self) -> Result<MultiplexedConnection, PoolError> {
        if !self.circuit_breaker.allow_request() {
            return Err(PoolError::CircuitOpen);
        }

        {
            let conn = self.connection.read().await;
            if let Some(ref c) = *conn {
                return Ok(c.clone());
            }
        }

        let mut conn_guard = self.connection.write().await;

        // Another task may have connected while we waited
        if let Some(ref c) = *conn_guard {
            return Ok(c.clone());
        }

        match self.client.get_multiplexed_tokio_connection().await {
            Ok(conn) => {
                *conn_guard = Some(conn.clone());
                self.circuit_breaker.record_success();
                tracing::info!("Redis pool connection established");
                Ok(conn)
            }
            Err(e) => {
                self.circuit_breaker.record_failure();
                tracing::error!(error = %e, "Failed to connect to Redis");
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a command on the shared connection with circuit breaker bookkeeping.
    pub async fn execute<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = RedisResult<T>>,
    {
        let conn = self.get_connection().await?;

        match f(conn).await {
            Ok(result) => {
                self.circuit_breaker.record_success();
                Ok(result)
            }
            Err(e) => {
                if e.is_connection_dropped() || e.is_io_error() {
                    // Reconnect on next call
                    *self.connection.write().await = None;
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    /// Run a blocking command on a dedicated connection.
    pub async fn execute_blocking<F, T, Fut>(&self, f: F) -> Result<T, PoolError>
    where
        F: FnOnce(MultiplexedConnection) -> Fut,
        Fut: std::future::Future<Output = (MultiplexedConnection, RedisResult<T>)>,
    {
        if !self.circuit_breaker.allow_request() {
            return Err(PoolError::CircuitOpen);
        }

        let stashed = self.blocking.lock().await.pop();
        let conn = match stashed {
            Some(conn) => conn,
            None => match self.client.get_multiplexed_tokio_connection().await {
                Ok(conn) => conn,
                Err(e) => {
                    self.circuit_breaker.record_failure();
                    return Err(PoolError::Redis(e));
                }
            },
        };

        let (conn, result) = f(conn).await;
        match result {
            Ok(value) => {
                self.circuit_breaker.record_success();
                self.blocking.lock().await.push(conn);
                Ok(value)
            }
            Err(e) => {
                // Broken connections are dropped rather than stashed
                if !(e.is_connection_dropped() || e.is_io_error()) {
                    self.blocking.lock().await.push(conn);
                }
                self.circuit_breaker.record_failure();
                Err(PoolError::Redis(e))
            }
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ping Redis to check connectivity.
    pub async fn ping(&self) -> Result<(), PoolError> {
        self.execute(|mut conn| async move {
            redis::cmd("PING").query_async::<String>(&mut conn).await
        })
        .await
        .map(|_| ())
    }
}
