//! Redis list task queue.
//!
//! Producers `LPUSH` JSON-encoded tasks, workers `BRPOP` them. `BRPOP` runs
//! on a dedicated connection from the pool so a blocked worker never stalls
//! the shared multiplexed connection.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::RedisResult;

use crate::metrics::QueueMetrics;
use crate::redis::{PoolError, RedisPool};

use super::{DeliveryTask, QueueError, TaskQueue};

pub struct RedisTaskQueue {
    pool: Arc<RedisPool>,
    key: String,
}

impl RedisTaskQueue {
    pub fn new(pool: Arc<RedisPool>, key: impl Into<String>) -> Self {
        Self {
            pool,
            key: key.into(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    fn map_error(err: PoolError) -> QueueError {
        match err {
            PoolError::Redis(e) => QueueError::Redis(e),
            PoolError::CircuitOpen => {
                QueueError::Unavailable("Circuit breaker is open".to_string())
            }
        }
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
    fn backend_name(&self) -> &'static str {
        "redis"
    }

    async fn push(&self, task: DeliveryTask) -> Result<(), QueueError> {
        let payload = serde_json::to_string(&task)?;
        let key = self.key.clone();

        self.pool
            .execute(|mut conn| async move {
                redis::cmd("LPUSH")
                    .arg(&key)
                    .arg(&payload)
                    .query_async::<i64>(&mut conn)
                    .await
            })
            .await
            .map_err(Self::map_error)?;

        QueueMetrics::record_pushed(task.kind());
        tracing::debug!(
            notification_id = %task.notification_id(),
            task = task.kind(),
            "Task pushed to Redis queue"
        );
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<DeliveryTask>, QueueError> {
        let key = self.key.clone();
        // BRPOP takes fractional seconds; 0 would block forever
        let seconds = timeout.as_secs_f64().max(0.01);

        let popped: Option<(String, String)> = self
            .pool
            .execute_blocking(|mut conn| async move {
                let result: RedisResult<Option<(String, String)>> = redis::cmd("BRPOP")
                    .arg(&key)
                    .arg(seconds)
                    .query_async(&mut conn)
                    .await;
                (conn, result)
            })
            .await
            .map_err(Self::map_error)?;

        match popped {
            Some((_, payload)) => match serde_json::from_str::<DeliveryTask>(&payload) {
                Ok(task) => Ok(Some(task)),
                Err(e) => {
                    // Malformed payloads are dropped
                    tracing::error!(
                        key = %self.key,
                        error = %e,
                        payload = %payload,
                        "Discarding malformed task"
                    );
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}
