//! Task queue backend factory

use std::sync::Arc;

use crate::config::Settings;
use crate::redis::RedisPool;

use super::memory::MemoryTaskQueue;
use super::redis::RedisTaskQueue;
use super::TaskQueue;

/// Create the task queue selected by `queue.backend`.
///
/// - `"redis"`: `RedisTaskQueue` on `redis.queue_key` if a Redis pool is provided
/// - `"memory"` (default): `MemoryTaskQueue`
pub fn create_task_queue(
    settings: &Settings,
    redis_pool: Option<Arc<RedisPool>>,
) -> Arc<dyn TaskQueue> {
    match settings.queue.backend.as_str() {
        "redis" => {
            if let Some(pool) = redis_pool {
                tracing::info!(
                    backend = "redis",
                    key = %settings.redis.queue_key,
                    "Creating Redis task queue"
                );
                Arc::new(RedisTaskQueue::new(pool, settings.redis.queue_key.clone()))
            } else {
                tracing::warn!(
                    "Redis task queue requested but no pool provided, falling back to memory"
                );
                Arc::new(MemoryTaskQueue::new())
            }
        }
        other => {
            if other != "memory" {
                tracing::warn!(backend = %other, "Unknown queue backend, using memory");
            }
            tracing::info!(backend = "memory", "Creating memory task queue");
            Arc::new(MemoryTaskQueue::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_without_pool_falls_back_to_memory() {
        let mut settings = Settings::default();
        settings.queue.backend = "redis".to_string();
        let queue = create_task_queue(&settings, None);
        assert_eq!(queue.backend_name(), "memory");
    }
}
