//! Task queue feeding the delivery workers.
//!
//! A task only carries the notification id; the worker loads everything else
//! from the notification store. Two backends exist:
//!
//! - `memory`: in-process channel, tasks are lost on restart
//! - `redis`: `LPUSH`/`BRPOP` on a single list, shared by every instance

mod factory;
mod memory;
mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use factory::create_task_queue;
pub use self::memory::MemoryTaskQueue;
pub use self::redis::RedisTaskQueue;

/// Work item for a delivery worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeliveryTask {
    /// Deliver a PENDING notification
    Send {
        notification_id: Uuid,
        /// Times the task went back on the queue after an infrastructure failure
        #[serde(default)]
        requeues: u32,
    },
    /// Reopen a FAILED/REJECTED notification, then deliver it
    Retry {
        notification_id: Uuid,
        #[serde(default)]
        requeues: u32,
    },
}

impl DeliveryTask {
    pub fn send(notification_id: Uuid) -> Self {
        Self::Send {
            notification_id,
            requeues: 0,
        }
    }

    pub fn retry(notification_id: Uuid) -> Self {
        Self::Retry {
            notification_id,
            requeues: 0,
        }
    }

    pub fn notification_id(&self) -> Uuid {
        match self {
            Self::Send { notification_id, .. } | Self::Retry { notification_id, .. } => {
                *notification_id
            }
        }
    }

    pub fn requeues(&self) -> u32 {
        match self {
            Self::Send { requeues, .. } | Self::Retry { requeues, .. } => *requeues,
        }
    }

    /// Same task with the requeue counter bumped
    pub fn requeued(&self) -> Self {
        match self {
            Self::Send {
                notification_id,
                requeues,
            } => Self::Send {
                notification_id: *notification_id,
                requeues: requeues + 1,
            },
            Self::Retry {
                notification_id,
                requeues,
            } => Self::Retry {
                notification_id: *notification_id,
                requeues: requeues + 1,
            },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Send { .. } => "send",
            Self::Retry { .. } => "retry",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("Redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Task serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Task queue is closed")]
    Closed,

    #[error("Task queue unavailable: {0}")]
    Unavailable(String),
}

/// FIFO of delivery tasks
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Backend name for logging and health output
    fn backend_name(&self) -> &'static str;

    async fn push(&self, task: DeliveryTask) -> Result<(), QueueError>;

    /// Wait up to `timeout` for the next task
    async fn pop(&self, timeout: Duration) -> Result<Option<DeliveryTask>, QueueError>;
}

/// Push `task` once `delay` has elapsed.
///
/// The delay lives in this process only; a restart before it fires loses the
/// push, and the notification stays in its current state until retried.
pub fn schedule_delayed(queue: Arc<dyn TaskQueue>, task: DeliveryTask, delay: Duration) {
    if delay.is_zero() {
        tokio::spawn(async move {
            if let Err(e) = queue.push(task.clone()).await {
                tracing::error!(
                    notification_id = %task.notification_id(),
                    error = %e,
                    "Failed to push task"
                );
            }
        });
        return;
    }

    tracing::debug!(
        notification_id = %task.notification_id(),
        task = task.kind(),
        delay_ms = delay.as_millis() as u64,
        "Scheduling delayed task"
    );

    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        if let Err(e) = queue.push(task.clone()).await {
            tracing::error!(
                notification_id = %task.notification_id(),
                error = %e,
                "Failed to push delayed task"
            );
        }
    });
}
