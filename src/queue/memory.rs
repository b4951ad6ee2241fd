//! In-process task queue on a tokio channel.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::metrics::QueueMetrics;

use super::{DeliveryTask, QueueError, TaskQueue};

/// Unbounded in-memory queue. Workers share the receiver behind a mutex,
/// so exactly one of them gets each task.
pub struct MemoryTaskQueue {
    sender: mpsc::UnboundedSender<DeliveryTask>,
    receiver: Mutex<mpsc::UnboundedReceiver<DeliveryTask>>,
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            sender,
            receiver: Mutex::new(receiver),
        }
    }
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn push(&self, task: DeliveryTask) -> Result<(), QueueError> {
        let kind = task.kind();
        self.sender.send(task).map_err(|_| QueueError::Closed)?;
        QueueMetrics::record_pushed(kind);
        Ok(())
    }

    async fn pop(&self, timeout: Duration) -> Result<Option<DeliveryTask>, QueueError> {
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(timeout, receiver.recv()).await {
            Ok(Some(task)) => Ok(Some(task)),
            Ok(None) => Err(QueueError::Closed),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = MemoryTaskQueue::new();
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        queue.push(DeliveryTask::send(first)).await.unwrap();
        queue.push(DeliveryTask::retry(second)).await.unwrap();

        let timeout = Duration::from_millis(50);
        assert_eq!(
            queue.pop(timeout).await.unwrap(),
            Some(DeliveryTask::send(first))
        );
        assert_eq!(
            queue.pop(timeout).await.unwrap(),
            Some(DeliveryTask::retry(second))
        );
    }

    #[tokio::test]
    async fn test_pop_times_out_when_empty() {
        let queue = MemoryTaskQueue::new();
        let task = queue.pop(Duration::from_millis(10)).await.unwrap();
        assert!(task.is_none());
    }
}
