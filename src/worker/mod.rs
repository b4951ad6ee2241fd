//! Delivery workers.
//!
//! Each worker pops tasks from the shared [`TaskQueue`] and runs them
//! through the [`NotificationDispatcher`]. Workers never hold state between
//! tasks: a notification that fails because a store or the queue is down is
//! put back on the queue with a backoff, everything else is final for that
//! task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::WorkerConfig;
use crate::error::DeliveryError;
use crate::metrics::{QueueMetrics, WorkerMetrics};
use crate::notification::{BackoffConfig, ExponentialBackoff, NotificationDispatcher};
use crate::queue::{schedule_delayed, DeliveryTask, TaskQueue};

/// Requeues allowed for one task before it is dropped
pub const MAX_REQUEUES: u32 = 10;

/// What happened to a task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    /// Put back on the queue after an infrastructure failure
    Requeued,
    Dropped,
}

/// Counters shared by every worker of a pool
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub tasks_processed: AtomicU64,
    pub tasks_requeued: AtomicU64,
    pub tasks_dropped: AtomicU64,
    pub pop_errors: AtomicU64,
}

impl WorkerStats {
    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            tasks_processed: self.tasks_processed.load(Ordering::Relaxed),
            tasks_requeued: self.tasks_requeued.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            pop_errors: self.pop_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatsSnapshot {
    pub tasks_processed: u64,
    pub tasks_requeued: u64,
    pub tasks_dropped: u64,
    pub pop_errors: u64,
}

/// A fixed number of worker loops over one queue
pub struct WorkerPool {
    config: WorkerConfig,
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<NotificationDispatcher>,
    stats: Arc<WorkerStats>,
}

impl WorkerPool {
    pub fn new(
        config: WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        dispatcher: Arc<NotificationDispatcher>,
    ) -> Self {
        Self {
            config,
            queue,
            dispatcher,
            stats: Arc::new(WorkerStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    /// Start `concurrency` workers; each stops on the shutdown signal
    pub fn spawn(&self, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        let concurrency = self.config.concurrency.max(1);
        tracing::info!(
            concurrency = concurrency,
            queue = self.queue.backend_name(),
            auto_retry = self.config.auto_retry,
            "Starting delivery workers"
        );

        (0..concurrency)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    &self.config,
                    self.queue.clone(),
                    self.dispatcher.clone(),
                    self.stats.clone(),
                    shutdown.subscribe(),
                );
                tokio::spawn(worker.run())
            })
            .collect()
    }
}

/// One worker loop
pub struct Worker {
    id: usize,
    queue: Arc<dyn TaskQueue>,
    dispatcher: Arc<NotificationDispatcher>,
    stats: Arc<WorkerStats>,
    poll_timeout: Duration,
    backoff: BackoffConfig,
    shutdown: broadcast::Receiver<()>,
}

impl Worker {
    pub fn new(
        id: usize,
        config: &WorkerConfig,
        queue: Arc<dyn TaskQueue>,
        dispatcher: Arc<NotificationDispatcher>,
        stats: Arc<WorkerStats>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            id,
            queue,
            dispatcher,
            stats,
            poll_timeout: Duration::from_secs(config.poll_timeout_seconds.max(1)),
            backoff: BackoffConfig {
                initial_delay_ms: config.backoff_initial_ms,
                max_delay_ms: config.backoff_max_ms,
                ..BackoffConfig::default()
            },
            shutdown,
        }
    }

    pub async fn run(mut self) {
        WorkerMetrics::worker_started();
        tracing::debug!(worker_id = self.id, "Worker started");

        let mut pop_backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::debug!(worker_id = self.id, "Worker received shutdown signal");
                    break;
                }
                popped = self.queue.pop(self.poll_timeout) => {
                    match popped {
                        Ok(Some(task)) => {
                            pop_backoff.reset();
                            self.process(task).await;
                        }
                        Ok(None) => {}
                        Err(e) => {
                            self.stats.pop_errors.fetch_add(1, Ordering::Relaxed);
                            QueueMetrics::record_pop_error();
                            let delay = pop_backoff.next_delay();
                            tracing::warn!(
                                worker_id = self.id,
                                error = %e,
                                delay_ms = delay.as_millis() as u64,
                                "Failed to pop task"
                            );
                            tokio::time::sleep(delay).await;
                        }
                    }
                }
            }
        }

        WorkerMetrics::worker_stopped();
        tracing::debug!(worker_id = self.id, "Worker stopped");
    }

    /// Run a single task to completion
    #[tracing::instrument(
        name = "worker.task",
        skip(self, task),
        fields(
            worker_id = self.id,
            task = task.kind(),
            notification_id = %task.notification_id()
        )
    )]
    pub async fn process(&self, task: DeliveryTask) -> TaskOutcome {
        self.stats.tasks_processed.fetch_add(1, Ordering::Relaxed);
        let notification_id = task.notification_id();

        let result = match &task {
            DeliveryTask::Send { .. } => self
                .dispatcher
                .send_notification(notification_id)
                .await
                .map(|outcome| {
                    tracing::debug!(outcome = ?outcome, "Send task finished");
                }),
            DeliveryTask::Retry { .. } => self
                .dispatcher
                .retry_notification(notification_id)
                .await
                .map(|notification| {
                    tracing::debug!(retry_count = notification.retry_count, "Notification reopened");
                }),
        };

        match result {
            Ok(()) => TaskOutcome::Completed,
            Err(e) if e.is_infrastructure() => self.requeue(task, &e),
            Err(
                e @ (DeliveryError::RetryLimitExceeded { .. }
                | DeliveryError::InvalidTransition { .. }
                | DeliveryError::NotFound(_)),
            ) => {
                tracing::info!(error = %e, "Task dropped");
                self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                TaskOutcome::Dropped
            }
            Err(e) => {
                tracing::warn!(error = %e, code = e.code(), "Task failed");
                self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
                WorkerMetrics::record_task_failure();
                TaskOutcome::Dropped
            }
        }
    }

    fn requeue(&self, task: DeliveryTask, error: &DeliveryError) -> TaskOutcome {
        WorkerMetrics::record_task_failure();

        if task.requeues() >= MAX_REQUEUES {
            tracing::error!(
                error = %error,
                requeues = task.requeues(),
                "Giving up on task after repeated infrastructure failures"
            );
            self.stats.tasks_dropped.fetch_add(1, Ordering::Relaxed);
            return TaskOutcome::Dropped;
        }

        let delay = self.backoff.delay_for(task.requeues() + 1);
        tracing::warn!(
            error = %error,
            requeues = task.requeues(),
            delay_ms = delay.as_millis() as u64,
            "Infrastructure failure, requeueing task"
        );
        self.stats.tasks_requeued.fetch_add(1, Ordering::Relaxed);
        schedule_delayed(self.queue.clone(), task.requeued(), delay);
        TaskOutcome::Requeued
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery_log::MemoryDeliveryLogStore;
    use crate::engine::EngineRegistry;
    use crate::error::StoreError;
    use crate::notification::{
        Channel, CreateNotification, MemoryNotificationStore, MockNotificationStore,
        NotificationStatus, NotificationStore, Orchestrator,
    };
    use crate::provider::{
        MemoryProviderRepository, MockProviderAdapter, NotificationProvider, ProviderAdapter,
        ProviderRegistry, ProviderRepository, RateLimits, SendOutcome, SendStatus,
    };
    use crate::queue::MemoryTaskQueue;
    use crate::template::{MemoryTemplateRepository, TemplateResolver};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn worker_config() -> WorkerConfig {
        WorkerConfig {
            concurrency: 2,
            auto_retry: false,
            poll_timeout_seconds: 1,
            backoff_initial_ms: 10,
            backoff_max_ms: 50,
        }
    }

    async fn dispatcher(
        store: Arc<dyn NotificationStore>,
        queue: Arc<dyn TaskQueue>,
    ) -> Arc<NotificationDispatcher> {
        let resolver = Arc::new(TemplateResolver::new(
            Arc::new(MemoryTemplateRepository::new()),
            Arc::new(EngineRegistry::with_builtin()),
        ));
        let orchestrator = Arc::new(Orchestrator::new(store, resolver, queue));

        let providers = Arc::new(MemoryProviderRepository::new());
        providers
            .upsert(NotificationProvider::new("mock", "mock", Channel::Email, json!({})))
            .await
            .unwrap();
        let mut registry = ProviderRegistry::new(providers);
        registry.register("mock", |_| {
            let mut adapter = MockProviderAdapter::new();
            adapter.expect_validate_config().return_const(true);
            adapter.expect_rate_limits().return_const(RateLimits::default());
            adapter.expect_timeout().return_const(Duration::from_secs(1));
            adapter.expect_send().returning(|_| {
                Ok(SendOutcome {
                    status: SendStatus::Sent,
                    provider_message_id: None,
                    response: json!({}),
                })
            });
            Ok(Arc::new(adapter) as Arc<dyn ProviderAdapter>)
        });

        Arc::new(NotificationDispatcher::new(
            orchestrator,
            Arc::new(registry),
            Arc::new(MemoryDeliveryLogStore::new()),
        ))
    }

    fn worker(
        queue: Arc<dyn TaskQueue>,
        dispatcher: Arc<NotificationDispatcher>,
        shutdown: &broadcast::Sender<()>,
    ) -> Worker {
        Worker::new(
            0,
            &worker_config(),
            queue,
            dispatcher,
            Arc::new(WorkerStats::default()),
            shutdown.subscribe(),
        )
    }

    #[tokio::test]
    async fn test_pool_delivers_queued_notification() {
        let store = Arc::new(MemoryNotificationStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let dispatcher = dispatcher(store.clone(), queue.clone()).await;

        let id = dispatcher
            .orchestrator()
            .create_and_queue(CreateNotification::direct(Channel::Email, "a@example.com", "hi"))
            .await
            .unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let pool = WorkerPool::new(worker_config(), queue, dispatcher);
        let handles = pool.spawn(&shutdown_tx);

        let mut status = NotificationStatus::Pending;
        for _ in 0..100 {
            status = store.get(id).await.unwrap().unwrap().status;
            if status == NotificationStatus::Sent {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, NotificationStatus::Sent);

        shutdown_tx.send(()).unwrap();
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(pool.stats().snapshot().tasks_processed, 1);
    }

    #[tokio::test]
    async fn test_store_outage_requeues_task() {
        let mut store = MockNotificationStore::new();
        store
            .expect_compare_and_set_status()
            .returning(|_, _, _, _| Err(StoreError::Unavailable("down".to_string())));
        let queue = Arc::new(MemoryTaskQueue::new());
        let dispatcher = dispatcher(Arc::new(store), queue.clone()).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = worker(queue.clone(), dispatcher, &shutdown_tx);

        let id = Uuid::new_v4();
        let outcome = worker.process(DeliveryTask::send(id)).await;
        assert_eq!(outcome, TaskOutcome::Requeued);

        let requeued = queue.pop(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(requeued.notification_id(), id);
        assert_eq!(requeued.requeues(), 1);
    }

    #[tokio::test]
    async fn test_requeue_limit_drops_task() {
        let mut store = MockNotificationStore::new();
        store
            .expect_compare_and_set_status()
            .returning(|_, _, _, _| Err(StoreError::Unavailable("down".to_string())));
        let queue = Arc::new(MemoryTaskQueue::new());
        let dispatcher = dispatcher(Arc::new(store), queue.clone()).await;

        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = worker(queue, dispatcher, &shutdown_tx);

        let mut task = DeliveryTask::send(Uuid::new_v4());
        for _ in 0..MAX_REQUEUES {
            task = task.requeued();
        }
        assert_eq!(worker.process(task).await, TaskOutcome::Dropped);
    }

    #[tokio::test]
    async fn test_retry_of_pending_notification_is_dropped() {
        let store = Arc::new(MemoryNotificationStore::new());
        let queue = Arc::new(MemoryTaskQueue::new());
        let dispatcher = dispatcher(store.clone(), queue.clone()).await;

        let n = CreateNotification::direct(Channel::Email, "a@example.com", "hi")
            .into_notification(Utc::now());
        let id = n.id;
        store.insert(n).await.unwrap();

        let (shutdown_tx, _) = broadcast::channel(1);
        let worker = worker(queue, dispatcher, &shutdown_tx);
        assert_eq!(
            worker.process(DeliveryTask::retry(id)).await,
            TaskOutcome::Dropped
        );
    }
}
