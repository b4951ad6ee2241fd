use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::delivery_log::{DeliveryLogEntry, DeliveryLogStore};
use crate::error::{DeliveryError, Result};
use crate::metrics::DeliveryMetrics;
use crate::provider::{NotificationProvider, ProviderError, ProviderRegistry, SendOutcome, SendStatus};
use crate::queue::{schedule_delayed, DeliveryTask, TaskQueue};

use super::orchestrator::Orchestrator;
use super::retry::{retry_delay, BackoffConfig, ExponentialBackoff};
use super::store::{CasOutcome, NotificationStore};
use super::types::{Notification, NotificationStatus};

/// What a send task did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// The notification was not PENDING (or does not exist); nothing sent
    Skipped { status: Option<NotificationStatus> },
    Sent {
        provider_id: Uuid,
        provider_message_id: Option<String>,
        status: SendStatus,
    },
    Failed {
        error_code: &'static str,
        /// Delay of the automatic retry, when one was scheduled
        retry_in_ms: Option<u64>,
    },
    Rejected { error_code: &'static str },
}

/// Statistics for the delivery dispatcher
#[derive(Debug, Default)]
pub struct DispatcherStats {
    /// Provider attempts made
    pub total_attempts: AtomicU64,
    pub total_sent: AtomicU64,
    pub total_failed: AtomicU64,
    pub total_rejected: AtomicU64,
    /// Tasks dropped by the PENDING guard
    pub total_skipped: AtomicU64,
    pub retries_scheduled: AtomicU64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherStatsSnapshot {
        DispatcherStatsSnapshot {
            total_attempts: self.total_attempts.load(Ordering::Relaxed),
            total_sent: self.total_sent.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            total_rejected: self.total_rejected.load(Ordering::Relaxed),
            total_skipped: self.total_skipped.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatcher statistics
#[derive(Debug, Clone, Serialize)]
pub struct DispatcherStatsSnapshot {
    pub total_attempts: u64,
    pub total_sent: u64,
    pub total_failed: u64,
    pub total_rejected: u64,
    pub total_skipped: u64,
    pub retries_scheduled: u64,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Schedule a retry task after transport failures
    pub auto_retry: bool,
    /// Tries at writing an attempt's status and log entry before giving up
    pub persist_attempts: u32,
    /// Pause between those tries
    pub persist_backoff: BackoffConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            auto_retry: true,
            persist_attempts: 5,
            persist_backoff: BackoffConfig {
                initial_delay_ms: 100,
                max_delay_ms: 2_000,
                ..BackoffConfig::default()
            },
        }
    }
}

/// Result of one provider attempt, before it is persisted
struct Attempt {
    provider: Option<NotificationProvider>,
    result: std::result::Result<SendOutcome, DeliveryError>,
    response: Option<serde_json::Value>,
}

impl Attempt {
    fn failed(
        provider: Option<NotificationProvider>,
        error: DeliveryError,
        response: Option<serde_json::Value>,
    ) -> Self {
        Self {
            provider,
            result: Err(error),
            response,
        }
    }
}

/// Runs send tasks: claims the notification, renders it, hands it to a
/// provider and records the outcome.
///
/// Notification-level failures (template, provider, rendering) end up as a
/// status on the notification and a delivery log entry. Only infrastructure
/// failures are returned as errors, after the claim has been released.
pub struct NotificationDispatcher {
    orchestrator: Arc<Orchestrator>,
    registry: Arc<ProviderRegistry>,
    delivery_log: Arc<dyn DeliveryLogStore>,
    config: DispatcherConfig,
    stats: DispatcherStats,
}

impl NotificationDispatcher {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        registry: Arc<ProviderRegistry>,
        delivery_log: Arc<dyn DeliveryLogStore>,
    ) -> Self {
        Self::with_config(orchestrator, registry, delivery_log, DispatcherConfig::default())
    }

    pub fn with_config(
        orchestrator: Arc<Orchestrator>,
        registry: Arc<ProviderRegistry>,
        delivery_log: Arc<dyn DeliveryLogStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            delivery_log,
            config,
            stats: DispatcherStats::default(),
        }
    }

    pub fn stats(&self) -> DispatcherStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<ProviderRegistry> {
        &self.registry
    }

    pub fn delivery_log(&self) -> &Arc<dyn DeliveryLogStore> {
        &self.delivery_log
    }

    fn store(&self) -> &Arc<dyn NotificationStore> {
        self.orchestrator.store()
    }

    fn queue(&self) -> &Arc<dyn TaskQueue> {
        self.orchestrator.queue()
    }

    /// Deliver one PENDING notification.
    #[tracing::instrument(
        name = "dispatcher.send",
        skip(self),
        fields(attempt = tracing::field::Empty, provider_id = tracing::field::Empty)
    )]
    pub async fn send_notification(&self, notification_id: Uuid) -> Result<DispatchOutcome> {
        let claimed_at = Utc::now();
        let mut notification = match self
            .store()
            .compare_and_set_status(
                notification_id,
                NotificationStatus::Pending,
                NotificationStatus::Processing,
                claimed_at,
            )
            .await?
        {
            CasOutcome::Swapped(notification) => notification,
            CasOutcome::Mismatch(status) => {
                self.stats.total_skipped.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_skipped();
                tracing::debug!(
                    notification_id = %notification_id,
                    status = %status,
                    "Notification not pending, skipping"
                );
                return Ok(DispatchOutcome::Skipped {
                    status: Some(status),
                });
            }
            CasOutcome::NotFound => {
                self.stats.total_skipped.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_skipped();
                tracing::warn!(notification_id = %notification_id, "Notification not found, skipping");
                return Ok(DispatchOutcome::Skipped { status: None });
            }
        };

        let attempt_number = notification.attempt_number();
        tracing::Span::current().record("attempt", attempt_number);

        let started = Instant::now();
        let attempt = self.attempt(&notification).await;
        let elapsed = started.elapsed();
        let finished_at = Utc::now();

        if let Some(provider) = &attempt.provider {
            tracing::Span::current().record("provider_id", tracing::field::display(provider.id));
        }

        let result = match attempt.result {
            Err(e) if e.is_infrastructure() => {
                self.release_claim(notification_id).await;
                return Err(e);
            }
            result => result,
        };

        self.stats.total_attempts.fetch_add(1, Ordering::Relaxed);
        let channel = notification.channel.as_str();
        if let Some(provider) = &attempt.provider {
            notification.provider_id = Some(provider.id);
        }

        let (outcome, log_entry) = match result {
            Ok(sent) => {
                notification.set_status(NotificationStatus::Sent, finished_at);
                notification.provider_message_id = sent.provider_message_id.clone();
                notification.provider_response = Some(sent.response.clone());
                notification.error_message = None;
                notification.error_code = None;

                self.stats.total_sent.fetch_add(1, Ordering::Relaxed);
                DeliveryMetrics::record_attempt(channel, "sent", elapsed);
                tracing::info!(
                    notification_id = %notification_id,
                    attempt = attempt_number,
                    provider_message_id = ?sent.provider_message_id,
                    "Notification sent"
                );

                let entry = DeliveryLogEntry::new(
                    notification_id,
                    attempt_number,
                    NotificationStatus::Sent,
                    finished_at,
                )
                .response(Some(sent.response));

                let outcome = DispatchOutcome::Sent {
                    provider_id: notification.provider_id.unwrap_or_default(),
                    provider_message_id: sent.provider_message_id,
                    status: sent.status,
                };
                (outcome, entry)
            }
            Err(error) => {
                let message = error.to_string();
                let exhausted = error.is_retryable() && !notification.has_retry_budget();
                let (status, error_code) = match &error {
                    DeliveryError::ProviderRejected(_) => {
                        (NotificationStatus::Rejected, error.code())
                    }
                    _ if exhausted => (NotificationStatus::Rejected, "RETRY_LIMIT_EXCEEDED"),
                    _ => (NotificationStatus::Failed, error.code()),
                };

                notification.set_status(status, finished_at);
                notification.error_message = Some(message.clone());
                notification.error_code = Some(error_code.to_string());
                notification.provider_response = attempt.response.clone();

                if exhausted {
                    DeliveryMetrics::record_retry_limit_exceeded();
                }

                let entry = DeliveryLogEntry::new(notification_id, attempt_number, status, finished_at)
                    .response(attempt.response)
                    .error(Some(message.clone()));

                let outcome = if status == NotificationStatus::Rejected {
                    self.stats.total_rejected.fetch_add(1, Ordering::Relaxed);
                    DeliveryMetrics::record_attempt(channel, "rejected", elapsed);
                    tracing::warn!(
                        notification_id = %notification_id,
                        attempt = attempt_number,
                        error_code = error_code,
                        error = %message,
                        "Notification rejected"
                    );
                    DispatchOutcome::Rejected { error_code }
                } else {
                    self.stats.total_failed.fetch_add(1, Ordering::Relaxed);
                    DeliveryMetrics::record_attempt(channel, "failed", elapsed);
                    tracing::warn!(
                        notification_id = %notification_id,
                        attempt = attempt_number,
                        error_code = error_code,
                        error = %message,
                        "Notification delivery failed"
                    );

                    let retry_in = (self.config.auto_retry && error.is_retryable())
                        .then(|| retry_delay(attempt.provider.as_ref(), notification.retry_count + 1));
                    DispatchOutcome::Failed {
                        error_code,
                        retry_in_ms: retry_in.map(|d| d.as_millis() as u64),
                    }
                };
                (outcome, entry)
            }
        };

        let log_entry = log_entry
            .provider(notification.provider_id)
            .duration_ms(elapsed.as_millis() as u64);

        // The provider has already answered: keep trying until the result is on record
        self.persist_attempt(&notification, log_entry).await?;

        if let DispatchOutcome::Failed {
            retry_in_ms: Some(delay_ms),
            ..
        } = &outcome
        {
            self.schedule_retry(notification_id, Duration::from_millis(*delay_ms));
        }

        Ok(outcome)
    }

    /// Write the attempt's final status, then its log entry, retrying each
    /// with backoff. Appends are idempotent on the entry id. Only a status
    /// that could not be saved is returned as an error.
    async fn persist_attempt(
        &self,
        notification: &Notification,
        log_entry: DeliveryLogEntry,
    ) -> Result<()> {
        let notification_id = notification.id;
        let max_tries = self.config.persist_attempts.max(1);
        let mut backoff = ExponentialBackoff::with_config(self.config.persist_backoff.clone());

        loop {
            match self.store().save(notification).await {
                Ok(()) => break,
                Err(e) if backoff.attempt() + 1 < max_tries => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        notification_id = %notification_id,
                        error = %e,
                        try_number = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Saving attempt result failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        notification_id = %notification_id,
                        error = %e,
                        "Giving up on saving attempt result"
                    );
                    return Err(e.into());
                }
            }
        }

        backoff.reset();
        loop {
            match self.delivery_log.append(log_entry.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if backoff.attempt() + 1 < max_tries => {
                    let delay = backoff.next_delay();
                    tracing::warn!(
                        notification_id = %notification_id,
                        error = %e,
                        try_number = backoff.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Appending delivery log entry failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    // Status is durable; a requeued task would only be skipped
                    tracing::error!(
                        notification_id = %notification_id,
                        attempt = log_entry.attempt_number,
                        error = %e,
                        "Giving up on appending delivery log entry"
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Apply a delivery report for a SENT notification.
    ///
    /// DELIVERED is only taken from providers whose adapter confirms
    /// delivery; BOUNCED is taken from any provider.
    #[tracing::instrument(name = "dispatcher.status_callback", skip(self))]
    pub async fn record_status_callback(
        &self,
        notification_id: Uuid,
        status: NotificationStatus,
    ) -> Result<Notification> {
        if status == NotificationStatus::Delivered {
            let notification = self.orchestrator.get(notification_id).await?;
            if notification.status == NotificationStatus::Sent {
                self.ensure_confirms_delivery(&notification).await?;
            }
        }
        self.orchestrator
            .apply_delivery_report(notification_id, status)
            .await
    }

    async fn ensure_confirms_delivery(&self, notification: &Notification) -> Result<()> {
        let refuse = |reason: String| {
            tracing::warn!(notification_id = %notification.id, reason = %reason, "Delivery report refused");
            Err(DeliveryError::Validation(reason))
        };

        let Some(provider_id) = notification.provider_id else {
            return refuse("notification has no provider to confirm delivery".to_string());
        };
        let Some(provider) = self.registry.repository().get(provider_id).await? else {
            return refuse(format!("provider {} no longer exists", provider_id));
        };
        let adapter = match self.registry.adapter_for(&provider) {
            Ok(adapter) => adapter,
            Err(e) => return refuse(format!("provider '{}' unavailable: {}", provider.name, e)),
        };

        if adapter.supports_delivery_confirmation() {
            Ok(())
        } else {
            refuse(format!(
                "provider '{}' does not confirm delivery",
                provider.name
            ))
        }
    }

    /// Explicit retry of a FAILED/REJECTED notification.
    pub async fn retry_notification(&self, notification_id: Uuid) -> Result<Notification> {
        self.orchestrator.retry(notification_id).await
    }

    async fn attempt(&self, notification: &Notification) -> Attempt {
        let request = match self.orchestrator.prepare(notification).await {
            Ok(request) => request,
            Err(e) => return Attempt::failed(None, e, None),
        };

        let selected = match self.registry.select(notification).await {
            Ok(selected) => selected,
            Err(e) => return Attempt::failed(None, e, None),
        };
        let provider = Some(selected.provider.clone());

        if let Err(e) = self.registry.acquire(&selected) {
            return Attempt::failed(provider, e.into(), None);
        }

        let limit = selected.adapter.timeout();
        match tokio::time::timeout(limit, selected.adapter.send(&request)).await {
            Ok(Ok(outcome)) => Attempt {
                provider,
                result: Ok(outcome),
                response: None,
            },
            Ok(Err(e)) => {
                let response = e.response().cloned();
                Attempt::failed(provider, e.into(), response)
            }
            Err(_) => Attempt::failed(provider, ProviderError::Timeout(limit.as_secs()).into(), None),
        }
    }

    /// Hand a claimed notification back after an infrastructure failure so
    /// a requeued task can pick it up again
    async fn release_claim(&self, notification_id: Uuid) {
        match self
            .store()
            .compare_and_set_status(
                notification_id,
                NotificationStatus::Processing,
                NotificationStatus::Pending,
                Utc::now(),
            )
            .await
        {
            Ok(CasOutcome::Swapped(_)) => {}
            Ok(other) => tracing::warn!(
                notification_id = %notification_id,
                outcome = ?other,
                "Could not release claim"
            ),
            Err(e) => tracing::error!(
                notification_id = %notification_id,
                error = %e,
                "Could not release claim"
            ),
        }
    }

    fn schedule_retry(&self, notification_id: Uuid, delay: Duration) {
        self.stats.retries_scheduled.fetch_add(1, Ordering::Relaxed);
        DeliveryMetrics::record_retry_scheduled();
        tracing::info!(
            notification_id = %notification_id,
            delay_ms = delay.as_millis() as u64,
            "Automatic retry scheduled"
        );
        schedule_delayed(self.queue().clone(), DeliveryTask::retry(notification_id), delay);
    }
}
