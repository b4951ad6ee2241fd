use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::engine::markdown_to_html;
use crate::error::{DeliveryError, Result};
use crate::metrics::DeliveryMetrics;
use crate::provider::SendRequest;
use crate::queue::{schedule_delayed, DeliveryTask, TaskQueue};
use crate::template::{TemplateLookup, TemplateResolver};

use super::store::{CasOutcome, NotificationStore};
use super::types::{
    Channel, ContentType, CreateNotification, FanOutFailure, FanOutRequest, FanOutResult,
    Notification, NotificationStatus, RetryDecision,
};

/// Entry point of the pipeline: creates notifications, queues their send
/// tasks and turns a stored notification into a provider-ready request.
pub struct Orchestrator {
    store: Arc<dyn NotificationStore>,
    resolver: Arc<TemplateResolver>,
    queue: Arc<dyn TaskQueue>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn NotificationStore>,
        resolver: Arc<TemplateResolver>,
        queue: Arc<dyn TaskQueue>,
    ) -> Self {
        Self {
            store,
            resolver,
            queue,
        }
    }

    pub fn store(&self) -> &Arc<dyn NotificationStore> {
        &self.store
    }

    pub fn resolver(&self) -> &Arc<TemplateResolver> {
        &self.resolver
    }

    pub fn queue(&self) -> &Arc<dyn TaskQueue> {
        &self.queue
    }

    /// Validate, persist as PENDING and queue a send task.
    ///
    /// A future `scheduled_at` delays the send task accordingly.
    #[tracing::instrument(
        name = "orchestrator.create",
        skip(self, request),
        fields(channel = ?request.channel, notification_id = tracing::field::Empty)
    )]
    pub async fn create_and_queue(&self, request: CreateNotification) -> Result<Uuid> {
        request.validate().map_err(DeliveryError::Validation)?;

        let now = Utc::now();
        let notification = request.into_notification(now);
        let id = notification.id;
        let channel = notification.channel;
        let delay = notification
            .scheduled_at
            .and_then(|at| (at - now).to_std().ok())
            .filter(|d| !d.is_zero());

        tracing::Span::current().record("notification_id", tracing::field::display(id));

        self.store.insert(notification).await?;
        DeliveryMetrics::record_created(channel.as_str());

        match delay {
            Some(delay) => schedule_delayed(self.queue.clone(), DeliveryTask::send(id), delay),
            None => self.queue.push(DeliveryTask::send(id)).await?,
        }

        tracing::info!(
            notification_id = %id,
            channel = %channel,
            scheduled = delay.is_some(),
            "Notification created"
        );

        Ok(id)
    }

    /// One independent notification per recipient.
    pub async fn fan_out(&self, request: FanOutRequest) -> FanOutResult {
        let mut result = FanOutResult::default();

        for recipient in request.recipients {
            let mut message = request.message.clone();
            message.recipient_address = recipient.address.clone();
            message.recipient_id = recipient.recipient_id;

            match self.create_and_queue(message).await {
                Ok(id) => result.created.push(id),
                Err(e) => {
                    tracing::warn!(
                        recipient = %recipient.address,
                        error = %e,
                        "Fan-out recipient failed"
                    );
                    result.failed.push(FanOutFailure {
                        address: recipient.address,
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            created = result.created.len(),
            failed = result.failed.len(),
            "Fan-out completed"
        );

        result
    }

    /// Resolve and render content, then assemble the provider request.
    #[tracing::instrument(
        name = "orchestrator.prepare",
        skip(self, notification),
        fields(notification_id = %notification.id, template = ?notification.template_key)
    )]
    pub async fn prepare(&self, notification: &Notification) -> Result<SendRequest> {
        let (subject, body, content_type) = match &notification.template_key {
            Some(key) => {
                let mut lookup = TemplateLookup::new(key.clone(), notification.channel)
                    .scope(notification.tenant_id.as_deref(), notification.app_id.as_deref());
                if let Some(locale) = &notification.locale {
                    lookup = lookup.locale(locale.clone());
                }
                if let Some(version) = notification.template_version {
                    lookup = lookup.version(version);
                }

                let template = self.resolver.resolve(&lookup).await?;
                let rendered = self.resolver.render(&template, &notification.template_data)?;
                let content_type = if template.engine == "markdown" {
                    // Markdown engine output is already HTML
                    ContentType::Html
                } else {
                    template.content_type
                };
                (
                    rendered.subject.or_else(|| notification.subject.clone()),
                    rendered.body,
                    content_type,
                )
            }
            None => {
                let body = notification.body.clone().ok_or_else(|| {
                    DeliveryError::Validation("notification has neither body nor template".into())
                })?;
                (notification.subject.clone(), body, notification.content_type)
            }
        };

        // SMS carries text only
        let (body, content_type) =
            if content_type == ContentType::Markdown && notification.channel != Channel::Sms {
                (markdown_to_html(&body), ContentType::Html)
            } else {
                (body, content_type)
            };

        let meta = &notification.meta;
        Ok(SendRequest {
            notification_id: notification.id,
            channel: Some(notification.channel),
            recipient: notification.recipient_address.clone(),
            subject,
            body,
            content_type,
            from: meta.from.clone(),
            from_name: meta.from_name.clone(),
            reply_to: meta.reply_to.clone(),
            cc: meta.cc.clone(),
            bcc: meta.bcc.clone(),
            media_url: meta.media_url.clone(),
            dlr_url: meta.dlr_url.clone(),
            dlr_mask: meta.dlr_mask,
            tags: notification.tags.clone(),
            extra: meta.extra.clone(),
        })
    }

    /// Reopen a FAILED/REJECTED notification and queue a send task.
    #[tracing::instrument(name = "orchestrator.retry", skip(self))]
    pub async fn retry(&self, id: Uuid) -> Result<Notification> {
        let (decision, notification) = self
            .store
            .reopen_for_retry(id, Utc::now())
            .await?
            .ok_or(DeliveryError::NotFound(id))?;

        match decision {
            RetryDecision::Requeued => {
                self.queue.push(DeliveryTask::send(id)).await?;
                tracing::info!(
                    notification_id = %id,
                    retry_count = notification.retry_count,
                    max_retries = notification.max_retries,
                    "Notification requeued for retry"
                );
                Ok(notification)
            }
            RetryDecision::LimitExceeded => {
                DeliveryMetrics::record_retry_limit_exceeded();
                tracing::warn!(
                    notification_id = %id,
                    retry_count = notification.retry_count,
                    "Retry limit exceeded"
                );
                Err(DeliveryError::RetryLimitExceeded {
                    id,
                    retries: notification.retry_count,
                })
            }
            RetryDecision::NotRetryable(status) => Err(DeliveryError::InvalidTransition {
                from: status,
                to: NotificationStatus::Pending,
            }),
        }
    }

    /// Apply an out-of-band delivery report. Only `SENT → DELIVERED` and
    /// `SENT → BOUNCED` are accepted. Whether the provider can confirm
    /// delivery is checked by [`NotificationDispatcher::record_status_callback`].
    ///
    /// [`NotificationDispatcher::record_status_callback`]: super::NotificationDispatcher::record_status_callback
    #[tracing::instrument(name = "orchestrator.status_callback", skip(self))]
    pub(crate) async fn apply_delivery_report(
        &self,
        id: Uuid,
        status: NotificationStatus,
    ) -> Result<Notification> {
        if !matches!(
            status,
            NotificationStatus::Delivered | NotificationStatus::Bounced
        ) {
            return Err(DeliveryError::Validation(format!(
                "status callback must be DELIVERED or BOUNCED, got {}",
                status
            )));
        }

        match self
            .store
            .compare_and_set_status(id, NotificationStatus::Sent, status, Utc::now())
            .await?
        {
            CasOutcome::Swapped(notification) => {
                DeliveryMetrics::record_status_callback(status.as_str());
                tracing::info!(notification_id = %id, status = %status, "Delivery report applied");
                Ok(notification)
            }
            CasOutcome::Mismatch(current) => Err(DeliveryError::InvalidTransition {
                from: current,
                to: status,
            }),
            CasOutcome::NotFound => Err(DeliveryError::NotFound(id)),
        }
    }

    pub async fn get(&self, id: Uuid) -> Result<Notification> {
        self.store
            .get(id)
            .await?
            .ok_or(DeliveryError::NotFound(id))
    }
}
