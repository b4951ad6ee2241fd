//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    DELIVERY_ATTEMPTS_TOTAL, DELIVERY_ATTEMPT_LATENCY, DISPATCH_SKIPPED_TOTAL,
    NOTIFICATIONS_CREATED_TOTAL, PROVIDER_THROTTLED_TOTAL, QUEUE_POP_ERRORS_TOTAL,
    QUEUE_PUSHED_TOTAL, RETRIES_SCHEDULED_TOTAL, RETRY_LIMIT_EXCEEDED_TOTAL,
    STATUS_CALLBACKS_TOTAL, TEMPLATE_CACHE_TOTAL, WORKERS_ACTIVE, WORKER_TASK_FAILURES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording notification lifecycle metrics
pub struct DeliveryMetrics;

impl DeliveryMetrics {
    pub fn record_created(channel: &str) {
        NOTIFICATIONS_CREATED_TOTAL.with_label_values(&[channel]).inc();
    }

    /// Record one provider attempt
    pub fn record_attempt(channel: &str, outcome: &str, elapsed: Duration) {
        DELIVERY_ATTEMPTS_TOTAL
            .with_label_values(&[channel, outcome])
            .inc();
        DELIVERY_ATTEMPT_LATENCY
            .with_label_values(&[channel])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_skipped() {
        DISPATCH_SKIPPED_TOTAL.inc();
    }

    pub fn record_retry_scheduled() {
        RETRIES_SCHEDULED_TOTAL.inc();
    }

    pub fn record_retry_limit_exceeded() {
        RETRY_LIMIT_EXCEEDED_TOTAL.inc();
    }

    pub fn record_status_callback(status: &str) {
        STATUS_CALLBACKS_TOTAL.with_label_values(&[status]).inc();
    }
}

/// Helper struct for template cache metrics
pub struct TemplateMetrics;

impl TemplateMetrics {
    pub fn record_cache_hit() {
        TEMPLATE_CACHE_TOTAL.with_label_values(&["hit"]).inc();
    }

    pub fn record_cache_miss() {
        TEMPLATE_CACHE_TOTAL.with_label_values(&["miss"]).inc();
    }
}

/// Helper struct for provider metrics
pub struct ProviderMetrics;

impl ProviderMetrics {
    pub fn record_throttled(provider: &str) {
        PROVIDER_THROTTLED_TOTAL.with_label_values(&[provider]).inc();
    }
}

/// Helper struct for task queue metrics
pub struct QueueMetrics;

impl QueueMetrics {
    pub fn record_pushed(task: &str) {
        QUEUE_PUSHED_TOTAL.with_label_values(&[task]).inc();
    }

    pub fn record_pop_error() {
        QUEUE_POP_ERRORS_TOTAL.inc();
    }
}

/// Helper struct for worker pool metrics
pub struct WorkerMetrics;

impl WorkerMetrics {
    pub fn worker_started() {
        WORKERS_ACTIVE.inc();
    }

    pub fn worker_stopped() {
        WORKERS_ACTIVE.dec();
    }

    pub fn record_task_failure() {
        WORKER_TASK_FAILURES_TOTAL.inc();
    }
}
