//! Prometheus metrics for the delivery pipeline.
//!
//! - Notification metrics (created, attempts by channel and outcome, latency)
//! - Retry metrics (scheduled, limit exceeded)
//! - Template cache metrics
//! - Provider throttling
//! - Task queue and worker metrics

mod helpers;

pub use helpers::{
    encode_metrics, DeliveryMetrics, ProviderMetrics, QueueMetrics, TemplateMetrics, WorkerMetrics,
};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "notify";

lazy_static! {
    // ============================================================================
    // Notification Metrics
    // ============================================================================

    /// Notifications accepted by the orchestrator
    pub static ref NOTIFICATIONS_CREATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_notifications_created_total", METRIC_PREFIX),
        "Total notifications created",
        &["channel"]
    ).unwrap();

    /// Provider send attempts by outcome (sent, failed, rejected)
    pub static ref DELIVERY_ATTEMPTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_delivery_attempts_total", METRIC_PREFIX),
        "Total delivery attempts",
        &["channel", "outcome"]
    ).unwrap();

    /// Time spent in a single delivery attempt
    pub static ref DELIVERY_ATTEMPT_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_delivery_attempt_latency_seconds", METRIC_PREFIX),
        "Delivery attempt latency in seconds",
        &["channel"],
        vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    /// Send tasks dropped because the notification was not PENDING
    pub static ref DISPATCH_SKIPPED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_dispatch_skipped_total", METRIC_PREFIX),
        "Total dispatches skipped by the status guard"
    ).unwrap();

    /// Out-of-band status callbacks applied
    pub static ref STATUS_CALLBACKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_status_callbacks_total", METRIC_PREFIX),
        "Total provider status callbacks",
        &["status"]
    ).unwrap();

    // ============================================================================
    // Retry Metrics
    // ============================================================================

    /// Automatic retries scheduled after a transport failure
    pub static ref RETRIES_SCHEDULED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retries_scheduled_total", METRIC_PREFIX),
        "Total automatic retries scheduled"
    ).unwrap();

    /// Notifications that ran out of retry budget
    pub static ref RETRY_LIMIT_EXCEEDED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_retry_limit_exceeded_total", METRIC_PREFIX),
        "Total notifications rejected after exhausting retries"
    ).unwrap();

    // ============================================================================
    // Template Metrics
    // ============================================================================

    /// Resolver cache lookups by result (hit, miss)
    pub static ref TEMPLATE_CACHE_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_template_cache_total", METRIC_PREFIX),
        "Template resolver cache lookups",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Provider Metrics
    // ============================================================================

    /// Sends refused by a provider's own rate limits
    pub static ref PROVIDER_THROTTLED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_provider_throttled_total", METRIC_PREFIX),
        "Total sends throttled by provider rate limits",
        &["provider"]
    ).unwrap();

    // ============================================================================
    // Queue / Worker Metrics
    // ============================================================================

    /// Tasks pushed by kind (send, retry)
    pub static ref QUEUE_PUSHED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_queue_pushed_total", METRIC_PREFIX),
        "Total tasks pushed to the task queue",
        &["task"]
    ).unwrap();

    /// Queue pop failures
    pub static ref QUEUE_POP_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_pop_errors_total", METRIC_PREFIX),
        "Total task queue pop errors"
    ).unwrap();

    /// Tasks that failed with an infrastructure error and were requeued
    pub static ref WORKER_TASK_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_worker_task_failures_total", METRIC_PREFIX),
        "Total worker task failures"
    ).unwrap();

    /// Worker loops currently running
    pub static ref WORKERS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_workers_active", METRIC_PREFIX),
        "Number of running worker loops"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_registered() {
        DeliveryMetrics::record_created("EMAIL");
        TemplateMetrics::record_cache_hit();
        let output = encode_metrics().unwrap();
        assert!(output.contains("notify_notifications_created_total"));
        assert!(output.contains("notify_template_cache_total"));
    }
}
