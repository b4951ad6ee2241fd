//! Notification model, lifecycle, and delivery.
//!
//! # Lifecycle
//!
//! ```text
//! PENDING -> PROCESSING -> SENT -> DELIVERED
//!                |           \--> BOUNCED
//!                +-> FAILED ---\
//!                +-> REJECTED --+-> PENDING (retry, budget permitting)
//! ```
//!
//! The [`Orchestrator`] creates notifications and owns retries; the
//! [`NotificationDispatcher`] runs send tasks. The only way into
//! PROCESSING is the PENDING -> PROCESSING compare-and-set in the
//! dispatcher, so at most one worker sends a given notification.

mod dispatcher;
mod orchestrator;
mod retry;
mod store;
mod types;

pub use dispatcher::{
    DispatchOutcome, DispatcherConfig, DispatcherStats, DispatcherStatsSnapshot,
    NotificationDispatcher,
};
pub use orchestrator::Orchestrator;
pub use retry::{jittered, retry_delay, BackoffConfig, ExponentialBackoff, RETRY_JITTER_FACTOR};
#[cfg(test)]
pub use store::MockNotificationStore;
pub use store::{CasOutcome, MemoryNotificationStore, NotificationStore, PgNotificationStore};
pub use types::{
    Channel, ContentType, CreateNotification, FanOutFailure, FanOutRequest, FanOutResult,
    Notification, NotificationMeta, NotificationStatus, Priority, Recipient, RetryDecision,
    DEFAULT_MAX_RETRIES, MAX_RETRIES_LIMIT,
};
