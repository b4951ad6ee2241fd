//! Append-only audit trail of provider attempts.
//!
//! One entry per attempt, whatever the outcome. Entries are never updated.

mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notification::NotificationStatus;

pub use store::{DeliveryLogStore, MemoryDeliveryLogStore, PgDeliveryLogStore};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub notification_id: Uuid,
    pub provider_id: Option<Uuid>,
    /// `retry_count + 1` at the time of the attempt
    pub attempt_number: u32,
    pub attempted_at: DateTime<Utc>,
    /// Status the attempt left the notification in
    pub status: NotificationStatus,
    pub response: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl DeliveryLogEntry {
    pub fn new(
        notification_id: Uuid,
        attempt_number: u32,
        status: NotificationStatus,
        attempted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            notification_id,
            provider_id: None,
            attempt_number,
            attempted_at,
            status,
            response: None,
            error_message: None,
            duration_ms: 0,
        }
    }

    pub fn provider(mut self, provider_id: Option<Uuid>) -> Self {
        self.provider_id = provider_id;
        self
    }

    pub fn response(mut self, response: Option<serde_json::Value>) -> Self {
        self.response = response;
        self
    }

    pub fn error(mut self, message: Option<String>) -> Self {
        self.error_message = message;
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}
