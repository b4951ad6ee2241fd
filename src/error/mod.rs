use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::engine::EngineError;
use crate::notification::NotificationStatus;
use crate::provider::ProviderError;
use crate::queue::QueueError;
use crate::template::TemplateError;

/// Failures of the backing store (notifications, templates, providers, delivery log).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

/// Pipeline-level error taxonomy.
///
/// Everything below `Store`/`Queue` is a notification-level failure that the
/// dispatcher converts into a status transition. `Store` and `Queue` are
/// infrastructure failures and surface as task failures.
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Render error: {0}")]
    Render(String),

    #[error("No provider available: {0}")]
    NoProviderAvailable(String),

    #[error("Provider transport error: {0}")]
    ProviderTransport(String),

    #[error("Provider rejected: {0}")]
    ProviderRejected(String),

    #[error("Retry limit exceeded for notification {id} ({retries} retries)")]
    RetryLimitExceeded { id: Uuid, retries: u32 },

    #[error("Notification not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid status transition from {from} to {to}")]
    InvalidTransition {
        from: NotificationStatus,
        to: NotificationStatus,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl DeliveryError {
    /// Sanitized error code persisted on the notification.
    pub fn code(&self) -> &'static str {
        match self {
            DeliveryError::Validation(_) => "VALIDATION_ERROR",
            DeliveryError::TemplateNotFound(_) => "TEMPLATE_NOT_FOUND",
            DeliveryError::Render(_) => "RENDER_ERROR",
            DeliveryError::NoProviderAvailable(_) => "NO_PROVIDER_AVAILABLE",
            DeliveryError::ProviderTransport(_) => "PROVIDER_TRANSPORT_ERROR",
            DeliveryError::ProviderRejected(_) => "PROVIDER_REJECTED",
            DeliveryError::RetryLimitExceeded { .. } => "RETRY_LIMIT_EXCEEDED",
            DeliveryError::NotFound(_) => "NOT_FOUND",
            DeliveryError::InvalidTransition { .. } => "INVALID_TRANSITION",
            DeliveryError::Store(_) => "STORE_ERROR",
            DeliveryError::Queue(_) => "QUEUE_ERROR",
        }
    }

    /// Whether the failure may succeed on an automatic retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeliveryError::ProviderTransport(_))
    }

    /// Whether the failure is an infrastructure failure rather than a
    /// notification-level outcome.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, DeliveryError::Store(_) | DeliveryError::Queue(_))
    }
}

impl From<EngineError> for DeliveryError {
    fn from(err: EngineError) -> Self {
        DeliveryError::Render(err.to_string())
    }
}

impl From<TemplateError> for DeliveryError {
    fn from(err: TemplateError) -> Self {
        match err {
            TemplateError::NotFound(key) => DeliveryError::TemplateNotFound(key),
            TemplateError::Engine(e) => DeliveryError::Render(e.to_string()),
            TemplateError::Invalid(msg) => DeliveryError::Validation(msg),
            TemplateError::Store(e) => DeliveryError::Store(e),
        }
    }
}

impl From<ProviderError> for DeliveryError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Rejected { reason, .. } => DeliveryError::ProviderRejected(reason),
            ProviderError::Configuration(msg) => DeliveryError::NoProviderAvailable(msg),
            other => DeliveryError::ProviderTransport(other.to_string()),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeliveryError::Validation(_) => StatusCode::BAD_REQUEST,
            DeliveryError::NotFound(_) | DeliveryError::TemplateNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            DeliveryError::RetryLimitExceeded { .. } | DeliveryError::InvalidTransition { .. } => {
                StatusCode::CONFLICT
            }
            DeliveryError::Render(_) => StatusCode::UNPROCESSABLE_ENTITY,
            DeliveryError::NoProviderAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            DeliveryError::ProviderTransport(_) | DeliveryError::ProviderRejected(_) => {
                StatusCode::BAD_GATEWAY
            }
            DeliveryError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DeliveryError::Queue(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let code = self.code();
        let log_message = self.to_string();
        let client_message = if self.is_infrastructure() && is_production() {
            "Service temporarily unavailable".to_string()
        } else {
            log_message.clone()
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %code,
            status = %status.as_u16(),
            message = %log_message,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message: client_message,
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, DeliveryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            DeliveryError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            DeliveryError::RetryLimitExceeded {
                id: Uuid::nil(),
                retries: 3
            }
            .code(),
            "RETRY_LIMIT_EXCEEDED"
        );
    }

    #[test]
    fn test_only_transport_errors_are_retryable() {
        assert!(DeliveryError::ProviderTransport("timeout".into()).is_retryable());
        assert!(!DeliveryError::ProviderRejected("bad address".into()).is_retryable());
        assert!(!DeliveryError::TemplateNotFound("welcome".into()).is_retryable());
        assert!(!DeliveryError::NoProviderAvailable("sms".into()).is_retryable());
    }

    #[test]
    fn test_provider_error_mapping() {
        let err: DeliveryError = ProviderError::Rejected {
            reason: "unknown subscriber".into(),
            response: None,
        }
        .into();
        assert!(matches!(err, DeliveryError::ProviderRejected(_)));

        let err: DeliveryError = ProviderError::Timeout(30).into();
        assert!(matches!(err, DeliveryError::ProviderTransport(_)));
    }

    #[test]
    fn test_template_error_mapping() {
        let err: DeliveryError = TemplateError::NotFound("welcome".into()).into();
        assert!(matches!(err, DeliveryError::TemplateNotFound(_)));
    }
}
