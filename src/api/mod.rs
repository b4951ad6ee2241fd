//! Operational HTTP surface: health, metrics, and notification inspection.

mod health;
mod metrics;
mod notifications;
mod routes;

pub use health::health;
pub use metrics::prometheus_metrics;
pub use notifications::{
    get_notification, list_attempts, retry_notification, status_callback, StatusCallbackRequest,
};
pub use routes::api_routes;
