//! Delivery providers.
//!
//! A provider record (`NotificationProvider`) names an adapter type and
//! carries its configuration. The [`ProviderRegistry`] turns records into
//! adapters through a constructor map populated at startup:
//!
//! - `smtp`: email through an SMTP relay (`lettre`)
//! - `sms_gateway`: SMS through an HTTP gateway (`reqwest`)

mod adapter;
mod registry;
mod repository;
mod sms_gateway;
mod smtp;
mod throttle;
mod types;

pub use adapter::{
    ProviderAdapter, ProviderError, ProviderStatusInfo, RateLimits, SendOutcome, SendRequest,
    SendStatus, DEFAULT_TIMEOUT_SECS,
};
#[cfg(test)]
pub use adapter::MockProviderAdapter;
pub use registry::{AdapterFactory, ProviderRegistry, SelectedProvider};
pub use repository::{MemoryProviderRepository, PgProviderRepository, ProviderRepository};
pub use sms_gateway::{SmsGatewayAdapter, SmsGatewayConfig};
pub use smtp::{SmtpAdapter, SmtpConfig, TlsMode};
pub use throttle::{ProviderThrottle, TokenBucket};
pub use types::{
    NotificationProvider, ProviderStatus, RetryStrategy, DEFAULT_RETRY_DELAY_SECS,
    MAX_RETRY_DELAY_SECS,
};
