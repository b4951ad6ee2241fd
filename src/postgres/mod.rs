//! PostgreSQL persistence.
//!
//! Connection pooling with circuit breaker tracking, and the schema
//! migrations under `migrations/`.

pub mod pool;

pub use pool::{mask_url, PostgresPool, PostgresPoolError};
