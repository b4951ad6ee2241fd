//! Redis connectivity.
//!
//! - `CircuitBreaker`: fail fast while Redis or PostgreSQL is down
//! - `pool`: shared and blocking connections for the Redis task queue

mod circuit_breaker;
pub mod pool;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use pool::{PoolError, RedisPool};

