// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod postgres;
pub mod redis;
pub mod telemetry;

// Delivery pipeline
pub mod delivery_log;
pub mod engine;
pub mod notification;
pub mod provider;
pub mod queue;
pub mod template;
pub mod worker;

// Operational surface
pub mod api;
pub mod server;
