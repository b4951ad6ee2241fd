use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::Settings;
use crate::delivery_log::{DeliveryLogStore, MemoryDeliveryLogStore, PgDeliveryLogStore};
use crate::engine::EngineRegistry;
use crate::error::StoreError;
use crate::notification::{
    DispatcherConfig, MemoryNotificationStore, NotificationDispatcher, NotificationStore,
    Orchestrator, PgNotificationStore,
};
use crate::postgres::{PostgresPool, PostgresPoolError};
use crate::provider::{
    MemoryProviderRepository, PgProviderRepository, ProviderRegistry, ProviderRepository,
};
use crate::queue::{create_task_queue, TaskQueue};
use crate::redis::{CircuitBreaker, PoolError, RedisPool};
use crate::template::{
    MemoryTemplateRepository, PgTemplateRepository, TemplateRepository, TemplateResolver,
};
use crate::worker::WorkerPool;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("store.backend = \"postgres\" requires a [database] section")]
    MissingDatabase,

    #[error("PostgreSQL: {0}")]
    Postgres(#[from] PostgresPoolError),

    #[error("Redis: {0}")]
    Redis(#[from] PoolError),

    #[error("Failed to register configured providers: {0}")]
    Providers(#[from] StoreError),
}

/// Persistence handles for one store backend
struct Stores {
    notifications: Arc<dyn NotificationStore>,
    templates: Arc<dyn TemplateRepository>,
    providers: Arc<dyn ProviderRepository>,
    delivery_log: Arc<dyn DeliveryLogStore>,
}

impl Stores {
    fn memory() -> Self {
        Self {
            notifications: Arc::new(MemoryNotificationStore::new()),
            templates: Arc::new(MemoryTemplateRepository::new()),
            providers: Arc::new(MemoryProviderRepository::new()),
            delivery_log: Arc::new(MemoryDeliveryLogStore::new()),
        }
    }

    fn postgres(pool: &PostgresPool) -> Self {
        let pool = pool.pool().clone();
        Self {
            notifications: Arc::new(PgNotificationStore::new(pool.clone())),
            templates: Arc::new(PgTemplateRepository::new(pool.clone())),
            providers: Arc::new(PgProviderRepository::new(pool.clone())),
            delivery_log: Arc::new(PgDeliveryLogStore::new(pool)),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub workers: Arc<WorkerPool>,
    pub queue: Arc<dyn TaskQueue>,
    pub redis_pool: Option<Arc<RedisPool>>,
    pub postgres_pool: Option<PostgresPool>,
    pub start_time: Instant,
}

impl AppState {
    /// Wire stores, queue, resolver, providers and workers from settings.
    pub async fn build(settings: Settings) -> Result<Self, StartupError> {
        let redis_pool = if settings.queue.backend == "redis" {
            let breaker = Arc::new(CircuitBreaker::new("redis", &settings.redis.circuit_breaker));
            Some(Arc::new(RedisPool::new(&settings.redis, breaker)?))
        } else {
            None
        };

        let (stores, postgres_pool) = if settings.store.backend == "postgres" {
            let database = settings
                .database
                .as_ref()
                .ok_or(StartupError::MissingDatabase)?;
            let breaker = Arc::new(CircuitBreaker::new("postgres", &database.circuit_breaker));
            let pool = PostgresPool::new(database, breaker).await?;
            if database.run_migrations {
                pool.migrate().await?;
            }
            (Stores::postgres(&pool), Some(pool))
        } else {
            tracing::info!(backend = "memory", "Using in-memory stores");
            (Stores::memory(), None)
        };

        for provider in &settings.providers {
            let stored = stores.providers.upsert(provider.to_provider()).await?;
            tracing::info!(
                provider = %stored.name,
                provider_type = %stored.provider_type,
                channel = %stored.channel,
                priority = stored.priority,
                "Provider registered"
            );
        }

        let queue = create_task_queue(&settings, redis_pool.clone());

        // Local invalidation does not reach other instances sharing the store
        let cache_ttl = (settings.store.backend == "postgres")
            .then(|| Duration::from_secs(settings.templates.cache_ttl_seconds));
        let resolver = Arc::new(
            TemplateResolver::new(stores.templates, Arc::new(EngineRegistry::with_builtin()))
                .with_cache(settings.templates.cache_enabled)
                .with_cache_ttl(cache_ttl),
        );
        let orchestrator = Arc::new(Orchestrator::new(
            stores.notifications,
            resolver,
            queue.clone(),
        ));
        let registry = Arc::new(ProviderRegistry::with_builtin(stores.providers));
        let dispatcher = Arc::new(NotificationDispatcher::with_config(
            orchestrator.clone(),
            registry,
            stores.delivery_log,
            DispatcherConfig {
                auto_retry: settings.worker.auto_retry,
                ..DispatcherConfig::default()
            },
        ));
        let workers = Arc::new(WorkerPool::new(
            settings.worker.clone(),
            queue.clone(),
            dispatcher.clone(),
        ));

        Ok(Self {
            settings: Arc::new(settings),
            orchestrator,
            dispatcher,
            workers,
            queue,
            redis_pool,
            postgres_pool,
            start_time: Instant::now(),
        })
    }
}
