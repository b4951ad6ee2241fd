mod settings;

pub use settings::{
    ApiConfig, DatabaseConfig, OtelConfig, ProviderSettings, QueueConfig, RedisConfig,
    ServerConfig, Settings, StoreConfig, TemplatesConfig, WorkerConfig,
};
