pub mod loader;
pub mod models;
pub mod sources;

pub use loader::{
    ConfigLoad, ConfigLoadError, ConfigLoader, ConfigLoaderOptions,
    ConfigWarnings, duration_ms,
};
pub use models::{
    Config, ConfigMetadata, DatabaseConfig, NotificationConfig, RedisConfig,
};
