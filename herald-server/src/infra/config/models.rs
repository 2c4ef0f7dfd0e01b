use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use herald_core::orchestration::PipelineConfig;

/// Fully resolved service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub redis: Option<RedisConfig>,
    pub notification: Option<NotificationConfig>,
    pub pipeline: PipelineConfig,
    pub processing_enabled: bool,
    pub metadata: ConfigMetadata,
}

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: String,
}

// keep credentials out of logs
impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct RedisConfig {
    pub url: String,
}

impl std::fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisConfig")
            .field("url", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct NotificationConfig {
    pub url: Url,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigMetadata {
    pub config_path: Option<PathBuf>,
    pub env_file_loaded: bool,
}
