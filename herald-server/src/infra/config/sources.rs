use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use herald_core::retry::RetryConfig;

/// Raw configuration as defined in a TOML file.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct FileConfig {
    #[serde(default)]
    pub database: FileDatabaseConfig,
    pub redis: Option<FileRedisConfig>,
    #[serde(default)]
    pub notification: FileNotificationConfig,
    #[serde(default)]
    pub pipeline: FilePipelineConfig,
    pub retry: Option<RetryConfig>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileDatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileRedisConfig {
    pub url: String,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FileNotificationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// humantime, e.g. `"10s"`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct FilePipelineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer_interval: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lease: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_batch_size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic_capacity: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_enabled: Option<bool>,
}

/// Environment-derived configuration values.
///
/// Values stay raw here; the loader parses them so a typo is reported
/// instead of silently falling back to the default.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
    pub config_path: Option<PathBuf>,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub notification_url: Option<String>,
    pub notification_timeout: Option<String>,
    pub producer_interval: Option<String>,
    pub claim_batch_size: Option<String>,
    pub worker_count: Option<String>,
    pub topic_capacity: Option<String>,
    pub processing_enabled: Option<String>,
}

impl EnvConfig {
    pub fn gather() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            config_path: non_empty("HERALD_CONFIG").map(PathBuf::from),
            database_url: non_empty("DATABASE_URL"),
            redis_url: non_empty("REDIS_URL"),
            notification_url: non_empty("NOTIFICATION_SERVICE_URL"),
            notification_timeout: non_empty("NOTIFICATION_TIMEOUT"),
            producer_interval: non_empty("PRODUCER_INTERVAL"),
            claim_batch_size: non_empty("CLAIM_BATCH_SIZE"),
            worker_count: non_empty("WORKER_COUNT"),
            topic_capacity: non_empty("TOPIC_CAPACITY"),
            processing_enabled: non_empty("MESSAGE_PROCESSING_ENABLED"),
        }
    }
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn lookup_feeds_every_key() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("DATABASE_URL", "postgres://localhost/herald"),
            ("CLAIM_BATCH_SIZE", " 8 "),
            ("WORKER_COUNT", "not-a-number"),
            ("MESSAGE_PROCESSING_ENABLED", "off"),
            ("REDIS_URL", ""),
        ]);
        let env = EnvConfig::from_lookup(|key| {
            vars.get(key).map(|v| v.to_string())
        });

        assert_eq!(
            env.database_url.as_deref(),
            Some("postgres://localhost/herald")
        );
        assert_eq!(env.claim_batch_size.as_deref(), Some(" 8 "));
        assert_eq!(env.worker_count.as_deref(), Some("not-a-number"));
        assert_eq!(env.processing_enabled.as_deref(), Some("off"));
        assert_eq!(env.redis_url, None);
    }

    #[test]
    fn bool_spellings() {
        assert_eq!(parse_bool(" ON "), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
