use once_cell::sync::Lazy;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use url::Url;

use herald_core::orchestration::{
    ConsumerConfig, PipelineConfig, ProducerConfig,
};

use super::{
    models::{
        Config, ConfigMetadata, DatabaseConfig, NotificationConfig,
        RedisConfig,
    },
    sources::{EnvConfig, FileConfig, parse_bool},
};

static DEFAULT_CONFIG_LOCATIONS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    vec![
        PathBuf::from("herald.toml"),
        PathBuf::from("config/herald.toml"),
    ]
});

pub const DEFAULT_NOTIFICATION_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Default, Clone)]
pub struct ConfigLoaderOptions {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
}

/// Layers `.env`, an optional TOML file and the process environment.
/// Environment values win over the file.
#[derive(Debug, Default)]
pub struct ConfigLoader {
    options: ConfigLoaderOptions,
}

#[derive(Debug)]
pub struct ConfigLoad {
    pub config: Config,
    pub warnings: ConfigWarnings,
}

#[derive(Debug, Default, Clone)]
pub struct ConfigWarnings(Vec<String>);

impl ConfigWarnings {
    pub fn push(&mut self, warning: impl Into<String>) {
        self.0.push(warning.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: ConfigLoaderOptions) -> Self {
        Self { options }
    }

    pub fn with_config_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn with_env_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.options.env_file = Some(path.into());
        self
    }

    pub fn load(&self) -> Result<ConfigLoad, ConfigLoadError> {
        let env_file_loaded = match &self.options.env_file {
            Some(path) => dotenvy::from_path(path).map(|_| true).or_else(
                |err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                },
            )?,
            None => {
                dotenvy::dotenv().map(|_| true).or_else(|err| match err {
                    dotenvy::Error::Io(_) => Ok(false),
                    _ => Err(err),
                })?
            }
        };

        self.load_from(EnvConfig::gather(), env_file_loaded)
    }

    /// Resolves configuration from an already gathered environment.
    pub fn load_from(
        &self,
        env: EnvConfig,
        env_file_loaded: bool,
    ) -> Result<ConfigLoad, ConfigLoadError> {
        let mut warnings = ConfigWarnings::default();
        let (file_config, config_path) =
            self.load_file_config(&env, &mut warnings)?;

        if config_path.is_none() {
            warnings.push(
                "No herald.toml detected; using environment variables only",
            );
        }

        let config = compose_config(
            file_config.unwrap_or_default(),
            env,
            ConfigMetadata {
                config_path,
                env_file_loaded,
            },
        )?;

        Ok(ConfigLoad { config, warnings })
    }

    fn load_file_config(
        &self,
        env: &EnvConfig,
        warnings: &mut ConfigWarnings,
    ) -> Result<(Option<FileConfig>, Option<PathBuf>), ConfigLoadError> {
        let path = if let Some(explicit) = &self.options.config_path {
            if !explicit.exists() {
                return Err(ConfigLoadError::MissingConfig {
                    path: explicit.clone(),
                });
            }
            explicit.clone()
        } else if let Some(from_env) = &env.config_path {
            if !from_env.exists() {
                warnings.push(format!(
                    "HERALD_CONFIG points at missing file {}",
                    from_env.display()
                ));
                return Ok((None, None));
            }
            from_env.clone()
        } else {
            match DEFAULT_CONFIG_LOCATIONS
                .iter()
                .find(|candidate| candidate.exists())
            {
                Some(found) => found.clone(),
                None => return Ok((None, None)),
            }
        };

        let file_config = read_file_config(&path)?;
        Ok((Some(file_config), Some(path)))
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig, ConfigLoadError> {
    let contents =
        fs::read_to_string(path).map_err(|err| ConfigLoadError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
    toml::from_str(&contents).map_err(|err| ConfigLoadError::Parse {
        path: path.to_path_buf(),
        source: err,
    })
}

fn compose_config(
    file: FileConfig,
    env: EnvConfig,
    metadata: ConfigMetadata,
) -> Result<Config, ConfigLoadError> {
    let FileConfig {
        database: file_database,
        redis: file_redis,
        notification: file_notification,
        pipeline: file_pipeline,
        retry: file_retry,
    } = file;

    let database = DatabaseConfig {
        url: env.database_url.or(file_database.url).ok_or(
            ConfigLoadError::MissingValue {
                key: "DATABASE_URL",
            },
        )?,
    };

    let redis = env
        .redis_url
        .or_else(|| file_redis.map(|r| r.url))
        .map(|url| RedisConfig { url });

    let notification = match env.notification_url.or(file_notification.url) {
        Some(raw) => {
            let url = Url::parse(&raw).map_err(|source| {
                ConfigLoadError::InvalidUrl {
                    key: "NOTIFICATION_SERVICE_URL",
                    source,
                }
            })?;
            let timeout = parse_duration(
                "NOTIFICATION_TIMEOUT",
                env.notification_timeout.or(file_notification.timeout),
            )?
            .unwrap_or(DEFAULT_NOTIFICATION_TIMEOUT);
            Some(NotificationConfig { url, timeout })
        }
        None => None,
    };

    let defaults = ProducerConfig::default();
    let interval = parse_duration(
        "PRODUCER_INTERVAL",
        env.producer_interval.or(file_pipeline.producer_interval),
    )?;
    let lease = parse_duration("lease", file_pipeline.lease)?;

    let pipeline = PipelineConfig {
        producer: ProducerConfig {
            interval_ms: interval
                .map(duration_ms)
                .unwrap_or(defaults.interval_ms),
            claim_batch_size: parse_value(
                "CLAIM_BATCH_SIZE",
                env.claim_batch_size,
            )?
            .or(file_pipeline.claim_batch_size)
                .unwrap_or(defaults.claim_batch_size),
            lease_ms: lease.map(duration_ms).unwrap_or(defaults.lease_ms),
        },
        consumer: ConsumerConfig {
            worker_count: parse_value("WORKER_COUNT", env.worker_count)?
                .or(file_pipeline.worker_count)
                .unwrap_or_else(|| ConsumerConfig::default().worker_count),
        },
        retry: file_retry.unwrap_or_default(),
        topic_capacity: parse_value("TOPIC_CAPACITY", env.topic_capacity)?
            .or(file_pipeline.topic_capacity)
            .unwrap_or(PipelineConfig::DEFAULT_TOPIC_CAPACITY),
    };

    let processing_enabled = env
        .processing_enabled
        .map(|value| {
            parse_bool(&value).ok_or(ConfigLoadError::InvalidValue {
                key: "MESSAGE_PROCESSING_ENABLED",
                value,
            })
        })
        .transpose()?
        .or(file_pipeline.processing_enabled)
        .unwrap_or(true);

    Ok(Config {
        database,
        redis,
        notification,
        pipeline,
        processing_enabled,
        metadata,
    })
}

fn parse_value<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<T>, ConfigLoadError> {
    raw.map(|value| {
        value
            .trim()
            .parse()
            .map_err(|_| ConfigLoadError::InvalidValue { key, value })
    })
    .transpose()
}

/// Whole milliseconds, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse_duration(
    key: &'static str,
    raw: Option<String>,
) -> Result<Option<Duration>, ConfigLoadError> {
    raw.map(|value| {
        humantime::parse_duration(value.trim()).map_err(|source| {
            ConfigLoadError::InvalidDuration { key, value, source }
        })
    })
    .transpose()
}

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("configuration file missing: {path}")]
    MissingConfig { path: PathBuf },
    #[error("failed to read configuration {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{key} is not set")]
    MissingValue { key: &'static str },
    #[error("invalid URL in {key}")]
    InvalidUrl {
        key: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid duration '{value}' in {key}")]
    InvalidDuration {
        key: &'static str,
        value: String,
        #[source]
        source: humantime::DurationError,
    },
    #[error("invalid value '{value}' in {key}")]
    InvalidValue { key: &'static str, value: String },
    #[error(transparent)]
    EnvFile(#[from] dotenvy::Error),
}
