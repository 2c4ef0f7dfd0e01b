//! # Herald
//!
//! Claims pending messages from PostgreSQL, delivers them to the
//! notification service with bounded retries and records each send in Redis.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use clap::{Args as ClapArgs, Parser, Subcommand};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use herald_core::cache::RedisAuditCache;
use herald_core::delivery::HttpNotifier;
use herald_core::model::NewMessage;
use herald_core::orchestration::{MessageConsumer, MessageProducer, Scheduler};
use herald_core::store::{MessageStore, PostgresMessageStore};
use herald_server::infra::{
    config::{
        Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions, duration_ms,
    },
    shutdown::shutdown_signal,
};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "herald")]
#[command(about = "At-least-once delivery of queued messages")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// Path to a herald.toml (overrides HERALD_CONFIG and default locations)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file to load before reading the environment
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Number of delivery workers (overrides config)
    #[arg(long)]
    workers: Option<usize>,

    /// Claim interval, e.g. "30s" (overrides config)
    #[arg(long, value_parser = humantime::parse_duration)]
    interval: Option<Duration>,

    /// Start with claiming paused
    #[arg(long, default_value_t = false)]
    paused: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(subcommand)]
    Db(DbCommand),
    /// Insert a pending message and exit
    Seed(SeedArgs),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(ClapArgs, Debug)]
struct SeedArgs {
    #[arg(long)]
    recipient: String,
    #[arg(long)]
    content: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = load_config(&cli.run)?;

    match cli.command {
        Some(Command::Db(DbCommand::Migrate)) => run_db_migrate(&config).await,
        Some(Command::Seed(args)) => run_seed(&config, args).await,
        None => run_pipeline(config).await,
    }
}

fn load_config(args: &RunArgs) -> anyhow::Result<Config> {
    let ConfigLoad {
        mut config,
        warnings,
    } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
    })
    .load()
    .context("failed to load configuration")?;

    for warning in warnings.iter() {
        warn!("{warning}");
    }
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "loaded configuration file");
    }

    if let Some(workers) = args.workers {
        config.pipeline.consumer.worker_count = workers;
    }
    if let Some(interval) = args.interval {
        config.pipeline.producer.interval_ms = duration_ms(interval);
    }
    if args.paused {
        config.processing_enabled = false;
    }

    Ok(config)
}

async fn connect_database(config: &Config) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(&config.database.url)
        .await
        .context("failed to connect to PostgreSQL")
}

async fn run_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = connect_database(config).await?;
    herald_core::MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;
    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_seed(config: &Config, args: SeedArgs) -> anyhow::Result<()> {
    let pool = connect_database(config).await?;
    let store = PostgresMessageStore::new(pool).await?;
    let message = store
        .insert(NewMessage::pending(args.recipient, args.content))
        .await
        .context("failed to insert message")?;
    info!(message_id = %message.id, "seeded pending message");
    Ok(())
}

async fn run_pipeline(config: Config) -> anyhow::Result<()> {
    let redis = config
        .redis
        .as_ref()
        .ok_or_else(|| anyhow!("REDIS_URL is required to run the pipeline"))?;
    let notification = config.notification.as_ref().ok_or_else(|| {
        anyhow!("NOTIFICATION_SERVICE_URL is required to run the pipeline")
    })?;

    let pool = connect_database(&config).await?;
    let store: Arc<dyn MessageStore> =
        Arc::new(PostgresMessageStore::new(pool).await?);
    let cache = Arc::new(
        RedisAuditCache::new(&redis.url)
            .await
            .context("failed to connect to Redis")?,
    );
    let notifier = Arc::new(HttpNotifier::new(
        notification.url.as_str(),
        notification.timeout,
    )?);

    let pipeline = &config.pipeline;
    let mut scheduler = Scheduler::from_config(pipeline);
    scheduler.switch().set(config.processing_enabled);

    scheduler.add_producer(MessageProducer::new(
        Arc::clone(&store),
        scheduler.switch(),
        pipeline.producer,
    ));
    scheduler.add_consumer(MessageConsumer::new(
        store,
        notifier,
        cache,
        pipeline.retry,
    ));

    info!(
        workers = pipeline.consumer.worker_count,
        interval = ?pipeline.producer.interval(),
        processing_enabled = config.processing_enabled,
        "starting herald"
    );

    scheduler
        .run_until(shutdown_signal(), pipeline.consumer.worker_count)
        .await
        .context("pipeline stopped abnormally")?;

    info!("herald stopped");
    Ok(())
}
