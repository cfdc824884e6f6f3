//! usagepipe: publishes uploaded usage files and keeps their storage bounded.
//!
//! Configuration comes from the environment (and `.env`); see `UsageConfig`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use usagepipe_cli::{
    build_pipeline, connect_backends, connect_pool, file_table, forward_events, schema_source,
};
use usagepipe_core::{FileKey, NewUpload, UsageConfig};
use usagepipe_infra::{init_telemetry, shutdown_telemetry, LogFormat};
use usagepipe_schema::{RegistrySchemaSource, StreamDefinition};
use usagepipe_storage::ByteReader;
use usagepipe_worker::{ChannelSink, LogSink};

#[derive(Parser)]
#[command(name = "usagepipe", version, about = "Uploaded usage file pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the publisher and the retention sweeper until interrupted
    Run,
    /// Store a usage file for a tenant and queue it for publishing
    Upload {
        /// Tenant that produced the file
        #[arg(long)]
        tenant: String,
        /// Path to the usage file
        file: PathBuf,
        /// Stored file name; defaults to the file's own name
        #[arg(long)]
        name: Option<String>,
    },
    /// List files waiting to be published, oldest first
    Pending {
        /// Maximum number of files
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Output format: json or table
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// List files parked after using up their processing attempts
    Failed {
        /// Maximum number of files
        #[arg(long, default_value = "50")]
        limit: usize,
        /// Output format: json or table
        #[arg(long, default_value = "table")]
        format: String,
    },
    /// Return a failed file to the pending queue with a fresh attempt count
    Requeue {
        /// Tenant that owns the file
        #[arg(long)]
        tenant: String,
        /// Stored file name
        name: String,
    },
    /// Run one retention sweep now
    Sweep,
    /// Register stream definition files in the schema registry
    RegisterSchema {
        /// JSON definition files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let log_format = std::env::var("LOG_FORMAT")
        .ok()
        .and_then(|v| v.parse::<LogFormat>().ok())
        .unwrap_or_default();
    init_telemetry("usagepipe", env!("CARGO_PKG_VERSION"), log_format)?;

    let cli = Cli::parse();
    let config = UsageConfig::from_env().context("Invalid configuration")?;

    let result = match cli.command {
        Commands::Run => run(config).await,
        Commands::Upload { tenant, file, name } => upload(config, tenant, file, name).await,
        Commands::Pending { limit, format } => pending(config, limit, &format).await,
        Commands::Failed { limit, format } => failed(config, limit, &format).await,
        Commands::Requeue { tenant, name } => requeue(config, tenant, name).await,
        Commands::Sweep => sweep(config).await,
        Commands::RegisterSchema { files } => register_schema(config, files).await,
    };

    shutdown_telemetry().await;
    result
}

async fn run(config: UsageConfig) -> Result<()> {
    let backends = connect_backends(&config).await?;
    let source = schema_source(&config, backends.pool.as_ref())?;

    let (sink, events) = ChannelSink::channel(config.sink_buffer);
    let forwarder = forward_events(events, LogSink);

    let pipeline = build_pipeline(&config, backends.store, source, Arc::new(sink)).await;

    let token = CancellationToken::new();
    let publisher = pipeline
        .executor
        .clone()
        .start(config.publish_interval, token.clone());
    let sweeper = pipeline
        .sweeper
        .clone()
        .start(config.cleanup_interval, token.clone());

    tracing::info!(
        publish_interval_secs = config.publish_interval.as_secs(),
        cleanup_interval_secs = config.cleanup_interval.as_secs(),
        retention_days = ?config.file_retention_days,
        "usagepipe started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received");

    token.cancel();
    pipeline.executor.shutdown();
    let _ = publisher.await;
    let _ = sweeper.await;

    // The forwarder ends once every in-flight worker has dropped its sink handle.
    drop(pipeline);
    if tokio::time::timeout(std::time::Duration::from_secs(5), forwarder)
        .await
        .is_err()
    {
        tracing::warn!("Usage event forwarder did not drain in time");
    }

    tracing::info!("usagepipe stopped");
    Ok(())
}

async fn upload(
    config: UsageConfig,
    tenant: String,
    file: PathBuf,
    name: Option<String>,
) -> Result<()> {
    let file_name = match name {
        Some(name) => name,
        None => file
            .file_name()
            .and_then(|n| n.to_str())
            .map(str::to_string)
            .context("Cannot derive a file name from the path; pass --name")?,
    };
    let upload = NewUpload::new(tenant, file_name)?;

    let content: ByteReader = Box::pin(
        tokio::fs::File::open(&file)
            .await
            .with_context(|| format!("Failed to open {}", file.display()))?,
    );

    let backends = connect_backends(&config).await?;
    let record = backends.store.persist_upload(upload, content).await?;

    println!(
        "Stored {} for tenant {} ({} bytes, id {})",
        record.file_name, record.tenant_id, record.content_length, record.id
    );
    Ok(())
}

async fn pending(config: UsageConfig, limit: usize, format: &str) -> Result<()> {
    let backends = connect_backends(&config).await?;
    let records = backends.store.list_pending_files(limit).await?;
    let total = backends.store.count_pending().await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            print!("{}", file_table(&records));
            println!(
                "{} of {} pending file(s) shown; files waiting out a retry are not listed",
                records.len(),
                total
            );
        }
    }
    Ok(())
}

async fn failed(config: UsageConfig, limit: usize, format: &str) -> Result<()> {
    let backends = connect_backends(&config).await?;
    let records = backends.store.list_failed_files(limit).await?;

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&records)?),
        _ => {
            print!("{}", file_table(&records));
            println!("{} failed file(s) shown", records.len());
        }
    }
    Ok(())
}

async fn requeue(config: UsageConfig, tenant: String, name: String) -> Result<()> {
    let backends = connect_backends(&config).await?;
    let key = FileKey::new(tenant, name);
    if backends.store.requeue(&key).await? {
        println!("Requeued {}", key);
    } else {
        println!("{} is not in the failed state; nothing to requeue", key);
    }
    Ok(())
}

async fn sweep(config: UsageConfig) -> Result<()> {
    if !config.retention_enabled() {
        println!("USAGE_FILE_RETENTION_DAYS is not set; nothing to sweep");
        return Ok(());
    }

    let backends = connect_backends(&config).await?;
    let sweeper = usagepipe_worker::RetentionSweeper::new(backends.store, config.file_retention_days);
    let deleted = sweeper.sweep_once(chrono::Utc::now()).await?;
    println!("Deleted {} processed file(s)", deleted);
    Ok(())
}

async fn register_schema(config: UsageConfig, files: Vec<PathBuf>) -> Result<()> {
    let pool = connect_pool(&config).await?;
    let registry = RegistrySchemaSource::new(pool);

    for path in files {
        let data = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let definition = StreamDefinition::from_json(&data)
            .with_context(|| format!("Invalid stream definition in {}", path.display()))?;
        registry.register(&definition).await?;
        println!("Registered {}", definition.stream_key());
    }
    Ok(())
}
