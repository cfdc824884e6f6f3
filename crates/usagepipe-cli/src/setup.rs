//! Service wiring
//!
//! Builds the store, schema source and the two periodic services from a
//! [`UsageConfig`]. A failed schema load disables publishing only; the retention
//! sweeper is built regardless.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use usagepipe_core::{DecodedRecord, SchemaSourceKind, StoreBackend, UsageConfig};
use usagepipe_db::{setup_database, MemoryUsageFileStore, PgUsageFileStore, UsageFileStore};
use usagepipe_schema::{
    DirectorySchemaSource, RegistrySchemaSource, SchemaSource, StreamSchemaCache,
};
use usagepipe_storage::{LocalStorage, MemoryStorage, Storage};
use usagepipe_worker::{EventSink, FileRetrievalWorker, PublisherExecutor, RetentionSweeper};

pub struct Backends {
    pub store: Arc<dyn UsageFileStore>,
    /// Set when any configured component lives in Postgres.
    pub pool: Option<PgPool>,
}

pub async fn connect_pool(config: &UsageConfig) -> Result<PgPool> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is not set")?;
    setup_database(url, config.db_max_connections, config.db_timeout_seconds).await
}

pub async fn connect_backends(config: &UsageConfig) -> Result<Backends> {
    let needs_pool = config.store_backend == StoreBackend::Postgres
        || config.schema_source == SchemaSourceKind::Registry;
    let pool = if needs_pool {
        Some(connect_pool(config).await?)
    } else {
        None
    };

    let store: Arc<dyn UsageFileStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let storage: Arc<dyn Storage> = Arc::new(
                LocalStorage::new(&config.local_storage_path)
                    .await
                    .context("Failed to initialize local storage")?,
            );
            let pool = pool.clone().context("Postgres store requires a database pool")?;
            tracing::info!(
                storage = storage.backend_name(),
                path = %config.local_storage_path.display(),
                "Using postgres usage file store"
            );
            Arc::new(PgUsageFileStore::new(pool, storage))
        }
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory usage file store; uploads do not survive a restart");
            Arc::new(MemoryUsageFileStore::new(Arc::new(MemoryStorage::new())))
        }
    };

    Ok(Backends { store, pool })
}

pub fn schema_source(config: &UsageConfig, pool: Option<&PgPool>) -> Result<Arc<dyn SchemaSource>> {
    Ok(match config.schema_source {
        SchemaSourceKind::Directory => {
            tracing::info!(dir = %config.schema_dir.display(), "Reading stream definitions from directory");
            Arc::new(DirectorySchemaSource::new(&config.schema_dir))
        }
        SchemaSourceKind::Registry => {
            let pool = pool.context("Registry schema source requires a database pool")?;
            tracing::info!("Reading stream definitions from registry");
            Arc::new(RegistrySchemaSource::new(pool.clone()))
        }
    })
}

pub struct Pipeline {
    pub executor: Arc<PublisherExecutor>,
    pub sweeper: Arc<RetentionSweeper>,
}

pub async fn build_pipeline(
    config: &UsageConfig,
    store: Arc<dyn UsageFileStore>,
    source: Arc<dyn SchemaSource>,
    sink: Arc<dyn EventSink>,
) -> Pipeline {
    let cache = Arc::new(StreamSchemaCache::with_required(
        source,
        config.required_streams.clone(),
    ));

    let executor = match cache.warm().await {
        Ok(streams) => {
            tracing::info!(
                streams,
                pool_size = config.worker_threads,
                sink = sink.sink_name(),
                "Usage publishing enabled"
            );
            let worker = Arc::new(
                FileRetrievalWorker::new(store.clone(), cache, sink, config.file_deadline)
                    .with_retry_policy(config.retry)
                    .with_max_archive_entry_bytes(config.max_archive_entry_bytes),
            );
            PublisherExecutor::new(store.clone(), worker, config.worker_threads)
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                error_code = e.error_code(),
                "Usage publishing disabled, stream schemas could not be loaded"
            );
            PublisherExecutor::disabled(e.to_string())
        }
    };

    if !config.retention_enabled() {
        tracing::info!("USAGE_FILE_RETENTION_DAYS not set, processed files are kept");
    }
    let sweeper = RetentionSweeper::new(store, config.file_retention_days);

    Pipeline {
        executor: Arc::new(executor),
        sweeper: Arc::new(sweeper),
    }
}

/// Drain a channel sink's receiver into another sink until every sender is gone.
pub fn forward_events<S>(mut rx: mpsc::Receiver<DecodedRecord>, sink: S) -> JoinHandle<()>
where
    S: EventSink + 'static,
{
    tokio::spawn(async move {
        while let Some(record) = rx.recv().await {
            if let Err(e) = sink.publish(record).await {
                tracing::error!(error = %e, sink = sink.sink_name(), "Failed to forward usage event");
            }
        }
        tracing::debug!("Usage event forwarder stopped");
    })
}
