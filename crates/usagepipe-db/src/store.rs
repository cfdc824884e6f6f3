//! Usage file store abstraction
//!
//! [`UsageFileStore`] is the persistence boundary of the pipeline: it owns uploaded-file
//! records and their blobs. Implementations must support concurrent callers; every
//! per-file operation is a single-record mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use usagepipe_core::{FileKey, NewUpload, PipelineError, PipelineResult, UploadedFileRecord};
use usagepipe_storage::{ByteReader, ByteStream, Storage, StorageError};

#[async_trait]
pub trait UsageFileStore: Send + Sync {
    /// Up to `limit` PENDING records that are due for processing, oldest upload first.
    /// Records waiting out a retry backoff are skipped.
    async fn list_pending_files(&self, limit: usize) -> PipelineResult<Vec<UploadedFileRecord>>;

    /// Move a record to PROCESSED. A record that is already PROCESSED is left untouched.
    async fn mark_processed(&self, key: &FileKey) -> PipelineResult<()>;

    /// Count one failed attempt against a PENDING record and keep `error` as its last
    /// error. With `retry_at` the record stays PENDING and is not listed before that
    /// time; without it the record moves to FAILED.
    async fn record_failure(
        &self,
        key: &FileKey,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> PipelineResult<()>;

    /// Return a FAILED record to PENDING with a fresh attempt count. Returns whether a
    /// record was requeued.
    async fn requeue(&self, key: &FileKey) -> PipelineResult<bool>;

    /// Up to `limit` FAILED records, oldest upload first.
    async fn list_failed_files(&self, limit: usize) -> PipelineResult<Vec<UploadedFileRecord>>;

    /// Delete PROCESSED records (and their blobs) uploaded strictly before `cutoff`.
    /// PENDING records are never deleted. Returns the number of records removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PipelineResult<u64>;

    /// Store an upload's content and register it as PENDING.
    ///
    /// The record only becomes visible once its blob is fully stored.
    async fn persist_upload(
        &self,
        upload: NewUpload,
        content: ByteReader,
    ) -> PipelineResult<UploadedFileRecord>;

    /// Stream the stored content of a record.
    async fn open_content(&self, record: &UploadedFileRecord) -> PipelineResult<ByteStream>;

    async fn get_file(&self, key: &FileKey) -> PipelineResult<Option<UploadedFileRecord>>;

    /// Number of PENDING records, including those waiting out a retry backoff.
    async fn count_pending(&self) -> PipelineResult<u64>;
}

/// Map a blob failure while reading a record's content.
///
/// A missing blob means the record is corrupt; each pass that reads it counts a failed
/// attempt until the record is parked as FAILED.
pub(crate) fn content_error(record: &UploadedFileRecord, err: StorageError) -> PipelineError {
    match err {
        StorageError::NotFound(_) | StorageError::InvalidKey(_) => PipelineError::file_read(
            record.file_name.clone(),
            format!("stored content missing or unreadable: {}", err),
        ),
        other => PipelineError::StorageUnavailable(other.to_string()),
    }
}

pub(crate) async fn open_blob(
    storage: &Arc<dyn Storage>,
    record: &UploadedFileRecord,
) -> PipelineResult<ByteStream> {
    storage
        .download_stream(&record.storage_key)
        .await
        .map_err(|e| content_error(record, e))
}

/// Write an upload's blob, returning its size.
pub(crate) async fn write_blob(
    storage: &Arc<dyn Storage>,
    storage_key: &str,
    content: ByteReader,
) -> PipelineResult<u64> {
    storage
        .upload_stream(storage_key, content)
        .await
        .map_err(|e| PipelineError::StorageUnavailable(e.to_string()))
}

/// Best-effort blob removal; failures leave an orphaned blob and are only logged.
pub(crate) async fn remove_blob(storage: &Arc<dyn Storage>, storage_key: &str) {
    match storage.delete(storage_key).await {
        Ok(_) => {
            tracing::debug!(storage_key = %storage_key, "Successfully deleted from storage");
        }
        Err(e) => {
            tracing::error!(
                error = %e,
                storage_key = %storage_key,
                "Failed to delete file from storage"
            );
        }
    }
}
