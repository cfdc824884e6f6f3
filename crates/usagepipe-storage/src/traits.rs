//! Storage abstraction trait
//!
//! This module defines the Storage trait that all blob backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Stream of blob chunks returned by [`Storage::download_stream`]
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Reader consumed by [`Storage::upload_stream`]
pub type ByteReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Storage abstraction trait
///
/// Uploaded usage files are stored as opaque blobs addressed by a storage key.
/// Keys are tenant-scoped (see the `keys` module); backends reject keys containing
/// `..` or a leading `/`.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store the reader's content under `storage_key` and return the number of bytes written.
    ///
    /// The blob becomes visible under its key only once it is fully written, so a
    /// failed upload never leaves a truncated blob behind.
    async fn upload_stream(&self, storage_key: &str, reader: ByteReader) -> StorageResult<u64>;

    /// Download a blob as a stream of chunks
    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream>;

    /// Delete a blob. Deleting a missing blob succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Check if a blob exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Get the size in bytes of a blob, if it exists.
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Short backend name used in logs
    fn backend_name(&self) -> &'static str;
}

/// Reject keys that could escape the storage root.
pub(crate) fn check_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty() || storage_key.contains("..") || storage_key.starts_with('/') {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}
