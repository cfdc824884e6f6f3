use crate::traits::{check_key, ByteReader, ByteStream, Storage, StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

/// Process-local blob storage, for tests and ephemeral runs.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    blobs: Arc<Mutex<HashMap<String, Bytes>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop a blob without going through the trait, e.g. to simulate a lost file.
    pub fn remove(&self, storage_key: &str) -> Option<Bytes> {
        self.lock().remove(storage_key)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        // A poisoned map is still structurally valid.
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload_stream(&self, storage_key: &str, mut reader: ByteReader) -> StorageResult<u64> {
        check_key(storage_key)?;
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .await
            .map_err(|e| StorageError::UploadFailed(format!("Failed to read upload: {}", e)))?;
        let size = data.len() as u64;
        self.lock().insert(storage_key.to_string(), Bytes::from(data));
        Ok(size)
    }

    async fn download_stream(&self, storage_key: &str) -> StorageResult<ByteStream> {
        check_key(storage_key)?;
        let data = self
            .lock()
            .get(storage_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))?;
        Ok(Box::pin(futures::stream::iter(vec![Ok(data)])))
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        check_key(storage_key)?;
        self.lock().remove(storage_key);
        Ok(())
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        check_key(storage_key)?;
        Ok(self.lock().contains_key(storage_key))
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        check_key(storage_key)?;
        self.lock()
            .get(storage_key)
            .map(|data| data.len() as u64)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
