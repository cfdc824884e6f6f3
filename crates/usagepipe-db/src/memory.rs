//! In-memory usage file store
//!
//! Keeps records in a process-local map and content in any blob [`Storage`]. Used by
//! tests and by ephemeral runs (`STORE_BACKEND=memory`); nothing survives a restart.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use usagepipe_core::{
    FileKey, FileState, NewUpload, PipelineError, PipelineResult, UploadedFileRecord,
};
use usagepipe_storage::{generate_storage_key, ByteReader, ByteStream, MemoryStorage, Storage};

use crate::store::{open_blob, remove_blob, write_blob, UsageFileStore};

#[derive(Clone)]
pub struct MemoryUsageFileStore {
    records: Arc<Mutex<HashMap<FileKey, UploadedFileRecord>>>,
    storage: Arc<dyn Storage>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryUsageFileStore {
    fn default() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }
}

impl MemoryUsageFileStore {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            storage,
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate a connectivity outage: while unavailable every operation fails with
    /// `StorageUnavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<FileKey, UploadedFileRecord>> {
        self.records.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn oldest_first<F>(&self, limit: usize, filter: F) -> Vec<UploadedFileRecord>
    where
        F: Fn(&UploadedFileRecord) -> bool,
    {
        let mut selected: Vec<UploadedFileRecord> =
            self.lock().values().filter(|r| filter(r)).cloned().collect();
        selected.sort_by(|a, b| {
            a.uploaded_at
                .cmp(&b.uploaded_at)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        selected.truncate(limit);
        selected
    }

    fn check_available(&self) -> PipelineResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(PipelineError::StorageUnavailable(
                "in-memory store marked unavailable".to_string(),
            ))
        }
    }
}

#[async_trait]
impl UsageFileStore for MemoryUsageFileStore {
    async fn list_pending_files(&self, limit: usize) -> PipelineResult<Vec<UploadedFileRecord>> {
        self.check_available()?;
        let now = Utc::now();
        Ok(self.oldest_first(limit, |r| {
            r.state == FileState::Pending && r.next_attempt_at.map_or(true, |at| at <= now)
        }))
    }

    async fn record_failure(
        &self,
        key: &FileKey,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> PipelineResult<()> {
        self.check_available()?;
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) if record.state == FileState::Pending => {
                record.attempts += 1;
                record.last_error = Some(error.to_string());
                record.next_attempt_at = retry_at;
                if retry_at.is_none() {
                    record.state = FileState::Failed;
                }
            }
            _ => {
                tracing::debug!(file = %key, "File no longer pending, failure not recorded");
            }
        }
        Ok(())
    }

    async fn requeue(&self, key: &FileKey) -> PipelineResult<bool> {
        self.check_available()?;
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) if record.state == FileState::Failed => {
                record.state = FileState::Pending;
                record.attempts = 0;
                record.last_error = None;
                record.next_attempt_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_failed_files(&self, limit: usize) -> PipelineResult<Vec<UploadedFileRecord>> {
        self.check_available()?;
        Ok(self.oldest_first(limit, |r| r.state == FileState::Failed))
    }

    async fn mark_processed(&self, key: &FileKey) -> PipelineResult<()> {
        self.check_available()?;
        let mut records = self.lock();
        match records.get_mut(key) {
            Some(record) if record.state == FileState::Pending => {
                record.state = FileState::Processed;
                record.processed_at = Some(Utc::now());
                tracing::debug!(file = %key, "File marked processed");
            }
            Some(_) => {
                tracing::debug!(file = %key, "File already processed, nothing to update");
            }
            None => {
                tracing::debug!(file = %key, "Unknown file, nothing to update");
            }
        }
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PipelineResult<u64> {
        self.check_available()?;
        let removed: Vec<UploadedFileRecord> = {
            let mut records = self.lock();
            let expired: Vec<FileKey> = records
                .values()
                .filter(|r| r.state == FileState::Processed && r.uploaded_at < cutoff)
                .map(UploadedFileRecord::key)
                .collect();
            expired
                .iter()
                .filter_map(|key| records.remove(key))
                .collect()
        };

        for record in &removed {
            remove_blob(&self.storage, &record.storage_key).await;
        }

        Ok(removed.len() as u64)
    }

    async fn persist_upload(
        &self,
        upload: NewUpload,
        content: ByteReader,
    ) -> PipelineResult<UploadedFileRecord> {
        self.check_available()?;
        let key = upload.key();
        if self.lock().contains_key(&key) {
            return Err(PipelineError::DuplicateUpload {
                tenant_id: upload.tenant_id,
                file_name: upload.file_name,
            });
        }

        let id = Uuid::new_v4();
        let storage_key = generate_storage_key(&upload.tenant_id, id, &upload.file_name);
        let content_length = write_blob(&self.storage, &storage_key, content).await?;

        let record = UploadedFileRecord {
            id,
            tenant_id: upload.tenant_id,
            file_name: upload.file_name,
            uploaded_at: upload.uploaded_at,
            state: FileState::Pending,
            storage_key,
            content_length: content_length as i64,
            created_at: Utc::now(),
            processed_at: None,
            attempts: 0,
            last_error: None,
            next_attempt_at: None,
        };

        let inserted = {
            let mut records = self.lock();
            if records.contains_key(&key) {
                false
            } else {
                records.insert(key.clone(), record.clone());
                true
            }
        };
        if !inserted {
            // Lost a race with a concurrent upload of the same file.
            remove_blob(&self.storage, &record.storage_key).await;
            return Err(PipelineError::DuplicateUpload {
                tenant_id: key.tenant_id,
                file_name: key.file_name,
            });
        }
        Ok(record)
    }

    async fn open_content(&self, record: &UploadedFileRecord) -> PipelineResult<ByteStream> {
        self.check_available()?;
        open_blob(&self.storage, record).await
    }

    async fn get_file(&self, key: &FileKey) -> PipelineResult<Option<UploadedFileRecord>> {
        self.check_available()?;
        Ok(self.lock().get(key).cloned())
    }

    async fn count_pending(&self) -> PipelineResult<u64> {
        self.check_available()?;
        Ok(self
            .lock()
            .values()
            .filter(|r| r.state == FileState::Pending)
            .count() as u64)
    }
}
