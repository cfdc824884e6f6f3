use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres};
use std::sync::Arc;
use uuid::Uuid;

use usagepipe_core::{
    FileKey, FileState, NewUpload, PipelineError, PipelineResult, UploadedFileRecord,
};
use usagepipe_storage::{generate_storage_key, ByteReader, ByteStream, Storage};

use crate::store::{open_blob, remove_blob, write_blob, UsageFileStore};

const RECORD_COLUMNS: &str = r#"
    id,
    tenant_id,
    file_name,
    uploaded_at,
    state,
    storage_key,
    content_length,
    created_at,
    processed_at,
    attempts,
    last_error,
    next_attempt_at
"#;

/// Postgres unique_violation
const UNIQUE_VIOLATION: &str = "23505";

/// Usage file store with metadata in Postgres and content in a blob [`Storage`].
#[derive(Clone)]
pub struct PgUsageFileStore {
    pool: PgPool,
    storage: Arc<dyn Storage>,
}

impl PgUsageFileStore {
    pub fn new(pool: PgPool, storage: Arc<dyn Storage>) -> Self {
        Self { pool, storage }
    }

    async fn insert_record(
        &self,
        id: Uuid,
        upload: &NewUpload,
        storage_key: &str,
        content_length: u64,
    ) -> PipelineResult<UploadedFileRecord> {
        let sql = format!(
            r#"
            INSERT INTO uploaded_usage_files (
                id, tenant_id, file_name, uploaded_at, state, storage_key, content_length
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            RECORD_COLUMNS
        );

        sqlx::query_as::<Postgres, UploadedFileRecord>(&sql)
            .bind(id)
            .bind(&upload.tenant_id)
            .bind(&upload.file_name)
            .bind(upload.uploaded_at)
            .bind(FileState::Pending.as_str())
            .bind(storage_key)
            .bind(content_length as i64)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                let duplicate = matches!(
                    &e,
                    sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION)
                );
                if duplicate {
                    PipelineError::DuplicateUpload {
                        tenant_id: upload.tenant_id.clone(),
                        file_name: upload.file_name.clone(),
                    }
                } else {
                    PipelineError::from(e)
                }
            })
    }
}

#[async_trait]
impl UsageFileStore for PgUsageFileStore {
    #[tracing::instrument(skip(self))]
    async fn list_pending_files(&self, limit: usize) -> PipelineResult<Vec<UploadedFileRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM uploaded_usage_files
            WHERE state = $1 AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY uploaded_at ASC, created_at ASC
            LIMIT $2
            "#,
            RECORD_COLUMNS
        );

        let records = sqlx::query_as::<Postgres, UploadedFileRecord>(&sql)
            .bind(FileState::Pending.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self, error), fields(file = %key))]
    async fn record_failure(
        &self,
        key: &FileKey,
        error: &str,
        retry_at: Option<DateTime<Utc>>,
    ) -> PipelineResult<()> {
        let next_state = if retry_at.is_some() {
            FileState::Pending
        } else {
            FileState::Failed
        };

        let result = sqlx::query(
            r#"
            UPDATE uploaded_usage_files
            SET attempts = attempts + 1,
                last_error = $3,
                next_attempt_at = $4,
                state = $5
            WHERE tenant_id = $1 AND file_name = $2 AND state = $6
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.file_name)
        .bind(error)
        .bind(retry_at)
        .bind(next_state.as_str())
        .bind(FileState::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(file = %key, "File no longer pending, failure not recorded");
        }

        Ok(())
    }

    #[tracing::instrument(skip(self), fields(file = %key))]
    async fn requeue(&self, key: &FileKey) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE uploaded_usage_files
            SET state = $3, attempts = 0, last_error = NULL, next_attempt_at = NULL
            WHERE tenant_id = $1 AND file_name = $2 AND state = $4
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.file_name)
        .bind(FileState::Pending.as_str())
        .bind(FileState::Failed.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    #[tracing::instrument(skip(self))]
    async fn list_failed_files(&self, limit: usize) -> PipelineResult<Vec<UploadedFileRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM uploaded_usage_files
            WHERE state = $1
            ORDER BY uploaded_at ASC, created_at ASC
            LIMIT $2
            "#,
            RECORD_COLUMNS
        );

        let records = sqlx::query_as::<Postgres, UploadedFileRecord>(&sql)
            .bind(FileState::Failed.as_str())
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        Ok(records)
    }

    #[tracing::instrument(skip(self), fields(file = %key))]
    async fn mark_processed(&self, key: &FileKey) -> PipelineResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE uploaded_usage_files
            SET state = $3, processed_at = NOW()
            WHERE tenant_id = $1 AND file_name = $2 AND state = $4
            "#,
        )
        .bind(&key.tenant_id)
        .bind(&key.file_name)
        .bind(FileState::Processed.as_str())
        .bind(FileState::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            tracing::debug!(file = %key, "File already processed or unknown, nothing to update");
        } else {
            tracing::debug!(file = %key, "File marked processed");
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> PipelineResult<u64> {
        let storage_keys: Vec<String> = sqlx::query_scalar(
            r#"
            DELETE FROM uploaded_usage_files
            WHERE state = $1 AND uploaded_at < $2
            RETURNING storage_key
            "#,
        )
        .bind(FileState::Processed.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        for storage_key in &storage_keys {
            remove_blob(&self.storage, storage_key).await;
        }

        let count = storage_keys.len() as u64;
        if count > 0 {
            tracing::info!(count, cutoff = %cutoff, "Deleted processed usage files");
        }

        Ok(count)
    }

    #[tracing::instrument(skip(self, content), fields(file = %upload.key()))]
    async fn persist_upload(
        &self,
        upload: NewUpload,
        content: ByteReader,
    ) -> PipelineResult<UploadedFileRecord> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM uploaded_usage_files WHERE tenant_id = $1 AND file_name = $2
            )
            "#,
        )
        .bind(&upload.tenant_id)
        .bind(&upload.file_name)
        .fetch_one(&self.pool)
        .await?;

        if exists {
            return Err(PipelineError::DuplicateUpload {
                tenant_id: upload.tenant_id,
                file_name: upload.file_name,
            });
        }

        let id = Uuid::new_v4();
        let storage_key = generate_storage_key(&upload.tenant_id, id, &upload.file_name);
        let content_length = write_blob(&self.storage, &storage_key, content).await?;

        match self.insert_record(id, &upload, &storage_key, content_length).await {
            Ok(record) => {
                tracing::info!(
                    file = %record.key(),
                    record_id = %record.id,
                    size_bytes = content_length,
                    "Usage file upload registered"
                );
                Ok(record)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    storage_key = %storage_key,
                    "Failed to register upload, removing stored content"
                );
                remove_blob(&self.storage, &storage_key).await;
                Err(e)
            }
        }
    }

    async fn open_content(&self, record: &UploadedFileRecord) -> PipelineResult<ByteStream> {
        open_blob(&self.storage, record).await
    }

    #[tracing::instrument(skip(self), fields(file = %key))]
    async fn get_file(&self, key: &FileKey) -> PipelineResult<Option<UploadedFileRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM uploaded_usage_files
            WHERE tenant_id = $1 AND file_name = $2
            "#,
            RECORD_COLUMNS
        );

        let record = sqlx::query_as::<Postgres, UploadedFileRecord>(&sql)
            .bind(&key.tenant_id)
            .bind(&key.file_name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(record)
    }

    async fn count_pending(&self) -> PipelineResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*)::bigint FROM uploaded_usage_files WHERE state = $1")
                .bind(FileState::Pending.as_str())
                .fetch_one(&self.pool)
                .await?;

        Ok(count.max(0) as u64)
    }
}
