use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::upload_name::validate_upload_name;

/// Processing state of an uploaded usage file.
///
/// Moves Pending -> Processed, or Pending -> Failed once a file has used up its
/// attempts. A failed file is kept until an operator requeues it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Pending,
    Processed,
    Failed,
}

impl FileState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileState::Pending => "pending",
            FileState::Processed => "processed",
            FileState::Failed => "failed",
        }
    }
}

impl Display for FileState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for FileState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileState::Pending),
            "processed" => Ok(FileState::Processed),
            "failed" => Ok(FileState::Failed),
            _ => Err(anyhow::anyhow!("Invalid file state: {}", s)),
        }
    }
}

/// Identifies one uploaded file: names are unique per tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileKey {
    pub tenant_id: String,
    pub file_name: String,
}

impl FileKey {
    pub fn new(tenant_id: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            file_name: file_name.into(),
        }
    }
}

impl Display for FileKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}/{}", self.tenant_id, self.file_name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadedFileRecord {
    pub id: Uuid,
    pub tenant_id: String,
    pub file_name: String,
    /// Creation timestamp encoded in the file name.
    pub uploaded_at: DateTime<Utc>,
    pub state: FileState,
    /// Opaque key of the blob in the storage backend.
    pub storage_key: String,
    pub content_length: i64,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Failed processing attempts so far.
    pub attempts: i32,
    pub last_error: Option<String>,
    /// A pending file is not listed for processing before this time.
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl UploadedFileRecord {
    pub fn key(&self) -> FileKey {
        FileKey::new(self.tenant_id.clone(), self.file_name.clone())
    }

    /// Zip uploads carry the usage data as their first entry.
    pub fn is_archive(&self) -> bool {
        self.file_name.to_ascii_lowercase().ends_with(".zip")
    }
}

#[cfg(feature = "sqlx")]
impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for UploadedFileRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        let state: String = row.try_get("state")?;
        Ok(UploadedFileRecord {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            file_name: row.try_get("file_name")?,
            uploaded_at: row.try_get("uploaded_at")?,
            state: state.parse().map_err(|e: anyhow::Error| sqlx::Error::ColumnDecode {
                index: "state".to_string(),
                source: e.into(),
            })?,
            storage_key: row.try_get("storage_key")?,
            content_length: row.try_get("content_length")?,
            created_at: row.try_get("created_at")?,
            processed_at: row.try_get("processed_at")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            next_attempt_at: row.try_get("next_attempt_at")?,
        })
    }
}

/// A validated upload request, before content is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUpload {
    pub tenant_id: String,
    pub file_name: String,
    pub uploaded_at: DateTime<Utc>,
}

impl NewUpload {
    /// Validates the file name and derives the upload timestamp from it.
    pub fn new(tenant_id: impl Into<String>, file_name: impl Into<String>) -> PipelineResult<Self> {
        let file_name = file_name.into();
        let uploaded_at = validate_upload_name(&file_name)?;
        Ok(Self {
            tenant_id: tenant_id.into(),
            file_name,
            uploaded_at,
        })
    }

    pub fn key(&self) -> FileKey {
        FileKey::new(self.tenant_id.clone(), self.file_name.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_state_round_trips_through_text() {
        assert_eq!("pending".parse::<FileState>().unwrap(), FileState::Pending);
        assert_eq!(FileState::Processed.to_string(), "processed");
        assert_eq!("failed".parse::<FileState>().unwrap(), FileState::Failed);
        assert!("done".parse::<FileState>().is_err());
    }

    #[test]
    fn test_new_upload_derives_timestamp() {
        let upload = NewUpload::new("tenant1", "tenant1.usage.1700000000000.zip").unwrap();
        assert_eq!(upload.uploaded_at.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(upload.key().to_string(), "tenant1/tenant1.usage.1700000000000.zip");
    }

    #[test]
    fn test_new_upload_rejects_bad_name() {
        assert!(NewUpload::new("tenant1", "usage.zip").is_err());
    }
}
