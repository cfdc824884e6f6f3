//! Error types module
//!
//! All pipeline failures are unified under [`PipelineError`]. Each variant knows the
//! scope it is confined to (line, file, tick or feature) through its metadata, so
//! callers can log it at the right level and decide whether the next scheduled pass
//! should retry.

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors such as skipped lines
    Debug,
    /// Warning level - for recoverable issues retried on the next pass
    Warn,
    /// Error level - for failures that disable a feature or need operator attention
    Error,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Stream schemas unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Failed to read file {file}: {reason}")]
    FileReadFailure { file: String, reason: String },

    #[error("Invalid upload file name: {0}")]
    InvalidFileName(String),

    #[error("File {file_name} already uploaded for tenant {tenant_id}")]
    DuplicateUpload { tenant_id: String, file_name: String },

    #[error("Event sink closed")]
    SinkClosed,

    #[error("Processing cancelled")]
    Cancelled,

    #[error("Processing deadline of {0:?} exceeded")]
    DeadlineExceeded(std::time::Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Static metadata for each variant: (error_code, recoverable, log_level).
fn static_metadata(err: &PipelineError) -> (&'static str, bool, LogLevel) {
    match err {
        PipelineError::SchemaUnavailable(_) => ("SCHEMA_UNAVAILABLE", false, LogLevel::Error),
        PipelineError::MalformedRecord(_) => ("MALFORMED_RECORD", false, LogLevel::Debug),
        PipelineError::StorageUnavailable(_) => ("STORAGE_UNAVAILABLE", true, LogLevel::Warn),
        PipelineError::FileReadFailure { .. } => ("FILE_READ_FAILURE", true, LogLevel::Warn),
        PipelineError::InvalidFileName(_) => ("INVALID_FILE_NAME", false, LogLevel::Debug),
        PipelineError::DuplicateUpload { .. } => ("DUPLICATE_UPLOAD", false, LogLevel::Debug),
        PipelineError::SinkClosed => ("SINK_CLOSED", true, LogLevel::Error),
        PipelineError::Cancelled => ("CANCELLED", true, LogLevel::Debug),
        PipelineError::DeadlineExceeded(_) => ("DEADLINE_EXCEEDED", true, LogLevel::Warn),
        PipelineError::Config(_) => ("CONFIG_ERROR", false, LogLevel::Error),
    }
}

impl PipelineError {
    /// Machine-readable error code (e.g. "STORAGE_UNAVAILABLE")
    pub fn error_code(&self) -> &'static str {
        static_metadata(self).0
    }

    /// Whether the failed operation is picked up again by the next scheduled pass
    pub fn is_recoverable(&self) -> bool {
        static_metadata(self).1
    }

    pub fn log_level(&self) -> LogLevel {
        static_metadata(self).2
    }

    /// Whether the failure is caused by the file itself and uses up one of its
    /// attempts. Outages, shutdown and a closed sink do not.
    pub fn counts_against_file(&self) -> bool {
        matches!(
            self,
            PipelineError::FileReadFailure { .. }
                | PipelineError::MalformedRecord(_)
                | PipelineError::DeadlineExceeded(_)
        )
    }

    pub fn file_read(file: impl Into<String>, reason: impl ToString) -> Self {
        PipelineError::FileReadFailure {
            file: file.into(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(feature = "sqlx")]
impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::StorageUnavailable(err.to_string())
    }
}

impl From<std::io::Error> for PipelineError {
    fn from(err: std::io::Error) -> Self {
        PipelineError::StorageUnavailable(format!("IO error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_unavailable_is_retryable() {
        let err = PipelineError::StorageUnavailable("connection refused".to_string());
        assert_eq!(err.error_code(), "STORAGE_UNAVAILABLE");
        assert!(err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Warn);
    }

    #[test]
    fn test_schema_unavailable_is_not_retryable() {
        let err = PipelineError::SchemaUnavailable("3 of 5 streams".to_string());
        assert!(!err.is_recoverable());
        assert_eq!(err.log_level(), LogLevel::Error);
        assert!(err.to_string().contains("3 of 5 streams"));
    }

    #[test]
    fn test_file_read_failure_message() {
        let err = PipelineError::file_read("t1.usage.1.zip", "blob missing");
        assert_eq!(err.error_code(), "FILE_READ_FAILURE");
        assert_eq!(
            err.to_string(),
            "Failed to read file t1.usage.1.zip: blob missing"
        );
    }

    #[test]
    fn test_only_file_faults_use_up_attempts() {
        assert!(PipelineError::file_read("f", "corrupt").counts_against_file());
        assert!(PipelineError::DeadlineExceeded(std::time::Duration::from_secs(1))
            .counts_against_file());
        assert!(!PipelineError::Cancelled.counts_against_file());
        assert!(!PipelineError::SinkClosed.counts_against_file());
        assert!(!PipelineError::StorageUnavailable("down".to_string()).counts_against_file());
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_sqlx_error_maps_to_storage_unavailable() {
        let err = PipelineError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, PipelineError::StorageUnavailable(_)));
    }
}
