//! usagepipe core library
//!
//! Domain models, error taxonomy, configuration and upload naming rules shared by
//! every usagepipe crate.

pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod upload_name;

// Re-export commonly used types
pub use config::{RetryPolicy, SchemaSourceKind, StoreBackend, UsageConfig};
pub use error::{LogLevel, PipelineError, PipelineResult};
pub use models::{
    DecodedRecord, FieldType, FieldValue, FileKey, FileState, NewUpload, SchemaField,
    StreamSchema, UploadedFileRecord,
};
pub use upload_name::{parse_upload_timestamp, validate_upload_name};
