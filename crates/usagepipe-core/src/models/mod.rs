pub mod record;
pub mod schema;
pub mod upload;

pub use record::{DecodedRecord, FieldValue};
pub use schema::{stream_key, FieldType, SchemaField, StreamSchema};
pub use upload::{FileKey, FileState, NewUpload, UploadedFileRecord};
