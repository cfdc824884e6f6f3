//! usagepipe storage library
//!
//! Blob storage abstraction for uploaded usage files, with a local filesystem backend
//! and an in-process backend.
//!
//! # Storage key format
//!
//! Keys are tenant- and upload-scoped: `usage/{tenant_id}/{upload_id}/{file_name}`.
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all callers stay consistent.

pub mod keys;
pub mod local;
pub mod memory;
pub mod traits;

// Re-export commonly used types
pub use keys::generate_storage_key;
pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use traits::{ByteReader, ByteStream, Storage, StorageError, StorageResult};
