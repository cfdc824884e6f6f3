//! usagepipe schema layer
//!
//! Stream definitions, the sources they are read from, the per-process
//! [`StreamSchemaCache`] and the [`PayloadDecoder`] that turns usage lines into typed
//! values.

pub mod cache;
pub mod decoder;
pub mod definition;
pub mod source;

pub use cache::{SchemaLookup, StreamSchemaCache};
pub use decoder::{PayloadDecoder, RawLine};
pub use definition::StreamDefinition;
pub use source::{DirectorySchemaSource, RegistrySchemaSource, SchemaSource};
