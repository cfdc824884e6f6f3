//! usagepipe service wiring and admin command helpers.

pub mod output;
pub mod setup;

pub use output::{file_table, truncate_string};
pub use setup::{
    build_pipeline, connect_backends, connect_pool, forward_events, schema_source, Backends,
    Pipeline,
};
