//! usagepipe infrastructure
//!
//! Process-level concerns shared by usagepipe binaries: tracing subscriber setup.

#[cfg(feature = "observability-basic")]
pub mod telemetry;

#[cfg(feature = "observability-basic")]
pub use telemetry::{init_telemetry, shutdown_telemetry, LogFormat};
