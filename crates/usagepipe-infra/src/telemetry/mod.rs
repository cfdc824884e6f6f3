//! Tracing initialization
//!
//! `RUST_LOG` overrides the default filter. Output is human-readable text or one JSON
//! object per line.

mod init_basic;

pub use init_basic::{init_telemetry, shutdown_telemetry, LogFormat};
