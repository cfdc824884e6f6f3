//! usagepipe workers
//!
//! The runtime side of the pipeline: event sinks, the per-file
//! [`FileRetrievalWorker`], the [`PublisherExecutor`] that feeds it from the store on
//! a fixed interval, and the [`RetentionSweeper`].

pub mod content;
pub mod executor;
pub mod file_worker;
pub mod scheduler;
pub mod sink;
pub mod sweeper;

pub use executor::{PublisherExecutor, ReportSender};
pub use file_worker::{FileReport, FileRetrievalWorker, WorkerState};
pub use scheduler::spawn_periodic;
pub use sink::{ChannelSink, EventSink, LogSink, MemorySink};
pub use sweeper::{retention_cutoff, RetentionSweeper};

#[cfg(test)]
pub(crate) mod test_support;
