//! Periodic dispatch of pending usage files into a bounded worker pool.
//!
//! Shutdown: [`PublisherExecutor::shutdown`] cancels files that are running; they end
//! FAILED and stay PENDING, so nothing is lost across restarts.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use usagepipe_core::{FileKey, PipelineResult};
use usagepipe_db::UsageFileStore;

use crate::file_worker::{FileReport, FileRetrievalWorker};
use crate::scheduler::spawn_periodic;

/// Receives a report for every file the pool finishes.
pub type ReportSender = mpsc::UnboundedSender<FileReport>;

type InFlight = Arc<Mutex<HashSet<FileKey>>>;

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<FileKey>> {
    in_flight.lock().unwrap_or_else(|e| e.into_inner())
}

/// Removes a file from the in-flight set when its task ends, however it ends.
struct InFlightGuard {
    in_flight: InFlight,
    key: FileKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

enum Mode {
    Enabled {
        store: Arc<dyn UsageFileStore>,
        worker: Arc<FileRetrievalWorker>,
    },
    Disabled(String),
}

pub struct PublisherExecutor {
    mode: Mode,
    pool_size: usize,
    semaphore: Arc<Semaphore>,
    in_flight: InFlight,
    shutdown: CancellationToken,
    reports: Option<ReportSender>,
}

impl PublisherExecutor {
    pub fn new(
        store: Arc<dyn UsageFileStore>,
        worker: Arc<FileRetrievalWorker>,
        pool_size: usize,
    ) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            mode: Mode::Enabled { store, worker },
            pool_size,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
            reports: None,
        }
    }

    /// An executor whose publishing setup failed. Every tick logs `reason` and does
    /// nothing else.
    pub fn disabled(reason: impl Into<String>) -> Self {
        Self {
            mode: Mode::Disabled(reason.into()),
            pool_size: 0,
            semaphore: Arc::new(Semaphore::new(0)),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
            reports: None,
        }
    }

    pub fn with_reports(mut self, reports: ReportSender) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.mode, Mode::Enabled { .. })
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn in_flight(&self) -> usize {
        lock(&self.in_flight).len()
    }

    /// One scheduling pass. Returns the number of files dispatched.
    ///
    /// Never waits for running files: only free pool slots are filled, and files that
    /// are still running from an earlier pass are not dispatched again.
    pub async fn tick(&self) -> PipelineResult<usize> {
        let (store, worker) = match &self.mode {
            Mode::Enabled { store, worker } => (store, worker),
            Mode::Disabled(reason) => {
                tracing::warn!(reason = %reason, "Usage publishing is disabled, skipping pass");
                return Ok(0);
            }
        };

        if self.shutdown.is_cancelled() {
            return Ok(0);
        }

        if self.semaphore.available_permits() == 0 {
            tracing::debug!("No free workers, skipping pass");
            return Ok(0);
        }

        let running = self.in_flight();
        let candidates = store.list_pending_files(self.pool_size + running).await?;

        let mut dispatched = 0;
        for record in candidates {
            let key = record.key();
            if !lock(&self.in_flight).insert(key.clone()) {
                continue;
            }
            let guard = InFlightGuard {
                in_flight: self.in_flight.clone(),
                key,
            };

            let permit = match self.semaphore.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => break,
            };

            let worker = worker.clone();
            let cancel = self.shutdown.child_token();
            let reports = self.reports.clone();
            tokio::spawn(async move {
                let report = worker.process(record, cancel).await;
                // Free the slot before reporting, so a report means the pool has room.
                drop(guard);
                drop(permit);
                if let Some(reports) = reports {
                    let _ = reports.send(report);
                }
            });
            dispatched += 1;
        }

        if dispatched > 0 {
            tracing::info!(dispatched, in_flight = self.in_flight(), "Dispatched usage files");
        }
        Ok(dispatched)
    }

    pub fn start(self: Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        spawn_periodic("publisher-executor", period, token, move || {
            let executor = self.clone();
            async move {
                if let Err(e) = executor.tick().await {
                    tracing::warn!(
                        error = %e,
                        error_code = e.error_code(),
                        "Usage publishing pass failed"
                    );
                }
            }
        })
    }

    /// Cancel running files. Later ticks dispatch nothing.
    pub fn shutdown(&self) {
        tracing::info!(in_flight = self.in_flight(), "Publisher executor shutting down");
        self.shutdown.cancel();
    }
}
