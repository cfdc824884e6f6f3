//! Processing of one uploaded usage file
//!
//! A file moves FETCHED → DECODING → PUBLISHING → COMPLETED, or to FAILED from any
//! step. Line-level problems (bad UTF-8, bad tokens, unknown streams) are counted and
//! skipped. Anything that prevents reading the file as a whole fails it. A failure
//! caused by the file itself counts one attempt: the file stays PENDING behind a
//! backoff, and is parked in the store's FAILED state once its attempts run out.

use chrono::Utc;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use usagepipe_core::config::DEFAULT_MAX_ARCHIVE_ENTRY_BYTES;
use usagepipe_core::{
    DecodedRecord, FileKey, LogLevel, PipelineError, PipelineResult, RetryPolicy,
    UploadedFileRecord,
};
use usagepipe_db::UsageFileStore;
use usagepipe_schema::{PayloadDecoder, SchemaLookup, StreamSchemaCache};

use crate::content::usage_lines;
use crate::sink::EventSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Fetched,
    Decoding,
    Publishing,
    Completed,
    Failed,
}

impl Display for WorkerState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let s = match self {
            WorkerState::Fetched => "fetched",
            WorkerState::Decoding => "decoding",
            WorkerState::Publishing => "publishing",
            WorkerState::Completed => "completed",
            WorkerState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Outcome of processing one file.
#[derive(Debug)]
pub struct FileReport {
    pub file: FileKey,
    pub state: WorkerState,
    /// Non-blank lines read.
    pub lines: u64,
    pub published: u64,
    pub malformed: u64,
    pub unknown_stream: u64,
    /// The failure used up the file's last attempt and it was moved to FAILED.
    pub parked: bool,
    pub error: Option<PipelineError>,
}

impl FileReport {
    fn new(file: FileKey) -> Self {
        Self {
            file,
            state: WorkerState::Fetched,
            lines: 0,
            published: 0,
            malformed: 0,
            unknown_stream: 0,
            parked: false,
            error: None,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.state == WorkerState::Completed
    }

    /// Lines that were read but not published.
    pub fn skipped(&self) -> u64 {
        self.malformed + self.unknown_stream
    }
}

pub struct FileRetrievalWorker {
    store: Arc<dyn UsageFileStore>,
    schemas: Arc<StreamSchemaCache>,
    sink: Arc<dyn EventSink>,
    decoder: PayloadDecoder,
    deadline: Duration,
    retry: RetryPolicy,
    max_archive_entry_bytes: u64,
}

impl FileRetrievalWorker {
    pub fn new(
        store: Arc<dyn UsageFileStore>,
        schemas: Arc<StreamSchemaCache>,
        sink: Arc<dyn EventSink>,
        deadline: Duration,
    ) -> Self {
        Self {
            store,
            schemas,
            sink,
            decoder: PayloadDecoder::new(),
            deadline,
            retry: RetryPolicy::default(),
            max_archive_entry_bytes: DEFAULT_MAX_ARCHIVE_ENTRY_BYTES,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_max_archive_entry_bytes(mut self, bytes: u64) -> Self {
        self.max_archive_entry_bytes = bytes.max(1);
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Process one file to completion, failure, deadline or cancellation.
    #[tracing::instrument(skip_all, fields(file = %record.key()))]
    pub async fn process(&self, record: UploadedFileRecord, cancel: CancellationToken) -> FileReport {
        let mut report = FileReport::new(record.key());

        let result = if cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            match tokio::time::timeout(self.deadline, self.run(&record, &cancel, &mut report)).await
            {
                Ok(result) => result,
                Err(_) => Err(PipelineError::DeadlineExceeded(self.deadline)),
            }
        };

        match result {
            Ok(()) => {
                report.state = WorkerState::Completed;
                tracing::info!(
                    published = report.published,
                    malformed = report.malformed,
                    unknown_stream = report.unknown_stream,
                    "Usage file published"
                );
            }
            Err(e) => {
                let reached = report.state;
                report.state = WorkerState::Failed;
                if e.counts_against_file() {
                    report.parked = self.record_failure(&record, &e).await;
                }
                log_failure(&report, reached, &e);
                report.error = Some(e);
            }
        }

        report
    }

    /// Count a failed attempt against the file. Returns whether it was parked.
    async fn record_failure(&self, record: &UploadedFileRecord, err: &PipelineError) -> bool {
        let attempts = u32::try_from(record.attempts)
            .unwrap_or(0)
            .saturating_add(1);
        let retry_at = if self.retry.exhausted(attempts) {
            None
        } else {
            // A backoff past the calendar range parks the file.
            chrono::Duration::from_std(self.retry.backoff(attempts))
                .ok()
                .and_then(|delay| Utc::now().checked_add_signed(delay))
        };

        match self
            .store
            .record_failure(&record.key(), &err.to_string(), retry_at)
            .await
        {
            Ok(()) => {
                tracing::debug!(attempts, retry_at = ?retry_at, "Recorded failed attempt");
                retry_at.is_none()
            }
            Err(store_err) => {
                tracing::warn!(
                    error = %store_err,
                    error_code = store_err.error_code(),
                    "Failed to record failed attempt"
                );
                false
            }
        }
    }

    async fn run(
        &self,
        record: &UploadedFileRecord,
        cancel: &CancellationToken,
        report: &mut FileReport,
    ) -> PipelineResult<()> {
        let stream = self.store.open_content(record).await?;
        let mut lines = usage_lines(
            &record.file_name,
            stream,
            record.is_archive(),
            self.max_archive_entry_bytes,
            cancel,
        )
        .await?;
        report.state = WorkerState::Decoding;

        let mut known_stream_lines = 0u64;
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line.map_err(|e| PipelineError::file_read(&record.file_name, e))?,
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            };
            let Some(line) = line else { break };
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    report.lines += 1;
                    report.malformed += 1;
                    tracing::debug!(line = report.lines, error = %e, "Skipping line that is not UTF-8");
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            report.lines += 1;

            let raw = match self.decoder.parse_line(line) {
                Ok(raw) => raw,
                Err(e) => {
                    report.malformed += 1;
                    tracing::debug!(line = report.lines, error = %e, "Skipping malformed line");
                    continue;
                }
            };

            let schema = match self.schemas.get_schema(raw.stream_key).await? {
                SchemaLookup::Found(schema) => schema,
                SchemaLookup::Missing(stream) => {
                    report.unknown_stream += 1;
                    tracing::warn!(line = report.lines, stream = %stream, "No schema for stream, skipping line");
                    continue;
                }
            };
            known_stream_lines += 1;

            let payload = match self.decoder.decode(&schema, raw.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    report.malformed += 1;
                    tracing::debug!(line = report.lines, error = %e, "Skipping undecodable line");
                    continue;
                }
            };

            report.state = WorkerState::Publishing;
            let event = DecodedRecord::new(raw.stream_key, &record.file_name, &record.tenant_id, payload);
            tokio::select! {
                published = self.sink.publish(event) => published?,
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            }
            report.published += 1;
        }

        if report.unknown_stream > 0 && known_stream_lines == 0 {
            return Err(PipelineError::file_read(
                &record.file_name,
                "no line belongs to a known stream",
            ));
        }

        self.store.mark_processed(&record.key()).await
    }
}

fn log_failure(report: &FileReport, reached: WorkerState, err: &PipelineError) {
    if report.parked {
        tracing::error!(
            file = %report.file,
            state = %reached,
            error_code = err.error_code(),
            error = %err,
            "Usage file failed too many times, parked as failed"
        );
        return;
    }
    match err.log_level() {
        LogLevel::Error => tracing::error!(
            file = %report.file,
            state = %reached,
            error_code = err.error_code(),
            error = %err,
            published = report.published,
            "Usage file failed, left pending"
        ),
        LogLevel::Warn => tracing::warn!(
            file = %report.file,
            state = %reached,
            error_code = err.error_code(),
            error = %err,
            published = report.published,
            "Usage file failed, left pending"
        ),
        LogLevel::Debug => tracing::debug!(
            file = %report.file,
            state = %reached,
            error_code = err.error_code(),
            error = %err,
            "Usage file processing stopped"
        ),
    }
}
