//! Retention sweeping of processed usage files

use chrono::{DateTime, Days, NaiveDate, NaiveTime, TimeZone, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use usagepipe_core::PipelineResult;
use usagepipe_db::UsageFileStore;

use crate::scheduler::spawn_periodic;

/// Start of the UTC day `days` days before `now`.
pub fn retention_cutoff(now: DateTime<Utc>, days: u32) -> DateTime<Utc> {
    let day = now
        .date_naive()
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN);
    Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN))
}

pub struct RetentionSweeper {
    store: Arc<dyn UsageFileStore>,
    retention_days: Option<u32>,
}

impl RetentionSweeper {
    /// `retention_days = None` disables deletion; ticks still run and do nothing.
    pub fn new(store: Arc<dyn UsageFileStore>, retention_days: Option<u32>) -> Self {
        Self {
            store,
            retention_days,
        }
    }

    pub fn retention_days(&self) -> Option<u32> {
        self.retention_days
    }

    /// Delete processed files older than the retention cutoff relative to `now`.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> PipelineResult<u64> {
        let Some(days) = self.retention_days else {
            tracing::debug!("Usage file retention not configured, skipping sweep");
            return Ok(0);
        };

        let cutoff = retention_cutoff(now, days);
        let deleted = self.store.delete_older_than(cutoff).await?;
        tracing::info!(
            retention_days = days,
            cutoff = %cutoff,
            deleted,
            "Usage file retention sweep completed"
        );
        Ok(deleted)
    }

    /// One scheduled pass; failures are logged and the next tick retries.
    pub async fn tick(&self) {
        if let Err(e) = self.sweep_once(Utc::now()).await {
            tracing::error!(
                error = %e,
                error_code = e.error_code(),
                "Usage file retention sweep failed"
            );
        }
    }

    pub fn start(self: Arc<Self>, period: Duration, token: CancellationToken) -> JoinHandle<()> {
        spawn_periodic("retention-sweeper", period, token, move || {
            let sweeper = self.clone();
            async move { sweeper.tick().await }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{memory_store, upload};
    use chrono::Duration as ChronoDuration;
    use usagepipe_core::FileKey;

    #[test]
    fn test_cutoff_is_start_of_day() {
        let now = Utc.with_ymd_and_hms(2023, 11, 17, 22, 13, 20).unwrap();
        assert_eq!(
            retention_cutoff(now, 2),
            Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap()
        );
        assert_eq!(
            retention_cutoff(now, 0),
            Utc.with_ymd_and_hms(2023, 11, 17, 0, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_processed_file_removed_after_retention() {
        let store = memory_store();
        let record = upload(&store, "tenant1.usage.1700000000000.zip", "ignored").await;
        store.mark_processed(&record.key()).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), Some(2));

        let one_day_later = record.uploaded_at + ChronoDuration::days(1);
        assert_eq!(sweeper.sweep_once(one_day_later).await.unwrap(), 0);

        let three_days_later = record.uploaded_at + ChronoDuration::days(3);
        assert_eq!(sweeper.sweep_once(three_days_later).await.unwrap(), 1);
        assert!(store
            .get_file(&FileKey::new("tenant1", "tenant1.usage.1700000000000.zip"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_pending_file_survives_sweep() {
        let store = memory_store();
        upload(&store, "tenant1.usage.1700000000000.zip", "ignored").await;

        let sweeper = RetentionSweeper::new(store.clone(), Some(1));
        let far_future = Utc::now() + ChronoDuration::days(3650);

        assert_eq!(sweeper.sweep_once(far_future).await.unwrap(), 0);
        assert_eq!(store.count_pending().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_unset_retention_deletes_nothing() {
        let store = memory_store();
        let record = upload(&store, "tenant1.usage.1700000000000.zip", "ignored").await;
        store.mark_processed(&record.key()).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), None);
        let far_future = Utc::now() + ChronoDuration::days(3650);

        assert_eq!(sweeper.sweep_once(far_future).await.unwrap(), 0);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_is_reported_and_next_sweep_retries() {
        let store = memory_store();
        let record = upload(&store, "tenant1.usage.1700000000000.zip", "ignored").await;
        store.mark_processed(&record.key()).await.unwrap();

        let sweeper = RetentionSweeper::new(store.clone(), Some(2));
        let later = record.uploaded_at + ChronoDuration::days(3);

        store.set_available(false);
        assert!(sweeper.sweep_once(later).await.is_err());
        sweeper.tick().await;

        store.set_available(true);
        assert_eq!(sweeper.sweep_once(later).await.unwrap(), 1);
    }
}
