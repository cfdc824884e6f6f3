use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Run `task` every `period` until `token` is cancelled.
///
/// The first run happens immediately. A run that overlaps the next tick delays it;
/// missed ticks are skipped, never queued.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    token: CancellationToken,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let period = period.max(Duration::from_millis(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(task = name, interval_ms = period.as_millis() as u64, "Periodic task started");

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => task().await,
            }
        }

        tracing::info!(task = name, "Periodic task stopped");
    })
}
