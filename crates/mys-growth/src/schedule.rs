//! Periodic refresh loop.

use mys_growth_app::config::ScheduleConfig;
use mys_growth_app::{KvBackend, MemberSource, Updater, handle_scheduled};
use std::sync::Arc;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

/// Run a scheduled refresh every `schedule.interval()` until the task is dropped.
///
/// Failures are logged and the previous cache state is kept until the next tick.
pub async fn run<B, S>(updater: Arc<Updater<B, S>>, schedule: ScheduleConfig)
where
    B: KvBackend,
    S: MemberSource,
{
    let period = schedule.interval();
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    if !schedule.run_on_start {
        // The first tick completes immediately.
        ticker.tick().await;
    }
    info!(?period, run_on_start = schedule.run_on_start, "Refresh schedule started");

    loop {
        ticker.tick().await;
        match handle_scheduled(&updater, updater.now()).await {
            Ok(outcome) => debug!(backup = %outcome.backup_key, ?period, "Waiting for next refresh"),
            Err(_) => warn!(?period, "Keeping previous cache state until next refresh"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mys_growth_app::{MemoryBackend, SourcePayload, TimeSeriesStore};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl MemberSource for Counting {
        async fn fetch(&self) -> anyhow::Result<SourcePayload> {
            let calls = self.0.fetch_add(1, Ordering::SeqCst);
            // Every other tick fails so the loop has to survive errors.
            let count = if calls % 2 == 0 { 500 } else { 0 };
            Ok(SourcePayload::json(format!(r#"{{"memberCount":{count}}}"#)))
        }
    }

    fn updater() -> Arc<Updater<MemoryBackend, Counting>> {
        Arc::new(Updater::new(
            TimeSeriesStore::new(MemoryBackend::new()),
            Counting::default(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn ticks_on_interval_and_survives_failures() {
        let updater = updater();
        let schedule = ScheduleConfig {
            interval_secs: 60,
            run_on_start: true,
        };
        let task = tokio::spawn(run(Arc::clone(&updater), schedule));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(updater.source().0.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(updater.source().0.load(Ordering::SeqCst), 3);
        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn waits_one_period_unless_run_on_start() {
        let updater = updater();
        let schedule = ScheduleConfig {
            interval_secs: 60,
            run_on_start: false,
        };
        let task = tokio::spawn(run(Arc::clone(&updater), schedule));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(updater.source().0.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(updater.source().0.load(Ordering::SeqCst), 1);
        task.abort();
    }
}
