//! Daily restoration of exhausted keys.

use crate::config::KeyResetSettings;
use crate::key_pool::KeyPool;
use chrono::{NaiveDateTime, NaiveTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Background task that resets a set of key pools once a day.
///
/// The task is owned by the process lifecycle: call [`ResetScheduler::start`]
/// at startup and [`ResetScheduler::stop`] at shutdown. The reset time is read
/// from the local clock.
///
/// # Examples
///
/// ```no_run
/// use quotakey::{ApiConfig, ResetScheduler};
/// use std::sync::Arc;
///
/// # async fn example() -> Result<(), quotakey::Error> {
/// let config = ApiConfig::load("quotakey.toml")?;
/// let pool = Arc::new(config.key_pool("weather")?);
///
/// let mut scheduler = ResetScheduler::from_settings(vec![pool], &config.key_reset);
/// scheduler.start();
/// // ... serve calls ...
/// scheduler.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ResetScheduler {
    pools: Vec<Arc<KeyPool>>,
    reset_at: NaiveTime,
    task_handle: Option<JoinHandle<()>>,
}

impl ResetScheduler {
    /// Creates a scheduler resetting `pools` every day at `reset_at`.
    pub fn new(pools: Vec<Arc<KeyPool>>, reset_at: NaiveTime) -> Self {
        Self {
            pools,
            reset_at,
            task_handle: None,
        }
    }

    /// Creates a scheduler from the `[key_reset]` configuration table.
    pub fn from_settings(pools: Vec<Arc<KeyPool>>, settings: &KeyResetSettings) -> Self {
        Self::new(pools, settings.reset_at)
    }

    /// Returns `true` while the background task is running.
    pub fn is_running(&self) -> bool {
        self.task_handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Spawns the background task. Does nothing if it is already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            return;
        }
        self.task_handle = Some(tokio::spawn(run(self.pools.clone(), self.reset_at, || {
            chrono::Local::now().naive_local()
        })));
        tracing::info!(
            pools = self.pools.len(),
            reset_at = %self.reset_at,
            "Key reset task started"
        );
    }

    /// Stops the background task and waits for it to finish.
    pub async fn stop(&mut self) {
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
            let _ = handle.await;
            tracing::info!("Key reset task stopped");
        }
    }
}

/// Resets `pools` at every local `reset_at`, reading the wall clock from `now`.
///
/// Sleeping runs on the monotonic timer, so the wall clock is checked again on
/// waking; if it was set back in the meantime the task sleeps for the rest.
async fn run<F>(pools: Vec<Arc<KeyPool>>, reset_at: NaiveTime, now: F)
where
    F: Fn() -> NaiveDateTime,
{
    loop {
        let scheduled_at = now();
        let target = next_occurrence(scheduled_at, reset_at);
        let mut delay = (target - scheduled_at).to_std().unwrap_or_default();

        loop {
            tracing::debug!(delay_secs = delay.as_secs(), "Next key reset scheduled");
            tokio::time::sleep(delay).await;

            match time_left(now(), target) {
                Some(left) => delay = left,
                None => break,
            }
        }

        for pool in &pools {
            pool.reset().await;
        }
    }
}

fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    }
}

/// Time still missing until `target`, or `None` once it has been reached.
fn time_left(now: NaiveDateTime, target: NaiveDateTime) -> Option<Duration> {
    (now < target).then(|| (target - now).to_std().unwrap_or_default())
}

/// Time from `now` until the next occurrence of `at`.
///
/// If `now` is exactly `at`, the next occurrence is a full day away.
///
/// # Examples
///
/// ```
/// use chrono::{NaiveDate, NaiveTime};
/// use quotakey::reset::duration_until;
/// use std::time::Duration;
///
/// let now = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap().and_hms_opt(23, 0, 0).unwrap();
/// let at = NaiveTime::from_hms_opt(23, 59, 56).unwrap();
/// assert_eq!(duration_until(now, at), Duration::from_secs(59 * 60 + 56));
/// ```
pub fn duration_until(now: NaiveDateTime, at: NaiveTime) -> Duration {
    (next_occurrence(now, at) - now).to_std().unwrap_or_default()
}
