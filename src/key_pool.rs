//! Rotating pool of API keys with daily quota tracking.
//!
//! A [`KeyPool`] hands out the first key whose quota is not yet exhausted.
//! Callers report an exhausted key with [`KeyPool::expire`]; the pool then moves
//! on to the next key in configuration order. [`KeyPool::reset`] restores every
//! key and is driven once a day by [`crate::ResetScheduler`].

use crate::config::EndpointSettings;
use crate::{Error, Result};
use chrono::NaiveTime;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Source of the local wall-clock time used by the day-boundary guard.
///
/// Any `Fn() -> NaiveTime` closure is a clock, which keeps tests independent
/// of the real time of day.
pub trait Clock: Send + Sync {
    /// Returns the current local time of day.
    fn local_time(&self) -> NaiveTime;
}

/// The process-local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn local_time(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

impl<F> Clock for F
where
    F: Fn() -> NaiveTime + Send + Sync,
{
    fn local_time(&self) -> NaiveTime {
        self()
    }
}

/// A window of local time around midnight in which expiry reports are ignored.
///
/// Quota counters on the remote side roll over at midnight, while the pool is
/// reset a few seconds earlier. An "exhausted" reply that lands inside this
/// window is treated as noise from the rollover: [`KeyPool::expire`] leaves the
/// key untouched and pauses for [`DayBoundary::pause`] instead.
///
/// The window may wrap past midnight (`start > end`); both ends are inclusive.
///
/// # Examples
///
/// ```
/// use chrono::NaiveTime;
/// use quotakey::DayBoundary;
///
/// let boundary = DayBoundary::default();
/// let at = |h, m, s| NaiveTime::from_hms_opt(h, m, s).unwrap();
///
/// assert!(boundary.contains(at(23, 59, 59)));
/// assert!(boundary.contains(at(0, 0, 10)));
/// assert!(!boundary.contains(at(0, 0, 11)));
/// assert!(!boundary.contains(at(12, 0, 0)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    /// First instant of the window.
    pub start: NaiveTime,
    /// Last instant of the window.
    pub end: NaiveTime,
    /// How long `expire` blocks when called inside the window.
    pub pause: Duration,
}

impl DayBoundary {
    /// Creates a window from `start` to `end` (inclusive).
    pub fn new(start: NaiveTime, end: NaiveTime, pause: Duration) -> Self {
        Self { start, end, pause }
    }

    /// Returns `true` if `time` falls inside the window.
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self {
            start: hms(23, 59, 58),
            end: hms(0, 0, 10),
            pause: Duration::from_secs(2),
        }
    }
}

pub(crate) fn hms(hour: u32, min: u32, sec: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, min, sec).unwrap_or_default()
}

/// A single key and whether its quota is used up for today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot {
    /// The key value sent to the remote API.
    pub key: String,
    /// `true` once the key has been reported as exhausted.
    pub expired: bool,
}

struct PoolState {
    slots: Vec<KeySlot>,
    cursor: usize,
}

impl PoolState {
    fn lowest_unexpired(&self) -> usize {
        self.slots
            .iter()
            .position(|slot| !slot.expired)
            .unwrap_or(self.slots.len())
    }
}

/// An ordered set of API keys with expiry flags and a rotation cursor.
///
/// The cursor always points at the lowest-indexed key that is not expired, or
/// one past the end when every key is exhausted. All operations serialize
/// through a single lock.
///
/// # Examples
///
/// ```
/// use quotakey::KeyPool;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), quotakey::Error> {
/// let pool = KeyPool::new("weather", "key", vec!["A".into(), "B".into()])?
///     .with_clock(|| chrono::NaiveTime::from_hms_opt(12, 0, 0).unwrap());
///
/// assert_eq!(pool.acquire().await.as_deref(), Some("A"));
/// pool.expire("A").await?;
/// assert_eq!(pool.acquire().await.as_deref(), Some("B"));
/// pool.expire("B").await?;
/// assert_eq!(pool.acquire().await, None);
///
/// pool.reset().await;
/// assert_eq!(pool.acquire().await.as_deref(), Some("A"));
/// # Ok(())
/// # }
/// ```
pub struct KeyPool {
    name: String,
    key_parameter_name: String,
    size: usize,
    state: Mutex<PoolState>,
    day_boundary: Option<DayBoundary>,
    clock: Arc<dyn Clock>,
}

impl KeyPool {
    /// Creates a pool from an ordered list of keys.
    ///
    /// The day-boundary guard starts out with [`DayBoundary::default`] and the
    /// [`SystemClock`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationError`] if the key parameter name is empty,
    /// no keys are given, a key is empty, or a key appears twice.
    pub fn new(
        name: impl Into<String>,
        key_parameter_name: impl Into<String>,
        keys: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        let key_parameter_name = key_parameter_name.into();

        if key_parameter_name.trim().is_empty() {
            return Err(Error::ConfigurationError(format!(
                "key pool '{}': key parameter name is not set",
                name
            )));
        }
        if keys.is_empty() {
            return Err(Error::ConfigurationError(format!(
                "key pool '{}': no keys configured",
                name
            )));
        }

        let mut seen = HashSet::with_capacity(keys.len());
        for (index, key) in keys.iter().enumerate() {
            if key.is_empty() {
                return Err(Error::ConfigurationError(format!(
                    "key pool '{}': key #{} is empty",
                    name, index
                )));
            }
            if !seen.insert(key.as_str()) {
                return Err(Error::ConfigurationError(format!(
                    "key pool '{}': key #{} is a duplicate",
                    name, index
                )));
            }
        }

        let slots: Vec<KeySlot> = keys
            .into_iter()
            .map(|key| KeySlot {
                key,
                expired: false,
            })
            .collect();
        let size = slots.len();

        tracing::info!(pool = %name, keys = size, "Key pool initialized");

        Ok(Self {
            name,
            key_parameter_name,
            size,
            state: Mutex::new(PoolState { slots, cursor: 0 }),
            day_boundary: Some(DayBoundary::default()),
            clock: Arc::new(SystemClock),
        })
    }

    /// Creates a pool from an endpoint's configuration entry.
    ///
    /// # Errors
    ///
    /// Same as [`KeyPool::new`]; a missing `key_parameter_name` counts as empty.
    pub fn from_settings(name: &str, settings: &EndpointSettings) -> Result<Self> {
        Self::new(
            name,
            settings.key_parameter_name.clone().unwrap_or_default(),
            settings.keys.clone(),
        )
    }

    /// Replaces the day-boundary guard. `None` disables it.
    pub fn with_day_boundary(mut self, day_boundary: Option<DayBoundary>) -> Self {
        self.day_boundary = day_boundary;
        self
    }

    /// Replaces the clock consulted by the day-boundary guard.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Name of the pool, used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Name of the query parameter the key is sent under.
    pub fn key_parameter_name(&self) -> &str {
        &self.key_parameter_name
    }

    /// Number of keys in the pool.
    pub fn len(&self) -> usize {
        self.size
    }

    /// Always `false`: a pool cannot be built without keys.
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Returns the current key, or `None` if every key is exhausted for today.
    pub async fn acquire(&self) -> Option<String> {
        let state = self.state.lock().await;
        state.slots.get(state.cursor).map(|slot| slot.key.clone())
    }

    /// Marks `key` as exhausted and moves the cursor to the lowest usable key.
    ///
    /// Inside the day-boundary window this does nothing except block for the
    /// configured pause; the key stays usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyNotFound`] if `key` is not part of the pool.
    pub async fn expire(&self, key: &str) -> Result<()> {
        let mut state = self.state.lock().await;

        if let Some(boundary) = self.day_boundary {
            let now = self.clock.local_time();
            if boundary.contains(now) {
                tracing::warn!(
                    pool = %self.name,
                    time = %now,
                    pause_ms = boundary.pause.as_millis(),
                    "Ignoring key expiry near the day boundary"
                );
                tokio::time::sleep(boundary.pause).await;
                return Ok(());
            }
        }

        let index = state
            .slots
            .iter()
            .position(|slot| slot.key == key)
            .ok_or_else(|| Error::KeyNotFound {
                pool: self.name.clone(),
                key: key.to_string(),
            })?;

        state.slots[index].expired = true;
        state.cursor = state.lowest_unexpired();

        if state.cursor == state.slots.len() {
            tracing::warn!(
                pool = %self.name,
                key_index = index,
                "Key expired, all keys have reached their daily quota"
            );
        } else {
            tracing::info!(
                pool = %self.name,
                key_index = index,
                next_key_index = state.cursor,
                "Key expired, rotating to next key"
            );
        }

        Ok(())
    }

    /// Clears every expiry flag and points the cursor back at the first key.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        for slot in state.slots.iter_mut() {
            slot.expired = false;
        }
        state.cursor = 0;
        tracing::info!(pool = %self.name, "Key pool reset");
    }

    /// Current cursor position; equals [`KeyPool::len`] when all keys are exhausted.
    pub async fn cursor(&self) -> usize {
        self.state.lock().await.cursor
    }

    /// Snapshot of every slot in rotation order.
    pub async fn slots(&self) -> Vec<KeySlot> {
        self.state.lock().await.slots.clone()
    }

    /// Number of keys not yet exhausted.
    pub async fn available(&self) -> usize {
        let state = self.state.lock().await;
        state.slots.iter().filter(|slot| !slot.expired).count()
    }
}

impl fmt::Debug for KeyPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPool")
            .field("name", &self.name)
            .field("key_parameter_name", &self.key_parameter_name)
            .field("size", &self.size)
            .field("day_boundary", &self.day_boundary)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn keys(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn noon_pool(values: &[&str]) -> KeyPool {
        KeyPool::new("test", "key", keys(values))
            .unwrap()
            .with_clock(|| hms(12, 0, 0))
    }

    #[test]
    fn test_rejects_empty_key_list() {
        let err = KeyPool::new("test", "key", Vec::new()).unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(msg) if msg.contains("no keys")));
    }

    #[test]
    fn test_rejects_missing_parameter_name() {
        let err = KeyPool::new("test", "  ", keys(&["A"])).unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_rejects_duplicate_keys() {
        let err = KeyPool::new("test", "key", keys(&["A", "B", "A"])).unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(msg) if msg.contains("#2")));
    }

    #[tokio::test]
    async fn test_acquire_does_not_mutate() {
        let pool = noon_pool(&["A", "B"]);
        assert_eq!(pool.acquire().await.as_deref(), Some("A"));
        assert_eq!(pool.acquire().await.as_deref(), Some("A"));
        assert_eq!(pool.cursor().await, 0);
    }

    #[tokio::test]
    async fn test_cursor_tracks_lowest_unexpired() {
        let pool = noon_pool(&["A", "B", "C"]);

        // Expiring a later key leaves the cursor on the first one
        pool.expire("B").await.unwrap();
        assert_eq!(pool.cursor().await, 0);

        pool.expire("A").await.unwrap();
        assert_eq!(pool.cursor().await, 2);
        assert_eq!(pool.acquire().await.as_deref(), Some("C"));
        assert_eq!(pool.available().await, 1);

        pool.expire("C").await.unwrap();
        assert_eq!(pool.cursor().await, 3);
    }

    #[tokio::test]
    async fn test_expiring_every_key_exhausts_pool() {
        let pool = noon_pool(&["A", "B", "C", "D"]);
        for _ in 0..pool.len() {
            let key = pool.acquire().await.unwrap();
            pool.expire(&key).await.unwrap();
        }
        assert_eq!(pool.acquire().await, None);
        assert_eq!(pool.cursor().await, pool.len());
    }

    #[tokio::test]
    async fn test_reset_restores_all_keys() {
        let pool = noon_pool(&["A", "B", "C"]);
        pool.expire("A").await.unwrap();
        pool.expire("C").await.unwrap();

        pool.reset().await;

        assert_eq!(pool.cursor().await, 0);
        assert!(pool.slots().await.iter().all(|slot| !slot.expired));
        assert_eq!(pool.available().await, 3);
    }

    #[tokio::test]
    async fn test_expire_unknown_key() {
        let pool = noon_pool(&["A"]);
        match pool.expire("Z").await {
            Err(Error::KeyNotFound { pool, key }) => {
                assert_eq!(pool, "test");
                assert_eq!(key, "Z");
            }
            other => panic!("Expected KeyNotFound, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_is_ignored_inside_day_boundary() {
        for time in [hms(23, 59, 58), hms(23, 59, 59), hms(0, 0, 0), hms(0, 0, 10)] {
            let pool = KeyPool::new("test", "key", keys(&["A", "B"]))
                .unwrap()
                .with_clock(move || time);

            let started = tokio::time::Instant::now();
            pool.expire("A").await.unwrap();

            assert!(started.elapsed() >= Duration::from_secs(2), "at {}", time);
            assert_eq!(pool.cursor().await, 0, "at {}", time);
            assert!(pool.slots().await.iter().all(|slot| !slot.expired));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expire_applies_just_outside_day_boundary() {
        for time in [hms(23, 59, 57), hms(0, 0, 11)] {
            let pool = KeyPool::new("test", "key", keys(&["A", "B"]))
                .unwrap()
                .with_clock(move || time);

            let started = tokio::time::Instant::now();
            pool.expire("A").await.unwrap();

            assert!(started.elapsed() < Duration::from_secs(1), "at {}", time);
            assert_eq!(pool.cursor().await, 1, "at {}", time);
        }
    }

    #[tokio::test]
    async fn test_disabled_day_boundary() {
        let pool = KeyPool::new("test", "key", keys(&["A", "B"]))
            .unwrap()
            .with_day_boundary(None)
            .with_clock(|| hms(23, 59, 59));
        pool.expire("A").await.unwrap();
        assert_eq!(pool.acquire().await.as_deref(), Some("B"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pool_is_locked_during_guard_pause() {
        let pool = Arc::new(
            KeyPool::new("test", "key", keys(&["A", "B"]))
                .unwrap()
                .with_clock(|| hms(23, 59, 59)),
        );

        let expiring = Arc::clone(&pool);
        let handle = tokio::spawn(async move { expiring.expire("A").await });

        // Let the expiry take the lock and start its pause
        tokio::time::sleep(Duration::from_millis(1)).await;

        let started = tokio::time::Instant::now();
        assert_eq!(pool.acquire().await.as_deref(), Some("A"));
        assert!(started.elapsed() >= Duration::from_millis(1999));
        handle.await.unwrap().unwrap();

        let expiring = Arc::clone(&pool);
        let handle = tokio::spawn(async move { expiring.expire("B").await });
        tokio::time::sleep(Duration::from_millis(1)).await;

        let started = tokio::time::Instant::now();
        pool.reset().await;
        assert!(started.elapsed() >= Duration::from_millis(1999));
        handle.await.unwrap().unwrap();
        assert_eq!(pool.cursor().await, 0);
    }

    #[derive(Debug, Clone)]
    enum PoolOp {
        Expire(usize),
        Reset,
    }

    fn pool_ops() -> impl Strategy<Value = (usize, Vec<PoolOp>)> {
        (1usize..=6).prop_flat_map(|len| {
            let op = prop_oneof![
                4 => (0..len).prop_map(PoolOp::Expire),
                1 => Just(PoolOp::Reset),
            ];
            (Just(len), prop::collection::vec(op, 0..40))
        })
    }

    proptest! {
        /// The cursor always sits on the lowest unexpired key, whatever the
        /// sequence of expiries and resets.
        #[test]
        fn prop_cursor_is_lowest_unexpired((len, ops) in pool_ops()) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();

            runtime.block_on(async {
                let names: Vec<String> = (0..len).map(|i| format!("key-{}", i)).collect();
                let pool = KeyPool::new("test", "key", names.clone())
                    .unwrap()
                    .with_clock(|| hms(12, 0, 0));
                let mut expired = vec![false; len];

                for op in ops {
                    match op {
                        PoolOp::Expire(index) => {
                            pool.expire(&names[index]).await.unwrap();
                            expired[index] = true;
                        }
                        PoolOp::Reset => {
                            pool.reset().await;
                            expired = vec![false; len];
                            prop_assert_eq!(pool.cursor().await, 0);
                        }
                    }

                    let lowest = expired.iter().position(|e| !e).unwrap_or(len);
                    prop_assert_eq!(pool.cursor().await, lowest);
                    prop_assert_eq!(pool.acquire().await, names.get(lowest).cloned());
                    let flags: Vec<bool> = pool.slots().await.iter().map(|s| s.expired).collect();
                    prop_assert_eq!(flags, expired.clone());
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }

    #[test]
    fn test_non_wrapping_window() {
        let boundary = DayBoundary::new(hms(1, 0, 0), hms(2, 0, 0), Duration::ZERO);
        assert!(boundary.contains(hms(1, 30, 0)));
        assert!(!boundary.contains(hms(0, 59, 59)));
        assert!(!boundary.contains(hms(23, 0, 0)));
    }
}
