//! Comparable time points combining wall-clock and monotonic time.
//!
//! Wall-clock time is what gets displayed and persisted, but it can jump
//! backwards. A [`TimePoint`] captured from a [`MonotonicClock`] also carries
//! a monotonic reading, and comparisons between two such points only look at
//! the monotonic component.

use std::{
    cmp::Ordering,
    fmt::Debug,
    sync::{
        atomic::{AtomicI64, AtomicU64, Ordering as AtomicOrdering},
        Arc, OnceLock,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};
use tokio::time::Instant;

/// A point in time.
///
/// Two points that both carry a monotonic reading are compared by that
/// reading alone; otherwise they are compared by wall-clock milliseconds.
#[derive(Clone, Copy)]
pub struct TimePoint {
    unix_ms: i64,
    monotonic: Option<Duration>,
}

impl TimePoint {
    /// A point known only by its wall-clock time.
    pub const fn from_unix_ms(unix_ms: i64) -> Self {
        Self {
            unix_ms,
            monotonic: None,
        }
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        Self::from_unix_ms(system_time_to_ms(time))
    }

    /// Milliseconds since the Unix epoch.
    pub fn unix_ms(&self) -> i64 {
        self.unix_ms
    }

    /// The monotonic reading, if this point was captured from a clock.
    pub fn monotonic(&self) -> Option<Duration> {
        self.monotonic
    }

    pub fn to_system_time(&self) -> SystemTime {
        if self.unix_ms >= 0 {
            UNIX_EPOCH + Duration::from_millis(self.unix_ms as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(self.unix_ms.unsigned_abs())
        }
    }

    /// Signed milliseconds from `earlier` to `self`.
    pub fn millis_since(&self, earlier: &TimePoint) -> i64 {
        match (self.monotonic, earlier.monotonic) {
            (Some(a), Some(b)) => {
                if a >= b {
                    (a - b).as_millis() as i64
                } else {
                    -((b - a).as_millis() as i64)
                }
            }
            _ => self.unix_ms - earlier.unix_ms,
        }
    }

    /// The non-negative duration from `earlier` to `self`.
    pub fn saturating_duration_since(&self, earlier: &TimePoint) -> Duration {
        match (self.monotonic, earlier.monotonic) {
            (Some(a), Some(b)) => a.saturating_sub(b),
            _ => Duration::from_millis(
                self.unix_ms.saturating_sub(earlier.unix_ms).max(0) as u64,
            ),
        }
    }

    /// Shifts both components by `duration`.
    pub fn add(&self, duration: Duration) -> TimePoint {
        TimePoint {
            unix_ms: self.unix_ms + duration.as_millis() as i64,
            monotonic: self.monotonic.map(|m| m + duration),
        }
    }
}

impl PartialEq for TimePoint {
    fn eq(&self, other: &Self) -> bool {
        match (self.monotonic, other.monotonic) {
            (Some(a), Some(b)) => a == b,
            _ => self.unix_ms == other.unix_ms,
        }
    }
}

impl PartialOrd for TimePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(match (self.monotonic, other.monotonic) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => self.unix_ms.cmp(&other.unix_ms),
        })
    }
}

impl Debug for TimePoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimePoint")
            .field("unix_ms", &self.unix_ms)
            .field("monotonic", &self.monotonic)
            .finish()
    }
}

impl From<SystemTime> for TimePoint {
    fn from(value: SystemTime) -> Self {
        Self::from_system_time(value)
    }
}

/// Where a [`MonotonicClock`] reads its time from.
pub trait ClockSource: Send + Sync {
    /// Wall-clock milliseconds since the Unix epoch.
    fn unix_ms(&self) -> i64;

    /// Monotonic time elapsed since a fixed origin, if available.
    fn monotonic(&self) -> Option<Duration>;
}

/// Reads the system clock and the runtime's monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    fn unix_ms(&self) -> i64 {
        system_time_to_ms(SystemTime::now())
    }

    fn monotonic(&self) -> Option<Duration> {
        static ORIGIN: OnceLock<Instant> = OnceLock::new();
        let origin = *ORIGIN.get_or_init(Instant::now);
        Some(Instant::now().saturating_duration_since(origin))
    }
}

/// A clock whose readings are set by hand.
#[derive(Debug, Default)]
pub struct ManualClock {
    unix_ms: AtomicI64,
    monotonic_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(unix_ms: i64) -> Self {
        Self {
            unix_ms: AtomicI64::new(unix_ms),
            monotonic_ms: AtomicU64::new(0),
        }
    }

    /// Moves both readings forward.
    pub fn advance(&self, by: Duration) {
        let ms = by.as_millis() as u64;
        self.unix_ms.fetch_add(ms as i64, AtomicOrdering::SeqCst);
        self.monotonic_ms.fetch_add(ms, AtomicOrdering::SeqCst);
    }

    /// Sets the wall clock without touching the monotonic reading.
    pub fn set_wall_clock(&self, unix_ms: i64) {
        self.unix_ms.store(unix_ms, AtomicOrdering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn unix_ms(&self) -> i64 {
        self.unix_ms.load(AtomicOrdering::SeqCst)
    }

    fn monotonic(&self) -> Option<Duration> {
        Some(Duration::from_millis(
            self.monotonic_ms.load(AtomicOrdering::SeqCst),
        ))
    }
}

/// Produces [`TimePoint`]s from a [`ClockSource`].
#[derive(Clone)]
pub struct MonotonicClock {
    source: Arc<dyn ClockSource>,
}

impl MonotonicClock {
    /// A clock backed by [`SystemClock`].
    pub fn system() -> Self {
        Self::with_source(Arc::new(SystemClock))
    }

    pub fn with_source(source: Arc<dyn ClockSource>) -> Self {
        Self { source }
    }

    /// Captures the current time.
    pub fn now(&self) -> TimePoint {
        TimePoint {
            unix_ms: self.source.unix_ms(),
            monotonic: self.source.monotonic(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::system()
    }
}

impl Debug for MonotonicClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonotonicClock").finish_non_exhaustive()
    }
}

fn system_time_to_ms(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wall_clock_points_compare_by_wall_clock() {
        let a = TimePoint::from_unix_ms(1_000);
        let b = TimePoint::from_unix_ms(2_000);
        assert!(a < b);
        assert_eq!(b.millis_since(&a), 1_000);
        assert_eq!(a.saturating_duration_since(&b), Duration::ZERO);
        assert_eq!(a.add(Duration::from_secs(1)), b);
    }

    #[test]
    fn system_time_round_trips_through_millis() {
        let time = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        let point = TimePoint::from(time);
        assert_eq!(point.unix_ms(), 1_700_000_000_123);
        assert_eq!(point.to_system_time(), time);
        assert!(point.monotonic().is_none());
    }
}
