//! Wall-clock sources for phase alignment
//!
//! The scheduler never reads `Utc::now()` directly. It asks a [`Clock`], which
//! applies the process-wide skew adjustment used to compensate for a known
//! discrepancy with the reference time source.

use chrono::{DateTime, Duration as ChronoDuration, Timelike, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// A source of skew-adjusted wall-clock time
pub trait Clock: Send + Sync {
    /// Current wall-clock time with the skew adjustment applied
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system wall clock
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    skew: ChronoDuration,
}

impl SystemClock {
    pub fn new(skew: ChronoDuration) -> Self {
        Self { skew }
    }

    /// Build from a signed millisecond skew, as it appears in configuration
    pub fn with_skew_ms(skew_ms: i64) -> Self {
        Self::new(ChronoDuration::milliseconds(skew_ms))
    }

    pub fn skew(&self) -> ChronoDuration {
        self.skew
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(ChronoDuration::zero())
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now() + self.skew
    }
}

/// Clock whose wall time advances with the event loop's monotonic clock
///
/// The wall time is `origin + (Instant::now() - anchor) + skew`. Under a
/// paused tokio runtime this advances exactly as timers fire, which makes
/// phase alignment reproducible in tests and simulations.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    origin: DateTime<Utc>,
    anchor: Instant,
    skew: ChronoDuration,
}

impl AnchoredClock {
    /// Anchor `origin` to the event loop's current instant
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            anchor: Instant::now(),
            skew: ChronoDuration::zero(),
        }
    }

    pub fn with_skew(mut self, skew: ChronoDuration) -> Self {
        self.skew = skew;
        self
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = Instant::now().saturating_duration_since(self.anchor);
        let elapsed = ChronoDuration::from_std(elapsed).unwrap_or_else(|_| ChronoDuration::zero());
        self.origin + elapsed + self.skew
    }
}

/// Milliseconds since midnight (UTC) of `at`
pub fn time_of_day(at: &DateTime<Utc>) -> Duration {
    let secs = u64::from(at.num_seconds_from_midnight());
    // Leap-second representation can push nanos past one second; clamp it.
    let millis = u64::from(at.timestamp_subsec_millis().min(999));
    Duration::from_millis(secs * 1000 + millis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_time_of_day_millis() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 1, 2, 3).unwrap()
            + ChronoDuration::milliseconds(456);
        assert_eq!(time_of_day(&at), Duration::from_millis(3_723_456));
    }

    #[test]
    fn test_system_clock_applies_skew() {
        let clock = SystemClock::with_skew_ms(60_000);
        let delta = clock.now() - Utc::now();
        assert!(delta > ChronoDuration::seconds(59));
        assert!(delta <= ChronoDuration::seconds(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchored_clock_follows_paused_time() {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = AnchoredClock::starting_at(origin);
        assert_eq!(clock.now(), origin);

        tokio::time::advance(Duration::from_millis(1_250)).await;
        assert_eq!(clock.now() - origin, ChronoDuration::milliseconds(1_250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_anchored_clock_skew() {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let clock = AnchoredClock::starting_at(origin).with_skew(ChronoDuration::milliseconds(-5));
        assert_eq!(origin - clock.now(), ChronoDuration::milliseconds(5));
    }
}
