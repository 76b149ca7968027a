//! Time source abstraction
//!
//! Breaker timeouts and rate-limit windows read time through [`Clock`] so
//! tests can drive them deterministically.

use std::sync::Mutex;

use chrono::{DateTime, Duration as ChronoDuration, Utc};

/// Source of wall-clock time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the given Unix timestamp (seconds)
    pub fn at_unix(secs: i64) -> Self {
        Self::new(DateTime::from_timestamp(secs, 0).unwrap_or_default())
    }

    pub fn advance(&self, by: std::time::Duration) {
        let step = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
        let mut now = self.now.lock().unwrap_or_else(|p| p.into_inner());
        *now += step;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|p| p.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Elapsed std duration between two instants, zero if `later` is earlier
pub fn elapsed_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> std::time::Duration {
    (later - earlier).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let start = clock.now();

        clock.advance(Duration::from_secs(31));

        assert_eq!(elapsed_between(start, clock.now()), Duration::from_secs(31));
    }

    #[test]
    fn test_elapsed_between_never_negative() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let earlier = clock.now();
        clock.advance(Duration::from_secs(5));

        assert_eq!(elapsed_between(clock.now(), earlier), Duration::ZERO);
    }
}
