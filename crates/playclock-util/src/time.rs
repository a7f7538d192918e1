//! Time source abstraction for playclockd
//!
//! All countdown math is wall-clock UTC: remaining time is derived from
//! absolute timestamps that dashboards and lock clients recompute on their
//! own, so every reader must share the same time basis.
//!
//! Production code uses [`SystemClock`]; tests drive a [`ManualClock`] that
//! only moves when told to.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock under test control. Cloning shares the underlying instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    #[test]
    fn system_clock_returns_current_time() {
        let t = SystemClock.now();
        assert!(t.year() >= 2020);
        assert!(t.year() <= 2100);
    }

    #[test]
    fn manual_clock_advances_only_when_told() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let t1 = clock.now();
        let t2 = clock.now();
        assert_eq!(t1, t2);

        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now() - t1, Duration::seconds(90));
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let other = clock.clone();

        clock.advance(Duration::seconds(30));
        assert_eq!(other.now(), clock.now());
    }

    #[test]
    fn manual_clock_set_jumps() {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
        let target = Utc.with_ymd_and_hms(2025, 6, 2, 9, 30, 0).unwrap();
        clock.set(target);
        assert_eq!(clock.now(), target);
    }
}
