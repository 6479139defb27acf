//! System clock guard
//!
//! The general meter broadcasts its own clock. Installations without network time
//! can use it to correct the system clock, which the staleness check and the
//! checkpoint timestamps rely on.

use chrono::{DateTime, FixedOffset, Utc};
use std::io;
use std::process::Command;
use std::time::{Duration, Instant};

/// What to do about the meter clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockCheck {
    /// Drift within tolerance
    InSync,
    /// Drifted, but a correction was attempted recently
    Throttled,
    /// Drifted and a correction is due
    Drifted {
        meter_time: DateTime<FixedOffset>,
        drift_secs: i64,
    },
}

pub struct ClockGuard {
    max_drift: chrono::Duration,
    retry: Duration,
    last_attempt: Option<Instant>,
}

impl ClockGuard {
    pub fn new(max_drift_secs: u64, retry: Duration) -> Self {
        Self {
            max_drift: chrono::Duration::seconds(max_drift_secs as i64),
            retry,
            last_attempt: None,
        }
    }

    /// Compare the meter clock with the system clock
    ///
    /// `at` is the monotonic instant used to space out corrections.
    pub fn check(
        &mut self,
        meter_time: DateTime<FixedOffset>,
        now: DateTime<Utc>,
        at: Instant,
    ) -> ClockCheck {
        let drift = meter_time.with_timezone(&Utc) - now;
        if drift.num_seconds().abs() <= self.max_drift.num_seconds() {
            return ClockCheck::InSync;
        }

        if let Some(last) = self.last_attempt {
            if at.saturating_duration_since(last) < self.retry {
                return ClockCheck::Throttled;
            }
        }

        self.last_attempt = Some(at);
        ClockCheck::Drifted {
            meter_time,
            drift_secs: drift.num_seconds(),
        }
    }
}

/// Set the system clock with `date -s`; returns whether the command succeeded
pub fn set_system_clock(time: &DateTime<FixedOffset>) -> io::Result<bool> {
    let status = Command::new("date").arg("-s").arg(time.to_rfc3339()).status()?;
    Ok(status.success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn meter(secs_ahead: i64) -> (DateTime<FixedOffset>, DateTime<Utc>) {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let meter_time = (now + chrono::Duration::seconds(secs_ahead))
            .with_timezone(&FixedOffset::east_opt(3600).unwrap());
        (meter_time, now)
    }

    #[test]
    fn test_within_tolerance() {
        let mut guard = ClockGuard::new(60, Duration::from_secs(1800));
        let (meter_time, now) = meter(60);
        assert_eq!(guard.check(meter_time, now, Instant::now()), ClockCheck::InSync);
        let (meter_time, now) = meter(-45);
        assert_eq!(guard.check(meter_time, now, Instant::now()), ClockCheck::InSync);
    }

    #[test]
    fn test_drift_is_reported_then_throttled() {
        let mut guard = ClockGuard::new(60, Duration::from_secs(1800));
        let start = Instant::now();
        let (meter_time, now) = meter(-300);

        match guard.check(meter_time, now, start) {
            ClockCheck::Drifted { drift_secs, .. } => assert_eq!(drift_secs, -300),
            other => panic!("expected drift, got {:?}", other),
        }
        assert_eq!(
            guard.check(meter_time, now, start + Duration::from_secs(10)),
            ClockCheck::Throttled
        );
        assert!(matches!(
            guard.check(meter_time, now, start + Duration::from_secs(1800)),
            ClockCheck::Drifted { .. }
        ));
    }
}
