//! Cooldown derivation from the most recent claim.
//!
//! Nothing here is stored: whether a user is on cooldown is recomputed from the
//! ledger on every read, so an elapsed window simply stops mattering.

use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownStatus {
    pub on_cooldown: bool,
    pub remaining_seconds: u64,
}

impl CooldownStatus {
    pub const CLEAR: Self = Self {
        on_cooldown: false,
        remaining_seconds: 0,
    };
}

#[derive(Debug, Clone, Copy)]
pub struct CooldownTracker {
    period: Duration,
}

impl CooldownTracker {
    pub fn new(period_seconds: u64) -> Self {
        assert!(period_seconds > 0, "Cooldown period must be positive");
        assert!(
            period_seconds <= i64::MAX as u64 / 1_000,
            "Cooldown period exceeds millisecond bounds"
        );
        Self {
            period: Duration::seconds(period_seconds as i64),
        }
    }

    pub fn period_seconds(&self) -> u64 {
        self.period.num_seconds() as u64
    }

    /// On cooldown iff strictly positive time remains. A claim stamped in the
    /// future (clock skew between servers) counts as just made.
    pub fn check(&self, last_claimed_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> CooldownStatus {
        let Some(claimed_at) = last_claimed_at else {
            return CooldownStatus::CLEAR;
        };

        let elapsed = (now - claimed_at).max(Duration::zero());
        let remaining_ms = (self.period - elapsed).num_milliseconds();
        if remaining_ms <= 0 {
            return CooldownStatus::CLEAR;
        }

        CooldownStatus {
            on_cooldown: true,
            remaining_seconds: (remaining_ms as u64).div_ceil(1_000),
        }
    }
}

/// "45 seconds", "12 minutes", "1 hour and 5 minutes".
pub fn format_remaining(seconds: u64) -> String {
    fn plural(count: u64, unit: &str) -> String {
        if count == 1 {
            format!("{count} {unit}")
        } else {
            format!("{count} {unit}s")
        }
    }

    if seconds < 60 {
        plural(seconds, "second")
    } else if seconds < 3_600 {
        plural(seconds / 60, "minute")
    } else {
        format!(
            "{} and {}",
            plural(seconds / 3_600, "hour"),
            plural((seconds % 3_600) / 60, "minute")
        )
    }
}

pub fn wait_message(remaining_seconds: u64) -> String {
    format!(
        "Please wait {} before claiming another coupon",
        format_remaining(remaining_seconds)
    )
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    #[test]
    fn no_claim_is_clear() {
        let tracker = CooldownTracker::new(3_600);
        assert_eq!(tracker.check(None, at(0)), CooldownStatus::CLEAR);
    }

    #[test]
    fn blocked_inside_window() {
        let tracker = CooldownTracker::new(60);
        let status = tracker.check(Some(at(0)), at(0));
        assert!(status.on_cooldown);
        assert_eq!(status.remaining_seconds, 60);

        let status = tracker.check(Some(at(0)), at(59));
        assert!(status.on_cooldown);
        assert_eq!(status.remaining_seconds, 1);
    }

    #[test]
    fn boundary_is_clear() {
        let tracker = CooldownTracker::new(60);
        assert_eq!(tracker.check(Some(at(0)), at(60)), CooldownStatus::CLEAR);
        assert_eq!(tracker.check(Some(at(0)), at(61)), CooldownStatus::CLEAR);
    }

    #[test]
    fn partial_second_rounds_up() {
        let tracker = CooldownTracker::new(60);
        let now = at(59) + Duration::milliseconds(999);
        let status = tracker.check(Some(at(0)), now);
        assert!(status.on_cooldown);
        assert_eq!(status.remaining_seconds, 1);
    }

    #[test]
    fn future_claim_counts_as_fresh() {
        let tracker = CooldownTracker::new(60);
        let status = tracker.check(Some(at(5)), at(0));
        assert!(status.on_cooldown);
        assert_eq!(status.remaining_seconds, 60);
    }

    #[test]
    fn remaining_formatting() {
        assert_eq!(format_remaining(1), "1 second");
        assert_eq!(format_remaining(45), "45 seconds");
        assert_eq!(format_remaining(60), "1 minute");
        assert_eq!(format_remaining(754), "12 minutes");
        assert_eq!(format_remaining(3_600), "1 hour and 0 minutes");
        assert_eq!(format_remaining(7_560), "2 hours and 6 minutes");
        assert_eq!(
            wait_message(90),
            "Please wait 1 minute before claiming another coupon"
        );
    }
}
