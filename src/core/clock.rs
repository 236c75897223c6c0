//! Wall-clock helpers.
//!
//! Every timestamp that crosses the wire is milliseconds since the Unix
//! epoch as an `i64`. Elapsed-time gates use `std::time::Instant` instead.

use chrono::Utc;

/// Current wall-clock time in milliseconds since the Unix epoch.
#[inline]
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Milliseconds elapsed since `earlier`, never negative.
#[inline]
pub fn millis_since(earlier: i64) -> i64 {
    (now_millis() - earlier).max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }

    #[test]
    fn test_millis_since_clamps_future() {
        let future = now_millis() + 60_000;
        assert_eq!(millis_since(future), 0);
    }

    #[test]
    fn test_millis_since_past() {
        let past = now_millis() - 250;
        let elapsed = millis_since(past);
        assert!(elapsed >= 250);
        assert!(elapsed < 10_000);
    }
}
