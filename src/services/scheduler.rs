//! Pure scheduling rules. No I/O — takes whatever state it needs as
//! arguments and returns a timestamp. Kept free of `Store` so it can be
//! exercised directly in property tests without a database.

use chrono::{DateTime, Duration, Utc};

pub const RETRY_BASE_SECONDS: i64 = 60;
pub const RETRY_MAX_SECONDS: i64 = 3600;

/// `scheduled_at` for a newly created job.
///
/// Step 1 is anchored at `max(anchor, now)` (the campaign's `start_time`,
/// or launch time if sooner has already passed). Step n>1 is anchored at
/// the *actual* send time of step n-1 plus that step's configured delay —
/// never the previous step's `scheduled_at` — so pauses and poll latency
/// don't compound drift into later steps.
pub fn next_scheduled_at(
    step_number: i32,
    anchor: DateTime<Utc>,
    now: DateTime<Utc>,
    previous_sent_at: Option<DateTime<Utc>>,
    delay_minutes: i32,
) -> DateTime<Utc> {
    if step_number <= 1 {
        anchor.max(now)
    } else {
        let previous_sent_at = previous_sent_at
            .expect("step_number > 1 requires the previous step's actual send time");
        previous_sent_at + Duration::minutes(delay_minutes as i64)
    }
}

/// Exponential backoff for a transient send failure: `base * 2^(attempts-1)`,
/// capped at one hour.
pub fn retry_backoff_at(now: DateTime<Utc>, attempts: i32) -> DateTime<Utc> {
    let exponent = (attempts - 1).max(0) as u32;
    let seconds = RETRY_BASE_SECONDS
        .saturating_mul(2i64.saturating_pow(exponent))
        .min(RETRY_MAX_SECONDS);
    now + Duration::seconds(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn step_one_anchors_at_start_time_when_in_the_future() {
        let anchor = ts(1_000);
        let now = ts(500);
        assert_eq!(next_scheduled_at(1, anchor, now, None, 999), anchor);
    }

    #[test]
    fn step_one_anchors_at_now_when_start_time_already_passed() {
        let anchor = ts(100);
        let now = ts(500);
        assert_eq!(next_scheduled_at(1, anchor, now, None, 999), now);
    }

    #[test]
    fn step_two_measures_delay_from_actual_send_not_scheduled_time() {
        let anchor = ts(0);
        let now = ts(10_000); // dispatcher running very late
        let previous_sent_at = ts(5_000); // but the send itself happened here
        let delay_minutes = 60;
        let got = next_scheduled_at(2, anchor, now, Some(previous_sent_at), delay_minutes);
        assert_eq!(got, previous_sent_at + Duration::minutes(60));
    }

    #[test]
    fn retry_backoff_doubles_and_caps_at_one_hour() {
        let now = ts(0);
        assert_eq!(retry_backoff_at(now, 1), now + Duration::seconds(60));
        assert_eq!(retry_backoff_at(now, 2), now + Duration::seconds(120));
        assert_eq!(retry_backoff_at(now, 3), now + Duration::seconds(240));
        // attempts=7 would be 60*2^6=3840s, clamped to 3600s (1h).
        assert_eq!(retry_backoff_at(now, 7), now + Duration::seconds(3600));
    }

    proptest! {
        #[test]
        fn retry_backoff_is_never_negative_or_unbounded(attempts in 1i32..50) {
            let now = ts(1_700_000_000);
            let at = retry_backoff_at(now, attempts);
            prop_assert!(at >= now);
            prop_assert!(at <= now + Duration::seconds(RETRY_MAX_SECONDS));
        }

        #[test]
        fn step_one_never_schedules_before_now(anchor_secs in 0i64..2_000_000_000, now_secs in 0i64..2_000_000_000) {
            let anchor = ts(anchor_secs);
            let now = ts(now_secs);
            let scheduled = next_scheduled_at(1, anchor, now, None, 0);
            prop_assert!(scheduled >= now);
            prop_assert!(scheduled >= anchor);
        }
    }
}
