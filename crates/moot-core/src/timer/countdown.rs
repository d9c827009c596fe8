//! Pure countdown arithmetic shared by ticking and crash recovery.
//!
//! Elapsed time is counted in whole seconds (floor). When a countdown keeps
//! running, `last_tick` advances by exactly the seconds consumed so that the
//! sub-second remainder is carried into the next call; frequent ticks never
//! lose time to truncation. When the countdown reaches zero, is paused, or the
//! clock went backwards, `last_tick` is reset to `now`.

use chrono::{DateTime, Duration, Utc};

/// Result of applying elapsed time to a countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    /// Seconds left after the update.
    pub remaining_seconds: u32,
    /// Seconds deducted by this update.
    pub consumed_seconds: u32,
    /// `true` when the countdown is (now) at zero.
    pub expired: bool,
    /// New accounting instant to persist.
    pub last_tick: DateTime<Utc>,
    /// `true` if `now` was earlier than the previous accounting instant.
    pub clock_regressed: bool,
}

/// Applies the time between `last_tick` and `now` to `remaining`.
#[must_use]
pub fn apply(
    now: DateTime<Utc>,
    last_tick: DateTime<Utc>,
    remaining: u32,
    paused: bool,
) -> Countdown {
    if paused {
        return Countdown {
            remaining_seconds: remaining,
            consumed_seconds: 0,
            expired: remaining == 0,
            last_tick: now,
            clock_regressed: false,
        };
    }

    let elapsed = now.signed_duration_since(last_tick);
    if elapsed < Duration::zero() {
        return Countdown {
            remaining_seconds: remaining,
            consumed_seconds: 0,
            expired: remaining == 0,
            last_tick: now,
            clock_regressed: true,
        };
    }

    let elapsed_secs = u32::try_from(elapsed.num_seconds()).unwrap_or(u32::MAX);
    let consumed = elapsed_secs.min(remaining);
    let remaining_after = remaining - consumed;

    let last_tick = if remaining_after == 0 {
        now
    } else {
        last_tick + Duration::seconds(i64::from(consumed))
    };

    Countdown {
        remaining_seconds: remaining_after,
        consumed_seconds: consumed,
        expired: remaining_after == 0,
        last_tick,
        clock_regressed: false,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn whole_seconds_are_deducted() {
        let c = apply(t(10_000), t(0), 300, false);
        assert_eq!(c.remaining_seconds, 290);
        assert_eq!(c.consumed_seconds, 10);
        assert!(!c.expired);
        assert_eq!(c.last_tick, t(10_000));
    }

    #[test]
    fn partial_seconds_floor_and_carry() {
        let c = apply(t(1_700), t(0), 300, false);
        assert_eq!(c.remaining_seconds, 299);
        assert_eq!(c.last_tick, t(1_000));

        // The carried 700 ms plus another 400 ms crosses a second boundary.
        let c = apply(t(2_100), c.last_tick, c.remaining_seconds, false);
        assert_eq!(c.remaining_seconds, 298);
        assert_eq!(c.last_tick, t(2_000));
    }

    #[test]
    fn no_elapsed_time_is_a_no_op() {
        let c = apply(t(0), t(0), 42, false);
        assert_eq!(c.remaining_seconds, 42);
        assert_eq!(c.consumed_seconds, 0);
        assert_eq!(c.last_tick, t(0));
    }

    #[test]
    fn overrun_clamps_to_zero() {
        let c = apply(t(400_000), t(0), 300, false);
        assert_eq!(c.remaining_seconds, 0);
        assert_eq!(c.consumed_seconds, 300);
        assert!(c.expired);
        assert_eq!(c.last_tick, t(400_000));
    }

    #[test]
    fn paused_countdown_only_refreshes_last_tick() {
        let c = apply(t(60_000), t(0), 120, true);
        assert_eq!(c.remaining_seconds, 120);
        assert_eq!(c.consumed_seconds, 0);
        assert_eq!(c.last_tick, t(60_000));
    }

    #[test]
    fn backwards_clock_consumes_nothing() {
        let c = apply(t(0), t(5_000), 120, false);
        assert!(c.clock_regressed);
        assert_eq!(c.remaining_seconds, 120);
        assert_eq!(c.last_tick, t(0));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Remaining time never increases and paused time is never consumed.
        #[test]
        fn prop_remaining_is_monotone(
            remaining in 0u32..10_000,
            elapsed_ms in -10_000i64..20_000_000,
            paused in any::<bool>(),
        ) {
            let c = apply(t(elapsed_ms), t(0), remaining, paused);
            prop_assert!(c.remaining_seconds <= remaining);
            prop_assert_eq!(c.remaining_seconds + c.consumed_seconds, remaining);
            if paused {
                prop_assert_eq!(c.consumed_seconds, 0);
            }
            prop_assert!(c.last_tick <= t(elapsed_ms.max(0)));
        }

        /// Splitting an interval into many ticks consumes exactly as much as
        /// one tick over the whole interval.
        #[test]
        fn prop_ticks_do_not_drift(steps in prop::collection::vec(1i64..3_000, 1..40)) {
            let start_remaining = 10_000u32;
            let mut remaining = start_remaining;
            let mut last_tick = t(0);
            let mut now_ms = 0i64;
            for step in &steps {
                now_ms += step;
                let c = apply(t(now_ms), last_tick, remaining, false);
                remaining = c.remaining_seconds;
                last_tick = c.last_tick;
            }
            let single = apply(t(now_ms), t(0), start_remaining, false);
            prop_assert_eq!(remaining, single.remaining_seconds);
        }
    }
}
