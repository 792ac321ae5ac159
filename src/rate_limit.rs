use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::Millis;
use crate::error::{ChatError, Result};

pub const DAILY_MAX_REQUESTS: u32 = 20;
pub const DAILY_DURATION: Duration = Duration::from_secs(24 * 60 * 60);
pub const HOURLY_MAX_REQUESTS: u32 = 10;
pub const HOURLY_DURATION: Duration = Duration::from_secs(60 * 60);

const MINUTE_MS: Millis = 60_000;

pub fn duration_millis(d: Duration) -> Millis {
    Millis::try_from(d.as_millis()).unwrap_or(Millis::MAX)
}

/// Quota for one counting window, and the cooldown imposed once it is spent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_requests: u32,
    pub window: Duration,
    pub block: Duration,
}

impl RateLimitPolicy {
    pub fn daily() -> Self {
        Self {
            max_requests: DAILY_MAX_REQUESTS,
            window: DAILY_DURATION,
            block: DAILY_DURATION,
        }
    }

    pub fn hourly() -> Self {
        Self {
            max_requests: HOURLY_MAX_REQUESTS,
            window: HOURLY_DURATION,
            block: HOURLY_DURATION,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let problem = if self.max_requests == 0 {
            "rate_limit.max_requests must be at least 1"
        } else if self.window.is_zero() {
            "rate_limit.window_secs must be at least 1"
        } else if self.block.is_zero() {
            "rate_limit.block_secs must be at least 1"
        } else {
            return Ok(());
        };
        Err(ChatError::Config(problem.to_string()))
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::daily()
    }
}

// Rate limit entry - persisted between runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub request_count: u32,
    pub window_start: Option<Millis>,
    pub blocked_until: Option<Millis>,
}

impl RateLimitState {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn fresh_window(now: Millis) -> Self {
        Self {
            request_count: 1,
            window_start: Some(now),
            blocked_until: None,
        }
    }

    /// Time left on an active block, `None` when not blocked at `now`.
    pub fn remaining_block(&self, now: Millis) -> Option<Duration> {
        match self.blocked_until {
            Some(until) if now < until => Some(Duration::from_millis((until - now) as u64)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// First request of a new window (first use, expired window or lapsed block).
    StartWindow,
    /// Counted against the running window.
    Increment { request_count: u32 },
    /// Already blocked.
    Deny { blocked_until: Millis },
    /// Quota spent by this request; block starts now.
    Block { blocked_until: Millis },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::StartWindow | Decision::Increment { .. })
    }

    pub fn blocked_until(&self) -> Option<Millis> {
        match self {
            Decision::Deny { blocked_until } | Decision::Block { blocked_until } => {
                Some(*blocked_until)
            }
            _ => None,
        }
    }
}

/// Decide whether a request at `now` may go out, and the state to persist.
pub fn evaluate(
    policy: &RateLimitPolicy,
    now: Millis,
    state: RateLimitState,
) -> (Decision, RateLimitState) {
    if let Some(blocked_until) = state.blocked_until {
        if now < blocked_until {
            return (Decision::Deny { blocked_until }, state);
        }
        // block lapsed, counting restarts from scratch
        return (Decision::StartWindow, RateLimitState::fresh_window(now));
    }

    // window expired..? Reset it
    let window_open = state
        .window_start
        .is_some_and(|start| now.saturating_sub(start) <= duration_millis(policy.window));
    if !window_open {
        return (Decision::StartWindow, RateLimitState::fresh_window(now));
    }

    // under limit..? Allow
    if state.request_count < policy.max_requests {
        let request_count = state.request_count + 1;
        return (
            Decision::Increment { request_count },
            RateLimitState {
                request_count,
                ..state
            },
        );
    }

    // over limit
    let blocked_until = now.saturating_add(duration_millis(policy.block));
    (
        Decision::Block { blocked_until },
        RateLimitState {
            blocked_until: Some(blocked_until),
            ..state
        },
    )
}

/// Whole minutes left, rounded up, as shown on the block banner.
pub fn minutes_remaining(remaining: Duration) -> u64 {
    let ms = duration_millis(remaining);
    (ms.saturating_add(MINUTE_MS - 1) / MINUTE_MS).max(0) as u64
}

/// "24 hours", "1 hour", "90 minutes", "45 seconds".
pub fn describe_duration(d: Duration) -> String {
    let secs = d.as_secs();
    let plural = |n: u64, unit: &str| {
        if n == 1 {
            format!("1 {}", unit)
        } else {
            format!("{} {}s", n, unit)
        }
    };
    if secs >= 3600 && secs % 3600 == 0 {
        plural(secs / 3600, "hour")
    } else if secs >= 60 && secs % 60 == 0 {
        plural(secs / 60, "minute")
    } else {
        plural(secs, "second")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const MIN: Millis = 60_000;
    const HOUR: Millis = 60 * MIN;

    fn policy(max_requests: u32) -> RateLimitPolicy {
        RateLimitPolicy {
            max_requests,
            window: Duration::from_secs(3600),
            block: Duration::from_secs(3600),
        }
    }

    #[test]
    fn first_call_starts_window() {
        let (decision, next) = evaluate(&policy(3), 5_000, RateLimitState::default());
        assert_eq!(decision, Decision::StartWindow);
        assert_eq!(next, RateLimitState::fresh_window(5_000));
    }

    #[test]
    fn count_without_window_start_is_treated_as_expired() {
        let state = RateLimitState {
            request_count: 7,
            window_start: None,
            blocked_until: None,
        };
        let (decision, next) = evaluate(&policy(3), 10, state);
        assert_eq!(decision, Decision::StartWindow);
        assert_eq!(next.request_count, 1);
    }

    #[test]
    fn extra_call_in_window_blocks() {
        let p = policy(3);
        let mut state = RateLimitState::default();
        for i in 0..3 {
            let (decision, next) = evaluate(&p, i * MIN, state);
            assert!(decision.is_allowed(), "call {} should pass", i + 1);
            state = next;
        }
        assert_eq!(state.request_count, 3);

        let (decision, next) = evaluate(&p, 3 * MIN, state);
        assert_eq!(
            decision,
            Decision::Block {
                blocked_until: 3 * MIN + HOUR
            }
        );
        assert_eq!(next.blocked_until, Some(3 * MIN + HOUR));
        assert_eq!(next.request_count, 3);
    }

    #[test]
    fn blocked_state_is_unchanged_on_deny() {
        let state = RateLimitState {
            request_count: 3,
            window_start: Some(0),
            blocked_until: Some(HOUR),
        };
        let (decision, next) = evaluate(&policy(3), HOUR - 1, state);
        assert_eq!(decision, Decision::Deny { blocked_until: HOUR });
        assert_eq!(next, state);
    }

    #[test]
    fn lapsed_block_resets_window_at_deadline() {
        let state = RateLimitState {
            request_count: 3,
            window_start: Some(0),
            blocked_until: Some(HOUR),
        };
        let (decision, next) = evaluate(&policy(3), HOUR, state);
        assert_eq!(decision, Decision::StartWindow);
        assert_eq!(next, RateLimitState::fresh_window(HOUR));
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let state = RateLimitState {
            request_count: 1,
            window_start: Some(0),
            blocked_until: None,
        };
        let (decision, _) = evaluate(&policy(3), HOUR, state);
        assert_eq!(decision, Decision::Increment { request_count: 2 });

        let (decision, _) = evaluate(&policy(3), HOUR + 1, state);
        assert_eq!(decision, Decision::StartWindow);
    }

    #[test]
    fn two_request_scenario() {
        let p = policy(2);
        let state = RateLimitState::default();

        let (d, state) = evaluate(&p, 0, state);
        assert_eq!(d, Decision::StartWindow);
        assert_eq!(state.request_count, 1);

        let (d, state) = evaluate(&p, MIN, state);
        assert_eq!(d, Decision::Increment { request_count: 2 });

        let (d, state) = evaluate(&p, 2 * MIN, state);
        assert_eq!(
            d,
            Decision::Block {
                blocked_until: 2 * MIN + HOUR
            }
        );

        let (d, state) = evaluate(&p, 59 * MIN, state);
        assert!(!d.is_allowed());

        let (d, state) = evaluate(&p, 61 * MIN, state);
        assert!(!d.is_allowed());

        let (d, state) = evaluate(&p, 62 * MIN, state);
        assert_eq!(d, Decision::StartWindow);
        assert_eq!(state.request_count, 1);
        assert_eq!(state.blocked_until, None);
    }

    #[test]
    fn remaining_block_rounds_minutes_up() {
        let state = RateLimitState {
            request_count: 0,
            window_start: None,
            blocked_until: Some(HOUR),
        };
        let left = state.remaining_block(HOUR - MIN - 1).unwrap();
        assert_eq!(minutes_remaining(left), 2);
        assert_eq!(minutes_remaining(state.remaining_block(HOUR - 1).unwrap()), 1);
        assert_eq!(state.remaining_block(HOUR), None);
    }

    #[test]
    fn describes_presets() {
        assert_eq!(describe_duration(DAILY_DURATION), "24 hours");
        assert_eq!(describe_duration(HOURLY_DURATION), "1 hour");
        assert_eq!(describe_duration(Duration::from_secs(90)), "90 seconds");
        assert_eq!(describe_duration(Duration::from_secs(120)), "2 minutes");
    }

    #[test]
    fn validate_rejects_zeroes() {
        assert!(RateLimitPolicy::daily().validate().is_ok());
        let no_quota = RateLimitPolicy {
            max_requests: 0,
            ..RateLimitPolicy::hourly()
        };
        assert!(matches!(
            no_quota.validate(),
            Err(ChatError::Config(msg)) if msg.contains("max_requests")
        ));
        let no_window = RateLimitPolicy {
            window: Duration::ZERO,
            ..RateLimitPolicy::hourly()
        };
        assert!(matches!(no_window.validate(), Err(ChatError::Config(_))));
        let no_block = RateLimitPolicy {
            block: Duration::ZERO,
            ..RateLimitPolicy::hourly()
        };
        assert!(matches!(
            no_block.validate(),
            Err(ChatError::Config(msg)) if msg.contains("block_secs")
        ));
    }

    proptest! {
        #[test]
        fn under_quota_increments_by_one(
            max in 1u32..50,
            used in 1u32..50,
            elapsed in 0i64..=HOUR,
        ) {
            prop_assume!(used < max);
            let state = RateLimitState {
                request_count: used,
                window_start: Some(1_000),
                blocked_until: None,
            };
            let (decision, next) = evaluate(&policy(max), 1_000 + elapsed, state);
            prop_assert!(decision.is_allowed());
            prop_assert_eq!(next.request_count, used + 1);
            prop_assert_eq!(next.window_start, Some(1_000));
        }

        #[test]
        fn expired_window_always_resets(
            used in 0u32..1_000,
            overshoot in 1i64..(10 * HOUR),
        ) {
            let state = RateLimitState {
                request_count: used,
                window_start: Some(0),
                blocked_until: None,
            };
            let now = HOUR + overshoot;
            let (decision, next) = evaluate(&policy(5), now, state);
            prop_assert_eq!(decision, Decision::StartWindow);
            prop_assert_eq!(next, RateLimitState::fresh_window(now));
        }

        #[test]
        fn active_block_always_denies(
            until in 1i64..(10 * HOUR),
            before in 1i64..HOUR,
        ) {
            let state = RateLimitState {
                request_count: 5,
                window_start: Some(0),
                blocked_until: Some(until),
            };
            let (decision, next) = evaluate(&policy(5), until - before, state);
            prop_assert_eq!(decision, Decision::Deny { blocked_until: until });
            prop_assert_eq!(next, state);
        }
    }
}
