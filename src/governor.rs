use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Millis;
use crate::metrics::{BLOCKED, BLOCKS_ENTERED};
use crate::rate_limit::{Decision, RateLimitPolicy, RateLimitState, duration_millis, evaluate};
use crate::store::CounterStore;

pub type SharedGovernor = Arc<Mutex<Governor>>;

/// What the rest of the client can observe about the rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernorStatus {
    Open { used: u32, limit: u32 },
    Blocked { remaining: Duration },
}

impl GovernorStatus {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GovernorStatus::Blocked { .. })
    }
}

/// Gate in front of every outbound prompt. Wraps the pure [`evaluate`] with
/// loading and persisting of the counters.
pub struct Governor {
    policy: RateLimitPolicy,
    store: Box<dyn CounterStore>,
}

impl Governor {
    pub fn new(policy: RateLimitPolicy, store: Box<dyn CounterStore>) -> Self {
        Self { policy, store }
    }

    pub fn shared(self) -> SharedGovernor {
        Arc::new(Mutex::new(self))
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    fn load(&self) -> RateLimitState {
        match self.store.load() {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!("Rate limit state unavailable, starting fresh: {}", e);
                RateLimitState::default()
            }
        }
    }

    fn persist(&mut self, state: &RateLimitState) {
        if let Err(e) = self.store.save(state) {
            warn!("Failed to persist rate limit state: {}", e);
        }
    }

    /// Evaluate one send attempt at `now` and persist the outcome.
    pub fn check(&mut self, now: Millis) -> Decision {
        let state = self.load();
        let (decision, next) = evaluate(&self.policy, now, state);
        if next != state {
            self.persist(&next);
        }

        match decision {
            Decision::Block { blocked_until } => {
                BLOCKS_ENTERED.inc();
                BLOCKED.set(1.0);
                info!(
                    "Request quota of {} exhausted, blocked until {}",
                    self.policy.max_requests, blocked_until
                );
            }
            Decision::Deny { .. } => BLOCKED.set(1.0),
            Decision::StartWindow | Decision::Increment { .. } => BLOCKED.set(0.0),
        }
        debug!("Governor decision at {}: {:?}", now, decision);
        decision
    }

    /// Read-only view; never writes to the store.
    pub fn status(&self, now: Millis) -> GovernorStatus {
        let state = self.load();
        if let Some(remaining) = state.remaining_block(now) {
            return GovernorStatus::Blocked { remaining };
        }
        let used = match (state.blocked_until, state.window_start) {
            (Some(_), _) => 0,
            (None, Some(start))
                if now.saturating_sub(start) <= duration_millis(self.policy.window) =>
            {
                state.request_count
            }
            _ => 0,
        };
        GovernorStatus::Open {
            used,
            limit: self.policy.max_requests,
        }
    }

    pub fn remaining_block(&self, now: Millis) -> Option<Duration> {
        self.load().remaining_block(now)
    }

    /// Cooldown tick: once a block has lapsed, wipe the counters.
    pub fn release_if_lapsed(&mut self, now: Millis) -> GovernorStatus {
        let state = self.load();
        if let Some(until) = state.blocked_until {
            if now >= until {
                if let Err(e) = self.store.clear() {
                    warn!("Failed to clear rate limit state: {}", e);
                }
                info!("Block lapsed, sends allowed again");
            }
        }
        let status = self.status(now);
        BLOCKED.set(if status.is_blocked() { 1.0 } else { 0.0 });
        status
    }
}
