use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::governor::{GovernorStatus, SharedGovernor};

pub const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Ticks while the governor is blocked and releases it once the block lapses.
///
/// The task only exists between entering the blocked state and the first tick
/// that observes the deadline; every tick publishes the latest status.
pub struct CooldownTimer {
    tick: Duration,
    status_tx: watch::Sender<GovernorStatus>,
    handle: Option<JoinHandle<()>>,
}

impl CooldownTimer {
    pub fn new(tick: Duration, initial: GovernorStatus) -> Self {
        let (status_tx, _) = watch::channel(initial);
        Self {
            tick,
            status_tx,
            handle: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<GovernorStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> GovernorStatus {
        *self.status_tx.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Publish a status computed outside the timer (e.g. after a send).
    pub fn publish(&self, status: GovernorStatus) {
        self.status_tx.send_replace(status);
    }

    /// Start ticking. A timer that is already running is left alone.
    pub fn start(&mut self, governor: SharedGovernor, clock: Arc<dyn Clock>) {
        if self.is_running() {
            return;
        }

        let tx = self.status_tx.clone();
        let tick = self.tick;
        info!("Cooldown timer started (tick: {:?})", tick);

        self.handle = Some(tokio::spawn(async move {
            let mut interval = interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;

                let status = governor
                    .lock()
                    .await
                    .release_if_lapsed(clock.now_millis());
                tx.send_replace(status);

                match status {
                    GovernorStatus::Blocked { remaining } => {
                        debug!("Cooldown: {:?} remaining", remaining);
                    }
                    GovernorStatus::Open { .. } => {
                        info!("Cooldown finished, timer stopped");
                        break;
                    }
                }
            }
        }));
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for CooldownTimer {
    fn drop(&mut self) {
        self.stop();
    }
}
