//! Idle reclamation monitor.
//!
//! Runs inside a sandbox, polls for SSH sessions owned by the sandbox user,
//! and after a grace period with none asks the control API to remove the
//! sandbox. One shot: the callback is sent at most once, then the monitor
//! exits whatever the outcome.

mod callback;
mod probe;

pub(crate) use callback::{HttpReclaimer, ReclaimOutcome, Reclaimer};
pub(crate) use probe::{PgrepProbe, SessionProbe};

use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the monitor is in its poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchState {
    /// A session was seen on the last check.
    Active,
    /// No session seen; waiting out the grace period.
    IdleSuspect,
    /// Still no session after the grace period.
    Reclaim,
}

impl WatchState {
    /// Transition on the result of one session check.
    pub fn next(self, session_active: bool) -> Self {
        match (self, session_active) {
            (_, true) => Self::Active,
            (Self::Active, false) => Self::IdleSuspect,
            (Self::IdleSuspect | Self::Reclaim, false) => Self::Reclaim,
        }
    }
}

/// Poll interval and grace period.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WatchTiming {
    pub poll_interval: Duration,
    pub grace: Duration,
}

pub(crate) struct IdleWatcher<P, R> {
    name: String,
    probe: P,
    reclaimer: R,
    timing: WatchTiming,
}

impl<P: SessionProbe, R: Reclaimer> IdleWatcher<P, R> {
    pub fn new(name: impl Into<String>, probe: P, reclaimer: R, timing: WatchTiming) -> Self {
        Self {
            name: name.into(),
            probe,
            reclaimer,
            timing,
        }
    }

    /// Watch until the sandbox is reclaimed.
    pub async fn run(&self) -> ReclaimOutcome {
        info!("Monitoring SSH activity for {}", self.name);
        let mut state = WatchState::Active;

        loop {
            state = state.next(self.session_active().await);

            match state {
                WatchState::Active => {
                    debug!("User is logged in");
                    tokio::time::sleep(self.timing.poll_interval).await;
                }
                WatchState::IdleSuspect => {
                    info!(
                        "No active SSH sessions. Waiting {}s...",
                        self.timing.grace.as_secs()
                    );
                    tokio::time::sleep(self.timing.grace).await;
                }
                WatchState::Reclaim => {
                    info!("Removing sandbox {} (idle)", self.name);
                    let outcome = self.reclaimer.reclaim(&self.name).await;
                    match &outcome {
                        ReclaimOutcome::Removed => info!("Removal requested for {}", self.name),
                        ReclaimOutcome::AlreadyGone => info!("{} was already removed", self.name),
                        ReclaimOutcome::Failed(e) => warn!("Removal of {} failed: {}", self.name, e),
                    }
                    return outcome;
                }
            }
        }
    }

    /// Probe failures count as activity: never reclaim on uncertainty.
    async fn session_active(&self) -> bool {
        match self.probe.has_active_session().await {
            Ok(active) => active,
            Err(e) => {
                warn!("Session check failed, assuming active: {:#}", e);
                true
            }
        }
    }
}
