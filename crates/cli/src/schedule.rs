//! Periodic refresh loop for `countyval watch`.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::{error, info};

use crate::CliError;

/// Shared cancellation flag. Cancelling wakes any thread parked in
/// [`CancelToken::wait_timeout`].
#[derive(Clone, Default)]
pub struct CancelToken {
    state: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, condvar) = &*self.state;
        *flag.lock().unwrap_or_else(|e| e.into_inner()) = true;
        condvar.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.0.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Sleep up to `timeout`. Returns true if cancelled before or during the wait.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (flag, condvar) = &*self.state;
        let deadline = Instant::now() + timeout;
        let mut cancelled = flag.lock().unwrap_or_else(|e| e.into_inner());

        // Loop guards against spurious wakeups
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = match condvar.wait_timeout(cancelled, deadline - now) {
                Ok((guard, _)) => guard,
                Err(e) => e.into_inner().0,
            };
        }
        *cancelled
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleStats {
    pub succeeded: u64,
    pub failed: u64,
}

impl ScheduleStats {
    pub fn cycles(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Runs a cycle every `interval` until cancelled or `max_cycles` is reached.
/// A cycle in progress always finishes; cancellation is observed between cycles.
pub struct Scheduler {
    interval: Duration,
    max_cycles: Option<u64>,
    token: CancelToken,
}

impl Scheduler {
    pub fn new(interval: Duration, max_cycles: Option<u64>, token: CancelToken) -> Self {
        Self { interval, max_cycles, token }
    }

    /// Run `cycle` repeatedly. A failing cycle is logged and the loop waits
    /// for the next tick. `cycle` may change the wait before the next tick
    /// through its `&mut Duration` argument; the change sticks.
    pub fn run(
        &self,
        mut cycle: impl FnMut(u64, &mut Duration) -> Result<(), CliError>,
    ) -> ScheduleStats {
        let mut stats = ScheduleStats::default();
        let mut interval = self.interval;

        loop {
            if self.token.is_cancelled() {
                break;
            }

            let n = stats.cycles() + 1;
            match cycle(n, &mut interval) {
                Ok(()) => {
                    stats.succeeded += 1;
                    info!(cycle = n, "refresh cycle complete");
                }
                Err(e) => {
                    stats.failed += 1;
                    error!(cycle = n, code = e.code, "refresh cycle failed: {}", e.message);
                }
            }

            if self.max_cycles.is_some_and(|max| stats.cycles() >= max) {
                break;
            }

            info!(next_in_secs = interval.as_secs(), "waiting for next refresh");
            if self.token.wait_timeout(interval) {
                break;
            }
        }

        stats
    }
}
