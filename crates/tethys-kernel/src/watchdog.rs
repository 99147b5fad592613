//! [`CommandWatchdog`] – command-link health monitor.
//!
//! The command path calls [`CommandWatchdog::heartbeat`] whenever a valid
//! command arrives.  The actuator loop calls [`CommandWatchdog::check`]
//! every sub-period and forces Neutral-Hold once the link has been silent
//! for longer than the timeout.
//!
//! The last-command time is a single atomic (nanoseconds since the
//! watchdog's origin), so the writer never waits on the reader.  A watchdog
//! that has never seen a command reports [`LinkHealth::Expired`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Link state reported by a watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkHealth {
    /// A valid command arrived within the timeout.
    Fresh,
    /// No valid command for longer than the timeout.
    Expired {
        /// Time since the last command, or since start if none ever came.
        silent: Duration,
    },
}

impl LinkHealth {
    pub fn is_fresh(&self) -> bool {
        matches!(self, LinkHealth::Fresh)
    }
}

/// Sentinel for "no command received yet".
const NEVER: u64 = u64::MAX;

// ────────────────────────────────────────────────────────────────────────────
// Watchdog
// ────────────────────────────────────────────────────────────────────────────

/// Tracks the time of the last valid command.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use tethys_kernel::watchdog::{CommandWatchdog, LinkHealth};
///
/// let wd = CommandWatchdog::new(Duration::from_secs(1));
/// assert!(!wd.check().is_fresh());
///
/// wd.heartbeat();
/// assert_eq!(wd.check(), LinkHealth::Fresh);
/// ```
#[derive(Debug)]
pub struct CommandWatchdog {
    origin: Instant,
    last_command_ns: AtomicU64,
    timeout: Duration,
}

impl CommandWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            origin: Instant::now(),
            last_command_ns: AtomicU64::new(NEVER),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Record a valid command now.
    pub fn heartbeat(&self) {
        self.heartbeat_at(Instant::now());
    }

    /// Record a valid command at `now`.
    pub fn heartbeat_at(&self, now: Instant) {
        let ns = now.saturating_duration_since(self.origin).as_nanos();
        let ns = u64::try_from(ns).unwrap_or(NEVER - 1);
        self.last_command_ns.store(ns, Ordering::Release);
    }

    /// Time since the last command as seen at `now`.
    pub fn silent_for(&self, now: Instant) -> Duration {
        let since_origin = now.saturating_duration_since(self.origin);
        match self.last_command_ns.load(Ordering::Acquire) {
            NEVER => since_origin,
            ns => since_origin.saturating_sub(Duration::from_nanos(ns)),
        }
    }

    pub fn check(&self) -> LinkHealth {
        self.check_at(Instant::now())
    }

    /// Link health as seen at `now`.
    pub fn check_at(&self, now: Instant) -> LinkHealth {
        let never = self.last_command_ns.load(Ordering::Acquire) == NEVER;
        let silent = self.silent_for(now);
        if never || silent > self.timeout {
            LinkHealth::Expired { silent }
        } else {
            LinkHealth::Fresh
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn never_commanded_is_expired() {
        let wd = CommandWatchdog::new(Duration::from_secs(5));
        assert!(matches!(wd.check(), LinkHealth::Expired { .. }));
    }

    #[test]
    fn heartbeat_makes_link_fresh() {
        let wd = CommandWatchdog::new(Duration::from_secs(5));
        wd.heartbeat();
        assert_eq!(wd.check(), LinkHealth::Fresh);
    }

    #[test]
    fn expires_strictly_after_timeout() {
        let wd = CommandWatchdog::new(Duration::from_millis(1000));
        let t0 = Instant::now();
        wd.heartbeat_at(t0);
        assert!(wd.check_at(t0 + Duration::from_millis(999)).is_fresh());
        assert!(wd.check_at(t0 + Duration::from_millis(1000)).is_fresh());
        match wd.check_at(t0 + Duration::from_millis(1001)) {
            LinkHealth::Expired { silent } => assert_eq!(silent, Duration::from_millis(1001)),
            other => panic!("expected expiry, got {other:?}"),
        }
    }

    #[test]
    fn heartbeat_resets_deadline() {
        let wd = CommandWatchdog::new(Duration::from_millis(20));
        wd.heartbeat();
        thread::sleep(Duration::from_millis(10));
        wd.heartbeat();
        thread::sleep(Duration::from_millis(10));
        assert!(wd.check().is_fresh());
    }

    #[test]
    fn link_times_out_when_silent() {
        let wd = CommandWatchdog::new(Duration::from_millis(20));
        wd.heartbeat();
        thread::sleep(Duration::from_millis(30));
        assert!(!wd.check().is_fresh());
    }

    #[test]
    fn heartbeats_from_another_thread_are_visible() {
        let wd = std::sync::Arc::new(CommandWatchdog::new(Duration::from_secs(1)));
        let writer = std::sync::Arc::clone(&wd);
        thread::spawn(move || writer.heartbeat()).join().unwrap();
        assert!(wd.check().is_fresh());
    }
}
