// systemd service manager integration
// SPDX-License-Identifier: GPL-3.0-or-later

use std::time::{Duration, Instant};

use libsystemd::daemon::{self, NotifyState};

use crate::debug;

fn notify(state: &[NotifyState]) {
    // Outside systemd NOTIFY_SOCKET is unset and notify() is a no-op
    if let Err(e) = daemon::notify(false, state) {
        debug!("sd_notify failed: {}", e);
    }
}

/// Tell systemd the line is claimed and the monitor is polling
pub fn notify_ready() {
    notify(&[NotifyState::Ready]);
}

pub fn notify_status(status: &str) {
    notify(&[NotifyState::Status(status.to_string())]);
}

pub fn notify_stopping() {
    notify(&[NotifyState::Stopping]);
}

/// Keep-alive for units with WatchdogSec=, sent at half the watchdog interval
#[derive(Debug)]
pub struct Watchdog {
    interval: Duration,
    last: Option<Instant>,
}

impl Watchdog {
    /// `None` unless systemd armed a watchdog for this process
    pub fn from_env() -> Option<Self> {
        daemon::watchdog_enabled(false).map(Self::with_timeout)
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            interval: timeout / 2,
            last: None,
        }
    }

    /// Whether a keep-alive is due at `now`; records the kick when it is
    pub fn due(&mut self, now: Instant) -> bool {
        let due = self
            .last
            .map_or(true, |last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last = Some(now);
        }
        due
    }

    pub fn kick(&mut self, now: Instant) {
        if self.due(now) {
            notify(&[NotifyState::Watchdog]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watchdog_kicks_at_half_interval() {
        let mut watchdog = Watchdog::with_timeout(Duration::from_secs(10));
        let start = Instant::now();

        assert!(watchdog.due(start));
        assert!(!watchdog.due(start + Duration::from_secs(4)));
        assert!(watchdog.due(start + Duration::from_secs(5)));
        assert!(!watchdog.due(start + Duration::from_secs(6)));
    }

    #[test]
    fn test_notify_outside_systemd_is_harmless() {
        notify_status("testing");
        notify_ready();
        notify_stopping();
    }
}
