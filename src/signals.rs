// Termination signal handling
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Handlers only flip flags. Releasing the line and logging happen on the
// main thread once the monitor loop sees the flag at a poll boundary, so a
// repeated signal never exits around the release.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use nix::sys::signal::Signal;
use signal_hook::consts::{SIGHUP, TERM_SIGNALS};
use signal_hook::flag;

#[derive(Debug, Clone)]
pub struct TermSignals {
    stop: Arc<AtomicBool>,
    last: Arc<AtomicUsize>,
}

impl TermSignals {
    /// Register SIGTERM, SIGINT, SIGQUIT and SIGHUP.
    /// Repeated signals only set the flag again.
    pub fn install() -> io::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let last = Arc::new(AtomicUsize::new(0));

        for &sig in TERM_SIGNALS.iter().chain(std::iter::once(&SIGHUP)) {
            flag::register(sig, Arc::clone(&stop))?;
            flag::register_usize(sig, Arc::clone(&last), sig as usize)?;
        }

        Ok(Self { stop, last })
    }

    /// Flag polled by the monitor loop
    pub fn flag(&self) -> &AtomicBool {
        &self.stop
    }

    /// Most recent termination signal, if any
    pub fn received(&self) -> Option<Signal> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            sig => Signal::try_from(sig as i32).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_sets_stop_flag() {
        let signals = TermSignals::install().unwrap();
        assert!(!signals.flag().load(Ordering::Acquire));
        assert_eq!(signals.received(), None);

        nix::sys::signal::raise(Signal::SIGHUP).unwrap();
        assert!(signals.flag().load(Ordering::Acquire));
        assert_eq!(signals.received(), Some(Signal::SIGHUP));

        // A second signal while stopping must not terminate the process
        nix::sys::signal::raise(Signal::SIGHUP).unwrap();
        assert!(signals.flag().load(Ordering::Acquire));
        assert_eq!(signals.received(), Some(Signal::SIGHUP));
    }
}
