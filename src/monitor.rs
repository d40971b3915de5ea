// Polling loop: samples the line, drives the hold evaluator, fires the halt
// SPDX-License-Identifier: GPL-3.0-or-later

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::MonitorConfig;
use crate::defaults;
use crate::gpio::LineReader;
use crate::halt::HaltAction;
use crate::hold::{HoldEvaluator, State, Transition};
use crate::systemd::{notify_status, notify_stopping, Watchdog};
use crate::{debug, error, info, warn};

/// Time source for the loop, replaceable with virtual time in tests
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&mut self, duration: Duration);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Why the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Termination signal; the halt was not invoked
    Stopped,
    /// Hold confirmed and the halt command succeeded
    HaltRequested,
    /// Hold confirmed but the halt command failed
    HaltFailed,
}

pub struct Monitor<'a> {
    pin: u32,
    poll_interval: Duration,
    evaluator: HoldEvaluator,
    reader: &'a mut dyn LineReader,
    halt: &'a mut dyn HaltAction,
    clock: &'a mut dyn Clock,
    watchdog: Option<Watchdog>,
    read_errors: u64,
}

impl<'a> Monitor<'a> {
    pub fn new(
        config: &MonitorConfig,
        reader: &'a mut dyn LineReader,
        halt: &'a mut dyn HaltAction,
        clock: &'a mut dyn Clock,
    ) -> Self {
        Self {
            pin: config.pin,
            poll_interval: config.poll_interval,
            evaluator: HoldEvaluator::new(config.hold_duration),
            reader,
            halt,
            clock,
            watchdog: None,
            read_errors: 0,
        }
    }

    pub fn with_watchdog(mut self, watchdog: Option<Watchdog>) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn state(&self) -> State {
        self.evaluator.state()
    }

    /// Poll until a hold is confirmed or `stop` is raised.
    /// The halt action runs at most once; no sample is taken after it.
    pub fn run(&mut self, stop: &AtomicBool) -> Outcome {
        loop {
            if stop.load(Ordering::Acquire) {
                info!(
                    "Monitor: stop requested (state={}, pin={})",
                    self.evaluator.state(),
                    self.pin
                );
                return Outcome::Stopped;
            }

            let now = self.clock.now();
            let actuated = self.sample();
            let mut transition = self.evaluator.observe(actuated, now);

            if let Transition::HoldElapsed { held } = transition {
                debug!("GPIO {}: hold elapsed after {} ms, re-checking", self.pin, held.as_millis());
                let still_actuated = self.sample();
                transition = self.evaluator.verify(still_actuated, self.clock.now());
            }
            self.log_transition(transition);

            if self.evaluator.is_confirmed() {
                return self.fire();
            }

            if let Some(watchdog) = self.watchdog.as_mut() {
                watchdog.kick(now);
            }
            self.clock.sleep(self.poll_interval);
        }
    }

    /// One reading; failures count as idle so uncertain input never presses
    fn sample(&mut self) -> bool {
        match self.reader.read() {
            Ok(actuated) => {
                if self.read_errors > 0 {
                    info!(
                        "GPIO {}: reads recovered after {} failure(s)",
                        self.pin, self.read_errors
                    );
                    self.read_errors = 0;
                }
                actuated
            }
            Err(e) => {
                self.read_errors += 1;
                if self.read_errors == 1 || self.read_errors % defaults::READ_ERROR_LOG_EVERY == 0 {
                    if e.is_transient() {
                        warn!("{} (treated as idle, {} consecutive)", e, self.read_errors);
                    } else {
                        error!("{} (treated as idle, {} consecutive)", e, self.read_errors);
                    }
                }
                false
            }
        }
    }

    fn log_transition(&self, transition: Transition) {
        match transition {
            Transition::Pressed => {
                info!("transition from=idle to=candidate pin={}", self.pin);
                notify_status("Button held");
            }
            Transition::Released { held } => {
                info!(
                    "transition from=candidate to=idle pin={} held_ms={}",
                    self.pin,
                    held.as_millis()
                );
                notify_status("Monitoring");
            }
            Transition::Confirmed { held } => {
                info!(
                    "transition from=candidate to=confirmed pin={} held_ms={}",
                    self.pin,
                    held.as_millis()
                );
                notify_status("Shutdown confirmed");
            }
            Transition::HoldElapsed { .. } | Transition::None => {}
        }
    }

    fn fire(&mut self) -> Outcome {
        match self.halt.halt() {
            Ok(()) => {
                info!("Halt: requested via '{}'", self.halt.describe());
                Outcome::HaltRequested
            }
            Err(e) => {
                error!("Halt: {}", e);
                Outcome::HaltFailed
            }
        }
    }
}

/// Run the monitor, release the line on every outcome and map the outcome
/// to the exit status the unit manager acts on
pub fn supervise(
    config: &MonitorConfig,
    line: &mut dyn LineReader,
    halt: &mut dyn HaltAction,
    clock: &mut dyn Clock,
    watchdog: Option<Watchdog>,
    stop: &AtomicBool,
) -> i32 {
    let outcome = Monitor::new(config, &mut *line, halt, clock)
        .with_watchdog(watchdog)
        .run(stop);

    line.release();

    match outcome {
        Outcome::Stopped => {
            notify_stopping();
            info!("Stopped");
            defaults::EXIT_OK
        }
        Outcome::HaltRequested if config.dry_run => {
            // Nothing was halted, so let the unit manager restart us as usual
            info!("Dry run complete, exiting");
            defaults::EXIT_OK
        }
        Outcome::HaltRequested => {
            info!("Shutdown in progress, exiting");
            defaults::EXIT_HALT_REQUESTED
        }
        Outcome::HaltFailed => {
            // Restart so the button works again
            error!("Shutdown failed, exiting for restart");
            defaults::EXIT_FATAL
        }
    }
}
