// Debounce and hold-confirmation state machine
// SPDX-License-Identifier: GPL-3.0-or-later
//
// Debouncing comes from the poll cadence alone: a flicker shorter than the
// poll interval is never sampled, and any idle sample drops the candidate.

use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    /// Actuated continuously since `since`
    Candidate { since: Instant },
    /// Terminal
    Confirmed,
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            State::Idle => "idle",
            State::Candidate { .. } => "candidate",
            State::Confirmed => "confirmed",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of feeding one sample to the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    None,
    /// Idle -> Candidate
    Pressed,
    /// Candidate -> Idle before the hold duration elapsed
    Released { held: Duration },
    /// Hold duration reached; call `verify` with a fresh sample
    HoldElapsed { held: Duration },
    /// Candidate -> Confirmed
    Confirmed { held: Duration },
}

#[derive(Debug)]
pub struct HoldEvaluator {
    hold: Duration,
    state: State,
}

impl HoldEvaluator {
    pub fn new(hold: Duration) -> Self {
        Self {
            hold,
            state: State::Idle,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_confirmed(&self) -> bool {
        self.state == State::Confirmed
    }

    /// Feed one sample taken at `now`
    pub fn observe(&mut self, actuated: bool, now: Instant) -> Transition {
        match (self.state, actuated) {
            (State::Confirmed, _) => Transition::None,
            (State::Idle, false) => Transition::None,
            (State::Idle, true) => {
                self.state = State::Candidate { since: now };
                Transition::Pressed
            }
            (State::Candidate { since }, false) => {
                self.state = State::Idle;
                Transition::Released {
                    held: now.saturating_duration_since(since),
                }
            }
            (State::Candidate { since }, true) => {
                let held = now.saturating_duration_since(since);
                if held >= self.hold {
                    Transition::HoldElapsed { held }
                } else {
                    Transition::None
                }
            }
        }
    }

    /// Re-check taken right before promotion, so a release that raced the
    /// timer is not mistaken for a completed hold
    pub fn verify(&mut self, actuated: bool, now: Instant) -> Transition {
        let State::Candidate { since } = self.state else {
            return Transition::None;
        };
        let held = now.saturating_duration_since(since);

        if actuated && held >= self.hold {
            self.state = State::Confirmed;
            Transition::Confirmed { held }
        } else if actuated {
            Transition::None
        } else {
            self.state = State::Idle;
            Transition::Released { held }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLL: Duration = Duration::from_millis(100);
    const HOLD: Duration = Duration::from_secs(2);

    /// Feed samples at POLL spacing, verifying on HoldElapsed with the same sample
    fn feed(evaluator: &mut HoldEvaluator, start: Instant, samples: &[bool]) -> Vec<Transition> {
        let mut out = Vec::new();
        for (i, &actuated) in samples.iter().enumerate() {
            let now = start + POLL * i as u32;
            let t = evaluator.observe(actuated, now);
            let t = match t {
                Transition::HoldElapsed { .. } => evaluator.verify(actuated, now),
                other => other,
            };
            if t != Transition::None {
                out.push(t);
            }
        }
        out
    }

    #[test]
    fn test_idle_samples_stay_idle() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let transitions = feed(&mut evaluator, Instant::now(), &[false; 5]);
        assert!(transitions.is_empty());
        assert_eq!(evaluator.state(), State::Idle);
    }

    #[test]
    fn test_short_press_reverts_to_idle() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let mut samples = vec![true; 15];
        samples.push(false);

        let transitions = feed(&mut evaluator, Instant::now(), &samples);
        assert_eq!(
            transitions,
            vec![
                Transition::Pressed,
                Transition::Released {
                    held: Duration::from_millis(1500)
                }
            ]
        );
        assert_eq!(evaluator.state(), State::Idle);
    }

    #[test]
    fn test_full_hold_confirms_on_twenty_first_sample() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let start = Instant::now();

        let transitions = feed(&mut evaluator, start, &[true; 20]);
        assert_eq!(transitions, vec![Transition::Pressed]);
        assert!(matches!(evaluator.state(), State::Candidate { since } if since == start));

        let now = start + POLL * 20;
        assert_eq!(
            evaluator.observe(true, now),
            Transition::HoldElapsed { held: HOLD }
        );
        assert_eq!(
            evaluator.verify(true, now),
            Transition::Confirmed { held: HOLD }
        );
        assert!(evaluator.is_confirmed());
    }

    #[test]
    fn test_release_racing_the_timer_is_rejected() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let start = Instant::now();
        evaluator.observe(true, start);
        let now = start + HOLD;
        assert!(matches!(
            evaluator.observe(true, now),
            Transition::HoldElapsed { .. }
        ));
        assert_eq!(
            evaluator.verify(false, now),
            Transition::Released { held: HOLD }
        );
        assert_eq!(evaluator.state(), State::Idle);
    }

    #[test]
    fn test_confirmed_is_terminal() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let start = Instant::now();
        feed(&mut evaluator, start, &[true; 21]);
        assert!(evaluator.is_confirmed());

        let later = start + Duration::from_secs(10);
        assert_eq!(evaluator.observe(false, later), Transition::None);
        assert_eq!(evaluator.observe(true, later), Transition::None);
        assert_eq!(evaluator.verify(true, later), Transition::None);
        assert!(evaluator.is_confirmed());
    }

    #[test]
    fn test_hold_does_not_carry_over_a_release() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let mut samples = vec![true; 15];
        samples.push(false);
        samples.extend(vec![true; 15]);

        let transitions = feed(&mut evaluator, Instant::now(), &samples);
        assert!(!transitions
            .iter()
            .any(|t| matches!(t, Transition::Confirmed { .. })));
        assert!(matches!(evaluator.state(), State::Candidate { .. }));
    }

    #[test]
    fn test_any_press_shorter_than_hold_never_confirms() {
        for pressed in 1..=20 {
            let mut evaluator = HoldEvaluator::new(HOLD);
            let mut samples = vec![false; 3];
            samples.extend(vec![true; pressed]);
            samples.extend(vec![false; 3]);

            let transitions = feed(&mut evaluator, Instant::now(), &samples);
            assert!(
                !transitions
                    .iter()
                    .any(|t| matches!(t, Transition::Confirmed { .. })),
                "{} actuated samples confirmed",
                pressed
            );
            assert_eq!(evaluator.state(), State::Idle);
        }
    }

    #[test]
    fn test_state_display() {
        let mut evaluator = HoldEvaluator::new(HOLD);
        let start = Instant::now();
        assert_eq!(evaluator.state().to_string(), "idle");
        evaluator.observe(true, start);
        assert_eq!(evaluator.state().to_string(), "candidate");
        evaluator.observe(true, start + HOLD);
        evaluator.verify(true, start + HOLD);
        assert_eq!(evaluator.state().to_string(), "confirmed");
    }
}
