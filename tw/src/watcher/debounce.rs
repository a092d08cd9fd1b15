//! Debounce state machine
//!
//! `Idle -> Armed(deadline) -> Firing -> Idle`. Every trigger while Armed
//! pushes the deadline out by a full window, so a burst of any length
//! produces a single pass once it goes quiet. Triggers that land while a
//! pass is running re-arm the machine when the pass completes.
//!
//! Periodic ticks use `arm` instead: they start a window when idle but
//! never extend one, or a timer with a period no longer than the window
//! would postpone the pass forever.

use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceState {
    Idle,
    Armed { deadline: Instant },
    Firing { rearm: bool },
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    state: DebounceState,
    /// Triggers folded into the pending pass
    pending: u64,
    /// Triggers absorbed by an already-armed window, over the lifetime
    coalesced: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: DebounceState::Idle,
            pending: 0,
            coalesced: 0,
        }
    }

    pub fn state(&self) -> DebounceState {
        self.state
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced
    }

    /// Record a trigger; returns true if it armed an idle machine
    pub fn trigger(&mut self, now: Instant) -> bool {
        self.pending += 1;
        match self.state {
            DebounceState::Idle => {
                self.state = DebounceState::Armed {
                    deadline: now + self.window,
                };
                true
            }
            DebounceState::Armed { .. } => {
                self.coalesced += 1;
                self.state = DebounceState::Armed {
                    deadline: now + self.window,
                };
                false
            }
            DebounceState::Firing { .. } => {
                self.state = DebounceState::Firing { rearm: true };
                false
            }
        }
    }

    /// Record a periodic tick; returns true if it armed an idle machine
    ///
    /// An armed deadline is left where it is, and a running pass already
    /// covers whatever the tick would have found.
    pub fn arm(&mut self, now: Instant) -> bool {
        match self.state {
            DebounceState::Idle => {
                self.pending += 1;
                self.state = DebounceState::Armed {
                    deadline: now + self.window,
                };
                true
            }
            DebounceState::Armed { .. } => {
                self.pending += 1;
                self.coalesced += 1;
                false
            }
            DebounceState::Firing { .. } => false,
        }
    }

    /// When the armed window expires
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            DebounceState::Armed { deadline } => Some(deadline),
            _ => None,
        }
    }

    /// Move Armed -> Firing if the deadline has passed
    ///
    /// Returns the number of triggers the pass stands for.
    pub fn fire(&mut self, now: Instant) -> Option<u64> {
        match self.state {
            DebounceState::Armed { deadline } if now >= deadline => {
                self.state = DebounceState::Firing { rearm: false };
                let triggers = std::mem::take(&mut self.pending);
                debug!(triggers, "Debouncer::fire: firing");
                Some(triggers)
            }
            _ => None,
        }
    }

    /// Finish the running pass
    pub fn complete(&mut self, now: Instant) {
        self.state = match self.state {
            DebounceState::Firing { rearm: true } => DebounceState::Armed {
                deadline: now + self.window,
            },
            DebounceState::Firing { rearm: false } => DebounceState::Idle,
            other => other,
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(1000);

    #[test]
    fn test_burst_coalesces_into_one_pass() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        assert!(debouncer.trigger(start));
        for i in 1..10 {
            assert!(!debouncer.trigger(start + Duration::from_millis(i * 50)));
        }

        // Deadline moved with the last trigger
        let last = start + Duration::from_millis(450);
        assert_eq!(debouncer.deadline(), Some(last + WINDOW));
        assert_eq!(debouncer.fire(start + WINDOW), None);

        assert_eq!(debouncer.fire(last + WINDOW), Some(10));
        assert_eq!(debouncer.fire(last + WINDOW), None);
        debouncer.complete(last + WINDOW);
        assert_eq!(debouncer.state(), DebounceState::Idle);
        assert_eq!(debouncer.coalesced(), 9);
    }

    #[test]
    fn test_trigger_while_firing_rearms_after_completion() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.trigger(start);
        assert!(debouncer.fire(start + WINDOW).is_some());

        debouncer.trigger(start + WINDOW);
        assert_eq!(debouncer.state(), DebounceState::Firing { rearm: true });
        assert!(debouncer.deadline().is_none());

        let done = start + WINDOW + Duration::from_millis(10);
        debouncer.complete(done);
        assert_eq!(debouncer.deadline(), Some(done + WINDOW));
        assert_eq!(debouncer.fire(done + WINDOW), Some(1));
    }

    #[test]
    fn test_periodic_ticks_never_postpone_the_pass() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        // Ticks exactly one window apart
        assert!(debouncer.arm(start));
        assert!(!debouncer.arm(start + Duration::from_millis(999)));
        assert_eq!(debouncer.deadline(), Some(start + WINDOW));

        assert_eq!(debouncer.fire(start + WINDOW), Some(2));
        assert!(!debouncer.arm(start + WINDOW));
        debouncer.complete(start + WINDOW);
        assert_eq!(debouncer.state(), DebounceState::Idle);

        let next = start + WINDOW * 2;
        assert!(debouncer.arm(next));
        assert_eq!(debouncer.deadline(), Some(next + WINDOW));
    }

    #[test]
    fn test_trigger_after_tick_still_extends_window() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.arm(start);
        debouncer.trigger(start + Duration::from_millis(300));
        assert_eq!(debouncer.deadline(), Some(start + Duration::from_millis(300) + WINDOW));
    }

    #[test]
    fn test_complete_without_firing_is_noop() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.complete(start);
        assert_eq!(debouncer.state(), DebounceState::Idle);

        debouncer.trigger(start);
        debouncer.complete(start);
        assert_eq!(debouncer.deadline(), Some(start + WINDOW));
    }
}
