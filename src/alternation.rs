// VANALLIN A/B ALTERNATION
// MAIN THREAD ONLY. ONE SELECTOR DECISION PER DWELL INTERVAL.
//
// DETERMINISTIC: FLIP EVERY INTERVAL.
// RANDOMIZED: DRAW A FRESH VALUE; A REPEAT DRAW TOUCHES NOTHING, SO valid
// IS ONLY CLEARED WHEN THE WORKLOAD REALLY CHANGED.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rand::Rng;

use crate::job::AbConfig;
use crate::signals::Signals;

// UPPER BOUND ON HOW LATE AN INTERRUPT OR HALT IS NOTICED WHILE SLEEPING
pub const SLEEP_SLICE: Duration = Duration::from_millis(10);

// SLEEP FOR d. false IF stop() FIRED FIRST.
pub fn sliced_sleep(d: Duration, stop: &dyn Fn() -> bool) -> bool {
    let deadline = Instant::now() + d;
    loop {
        if stop() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

pub struct AbController<R: Rng> {
    randomized: bool,
    dwell: Duration,
    rng: R,
}

impl<R: Rng> AbController<R> {
    pub fn new(config: AbConfig, rng: R) -> Result<Self> {
        if config.dwell.is_zero() {
            bail!("A/B DWELL INTERVAL MUST BE NON-ZERO");
        }
        Ok(Self { randomized: config.randomized, dwell: config.dwell, rng })
    }

    // ONE DWELL BOUNDARY. true WHEN THE SELECTOR ACTUALLY CHANGED.
    pub fn step(&mut self, signals: &Signals) -> bool {
        let current = signals.selector();
        let next = if self.randomized { self.rng.gen::<bool>() } else { !current };
        if next == current {
            return false;
        }
        signals.set_selector(next);
        signals.invalidate();
        true
    }

    // DWELL / DECIDE UNTIL ACCUMULATED TIME COVERS duration. RUN TIME ROUNDS UP
    // TO A WHOLE NUMBER OF DWELLS. NO DECISION AFTER THE LAST DWELL.
    // RETURNS THE NUMBER OF TRANSITIONS.
    pub fn run(&mut self, duration: Duration, signals: &Signals, stop: &dyn Fn() -> bool) -> usize {
        let mut elapsed = Duration::ZERO;
        let mut transitions = 0;
        while elapsed < duration {
            if !sliced_sleep(self.dwell, stop) {
                break;
            }
            elapsed += self.dwell;
            if elapsed >= duration {
                break;
            }
            if self.step(signals) {
                transitions += 1;
                log::trace!("A/B -> {} AT {:?}", if signals.selector() { 'B' } else { 'A' }, elapsed);
            }
        }
        transitions
    }
}
