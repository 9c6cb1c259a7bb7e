// VANALLIN SHARED SIGNALS
// ONE WRITER (MAIN THREAD), MANY READERS (WORKERS). LOCK-FREE, NEVER BLOCKS.
//
// ALL ACCESSES ARE RELAXED: WORKERS ONLY NEED EVENTUAL VISIBILITY OF A FLIP.
// A SAMPLE LANDING ON A TRANSITION IS HANDLED BY THE VALIDITY TAG, NOT BY ORDERING.

use std::sync::atomic::{AtomicBool, Ordering};

// POLL SAMPLE TAG BITS
pub const TAG_SELECTOR: u64 = 1 << 0;
pub const TAG_STRADDLE: u64 = 1 << 1;

pub struct Signals {
    halt: AtomicBool,
    ab_selector: AtomicBool,
    valid: AtomicBool,
}

impl Default for Signals {
    fn default() -> Self {
        Self::new()
    }
}

impl Signals {
    pub const fn new() -> Self {
        Self {
            halt: AtomicBool::new(false),
            ab_selector: AtomicBool::new(false),
            valid: AtomicBool::new(true),
        }
    }

    // --- HALT ---

    pub fn raise_halt(&self) {
        self.halt.store(true, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn halted(&self) -> bool {
        self.halt.load(Ordering::Relaxed)
    }

    // --- A/B SELECTOR ---

    #[inline(always)]
    pub fn selector(&self) -> bool {
        self.ab_selector.load(Ordering::Relaxed)
    }

    // 0 = A, 1 = B
    #[inline(always)]
    pub fn variant(&self) -> usize {
        self.selector() as usize
    }

    pub fn set_selector(&self, value: bool) {
        self.ab_selector.store(value, Ordering::Relaxed);
    }

    // --- VALIDITY ---

    pub fn invalidate(&self) {
        self.valid.store(false, Ordering::Relaxed);
    }

    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }

    // FIRST CALLER AFTER AN INVALIDATION GETS true AND RE-ARMS THE FLAG
    pub fn take_straddle(&self) -> bool {
        !self.valid.swap(true, Ordering::Relaxed)
    }

    // TAG FOR A SAMPLE THAT JUST COMPLETED
    pub fn sample_tag(&self) -> u64 {
        let mut tag = 0;
        if self.selector() {
            tag |= TAG_SELECTOR;
        }
        if self.take_straddle() {
            tag |= TAG_STRADDLE;
        }
        tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_running_valid_on_a() {
        let s = Signals::new();
        assert!(!s.halted());
        assert!(s.is_valid());
        assert_eq!(s.variant(), 0);
        assert_eq!(s.sample_tag(), 0);
    }

    #[test]
    fn straddle_is_consumed_once() {
        let s = Signals::new();
        s.set_selector(true);
        s.invalidate();
        assert_eq!(s.sample_tag(), TAG_SELECTOR | TAG_STRADDLE);
        // NEXT SAMPLE IS CLEAN AGAIN
        assert_eq!(s.sample_tag(), TAG_SELECTOR);
        assert!(s.is_valid());
    }

    #[test]
    fn halt_is_sticky() {
        let s = Signals::new();
        s.raise_halt();
        s.raise_halt();
        assert!(s.halted());
    }
}
