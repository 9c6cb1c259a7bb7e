// VANALLIN ROLLOVER CORRECTION
// RAPL ENERGY STATUS IS A 32-BIT ACCUMULATOR IN A 64-BIT FIELD. EACH POLL OP
// CARRIES TWO READINGS (msrdata, msrdata2) TAKEN MICROSECONDS APART.
// THIS TURNS THE WRAPPING RAW SERIES INTO A MONOTONIC 64-BIT ONE.
//
// STRICTLY SEQUENTIAL: EACH SAMPLE DEPENDS ON ITS CORRECTED PREDECESSOR.

use crate::job::PollTask;
use crate::msr::{self, RegisterOp, OP_PTHERM, OP_THERM};

pub const WRAP_QUANTUM: u64 = 1 << 32;

#[derive(Default, Debug)]
pub struct RolloverCorrector {
    cumulative_adjustment: u64,
    prev_second: Option<u64>,
}

impl RolloverCorrector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cumulative_adjustment(&self) -> u64 {
        self.cumulative_adjustment
    }

    // CORRECT ONE (first, second) PAIR IN PLACE, IN CHRONOLOGICAL ORDER
    pub fn correct(&mut self, first: &mut u64, second: &mut u64) {
        *first = first.wrapping_add(self.cumulative_adjustment);
        *second = second.wrapping_add(self.cumulative_adjustment);

        if *second < *first {
            // WRAPPED INSIDE THE SAMPLE
            *second = second.wrapping_add(WRAP_QUANTUM);
            self.cumulative_adjustment += WRAP_QUANTUM;
        } else if self.prev_second.is_some_and(|prev| *first < prev) {
            // WRAPPED BETWEEN SAMPLES
            *first = first.wrapping_add(WRAP_QUANTUM);
            *second = second.wrapping_add(WRAP_QUANTUM);
            self.cumulative_adjustment += WRAP_QUANTUM;
        }
        self.prev_second = Some(*second);
    }

    // RETURNS THE NUMBER OF SAMPLES CORRECTED. STOPS AT THE FIRST NEVER-EXECUTED OP.
    pub fn correct_series(&mut self, samples: &mut [RegisterOp]) -> usize {
        let mut n = 0;
        for op in samples.iter_mut().take_while(|op| op.executed()) {
            self.correct(&mut op.msrdata, &mut op.msrdata2);
            n += 1;
        }
        n
    }
}

// STATELESS: MASK THERMAL MARGINS DOWN TO THEIR 7-BIT FIELD
pub fn normalize_thermal(samples: &mut [RegisterOp]) {
    for op in samples.iter_mut() {
        if op.op & OP_THERM != 0 {
            op.therm = msr::extract_temperature(op.therm);
        }
        if op.op & OP_PTHERM != 0 {
            op.ptherm = msr::extract_temperature(op.ptherm);
        }
    }
}

// FULL POST-PROCESSING FOR ONE POLL SERIES
pub fn post_process(poll: &mut PollTask) {
    if poll.kind.wraps_at_32_bits() {
        let mut corrector = RolloverCorrector::new();
        let n = corrector.correct_series(&mut poll.samples);
        if corrector.cumulative_adjustment() > 0 {
            log::debug!("{} ON CPU {}: {} ROLLOVERS OVER {} SAMPLES",
                        poll.kind, poll.sampled_cpu,
                        corrector.cumulative_adjustment() / WRAP_QUANTUM, n);
        }
    }
    normalize_thermal(&mut poll.samples);
}
