// SPIN: COUNT EMPTY ITERATIONS UNTIL HALT
// ABSHIFT: SHIFT-LEFT-THEN-RIGHT ONE OF TWO VALUES, PICKED BY THE A/B SELECTOR

use std::hint::black_box;

use crate::job::BenchmarkTask;
use crate::signals::Signals;

use super::Workload;

#[derive(Default)]
pub struct Spin;

impl Workload for Spin {
    fn run(&self, task: &mut BenchmarkTask, signals: &Signals) {
        let mut loops: u64 = 0;
        while !signals.halted() {
            loops = black_box(loops.wrapping_add(1));
        }
        task.executed_loops[0] += loops;
        task.output = loops;
    }
}

// PARAMS: p1 = VALUE A, p2 = VALUE B, p3 = SHIFT AMOUNT (MOD 64)
#[derive(Default)]
pub struct AbShift;

impl Workload for AbShift {
    fn run(&self, task: &mut BenchmarkTask, signals: &Signals) {
        let mut loops = [0u64; 2];
        let mut values = [task.params[0], task.params[1]];
        let shift = task.params[2] as u32;

        while !signals.halted() {
            let idx = signals.variant();
            // black_box KEEPS BOTH SHIFTS IN THE LOOP BODY
            values[idx] = black_box(values[idx].wrapping_shl(shift)).wrapping_shr(shift);
            loops[idx] += 1;
        }

        // RESULTS ARE EXTERNALLY VISIBLE, SO THE SHIFTS MUST HAVE RUN
        task.params[0] = values[0];
        task.params[1] = values[1];
        task.executed_loops[0] += loops[0];
        task.executed_loops[1] += loops[1];
        task.output = values[0] ^ values[1];
    }
}
