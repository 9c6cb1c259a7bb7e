// ABXOR: XOR A WINDOW OF A SHARED RANDOM BUFFER AGAINST ITS KEY (R[0])
// THE WINDOW STEPS FORWARD ON EVERY A/B FLIP SO EACH VARIANT SEES FRESH DATA.
// BUFFER IS FILLED ONCE, BEFORE ANY WORKER STARTS, AND ONLY READ AFTERWARDS.

use std::hint::black_box;
use std::sync::OnceLock;

use anyhow::{bail, Result};
use rand::Rng;

use crate::job::BenchmarkTask;
use crate::signals::Signals;

use super::Workload;

pub const RANDOM_BUFFER_LEN: usize = 1024 * 1024;
const XORS_PER_CHECK: usize = 1000;

#[derive(Default)]
pub struct AbXor {
    buffer: OnceLock<Vec<u64>>,
}

impl AbXor {
    fn buffer(&self) -> &[u64] {
        self.buffer.get_or_init(|| {
            log::info!("GENERATING {} RANDOM WORDS FOR ABXOR", RANDOM_BUFFER_LEN);
            let mut rng = rand::thread_rng();
            (0..RANDOM_BUFFER_LEN).map(|_| rng.gen()).collect()
        })
    }
}

// NEXT WINDOW START, WRAPPING BACK TO 1 (0 IS THE KEY)
fn advance(start: usize, window: usize) -> usize {
    if start + window < RANDOM_BUFFER_LEN - window {
        start + window
    } else {
        1
    }
}

impl Workload for AbXor {
    // PARAMS: p1 = WINDOW LENGTH IN WORDS
    fn initialize(&self, task: &mut BenchmarkTask) -> Result<()> {
        let window = task.params[0] as usize;
        if window == 0 || window >= RANDOM_BUFFER_LEN / 2 {
            bail!("ABXOR WINDOW {} MUST BE IN 1..{}", window, RANDOM_BUFFER_LEN / 2);
        }
        self.buffer();
        Ok(())
    }

    fn run(&self, task: &mut BenchmarkTask, signals: &Signals) {
        let r = match self.buffer.get() {
            Some(r) => r.as_slice(),
            None => {
                log::error!("ABXOR THREAD {} STARTED WITHOUT A RANDOM BUFFER", task.thread);
                return;
            }
        };
        let window = task.params[0] as usize;
        let mut loops = [0u64; 2];
        let mut start = 1;
        let mut local = signals.variant();
        let mut out = 0u64;

        while !signals.halted() {
            let idx = signals.variant();
            if idx != local {
                local = idx;
                start = advance(start, window);
            }
            for _ in 0..XORS_PER_CHECK {
                let acc = r[start..start + window].iter().fold(0u64, |a, &x| a ^ x);
                out = black_box(acc ^ r[0]);
            }
            loops[local] += 1;
        }

        task.executed_loops[0] += loops[0];
        task.executed_loops[1] += loops[1];
        task.output = out;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::BenchmarkKind;
    use std::time::Duration;

    #[test]
    fn window_wraps_to_one() {
        assert_eq!(advance(1, 8), 9);
        assert_eq!(advance(RANDOM_BUFFER_LEN - 20, 16), 1);
    }

    #[test]
    fn rejects_degenerate_windows() {
        let w = AbXor::default();
        let mut zero = BenchmarkTask::new(BenchmarkKind::AbXor, 0, 0, 0, [0, 0, 0]);
        assert!(w.initialize(&mut zero).is_err());
        let mut huge = BenchmarkTask::new(BenchmarkKind::AbXor, 0, 0, 0,
                                          [RANDOM_BUFFER_LEN as u64, 0, 0]);
        assert!(w.initialize(&mut huge).is_err());
    }

    #[test]
    fn xor_matches_buffer_window() {
        let w = AbXor::default();
        let mut task = BenchmarkTask::new(BenchmarkKind::AbXor, 0, 0, 0, [4, 0, 0]);
        w.initialize(&mut task).unwrap();
        let signals = Signals::new();
        std::thread::scope(|s| {
            s.spawn(|| w.run(&mut task, &signals));
            std::thread::sleep(Duration::from_millis(20));
            signals.raise_halt();
        });
        let r = w.buffer();
        let expect = r[1] ^ r[2] ^ r[3] ^ r[4] ^ r[0];
        assert_eq!(task.output, expect);
        assert!(task.executed_loops[0] > 0);
    }
}
