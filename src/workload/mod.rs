// VANALLIN WORKLOADS
// initialize ON THE MAIN THREAD BEFORE SPAWN, run ON THE PINNED WORKER, cleanup AFTER JOIN.
// EVERY run LOOP CHECKS halt ON EACH ITERATION. TWO-VARIANT LOOPS RE-READ THE
// SELECTOR EACH ITERATION AND NEVER LOCK.

mod abxor;
mod spin;
mod xrstor;

use anyhow::Result;

use crate::job::{BenchmarkKind, BenchmarkTask};
use crate::signals::Signals;

pub use abxor::{AbXor, RANDOM_BUFFER_LEN};
pub use spin::{AbShift, Spin};
pub use xrstor::Xrstor;

pub trait Workload: Sync {
    fn initialize(&self, _task: &mut BenchmarkTask) -> Result<()> {
        Ok(())
    }

    fn run(&self, task: &mut BenchmarkTask, signals: &Signals);

    fn cleanup(&self, task: &mut BenchmarkTask) {
        task.state = None;
    }
}

pub trait WorkloadSet: Sync {
    fn workload(&self, kind: BenchmarkKind) -> &dyn Workload;
}

#[derive(Default)]
pub struct Workloads {
    spin: Spin,
    abshift: AbShift,
    abxor: AbXor,
    xrstor: Xrstor,
}

impl Workloads {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WorkloadSet for Workloads {
    fn workload(&self, kind: BenchmarkKind) -> &dyn Workload {
        match kind {
            BenchmarkKind::Spin => &self.spin,
            BenchmarkKind::AbShift => &self.abshift,
            BenchmarkKind::AbXor => &self.abxor,
            BenchmarkKind::Xrstor => &self.xrstor,
        }
    }
}
