// VANALLIN TASK MODEL
// ONE JOB: MAIN CPU, POLL / BENCHMARK / LONGITUDINAL TASKS, TIMING, SHARED SIGNALS.
// TOPOLOGY IS FIXED ONCE BUILT. INSERTION ORDER MATTERS ONLY FOR OUTPUT NAMING.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::batch::Batch;
use crate::cpuset::CpuSet;
use crate::msr::{self, OpTemplate, RegisterOp};
use crate::recipe::{LongitudinalKind, Slot};
use crate::signals::Signals;

// POLLED MSRS ARE EXPECTED TO UPDATE ROUGHLY 1K TIMES/SECOND
pub const DEFAULT_SAMPLES_PER_SECOND: u64 = 1024;

// --- KINDS ---

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum PollKind {
    PkgEnergy,
    Pp0Energy,
    Pp1Energy,
    DramEnergy,
    CoreThermal,
    PkgThermal,
    Frequency,
}

impl PollKind {
    pub const ALL: [PollKind; 7] = [
        PollKind::PkgEnergy,
        PollKind::Pp0Energy,
        PollKind::Pp1Energy,
        PollKind::DramEnergy,
        PollKind::CoreThermal,
        PollKind::PkgThermal,
        PollKind::Frequency,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::PkgEnergy => "PKG_ENERGY",
            Self::Pp0Energy => "PP0_ENERGY",
            Self::Pp1Energy => "PP1_ENERGY",
            Self::DramEnergy => "DRAM_ENERGY",
            Self::CoreThermal => "CORE_THERMAL",
            Self::PkgThermal => "PKG_THERMAL",
            Self::Frequency => "FREQUENCY",
        }
    }

    pub fn template(self) -> OpTemplate {
        match self {
            Self::PkgEnergy => msr::POLL_PKG_ENERGY,
            Self::Pp0Energy => msr::POLL_PP0_ENERGY,
            Self::Pp1Energy => msr::POLL_PP1_ENERGY,
            Self::DramEnergy => msr::POLL_DRAM_ENERGY,
            Self::CoreThermal => msr::POLL_CORE_THERMAL,
            Self::PkgThermal => msr::POLL_PKG_THERMAL,
            Self::Frequency => msr::POLL_FREQUENCY,
        }
    }

    // RAPL ENERGY ACCUMULATORS WRAP AT 32 BITS
    pub fn wraps_at_32_bits(self) -> bool {
        matches!(self, Self::PkgEnergy | Self::Pp0Energy | Self::Pp1Energy | Self::DramEnergy)
    }
}

impl fmt::Display for PollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for PollKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::ALL.iter().find(|k| k.label() == s) {
            Some(k) => Ok(*k),
            None => bail!("UNKNOWN POLL TYPE ({})", s),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BenchmarkKind {
    Spin,
    AbShift,
    AbXor,
    Xrstor,
}

impl BenchmarkKind {
    pub const ALL: [BenchmarkKind; 4] =
        [BenchmarkKind::Spin, BenchmarkKind::AbShift, BenchmarkKind::AbXor, BenchmarkKind::Xrstor];

    pub fn label(self) -> &'static str {
        match self {
            Self::Spin => "SPIN",
            Self::AbShift => "ABSHIFT",
            Self::AbXor => "ABXOR",
            Self::Xrstor => "XRSTOR",
        }
    }
}

impl fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for BenchmarkKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::ALL.iter().find(|k| k.label() == s) {
            Some(k) => Ok(*k),
            None => bail!("UNKNOWN BENCHMARK TYPE ({})", s),
        }
    }
}

// --- TASKS ---

pub struct PollTask {
    pub kind: PollKind,
    pub control_cpu: usize,
    pub sampled_cpu: usize,
    // NONE: BACK-TO-BACK SUBMISSIONS, THE DRIVER'S POLL OP DOES THE PACING
    pub interval: Option<Duration>,
    // ONE SINGLE-OP BATCH PER SAMPLE, FILLED BY THE BATCH COMPILER
    pub samples: Vec<RegisterOp>,
}

impl PollTask {
    pub fn new(kind: PollKind, control_cpu: usize, sampled_cpu: usize, interval: Option<Duration>) -> Self {
        Self { kind, control_cpu, sampled_cpu, interval, samples: Vec::new() }
    }

    pub fn total_samples(&self, duration: Duration) -> usize {
        let n = match self.interval {
            Some(interval) => crate::duration::divide(duration, interval),
            None => DEFAULT_SAMPLES_PER_SECOND.saturating_mul(duration.as_secs()),
        };
        n.max(1) as usize
    }

    pub fn executed_samples(&self) -> usize {
        self.samples.iter().take_while(|op| op.executed()).count()
    }
}

pub struct BenchmarkTask {
    pub kind: BenchmarkKind,
    // INDEX OF THE COMMAND-LINE REQUEST THIS TASK WAS EXPANDED FROM, AND ITS POSITION WITHIN IT
    pub request: usize,
    pub thread: usize,
    pub execution_cpu: usize,
    pub params: [u64; 3],
    // PER-VARIANT (A/B) LOOP COUNTS, WRITTEN ONLY BY THE OWNING THREAD
    pub executed_loops: [u64; 2],
    // LAST RESULT OF THE HOT LOOP, KEPT SO THE OPTIMIZER CAN'T DROP THE WORK
    pub output: u64,
    pub state: Option<Box<dyn std::any::Any + Send>>,
}

impl BenchmarkTask {
    pub fn new(kind: BenchmarkKind, request: usize, thread: usize, execution_cpu: usize, params: [u64; 3]) -> Self {
        Self {
            kind,
            request,
            thread,
            execution_cpu,
            params,
            executed_loops: [0; 2],
            output: 0,
            state: None,
        }
    }
}

pub struct LongitudinalTask {
    pub kind: LongitudinalKind,
    pub sample_cpus: CpuSet,
    // NONE ONLY WHERE THE RECIPE SLOT IS EMPTY
    pub batches: [Option<Batch>; Slot::COUNT],
}

impl LongitudinalTask {
    pub fn new(kind: LongitudinalKind, sample_cpus: CpuSet) -> Self {
        Self { kind, sample_cpus, batches: Default::default() }
    }

    pub fn batch(&self, slot: Slot) -> Option<&Batch> {
        self.batches[slot.index()].as_ref()
    }
}

// --- JOB ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AbConfig {
    pub randomized: bool,
    pub dwell: Duration,
}

pub struct Job {
    pub main_cpu: CpuSet,
    pub duration: Duration,
    pub ab: Option<AbConfig>,
    pub polls: Vec<PollTask>,
    pub benchmarks: Vec<BenchmarkTask>,
    pub longitudinals: Vec<LongitudinalTask>,
    pub signals: Signals,
}

impl Job {
    pub fn new(main_cpu: CpuSet, duration: Duration) -> Self {
        Self {
            main_cpu,
            duration,
            ab: None,
            polls: Vec::new(),
            benchmarks: Vec::new(),
            longitudinals: Vec::new(),
            signals: Signals::new(),
        }
    }

    // ONE REQUEST OVER N CPUS BECOMES N SINGLE-CPU TASKS, ASCENDING CPU ORDER
    pub fn add_benchmark(&mut self, kind: BenchmarkKind, cpus: &CpuSet, params: [u64; 3]) {
        let request = self.benchmark_requests();
        for (thread, cpu) in cpus.iter().enumerate() {
            self.benchmarks.push(BenchmarkTask::new(kind, request, thread, cpu, params));
        }
    }

    pub fn benchmark_requests(&self) -> usize {
        self.benchmarks.last().map(|b| b.request + 1).unwrap_or(0)
    }

    pub fn thread_count(&self) -> usize {
        self.polls.len() + self.benchmarks.len()
    }
}
