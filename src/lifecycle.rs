// VANALLIN THREAD LIFECYCLE
// ONE THREAD PER POLL TASK, ONE PER (EXPANDED) BENCHMARK TASK.
//
// PER THREAD: CREATED -> PARKED -> RUNNING -> HALTED -> JOINED
//
//   1. LATCHES ARE BUILT CLOSED BEFORE ANY SPAWN
//   2. WORKERS PIN THEMSELVES, THEN PARK ON THEIR LATCH
//   3. MAIN FIRES LONGITUDINAL SETUP + START
//   4. MAIN RELEASES EVERY LATCH BACK-TO-BACK
//   5. MAIN SLEEPS (OR RUNS THE A/B TIMER), THEN RAISES HALT
//   6. JOIN, NO TIMEOUT. A WORKER THAT NEVER SEES HALT HANGS THE PROCESS.
//   7. MAIN FIRES STOP + READ + TEARDOWN, POLL SERIES ARE POST-PROCESSED

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::alternation::{self, AbController};
use crate::batch::BatchCompiler;
use crate::channel::{Device, RegisterChannel};
use crate::cpuset::CpuSet;
use crate::job::{AbConfig, BenchmarkTask, Job, LongitudinalTask, PollTask};
use crate::latch::Latch;
use crate::msr;
use crate::recipe::Slot;
use crate::rollover;
use crate::signals::Signals;
use crate::workload::{Workload, WorkloadSet};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum ThreadState {
    Created = 0,
    Parked = 1,
    Running = 2,
    Halted = 3,
    Joined = 4,
}

impl ThreadState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::Parked,
            2 => Self::Running,
            3 => Self::Halted,
            _ => Self::Joined,
        }
    }
}

// WRITTEN BY THE OWNING WORKER (AND BY MAIN FOR JOINED)
pub struct ThreadSlot {
    state: AtomicU8,
    halt_seen: AtomicBool,
}

impl ThreadSlot {
    fn new() -> Self {
        Self { state: AtomicU8::new(ThreadState::Created as u8), halt_seen: AtomicBool::new(false) }
    }

    fn set(&self, s: ThreadState) {
        self.state.store(s as u8, Ordering::Release);
    }

    pub fn state(&self) -> ThreadState {
        ThreadState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn exit(&self, signals: &Signals) {
        self.halt_seen.store(signals.halted(), Ordering::Relaxed);
        self.set(ThreadState::Halted);
    }
}

#[derive(Debug, Default)]
pub struct RunReport {
    // POLLS FIRST, THEN BENCHMARKS, IN TASK ORDER
    pub states: Vec<ThreadState>,
    // SNAPSHOT TAKEN JUST BEFORE HALT IS RAISED
    pub states_at_halt: Vec<ThreadState>,
    pub halt_seen: Vec<bool>,
    pub executed_samples: Vec<usize>,
    pub transitions: usize,
    pub elapsed: Duration,
}

pub struct Harness<'a, D: Device, W: WorkloadSet> {
    device: &'a D,
    workloads: &'a W,
    compiler: BatchCompiler,
    interrupt: Option<&'a AtomicBool>,
    load_allowlist: bool,
    pin_main: bool,
    ab_seed: Option<u64>,
}

impl<'a, D: Device, W: WorkloadSet> Harness<'a, D, W> {
    pub fn new(device: &'a D, workloads: &'a W) -> Self {
        Self {
            device,
            workloads,
            compiler: BatchCompiler::default(),
            interrupt: None,
            load_allowlist: true,
            pin_main: true,
            ab_seed: None,
        }
    }

    // EXTERNAL STOP REQUEST (CTRL-C). ENDS THE TIMED PHASE EARLY.
    pub fn interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn load_allowlist(mut self, yes: bool) -> Self {
        self.load_allowlist = yes;
        self
    }

    pub fn pin_main(mut self, yes: bool) -> Self {
        self.pin_main = yes;
        self
    }

    // REPRODUCIBLE RANDOMIZED A/B. UNSEEDED RUNS DRAW FROM thread_rng.
    pub fn ab_seed(mut self, seed: u64) -> Self {
        self.ab_seed = Some(seed);
        self
    }

    // ON ERROR THE JOB STILL HOLDS WHATEVER WAS POPULATED, SO THE CALLER CAN DUMP IT
    pub fn run(&self, job: &mut Job) -> Result<RunReport> {
        self.compiler.compile_job(job)?;

        if self.load_allowlist {
            self.device.load_allowlist(&msr::allowlist_text())?;
        }

        for task in job.benchmarks.iter_mut() {
            self.workloads
                .workload(task.kind)
                .initialize(task)
                .with_context(|| format!("INITIALIZE {} ON CPU {}", task.kind, task.execution_cpu))?;
        }

        if self.pin_main {
            job.main_cpu.pin_current_thread().context("PIN MAIN THREAD")?;
        }

        // ONE HANDLE FROM SETUP THROUGH TEARDOWN
        let mut main_channel = if job.longitudinals.is_empty() {
            None
        } else {
            Some(self.device.open()?)
        };

        let mut report = RunReport::default();
        let result = self.run_threads(job, main_channel.as_mut(), &mut report);

        let Job { polls, benchmarks, longitudinals, .. } = job;

        // STOP/READ ONLY AFTER A SUCCESSFUL START
        let result = match (result, main_channel.as_mut()) {
            (Ok(workers), Some(chan)) => {
                let after = submit_slot(chan, longitudinals, Slot::Stop)
                    .and_then(|_| submit_slot(chan, longitudinals, Slot::Read));
                let teardown = submit_slot(chan, longitudinals, Slot::Teardown);
                workers.and(after).and(teardown)
            }
            (Ok(workers), None) => workers,
            (Err(e), _) => Err(e),
        };
        drop(main_channel);

        for poll in polls.iter_mut() {
            rollover::post_process(poll);
        }
        report.executed_samples = polls.iter().map(PollTask::executed_samples).collect();

        for task in benchmarks.iter_mut() {
            self.workloads.workload(task.kind).cleanup(task);
        }

        result.map(|_| report)
    }

    // OUTER Err: START NEVER HAPPENED. INNER Err: A WORKER FAILED AFTER START.
    fn run_threads(
        &self,
        job: &mut Job,
        mut main_channel: Option<&mut D::Channel>,
        report: &mut RunReport,
    ) -> Result<Result<()>> {
        let Job { polls, benchmarks, longitudinals, signals, duration, ab, .. } = job;
        let signals: &Signals = signals;
        let duration = *duration;
        let device = self.device;
        let workloads = self.workloads;
        let interrupt = self.interrupt;
        let ab_seed = self.ab_seed;

        let total = polls.len() + benchmarks.len();
        let latches: Vec<Latch> = (0..total).map(|_| Latch::new()).collect();
        let slots: Vec<ThreadSlot> = (0..total).map(|_| ThreadSlot::new()).collect();
        let npolls = polls.len();

        let outcome = std::thread::scope(|s| -> Result<Result<()>> {
            let release_all = || {
                for latch in &latches {
                    latch.release();
                }
            };

            let mut poll_handles = Vec::with_capacity(npolls);
            let mut bench_handles = Vec::with_capacity(benchmarks.len());

            let mut spawn_err: Option<anyhow::Error> = None;
            for (i, poll) in polls.iter_mut().enumerate() {
                let (latch, slot) = (&latches[i], &slots[i]);
                let spawned = std::thread::Builder::new()
                    .name(format!("poll-{}", i))
                    .spawn_scoped(s, move || poll_thread(i, poll, device, latch, slot, signals));
                match spawned {
                    Ok(h) => poll_handles.push(h),
                    Err(e) => {
                        spawn_err = Some(anyhow::Error::new(e).context(format!("SPAWN POLL THREAD {}", i)));
                        break;
                    }
                }
            }
            if spawn_err.is_none() {
                for (j, task) in benchmarks.iter_mut().enumerate() {
                    let t = npolls + j;
                    let (latch, slot) = (&latches[t], &slots[t]);
                    let workload = workloads.workload(task.kind);
                    let spawned = std::thread::Builder::new()
                        .name(format!("bench-{}-{}", task.request, task.thread))
                        .spawn_scoped(s, move || benchmark_thread(task, workload, latch, slot, signals));
                    match spawned {
                        Ok(h) => bench_handles.push(h),
                        Err(e) => {
                            spawn_err = Some(anyhow::Error::new(e)
                                .context(format!("SPAWN BENCHMARK THREAD {}", j)));
                            break;
                        }
                    }
                }
            }

            if let Some(e) = spawn_err {
                // PARKED WORKERS SEE HALT THE MOMENT THEY ARE LET GO
                signals.raise_halt();
                release_all();
                return Err(e);
            }

            let armed = match main_channel.as_deref_mut() {
                Some(chan) => submit_slot(chan, longitudinals, Slot::Setup)
                    .and_then(|_| submit_slot(chan, longitudinals, Slot::Start)),
                None => Ok(()),
            };
            if armed.is_err() {
                signals.raise_halt();
            }

            release_all();
            log::debug!("RELEASED {} THREADS", total);

            let t0 = Instant::now();
            if armed.is_ok() {
                let stop = || signals.halted() || interrupt.is_some_and(|f| f.load(Ordering::Relaxed));
                match ab {
                    Some(cfg) => {
                        let ran = match ab_seed {
                            Some(seed) => alternate(*cfg, StdRng::seed_from_u64(seed), duration, signals, &stop),
                            None => alternate(*cfg, rand::thread_rng(), duration, signals, &stop),
                        };
                        match ran {
                            Ok(n) => report.transitions = n,
                            Err(e) => {
                                signals.raise_halt();
                                return Err(e);
                            }
                        }
                    }
                    None => {
                        alternation::sliced_sleep(duration, &stop);
                    }
                }
            }
            report.states_at_halt = slots.iter().map(ThreadSlot::state).collect();
            let idle = report.states_at_halt.iter().filter(|s| **s != ThreadState::Running).count();
            if idle > 0 {
                log::debug!("{} OF {} THREADS NOT RUNNING AT HALT", idle, total);
            }
            signals.raise_halt();

            let mut first_err: Option<anyhow::Error> = None;
            let mut note = |r: Result<()>| {
                if let Err(e) = r {
                    log::error!("{:#}", e);
                    first_err.get_or_insert(e);
                }
            };
            for (j, h) in bench_handles.into_iter().enumerate() {
                note(h.join().unwrap_or_else(|_| Err(anyhow!("BENCHMARK THREAD {} PANICKED", j))));
                slots[npolls + j].set(ThreadState::Joined);
            }
            for (i, h) in poll_handles.into_iter().enumerate() {
                note(h.join().unwrap_or_else(|_| Err(anyhow!("POLL THREAD {} PANICKED", i))));
                slots[i].set(ThreadState::Joined);
            }
            report.elapsed = t0.elapsed();

            armed?;
            Ok(first_err.map_or(Ok(()), Err))
        });

        report.states = slots.iter().map(ThreadSlot::state).collect();
        report.halt_seen = slots.iter().map(|s| s.halt_seen.load(Ordering::Relaxed)).collect();
        outcome
    }
}

fn alternate<R: Rng>(
    config: AbConfig,
    rng: R,
    duration: Duration,
    signals: &Signals,
    stop: &dyn Fn() -> bool,
) -> Result<usize> {
    let mut ctl = AbController::new(config, rng)?;
    Ok(ctl.run(duration, signals, stop))
}

fn submit_slot<C: RegisterChannel>(chan: &mut C, tasks: &mut [LongitudinalTask], slot: Slot) -> Result<()> {
    for (i, task) in tasks.iter_mut().enumerate() {
        let kind = task.kind;
        if let Some(batch) = task.batches[slot.index()].as_mut() {
            chan.submit(&mut batch.ops)
                .with_context(|| format!("LONGITUDINAL {} ({}) {} BATCH", i, kind, slot))?;
        }
    }
    Ok(())
}

// --- WORKERS ---

fn poll_thread<D: Device>(
    idx: usize,
    poll: &mut PollTask,
    device: &D,
    latch: &Latch,
    slot: &ThreadSlot,
    signals: &Signals,
) -> Result<()> {
    let prepared = CpuSet::single(poll.control_cpu)
        .and_then(|cpus| cpus.pin_current_thread())
        .and_then(|_| device.open());
    let mut chan = match prepared {
        Ok(chan) => chan,
        Err(e) => {
            signals.raise_halt();
            slot.exit(signals);
            return Err(e.context(format!("POLL {} ({}) SETUP", idx, poll.kind)));
        }
    };

    slot.set(ThreadState::Parked);
    latch.wait();
    slot.set(ThreadState::Running);

    let interval = poll.interval;
    let mut deadline = Instant::now();
    let total = poll.samples.len();
    for b in 0..total {
        if signals.halted() {
            break;
        }
        if let Err(e) = chan.submit(&mut poll.samples[b..b + 1]) {
            // NO RETRY. EVERYONE STOPS AT THEIR NEXT HALT CHECK.
            signals.raise_halt();
            slot.exit(signals);
            return Err(e.context(format!("POLL {} ({}) SAMPLE {} OF {}", idx, poll.kind, b, total)));
        }
        poll.samples[b].tag = signals.sample_tag();

        if let Some(interval) = interval {
            // SPIN TO THE NEXT DEADLINE, STAYING RESPONSIVE TO HALT
            deadline += interval;
            while Instant::now() < deadline && !signals.halted() {
                std::hint::spin_loop();
            }
        }
    }

    slot.exit(signals);
    Ok(())
}

fn benchmark_thread(
    task: &mut BenchmarkTask,
    workload: &dyn Workload,
    latch: &Latch,
    slot: &ThreadSlot,
    signals: &Signals,
) -> Result<()> {
    let pinned = CpuSet::single(task.execution_cpu).and_then(|cpus| cpus.pin_current_thread());
    if let Err(e) = pinned {
        signals.raise_halt();
        slot.exit(signals);
        return Err(e.context(format!("BENCHMARK {} THREAD {} SETUP", task.request, task.thread)));
    }

    slot.set(ThreadState::Parked);
    latch.wait();
    slot.set(ThreadState::Running);

    workload.run(task, signals);

    slot.exit(signals);
    Ok(())
}
