// VANALLIN LIFECYCLE TESTS
// FULL HARNESS RUNS AGAINST A RECORDING DEVICE AND MARKER WORKLOADS.
// NO msr-safe, NO ROOT. WORKERS PIN TO WHATEVER CPUS THE TEST PROCESS MAY USE.
//
// CHECKS:
//   LONGITUDINAL SETUP + START LAND BEFORE ANY WORKER RUNS
//   EMPTY RECIPE SLOTS ARE NEVER SUBMITTED
//   EVERY THREAD IS JOINED AND EVERY LIVE THREAD SAW HALT
//   A POLL DEVICE FAILURE STOPS THE WHOLE JOB EARLY
//   A/B RUNS FLIP ON SCHEDULE AND DUMP CLEANLY
//   SEEDED RANDOM A/B IS REPRODUCIBLE AND ITS FLIPS SHOW UP IN THE POLL TAGS

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use rand::rngs::StdRng;
use rand::SeedableRng;

use vanallin::alternation::AbController;
use vanallin::channel::{Device, RegisterChannel};
use vanallin::cpuset::CpuSet;
use vanallin::dump;
use vanallin::job::{AbConfig, BenchmarkKind, BenchmarkTask, Job, LongitudinalTask, PollKind, PollTask};
use vanallin::lifecycle::{Harness, ThreadState};
use vanallin::msr::{self, RegisterOp};
use vanallin::recipe::LongitudinalKind;
use vanallin::signals::{Signals, TAG_SELECTOR, TAG_STRADDLE};
use vanallin::workload::{Workload, WorkloadSet};

// ---------------------------------------------------------------------------
// RECORDING DEVICE
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    // NON-POLL SUBMISSION: FIRST OP'S MSR + VALUE AS SUBMITTED, OP COUNT
    Batch { msr: u32, msrdata: u64, ops: usize },
    FirstPoll,
    Running { request: usize, thread: usize },
}

type Log = Arc<Mutex<Vec<Event>>>;

struct RecordingDevice {
    log: Log,
    // POLL SUBMISSIONS THAT SUCCEED BEFORE EVERY LATER ONE FAILS
    poll_budget: Option<usize>,
    // SLEEP PER POLL SUBMISSION, LIKE A REAL DRIVER ROUND TRIP
    poll_delay: Option<Duration>,
    polls: Arc<AtomicUsize>,
}

impl RecordingDevice {
    fn new(log: &Log, poll_budget: Option<usize>) -> Self {
        Self { log: log.clone(), poll_budget, poll_delay: None, polls: Arc::new(AtomicUsize::new(0)) }
    }

    fn slow_polls(mut self, delay: Duration) -> Self {
        self.poll_delay = Some(delay);
        self
    }
}

struct RecordingChannel {
    log: Log,
    poll_budget: Option<usize>,
    poll_delay: Option<Duration>,
    polls: Arc<AtomicUsize>,
    clock: u64,
}

impl RegisterChannel for RecordingChannel {
    fn submit(&mut self, ops: &mut [RegisterOp]) -> Result<()> {
        let polling = ops.iter().any(|op| op.op & msr::OP_POLL != 0);
        if polling {
            let n = self.polls.fetch_add(1, Ordering::SeqCst);
            if self.poll_budget.is_some_and(|budget| n >= budget) {
                bail!("INJECTED DEVICE FAILURE");
            }
            if n == 0 {
                self.log.lock().unwrap().push(Event::FirstPoll);
            }
            if let Some(delay) = self.poll_delay {
                std::thread::sleep(delay);
            }
        } else {
            self.log.lock().unwrap().push(Event::Batch {
                msr: ops[0].msr,
                msrdata: ops[0].msrdata,
                ops: ops.len(),
            });
        }
        for op in ops.iter_mut() {
            self.clock += 1;
            op.err = 0;
            op.tsc = self.clock;
            if !op.is_write() {
                op.msrdata = self.clock;
                op.msrdata2 = self.clock;
            }
        }
        Ok(())
    }
}

impl Device for RecordingDevice {
    type Channel = RecordingChannel;

    fn open(&self) -> Result<RecordingChannel> {
        Ok(RecordingChannel {
            log: self.log.clone(),
            poll_budget: self.poll_budget,
            poll_delay: self.poll_delay,
            polls: self.polls.clone(),
            clock: 0,
        })
    }

    fn load_allowlist(&self, _text: &str) -> Result<()> {
        bail!("TESTS NEVER LOAD THE ALLOWLIST");
    }
}

// ---------------------------------------------------------------------------
// MARKER WORKLOAD
// ---------------------------------------------------------------------------

struct Marker {
    log: Log,
}

impl Workload for Marker {
    fn run(&self, task: &mut BenchmarkTask, signals: &Signals) {
        self.log.lock().unwrap().push(Event::Running { request: task.request, thread: task.thread });
        while !signals.halted() {
            task.executed_loops[signals.variant()] += 1;
            std::hint::spin_loop();
        }
    }
}

struct Markers(Marker);

impl WorkloadSet for Markers {
    fn workload(&self, _kind: BenchmarkKind) -> &dyn Workload {
        &self.0
    }
}

// ---------------------------------------------------------------------------
// HELPERS
// ---------------------------------------------------------------------------

fn allowed() -> Vec<usize> {
    CpuSet::current_affinity().unwrap().iter().collect()
}

fn cpu(i: usize) -> usize {
    let cpus = allowed();
    cpus[i % cpus.len()]
}

fn one(i: usize) -> CpuSet {
    CpuSet::single(cpu(i)).unwrap()
}

fn new_job(duration: Duration) -> Job {
    Job::new(one(0), duration)
}

fn harness<'a>(device: &'a RecordingDevice, workloads: &'a Markers) -> Harness<'a, RecordingDevice, Markers> {
    Harness::new(device, workloads).load_allowlist(false).pin_main(false)
}

fn position(events: &[Event], want: impl Fn(&Event) -> bool) -> Vec<usize> {
    events.iter().enumerate().filter(|(_, e)| want(e)).map(|(i, _)| i).collect()
}

// === RELEASE BARRIER ===

#[test]
fn workers_run_only_after_longitudinal_start() {
    let log = Log::default();
    let device = RecordingDevice::new(&log, None);
    let workloads = Markers(Marker { log: log.clone() });

    let mut job = new_job(Duration::from_millis(300));
    job.polls.push(PollTask::new(PollKind::PkgEnergy, cpu(0), cpu(1), None));
    job.add_benchmark(BenchmarkKind::Spin, &one(1), [0; 3]);
    job.add_benchmark(BenchmarkKind::AbXor, &one(2), [0; 3]);
    job.longitudinals.push(LongitudinalTask::new(LongitudinalKind::FixedFunctionCounters, one(0)));

    let report = harness(&device, &workloads).run(&mut job).unwrap();
    let events = log.lock().unwrap().clone();

    let batches: Vec<(u32, u64, usize)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Batch { msr, msrdata, ops } => Some((*msr, *msrdata, *ops)),
            _ => None,
        })
        .collect();
    // SETUP, START, STOP, READ. TEARDOWN IS EMPTY AND NEVER SUBMITTED.
    assert_eq!(batches, vec![
        (msr::PERF_GLOBAL_CTRL, 0, 5),
        (msr::PERF_GLOBAL_CTRL, 0x7_0000_0000, 1),
        (msr::PERF_GLOBAL_CTRL, 0, 1),
        (msr::FIXED_CTR0, 0, 3),
    ]);

    let start = position(&events, |e| matches!(e, Event::Batch { msrdata: 0x7_0000_0000, .. }))[0];
    let workers = position(&events, |e| matches!(e, Event::Running { .. } | Event::FirstPoll));
    assert_eq!(workers.len(), 3);
    let mut ran: Vec<(usize, usize)> = events
        .iter()
        .filter_map(|e| match e {
            Event::Running { request, thread } => Some((*request, *thread)),
            _ => None,
        })
        .collect();
    ran.sort();
    assert_eq!(ran, vec![(0, 0), (1, 0)]);
    let stop = position(&events, |e| matches!(e, Event::Batch { .. }))[2];
    for w in workers {
        assert!(start < w, "WORKER EVENT {} BEFORE START {}", w, start);
        assert!(w < stop, "WORKER EVENT {} AFTER STOP {}", w, stop);
    }

    assert_eq!(report.states, vec![ThreadState::Joined; 3]);
    // BENCHMARKS WERE RELEASED AND STILL RUNNING WHEN HALT WENT UP
    assert_eq!(report.states_at_halt[1..], [ThreadState::Running; 2]);
    for slot in vanallin::recipe::Slot::ALL {
        if let Some(batch) = job.longitudinals[0].batch(slot) {
            assert!(batch.all_executed(), "{} LEFT UNEXECUTED OPS", slot);
        }
    }
}

// === TERMINATION ===

#[test]
fn timed_run_halts_and_joins_everyone() {
    let log = Log::default();
    let device = RecordingDevice::new(&log, None);
    let workloads = Markers(Marker { log: log.clone() });

    let duration = Duration::from_secs(2);
    let mut job = new_job(duration);
    job.polls.push(PollTask::new(PollKind::Frequency, cpu(0), cpu(0), Some(Duration::from_millis(100))));
    let spread: CpuSet = allowed().into_iter().take(2).collect();
    job.add_benchmark(BenchmarkKind::Spin, &spread, [0; 3]);
    let threads = job.thread_count();

    let report = harness(&device, &workloads).run(&mut job).unwrap();

    assert!(report.elapsed >= duration, "ELAPSED {:?}", report.elapsed);
    assert!(report.elapsed < duration + Duration::from_secs(2), "ELAPSED {:?}", report.elapsed);
    assert_eq!(report.states, vec![ThreadState::Joined; threads]);
    // BENCHMARKS ONLY LEAVE ON HALT. POLLS MAY RUN OUT OF SAMPLES FIRST.
    assert!(report.halt_seen[1..].iter().all(|&seen| seen));

    let executed = report.executed_samples[0];
    assert!(executed > 0 && executed <= 20, "{} SAMPLES", executed);
    for b in &job.benchmarks {
        assert!(b.executed_loops[0] > 0);
        // NO A/B: THE SELECTOR NEVER LEAVES A
        assert_eq!(b.executed_loops[1], 0);
    }
}

#[test]
fn poll_device_failure_stops_the_job() {
    let log = Log::default();
    let device = RecordingDevice::new(&log, Some(3));
    let workloads = Markers(Marker { log: log.clone() });

    let mut job = new_job(Duration::from_secs(5));
    job.polls.push(PollTask::new(PollKind::PkgEnergy, cpu(0), cpu(0), None));
    job.add_benchmark(BenchmarkKind::Spin, &one(1), [0; 3]);

    let t0 = Instant::now();
    let err = harness(&device, &workloads).run(&mut job).unwrap_err();
    assert!(t0.elapsed() < Duration::from_secs(4), "RAN {:?}", t0.elapsed());

    let msg = format!("{:#}", err);
    assert!(msg.contains("INJECTED DEVICE FAILURE"), "{}", msg);
    assert!(msg.contains("POLL 0"), "{}", msg);
    assert!(job.signals.halted());
    // THE FAILED SAMPLE STAYS UNEXECUTED
    assert_eq!(job.polls[0].executed_samples(), 3);
}

#[test]
fn zero_dwell_fails_the_run() {
    let log = Log::default();
    let device = RecordingDevice::new(&log, None);
    let workloads = Markers(Marker { log: log.clone() });

    let mut job = new_job(Duration::from_millis(100));
    job.ab = Some(AbConfig { randomized: false, dwell: Duration::ZERO });
    job.add_benchmark(BenchmarkKind::AbShift, &one(0), [1, 1, 0]);

    assert!(harness(&device, &workloads).run(&mut job).is_err());
    assert!(job.signals.halted());
}

// === RANDOMIZED A/B ===

#[test]
fn seeded_random_run_is_reproducible_in_poll_tags() {
    const SEED: u64 = 0x5EED;
    let log = Log::default();
    // 1024 SAMPLES AT >= 2MS EACH OUTLAST THE 1S RUN, SO THE POLL IS LIVE AT HALT
    let device = RecordingDevice::new(&log, None).slow_polls(Duration::from_millis(2));
    let workloads = Markers(Marker { log: log.clone() });

    let ab = AbConfig { randomized: true, dwell: Duration::from_millis(50) };
    let mut job = new_job(Duration::from_secs(1));
    job.ab = Some(ab);
    job.polls.push(PollTask::new(PollKind::PkgEnergy, cpu(0), cpu(0), None));
    job.add_benchmark(BenchmarkKind::AbShift, &one(1), [1, 1, 0]);

    let report = harness(&device, &workloads).ab_seed(SEED).run(&mut job).unwrap();

    // 20 DWELLS, 19 DECISIONS, REPLAYED WITH THE SAME SEED
    let replay = Signals::new();
    let mut ctl = AbController::new(ab, StdRng::seed_from_u64(SEED)).unwrap();
    let expected = (0..19).filter(|_| ctl.step(&replay)).count();
    assert_eq!(report.transitions, expected);
    assert_eq!(job.signals.selector(), replay.selector());
    assert!(expected > 0 && expected < 19, "{} TRANSITIONS", expected);

    assert_eq!(report.states_at_halt, vec![ThreadState::Running; 2]);
    assert_eq!(report.states, vec![ThreadState::Joined; 2]);
    assert_eq!(report.halt_seen, vec![true, true]);

    let n = job.polls[0].executed_samples();
    assert!(n < job.polls[0].samples.len());
    let tags: Vec<u64> = job.polls[0].samples[..n].iter().map(|op| op.tag).collect();
    let mut flips = 0;
    let mut last = false;
    for tag in &tags {
        let b = tag & TAG_SELECTOR != 0;
        if b != last {
            flips += 1;
            last = b;
        }
    }
    // EVERY DWELL SPANS MANY SAMPLES: EACH FLIP IS SEEN, EACH LEAVES ONE STRADDLE TAG
    assert_eq!(flips, expected);
    assert_eq!(tags.iter().filter(|t| *t & TAG_STRADDLE != 0).count(), expected);
    assert_eq!(last, replay.selector());
}

// === A/B + DUMP ===

#[test]
fn alternating_run_flips_and_dumps() {
    let log = Log::default();
    let device = RecordingDevice::new(&log, None);
    let workloads = Markers(Marker { log: log.clone() });

    let mut job = new_job(Duration::from_millis(200));
    job.ab = Some(AbConfig { randomized: false, dwell: Duration::from_millis(20) });
    job.polls.push(PollTask::new(PollKind::CoreThermal, cpu(0), cpu(0), Some(Duration::from_millis(5))));
    job.add_benchmark(BenchmarkKind::AbShift, &one(1), [1, 1, 0]);
    job.longitudinals.push(LongitudinalTask::new(LongitudinalKind::EnergyCounters, one(0)));

    let report = harness(&device, &workloads).run(&mut job).unwrap();

    // TEN DWELLS, NO DECISION AFTER THE LAST
    assert_eq!(report.transitions, 9);
    let loops = job.benchmarks[0].executed_loops;
    assert!(loops[0] + loops[1] > 0);
    let n = job.polls[0].executed_samples();
    assert!(job.polls[0].samples[..n].iter().any(|op| op.tag & TAG_STRADDLE != 0));

    let dir = tempfile::tempdir().unwrap();
    let written = dump::dump_files(&job, dir.path()).unwrap();
    // 20 POLL FIELDS + SETUP/START/STOP FOR ENERGY COUNTERS
    assert_eq!(written.len(), 20 + 3);

    let tag = std::fs::read_to_string(dir.path().join("poll_0_CORE_THERMAL_TAG.out")).unwrap();
    assert!(tag.starts_with("# TAG\n"));
    assert_eq!(tag.lines().count(), n.max(1));

    let start = std::fs::read_to_string(dir.path().join("longitudinal_0_ENERGY_COUNTERS_START.out")).unwrap();
    let mut lines = start.lines();
    assert_eq!(lines.next(), Some("# CPU ERR MSR MSRDATA TSC"));
    assert_eq!(lines.count(), 5);
    assert!(!dir.path().join("longitudinal_0_ENERGY_COUNTERS_READ.out").exists());

    let mut out = Vec::new();
    dump::print_execution_counts(&mut out, &job).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.starts_with("# benchmark_id thread_id executionA executionB\n# 00 00 "));
}
