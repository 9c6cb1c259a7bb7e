// VANALLIN -- MSR MEASUREMENT HARNESS
// POLLS, BENCHMARKS AND LONGITUDINAL COUNTERS OVER msr-safe
//
// ALL WORKERS PARK, LONGITUDINAL COUNTERS ARM, EVERYONE IS RELEASED AT ONCE,
// THE MAIN THREAD KEEPS TIME (AND FLIPS A/B), THEN EVERYONE STOPS AND RESULTS DUMP.

mod cli;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vanallin::channel::MsrSafe;
use vanallin::cpuset::CpuSet;
use vanallin::dump;
use vanallin::duration::{format_duration, parse_duration};
use vanallin::job::{AbConfig, Job};
use vanallin::lifecycle::Harness;
use vanallin::options::JobRequest;
use vanallin::workload::Workloads;

static INTERRUPT: AtomicBool = AtomicBool::new(false);

#[derive(Parser)]
#[command(name = "vanallin")]
#[command(about = "VANALLIN -- MSR MEASUREMENT HARNESS")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    // JOB DURATION: <integer>[ns|us|ms|s|m|h|d], BARE INTEGER = SECONDS
    #[arg(short, long, default_value = "10s", value_parser = parse_duration)]
    seconds: Duration,

    // THE ONE CPU THE MAIN THREAD RUNS ON
    #[arg(short, long)]
    main: Option<String>,

    // <KIND>:<control_cpu>:<sampled_cpu>[:<interval>]
    #[arg(short, long)]
    poll: Vec<String>,

    // <KIND>:<execution_cpus>:<p1>:<p2>[:<p3>]
    #[arg(short, long)]
    benchmark: Vec<String>,

    // <KIND>:<sample_cpus>
    #[arg(short, long)]
    longitudinal: Vec<String>,

    // A/B DWELL INTERVAL. STRICT ALTERNATION UNLESS --ab-random.
    #[arg(long, value_parser = parse_duration)]
    ab: Option<Duration>,

    // DRAW EACH A/B INTERVAL AT RANDOM
    #[arg(long, requires = "ab")]
    ab_random: bool,

    // WHERE poll_*.out AND longitudinal_*.out LAND
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    // THE ALLOWLIST IS MANAGED ELSEWHERE
    #[arg(long)]
    no_allowlist: bool,

    // 0 = WARN, 1 = INFO, 2 = DEBUG, 3 = TRACE. RUST_LOG WINS.
    #[arg(short, long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=3))]
    debug_level: u8,
}

#[derive(Subcommand)]
enum Command {
    // PREFLIGHT: DRIVER NODES, KERNEL CONFIG, XSAVE/AVX
    Check,
}

fn init_logging(level: u8) {
    let filter = match level {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter))
        .format_timestamp_micros()
        .init();
}

// SUMMARIES + COUNTS ON STDOUT, SERIES TO FILES
fn dump_results(job: &Job, dir: &Path) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    dump::print_execution_counts(&mut out, job)?;
    dump::print_poll_summaries(&mut out, job)?;
    out.flush()?;
    dump::dump_files(job, dir)?;
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug_level);

    if let Some(Command::Check) = cli.command {
        return cli::check::run_check();
    }

    ctrlc::set_handler(move || {
        INTERRUPT.store(true, Ordering::Relaxed);
    })?;

    let eligible = CpuSet::current_affinity()?;
    let request = JobRequest {
        main: cli.main.clone(),
        duration: Some(cli.seconds),
        polls: cli.poll.clone(),
        benchmarks: cli.benchmark.clone(),
        longitudinals: cli.longitudinal.clone(),
        ab: cli.ab.map(|dwell| AbConfig { randomized: cli.ab_random, dwell }),
    };
    let mut job = request.build(&eligible).context("INVALID JOB")?;

    {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        writeln!(out, "# VANALLIN v{}", env!("CARGO_PKG_VERSION"))?;
        dump::print_parameters(&mut out, &job)?;
        out.flush()?;
    }

    let device = MsrSafe::new();
    let workloads = Workloads::new();
    let harness = Harness::new(&device, &workloads)
        .interrupt(&INTERRUPT)
        .load_allowlist(!cli.no_allowlist);

    let result = harness.run(&mut job);

    match &result {
        Ok(report) => {
            log::info!("RAN {} ({} A/B TRANSITIONS)", format_duration(report.elapsed), report.transitions);
            for (i, n) in report.executed_samples.iter().enumerate() {
                log::info!("POLL {}: {} SAMPLES", i, n);
            }
        }
        Err(e) => log::error!("RUN FAILED: {:#}", e),
    }
    if INTERRUPT.load(Ordering::Relaxed) {
        log::warn!("INTERRUPTED -- RESULTS COVER A SHORTENED RUN");
    }

    // BEST EFFORT: A PARTIAL RUN IS STILL WORTH KEEPING
    let dumped = dump_results(&job, &cli.output_dir);
    result?;
    dumped
}
