// VANALLIN RESULT DUMP
// poll_<i>_<KIND>_<FIELD>.out           ONE VALUE PER EXECUTED SAMPLE, FROM THE SECOND ON
// longitudinal_<i>_<KIND>_<SLOT>.out    CPU ERR MSR MSRDATA TSC PER OP
// PLUS #-PREFIXED SUMMARIES AND EXECUTION COUNTS ON STDOUT

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::duration::format_duration;
use crate::job::{Job, PollTask};
use crate::msr::RegisterOp;
use crate::recipe::Slot;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Field {
    Cpu,
    Op,
    Err,
    PollMax,
    Wmask,
    Msr,
    Msrdata,
    Msrdata2,
    Tsc,
    Mperf,
    Aperf,
    Therm,
    Ptherm,
    Tag,
    DeltaMperf,
    DeltaAperf,
    DeltaTsc,
    DeltaTherm,
    DeltaPtherm,
    DeltaMsrdata,
}

impl Field {
    pub const ALL: [Field; 20] = [
        Field::Cpu, Field::Op, Field::Err, Field::PollMax, Field::Wmask, Field::Msr,
        Field::Msrdata, Field::Msrdata2, Field::Tsc, Field::Mperf, Field::Aperf,
        Field::Therm, Field::Ptherm, Field::Tag, Field::DeltaMperf, Field::DeltaAperf,
        Field::DeltaTsc, Field::DeltaTherm, Field::DeltaPtherm, Field::DeltaMsrdata,
    ];

    pub const LONGITUDINAL: [Field; 5] = [Field::Cpu, Field::Err, Field::Msr, Field::Msrdata, Field::Tsc];

    pub fn label(self) -> &'static str {
        match self {
            Self::Cpu => "CPU",
            Self::Op => "OP",
            Self::Err => "ERR",
            Self::PollMax => "POLL_MAX",
            Self::Wmask => "WMASK",
            Self::Msr => "MSR",
            Self::Msrdata => "MSRDATA",
            Self::Msrdata2 => "MSRDATA2",
            Self::Tsc => "TSC",
            Self::Mperf => "MPERF",
            Self::Aperf => "APERF",
            Self::Therm => "THERM",
            Self::Ptherm => "PTHERM",
            Self::Tag => "TAG",
            Self::DeltaMperf => "DELTA_MPERF",
            Self::DeltaAperf => "DELTA_APERF",
            Self::DeltaTsc => "DELTA_TSC",
            Self::DeltaTherm => "DELTA_THERM",
            Self::DeltaPtherm => "DELTA_PTHERM",
            Self::DeltaMsrdata => "DELTA_MSRDATA",
        }
    }

    // RAW FIELDS IN HEX, DELTAS AS SIGNED DECIMAL. NO DELTA WITHOUT AN EXECUTED PREDECESSOR.
    pub fn format(self, op: &RegisterOp, prev: Option<&RegisterOp>) -> String {
        let delta = |f: fn(&RegisterOp) -> u64| match prev.filter(|p| p.executed()) {
            Some(p) => (f(op).wrapping_sub(f(p)) as i64).to_string(),
            None => String::new(),
        };
        match self {
            Self::Cpu => format!("{:#x}", op.cpu),
            Self::Op => format!("{:#x}", op.op),
            Self::Err => format!("{:#x}", op.err),
            Self::PollMax => format!("{:#x}", op.poll_max),
            Self::Wmask => format!("{:#x}", op.wmask),
            Self::Msr => format!("{:#x}", op.msr),
            Self::Msrdata => format!("{:#x}", op.msrdata),
            Self::Msrdata2 => format!("{:#x}", op.msrdata2),
            Self::Tsc => format!("{:#x}", op.tsc),
            Self::Mperf => format!("{:#x}", op.mperf),
            Self::Aperf => format!("{:#x}", op.aperf),
            Self::Therm => format!("{:#x}", op.therm),
            Self::Ptherm => format!("{:#x}", op.ptherm),
            Self::Tag => format!("{:#x}", op.tag),
            Self::DeltaMperf => delta(|o| o.mperf),
            Self::DeltaAperf => delta(|o| o.aperf),
            Self::DeltaTsc => delta(|o| o.tsc),
            Self::DeltaTherm => delta(|o| o.therm),
            Self::DeltaPtherm => delta(|o| o.ptherm),
            Self::DeltaMsrdata => delta(|o| o.msrdata),
        }
    }
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let f = File::create(path).with_context(|| format!("CREATE {}", path.display()))?;
    Ok(BufWriter::new(f))
}

pub fn poll_file_name(idx: usize, poll: &PollTask, field: Field) -> String {
    format!("poll_{}_{}_{}.out", idx, poll.kind, field.label())
}

pub fn longitudinal_file_name(idx: usize, kind: impl std::fmt::Display, slot: Slot) -> String {
    format!("longitudinal_{}_{}_{}.out", idx, kind, slot)
}

pub fn write_poll_field(out: &mut impl Write, samples: &[RegisterOp], field: Field) -> std::io::Result<()> {
    writeln!(out, "# {}", field.label())?;
    let executed = samples.iter().take_while(|op| op.executed()).count();
    for o in 1..executed {
        writeln!(out, "{}", field.format(&samples[o], Some(&samples[o - 1])))?;
    }
    Ok(())
}

pub fn write_longitudinal(out: &mut impl Write, ops: &[RegisterOp]) -> std::io::Result<()> {
    let header: Vec<&str> = Field::LONGITUDINAL.iter().map(|f| f.label()).collect();
    writeln!(out, "# {}", header.join(" "))?;
    for op in ops {
        let row: Vec<String> = Field::LONGITUDINAL.iter().map(|f| f.format(op, None)).collect();
        writeln!(out, "{}", row.join(" "))?;
    }
    Ok(())
}

// RETURNS EVERY FILE WRITTEN
pub fn dump_files(job: &Job, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("CREATE {}", dir.display()))?;
    let mut written = Vec::new();

    for (i, task) in job.longitudinals.iter().enumerate() {
        for slot in Slot::ALL {
            let Some(batch) = task.batch(slot) else { continue };
            let path = dir.join(longitudinal_file_name(i, task.kind, slot));
            let mut out = create(&path)?;
            write_longitudinal(&mut out, &batch.ops)
                .and_then(|_| out.flush())
                .with_context(|| format!("WRITE {}", path.display()))?;
            written.push(path);
        }
    }

    for (i, poll) in job.polls.iter().enumerate() {
        for field in Field::ALL {
            let path = dir.join(poll_file_name(i, poll, field));
            let mut out = create(&path)?;
            write_poll_field(&mut out, &poll.samples, field)
                .and_then(|_| out.flush())
                .with_context(|| format!("WRITE {}", path.display()))?;
            written.push(path);
        }
    }

    log::info!("WROTE {} FILES TO {}", written.len(), dir.display());
    Ok(written)
}

pub fn print_parameters(out: &mut impl Write, job: &Job) -> std::io::Result<()> {
    writeln!(out, "# main cpu: {}", job.main_cpu)?;
    writeln!(out, "# {} polls, {} benchmark threads ({} requests), {} longitudinals. duration = {}",
             job.polls.len(), job.benchmarks.len(), job.benchmark_requests(),
             job.longitudinals.len(), format_duration(job.duration))?;
    match job.ab {
        Some(ab) => writeln!(out, "# a/b: {} every {}",
                             if ab.randomized { "randomized" } else { "alternating" },
                             format_duration(ab.dwell))?,
        None => writeln!(out, "# a/b: off")?,
    }
    for (i, p) in job.polls.iter().enumerate() {
        let interval = p.interval.map(format_duration).unwrap_or_else(|| "driver-paced".to_string());
        writeln!(out, "# poll {}: {} control={} sampled={} interval={}",
                 i, p.kind, p.control_cpu, p.sampled_cpu, interval)?;
    }
    for b in &job.benchmarks {
        writeln!(out, "# benchmark {}.{}: {} cpu={} params={:#x}:{:#x}:{:#x}",
                 b.request, b.thread, b.kind, b.execution_cpu, b.params[0], b.params[1], b.params[2])?;
    }
    for (i, l) in job.longitudinals.iter().enumerate() {
        writeln!(out, "# longitudinal {}: {} cpus={}", i, l.kind, l.sample_cpus)?;
    }
    Ok(())
}

pub fn print_poll_summaries(out: &mut impl Write, job: &Job) -> std::io::Result<()> {
    for (i, poll) in job.polls.iter().enumerate() {
        let n = poll.executed_samples();
        writeln!(out, "# POLL {} {} CONTROL {} SAMPLED {}: {} OF {} SAMPLES",
                 i, poll.kind, poll.control_cpu, poll.sampled_cpu, n, poll.samples.len())?;
        if n < 2 {
            continue;
        }
        let (first, last) = (&poll.samples[0], &poll.samples[n - 1]);
        if poll.kind.wraps_at_32_bits() {
            writeln!(out, "# SUMMARY delta msrdata = {}", last.msrdata.wrapping_sub(first.msrdata))?;
        }
        writeln!(out, "# SUMMARY delta tsc     = {}", last.tsc.wrapping_sub(first.tsc))?;
        writeln!(out, "# SUMMARY initial C     = {}", first.therm)?;
        writeln!(out, "# SUMMARY final C       = {}", last.therm)?;
    }
    Ok(())
}

pub fn print_execution_counts(out: &mut impl Write, job: &Job) -> std::io::Result<()> {
    if job.benchmarks.is_empty() {
        return Ok(());
    }
    writeln!(out, "# benchmark_id thread_id executionA executionB")?;
    for b in &job.benchmarks {
        writeln!(out, "# {:02} {:02} {:15} {:15}",
                 b.request, b.thread, b.executed_loops[0], b.executed_loops[1])?;
    }
    Ok(())
}
