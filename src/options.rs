// VANALLIN TASK OPTIONS
// COMMAND-LINE TASK STRINGS -> VALIDATED JOB
//
//   POLL          <KIND>:<control_cpu>:<sampled_cpu>[:<interval>]
//   BENCHMARK     <KIND>:<execution_cpus>:<p1>:<p2>[:<p3>]
//   LONGITUDINAL  <KIND>:<sample_cpus>
//
// ANY VIOLATION IS A CONFIGURATION ERROR. NOTHING IS PARTIALLY APPLIED.

use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::cpuset::CpuSet;
use crate::duration::parse_duration;
use crate::job::{AbConfig, BenchmarkKind, Job, LongitudinalTask, PollKind, PollTask};
use crate::recipe::LongitudinalKind;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollRequest {
    pub kind: PollKind,
    pub control_cpu: usize,
    pub sampled_cpu: usize,
    pub interval: Option<Duration>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BenchmarkRequest {
    pub kind: BenchmarkKind,
    pub execution_cpus: CpuSet,
    pub params: [u64; 3],
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongitudinalRequest {
    pub kind: LongitudinalKind,
    pub sample_cpus: CpuSet,
}

fn fields<'s>(s: &'s str, what: &str, min: usize, max: usize) -> Result<Vec<&'s str>> {
    let parts: Vec<&str> = s.split(':').collect();
    if parts.len() < min {
        bail!("MISSING FIELDS IN {} PARAMETER <{}> (EXPECTED {}, GOT {})", what, s, min, parts.len());
    }
    if parts.len() > max {
        bail!("TOO MANY FIELDS IN {} PARAMETER <{}> (EXPECTED AT MOST {}, GOT {})", what, s, max, parts.len());
    }
    Ok(parts)
}

pub fn parse_u64(s: &str) -> Result<u64> {
    let t = s.trim();
    let v = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => t.parse::<u64>(),
    };
    v.with_context(|| format!("<{}> IS NOT A 64-BIT UNSIGNED INTEGER", s))
}

fn single_cpu(s: &str, what: &str) -> Result<usize> {
    let set = CpuSet::parse(s).with_context(|| format!("{} CPU", what))?;
    match (set.count(), set.first()) {
        (1, Some(cpu)) => Ok(cpu),
        (n, _) => bail!("{} MUST BE EXACTLY ONE CPU, GOT {} (<{}>)", what, n, s),
    }
}

pub fn parse_poll(s: &str) -> Result<PollRequest> {
    let f = fields(s, "POLL", 3, 4)?;
    let kind: PollKind = f[0].parse()?;
    let control_cpu = single_cpu(f[1], "POLL CONTROL")?;
    let sampled_cpu = single_cpu(f[2], "POLL SAMPLED")?;
    let interval = match f.get(3) {
        Some(d) => {
            let d = parse_duration(d)?;
            if d.is_zero() {
                bail!("POLL INTERVAL MUST BE NON-ZERO (<{}>)", s);
            }
            Some(d)
        }
        None => None,
    };
    Ok(PollRequest { kind, control_cpu, sampled_cpu, interval })
}

pub fn parse_benchmark(s: &str) -> Result<BenchmarkRequest> {
    let f = fields(s, "BENCHMARK", 4, 5)?;
    let kind: BenchmarkKind = f[0].parse()?;
    let execution_cpus = CpuSet::parse(f[1]).context("BENCHMARK EXECUTION CPUS")?;
    let mut params = [0u64; 3];
    for (p, raw) in params.iter_mut().zip(&f[2..]) {
        *p = parse_u64(raw)?;
    }
    Ok(BenchmarkRequest { kind, execution_cpus, params })
}

pub fn parse_longitudinal(s: &str) -> Result<LongitudinalRequest> {
    let f = fields(s, "LONGITUDINAL", 2, 2)?;
    let kind: LongitudinalKind = f[0].parse()?;
    let sample_cpus = CpuSet::parse(f[1]).context("LONGITUDINAL SAMPLE CPUS")?;
    Ok(LongitudinalRequest { kind, sample_cpus })
}

#[derive(Clone, Debug, Default)]
pub struct JobRequest {
    pub main: Option<String>,
    pub duration: Option<Duration>,
    pub polls: Vec<String>,
    pub benchmarks: Vec<String>,
    pub longitudinals: Vec<String>,
    pub ab: Option<AbConfig>,
}

pub const DEFAULT_DURATION: Duration = Duration::from_secs(10);

// MAIN, CONTROL, SAMPLED AND EXECUTION CPUS EACH BELONG TO ONE ROLE ONLY
struct Claims {
    used: CpuSet,
    owners: Vec<(usize, String)>,
}

impl Claims {
    fn new() -> Self {
        Self { used: CpuSet::new(), owners: Vec::new() }
    }

    fn claim(&mut self, cpu: usize, who: String, eligible: &CpuSet) -> Result<()> {
        if !eligible.contains(cpu) {
            bail!("{} CPU {} IS OUTSIDE THIS PROCESS'S AFFINITY ({})", who, cpu, eligible);
        }
        if self.used.contains(cpu) {
            let prev = self.owners.iter().find(|(c, _)| *c == cpu).map(|(_, w)| w.as_str()).unwrap_or("?");
            bail!("CPU {} REQUESTED BY {} IS ALREADY USED BY {}", cpu, who, prev);
        }
        self.used.insert(cpu)?;
        self.owners.push((cpu, who));
        Ok(())
    }
}

impl JobRequest {
    pub fn build(&self, eligible: &CpuSet) -> Result<Job> {
        let main = match &self.main {
            Some(m) => single_cpu(m, "MAIN")?,
            None => bail!("A MAIN CPU (-m) IS REQUIRED"),
        };
        let duration = self.duration.unwrap_or(DEFAULT_DURATION);
        if duration.is_zero() {
            bail!("JOB DURATION MUST BE NON-ZERO");
        }
        if let Some(ab) = &self.ab {
            if ab.dwell.is_zero() {
                bail!("A/B DWELL MUST BE NON-ZERO");
            }
        }

        let mut claims = Claims::new();
        claims.claim(main, "MAIN".to_string(), eligible)?;

        let mut job = Job::new(CpuSet::single(main)?, duration);
        job.ab = self.ab;

        for (i, s) in self.polls.iter().enumerate() {
            let p = parse_poll(s)?;
            claims.claim(p.control_cpu, format!("POLL {} CONTROL", i), eligible)?;
            claims.claim(p.sampled_cpu, format!("POLL {} SAMPLED", i), eligible)?;
            job.polls.push(PollTask::new(p.kind, p.control_cpu, p.sampled_cpu, p.interval));
        }

        for (i, s) in self.benchmarks.iter().enumerate() {
            let b = parse_benchmark(s)?;
            for cpu in b.execution_cpus.iter() {
                claims.claim(cpu, format!("BENCHMARK {} EXECUTION", i), eligible)?;
            }
            job.add_benchmark(b.kind, &b.execution_cpus, b.params);
        }

        // SAMPLE CPUS MAY OVERLAP ANY ROLE
        for s in &self.longitudinals {
            let l = parse_longitudinal(s)?;
            job.longitudinals.push(LongitudinalTask::new(l.kind, l.sample_cpus));
        }

        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eligible() -> CpuSet {
        CpuSet::parse("0-15").unwrap()
    }

    fn request(main: &str) -> JobRequest {
        JobRequest { main: Some(main.to_string()), ..Default::default() }
    }

    #[test]
    fn poll_with_and_without_interval() {
        let p = parse_poll("PKG_ENERGY:1:2").unwrap();
        assert_eq!((p.kind, p.control_cpu, p.sampled_cpu, p.interval), (PollKind::PkgEnergy, 1, 2, None));
        let p = parse_poll("CORE_THERMAL:3:4:5ms").unwrap();
        assert_eq!(p.interval, Some(Duration::from_millis(5)));
    }

    #[test]
    fn poll_field_count_is_checked() {
        assert!(parse_poll("PKG_ENERGY:1").is_err());
        assert!(parse_poll("PKG_ENERGY:1:2:5ms:9").is_err());
        assert!(parse_poll("PKG_ENERGY:1-2:3").is_err());
        assert!(parse_poll("PKG_ENERGY:1:2:0").is_err());
    }

    #[test]
    fn benchmark_params() {
        let b = parse_benchmark("ABSHIFT:4-5:0xff:7:3").unwrap();
        assert_eq!(b.params, [0xff, 7, 3]);
        assert_eq!(b.execution_cpus.count(), 2);
        let b = parse_benchmark("XRSTOR:6:1:2").unwrap();
        assert_eq!(b.params, [1, 2, 0]);
        assert!(parse_benchmark("XRSTOR:6:1").is_err());
        assert!(parse_benchmark("XRSTOR:6:one:2").is_err());
    }

    #[test]
    fn build_expands_and_orders() {
        let mut r = request("0");
        r.polls.push("FREQUENCY:1:2".into());
        r.benchmarks.push("SPIN:3-5:0:0".into());
        r.longitudinals.push("FIXED_FUNCTION_COUNTERS:0-7".into());
        let job = r.build(&eligible()).unwrap();
        assert_eq!(job.polls.len(), 1);
        assert_eq!(job.benchmarks.len(), 3);
        assert_eq!(job.longitudinals.len(), 1);
        assert_eq!(job.duration, DEFAULT_DURATION);
        assert_eq!(job.main_cpu.first(), Some(0));
    }

    #[test]
    fn duplicate_roles_are_rejected() {
        let mut r = request("0");
        r.polls.push("FREQUENCY:1:2".into());
        r.benchmarks.push("SPIN:2-3:0:0".into());
        let err = r.build(&eligible()).err().unwrap();
        assert!(err.to_string().contains("POLL 0 SAMPLED"));

        let mut r = request("1");
        r.polls.push("FREQUENCY:1:2".into());
        assert!(r.build(&eligible()).is_err());
    }

    #[test]
    fn main_must_be_single_and_eligible() {
        assert!(request("0-1").build(&eligible()).is_err());
        assert!(request("99").build(&eligible()).is_err());
        assert!(JobRequest::default().build(&eligible()).is_err());
    }

    #[test]
    fn ineligible_execution_cpu() {
        let mut r = request("0");
        r.benchmarks.push("SPIN:14-17:0:0".into());
        assert!(r.build(&eligible()).is_err());
    }
}
