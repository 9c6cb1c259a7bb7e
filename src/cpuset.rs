// VANALLIN CPU SET
// FIXED-CAPACITY MEMBERSHIP SET OVER CPU INDICES
// MIRRORS cpu_set_t CAPACITY SO EVERY MEMBER CAN BE HANDED TO sched_setaffinity(2)

use std::fmt;
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};
use regex::Regex;

pub const CPU_CAPACITY: usize = libc::CPU_SETSIZE as usize;
const WORDS: usize = CPU_CAPACITY / 64;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuSet {
    bits: [u64; WORDS],
}

impl Default for CpuSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuSet {
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    pub fn single(cpu: usize) -> Result<Self> {
        let mut set = Self::new();
        set.insert(cpu)?;
        Ok(set)
    }

    pub fn insert(&mut self, cpu: usize) -> Result<()> {
        if cpu >= CPU_CAPACITY {
            bail!("REQUESTED CPU {} EXCEEDS THE MAX NUMBER OF CPUS ({})", cpu, CPU_CAPACITY);
        }
        self.bits[cpu / 64] |= 1u64 << (cpu % 64);
        Ok(())
    }

    pub fn contains(&self, cpu: usize) -> bool {
        cpu < CPU_CAPACITY && self.bits[cpu / 64] & (1u64 << (cpu % 64)) != 0
    }

    pub fn count(&self) -> usize {
        self.bits.iter().map(|w| w.count_ones() as usize).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|&w| w == 0)
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut out = *self;
        for (w, o) in out.bits.iter_mut().zip(other.bits.iter()) {
            *w |= *o;
        }
        out
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut out = *self;
        for (w, o) in out.bits.iter_mut().zip(other.bits.iter()) {
            *w &= *o;
        }
        out
    }

    // LOWEST MEMBER >= from, IF ANY
    pub fn next_member(&self, from: usize) -> Option<usize> {
        if from >= CPU_CAPACITY {
            return None;
        }
        let mut word = from / 64;
        let mut masked = self.bits[word] & (u64::MAX << (from % 64));
        loop {
            if masked != 0 {
                return Some(word * 64 + masked.trailing_zeros() as usize);
            }
            word += 1;
            if word == WORDS {
                return None;
            }
            masked = self.bits[word];
        }
    }

    pub fn first(&self) -> Option<usize> {
        self.next_member(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        let mut cursor = 0;
        std::iter::from_fn(move || {
            let cpu = self.next_member(cursor)?;
            cursor = cpu + 1;
            Some(cpu)
        })
    }

    pub fn to_libc(&self) -> libc::cpu_set_t {
        // SAFETY: cpu_set_t IS A PLAIN BITMASK, ALL-ZERO IS THE EMPTY SET
        let mut set: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        for cpu in self.iter() {
            unsafe { libc::CPU_SET(cpu, &mut set) };
        }
        set
    }

    pub fn from_libc(raw: &libc::cpu_set_t) -> Self {
        let mut set = Self::new();
        for cpu in 0..CPU_CAPACITY {
            if unsafe { libc::CPU_ISSET(cpu, raw) } {
                set.bits[cpu / 64] |= 1u64 << (cpu % 64);
            }
        }
        set
    }

    // CPUS THE CALLING THREAD MAY RUN ON. isolcpus STILL COUNT, taskset(1) EXCLUSIONS DO NOT.
    pub fn current_affinity() -> Result<Self> {
        let mut raw: libc::cpu_set_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut raw)
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error()).context("sched_getaffinity");
        }
        Ok(Self::from_libc(&raw))
    }

    // PIN THE CALLING THREAD (pid 0 = SELF) TO THIS SET
    pub fn pin_current_thread(&self) -> Result<()> {
        if self.is_empty() {
            bail!("CAN'T PIN A THREAD TO AN EMPTY CPU SET");
        }
        let raw = self.to_libc();
        let rc = unsafe {
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &raw)
        };
        if rc != 0 {
            return Err(std::io::Error::last_os_error())
                .with_context(|| format!("sched_setaffinity({})", self));
        }
        Ok(())
    }

    // ACCEPTS "n" OR "n-m", COMMA-JOINED. DUPLICATES WITHIN ONE STRING ARE AN ERROR.
    pub fn parse(s: &str) -> Result<Self> {
        static TOKEN: OnceLock<Regex> = OnceLock::new();
        let token = TOKEN.get_or_init(|| {
            Regex::new(r"^\s*(0[xX][0-9a-fA-F]+|\d+)\s*(?:-\s*(0[xX][0-9a-fA-F]+|\d+)\s*)?$")
                .expect("static cpu token regex")
        });

        if s.trim().is_empty() {
            bail!("CAN'T CONVERT EMPTY STRING TO A CPU SET");
        }

        let mut set = Self::new();
        for part in s.split(',') {
            let caps = token
                .captures(part)
                .with_context(|| format!("MALFORMED CPU TOKEN <{}> IN <{}>", part, s))?;
            let lo = parse_cpu_number(&caps[1])?;
            let hi = match caps.get(2) {
                Some(m) => parse_cpu_number(m.as_str())?,
                None => lo,
            };
            if lo >= CPU_CAPACITY || hi >= CPU_CAPACITY {
                bail!("REQUESTED CPU {} EXCEEDS THE MAX NUMBER OF CPUS ({})",
                      lo.max(hi), CPU_CAPACITY);
            }
            if hi < lo {
                bail!("CPU RANGE {}-{} IS REVERSED", lo, hi);
            }
            for cpu in lo..=hi {
                if set.contains(cpu) {
                    bail!("CPU {} DUPLICATED IN <{}>", cpu, s);
                }
                set.insert(cpu)?;
            }
        }
        Ok(set)
    }
}

fn parse_cpu_number(s: &str) -> Result<usize> {
    let n = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse::<usize>(),
    };
    n.with_context(|| format!("CPU NUMBER <{}> OUT OF RANGE", s))
}

// RANGES OF THREE OR MORE CONSECUTIVE CPUS PRINT AS lo-hi
impl fmt::Display for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cpus: Vec<usize> = self.iter().collect();
        let mut i = 0;
        let mut first = true;
        while i < cpus.len() {
            let mut j = i;
            while j + 1 < cpus.len() && cpus[j + 1] == cpus[j] + 1 {
                j += 1;
            }
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            if j - i >= 2 {
                write!(f, "{}-{}", cpus[i], cpus[j])?;
                i = j + 1;
            } else {
                write!(f, "{}", cpus[i])?;
                i += 1;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for CpuSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuSet{{{}}}", self)
    }
}

impl FromIterator<usize> for CpuSet {
    // MEMBERS BEYOND CAPACITY ARE DROPPED
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = Self::new();
        for cpu in iter {
            let _ = set.insert(cpu);
        }
        set
    }
}
