// VANALLIN DURATION STRINGS
// <integer>[ns|us|ms|s|m|h|d], BARE INTEGER = SECONDS
// HEX NEEDS A UNIT: A TRAILING d IS A DIGIT, NOT DAYS

use std::sync::OnceLock;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use regex::Regex;

const NS_PER_US: u64 = 1_000;
const NS_PER_MS: u64 = NS_PER_US * 1_000;
const NS_PER_S: u64 = NS_PER_MS * 1_000;
const NS_PER_M: u64 = NS_PER_S * 60;
const NS_PER_H: u64 = NS_PER_M * 60;
const NS_PER_D: u64 = NS_PER_H * 24;

pub fn parse_duration(s: &str) -> Result<Duration> {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    let grammar = GRAMMAR.get_or_init(|| {
        Regex::new(r"^(0[xX][0-9a-fA-F]+|\d+)([a-z]*)$").expect("static duration regex")
    });

    let caps = grammar
        .captures(s.trim())
        .with_context(|| format!("STRING WITH NO NUMERIC DATA PASSED AS A DURATION (<{}>)", s))?;
    let digits = &caps[1];
    let hex = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X"));
    if hex.is_some() && caps[2].is_empty() {
        bail!("HEX DURATION <{}> NEEDS A UNIT", s);
    }
    let val = match hex {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => digits.parse::<u64>(),
    }
    .with_context(|| format!("DURATION <{}> IS OUT OF RANGE", s))?;

    let scale = |mult: u64| -> Result<Duration> {
        let secs = val
            .checked_mul(mult)
            .with_context(|| format!("DURATION <{}> IS OUT OF RANGE", s))?;
        Ok(Duration::from_secs(secs))
    };

    match &caps[2] {
        "ns" => Ok(Duration::from_nanos(val)),
        "us" => Ok(Duration::from_micros(val)),
        "ms" => Ok(Duration::from_millis(val)),
        "" | "s" => scale(1),
        "m" => scale(60),
        "h" => scale(60 * 60),
        "d" => scale(60 * 60 * 24),
        unit => bail!("UNKNOWN DURATION UNIT <{}> IN <{}>", unit, s),
    }
}

// LARGEST UNIT THAT FITS, THREE FRACTIONAL DIGITS WHEN NOT EXACT
pub fn format_duration(d: Duration) -> String {
    let ns = d.as_nanos().min(u64::MAX as u128) as u64;
    let units = [
        (NS_PER_D, "d"),
        (NS_PER_H, "h"),
        (NS_PER_M, "m"),
        (NS_PER_S, "s"),
        (NS_PER_MS, "ms"),
        (NS_PER_US, "us"),
    ];
    for (per, suffix) in units {
        if ns >= per {
            return if ns % per == 0 {
                format!("{}{}", ns / per, suffix)
            } else {
                format!("{}.{:03}{}", ns / per, (ns % per) / (per / 1000), suffix)
            };
        }
    }
    format!("{}ns", ns)
}

// floor(n / d) IN NANOSECONDS. ZERO DENOMINATOR YIELDS ZERO.
pub fn divide(numerator: Duration, denominator: Duration) -> u64 {
    let d = denominator.as_nanos();
    if d == 0 {
        return 0;
    }
    (numerator.as_nanos() / d).min(u64::MAX as u128) as u64
}
