use std::fs::OpenOptions;
use std::io::Read;
use std::path::Path;

use anyhow::Result;

use vanallin::channel::{MSR_ALLOWLIST_PATH, MSR_BATCH_PATH};
use vanallin::cpuset::CpuSet;

fn check_node(path: &str, read: bool, write: bool) -> bool {
    if !Path::new(path).exists() {
        println!("  {:<24}MISSING", path);
        return false;
    }
    match OpenOptions::new().read(read).write(write).open(path) {
        Ok(_) => {
            println!("  {:<24}OK", path);
            true
        }
        Err(e) => {
            println!("  {:<24}PRESENT BUT NOT OPENABLE ({})", path, e);
            false
        }
    }
}

fn check_kernel_config() -> bool {
    let file = match std::fs::File::open("/proc/config.gz") {
        Ok(f) => f,
        Err(_) => {
            println!("  /proc/config.gz       NOT FOUND (SKIPPED)");
            return true;
        }
    };
    let mut decoder = flate2::read::GzDecoder::new(file);
    let mut config = String::new();
    if decoder.read_to_string(&mut config).is_err() {
        println!("  /proc/config.gz       UNREADABLE (SKIPPED)");
        return true;
    }
    let found = config.lines().any(|l| l == "CONFIG_X86_MSR=y" || l == "CONFIG_X86_MSR=m");
    if found {
        println!("  CONFIG_X86_MSR        OK");
    } else {
        println!("  CONFIG_X86_MSR        NOT FOUND -- msr-safe needs the msr driver");
    }
    found
}

#[cfg(target_arch = "x86_64")]
fn check_xsave() {
    let xsave = std::arch::is_x86_feature_detected!("xsave");
    let avx = std::arch::is_x86_feature_detected!("avx");
    println!("  {:<24}{}", "xsave", if xsave { "OK" } else { "MISSING" });
    println!("  {:<24}{}", "avx (os-enabled)", if avx { "OK" } else { "MISSING" });
    // ONLY XRSTOR NEEDS THESE
    if !(xsave && avx) {
        println!("  XRSTOR BENCHMARK WILL BE UNAVAILABLE");
    }
}

#[cfg(not(target_arch = "x86_64"))]
fn check_xsave() {
    println!("  NOT x86_64 -- XRSTOR BENCHMARK UNAVAILABLE");
}

pub fn run_check() -> Result<()> {
    println!("VANALLIN DEPENDENCY CHECK");
    println!();

    let mut ok = true;

    println!("MSR-SAFE:");
    if Path::new("/sys/module/msr_safe").exists() {
        println!("  {:<24}LOADED", "msr_safe module");
    } else {
        println!("  {:<24}NOT LOADED", "msr_safe module");
        ok = false;
    }
    ok &= check_node(MSR_BATCH_PATH, true, true);
    ok &= check_node(MSR_ALLOWLIST_PATH, false, true);
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        println!("  {:<24}NOT ROOT (euid {}) -- the device nodes usually need it", "privileges", euid);
    }
    println!();

    println!("KERNEL CONFIG:");
    if !check_kernel_config() {
        ok = false;
    }
    println!();

    println!("CPU:");
    check_xsave();
    match CpuSet::current_affinity() {
        Ok(set) => println!("  {:<24}{} ({})", "affinity", set.count(), set),
        Err(e) => {
            println!("  {:<24}UNKNOWN ({:#})", "affinity", e);
            ok = false;
        }
    }
    println!();

    if ok {
        println!("ALL CHECKS PASSED");
    } else {
        println!("SOME CHECKS FAILED");
        if !Path::new("/sys/module/msr_safe").exists() {
            println!("  Build and load msr-safe: https://github.com/LLNL/msr-safe");
        }
        std::process::exit(1);
    }

    Ok(())
}
