// VANALLIN REGISTER CATALOG
// MSR ADDRESSES, OP FLAGS, THE msr-safe WIRE LAYOUT, AND THE NAMED PRIMITIVE OPS
// EVERY RECIPE AND POLL IS BUILT FROM.

use std::fmt::Write as _;

// --- MSR ADDRESSES ---

pub const TIME_STAMP_COUNTER: u32 = 0x0010;
pub const MISC_PACKAGE_CTLS: u32 = 0x00BC;
pub const MPERF: u32 = 0x00E7;
pub const APERF: u32 = 0x00E8;
pub const ARCH_CAPABILITIES: u32 = 0x010A;
pub const PERF_STATUS: u32 = 0x0198;
pub const PERF_CTL: u32 = 0x0199;
pub const THERM_STATUS: u32 = 0x019C;          // 22:16 DEGREES C BELOW TCC ACTIVATION
pub const ENERGY_PERF_BIAS: u32 = 0x01B0;
pub const PACKAGE_THERM_STATUS: u32 = 0x01B1;  // 22:16 DEGREES C BELOW TCC ACTIVATION
pub const FIXED_CTR0: u32 = 0x0309;            // INST_RETIRED.ANY
pub const FIXED_CTR1: u32 = 0x030A;            // CPU_CLK_UNHALTED.THREAD
pub const FIXED_CTR2: u32 = 0x030B;            // CPU_CLK_UNHALTED.REF_TSC
pub const FIXED_CTR3: u32 = 0x030C;
pub const FIXED_CTR_CTRL: u32 = 0x038D;
pub const PERF_GLOBAL_CTRL: u32 = 0x038F;
pub const RAPL_POWER_UNIT: u32 = 0x0606;
pub const PKG_POWER_LIMIT: u32 = 0x0610;
pub const PKG_ENERGY_STATUS: u32 = 0x0611;
pub const PACKAGE_ENERGY_TIME_STATUS: u32 = 0x0612;
pub const PKG_PERF_STATUS: u32 = 0x0613;
pub const PKG_POWER_INFO: u32 = 0x0614;
pub const DRAM_POWER_LIMIT: u32 = 0x0618;
pub const DRAM_ENERGY_STATUS: u32 = 0x0619;
pub const DRAM_PERF_STATUS: u32 = 0x061B;
pub const DRAM_POWER_INFO: u32 = 0x061C;
pub const PP0_POWER_LIMIT: u32 = 0x0638;
pub const PP0_ENERGY_STATUS: u32 = 0x0639;
pub const PP0_POLICY: u32 = 0x063A;
pub const PP1_POWER_LIMIT: u32 = 0x0640;
pub const PP1_ENERGY_STATUS: u32 = 0x0641;
pub const PP1_POLICY: u32 = 0x0642;
pub const PLATFORM_ENERGY_COUNTER: u32 = 0x064D;
pub const PPERF: u32 = 0x064E;
pub const PLATFORM_POWER_LIMIT: u32 = 0x065C;
pub const PLATFORM_POWER_INFO: u32 = 0x0665;
pub const PLATFORM_RAPL_SOCKET_PERF_STATUS: u32 = 0x0666;
pub const PM_ENABLE: u32 = 0x0770;
pub const HWP_CAPABILITIES: u32 = 0x0771;

// --- OP FLAGS (msr-safe) ---

pub const OP_WRITE: u16 = 0x0001;
pub const OP_READ: u16 = 0x0002;
pub const OP_POLL: u16 = 0x0004;
pub const OP_TSC: u16 = 0x0008;
pub const OP_MPERF: u16 = 0x0010;
pub const OP_APERF: u16 = 0x0020;
pub const OP_THERM: u16 = 0x0040;
pub const OP_PTHERM: u16 = 0x0080;
pub const OP_ALL_MODS: u16 = OP_TSC | OP_MPERF | OP_APERF | OP_THERM | OP_PTHERM;

// ERROR CODE OF AN OP THE DRIVER NEVER TOUCHED. DISTINGUISHES TRUNCATED RUNS FROM REAL ZEROS.
pub const UNUSED_OP: i32 = 0xDECA_FBADu32 as i32;

pub const MAX_POLL_ATTEMPTS: u32 = 10_000;

// BATCH FORMAT TAG THE DRIVER CHECKS AGAINST ITS OWN (MAJOR << 16 | MINOR)
pub const MSR_SAFE_VERSION: u32 = 2 << 16;

// MSR-SAFE ADDRESSES CPUS WITH A u16
pub const MAX_MSR_SAFE_CPU: usize = u16::MAX as usize;

// THERMAL MARGIN: 7-BIT FIELD AT BIT 16
pub const THERM_SHIFT: u32 = 16;
pub const THERM_MASK: u64 = 0x7f;

pub fn extract_temperature(raw: u64) -> u64 {
    (raw >> THERM_SHIFT) & THERM_MASK
}

// --- WIRE LAYOUT ---

// MATCHES struct msr_batch_op IN msr_safe.h
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RegisterOp {
    pub cpu: u16,
    pub op: u16,
    pub err: i32,
    pub poll_max: u32,
    pub msr: u32,
    pub msrdata: u64,
    pub wmask: u64,
    pub msrdata2: u64,
    pub tsc: u64,
    pub mperf: u64,
    pub aperf: u64,
    pub therm: u64,
    pub ptherm: u64,
    pub tag: u64,
}

impl Default for RegisterOp {
    fn default() -> Self {
        Self {
            cpu: 0,
            op: 0,
            err: UNUSED_OP,
            poll_max: 0,
            msr: 0,
            msrdata: 0,
            wmask: 0,
            msrdata2: 0,
            tsc: 0,
            mperf: 0,
            aperf: 0,
            therm: 0,
            ptherm: 0,
            tag: 0,
        }
    }
}

impl RegisterOp {
    pub fn executed(&self) -> bool {
        self.err != UNUSED_OP
    }

    pub fn is_write(&self) -> bool {
        self.op & OP_WRITE != 0
    }
}

// MATCHES struct msr_batch_array IN msr_safe.h
#[repr(C)]
pub struct BatchArray {
    pub numops: u32,
    pub version: u32,
    pub ops: *mut RegisterOp,
}

impl BatchArray {
    // BORROWS ops BY POINTER: THE SLICE MUST OUTLIVE THE IOCTL
    pub fn new(ops: &mut [RegisterOp]) -> Self {
        Self { numops: ops.len() as u32, version: MSR_SAFE_VERSION, ops: ops.as_mut_ptr() }
    }
}

// _IOWR('c', 0xA2, struct msr_batch_array)
pub const X86_IOC_MSR_BATCH: libc::c_ulong = ioc_readwrite(b'c', 0xA2, std::mem::size_of::<BatchArray>());

const fn ioc_readwrite(ty: u8, nr: u8, size: usize) -> libc::c_ulong {
    const IOC_READ_WRITE: libc::c_ulong = 3;
    (IOC_READ_WRITE << 30) | ((size as libc::c_ulong) << 16) | ((ty as libc::c_ulong) << 8) | nr as libc::c_ulong
}

// --- CATALOG ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpTemplate {
    pub name: &'static str,
    pub op: u16,
    pub msr: u32,
    pub msrdata: u64,
    pub poll_max: u32,
}

impl OpTemplate {
    const fn write(name: &'static str, msr: u32, msrdata: u64) -> Self {
        Self { name, op: OP_WRITE | OP_TSC, msr, msrdata, poll_max: 0 }
    }

    const fn read(name: &'static str, op: u16, msr: u32) -> Self {
        Self { name, op: OP_READ | op, msr, msrdata: 0, poll_max: 0 }
    }

    const fn poll(name: &'static str, msr: u32) -> Self {
        Self { name, op: OP_POLL | OP_ALL_MODS, msr, msrdata: 0, poll_max: MAX_POLL_ATTEMPTS }
    }

    // FRESH OP FOR ONE CPU, RESULT MARKED NEVER-EXECUTED
    pub fn instantiate(&self, cpu: u16) -> RegisterOp {
        RegisterOp {
            cpu,
            op: self.op,
            err: UNUSED_OP,
            poll_max: self.poll_max,
            msr: self.msr,
            msrdata: self.msrdata,
            ..RegisterOp::default()
        }
    }
}

pub const ZERO_FIXED_CTR0: OpTemplate = OpTemplate::write("ZERO_FIXED_CTR0", FIXED_CTR0, 0);
pub const ZERO_FIXED_CTR1: OpTemplate = OpTemplate::write("ZERO_FIXED_CTR1", FIXED_CTR1, 0);
pub const ZERO_FIXED_CTR2: OpTemplate = OpTemplate::write("ZERO_FIXED_CTR2", FIXED_CTR2, 0);

pub const READ_FIXED_CTR0: OpTemplate = OpTemplate::read("READ_FIXED_CTR0", OP_TSC, FIXED_CTR0);
pub const READ_FIXED_CTR1: OpTemplate = OpTemplate::read("READ_FIXED_CTR1", OP_TSC, FIXED_CTR1);
pub const READ_FIXED_CTR2: OpTemplate = OpTemplate::read("READ_FIXED_CTR2", OP_TSC, FIXED_CTR2);

// ENABLE ALL THREE FIXED COUNTERS (OS + USR), NON-GLOBAL
pub const ENABLE_FIXED: OpTemplate = OpTemplate::write("ENABLE_FIXED", FIXED_CTR_CTRL, 0x333);

// GLOBAL ENABLE/DISABLE. FIXED COUNTERS ONLY FOR NOW.
pub const START_GLOBAL: OpTemplate = OpTemplate::write("START_GLOBAL", PERF_GLOBAL_CTRL, 0x7_0000_0000);
pub const STOP_GLOBAL: OpTemplate = OpTemplate::write("STOP_GLOBAL", PERF_GLOBAL_CTRL, 0);

pub const POLL_PKG_ENERGY: OpTemplate = OpTemplate::poll("POLL_PKG_ENERGY", PKG_ENERGY_STATUS);
pub const POLL_PP0_ENERGY: OpTemplate = OpTemplate::poll("POLL_PP0_ENERGY", PP0_ENERGY_STATUS);
pub const POLL_PP1_ENERGY: OpTemplate = OpTemplate::poll("POLL_PP1_ENERGY", PP1_ENERGY_STATUS);
pub const POLL_DRAM_ENERGY: OpTemplate = OpTemplate::poll("POLL_DRAM_ENERGY", DRAM_ENERGY_STATUS);
pub const POLL_PKG_THERMAL: OpTemplate = OpTemplate::poll("POLL_PKG_THERMAL", PACKAGE_THERM_STATUS);
pub const POLL_CORE_THERMAL: OpTemplate = OpTemplate::poll("POLL_CORE_THERMAL", THERM_STATUS);
pub const POLL_FREQUENCY: OpTemplate = OpTemplate::poll("POLL_FREQUENCY", PERF_STATUS);

pub const READ_RAPL_POWER_UNIT: OpTemplate =
    OpTemplate::read("READ_RAPL_POWER_UNIT", OP_ALL_MODS, RAPL_POWER_UNIT);
pub const READ_PKG_ENERGY: OpTemplate =
    OpTemplate::read("READ_PKG_ENERGY", OP_ALL_MODS, PKG_ENERGY_STATUS);
pub const READ_DRAM_ENERGY: OpTemplate =
    OpTemplate::read("READ_DRAM_ENERGY", OP_ALL_MODS, DRAM_ENERGY_STATUS);
pub const READ_PP0_ENERGY: OpTemplate =
    OpTemplate::read("READ_PP0_ENERGY", OP_ALL_MODS, PP0_ENERGY_STATUS);
pub const READ_PP1_ENERGY: OpTemplate =
    OpTemplate::read("READ_PP1_ENERGY", OP_ALL_MODS, PP1_ENERGY_STATUS);
pub const READ_PLATFORM_ENERGY: OpTemplate =
    OpTemplate::read("READ_PLATFORM_ENERGY", OP_ALL_MODS, PLATFORM_ENERGY_COUNTER);

// --- ALLOWLIST ---

// (ADDRESS, WRITE MASK). READ-ONLY REGISTERS CARRY A ZERO MASK.
pub const ALLOWLIST: &[(u32, u64)] = &[
    (PP0_ENERGY_STATUS, 0),
    (PKG_ENERGY_STATUS, 0),
    (DRAM_ENERGY_STATUS, 0),
    (PP1_ENERGY_STATUS, 0),
    (TIME_STAMP_COUNTER, 0),
    (MISC_PACKAGE_CTLS, 0),
    (MPERF, 0),
    (APERF, 0),
    (ARCH_CAPABILITIES, 0),
    (PERF_STATUS, 0),
    (PERF_CTL, 0),
    (THERM_STATUS, 0),
    (ENERGY_PERF_BIAS, 0),
    (PACKAGE_THERM_STATUS, 0),
    (FIXED_CTR0, u64::MAX),
    (FIXED_CTR1, u64::MAX),
    (FIXED_CTR2, u64::MAX),
    (FIXED_CTR3, u64::MAX),
    (FIXED_CTR_CTRL, 0x333),
    (PERF_GLOBAL_CTRL, 0x7_0000_0000),
    (RAPL_POWER_UNIT, 0),
    (PKG_POWER_LIMIT, 0),
    (PACKAGE_ENERGY_TIME_STATUS, 0),
    (PKG_PERF_STATUS, 0),
    (PKG_POWER_INFO, 0),
    (DRAM_POWER_LIMIT, 0),
    (DRAM_PERF_STATUS, 0),
    (DRAM_POWER_INFO, 0),
    (PP0_POWER_LIMIT, 0),
    (PP0_POLICY, 0),
    (PP1_POWER_LIMIT, 0),
    (PP1_POLICY, 0),
    (PLATFORM_ENERGY_COUNTER, 0),
    (PPERF, 0),
    (PLATFORM_POWER_INFO, 0),
    (PLATFORM_POWER_LIMIT, 0),
    (PLATFORM_RAPL_SOCKET_PERF_STATUS, 0),
    (PM_ENABLE, 0),
    (HWP_CAPABILITIES, 0),
];

pub fn allowlist_text() -> String {
    let mut out = String::with_capacity(ALLOWLIST.len() * 26);
    for (msr, mask) in ALLOWLIST {
        let _ = writeln!(out, "0x{:04X} 0x{:016X}", msr, mask);
    }
    out
}
