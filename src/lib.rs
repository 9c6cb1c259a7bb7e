// VANALLIN -- MSR MEASUREMENT HARNESS
// CONCURRENT MICRO-BENCHMARKS + msr-safe TELEMETRY, RELEASED TOGETHER, STOPPED TOGETHER
//
// EVERYTHING HERE RUNS WITHOUT PRIVILEGES EXCEPT channel::MsrSafe AND THE
// AFFINITY CALLS. TESTS SWAP IN THEIR OWN Device / WorkloadSet.

pub mod alternation;
pub mod batch;
pub mod channel;
pub mod cpuset;
pub mod dump;
pub mod duration;
pub mod job;
pub mod latch;
pub mod lifecycle;
pub mod msr;
pub mod options;
pub mod recipe;
pub mod rollover;
pub mod signals;
pub mod workload;
