// VANALLIN REGISTER ACCESS CHANNEL
// ONE SUBMISSION = ONE IOCTL ON /dev/cpu/msr_batch, RESULTS WRITTEN BACK IN PLACE.
// EVERY CONSUMER OPENS ITS OWN CHANNEL. HANDLES ARE NEVER SHARED ACROSS THREADS.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::msr::{self, BatchArray, RegisterOp};

pub const MSR_BATCH_PATH: &str = "/dev/cpu/msr_batch";
pub const MSR_ALLOWLIST_PATH: &str = "/dev/cpu/msr_allowlist";

pub trait RegisterChannel {
    // NON-ZERO RETURN FROM THE DRIVER IS A TRANSPORT ERROR. NOT RETRIED.
    fn submit(&mut self, ops: &mut [RegisterOp]) -> Result<()>;
}

// FACTORY FOR CHANNELS. SHARED BY REFERENCE WITH EVERY POLL THREAD.
pub trait Device: Sync {
    type Channel: RegisterChannel + Send;

    fn open(&self) -> Result<Self::Channel>;

    fn load_allowlist(&self, text: &str) -> Result<()>;
}

// --- msr-safe ---

pub struct MsrSafe {
    batch_path: PathBuf,
    allowlist_path: PathBuf,
}

impl Default for MsrSafe {
    fn default() -> Self {
        Self::new()
    }
}

impl MsrSafe {
    pub fn new() -> Self {
        Self::at(MSR_BATCH_PATH, MSR_ALLOWLIST_PATH)
    }

    pub fn at(batch_path: impl Into<PathBuf>, allowlist_path: impl Into<PathBuf>) -> Self {
        Self { batch_path: batch_path.into(), allowlist_path: allowlist_path.into() }
    }
}

pub struct MsrSafeChannel {
    file: File,
}

impl RegisterChannel for MsrSafeChannel {
    fn submit(&mut self, ops: &mut [RegisterOp]) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut array = BatchArray::new(ops);
        // SAFETY: array.ops POINTS INTO ops, WHICH IS BORROWED MUTABLY FOR THE WHOLE CALL.
        // THE DRIVER WRITES AT MOST numops ENTRIES.
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), msr::X86_IOC_MSR_BATCH as _, &mut array as *mut BatchArray)
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            let failed = ops.iter().filter(|op| op.executed() && op.err != 0).count();
            return Err(err).with_context(|| {
                format!("MSR BATCH IOCTL FAILED ({} OPS, {} REPORTED ERRORS)", ops.len(), failed)
            });
        }
        Ok(())
    }
}

impl Device for MsrSafe {
    type Channel = MsrSafeChannel;

    fn open(&self) -> Result<MsrSafeChannel> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.batch_path)
            .with_context(|| format!("OPEN {}", self.batch_path.display()))?;
        Ok(MsrSafeChannel { file })
    }

    // ONE WRITE. THE DRIVER PARSES THE WHOLE TABLE PER write(2), SO A SHORT WRITE IS FATAL.
    fn load_allowlist(&self, text: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.allowlist_path)
            .with_context(|| format!("OPEN {}", self.allowlist_path.display()))?;
        let n = file
            .write(text.as_bytes())
            .with_context(|| format!("WRITE {}", self.allowlist_path.display()))?;
        if n != text.len() {
            bail!("SHORT ALLOWLIST WRITE: {} OF {} BYTES TO {}", n, text.len(),
                  self.allowlist_path.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_lands_in_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("msr_allowlist");
        std::fs::write(&path, "").unwrap();
        let dev = MsrSafe::at(dir.path().join("msr_batch"), &path);
        dev.load_allowlist(&msr::allowlist_text()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), msr::allowlist_text());
    }

    #[test]
    fn missing_device_node_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dev = MsrSafe::at(dir.path().join("nope"), dir.path().join("nope_either"));
        let err = dev.open().err().unwrap();
        assert!(format!("{:#}", err).contains("nope"));
        assert!(dev.load_allowlist("0x0010 0x0\n").is_err());
    }

    #[test]
    #[ignore]
    fn msr_safe_reads_tsc() {
        // REQUIRES ROOT AND THE msr-safe MODULE: sudo cargo test -- --ignored
        let dev = MsrSafe::new();
        dev.load_allowlist(&msr::allowlist_text()).unwrap();
        let mut chan = dev.open().unwrap();
        let mut ops = [msr::READ_FIXED_CTR0.instantiate(0)];
        chan.submit(&mut ops).unwrap();
        assert!(ops[0].executed());
        assert_ne!(ops[0].tsc, 0);
    }
}
