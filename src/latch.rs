// VANALLIN START LATCH
// ONE-SHOT GATE: A WORKER PARKS ON wait() UNTIL THE MAIN THREAD CALLS release().
// CREATED CLOSED BEFORE THE WORKER IS SPAWNED, NEVER RE-ARMED.

use std::sync::{Condvar, Mutex};

pub struct Latch {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new()
    }
}

impl Latch {
    pub const fn new() -> Self {
        Self { open: Mutex::new(false), cv: Condvar::new() }
    }

    pub fn release(&self) {
        // A POISONED GATE IS STILL A GATE
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        *open = true;
        drop(open);
        self.cv.notify_all();
    }

    pub fn wait(&self) {
        let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
        while !*open {
            open = self.cv.wait(open).unwrap_or_else(|e| e.into_inner());
        }
    }

    #[cfg(test)]
    fn is_released(&self) -> bool {
        *self.open.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[test]
    fn waiter_blocks_until_release() {
        let latch = Latch::new();
        let passed = AtomicBool::new(false);
        std::thread::scope(|s| {
            s.spawn(|| {
                latch.wait();
                passed.store(true, Ordering::SeqCst);
            });
            std::thread::sleep(Duration::from_millis(50));
            assert!(!passed.load(Ordering::SeqCst));
            latch.release();
        });
        assert!(passed.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_after_release_returns_immediately() {
        let latch = Latch::new();
        latch.release();
        latch.wait();
        assert!(latch.is_released());
    }
}
