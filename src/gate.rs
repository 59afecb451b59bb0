//! The global concurrency gate (spec C1): a counted semaphore sized to the
//! host's logical CPU count, with both blocking and non-blocking acquisition.
//!
//! A single permit covers one unit of CPU-bound work — analyzing a whole
//! package, or running one analyzer inside a package. An analyzer may instead
//! run without acquiring a new permit, reusing its package's permit; that
//! choice lives in the callers of this module, not here.

use log::trace;
use std::sync::{Condvar, Mutex};

/// A counted semaphore. Permits are fungible and tracked only by count.
pub struct Gate {
    capacity: usize,
    in_use: Mutex<usize>,
    freed: Condvar,
}

impl Gate {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "gate capacity must be at least 1");
        Gate {
            capacity,
            in_use: Mutex::new(0),
            freed: Condvar::new(),
        }
    }

    /// Sized to the host's logical CPU count, per spec.md §4.1.
    pub fn for_host() -> Self {
        Gate::new(num_cpus::get())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        *self.in_use.lock().unwrap()
    }

    /// Blocks until a permit is available.
    pub fn acquire(&self) -> Permit<'_> {
        let mut in_use = self.in_use.lock().unwrap();
        while *in_use >= self.capacity {
            in_use = self.freed.wait(in_use).unwrap();
        }
        *in_use += 1;
        trace!("gate: acquire ({}/{})", *in_use, self.capacity);
        Permit { gate: self }
    }

    /// Non-blocking; `None` if no permit is currently available.
    pub fn try_acquire(&self) -> Option<Permit<'_>> {
        let mut in_use = self.in_use.lock().unwrap();
        if *in_use >= self.capacity {
            trace!("gate: try_acquire failed ({}/{})", *in_use, self.capacity);
            return None;
        }
        *in_use += 1;
        trace!("gate: try_acquire ok ({}/{})", *in_use, self.capacity);
        Some(Permit { gate: self })
    }

    fn release(&self) {
        let mut in_use = self.in_use.lock().unwrap();
        *in_use -= 1;
        trace!("gate: release ({}/{})", *in_use, self.capacity);
        self.freed.notify_one();
    }
}

/// An RAII permit: releases itself back to the `Gate` on drop.
pub struct Permit<'a> {
    gate: &'a Gate,
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn try_acquire_respects_capacity() {
        let gate = Gate::new(2);
        let p1 = gate.try_acquire().expect("first permit");
        let p2 = gate.try_acquire().expect("second permit");
        assert!(gate.try_acquire().is_none());
        assert_eq!(gate.in_use(), 2);
        drop(p1);
        assert_eq!(gate.in_use(), 1);
        assert!(gate.try_acquire().is_some());
        drop(p2);
    }

    #[test]
    fn acquire_blocks_until_released() {
        let gate = Arc::new(Gate::new(1));
        let held = gate.acquire();
        let gate2 = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            let _p = gate2.acquire();
        });
        thread::sleep(Duration::from_millis(50));
        assert_eq!(gate.in_use(), 1);
        drop(held);
        handle.join().unwrap();
        assert_eq!(gate.in_use(), 0);
    }
}
