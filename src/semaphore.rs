//! One-shot binary semaphores for the synchronous entry point.

use crate::utils::*;

/// One-shot wait/release pair.
///
/// A single paired use is all the library requires: `release` may be
/// called from any thread, `wait` returns once `release` has been called
/// at least once, and everything written before `release` is visible
/// after `wait` returns.
pub trait Semaphore {
    fn wait(&self);
    fn release(&self);
}

/// Busy-waiting flavor.
///
/// Lowest wake-up latency, burns a core while waiting. Only worth it when
/// the wait is known to be short.
#[derive(Debug)]
pub struct SpinSemaphore {
    engaged: AtomicBool,
}

impl SpinSemaphore {
    pub fn new() -> Self {
        Self {
            engaged: AtomicBool::new(true),
        }
    }
}

impl Default for SpinSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore for SpinSemaphore {
    fn wait(&self) {
        while self.engaged.load(atomic::Relaxed) {
            spin_hint();
        }
        acquire!(self.engaged);
    }

    #[inline]
    fn release(&self) {
        self.engaged.store(false, atomic::Release);
    }
}

/// Blocking flavor: mutex plus condition variable.
#[derive(Debug)]
pub struct SyncSemaphore {
    released: Mutex<bool>,
    cond: Condvar,
}

impl SyncSemaphore {
    pub fn new() -> Self {
        Self {
            released: Mutex::new(false),
            cond: Condvar::new(),
        }
    }
}

impl Default for SyncSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

impl Semaphore for SyncSemaphore {
    fn wait(&self) {
        let mut released = self.released.lock().expect("semaphore poisoned");
        while !*released {
            released = self.cond.wait(released).expect("semaphore poisoned");
        }
    }

    fn release(&self) {
        *self.released.lock().expect("semaphore poisoned") = true;
        self.cond.notify_one();
    }
}

#[cfg(not(loom))]
pub(crate) type DefaultSemaphore = ParkSemaphore;
#[cfg(loom)]
pub(crate) type DefaultSemaphore = SyncSemaphore;

/// Parking flavor: blocks the constructing thread until released.
///
/// The cheapest disposable semaphore for the common "wait right here"
/// case. `wait` must be called on the thread that constructed the value;
/// `release` may be called from anywhere.
#[cfg(not(loom))]
#[derive(Debug)]
pub struct ParkSemaphore {
    engaged: AtomicBool,
    waiter: std::thread::Thread,
}

#[cfg(not(loom))]
impl ParkSemaphore {
    pub fn new() -> Self {
        Self {
            engaged: AtomicBool::new(true),
            waiter: std::thread::current(),
        }
    }
}

#[cfg(not(loom))]
impl Default for ParkSemaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(loom))]
impl Semaphore for ParkSemaphore {
    fn wait(&self) {
        debug_assert_eq!(
            std::thread::current().id(),
            self.waiter.id(),
            "ParkSemaphore::wait called off the constructing thread",
        );
        // Parking tokens can be spent by unrelated unparks; loop on the
        // flag, not on the park itself.
        while self.engaged.load(atomic::Acquire) {
            std::thread::park();
        }
    }

    fn release(&self) {
        self.engaged.store(false, atomic::Release);
        self.waiter.unpark();
    }
}
