//! A non-yielding, cross-thread spin lock (spec §4.2).
//!
//! This is deliberately *not* built on `r3_kernel`'s `klock::CpuLockCell`:
//! that type wraps a single global `tokenlock` token that models one CPU's
//! "interrupts disabled" state, which is sound for `r3_kernel`'s
//! uniprocessor embedded kernel but cannot express several independently
//! contended locks (a serial instance's own lock, a cluster's ready-queue
//! lock, ...) held by genuinely concurrent OS threads. This is a real
//! atomics-based test-and-set lock instead.
//!
//! The interrupt-deferral counter the spin lock is supposed to double as
//! (`disableIntSpinCnt` in spec §4.1/§4.2) is a separate, coarser-grained
//! mechanism layered on top by `ust_kernel::interrupt` rather than built
//! into this type directly: this crate has no dependency on the kernel
//! crate, and a per-acquisition counter that needs to be inspected from a
//! thread other than the one holding the lock (the cluster's own
//! preemption-tick bookkeeping, which does not run on whichever thread
//! happens to be spinning) cannot be a plain thread-local without either
//! losing cross-thread visibility or introducing a process-global counter
//! that every `SpinLock` in every crate's test suite would then contend on
//! — see `ust_kernel::interrupt`'s module doc for the tradeoff this
//! implementation makes instead. This crate only provides the bare
//! mutual-exclusion primitive.

use std::cell::UnsafeCell;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};

const BACKOFF_MIN: u32 = 16;
const BACKOFF_MAX: u32 = 4096;

/// A spin lock protecting a `T`.
///
/// Never parks the OS thread: if you might need to sleep while waiting,
/// build a `Lock`/`MutexLock` on top of this instead of holding a
/// `SpinLockGuard` across a suspension (spec §5: "no spin lock is ever
/// held across a yield").
pub struct SpinLock<T: ?Sized> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is only ever granted through a `SpinLockGuard`,
// which is only constructed after winning the `locked` compare-exchange.
unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    /// Acquire the lock, spinning with exponential backoff bounded
    /// `[16, 4096]` between test-and-set attempts, as spec §4.2 requires.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let mut backoff = BACKOFF_MIN;
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            for _ in 0..backoff {
                std::hint::spin_loop();
            }
            backoff = (backoff * 2).min(BACKOFF_MAX);
        }
        SpinLockGuard { lock: self }
    }

    /// Attempt to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

impl<T: ?Sized + Default> Default for SpinLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.try_lock() {
            Some(guard) => f.debug_struct("SpinLock").field("value", &*guard).finish(),
            None => f.write_str("SpinLock { <locked> }"),
        }
    }
}

pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<'a, T: ?Sized> Deref for SpinLockGuard<'a, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard means we won the compare-exchange.
        unsafe { &*self.lock.value.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for SpinLockGuard<'a, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: see above.
        unsafe { &mut *self.lock.value.get() }
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    fn drop(&mut self) {
        self.lock.locked.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn excludes_concurrent_increments() {
        let lock = Arc::new(SpinLock::new(0usize));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 80_000);
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = SpinLock::new(());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        drop(guard);
        assert!(lock.try_lock().is_some());
    }
}
