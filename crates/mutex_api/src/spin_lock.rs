use core::{
    cell::UnsafeCell,
    fmt, hint,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, Ordering},
};

use crate::Mutex;

/// A test-and-set spin lock.
///
/// Critical sections guarded by this lock must be short and must never
/// sleep. Interrupt masking is left to the caller.
#[derive(Default)]
pub struct SpinLock<T> {
    locked: AtomicBool,
    value: UnsafeCell<T>,
}

unsafe impl<T> Sync for SpinLock<T> where T: Send {}

impl<T> fmt::Debug for SpinLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinLock")
            .field("locked", &self.is_locked())
            .finish_non_exhaustive()
    }
}

impl<T> SpinLock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            locked: AtomicBool::new(false),
            value: UnsafeCell::new(value),
        }
    }

    /// Acquires the lock.
    ///
    /// Loops (spins) until the lock is acquired.
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        // `Ordering::Acquire` keeps the critical section's loads and stores
        // from being hoisted above the acquisition.
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                hint::spin_loop();
            }
        }
        SpinLockGuard { lock: self }
    }

    /// Tries to acquire the lock without spinning.
    pub fn try_lock(&self) -> Option<SpinLockGuard<'_, T>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SpinLockGuard { lock: self })
    }

    /// Returns `true` if some context currently holds the lock.
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn release(&self) {
        // `Ordering::Release` publishes every store made in the critical
        // section before the lock is observed free.
        self.locked.store(false, Ordering::Release);
    }
}

impl<T> Mutex for SpinLock<T> {
    type Data = T;
    type Guard<'a>
        = SpinLockGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.lock()
    }
}

pub struct SpinLockGuard<'a, T> {
    lock: &'a SpinLock<T>,
}

unsafe impl<T> Sync for SpinLockGuard<'_, T> where T: Sync {}

impl<T> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release();
    }
}

impl<T> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.value.get() }
    }
}

impl<T> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.value.get() }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{Arc, Barrier},
        thread,
    };

    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let lock = SpinLock::new(1);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert!(lock.is_locked());
            assert!(lock.try_lock().is_none());
        }
        assert!(!lock.is_locked());
        assert_eq!(*lock.try_lock().unwrap(), 2);
    }

    #[test]
    fn trait_lock_goes_through_spin_lock() {
        fn bump<M>(m: &M)
        where
            M: Mutex<Data = u32>,
        {
            *m.lock() += 1;
        }

        let lock = <SpinLock<u32> as Mutex>::new(0);
        bump(&lock);
        bump(&lock);
        assert_eq!(lock.into_inner(), 2);
    }

    #[test]
    fn concurrent_increments_are_serialized() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 10_000;

        let lock = Arc::new(SpinLock::new(0_usize));
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles = (0..THREADS)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.lock(), THREADS * ROUNDS);
    }
}
