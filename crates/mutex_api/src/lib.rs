//! Mutual exclusion seam shared by the kernel's memory subsystems.
//!
//! Code that needs a lock is written against the [`Mutex`] trait so the
//! kernel can plug in its interrupt-aware spin lock while host tests use
//! [`std::sync::Mutex`].
#![cfg_attr(all(not(test), any(not(feature = "std"), target_os = "none")), no_std)]

use core::ops::DerefMut;

pub use self::spin_lock::{SpinLock, SpinLockGuard};

mod spin_lock;

/// A mutex.
pub trait Mutex {
    /// The type of the data that the mutex protects.
    type Data;

    /// The type of the guard that the `lock` method returns.
    type Guard<'a>: DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex.
    fn new(data: Self::Data) -> Self;

    /// Locks the mutex.
    ///
    /// Acquisition never fails; it waits until the lock is free.
    fn lock(&self) -> Self::Guard<'_>;
}

#[cfg(all(feature = "std", not(target_os = "none")))]
impl<T> Mutex for std::sync::Mutex<T> {
    type Data = T;
    type Guard<'a>
        = std::sync::MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: Self::Data) -> Self {
        Self::new(data)
    }

    fn lock(&self) -> Self::Guard<'_> {
        // A poisoned lock means some holder panicked mid-update, which is
        // already a fatal condition for the data it guards.
        self.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
