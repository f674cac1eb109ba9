//! Mutex-guarded integral counter
//!
//! Every read or mutation is exactly one lock and one unlock of the
//! internal [`Mutex`], so tasks racing on it exercise the kernel's blocking
//! paths. The mutex is recursive: a task holding
//! [`internal_mutex`](SynchronizedIntegral::internal_mutex) may still use
//! the counter.

use core::cell::UnsafeCell;
use core::ops::{Add, Sub};

use crate::error::OsResult;

use super::Mutex;

/// Integral value shared between tasks under a mutex
pub struct SynchronizedIntegral<T> {
    mutex: Mutex,
    value: UnsafeCell<T>,
}

// SAFETY: the value is only reached while holding `mutex`
unsafe impl<T: Send> Send for SynchronizedIntegral<T> {}
unsafe impl<T: Send> Sync for SynchronizedIntegral<T> {}

impl<T> SynchronizedIntegral<T>
where
    T: Copy + Add<Output = T> + Sub<Output = T> + From<bool>,
{
    pub fn new(value: T) -> Self {
        SynchronizedIntegral {
            mutex: Mutex::new(),
            value: UnsafeCell::new(value),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> OsResult<R> {
        let _guard = self.mutex.lock_guard()?;
        // SAFETY: exclusive while the guard lives
        Ok(f(unsafe { &mut *self.value.get() }))
    }

    pub fn load(&self) -> OsResult<T> {
        self.with(|v| *v)
    }

    pub fn store(&self, value: T) -> OsResult<()> {
        self.with(|v| *v = value)
    }

    /// Add `delta`, returning the previous value
    pub fn fetch_add(&self, delta: T) -> OsResult<T> {
        self.with(|v| {
            let prior = *v;
            *v = prior + delta;
            prior
        })
    }

    /// Subtract `delta`, returning the previous value
    pub fn fetch_sub(&self, delta: T) -> OsResult<T> {
        self.with(|v| {
            let prior = *v;
            *v = prior - delta;
            prior
        })
    }

    /// Add one, returning the new value
    pub fn increment(&self) -> OsResult<T> {
        self.with(|v| {
            *v = *v + T::from(true);
            *v
        })
    }

    /// Subtract one, returning the new value
    pub fn decrement(&self) -> OsResult<T> {
        self.with(|v| {
            *v = *v - T::from(true);
            *v
        })
    }

    /// The lock guarding the value
    pub fn internal_mutex(&self) -> &Mutex {
        &self.mutex
    }
}

impl<T> Default for SynchronizedIntegral<T>
where
    T: Copy + Add<Output = T> + Sub<Output = T> + From<bool> + Default,
{
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_under_recursive_lock() {
        let counter = SynchronizedIntegral::new(10i32);
        assert_eq!(counter.increment(), Ok(11));
        assert_eq!(counter.fetch_add(4), Ok(11));
        assert_eq!(counter.fetch_sub(5), Ok(15));
        assert_eq!(counter.decrement(), Ok(9));

        counter.internal_mutex().lock().unwrap();
        counter.store(-3).unwrap();
        assert_eq!(counter.load(), Ok(-3));
        counter.internal_mutex().unlock().unwrap();
        assert!(!counter.internal_mutex().is_owned());
    }
}
