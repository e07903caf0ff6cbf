//! A generic mutex abstraction.
//!
//! The pipeline crates (`walb_index`, `walb_core`) are generic over the
//! lock implementation so that they can be driven in unit tests without
//! pulling in a real disk or a real thread pool, and so that a future
//! no_std/kernel-module build can supply its own lock without touching
//! the pipeline logic. [`StdMutex`] is the only implementation shipped
//! here; it wraps [`std::sync::Mutex`] and panics on a poisoned lock,
//! since the pipeline treats a panicking worker as a crashed device
//! anyway (see `walb_core::device` read-only transition).

use std::sync::{Mutex, MutexGuard};

/// A mutex over some protected data.
pub trait WalbMutex {
    /// The protected data.
    type Data;

    /// The guard returned by [`WalbMutex::lock`].
    type Guard<'a>: std::ops::DerefMut<Target = Self::Data>
    where
        Self: 'a;

    /// Creates a new mutex wrapping `data`.
    fn new(data: Self::Data) -> Self;

    /// Locks the mutex, blocking the current thread until it is acquired.
    fn lock(&self) -> Self::Guard<'_>;
}

/// [`WalbMutex`] backed by [`std::sync::Mutex`].
pub struct StdMutex<T>(Mutex<T>);

impl<T> WalbMutex for StdMutex<T> {
    type Data = T;
    type Guard<'a>
        = MutexGuard<'a, T>
    where
        T: 'a;

    fn new(data: T) -> Self {
        Self(Mutex::new(data))
    }

    fn lock(&self) -> Self::Guard<'_> {
        self.0.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
