//! A simple mutex API.
#![cfg_attr(not(feature = "std"), no_std)]

use core::ops::DerefMut;

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
    fn lock(&self) -> Self::Guard<'_>;
}

#[cfg(feature = "std")]
mod std_impl {
    use std::sync::{self, MutexGuard};

    use super::Mutex;

    /// A [`Mutex`] backed by [`std::sync::Mutex`], poisoning on a panicked holder.
    pub struct StdMutex<T>(sync::Mutex<T>);

    impl<T> Mutex for StdMutex<T> {
        type Data = T;
        type Guard<'a>
            = MutexGuard<'a, T>
        where
            Self: 'a;

        fn new(data: T) -> Self {
            Self(sync::Mutex::new(data))
        }

        fn lock(&self) -> Self::Guard<'_> {
            self.0.lock().unwrap_or_else(sync::PoisonError::into_inner)
        }
    }
}

#[cfg(feature = "std")]
pub use std_impl::StdMutex;
