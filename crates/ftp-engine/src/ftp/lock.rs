//! FIFO serializer for control-channel transactions.
//!
//! One holder at a time; waiters are resumed strictly in the order they
//! called [`Serializer::acquire`] (tokio's mutex queues waiters FIFO).
//! The guard is owned, so a streaming transfer can hand it to the caller
//! and the lock is released exactly when that guard is dropped.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Exclusive, FIFO-fair lock around the session state `T`.
pub struct Serializer<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> Clone for Serializer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Proof of holding the serializer. Dropping it releases the lock and
/// wakes the next waiter.
pub struct SerializerGuard<T> {
    guard: OwnedMutexGuard<T>,
}

impl<T> Serializer<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(value)),
        }
    }

    /// Suspend until every earlier caller has released, then take the lock.
    pub async fn acquire(&self) -> SerializerGuard<T> {
        SerializerGuard {
            guard: Arc::clone(&self.inner).lock_owned().await,
        }
    }

    /// Take the lock only if nobody holds it and nobody is queued.
    pub fn try_acquire(&self) -> Option<SerializerGuard<T>> {
        Arc::clone(&self.inner)
            .try_lock_owned()
            .ok()
            .map(|guard| SerializerGuard { guard })
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

impl<T> Deref for SerializerGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for SerializerGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
