//! Per-session mutual exclusion.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

/// Held for the duration of one slice write on one session.
pub type SessionGuard = tokio::sync::OwnedMutexGuard<()>;

/// Boxed future returned by [`LockRegistry::acquire`].
pub type LockFuture<'a> = Pin<Box<dyn Future<Output = SessionGuard> + Send + 'a>>;

/// Maps session ids to locks.
///
/// Two writers on the same session are serialized; writers on different
/// sessions never block each other. Locks are created on first use and
/// dropped from the registry once the session completes.
pub trait LockRegistry: Send + Sync {
    /// Waits for exclusive access to `file_id`.
    fn acquire<'a>(&'a self, file_id: &'a str) -> LockFuture<'a>;

    /// Forgets the lock for a finished session.
    fn release(&self, file_id: &str);
}

/// Process-local registry.
#[derive(Debug, Default)]
pub struct InMemoryLockRegistry {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl InMemoryLockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of sessions that currently have a lock entry.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, file_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .entry(file_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }
}

impl LockRegistry for InMemoryLockRegistry {
    fn acquire<'a>(&'a self, file_id: &'a str) -> LockFuture<'a> {
        Box::pin(async move { self.entry(file_id).lock_owned().await })
    }

    fn release(&self, file_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(file_id);
    }
}
