use std::cmp::Ordering;
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;

/// Three-way comparator fixed at construction time. It is the only ordering authority of a set.
pub type Comparator<K> = fn(&K, &K) -> Ordering;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SetError {
    /// A lock holder panicked, so the state behind the lock can no longer be trusted.
    #[error("failed to lock {what}: lock poisoned")]
    LockPoisoned { what: &'static str },
}

/// Acquires `lock`, turning poisoning into a `SetError`.
#[inline]
pub(crate) fn acquire<'a, T>(
    lock: &'a Mutex<T>,
    what: &'static str,
) -> Result<MutexGuard<'a, T>, SetError> {
    lock.lock().map_err(|_| SetError::LockPoisoned { what })
}

pub trait ConcurrentSet<K> {
    fn new(cmp: Comparator<K>) -> Self;

    /// Inserts `key`. Returns `false` if an equal key is already present.
    fn add(&self, key: K) -> Result<bool, SetError>;

    /// Removes `key`. Returns `false` if no equal key is present.
    fn remove(&self, key: &K) -> Result<bool, SetError>;

    fn contains(&self, key: &K) -> Result<bool, SetError>;

    /// Number of live nodes after the head sentinel. Exact only when no operation is in flight.
    fn len(&self) -> Result<usize, SetError>;

    fn is_empty(&self) -> Result<bool, SetError> {
        self.len().map(|len| len == 0)
    }
}
