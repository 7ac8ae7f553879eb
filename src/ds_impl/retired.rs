//! Deferred reclamation of unlinked nodes.
//!
//! A node unlinked from a live chain may still be visited by a traversal that started before the
//! unlink, and that traversal may still try to lock it during validation. Retired nodes are
//! therefore kept allocated, together with their locks, until the owner is torn down (or is
//! otherwise known to be quiescent). Memory grows with the number of removals in exchange.

use log::{debug, warn};
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// A node that can be threaded onto a `RetiredList`.
pub trait Retire: Sized {
    /// The link reserved for the retirement list. Never touched while the node is live.
    fn retired_next(&self) -> &AtomicPtr<Self>;
}

pub struct RetiredList<T: Retire> {
    /// Sentinel of the retired chain, guarded by its own lock.
    head: Mutex<*mut T>,
    len: AtomicUsize,
}

unsafe impl<T: Retire + Send> Send for RetiredList<T> {}
unsafe impl<T: Retire + Send> Sync for RetiredList<T> {}

impl<T: Retire> Default for RetiredList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Retire> RetiredList<T> {
    pub fn new() -> Self {
        Self {
            head: Mutex::new(ptr::null_mut()),
            len: AtomicUsize::new(0),
        }
    }

    /// Takes ownership of an unlinked node.
    ///
    /// # Safety
    ///
    /// `node` must come from `Box::into_raw`, must no longer be reachable from any live chain, and
    /// must not be retired twice.
    pub unsafe fn push(&self, node: *mut T) {
        // The critical section below cannot panic, so a poisoned head still holds a whole chain.
        let mut head = self.head.lock().unwrap_or_else(PoisonError::into_inner);
        (*node).retired_next().store(*head, Ordering::Relaxed);
        *head = node;
        self.len.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of nodes currently retained.
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frees every retained node and returns how many were freed.
    ///
    /// Exclusive access guarantees that no traversal can still be holding one of them.
    pub fn reclaim(&mut self) -> usize {
        let head = match self.head.get_mut() {
            Ok(head) => head,
            Err(poisoned) => {
                warn!("retirement head lock poisoned, reclaiming anyway");
                poisoned.into_inner()
            }
        };
        let mut curr = std::mem::replace(head, ptr::null_mut());
        let mut freed = 0;
        while !curr.is_null() {
            // SAFETY: every retired pointer came from `Box::into_raw` and is owned by this list.
            let node = unsafe { Box::from_raw(curr) };
            curr = node.retired_next().load(Ordering::Relaxed);
            freed += 1;
        }
        *self.len.get_mut() = 0;
        if freed > 0 {
            debug!("reclaimed {} retired nodes", freed);
        }
        freed
    }
}

impl<T: Retire> Drop for RetiredList<T> {
    fn drop(&mut self) {
        self.reclaim();
    }
}
