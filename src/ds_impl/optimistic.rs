//! Sorted linked-list set with optimistic fine-grained locking.
//!
//! Every operation first walks the chain without taking any lock, then locks the predecessor and
//! the current node (always in that order) and validates that the predecessor is still reachable
//! from the head and still points at the current node. A failed validation is not an error: the
//! operation starts over. There is no bound on the number of retries.
//!
//! Unlinked nodes are handed to a [`RetiredList`] instead of being freed, because a concurrent
//! traversal may still hold a pointer to them and lock them.

use super::concurrent_set::{acquire, Comparator, ConcurrentSet, SetError};
use super::retired::{Retire, RetiredList};

use log::{trace, warn};
use std::cmp::Ordering::{Equal, Greater, Less};
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Mutex;

struct Node<K> {
    /// `None` only for the head sentinel, which orders before every key.
    key: Option<K>,
    next: AtomicPtr<Node<K>>,
    retired_next: AtomicPtr<Node<K>>,
    /// Guards `next`. Stays valid after the node is retired.
    lock: Mutex<()>,
}

impl<K> Node<K> {
    fn new(key: K, next: *mut Node<K>) -> Self {
        Self {
            key: Some(key),
            next: AtomicPtr::new(next),
            retired_next: AtomicPtr::default(),
            lock: Mutex::new(()),
        }
    }

    fn head() -> Self {
        Self {
            key: None,
            next: AtomicPtr::default(),
            retired_next: AtomicPtr::default(),
            lock: Mutex::new(()),
        }
    }

    #[inline]
    fn precedes(&self, key: &K, cmp: Comparator<K>) -> bool {
        self.key.as_ref().map_or(true, |k| cmp(k, key) == Less)
    }

    #[inline]
    fn matches(&self, key: &K, cmp: Comparator<K>) -> bool {
        self.key.as_ref().map_or(false, |k| cmp(k, key) == Equal)
    }
}

impl<K> Retire for Node<K> {
    fn retired_next(&self) -> &AtomicPtr<Self> {
        &self.retired_next
    }
}

#[inline]
fn as_ptr<K>(node: Option<&Node<K>>) -> *mut Node<K> {
    node.map_or(ptr::null_mut(), |n| n as *const Node<K> as *mut Node<K>)
}

pub struct OptimisticSet<K> {
    cmp: Comparator<K>,
    head: *mut Node<K>,
    retired: RetiredList<Node<K>>,
}

unsafe impl<K: Send + Sync> Send for OptimisticSet<K> {}
unsafe impl<K: Send + Sync> Sync for OptimisticSet<K> {}

impl<K> OptimisticSet<K> {
    pub fn new(cmp: Comparator<K>) -> Self {
        Self {
            cmp,
            head: Box::into_raw(Box::new(Node::head())),
            retired: RetiredList::new(),
        }
    }

    /// Number of removed nodes still retained for deferred reclamation.
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// Frees the retained nodes ahead of teardown.
    ///
    /// Exclusive access proves that no operation is in flight, so no traversal can still reach
    /// a retired node.
    pub fn purge_retired(&mut self) -> usize {
        self.retired.reclaim()
    }

    #[inline]
    fn head(&self) -> &Node<K> {
        // SAFETY: the head is allocated in `new` and freed only in `drop`.
        unsafe { &*self.head }
    }

    /// Dereferences a pointer read from a `next` link.
    #[inline]
    fn node_ref(&self, node: *mut Node<K>) -> Option<&Node<K>> {
        // SAFETY: a node that was ever linked is either live or retired, and retired nodes are
        // freed only with exclusive access to the set.
        unsafe { node.as_ref() }
    }

    /// Lock-free walk to the first node whose key is not smaller than `key`.
    #[inline]
    fn find(&self, key: &K) -> (&Node<K>, Option<&Node<K>>) {
        let mut pred = self.head();
        let mut curr = self.node_ref(pred.next.load(Ordering::Acquire));
        while let Some(node) = curr {
            if !node.precedes(key, self.cmp) {
                break;
            }
            pred = node;
            curr = self.node_ref(node.next.load(Ordering::Acquire));
        }
        (pred, curr)
    }

    /// Checks that `pred` is reachable from the head and still links to `curr`.
    ///
    /// Must be called with both `pred` and `curr` locked.
    fn validate(&self, pred: &Node<K>, curr: Option<&Node<K>>) -> bool {
        let mut node = Some(self.head());
        while let Some(n) = node {
            if ptr::eq(n, pred) {
                return pred.next.load(Ordering::Acquire) == as_ptr(curr);
            }
            // Walked past the position `pred` would occupy.
            if let (Some(k), Some(pred_key)) = (&n.key, &pred.key) {
                if (self.cmp)(k, pred_key) == Greater {
                    return false;
                }
            }
            node = self.node_ref(n.next.load(Ordering::Acquire));
        }
        false
    }
}

impl<K> ConcurrentSet<K> for OptimisticSet<K> {
    fn new(cmp: Comparator<K>) -> Self {
        OptimisticSet::new(cmp)
    }

    fn add(&self, key: K) -> Result<bool, SetError> {
        loop {
            let (pred, curr) = self.find(&key);
            let _pred_guard = acquire(&pred.lock, "predecessor node")?;
            let _curr_guard = curr
                .map(|c| acquire(&c.lock, "current node"))
                .transpose()?;
            if !self.validate(pred, curr) {
                trace!("add: validation failed, retrying");
                continue;
            }
            if curr.map_or(false, |c| c.matches(&key, self.cmp)) {
                return Ok(false);
            }
            let node = Box::into_raw(Box::new(Node::new(key, as_ptr(curr))));
            pred.next.store(node, Ordering::Release);
            return Ok(true);
        }
    }

    fn remove(&self, key: &K) -> Result<bool, SetError> {
        loop {
            let (pred, curr) = self.find(key);
            let curr = match curr {
                Some(curr) => curr,
                None => return Ok(false),
            };
            let pred_guard = acquire(&pred.lock, "predecessor node")?;
            let curr_guard = acquire(&curr.lock, "current node")?;
            if !self.validate(pred, Some(curr)) {
                trace!("remove: validation failed, retrying");
                continue;
            }
            if !curr.matches(key, self.cmp) {
                return Ok(false);
            }
            pred.next.store(curr.next.load(Ordering::Acquire), Ordering::Release);
            drop(curr_guard);
            drop(pred_guard);

            // SAFETY: `curr` was allocated by `add`, and we just unlinked it under both locks, so
            // no other remover can retire it again.
            unsafe { self.retired.push(as_ptr(Some(curr))) };
            return Ok(true);
        }
    }

    fn contains(&self, key: &K) -> Result<bool, SetError> {
        loop {
            let (pred, curr) = self.find(key);
            let curr = match curr {
                Some(curr) => curr,
                None => return Ok(false),
            };
            let _pred_guard = acquire(&pred.lock, "predecessor node")?;
            let _curr_guard = acquire(&curr.lock, "current node")?;
            if !self.validate(pred, Some(curr)) {
                trace!("contains: validation failed, retrying");
                continue;
            }
            return Ok(curr.matches(key, self.cmp));
        }
    }

    fn len(&self) -> Result<usize, SetError> {
        let mut len = 0;
        let mut curr = self.node_ref(self.head().next.load(Ordering::Acquire));
        while let Some(node) = curr {
            len += 1;
            curr = self.node_ref(node.next.load(Ordering::Acquire));
        }
        Ok(len)
    }
}

impl<K> Drop for OptimisticSet<K> {
    fn drop(&mut self) {
        let mut poisoned = 0;
        let mut curr = self.head().next.load(Ordering::Relaxed);
        while !curr.is_null() {
            // SAFETY: live nodes are owned by the chain, and nothing else can reach them now.
            let node = unsafe { Box::from_raw(curr) };
            if node.lock.is_poisoned() {
                poisoned += 1;
            }
            curr = node.next.load(Ordering::Relaxed);
        }
        // SAFETY: allocated in `new`, freed only here.
        let head = unsafe { Box::from_raw(self.head) };
        if head.lock.is_poisoned() {
            poisoned += 1;
        }
        if poisoned > 0 {
            warn!("{} node locks were poisoned at teardown", poisoned);
        }
        // Retired nodes are freed when `self.retired` drops.
    }
}
