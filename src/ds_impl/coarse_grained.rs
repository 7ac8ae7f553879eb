//! Sorted linked-list set serialized by a single global lock.

use super::concurrent_set::{acquire, Comparator, ConcurrentSet, SetError};

use log::warn;
use std::cmp::Ordering::{Equal, Less};
use std::sync::Mutex;

type Link<K> = Option<Box<Node<K>>>;

struct Node<K> {
    key: K,
    next: Link<K>,
}

/// The head sentinel. It carries no key; its link is the front of the chain.
struct Chain<K> {
    head: Link<K>,
}

impl<K> Chain<K> {
    /// Returns the link holding the first node whose key is not smaller than `key`.
    #[inline]
    fn find<'a>(&'a mut self, key: &K, cmp: Comparator<K>) -> &'a mut Link<K> {
        let mut link = &mut self.head;
        while link.as_ref().map_or(false, |n| cmp(&n.key, key) == Less) {
            // Non-empty: checked by the loop condition.
            link = &mut link.as_mut().unwrap().next;
        }
        link
    }
}

pub struct CoarseGrainedSet<K> {
    cmp: Comparator<K>,
    chain: Mutex<Chain<K>>,
}

impl<K> CoarseGrainedSet<K> {
    pub fn new(cmp: Comparator<K>) -> Self {
        Self {
            cmp,
            chain: Mutex::new(Chain { head: None }),
        }
    }
}

impl<K> ConcurrentSet<K> for CoarseGrainedSet<K> {
    fn new(cmp: Comparator<K>) -> Self {
        CoarseGrainedSet::new(cmp)
    }

    fn add(&self, key: K) -> Result<bool, SetError> {
        let mut chain = acquire(&self.chain, "set")?;
        let link = chain.find(&key, self.cmp);
        if let Some(node) = link.as_ref() {
            if (self.cmp)(&node.key, &key) == Equal {
                return Ok(false);
            }
        }
        let next = link.take();
        *link = Some(Box::new(Node { key, next }));
        Ok(true)
    }

    fn remove(&self, key: &K) -> Result<bool, SetError> {
        let mut chain = acquire(&self.chain, "set")?;
        let link = chain.find(key, self.cmp);
        match link {
            Some(node) if (self.cmp)(&node.key, key) == Equal => {
                // Nobody else can reach the node while we hold the lock, so it is freed here.
                let next = node.next.take();
                *link = next;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn contains(&self, key: &K) -> Result<bool, SetError> {
        let chain = acquire(&self.chain, "set")?;
        let mut curr = chain.head.as_deref();
        while let Some(node) = curr {
            match (self.cmp)(&node.key, key) {
                Less => curr = node.next.as_deref(),
                Equal => return Ok(true),
                _ => break,
            }
        }
        Ok(false)
    }

    fn len(&self) -> Result<usize, SetError> {
        let chain = acquire(&self.chain, "set")?;
        let mut len = 0;
        let mut curr = chain.head.as_deref();
        while let Some(node) = curr {
            len += 1;
            curr = node.next.as_deref();
        }
        Ok(len)
    }
}

impl<K> Drop for CoarseGrainedSet<K> {
    fn drop(&mut self) {
        let chain = match self.chain.get_mut() {
            Ok(chain) => chain,
            Err(poisoned) => {
                warn!("set lock poisoned during teardown, freeing nodes anyway");
                poisoned.into_inner()
            }
        };
        // Unlink one node at a time so long chains do not recurse in `Box`'s drop.
        let mut curr = chain.head.take();
        while let Some(mut node) = curr {
            curr = node.next.take();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::CoarseGrainedSet;
    use crate::ds_impl::concurrent_set::{self, ConcurrentSet};
    use std::panic::{catch_unwind, AssertUnwindSafe};

    #[test]
    fn smoke_coarse_grained() {
        concurrent_set::tests::smoke::<CoarseGrainedSet<i32>>();
    }

    #[test]
    fn litmus_coarse_grained() {
        concurrent_set::tests::litmus::<CoarseGrainedSet<i32>>();
    }

    #[test]
    fn reversed_comparator_coarse_grained() {
        concurrent_set::tests::reversed_comparator::<CoarseGrainedSet<i32>>();
    }

    #[test]
    fn long_chain_drop() {
        let set = CoarseGrainedSet::new(concurrent_set::tests::cmp_i32);
        for k in (0..200_000).rev() {
            assert!(set.add(k).unwrap());
        }
        assert_eq!(set.len().unwrap(), 200_000);
        drop(set);
    }

    #[test]
    fn find_stops_at_first_not_smaller() {
        let set = CoarseGrainedSet::new(concurrent_set::tests::cmp_i32);
        for k in [10, 20, 30] {
            assert!(set.add(k).unwrap());
        }
        let mut chain = set.chain.lock().unwrap();
        assert_eq!(chain.find(&5, set.cmp).as_ref().map(|n| n.key), Some(10));
        assert_eq!(chain.find(&20, set.cmp).as_ref().map(|n| n.key), Some(20));
        assert_eq!(chain.find(&25, set.cmp).as_ref().map(|n| n.key), Some(30));
        assert!(chain.find(&31, set.cmp).is_none());
    }

    #[test]
    fn poisoned_lock_is_reported() {
        fn panicking_cmp(a: &i32, b: &i32) -> std::cmp::Ordering {
            if *a == 13 || *b == 13 {
                panic!("comparator failure");
            }
            a.cmp(b)
        }

        let set = CoarseGrainedSet::new(panicking_cmp);
        assert!(set.add(1).unwrap());
        assert!(set.add(20).unwrap());
        assert!(catch_unwind(AssertUnwindSafe(|| set.add(13))).is_err());
        assert!(set.contains(&1).is_err());
        assert!(set.add(2).is_err());
        assert!(set.remove(&1).is_err());
    }
}
