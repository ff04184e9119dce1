//! Rumor Store - what a gossip node has seen and what it has already spread.
//!
//! The store keeps two sets of broadcast values:
//!
//! - **Seen-set**: every distinct value this node has accepted. Append-only,
//!   kept in insertion order for the read-all response.
//! - **Broadcasted-set**: every value this node has already gossiped onward.
//!   Used as a one-shot gate so a value is fanned out at most once.
//!
//! Both sets live behind a single reader/writer lock. Writers hold it only
//! for the duration of one insert, never across I/O.

use std::collections::HashSet;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A broadcast value. Opaque; only equality matters.
pub type Value = i64;

#[derive(Debug, Default)]
struct Inner {
    /// Seen values in insertion order.
    seen: Vec<Value>,
    /// Membership index over `seen`.
    seen_index: HashSet<Value>,
    /// Values already gossiped onward.
    broadcasted: HashSet<Value>,
}

/// Thread-safe bookkeeping of seen and broadcasted values.
#[derive(Debug, Default)]
pub struct MessageStore {
    inner: RwLock<Inner>,
}

impl MessageStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        // Every write is a single insert, so a poisoned lock still holds consistent sets.
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a value in the seen-set.
    ///
    /// Idempotent: returns `true` if the value was new, `false` if it was
    /// already present (in which case nothing is appended).
    pub fn record_seen(&self, value: Value) -> bool {
        let mut inner = self.write();
        if inner.seen_index.insert(value) {
            inner.seen.push(value);
            true
        } else {
            false
        }
    }

    /// Mark a value as gossiped onward.
    ///
    /// Returns `true` only for the call that actually set the mark. Callers
    /// use this as the atomic gate deciding who performs the fanout.
    pub fn mark_broadcasted(&self, value: Value) -> bool {
        self.write().broadcasted.insert(value)
    }

    /// Check whether a value has already been gossiped onward.
    pub fn is_broadcasted(&self, value: Value) -> bool {
        self.read().broadcasted.contains(&value)
    }

    /// Check whether a value is in the seen-set.
    pub fn contains(&self, value: Value) -> bool {
        self.read().seen_index.contains(&value)
    }

    /// Snapshot of the seen-set in insertion order.
    pub fn all_seen(&self) -> Vec<Value> {
        self.read().seen.clone()
    }

    /// Number of distinct values seen.
    pub fn len(&self) -> usize {
        self.read().seen.len()
    }

    /// Whether no value has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.read().seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn starts_empty() {
        let store = MessageStore::new();
        assert!(store.is_empty());
        assert_eq!(store.len(), 0);
        assert!(store.all_seen().is_empty());
        assert!(!store.is_broadcasted(1));
    }

    #[test]
    fn duplicates_collapse_in_read() {
        let store = MessageStore::new();
        for v in [3, 7, 3, 9] {
            store.record_seen(v);
        }
        assert_eq!(store.all_seen(), vec![3, 7, 9]);
    }

    #[test]
    fn record_seen_reports_novelty() {
        let store = MessageStore::new();
        assert!(store.record_seen(42));
        assert!(!store.record_seen(42));
        assert!(store.contains(42));
    }

    #[test]
    fn broadcasted_gate_is_one_shot() {
        let store = MessageStore::new();
        assert!(store.mark_broadcasted(5));
        assert!(!store.mark_broadcasted(5));
        assert!(store.is_broadcasted(5));
    }

    #[test]
    fn broadcasted_is_independent_of_seen() {
        let store = MessageStore::new();
        store.record_seen(1);
        assert!(!store.is_broadcasted(1));

        store.mark_broadcasted(2);
        assert!(!store.contains(2));
        assert_eq!(store.all_seen(), vec![1]);
    }

    #[test]
    fn concurrent_gate_has_single_winner() {
        let store = Arc::new(MessageStore::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || store.mark_broadcasted(99))
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn concurrent_writers_keep_every_value() {
        let store = Arc::new(MessageStore::new());
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for i in 0..250 {
                        store.record_seen(t * 1000 + i);
                        store.record_seen(i);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // The shared 0..250 range is thread 0's own range.
        assert_eq!(store.len(), 4 * 250);
    }

    proptest! {
        #[test]
        fn seen_set_is_distinct_ingested_values(values in proptest::collection::vec(-50i64..50, 0..200)) {
            let store = MessageStore::new();
            for v in &values {
                store.record_seen(*v);
            }

            let seen = store.all_seen();
            let distinct: HashSet<_> = values.iter().copied().collect();
            prop_assert_eq!(seen.len(), distinct.len());
            prop_assert_eq!(seen.iter().copied().collect::<HashSet<_>>(), distinct);
        }

        #[test]
        fn seen_set_keeps_first_insertion_order(values in proptest::collection::vec(0i64..20, 0..100)) {
            let store = MessageStore::new();
            let mut expected = Vec::new();
            for v in &values {
                store.record_seen(*v);
                if !expected.contains(v) {
                    expected.push(*v);
                }
            }
            prop_assert_eq!(store.all_seen(), expected);
        }
    }
}
