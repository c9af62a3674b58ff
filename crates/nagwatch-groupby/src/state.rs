//! Concurrent accumulation buffer for grouped alerts.
//!
//! `add` takes the shared side of an `RwLock` so producers never serialize
//! against each other; per-key queues live in a `DashMap`, which makes
//! concurrent appends to the same key safe. `flush` takes the exclusive side
//! and swaps the whole map out, so every value lands either in the returned
//! snapshot or in the fresh map, never both and never neither.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use parking_lot::RwLock;

pub struct GroupByState<K, V>
where
    K: Eq + Hash,
{
    map: RwLock<DashMap<K, Vec<V>>>,
    size: AtomicUsize,
}

impl<K, V> GroupByState<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            map: RwLock::new(DashMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Append `value` to the queue for `key`. Returns the approximate number
    /// of buffered values after the append.
    pub fn add(&self, key: K, value: V) -> usize {
        let map = self.map.read();
        map.entry(key).or_insert_with(Vec::new).push(value);
        self.size.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Take everything buffered so far and leave the buffer empty.
    pub fn flush(&self) -> HashMap<K, Vec<V>> {
        let mut map = self.map.write();
        let taken = std::mem::take(&mut *map);
        self.size.store(0, Ordering::Release);
        drop(map);
        taken.into_iter().collect()
    }

    /// Approximate number of buffered values.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for GroupByState<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn add_reports_running_size() {
        let state = GroupByState::new();
        assert_eq!(state.add("a", 1), 1);
        assert_eq!(state.add("a", 2), 2);
        assert_eq!(state.add("b", 3), 3);
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn flush_returns_fifo_per_key_and_resets() {
        let state = GroupByState::new();
        state.add("a", 1);
        state.add("b", 10);
        state.add("a", 2);
        state.add("a", 3);

        let snapshot = state.flush();
        assert_eq!(snapshot.get("a"), Some(&vec![1, 2, 3]));
        assert_eq!(snapshot.get("b"), Some(&vec![10]));
        assert!(state.is_empty());
        assert!(state.flush().is_empty());
    }

    #[test]
    fn adds_after_flush_go_to_next_snapshot() {
        let state = GroupByState::new();
        state.add("a", 1);
        let first = state.flush();
        state.add("a", 2);
        let second = state.flush();
        assert_eq!(first.get("a"), Some(&vec![1]));
        assert_eq!(second.get("a"), Some(&vec![2]));
    }

    #[test]
    fn concurrent_adds_and_flush_lose_nothing() {
        const PRODUCERS: usize = 8;
        const PER_PRODUCER: usize = 2_000;

        let state = Arc::new(GroupByState::new());
        let producers: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        state.add(i % 5, p * PER_PRODUCER + i);
                    }
                })
            })
            .collect();

        let flusher = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                let mut snapshots = Vec::new();
                for _ in 0..50 {
                    snapshots.push(state.flush());
                    thread::yield_now();
                }
                snapshots
            })
        };

        for producer in producers {
            producer.join().expect("producer");
        }
        let mut snapshots = flusher.join().expect("flusher");
        snapshots.push(state.flush());

        let mut seen = HashSet::new();
        for snapshot in snapshots {
            for (_, values) in snapshot {
                for v in values {
                    assert!(seen.insert(v), "value {v} flushed twice");
                }
            }
        }
        assert_eq!(seen.len(), PRODUCERS * PER_PRODUCER);
        assert!(state.is_empty());
    }

    #[test]
    fn per_producer_order_is_kept_within_a_key() {
        let state = Arc::new(GroupByState::new());
        let handles: Vec<_> = (0..4)
            .map(|p| {
                let state = Arc::clone(&state);
                thread::spawn(move || {
                    for i in 0..500 {
                        state.add("k", (p, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("producer");
        }

        let snapshot = state.flush();
        let values = snapshot.get("k").expect("key present");
        for p in 0..4 {
            let order: Vec<i32> = values.iter().filter(|(q, _)| *q == p).map(|(_, i)| *i).collect();
            assert_eq!(order, (0..500).collect::<Vec<_>>());
        }
    }
}
