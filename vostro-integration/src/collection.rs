use chrono::{DateTime, Utc};
use std::collections::VecDeque;

/// Capacity-bounded collection of values keyed by timestamp, kept in key
/// order. When full, a push evicts the oldest entry.
///
/// Used for transaction rate history, balance-movement journals and the
/// order/operation record rings.
#[derive(Debug, Clone)]
pub struct SortedRingBuffer<V> {
    capacity: usize,
    entries: VecDeque<(DateTime<Utc>, V)>,
}

impl<V> SortedRingBuffer<V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "SortedRingBuffer capacity must be non-zero");
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert a keyed value, evicting the oldest entry when full.
    ///
    /// Keys are expected to be near-monotonic (wall-clock timestamps); an
    /// out-of-order key is inserted at its sorted position.
    pub fn push(&mut self, key: DateTime<Utc>, value: V) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }

        match self.entries.back() {
            Some((newest, _)) if *newest > key => {
                let index = self.entries.partition_point(|(k, _)| *k <= key);
                self.entries.insert(index, (key, value));
            }
            _ => self.entries.push_back((key, value)),
        }
    }

    pub fn oldest(&self) -> Option<(DateTime<Utc>, &V)> {
        self.entries.front().map(|(k, v)| (*k, v))
    }

    pub fn newest(&self) -> Option<(DateTime<Utc>, &V)> {
        self.entries.back().map(|(k, v)| (*k, v))
    }

    /// The n-th entry counting back from the newest (`head(0)` is the newest).
    pub fn head(&self, n_back: usize) -> Option<(DateTime<Utc>, &V)> {
        let len = self.entries.len();
        if n_back >= len {
            return None;
        }
        self.entries.get(len - 1 - n_back).map(|(k, v)| (*k, v))
    }

    /// Read every entry with key within `[old, new]`, oldest first.
    ///
    /// Returns true iff the requested interval is fully covered, ie/ `old`
    /// is not older than the oldest retained entry.
    pub fn read_interval_by_key<F>(
        &self,
        new: DateTime<Utc>,
        old: DateTime<Utc>,
        mut callback: F,
    ) -> bool
    where
        F: FnMut(DateTime<Utc>, &V),
    {
        let Some((oldest, _)) = self.oldest() else {
            return false;
        };

        for (key, value) in &self.entries {
            if *key < old {
                continue;
            }
            if *key > new {
                break;
            }
            callback(*key, value);
        }

        old >= oldest
    }

    /// Mutable walk over entries with key `>= from`, oldest first. Stops
    /// when the callback returns false.
    pub fn for_each_mut_from<F>(&mut self, from: DateTime<Utc>, mut callback: F)
    where
        F: FnMut(DateTime<Utc>, &mut V) -> bool,
    {
        for (key, value) in self.entries.iter_mut() {
            if *key < from {
                continue;
            }
            if !callback(*key, value) {
                break;
            }
        }
    }

    /// Read the latest `limit` entries, oldest of them first.
    pub fn read_latest<F>(&self, limit: usize, mut callback: F)
    where
        F: FnMut(DateTime<Utc>, &V),
    {
        let skip = self.entries.len().saturating_sub(limit);
        for (key, value) in self.entries.iter().skip(skip) {
            callback(*key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (DateTime<Utc>, &V)> {
        self.entries.iter().map(|(k, v)| (*k, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn ts(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::MIN_UTC + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn test_push_evicts_oldest_when_full() {
        let mut buffer = SortedRingBuffer::new(3);
        for index in 0..5 {
            buffer.push(ts(index), index);
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.oldest().map(|(k, v)| (k, *v)), Some((ts(2), 2)));
        assert_eq!(buffer.newest().map(|(k, v)| (k, *v)), Some((ts(4), 4)));
    }

    #[test]
    fn test_out_of_order_push_keeps_key_order() {
        let mut buffer = SortedRingBuffer::new(4);
        buffer.push(ts(10), 10);
        buffer.push(ts(30), 30);
        buffer.push(ts(20), 20);

        let keys: Vec<_> = buffer.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![ts(10), ts(20), ts(30)]);
    }

    #[test]
    fn test_head_counts_back_from_newest() {
        let mut buffer = SortedRingBuffer::new(4);
        buffer.push(ts(1), 1);
        buffer.push(ts(2), 2);
        buffer.push(ts(3), 3);

        assert_eq!(buffer.head(0).map(|(_, v)| *v), Some(3));
        assert_eq!(buffer.head(2).map(|(_, v)| *v), Some(1));
        assert_eq!(buffer.head(3).map(|(_, v)| *v), None);
    }

    #[test]
    fn test_read_interval_by_key() {
        struct TestCase {
            name: &'static str,
            new: DateTime<Utc>,
            old: DateTime<Utc>,
            expected_values: Vec<i64>,
            expected_complete: bool,
        }

        let mut buffer = SortedRingBuffer::new(8);
        for index in [10, 20, 30, 40] {
            buffer.push(ts(index), index);
        }

        let cases = vec![
            TestCase {
                name: "full interval is complete",
                new: ts(40),
                old: ts(10),
                expected_values: vec![10, 20, 30, 40],
                expected_complete: true,
            },
            TestCase {
                name: "interval older than retention is incomplete",
                new: ts(40),
                old: ts(5),
                expected_values: vec![10, 20, 30, 40],
                expected_complete: false,
            },
            TestCase {
                name: "inner interval",
                new: ts(30),
                old: ts(20),
                expected_values: vec![20, 30],
                expected_complete: true,
            },
            TestCase {
                name: "interval after newest yields nothing but is complete",
                new: ts(60),
                old: ts(50),
                expected_values: vec![],
                expected_complete: true,
            },
        ];

        for test in cases {
            let mut values = Vec::new();
            let complete = buffer.read_interval_by_key(test.new, test.old, |_, value| {
                values.push(*value);
            });
            assert_eq!(values, test.expected_values, "TC failed: {}", test.name);
            assert_eq!(complete, test.expected_complete, "TC failed: {}", test.name);
        }
    }

    #[test]
    fn test_read_interval_on_empty_buffer_is_incomplete() {
        let buffer = SortedRingBuffer::<i64>::new(4);
        let mut called = false;
        let complete = buffer.read_interval_by_key(ts(10), ts(0), |_, _| called = true);
        assert!(!called);
        assert!(!complete);
    }

    #[test]
    fn test_for_each_mut_from() {
        let mut buffer = SortedRingBuffer::new(8);
        for index in [10, 20, 30] {
            buffer.push(ts(index), index);
        }

        buffer.for_each_mut_from(ts(20), |_, value| {
            *value += 1;
            true
        });

        let values: Vec<_> = buffer.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![10, 21, 31]);
    }

    #[test]
    fn test_read_latest_limits_and_orders() {
        let mut buffer = SortedRingBuffer::new(8);
        for index in [10, 20, 30, 40] {
            buffer.push(ts(index), index);
        }

        let mut values = Vec::new();
        buffer.read_latest(2, |_, value| values.push(*value));
        assert_eq!(values, vec![30, 40]);
    }
}
