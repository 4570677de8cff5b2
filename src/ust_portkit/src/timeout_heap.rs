//! The event list's ordering structure (spec §4.10): a min-heap of timeout
//! events keyed by absolute deadline.
//!
//! Grounded on `r3_kernel::timeout`'s `TimeoutGlobals`/`TimeoutHeapCtx`, but
//! keyed directly by `std::time::Instant` instead of its own `Time32`
//! tick counter with wraparound/"critical point"/"frontier" arithmetic: a
//! hosted runtime has a real monotonic clock with far more headroom than an
//! embedded tick counter, so the wraparound handling that machinery exists
//! for has no counterpart here (see DESIGN.md).
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Opaque handle to an entry in a `TimeoutHeap`, returned by `insert` and
/// required by `remove` — this is what `TimeoutGuard` (in `ust_kernel`)
/// holds onto so it can auto-unregister its event on drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutId(u64);

struct Entry<T> {
    at: Instant,
    id: TimeoutId,
    payload: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.id == other.id
    }
}
impl<T> Eq for Entry<T> {}
impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.at.cmp(&other.at).then(self.id.0.cmp(&other.id.0))
    }
}

/// A min-heap of `(deadline, payload)` pairs.
pub struct TimeoutHeap<T> {
    heap: BinaryHeap<Reverse<Entry<T>>>,
    next_id: u64,
}

impl<T> TimeoutHeap<T> {
    pub const fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_id: 0,
        }
    }

    pub fn insert(&mut self, at: Instant, payload: T) -> TimeoutId {
        let id = TimeoutId(self.next_id);
        self.next_id += 1;
        self.heap.push(Reverse(Entry { at, id, payload }));
        id
    }

    /// The deadline of the earliest pending event, if any — used by the
    /// processor kernel to arm its one-shot wakeup (spec §4.5 step 1,
    /// §4.10).
    pub fn earliest(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(e)| e.at)
    }

    /// Pop every event whose deadline is `<= now`.
    pub fn pop_expired(&mut self, now: Instant) -> Vec<(TimeoutId, T)> {
        let mut expired = Vec::new();
        while let Some(Reverse(entry)) = self.heap.peek() {
            if entry.at > now {
                break;
            }
            let Reverse(entry) = self.heap.pop().unwrap();
            expired.push((entry.id, entry.payload));
        }
        expired
    }

    /// Remove a specific event before it fires (the `TimeoutGuard`'s normal
    /// path, and also the losing side of the signal-vs-timeout race
    /// described in spec §4.7/§8). `BinaryHeap` has no O(log n) arbitrary
    /// removal, so this rebuilds the heap minus the matching id; timeout
    /// counts per structure are small (at most the number of tasks blocked
    /// on it), so this is not a hot path.
    pub fn remove(&mut self, id: TimeoutId) -> Option<T> {
        let mut found = None;
        let remaining: BinaryHeap<Reverse<Entry<T>>> = self
            .heap
            .drain()
            .filter_map(|Reverse(entry)| {
                if entry.id == id && found.is_none() {
                    found = Some(entry.payload);
                    None
                } else {
                    Some(Reverse(entry))
                }
            })
            .collect();
        self.heap = remaining;
        found
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl<T> Default for TimeoutHeap<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;
    use std::time::Duration;

    #[quickcheck]
    fn pop_expired_is_sorted_by_deadline(offsets_ms: Vec<u32>) -> bool {
        let base = Instant::now();
        let mut heap = TimeoutHeap::new();
        for (i, &ms) in offsets_ms.iter().enumerate() {
            heap.insert(base + Duration::from_millis(ms as u64), i);
        }
        let far_future = base + Duration::from_millis(1_000_000);
        let expired = heap.pop_expired(far_future);
        let deadlines: Vec<u64> = expired
            .iter()
            .map(|(_, i)| offsets_ms[*i] as u64)
            .collect();
        let mut sorted = deadlines.clone();
        sorted.sort_unstable();
        deadlines == sorted && heap.is_empty()
    }

    #[quickcheck]
    fn remove_then_pop_never_returns_the_removed_id(offsets_ms: Vec<u32>) -> bool {
        let base = Instant::now();
        let mut heap = TimeoutHeap::new();
        let ids: Vec<_> = offsets_ms
            .iter()
            .map(|&ms| heap.insert(base + Duration::from_millis(ms as u64), ms))
            .collect();
        if ids.is_empty() {
            return true;
        }
        let removed = ids[0];
        let was_present = heap.remove(removed).is_some();
        let far_future = base + Duration::from_millis(1_000_000);
        let remaining = heap.pop_expired(far_future);
        was_present && !remaining.iter().any(|(id, _)| *id == removed)
    }

    #[test]
    fn pops_in_deadline_order() {
        let base = Instant::now();
        let mut heap = TimeoutHeap::new();
        heap.insert(base + Duration::from_millis(30), "c");
        heap.insert(base + Duration::from_millis(10), "a");
        heap.insert(base + Duration::from_millis(20), "b");

        let expired = heap.pop_expired(base + Duration::from_millis(25));
        let payloads: Vec<_> = expired.into_iter().map(|(_, p)| p).collect();
        assert_eq!(payloads, vec!["a", "b"]);
        assert_eq!(heap.earliest(), Some(base + Duration::from_millis(30)));
    }

    #[test]
    fn remove_unregisters_before_it_fires() {
        let base = Instant::now();
        let mut heap = TimeoutHeap::new();
        let id = heap.insert(base + Duration::from_millis(10), "a");
        assert_eq!(heap.remove(id), Some("a"));
        assert!(heap.pop_expired(base + Duration::from_secs(1)).is_empty());
    }
}
