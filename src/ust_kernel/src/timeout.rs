//! Event list (spec §4.10): the per-cluster registry of pending timeouts,
//! polled once per processor-kernel loop iteration (spec §4.5 step 1).
//!
//! Grounded on `r3_kernel::timeout`'s `TimeoutRef`/`timeout_calculate_advance`
//! split between "the ordering structure" and "what runs when an entry
//! fires", but the ordering structure itself lives in `ust_portkit` (see
//! `TimeoutHeap`) since it has no kernel-specific knowledge; this module only
//! adds the "what runs when an entry fires" half and the RAII
//! auto-unregistration `r3_kernel` gets from its static configuration and
//! this runtime has to provide dynamically.
use std::sync::Mutex;
use std::time::Instant;

use ust_portkit::{TimeoutHeap, TimeoutId};

type Action = Box<dyn FnOnce() + Send>;

/// A cluster's pending timeouts: each one is a closure to run once its
/// deadline passes, typically "move this blocked task back onto the ready
/// queue, marked as having timed out."
pub struct EventList {
    heap: Mutex<TimeoutHeap<Action>>,
}

impl EventList {
    pub fn new() -> Self {
        Self {
            heap: Mutex::new(TimeoutHeap::new()),
        }
    }

    /// Register `action` to run at `at`, unless cancelled first via the
    /// returned guard's drop (or an explicit `cancel`).
    pub fn insert(&self, at: Instant, action: impl FnOnce() + Send + 'static) -> TimeoutId {
        self.heap.lock().unwrap().insert(at, Box::new(action))
    }

    /// Cancel a previously registered event before it fires. Returns
    /// `false` if it already fired (or was already cancelled) — the normal
    /// outcome of the signal-vs-timeout race (spec §4.7/§8).
    pub fn cancel(&self, id: TimeoutId) -> bool {
        self.heap.lock().unwrap().remove(id).is_some()
    }

    /// Run every action whose deadline has passed. Called once per
    /// processor-kernel loop iteration (spec §4.5 step 1); actions run with
    /// no lock held so they may themselves touch the ready queue.
    pub fn run_expired(&self) {
        let expired = self.heap.lock().unwrap().pop_expired(Instant::now());
        for (_, action) in expired {
            action();
        }
    }

    /// The nearest deadline still pending, used by the processor kernel to
    /// bound how long `pop_timeout` may block (spec §4.5 step 2).
    pub fn earliest(&self) -> Option<Instant> {
        self.heap.lock().unwrap().earliest()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().unwrap().is_empty()
    }
}

impl Default for EventList {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII handle for a registered event: cancels it on drop if it hasn't
/// fired yet. Used by blocking operations that race a wakeup against a
/// timeout (spec §4.7 timed `wait`, §4.8 timed `acceptTry`) so the losing
/// side of the race is always cleaned up, including on an early return via
/// `?` or a panic unwinding through the waiter.
pub struct TimeoutGuard<'a> {
    events: &'a EventList,
    id: Option<TimeoutId>,
}

impl<'a> TimeoutGuard<'a> {
    pub fn new(events: &'a EventList, at: Instant, action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            events,
            id: Some(events.insert(at, action)),
        }
    }

    /// Cancel the event now rather than waiting for drop; returns whether
    /// it was still pending.
    pub fn cancel(mut self) -> bool {
        self.cancel_in_place()
    }

    fn cancel_in_place(&mut self) -> bool {
        match self.id.take() {
            Some(id) => self.events.cancel(id),
            None => false,
        }
    }
}

impl Drop for TimeoutGuard<'_> {
    fn drop(&mut self) {
        self.cancel_in_place();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn run_expired_invokes_due_actions() {
        let events = EventList::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        events.insert(Instant::now() - Duration::from_millis(1), move || {
            fired2.store(true, Ordering::SeqCst);
        });
        events.run_expired();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn guard_cancels_on_drop_before_it_fires() {
        let events = EventList::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = Arc::clone(&fired);
        {
            let _guard = TimeoutGuard::new(&events, Instant::now() + Duration::from_secs(60), move || {
                fired2.store(true, Ordering::SeqCst);
            });
        }
        events.run_expired();
        assert!(!fired.load(Ordering::SeqCst));
        assert!(events.is_empty());
    }

    #[test]
    fn earliest_reports_the_nearest_deadline() {
        let events = EventList::new();
        assert_eq!(events.earliest(), None);
        let base = Instant::now();
        events.insert(base + Duration::from_secs(10), || {});
        events.insert(base + Duration::from_secs(1), || {});
        assert_eq!(events.earliest(), Some(base + Duration::from_secs(1)));
    }
}
