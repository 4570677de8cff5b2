//! Priority inheritance queue (spec §4.9, §3: "PIQ").
//!
//! Each task carries a max-heap of priorities inherited from callers
//! currently blocked on entering a serial instance it owns. The acquire
//! hook (`Piq::push`) runs when a caller blocks against this task's owned
//! object; the release hook (`Piq::remove`) runs when that caller stops
//! blocking (woken, timed out, or the object destroyed). A task's active
//! priority is always `max(base priority, piq.top())` (spec §3 invariant).
//!
//! This is the module that makes this implementation *priority
//! inheritance* rather than `r3_kernel::mutex`'s *priority
//! ceiling* protocol — see DESIGN.md "Open Question decisions" §1 for why
//! that deviation from `r3_kernel`'s actual math is deliberate.
use ust_core::Priority;

/// A max-heap of inherited priorities with FIFO-stable removal: since two
/// different blocked callers can share a priority, `remove` removes one
/// occurrence, not all of them.
#[derive(Debug, Default)]
pub struct Piq {
    // Sorted ascending; `.last()` is the max. A `Vec` instead of
    // `std::collections::BinaryHeap` because we need arbitrary-element
    // removal (a caller can stop blocking — woken, timed out, destroyed —
    // without being the current maximum), which `BinaryHeap` doesn't
    // support in safe std today.
    inherited: Vec<Priority>,
}

impl Piq {
    pub const fn new() -> Self {
        Self {
            inherited: Vec::new(),
        }
    }

    /// Acquire hook: a caller with priority `p` is now blocked on an object
    /// owned by the task this PIQ belongs to.
    pub fn push(&mut self, p: Priority) {
        let pos = self.inherited.partition_point(|&x| x <= p);
        self.inherited.insert(pos, p);
    }

    /// Release hook: one caller with priority `p` is no longer blocked.
    pub fn remove(&mut self, p: Priority) {
        if let Some(pos) = self.inherited.iter().position(|&x| x == p) {
            self.inherited.remove(pos);
        }
    }

    /// Atomically swap one inherited entry for another: used when a
    /// blocked caller's own active priority changes while it is already
    /// registered here, so the owner's PIQ reflects the new value in one
    /// step rather than a transient `remove`-then-`push` that could be
    /// observed mid-update (spec §4.9/§9's `uRepositionEntry`).
    pub fn replace(&mut self, old: Priority, new: Priority) {
        self.remove(old);
        self.push(new);
    }

    pub fn top(&self) -> Option<Priority> {
        self.inherited.last().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.inherited.is_empty()
    }

    /// Active priority given this task's base priority (spec §3: "active
    /// priority equals `max(base priority, PIQ top)`").
    pub fn active_priority(&self, base: Priority) -> Priority {
        match self.top() {
            Some(top) => base.max(top),
            None => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_priority_tracks_inheritance() {
        let mut piq = Piq::new();
        let base = Priority::new(1);
        assert_eq!(piq.active_priority(base), base);

        piq.push(Priority::new(5));
        assert_eq!(piq.active_priority(base), Priority::new(5));

        piq.push(Priority::new(3));
        assert_eq!(piq.active_priority(base), Priority::new(5));

        piq.remove(Priority::new(5));
        assert_eq!(piq.active_priority(base), Priority::new(3));

        piq.remove(Priority::new(3));
        assert_eq!(piq.active_priority(base), base);
    }

    #[test]
    fn duplicate_priorities_remove_one_occurrence() {
        let mut piq = Piq::new();
        piq.push(Priority::new(7));
        piq.push(Priority::new(7));
        piq.remove(Priority::new(7));
        assert_eq!(piq.top(), Some(Priority::new(7)));
        piq.remove(Priority::new(7));
        assert_eq!(piq.top(), None);
    }
}
