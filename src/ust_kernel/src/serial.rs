//! Serial instance (spec §4.8): a mutex object with *external* scheduling
//! via accept statements, on top of the same *internal* scheduling
//! (priority-then-FIFO `entryList`) every other blocking lock in this crate
//! uses.
//!
//! `r3_kernel` has no monitor/accept-statement construct at all
//! (`r3_kernel::mutex` is a plain ceiling-protocol mutex with no external
//! scheduling) — this module is grounded directly on
//! `uC++.cc`'s `uSerial`
//! (`enter`, `leave`, `leave2`, `acceptStart`, `acceptTry` [both overloads],
//! `acceptTry2`, `acceptPause` [three overloads], `acceptEnd`, and the
//! destructor's drain loop), reimplemented in this crate's own idiom: a
//! `SpinLock`-guarded state struct and `current::task()`/`current::cluster()`
//! lookups, exactly as `lock.rs`/`condlock.rs` already do.
//!
//! Two simplifications from the original, recorded here and in DESIGN.md:
//!
//!  - uC++'s translator generates one `uBasePrioritySeq` object per monitor
//!    *member function*; this implementation instead keeps one `entryList`
//!    (object-wide) plus one `PriorityFifoQueue` per accept-mask bit
//!    (`member_queues`), indexed the same way the mask itself is. An entry
//!    is always present in exactly one `member_queues` slot and, at the same
//!    time, in `entry_list` — removal from one always comes with removal
//!    from the other.
//!  - Destruction does not use uC++'s synchronous exception-resumption
//!    machinery (explicitly out of scope — see spec.md's Non-goals on the
//!    exception subsystem). Instead every blocked task is marked with a
//!    pending [`ust_core::EntryFailure`] and pushed straight onto the ready
//!    queue; its blocked `enter`/accept call observes the flag on waking and
//!    returns `Err` instead of taking ownership.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use ust_core::EntryFailure;
use ust_portkit::accept_mask::DESTRUCTOR_BIT;
use ust_portkit::{AcceptMask, PriorityFifoQueue, SpinLock, SpinLockGuard};

use crate::current;
use crate::scheduler::schedule;
use crate::task::Task;
use crate::timeout::TimeoutGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DestructorStatus {
    /// No task has called the destructor yet.
    None,
    /// A destructor call is blocked/pending entry (`uSerial::destructorTask`
    /// set, not yet owner).
    Called,
    /// The destructor task has been handed ownership and is running its
    /// drain.
    Scheduled,
}

struct SerialState {
    mutex_owner: Option<Arc<Task>>,
    mask: AcceptMask,
    /// Shared slot an in-progress accept statement points at so the next
    /// `enter` to complete it can report which member it entered through
    /// (`uSerial::mutexMaskLocn`).
    mutex_mask_locn: Option<Arc<SpinLock<Option<u32>>>>,
    entry_list: PriorityFifoQueue<(u32, Arc<Task>)>,
    member_queues: Vec<PriorityFifoQueue<Arc<Task>>>,
    /// LIFO: the most recently suspended owner/acceptor is resumed first
    /// (spec §4.8 invariant — an acceptor always regains ownership before
    /// any ordinary entrant, a stack rather than a queue).
    accept_signalled: Vec<Arc<Task>>,
    destructor_task: Option<Arc<Task>>,
    destructor_status: DestructorStatus,
    not_alive: bool,
}

/// A mutex object with accept-statement external scheduling (spec §4.8).
/// Application monitors are expected to hold one of these and route every
/// public member function through `enter`/`leave` (or `accept_start(...)`
/// for a member implemented as an accept statement).
pub struct Serial {
    state: SpinLock<SerialState>,
    max_entry_bits: u32,
}

impl Serial {
    /// Construct a serial instance with `max_entry_bits` acceptable member
    /// positions (bounded by `ust_core::Config::max_entry_bits`, spec §6).
    /// The calling task becomes the initial owner, exactly as uC++'s
    /// generated constructor runs as an ordinary (recursion-reset) call on
    /// the new object.
    pub fn new(max_entry_bits: u32) -> Arc<Self> {
        // Mirrors uC++'s generated constructor, which runs as an ordinary
        // (recursion-reset) call on the new object with the constructing
        // task as initial owner — but construction is also a perfectly
        // normal thing to do from outside any dispatched task (e.g. while
        // setting up a test or a cluster's initial object graph), in which
        // case the object simply starts unowned and fully open.
        let owner = current::try_task();
        if let Some(owner) = &owner {
            owner.take_mutex_recursion();
        }
        let mut mask = AcceptMask::new();
        if owner.is_none() {
            mask.set_all_except_timeout(max_entry_bits);
        }
        Arc::new(Self {
            state: SpinLock::new(SerialState {
                mutex_owner: owner,
                mask,
                mutex_mask_locn: None,
                entry_list: PriorityFifoQueue::new(),
                member_queues: (0..max_entry_bits).map(|_| PriorityFifoQueue::new()).collect(),
                accept_signalled: Vec::new(),
                destructor_task: None,
                destructor_status: DestructorStatus::None,
                not_alive: false,
            }),
            max_entry_bits,
        })
    }

    fn write_selected_member(&self, state: &mut SerialState, bit: u32) {
        if let Some(locn) = state.mutex_mask_locn.take() {
            *locn.lock() = Some(bit);
        }
    }

    /// Mutex-member prologue (spec §4.8.1): acquire the object for member
    /// `bit`, blocking if it is currently owned and not currently
    /// accepting `bit`. Returns the caller's saved recursion depth, to be
    /// passed back to the matching [`Serial::leave`]; `Err(EntryFailure)` if
    /// the object was destroyed while this call was blocked.
    pub fn enter(self: &Arc<Self>, bit: u32) -> Result<u32, EntryFailure> {
        let me = current::task();
        me.coroutine.cancellation_point();
        let mut state = self.state.lock();
        if state.mask.get(bit) {
            state.mask.clear();
            let mr = me.take_mutex_recursion();
            state.mutex_owner = Some(Arc::clone(&me));
            self.write_selected_member(&mut state, bit);
            return Ok(mr);
        }
        let already_owner = state.mutex_owner.as_ref().map(|o| o.id) == Some(me.id);
        if already_owner {
            me.bump_mutex_recursion();
            self.write_selected_member(&mut state, bit);
            return Ok(0);
        }
        let owner = state.mutex_owner.clone();
        let priority = me.active_priority().get() as i64;
        state.member_queues[bit as usize].insert(priority, Arc::clone(&me));
        state.entry_list.insert(priority, (bit, Arc::clone(&me)));
        if let Some(owner) = owner {
            owner.inherit_priority(me.active_priority());
        }
        me.set_blocked_on(Some(Arc::downgrade(self)));
        schedule(&me, move || drop(state));
        me.set_blocked_on(None);

        if me.take_pending_entry_failure() {
            return Err(EntryFailure);
        }
        let mr = me.take_mutex_recursion();
        let mut state = self.state.lock();
        self.write_selected_member(&mut state, bit);
        Ok(mr)
    }

    /// Like [`Serial::enter`] but for the generated destructor: queues on
    /// its own member slot (never on `entry_list` — a destructor call is
    /// never selectable by an ordinary accept statement clause keyed by
    /// bit position other than the reserved destructor bit) and aborts
    /// outright on the misuses uC++ itself aborts on (double destruction,
    /// a task destroying an object it already holds open recursively).
    fn enter_destructor(self: &Arc<Self>) -> u32 {
        let me = current::task();
        let mut state = self.state.lock();
        if state.destructor_status != DestructorStatus::None {
            drop(state);
            panic!("mutex object's destructor was already called");
        }
        state.destructor_status = DestructorStatus::Called;
        state.destructor_task = Some(Arc::clone(&me));
        if state.mask.get(DESTRUCTOR_BIT) {
            state.mask.clear();
            let mr = me.take_mutex_recursion();
            state.mutex_owner = Some(Arc::clone(&me));
            state.destructor_status = DestructorStatus::Scheduled;
            self.write_selected_member(&mut state, DESTRUCTOR_BIT);
            return mr;
        }
        let already_owner = state.mutex_owner.as_ref().map(|o| o.id) == Some(me.id);
        if already_owner {
            drop(state);
            panic!("mutex object destroyed while this task still holds a nested call open");
        }
        state.member_queues[DESTRUCTOR_BIT as usize].insert(i64::MAX, Arc::clone(&me));
        me.set_blocked_on(Some(Arc::downgrade(self)));
        schedule(&me, move || drop(state));
        me.set_blocked_on(None);
        me.take_mutex_recursion()
    }

    /// Priority-inheritance chain walk (spec §4.9/§9's `uRepositionEntry`):
    /// re-sort `task_id`'s entry in this object's queues to `new_priority`,
    /// returning the object's current owner so the caller can push the same
    /// change into that owner's PIQ and continue the walk if its own active
    /// priority moves. `None` if the task is no longer registered here (it
    /// already won the race against a wakeup) or the object is unowned.
    pub(crate) fn reposition_waiter(&self, task_id: u64, new_priority: i64) -> Option<Arc<Task>> {
        let mut state = self.state.lock();
        for queue in state.member_queues.iter_mut() {
            queue.reposition(new_priority, |t| t.id == task_id);
        }
        state
            .entry_list
            .reposition(new_priority, |(_, t)| t.id == task_id);
        state.mutex_owner.clone()
    }

    fn release_owner(&self, mut state: SpinLockGuard<'_, SerialState>, me: &Arc<Task>) -> Option<Arc<Task>> {
        let next = if let Some(next) = state.accept_signalled.pop() {
            me.disinherit_priority(next.active_priority());
            Some(next)
        } else if state.destructor_status == DestructorStatus::Called {
            let destructor = state.destructor_task.clone().expect("destructor_status Called implies destructor_task");
            state.member_queues[DESTRUCTOR_BIT as usize].remove_first(|t| t.id == destructor.id);
            state.destructor_status = DestructorStatus::Scheduled;
            me.disinherit_priority(destructor.active_priority());
            Some(destructor)
        } else if state.entry_list.is_empty() {
            state.mask.set_all_except_timeout(self.max_entry_bits);
            None
        } else {
            let (bit, next) = state.entry_list.pop_front().expect("checked not empty above");
            state.member_queues[bit as usize].remove_first(|t| t.id == next.id);
            me.disinherit_priority(next.active_priority());
            Some(next)
        };
        state.mutex_owner = next.clone();
        if state.destructor_task.as_ref().map(|t| t.id) == Some(me.id) {
            state.destructor_task = None;
            state.destructor_status = DestructorStatus::None;
        }
        drop(state);
        next
    }

    /// Mutex-member epilogue (spec §4.8.2): release ownership, handing it
    /// directly to whichever of {a suspended acceptor, the pending
    /// destructor, the highest-priority `entryList` waiter} has priority,
    /// or reopening every member if nobody is waiting. `mr` is the value
    /// [`Serial::enter`] returned.
    pub fn leave(&self, mr: u32) {
        let me = current::task();
        if me.mutex_recursion() != 0 {
            me.dec_mutex_recursion();
            return;
        }
        let state = self.state.lock();
        if let Some(next) = self.release_owner(state, &me) {
            current::cluster().ready_queue.push(next);
        }
        me.restore_mutex_recursion(mr);
        // Checked only once ownership has already been handed off (or the
        // object reopened) above: firing any earlier would unwind past the
        // hand-off and leave the object permanently owned by a task that
        // never runs again.
        me.coroutine.cancellation_point();
    }

    /// Suspend the current owner without searching for a successor: used
    /// only by `Accept::pause`/`pause_timeout`, whose caller has *already*
    /// pushed itself onto `accept_signalled` so a future `leave` finds it.
    /// Unlike `leave`, this must not itself pop `accept_signalled` — the
    /// entry just pushed is the caller's own, and popping it back off here
    /// would hand ownership right back before anything actually changed
    /// (spec §4.8.3: an unmatched accept statement leaves the object
    /// unowned, reopened only for the bits it was listening on, until some
    /// future caller or hand-off reaches it).
    fn suspend_unowned(&self, mut state: SpinLockGuard<'_, SerialState>, me: &Arc<Task>) {
        state.mutex_owner = None;
        schedule(me, move || drop(state));
    }

    /// Begin an accept statement (spec §4.8.3). Must be called by the
    /// current owner; returns a builder whose `try_accept`/`pause`/`else_`
    /// methods implement the clause-by-clause evaluation a generated accept
    /// statement performs.
    pub fn accept_start(self: &Arc<Self>) -> Accept<'_> {
        let mask_locn = Arc::new(SpinLock::new(None));
        let mut guard = self.state.lock();
        guard.mutex_mask_locn = Some(Arc::clone(&mask_locn));
        Accept {
            serial: self,
            mask_locn,
            guard: Some(guard),
        }
    }

    /// Destroy the object (spec §4.8.4): acquire it like any other member
    /// (through the destructor bit), mark it not-alive, then raise
    /// `EntryFailure` at every task still blocked on `accept_signalled` or
    /// `entry_list`.
    pub fn destroy(self: Arc<Self>) {
        let mr = self.enter_destructor();
        let mut state = self.state.lock();
        state.not_alive = true;
        let signalled: Vec<_> = state.accept_signalled.drain(..).collect();
        let entrants: Vec<_> = state.entry_list.drain().collect();
        for bit in 0..self.max_entry_bits {
            state.member_queues[bit as usize].drain().for_each(drop);
        }
        drop(state);
        for waiter in signalled {
            waiter.set_pending_entry_failure();
            current::cluster().ready_queue.push(waiter);
        }
        for (_, waiter) in entrants {
            waiter.set_pending_entry_failure();
            current::cluster().ready_queue.push(waiter);
        }
        self.leave(mr);
    }
}

/// An in-progress accept statement (spec §4.8.3), returned by
/// [`Serial::accept_start`]. Holds the object's spin lock for the duration
/// of the statement, exactly as uC++'s `acceptTry`/`acceptLock` does —
/// released either by a successful `try_accept`, by `pause`/`pause_timeout`
/// suspending the owner, or by `else_`/drop falling through without a match.
pub struct Accept<'s> {
    serial: &'s Arc<Serial>,
    mask_locn: Arc<SpinLock<Option<u32>>>,
    guard: Option<SpinLockGuard<'s, SerialState>>,
}

impl<'s> Accept<'s> {
    fn guard(&mut self) -> &mut SpinLockGuard<'s, SerialState> {
        self.guard.as_mut().expect("accept statement already finished")
    }

    /// `_Accept(member)` clause (spec §4.8.3): if a task is already waiting
    /// to enter via `bit`, hand it ownership and suspend the caller (the
    /// acceptor) until that rendezvous partner leaves again. Returns `true`
    /// if this clause matched — once it has, no further clause in the same
    /// accept statement should be evaluated.
    pub fn try_accept(&mut self, bit: u32) -> bool {
        if bit == DESTRUCTOR_BIT {
            return self.try_accept_destructor();
        }
        let state = self.guard();
        match state.member_queues[bit as usize].pop_front() {
            None => {
                state.mask.set(bit);
                false
            }
            Some(caller) => {
                state.entry_list.remove_first(|(b, t)| *b == bit && t.id == caller.id);
                state.mask.clear();
                let me = current::task();
                self.serial.write_selected_member(state, bit);
                state.accept_signalled.push(Arc::clone(&me));
                let prev_owner = state.mutex_owner.replace(Arc::clone(&caller));
                if let Some(prev) = prev_owner {
                    prev.disinherit_priority(caller.active_priority());
                }
                let guard = self.guard.take().unwrap();
                schedule(&me, move || {
                    current::cluster().ready_queue.push(caller);
                    drop(guard);
                });
                true
            }
        }
    }

    fn try_accept_destructor(&mut self) -> bool {
        let state = self.guard();
        if state.destructor_status != DestructorStatus::Called {
            state.mask.set(DESTRUCTOR_BIT);
            return false;
        }
        let destructor = state.destructor_task.clone().expect("destructor_status Called implies destructor_task");
        state.member_queues[DESTRUCTOR_BIT as usize].remove_first(|t| t.id == destructor.id);
        state.destructor_status = DestructorStatus::Scheduled;
        state.mask.clear();
        let me = current::task();
        self.serial.write_selected_member(state, DESTRUCTOR_BIT);
        state.accept_signalled.push(Arc::clone(&me));
        let prev_owner = state.mutex_owner.replace(Arc::clone(&destructor));
        if let Some(prev) = prev_owner {
            prev.disinherit_priority(destructor.active_priority());
        }
        let guard = self.guard.take().unwrap();
        schedule(&me, move || {
            current::cluster().ready_queue.push(destructor);
            drop(guard);
        });
        true
    }

    /// Finish the statement with no clause having matched yet, suspending
    /// the owner until some future `enter`/`try_accept` picks it back up
    /// (spec §4.8.3's unconditional `acceptPause`).
    pub fn pause(mut self) {
        let me = current::task();
        self.guard().accept_signalled.push(Arc::clone(&me));
        let state = self.guard.take().unwrap();
        self.serial.suspend_unowned(state, &me);
    }

    /// As `pause`, but give up and return `false` if no rendezvous partner
    /// arrives by `deadline` — the object is reopened exactly as the
    /// ordinary `leave` path would on timeout (spec §4.8.3's timed
    /// `acceptPause`).
    pub fn pause_timeout(mut self, deadline: Instant) -> bool {
        let me = current::task();
        let task_id = me.id;
        self.guard().accept_signalled.push(Arc::clone(&me));
        let serial = Arc::clone(self.serial);
        let woken = Arc::clone(&me);
        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out2 = Arc::clone(&timed_out);
        let cluster = current::cluster();
        let timeout_guard = TimeoutGuard::new(&cluster.events, deadline, move || {
            let mut state = serial.state.lock();
            if let Some(pos) = state.accept_signalled.iter().position(|t| t.id == task_id) {
                state.accept_signalled.remove(pos);
                state.mutex_owner = Some(Arc::clone(&woken));
                timed_out2.store(true, Ordering::SeqCst);
                drop(state);
                current::cluster().ready_queue.push(woken);
            }
        });
        let state = self.guard.take().unwrap();
        self.serial.suspend_unowned(state, &me);
        drop(timeout_guard);
        !timed_out.load(Ordering::SeqCst)
    }

    /// Finish the statement with no clause matched and no pause: the owner
    /// keeps running (spec §4.8.3's `_Else`).
    pub fn else_(self) {
        drop(self);
    }

    /// Finish the statement (spec §4.8.3's `acceptEnd`), equivalent to
    /// `else_` — provided for call sites that read more naturally ending an
    /// accept statement that already matched via `try_accept`.
    pub fn end(self) {
        drop(self);
    }
}

impl Drop for Accept<'_> {
    fn drop(&mut self) {
        match self.guard.take() {
            Some(mut guard) => {
                guard.mutex_mask_locn = None;
            }
            None => {
                let mut state = self.serial.state.lock();
                let clear = state
                    .mutex_mask_locn
                    .as_ref()
                    .map(|locn| Arc::ptr_eq(locn, &self.mask_locn))
                    .unwrap_or(false);
                if clear {
                    state.mutex_mask_locn = None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::Cluster;
    use crate::task::Task;
    use std::time::Duration;
    use ust_core::{Config, Priority};

    const PUT_BIT: u32 = 2;
    const GET_BIT: u32 = 3;

    /// A single-slot bounded buffer implemented as a monitor with an accept
    /// statement: `put` only accepts `get` once full and vice versa (spec
    /// §8.1).
    struct BoundedBuffer {
        serial: Arc<Serial>,
        slot: SpinLock<Option<u64>>,
    }

    impl BoundedBuffer {
        fn new() -> Arc<Self> {
            let serial = Serial::new(4);
            Arc::new(Self {
                serial,
                slot: SpinLock::new(None),
            })
        }

        fn put(self: &Arc<Self>, value: u64) {
            let mr = self.serial.enter(PUT_BIT).unwrap();
            if self.slot.lock().is_some() {
                let mut accept = self.serial.accept_start();
                if !accept.try_accept(GET_BIT) {
                    accept.pause();
                }
            }
            *self.slot.lock() = Some(value);
            self.serial.leave(mr);
        }

        fn get(self: &Arc<Self>) -> u64 {
            let mr = self.serial.enter(GET_BIT).unwrap();
            if self.slot.lock().is_none() {
                let mut accept = self.serial.accept_start();
                if !accept.try_accept(PUT_BIT) {
                    accept.pause();
                }
            }
            let value = self.slot.lock().take().unwrap();
            self.serial.leave(mr);
            value
        }
    }

    #[test]
    fn bounded_buffer_producer_consumer_preserves_fifo_order() {
        let config = Config::default();
        let cluster = Cluster::new("bbuf");
        let buffer = BoundedBuffer::new();
        let received = Arc::new(SpinLock::new(Vec::new()));

        let producer_buffer = Arc::clone(&buffer);
        let producer = Task::spawn("producer", Priority::NORMAL, move || {
            for i in 0..5 {
                producer_buffer.put(i);
            }
        });
        let consumer_buffer = Arc::clone(&buffer);
        let consumer_received = Arc::clone(&received);
        let consumer = Task::spawn("consumer", Priority::NORMAL, move || {
            for _ in 0..5 {
                let v = consumer_buffer.get();
                consumer_received.lock().push(v);
            }
        });

        cluster.spawn_task(producer);
        cluster.spawn_task(consumer);
        cluster.add_processors(2, &config);
        cluster.shutdown();

        assert_eq!(*received.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn accept_with_else_falls_through_when_nobody_waiting() {
        let config = Config::default();
        let cluster = Cluster::new("accept-else");
        let serial = Serial::new(4);
        let took_else = Arc::new(AtomicBool::new(false));
        let took_else2 = Arc::clone(&took_else);
        let serial2 = Arc::clone(&serial);
        let task = Task::spawn("t", Priority::NORMAL, move || {
            let mr = serial2.enter(PUT_BIT).unwrap();
            let mut accept = serial2.accept_start();
            if !accept.try_accept(GET_BIT) {
                took_else2.store(true, Ordering::SeqCst);
                accept.else_();
            }
            serial2.leave(mr);
        });
        cluster.spawn_task(task);
        cluster.add_processors(1, &config);
        cluster.shutdown();
        assert!(took_else.load(Ordering::SeqCst));
    }

    #[test]
    fn owner_inherits_priority_of_blocked_higher_priority_entrant() {
        let config = Config::default();
        let cluster = Cluster::new("serial-pi");
        let serial = Serial::new(4);
        let low_active = Arc::new(SpinLock::new(Priority::MIN));

        let serial_low = Arc::clone(&serial);
        let low_active2 = Arc::clone(&low_active);
        let low = Task::spawn("low", Priority::new(1), move || {
            let mr = serial_low.enter(PUT_BIT).unwrap();
            std::thread::sleep(Duration::from_millis(30));
            *low_active2.lock() = current::task().active_priority();
            serial_low.leave(mr);
        });

        let serial_high = Arc::clone(&serial);
        let high = Task::spawn("high", Priority::new(9), move || {
            let mr = serial_high.enter(PUT_BIT).unwrap();
            serial_high.leave(mr);
        });

        cluster.spawn_task(low);
        std::thread::sleep(Duration::from_millis(10));
        cluster.spawn_task(high);
        cluster.add_processors(1, &config);
        cluster.shutdown();

        assert_eq!(*low_active.lock(), Priority::new(9));
    }

    #[test]
    fn priority_inheritance_propagates_transitively_through_a_blocking_chain() {
        // C holds S2; B holds S1 and also calls into S2 (so B is itself
        // blocked, registered in S2's entry_list, while H is blocked
        // entering S1). Raising H's priority should chain: H -> (owner of
        // S1) B -> (owner of S2) C, per spec §4.9/§9's `uRepositionEntry`.
        let config = Config::default();
        let cluster = Cluster::new("serial-pi-chain");
        let s1 = Serial::new(4);
        let s2 = Serial::new(4);
        let c_active_while_blocking_b = Arc::new(SpinLock::new(Priority::MIN));

        let s2_c = Arc::clone(&s2);
        let c_active = Arc::clone(&c_active_while_blocking_b);
        let c = Task::spawn("c", Priority::new(1), move || {
            let mr = s2_c.enter(PUT_BIT).unwrap();
            std::thread::sleep(Duration::from_millis(60));
            *c_active.lock() = current::task().active_priority();
            s2_c.leave(mr);
        });

        let s1_b = Arc::clone(&s1);
        let s2_b = Arc::clone(&s2);
        let b = Task::spawn("b", Priority::new(2), move || {
            let mr1 = s1_b.enter(PUT_BIT).unwrap();
            // Blocks here until C leaves S2, registering B in S2's
            // entry_list and (via `blocked_on`) making the chain walk
            // reachable from H's eventual block on S1.
            let mr2 = s2_b.enter(GET_BIT).unwrap();
            s2_b.leave(mr2);
            s1_b.leave(mr1);
        });

        let s1_h = Arc::clone(&s1);
        let h = Task::spawn("h", Priority::new(9), move || {
            let mr = s1_h.enter(PUT_BIT).unwrap();
            s1_h.leave(mr);
        });

        cluster.spawn_task(c);
        std::thread::sleep(Duration::from_millis(10));
        cluster.spawn_task(b);
        std::thread::sleep(Duration::from_millis(10));
        cluster.spawn_task(h);
        cluster.add_processors(1, &config);
        cluster.shutdown();

        assert_eq!(*c_active_while_blocking_b.lock(), Priority::new(9));
    }

    #[test]
    fn accept_pause_with_timeout_reopens_after_deadline() {
        let config = Config::default();
        let cluster = Cluster::new("serial-timeout");
        let serial = Serial::new(4);
        let timed_out = Arc::new(AtomicBool::new(false));
        let timed_out2 = Arc::clone(&timed_out);
        let serial2 = Arc::clone(&serial);
        let task = Task::spawn("t", Priority::NORMAL, move || {
            let mr = serial2.enter(PUT_BIT).unwrap();
            let mut accept = serial2.accept_start();
            if !accept.try_accept(GET_BIT) {
                let ok = accept.pause_timeout(Instant::now() + Duration::from_millis(20));
                timed_out2.store(!ok, Ordering::SeqCst);
            }
            serial2.leave(mr);
        });
        cluster.spawn_task(task);
        cluster.add_processors(1, &config);
        cluster.shutdown();
        assert!(timed_out.load(Ordering::SeqCst));
    }

    #[test]
    fn destroy_raises_entry_failure_on_blocked_waiter() {
        // Owner holds the object; a waiter blocks in `entry_list`; a
        // destroyer blocks trying to acquire the destructor bit. Once the
        // owner leaves, the destructor (preferred over ordinary entrants)
        // takes over and drains, so the still-blocked waiter observes
        // `EntryFailure` instead of ever becoming owner.
        let config = Config::default();
        let cluster = Cluster::new("serial-destroy");
        let serial = Serial::new(4);
        let failed = Arc::new(AtomicBool::new(false));

        let serial_owner = Arc::clone(&serial);
        let owner = Task::spawn("owner", Priority::NORMAL, move || {
            let mr = serial_owner.enter(PUT_BIT).unwrap();
            std::thread::sleep(Duration::from_millis(40));
            serial_owner.leave(mr);
        });

        let serial_waiter = Arc::clone(&serial);
        let failed2 = Arc::clone(&failed);
        let waiter = Task::spawn("waiter", Priority::NORMAL, move || {
            if serial_waiter.enter(GET_BIT).is_err() {
                failed2.store(true, Ordering::SeqCst);
            }
        });

        let serial_destroyer = Arc::clone(&serial);
        let destroyer = Task::spawn("destroyer", Priority::NORMAL, move || {
            serial_destroyer.destroy();
        });

        cluster.spawn_task(owner);
        std::thread::sleep(Duration::from_millis(10));
        cluster.spawn_task(waiter);
        cluster.spawn_task(destroyer);
        cluster.add_processors(3, &config);
        cluster.shutdown();

        assert!(failed.load(Ordering::SeqCst));
    }
}
