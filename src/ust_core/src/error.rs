//! The error taxonomy described in spec §7 ("Error Handling Design").
//!
//! `KernelFailure` is the root: every failure a task can observe from a
//! kernel primitive boils down to one of its variants. The narrower types
//! (`MutexFailure`, `WaitingFailure`, `IoFailure`, `CoroutineFailure`) exist
//! so call sites that can only raise one sub-family (e.g. `CondLock::wait`
//! can only ever see `WaitingFailure`) can say so in their signature instead
//! of the caller having to match on variants that can't occur there.
use std::sync::Arc;
use thiserror::Error;

/// Raised at every task still blocked in a serial instance's `entryList` or
/// `acceptSignalled` stack when that instance's destructor finishes
/// draining it.
#[derive(Debug, Clone, Copy, Error)]
#[error("mutex object was destroyed while this task was blocked on it")]
pub struct EntryFailure;

/// Raised at an acceptor whose accepted partner terminated abnormally
/// before completing the rendezvous.
#[derive(Debug, Clone, Error)]
#[error("rendezvous partner failed: {0}")]
pub struct RendezvousFailure(#[source] pub Arc<KernelFailure>);

/// Failures specific to mutex objects (serial instances) and the lock
/// family built on them.
#[derive(Debug, Clone, Error)]
pub enum MutexFailure {
    #[error(transparent)]
    EntryFailure(#[from] EntryFailure),
    #[error(transparent)]
    RendezvousFailure(#[from] RendezvousFailure),
    /// `release` called by a task that is not the current owner.
    #[error("releasing a lock not held by the caller is a programming error")]
    NotOwner,
    /// A blocking acquire would deadlock against the caller's own held locks.
    #[error("lock acquisition would deadlock")]
    WouldDeadlock,
}

/// Raised at a task blocked on a condition variable whose owning serial
/// instance (or, for a bare `CondLock`, whose associated `OwnerLock`) is
/// destroyed out from under it.
#[derive(Debug, Clone, Copy, Error)]
#[error("condition variable was destroyed while this task was waiting on it")]
pub struct WaitingFailure;

/// Failures from the (deliberately minimal) non-blocking I/O poller seam.
#[derive(Debug, Clone, Error)]
#[error("I/O failure: {0}")]
pub struct IoFailure(pub String);

/// The forwarded panic payload from a coroutine body, reported to whichever
/// `resume` call observes the coroutine's termination.
///
/// `resume` on an already-`Halt`ed coroutine is not a member of this
/// hierarchy: spec §7 classifies it as a fatal programming error ("all
/// abort with a diagnostic"), not a recoverable result, so it panics
/// directly instead of returning a `CoroutineFailure` variant.
#[derive(Debug, Error)]
pub enum CoroutineFailure {
    #[error("coroutine terminated with an unhandled exception")]
    UnhandledException(#[from] UnhandledException),
}

/// Carries a forwarded panic payload from a coroutine body to its starter.
#[derive(Debug, Error)]
#[error("unhandled exception in coroutine body")]
pub struct UnhandledException {
    pub message: String,
}

/// The root of the error hierarchy (spec §7's `KernelFailure`).
#[derive(Debug, Error)]
pub enum KernelFailure {
    #[error(transparent)]
    Mutex(#[from] MutexFailure),
    #[error(transparent)]
    Waiting(#[from] WaitingFailure),
    #[error(transparent)]
    Io(#[from] IoFailure),
    #[error(transparent)]
    Coroutine(#[from] CoroutineFailure),
    /// An internal invariant (e.g. "a task is on at most one wait
    /// structure") was violated. Always a bug, never a caller error; the
    /// kernel aborts rather than returning this in release builds, but
    /// tests assert on it via `debug_assert!` paths that feed here.
    #[error("internal kernel invariant violated: {0}")]
    Invariant(String),
}
