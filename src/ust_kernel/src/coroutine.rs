//! Base coroutine (spec §4.4): stackful, single-thread-of-control,
//! explicit `resume`/`suspend` transfer.
//!
//! Grounded on `r3_port_std::ums`'s idiom of backing a
//! cooperative unit of control with a real, parked OS thread rather than a
//! hand-rolled assembly stack-swap: `resume` is "unpark the target thread,
//! park the caller's thread"; `suspend` is the same in reverse. Unlike
//! `ums::ThreadGroup`, which serializes the whole process behind one
//! global "current thread" (so only one cooperative unit in the *entire*
//! process ever runs at a time), each `Coroutine` here tracks its own
//! resumer independently, so multiple processors can each be running a
//! coroutine at once — required by spec §5's "parallel OS threads ×
//! cooperative tasks per processor" and scenario §8.6.
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread::{self, Thread};

use ust_core::{CoroutineFailure, UnhandledException};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Start,
    Inactive,
    Active,
    Halt,
}

/// Cancellation delivery mode (spec §4.4: "a flag plus two modes (Poll /
/// Implicit, matching the POSIX deferred/asynchronous split)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationType {
    /// Only raised when the coroutine itself calls `cancellation_point`.
    Poll,
    /// Raised at every poll point this crate checks on the coroutine's
    /// behalf (`schedule`, a serial instance's `enter`/`leave`, a condition
    /// wait/accept) without the body having to call anything itself. Still
    /// "checked no later than the next suspension point" rather than truly
    /// asynchronous — see DESIGN.md's Open Question decisions.
    Implicit,
}

/// Cancellation state (spec §3: `{enabled?, type, cancelled?, in-progress?}`).
struct Cancellation {
    enabled: AtomicBool,
    requested: AtomicBool,
    in_progress: AtomicBool,
    kind: Mutex<CancellationType>,
}

impl Cancellation {
    fn new() -> Self {
        Self {
            enabled: AtomicBool::new(false),
            requested: AtomicBool::new(false),
            in_progress: AtomicBool::new(false),
            kind: Mutex::new(CancellationType::Poll),
        }
    }
}

/// The panic payload a cancelled coroutine unwinds with. Caught by the
/// invoker (`ensure_started`'s body wrapper) and treated as clean
/// termination rather than an unhandled exception (spec §4.4: "Polling
/// points raise `UnwindStack`, which the invoker catches to run destructors
/// and terminate cleanly").
struct UnwindStack;

type Body = Box<dyn FnOnce() + Send>;

/// A stackful coroutine backed by a dedicated OS thread.
pub struct Coroutine {
    state: Mutex<State>,
    /// The coroutine's entry point, run exactly once on first resume.
    body: Mutex<Option<Body>>,
    /// The thread running this coroutine's body, set once on first resume.
    thread: OnceLock<Thread>,
    /// The thread that most recently resumed this coroutine — `suspend`
    /// hands control back here (spec §4.4: "`suspend` context-swaps back to
    /// `last`").
    last: Mutex<Option<Thread>>,
    /// The thread that performed the *first* resume (spec §4.4: "the first
    /// `resume` also records `C.starter = K`"). On termination, control and
    /// any unhandled exception are forwarded here.
    starter: OnceLock<Thread>,
    unhandled: Mutex<Option<UnhandledException>>,
    cancellation: Cancellation,
    /// Set once, for the diagnostic a fatal `resume`-on-halted abort
    /// reports (spec §7: "all abort with a diagnostic including the
    /// offending task's name and address").
    name: Mutex<Option<String>>,
}

impl std::fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &*self.state.lock().unwrap())
            .finish_non_exhaustive()
    }
}

impl Coroutine {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::Start),
            body: Mutex::new(None),
            thread: OnceLock::new(),
            last: Mutex::new(None),
            starter: OnceLock::new(),
            unhandled: Mutex::new(None),
            cancellation: Cancellation::new(),
            name: Mutex::new(None),
        }
    }

    /// Attach a diagnostic name, used only in the fatal-abort message for
    /// `resume` on an already-halted coroutine. Set once by `Task::spawn`;
    /// purely cosmetic otherwise.
    pub fn set_name(&self, name: impl Into<String>) {
        *self.name.lock().unwrap() = Some(name.into());
    }

    /// Arm cancellation in the given mode. Idempotent; a later call
    /// overwrites the mode of an earlier one.
    pub fn enable_cancellation(&self, kind: CancellationType) {
        *self.cancellation.kind.lock().unwrap() = kind;
        self.cancellation.enabled.store(true, Ordering::SeqCst);
    }

    pub fn disable_cancellation(&self) {
        self.cancellation.enabled.store(false, Ordering::SeqCst);
    }

    pub fn cancellation_kind(&self) -> CancellationType {
        *self.cancellation.kind.lock().unwrap()
    }

    /// Request cancellation. A no-op if cancellation is not enabled or is
    /// already in progress — spec §3's `cancelled?`/`in-progress?` pair.
    pub fn request_cancellation(&self) {
        if self.cancellation.enabled.load(Ordering::SeqCst) {
            self.cancellation.requested.store(true, Ordering::SeqCst);
        }
    }

    pub fn cancellation_requested(&self) -> bool {
        self.cancellation.requested.load(Ordering::SeqCst)
    }

    /// A poll point (spec §4.4): if cancellation is enabled and has been
    /// requested, unwind the coroutine's own stack with `UnwindStack`,
    /// caught by its invoker (`ensure_started`) to run destructors and
    /// terminate the coroutine cleanly rather than recording an
    /// `UnhandledException`. Called by the body itself under `Poll` mode,
    /// and by this crate's own poll points (a serial instance's `enter`/
    /// `leave`) under either mode.
    ///
    /// A no-op if cancellation was never requested, or is already in
    /// progress (so a poll point reached while already unwinding for
    /// cancellation does not re-enter the unwind).
    pub fn cancellation_point(&self) {
        if !self.cancellation.enabled.load(Ordering::SeqCst) {
            return;
        }
        if !self.cancellation.requested.load(Ordering::SeqCst) {
            return;
        }
        if self
            .cancellation
            .in_progress
            .swap(true, Ordering::SeqCst)
        {
            return;
        }
        std::panic::panic_any(UnwindStack);
    }

    /// Construct a coroutine with its entry point already installed.
    pub fn with_body(body: impl FnOnce() + Send + 'static) -> Self {
        let co = Self::new();
        co.set_body(body);
        co
    }

    /// Install (or replace) this coroutine's entry point. Must happen
    /// before the first `resume` — there is no way to change a running or
    /// halted coroutine's body.
    pub fn set_body(&self, body: impl FnOnce() + Send + 'static) {
        *self.body.lock().unwrap() = Some(Box::new(body));
    }

    pub fn state(&self) -> State {
        *self.state.lock().unwrap()
    }

    /// Spawn the backing thread, lazily, on first resume, running whatever
    /// body was installed via `set_body`/`with_body`. An unhandled panic is
    /// captured and forwarded to the starter.
    fn ensure_started(self: &std::sync::Arc<Self>) {
        let mut state = self.state.lock().unwrap();
        if *state != State::Start {
            return;
        }
        *state = State::Active;
        drop(state);

        let body = self
            .body
            .lock()
            .unwrap()
            .take()
            .expect("coroutine resumed before a body was installed");
        let this = std::sync::Arc::clone(self);
        let handle = thread::Builder::new()
            .spawn(move || {
                // Wait for the first resume's unpark; this races the
                // spawning thread's own `resume()`, but std's park/unpark
                // token makes the race benign (an unpark before park just
                // makes the subsequent park a no-op).
                thread::park();
                let result = catch_unwind(AssertUnwindSafe(body));
                if let Err(payload) = result {
                    if !payload.is::<UnwindStack>() {
                        let message = panic_message(&payload);
                        *this.unhandled.lock().unwrap() = Some(UnhandledException { message });
                    }
                    // An `UnwindStack` payload is cancellation unwinding
                    // through the invoker: destructors along the body's
                    // stack already ran as part of `catch_unwind`'s own
                    // unwind, so the coroutine terminates cleanly here.
                }
                *this.state.lock().unwrap() = State::Halt;
                if let Some(starter) = this.starter.get() {
                    starter.unpark();
                }
            })
            .expect("failed to spawn coroutine thread");
        let _ = self.thread.set(handle.thread().clone());
        // Detach: the coroutine communicates completion via `starter`, not
        // via `JoinHandle::join`.
        std::mem::forget(handle);
    }

    /// Resume this coroutine from the calling thread `K`. Blocks `K` until
    /// this coroutine suspends (or terminates) and hands control back.
    pub fn resume(self: &std::sync::Arc<Self>) -> Result<(), CoroutineFailure> {
        {
            let state = self.state.lock().unwrap();
            if *state == State::Halt {
                let name = self
                    .name
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| "<unnamed>".to_string());
                panic!(
                    "resume on halted coroutine {name:?} ({:p}): fatal per spec §7",
                    std::sync::Arc::as_ptr(self)
                );
            }
        }

        let caller = thread::current();
        self.ensure_started();
        let _ = self.starter.set(caller.clone());
        *self.last.lock().unwrap() = Some(caller);
        {
            let mut state = self.state.lock().unwrap();
            if *state != State::Halt {
                *state = State::Active;
            }
        }

        self.thread
            .get()
            .expect("coroutine thread not started")
            .unpark();
        thread::park();

        if let Some(e) = self.unhandled.lock().unwrap().take() {
            return Err(CoroutineFailure::UnhandledException(e));
        }
        Ok(())
    }

    /// Suspend the currently running coroutine, handing control back to
    /// its last resumer. Must be called from this coroutine's own thread.
    pub fn suspend(&self) {
        *self.state.lock().unwrap() = State::Inactive;
        let last = self
            .last
            .lock()
            .unwrap()
            .clone()
            .expect("suspend called before any resume");
        last.unpark();
        thread::park();
        *self.state.lock().unwrap() = State::Active;
    }
}

impl Default for Coroutine {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
