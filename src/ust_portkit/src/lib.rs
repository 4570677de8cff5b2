//! Low-level, allocation-light utilities shared by `ust_kernel`.
//!
//! **This crate is exempt from the API stability guarantee** the top-level
//! runtime otherwise tries to hold, matching the disclaimer `r3_portkit`
//! carries on its own `r3_portkit`/internal `r3_kernel` modules — these
//! types are implementation details that happen to live in their own crate
//! for compilation-unit hygiene, not a supported public API.

pub mod accept_mask;
pub mod priority_queue;
pub mod spinlock;
pub mod timeout_heap;

pub use accept_mask::AcceptMask;
pub use priority_queue::PriorityFifoQueue;
pub use spinlock::{SpinLock, SpinLockGuard};
pub use timeout_heap::{TimeoutHeap, TimeoutId};
