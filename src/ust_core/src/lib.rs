//! Shared types for the `ust` task-and-monitor runtime.
//!
//! This crate has no dependency on the scheduler itself: it only defines the
//! vocabulary (`Priority`, the `KernelFailure` error hierarchy, `Config`)
//! that both application code and `ust_kernel` need to agree on.

mod config;
mod error;
mod priority;

pub use config::Config;
pub use error::{
    CoroutineFailure, EntryFailure, IoFailure, KernelFailure, MutexFailure, RendezvousFailure,
    UnhandledException, WaitingFailure,
};
pub use priority::Priority;
