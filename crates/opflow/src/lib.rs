//! # opflow
//!
//! Asynchronous completion primitives for server runtimes: one-shot
//! completion contracts, cooperative abort with cause accumulation, and
//! stack-safe iteration over asynchronous sub-steps.
//!
//! This crate is platform-agnostic and uses no OS-specific code; it is
//! the completion substrate that protocol and I/O layers build on.
//!
//! ## Modules
//!
//! - `invoke` - blocking/non-blocking classification of callbacks
//! - `cause` - failure cause with suppressed-cause accumulation
//! - `completion` - one-shot completion contract and combinators
//! - `promise` - bridging completions to waiters and futures
//! - `stepper` - stepped iteration over asynchronous sub-operations
//! - `spinlock` - internal spinlock primitive

#![allow(dead_code)]

pub mod cause;
pub mod completion;
pub mod invoke;
pub mod promise;
pub mod spinlock;
pub mod stepper;

// Re-exports for convenience
pub use cause::Cause;
pub use completion::{Completion, CompletionCell, HookedCompletion, SharedCompletion};
pub use invoke::{Invocable, InvokeKind};
pub use promise::Promise;
pub use spinlock::SpinLock;
pub use stepper::{Step, StepLoop, Steps};
