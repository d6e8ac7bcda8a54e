//! Invocation classification for units of work
//!
//! A completion hook may run on a dispatch thread that must never block
//! (a selector loop, a reactor tick). Classifying work as blocking or
//! non-blocking lets the surrounding runtime pick an execution context
//! before invoking it.

use core::fmt;

/// Whether invoking a unit of work may block the calling thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InvokeKind {
    /// The work may block; do not run it on a dispatch thread.
    Blocking = 0,

    /// The work is guaranteed not to block the caller.
    NonBlocking = 1,
}

impl InvokeKind {
    /// Combine two classifications: the stricter requirement wins, so the
    /// result is `Blocking` if either operand may block.
    #[inline]
    pub const fn combine(a: InvokeKind, b: InvokeKind) -> InvokeKind {
        match (a, b) {
            (InvokeKind::NonBlocking, InvokeKind::NonBlocking) => InvokeKind::NonBlocking,
            _ => InvokeKind::Blocking,
        }
    }

    /// Check whether this classification permits blocking.
    #[inline]
    pub const fn is_blocking(&self) -> bool {
        matches!(self, InvokeKind::Blocking)
    }
}

impl Default for InvokeKind {
    /// The conservative answer for unclassified work.
    fn default() -> Self {
        InvokeKind::Blocking
    }
}

impl fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeKind::Blocking => write!(f, "BLOCKING"),
            InvokeKind::NonBlocking => write!(f, "NON_BLOCKING"),
        }
    }
}

/// A unit of work that reports its invocation classification.
pub trait Invocable {
    /// How invoking this work may affect the calling thread.
    ///
    /// Defaults to `Blocking`, the safe assumption.
    fn invoke_kind(&self) -> InvokeKind {
        InvokeKind::Blocking
    }
}
