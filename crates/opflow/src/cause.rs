//! Failure causes with suppressed-cause accumulation
//!
//! A completion may receive several failure signals over its lifetime:
//! an abort, a late duplicate `failed` call, a panicking hook. Exactly one
//! cause is delivered to the terminal failure hook; every other signal is
//! attached to it as a suppressed secondary cause so no diagnostic
//! information is dropped.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::spinlock::SpinLock;

/// One failure cause, shareable across threads.
///
/// `Cause` is a cheap clonable handle: clones refer to the same underlying
/// cause, so attaching a suppressed cause through one clone is visible
/// through all of them.
#[derive(Clone)]
pub struct Cause {
    inner: Arc<CauseInner>,
}

struct CauseInner {
    message: String,

    /// Wrapped error, if this cause was built from one.
    source: Option<Box<dyn Error + Send + Sync>>,

    /// True for causes created by a cancellation/abort with no explicit reason.
    cancelled: bool,

    /// Secondary causes folded in after the fact.
    suppressed: SpinLock<Vec<Cause>>,
}

impl Cause {
    /// Create a cause from a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self::build(message.into(), None, false)
    }

    /// Wrap an existing error as a cause.
    pub fn from_error(err: Box<dyn Error + Send + Sync>) -> Self {
        Self::build(err.to_string(), Some(err), false)
    }

    /// The normalized cause for an abort/cancel with no explicit reason.
    pub fn cancelled() -> Self {
        Self::build("cancelled".to_string(), None, true)
    }

    /// The normalized cause for a failure with no explicit reason.
    pub fn failure() -> Self {
        Self::build("failed".to_string(), None, false)
    }

    fn build(message: String, source: Option<Box<dyn Error + Send + Sync>>, cancelled: bool) -> Self {
        Cause {
            inner: Arc::new(CauseInner {
                message,
                source,
                cancelled,
                suppressed: SpinLock::new(Vec::new()),
            }),
        }
    }

    /// The primary message of this cause.
    pub fn message(&self) -> &str {
        &self.inner.message
    }

    /// Whether this cause originated from a cancellation/abort.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled
    }

    /// Whether two handles refer to the same underlying cause.
    pub fn same_as(&self, other: &Cause) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach `other` as a suppressed secondary cause.
    ///
    /// No-op if `other` is this cause itself or is already attached, so a
    /// cause cycling back through a completion never self-references.
    pub fn attach(&self, other: Cause) {
        if self.same_as(&other) {
            return;
        }
        let mut suppressed = self.inner.suppressed.lock();
        if suppressed.iter().any(|c| c.same_as(&other)) {
            return;
        }
        suppressed.push(other);
    }

    /// Snapshot of the suppressed secondary causes.
    pub fn suppressed(&self) -> Vec<Cause> {
        self.inner.suppressed.lock().clone()
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.message)
    }
}

impl fmt::Debug for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cause")
            .field("message", &self.inner.message)
            .field("cancelled", &self.inner.cancelled)
            .field("suppressed", &self.inner.suppressed.lock().len())
            .finish()
    }
}

impl Error for Cause {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner
            .source
            .as_deref()
            .map(|e| e as &(dyn Error + 'static))
    }
}

/// Run a hook, converting a panic into a `Cause`.
///
/// Used around caller-supplied hooks so that one misbehaving hook cannot
/// skip the rest of a completion sequence or crash a worker thread.
pub(crate) fn run_captured<F: FnOnce()>(f: F) -> Option<Cause> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(()) => None,
        Err(payload) => Some(panic_cause(&*payload)),
    }
}

fn panic_cause(payload: &(dyn std::any::Any + Send)) -> Cause {
    if let Some(s) = payload.downcast_ref::<&str>() {
        Cause::new(format!("hook panicked: {}", s))
    } else if let Some(s) = payload.downcast_ref::<String>() {
        Cause::new(format!("hook panicked: {}", s))
    } else {
        Cause::new("hook panicked")
    }
}
