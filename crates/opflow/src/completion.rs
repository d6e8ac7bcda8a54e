//! Exactly-once completion contracts for asynchronous operations
//!
//! Any party holding a [`Completion`] must eventually call exactly one of
//! `succeeded()` or `failed()`, or call `abort()` before either. The state
//! cell serializes every race between those calls: whatever the
//! interleaving, exactly one terminal hook sequence runs.
//!
//! Deep wrapper hierarchies are avoided on purpose. There is one stateful
//! implementation ([`HookedCompletion`]) plus a small closed set of
//! composition functions ([`then`], [`before`], [`combine`], [`fail_with`])
//! that all return the same opaque contract type.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};

use crate::cause::{run_captured, Cause};
use crate::invoke::{Invocable, InvokeKind};
use crate::spinlock::SpinLock;

/// The completion-notification contract for one unit of asynchronous work.
///
/// All methods are callable from any thread. Calls after a terminal
/// transition are no-ops that retain the extra cause as diagnostics.
pub trait Completion: Invocable + Send + Sync {
    /// Report that the operation completed successfully.
    fn succeeded(&self);

    /// Report that the operation failed with `cause`.
    fn failed(&self, cause: Cause);

    /// Request cancellation before the operation completes.
    ///
    /// Returns `true` iff this call is the first abort and precedes any
    /// terminal transition. The operation must still call `succeeded()` or
    /// `failed()`; abort only forces the eventual outcome to failure.
    fn abort(&self, cause: Cause) -> bool {
        self.failed(cause);
        true
    }
}

/// Shared handle to a completion contract.
pub type SharedCompletion = Arc<dyn Completion>;

/// State of a completion cell.
enum CellState {
    /// Untouched.
    Pending,

    /// Abort recorded; terminal transition still owed by the operation.
    AbortPending(Cause),

    /// Terminal success.
    Success,

    /// Terminal failure with the recorded cause.
    Failure(Cause),
}

struct Cell {
    state: CellState,
    aborted: bool,
}

/// Outcome of a `succeeded()` attempt on the cell.
enum SucceedTx {
    /// This call won the terminal transition; success hooks may run.
    Success,
    /// An abort was pending; this call performs the failure transition.
    CompleteAborted(Cause),
    /// Already terminal.
    Stale,
}

/// Outcome of a `failed()` attempt on the cell.
enum FailTx {
    /// This call won the terminal transition; full failure sequence runs.
    Failure(Cause),
    /// An abort was pending; its cause wins, the new one is folded in.
    CompleteAborted(Cause),
    /// Already terminal; cause retained as diagnostics.
    Stale,
}

/// The atomically-updated `(cause, completed)` cell at the heart of every
/// stateful completion.
///
/// Transitions happen in short critical sections under a spinlock; hooks
/// always run after the lock is released, so a hook may re-enter the same
/// completion without deadlocking.
pub struct CompletionCell {
    cell: SpinLock<Cell>,
}

impl CompletionCell {
    pub const fn new() -> Self {
        CompletionCell {
            cell: SpinLock::new(Cell {
                state: CellState::Pending,
                aborted: false,
            }),
        }
    }

    fn try_succeed(&self) -> SucceedTx {
        let mut cell = self.cell.lock();
        match &cell.state {
            CellState::Pending => {
                cell.state = CellState::Success;
                SucceedTx::Success
            }
            CellState::AbortPending(cause) => {
                let cause = cause.clone();
                cell.state = CellState::Failure(cause.clone());
                SucceedTx::CompleteAborted(cause)
            }
            _ => SucceedTx::Stale,
        }
    }

    fn try_fail(&self, cause: Cause) -> FailTx {
        let mut cell = self.cell.lock();
        match &cell.state {
            CellState::Pending => {
                cell.state = CellState::Failure(cause.clone());
                FailTx::Failure(cause)
            }
            CellState::AbortPending(abort_cause) => {
                abort_cause.attach(cause);
                let abort_cause = abort_cause.clone();
                cell.state = CellState::Failure(abort_cause.clone());
                FailTx::CompleteAborted(abort_cause)
            }
            CellState::Failure(recorded) => {
                recorded.attach(cause);
                FailTx::Stale
            }
            CellState::Success => FailTx::Stale,
        }
    }

    fn try_abort(&self, cause: Cause) -> Option<Cause> {
        let mut cell = self.cell.lock();
        match &cell.state {
            CellState::Pending => {
                cell.state = CellState::AbortPending(cause.clone());
                cell.aborted = true;
                Some(cause)
            }
            CellState::AbortPending(recorded) | CellState::Failure(recorded) => {
                recorded.attach(cause);
                None
            }
            CellState::Success => None,
        }
    }

    /// Replace a just-claimed success with a failure. Used when a success
    /// hook panics, converting the observable outcome to failure.
    fn demote_success(&self, cause: Cause) {
        let mut cell = self.cell.lock();
        if matches!(cell.state, CellState::Success) {
            cell.state = CellState::Failure(cause);
        }
    }

    /// True once the cell has reached terminal success.
    pub fn is_succeeded(&self) -> bool {
        matches!(self.cell.lock().state, CellState::Success)
    }

    /// True once the cell has reached terminal failure.
    pub fn is_failed(&self) -> bool {
        matches!(self.cell.lock().state, CellState::Failure(_))
    }

    /// True if an abort was ever accepted, pending or already terminal.
    pub fn is_aborted(&self) -> bool {
        self.cell.lock().aborted
    }

    /// True once a terminal transition has happened.
    pub fn is_completed(&self) -> bool {
        matches!(
            self.cell.lock().state,
            CellState::Success | CellState::Failure(_)
        )
    }

    /// The recorded failure or abort cause, if any.
    pub fn failure(&self) -> Option<Cause> {
        match &self.cell.lock().state {
            CellState::AbortPending(cause) | CellState::Failure(cause) => Some(cause.clone()),
            _ => None,
        }
    }
}

impl Default for CompletionCell {
    fn default() -> Self {
        CompletionCell::new()
    }
}

type RunHook = Box<dyn Fn() + Send + Sync>;
type CauseHook = Box<dyn Fn(&Cause) + Send + Sync>;

#[derive(Default)]
struct Hooks {
    /// Succeeded and never aborted; runs before `on_completed`.
    on_success: Option<RunHook>,

    /// Abort accepted; runs before `on_failure`, terminal hooks deferred.
    on_abort: Option<CauseHook>,

    /// First failure signal (abort or failed), possibly before terminal.
    on_failure: Option<CauseHook>,

    /// Terminal failure; runs before `on_completed`.
    on_complete_failure: Option<CauseHook>,

    /// Always runs last, exactly once, on either outcome.
    on_completed: Option<RunHook>,
}

fn fire(hook: &Option<RunHook>) -> Option<Cause> {
    hook.as_ref().and_then(|h| run_captured(|| h()))
}

fn fire_cause(hook: &Option<CauseHook>, cause: &Cause) -> Option<Cause> {
    hook.as_ref().and_then(|h| run_captured(|| h(cause)))
}

/// The stateful completion: a [`CompletionCell`] plus optional hooks.
///
/// Hook ordering per outcome:
/// - success: `on_success`, then `on_completed`;
/// - failure: `on_failure`, `on_complete_failure`, then `on_completed`;
/// - abort: `on_abort` then `on_failure` at abort time; the terminal
///   `on_complete_failure` and `on_completed` wait for the operation's own
///   `succeeded()`/`failed()` call.
///
/// A panicking hook never skips the rest of the sequence; the panic is
/// folded into the in-flight cause (and converts a success into a failure).
pub struct HookedCompletion {
    cell: CompletionCell,
    kind: InvokeKind,
    hooks: Hooks,
}

impl HookedCompletion {
    fn new(kind: InvokeKind, hooks: Hooks) -> Arc<Self> {
        Arc::new(HookedCompletion {
            cell: CompletionCell::new(),
            kind,
            hooks,
        })
    }

    pub fn is_succeeded(&self) -> bool {
        self.cell.is_succeeded()
    }

    pub fn is_failed(&self) -> bool {
        self.cell.is_failed()
    }

    pub fn is_aborted(&self) -> bool {
        self.cell.is_aborted()
    }

    pub fn is_completed(&self) -> bool {
        self.cell.is_completed()
    }

    /// The recorded failure or abort cause, if any.
    pub fn failure(&self) -> Option<Cause> {
        self.cell.failure()
    }

    fn complete_failure(&self, cause: Cause) {
        if let Some(p) = fire_cause(&self.hooks.on_complete_failure, &cause) {
            cause.attach(p);
        }
        if let Some(p) = fire(&self.hooks.on_completed) {
            cause.attach(p);
        }
    }
}

impl Invocable for HookedCompletion {
    fn invoke_kind(&self) -> InvokeKind {
        self.kind
    }
}

impl Completion for HookedCompletion {
    fn succeeded(&self) {
        match self.cell.try_succeed() {
            SucceedTx::Success => {
                if let Some(panic_cause) = fire(&self.hooks.on_success) {
                    // A success hook blew up: the observable outcome becomes
                    // a failure, the completed hook still runs.
                    self.cell.demote_success(panic_cause.clone());
                    self.complete_failure(panic_cause);
                } else if let Some(panic_cause) = fire(&self.hooks.on_completed) {
                    self.cell.demote_success(panic_cause);
                }
            }
            SucceedTx::CompleteAborted(cause) => self.complete_failure(cause),
            SucceedTx::Stale => {}
        }
    }

    fn failed(&self, cause: Cause) {
        match self.cell.try_fail(cause) {
            FailTx::Failure(cause) => {
                if let Some(p) = fire_cause(&self.hooks.on_failure, &cause) {
                    cause.attach(p);
                }
                self.complete_failure(cause);
            }
            FailTx::CompleteAborted(cause) => self.complete_failure(cause),
            FailTx::Stale => {}
        }
    }

    fn abort(&self, cause: Cause) -> bool {
        match self.cell.try_abort(cause) {
            Some(cause) => {
                if let Some(p) = fire_cause(&self.hooks.on_abort, &cause) {
                    cause.attach(p);
                }
                if let Some(p) = fire_cause(&self.hooks.on_failure, &cause) {
                    cause.attach(p);
                }
                true
            }
            None => false,
        }
    }
}

/// Completion from a pair of success/failure closures; classified
/// `Blocking`, the safe default.
pub fn from_fns(
    success: impl Fn() + Send + Sync + 'static,
    failure: impl Fn(&Cause) + Send + Sync + 'static,
) -> Arc<HookedCompletion> {
    from_kind_fns(InvokeKind::Blocking, success, failure)
}

/// Completion from success/failure closures with an explicit
/// classification.
pub fn from_kind_fns(
    kind: InvokeKind,
    success: impl Fn() + Send + Sync + 'static,
    failure: impl Fn(&Cause) + Send + Sync + 'static,
) -> Arc<HookedCompletion> {
    HookedCompletion::new(
        kind,
        Hooks {
            on_success: Some(Box::new(success)),
            on_complete_failure: Some(Box::new(failure)),
            ..Hooks::default()
        },
    )
}

/// Completion that runs `completed` exactly once on either outcome.
pub fn always(completed: impl Fn() + Send + Sync + 'static) -> Arc<HookedCompletion> {
    always_with_kind(InvokeKind::Blocking, completed)
}

/// Like [`always`], with an explicit classification.
pub fn always_with_kind(
    kind: InvokeKind,
    completed: impl Fn() + Send + Sync + 'static,
) -> Arc<HookedCompletion> {
    HookedCompletion::new(
        kind,
        Hooks {
            on_completed: Some(Box::new(completed)),
            ..Hooks::default()
        },
    )
}

/// Nested completion: completes `inner`, then runs `after` exactly once.
pub fn then(
    inner: SharedCompletion,
    after: impl Fn() + Send + Sync + 'static,
) -> Arc<HookedCompletion> {
    let kind = inner.invoke_kind();
    let on_success = {
        let inner = Arc::clone(&inner);
        move || inner.succeeded()
    };
    let on_complete_failure = {
        let inner = Arc::clone(&inner);
        move |cause: &Cause| inner.failed(cause.clone())
    };
    let on_abort = move |cause: &Cause| {
        inner.abort(cause.clone());
    };
    HookedCompletion::new(
        kind,
        Hooks {
            on_success: Some(Box::new(on_success)),
            on_abort: Some(Box::new(on_abort)),
            on_complete_failure: Some(Box::new(on_complete_failure)),
            on_completed: Some(Box::new(after)),
            ..Hooks::default()
        },
    )
}

struct Prefixed {
    prelude: RunHook,
    inner: SharedCompletion,
}

impl Invocable for Prefixed {
    fn invoke_kind(&self) -> InvokeKind {
        self.inner.invoke_kind()
    }
}

impl Completion for Prefixed {
    fn succeeded(&self) {
        match run_captured(|| (self.prelude)()) {
            None => self.inner.succeeded(),
            Some(cause) => self.inner.failed(cause),
        }
    }

    fn failed(&self, cause: Cause) {
        if let Some(p) = run_captured(|| (self.prelude)()) {
            cause.attach(p);
        }
        self.inner.failed(cause);
    }

    fn abort(&self, cause: Cause) -> bool {
        self.inner.abort(cause)
    }
}

/// Completion that runs `prelude` before completing `inner`.
///
/// A panic in `prelude` on the success path fails `inner` instead of
/// succeeding it; on the failure path it is attached to the cause.
pub fn before(
    prelude: impl Fn() + Send + Sync + 'static,
    inner: SharedCompletion,
) -> SharedCompletion {
    Arc::new(Prefixed {
        prelude: Box::new(prelude),
        inner,
    })
}

struct Both {
    first: SharedCompletion,
    second: SharedCompletion,
}

impl Invocable for Both {
    fn invoke_kind(&self) -> InvokeKind {
        InvokeKind::combine(self.first.invoke_kind(), self.second.invoke_kind())
    }
}

impl Completion for Both {
    fn succeeded(&self) {
        // The second completion must observe the outcome even if the first
        // one panics.
        let first = panic::catch_unwind(AssertUnwindSafe(|| self.first.succeeded()));
        self.second.succeeded();
        if let Err(payload) = first {
            panic::resume_unwind(payload);
        }
    }

    fn failed(&self, cause: Cause) {
        if let Some(p) = run_captured(|| self.first.failed(cause.clone())) {
            cause.attach(p);
        }
        self.second.failed(cause);
    }

    fn abort(&self, cause: Cause) -> bool {
        let first = self.first.abort(cause.clone());
        let second = self.second.abort(cause);
        first || second
    }
}

/// Completion driving two other completions together: both observe
/// success or failure, and the classification is the combine of both.
pub fn combine(first: SharedCompletion, second: SharedCompletion) -> SharedCompletion {
    Arc::new(Both { first, second })
}

struct AlwaysFail {
    inner: SharedCompletion,
    cause: Cause,
}

impl Invocable for AlwaysFail {
    fn invoke_kind(&self) -> InvokeKind {
        self.inner.invoke_kind()
    }
}

impl Completion for AlwaysFail {
    fn succeeded(&self) {
        self.inner.failed(self.cause.clone());
    }

    fn failed(&self, cause: Cause) {
        self.cause.attach(cause);
        self.inner.failed(self.cause.clone());
    }

    fn abort(&self, cause: Cause) -> bool {
        self.cause.attach(cause);
        self.inner.abort(self.cause.clone())
    }
}

/// Completion that fails `inner` with `cause` no matter how it is
/// completed; any other signal is folded into `cause` as a suppressed
/// secondary cause.
pub fn fail_with(inner: SharedCompletion, cause: Cause) -> SharedCompletion {
    Arc::new(AlwaysFail { inner, cause })
}

/// The no-op completion.
pub struct Noop;

impl Invocable for Noop {
    fn invoke_kind(&self) -> InvokeKind {
        InvokeKind::NonBlocking
    }
}

impl Completion for Noop {
    fn succeeded(&self) {}

    fn failed(&self, _cause: Cause) {}
}

/// The process-wide no-op completion instance.
pub static NOOP: Noop = Noop;

/// Shared handle to the process-wide no-op completion. The instance is
/// created once and cloned thereafter, never rebuilt per call.
pub fn noop() -> SharedCompletion {
    static SHARED: OnceLock<Arc<Noop>> = OnceLock::new();
    SHARED.get_or_init(|| Arc::new(Noop)).clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    fn counted() -> (Arc<HookedCompletion>, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let successes = Arc::new(AtomicUsize::new(0));
        let failures = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&successes);
        let f = Arc::clone(&failures);
        let completion = from_fns(
            move || {
                s.fetch_add(1, Ordering::SeqCst);
            },
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );
        (completion, successes, failures)
    }

    #[test]
    fn test_success_then_duplicates_ignored() {
        let (c, successes, failures) = counted();

        c.succeeded();
        c.succeeded();
        c.failed(Cause::new("late"));

        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert!(c.is_succeeded());
        assert!(c.is_completed());
    }

    #[test]
    fn test_failure_exactly_once() {
        let (c, successes, failures) = counted();

        c.failed(Cause::new("boom"));
        c.failed(Cause::new("boom again"));
        c.succeeded();

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(c.is_failed());
        // The duplicate cause is retained, not dropped.
        assert_eq!(c.failure().unwrap().suppressed().len(), 1);
    }

    #[test]
    fn test_abort_converts_success_to_failure() {
        let (c, successes, failures) = counted();
        let cause = Cause::new("cancelled by peer");

        assert!(c.abort(cause.clone()));
        assert!(c.is_aborted());
        // Terminal hooks are deferred until the owed completion call.
        assert_eq!(failures.load(Ordering::SeqCst), 0);
        assert!(!c.is_completed());

        c.succeeded();

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(c.failure().unwrap().same_as(&cause));
    }

    #[test]
    fn test_second_abort_refused() {
        let (c, _successes, _failures) = counted();
        let first = Cause::new("first");

        assert!(c.abort(first.clone()));
        assert!(!c.abort(Cause::new("second")));
        // The refused cause is attached to the accepted one.
        assert_eq!(first.suppressed().len(), 1);

        c.failed(Cause::new("third"));
        assert!(!c.abort(Cause::new("fourth")));
        assert_eq!(first.suppressed().len(), 3);
    }

    #[test]
    fn test_abort_then_failed_folds_causes() {
        let (c, _successes, failures) = counted();
        let abort_cause = Cause::new("abort");

        assert!(c.abort(abort_cause.clone()));
        c.failed(Cause::new("io error"));

        assert_eq!(failures.load(Ordering::SeqCst), 1);
        let reported = c.failure().unwrap();
        assert!(reported.same_as(&abort_cause));
        assert_eq!(reported.suppressed().len(), 1);
    }

    #[test]
    fn test_abort_after_success_returns_false() {
        let (c, _successes, _failures) = counted();
        c.succeeded();
        assert!(!c.abort(Cause::new("too late")));
        assert!(!c.is_aborted());
    }

    #[test]
    fn test_exactly_once_under_contention() {
        for _ in 0..50 {
            let (c, successes, failures) = counted();
            let barrier = Arc::new(Barrier::new(8));

            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let c = Arc::clone(&c);
                    let barrier = Arc::clone(&barrier);
                    thread::spawn(move || {
                        barrier.wait();
                        if i % 2 == 0 {
                            c.succeeded();
                        } else {
                            c.failed(Cause::new("contended"));
                        }
                    })
                })
                .collect();
            for h in handles {
                h.join().unwrap();
            }

            let total =
                successes.load(Ordering::SeqCst) + failures.load(Ordering::SeqCst);
            assert_eq!(total, 1);
            assert!(c.is_completed());
        }
    }

    #[test]
    fn test_always_runs_on_both_outcomes() {
        let count = Arc::new(AtomicUsize::new(0));

        let n = Arc::clone(&count);
        let c = always(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });
        c.succeeded();
        c.succeeded();
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let n = Arc::clone(&count);
        let c = always(move || {
            n.fetch_add(1, Ordering::SeqCst);
        });
        c.failed(Cause::new("boom"));
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_then_runs_after_inner() {
        let order = Arc::new(SpinLock::new(Vec::new()));

        let o = Arc::clone(&order);
        let inner = from_fns(
            move || o.lock().push("inner"),
            |_| {},
        );
        let o = Arc::clone(&order);
        let outer = then(inner, move || o.lock().push("after"));

        outer.succeeded();
        assert_eq!(*order.lock(), vec!["inner", "after"]);
    }

    #[test]
    fn test_then_propagates_failure_and_abort() {
        let (inner, _successes, failures) = counted();
        let after = Arc::new(AtomicUsize::new(0));

        let n = Arc::clone(&after);
        let outer = then(inner.clone(), move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        assert!(outer.abort(Cause::new("stop")));
        assert!(inner.is_aborted());
        assert_eq!(after.load(Ordering::SeqCst), 0);

        outer.succeeded();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_before_panic_fails_inner() {
        let (inner, successes, failures) = counted();
        let c = before(|| panic!("prelude exploded"), inner);

        c.succeeded();

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_before_runs_prelude_then_inner() {
        let order = Arc::new(SpinLock::new(Vec::new()));

        let o = Arc::clone(&order);
        let inner = from_fns(
            move || o.lock().push("inner"),
            |_| {},
        );
        let o = Arc::clone(&order);
        let c = before(move || o.lock().push("prelude"), inner);

        c.succeeded();
        assert_eq!(*order.lock(), vec!["prelude", "inner"]);
    }

    #[test]
    fn test_combine_drives_both() {
        let (a, a_success, _) = counted();
        let (b, b_success, _) = counted();

        let c = combine(a, b);
        c.succeeded();

        assert_eq!(a_success.load(Ordering::SeqCst), 1);
        assert_eq!(b_success.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_combine_kind_is_stricter() {
        let fast = always_with_kind(InvokeKind::NonBlocking, || {});
        let slow = always_with_kind(InvokeKind::Blocking, || {});
        assert_eq!(
            combine(fast.clone(), fast.clone()).invoke_kind(),
            InvokeKind::NonBlocking
        );
        assert_eq!(combine(fast, slow).invoke_kind(), InvokeKind::Blocking);
    }

    #[test]
    fn test_combine_abort_reaches_both() {
        let (a, _, a_fail) = counted();
        let (b, _, b_fail) = counted();

        let c = combine(a.clone(), b.clone());
        assert!(c.abort(Cause::new("stop")));
        assert!(a.is_aborted());
        assert!(b.is_aborted());

        c.failed(Cause::new("late"));
        assert_eq!(a_fail.load(Ordering::SeqCst), 1);
        assert_eq!(b_fail.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_fail_with_overrides_success() {
        let (inner, successes, failures) = counted();
        let cause = Cause::new("mandated failure");

        let c = fail_with(inner.clone(), cause.clone());
        c.succeeded();

        assert_eq!(successes.load(Ordering::SeqCst), 0);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert!(inner.failure().unwrap().same_as(&cause));
    }

    #[test]
    fn test_fail_with_folds_reported_cause() {
        let (inner, _, _) = counted();
        let cause = Cause::new("mandated failure");

        let c = fail_with(inner, cause.clone());
        c.failed(Cause::new("actual"));

        assert_eq!(cause.suppressed().len(), 1);
    }

    #[test]
    fn test_success_hook_panic_converts_to_failure() {
        let failures = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&failures);
        let inner = from_fns(
            || panic!("success hook exploded"),
            move |_| {
                f.fetch_add(1, Ordering::SeqCst);
            },
        );
        let n = Arc::clone(&completed);
        let c = then(inner.clone(), move || {
            n.fetch_add(1, Ordering::SeqCst);
        });

        c.succeeded();

        // then() saw the inner completion fail, and still ran its
        // completed hook exactly once.
        assert!(inner.is_failed());
        assert_eq!(failures.load(Ordering::SeqCst), 1);
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_noop_is_singleton() {
        let a = noop();
        let b = noop();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.invoke_kind(), InvokeKind::NonBlocking);
        a.succeeded();
        assert!(b.abort(Cause::new("ignored")));
    }
}
