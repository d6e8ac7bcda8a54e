//! Stepped iteration: a flat loop over asynchronous sub-steps
//!
//! A [`StepLoop`] drives a sequence of asynchronous steps as one logical
//! operation. The task's step function runs at most once per turn, on
//! exactly one thread at a time; completion signals that arrive while the
//! step is still executing are recorded and consumed by the same loop
//! frame instead of recursing, so a long chain of synchronously-completing
//! steps runs in constant stack space.
//!
//! The loop itself implements [`Completion`], which is how a step hands
//! "itself" to an asynchronous sub-operation: call [`StepLoop::handle`]
//! and pass the result as the sub-operation's completion.

use std::sync::{Arc, Weak};

use crate::cause::{run_captured, Cause};
use crate::completion::Completion;
use crate::invoke::{Invocable, InvokeKind};
use crate::spinlock::SpinLock;

/// Verdict returned by a step function for one turn of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The whole sequence is complete, successfully, with nothing left
    /// in flight.
    Done,

    /// The step started an asynchronous sub-operation that will call
    /// `succeeded()`/`failed()` on the loop later - possibly before the
    /// step function even returns.
    Pending,

    /// No work is available; the loop parks until an external
    /// [`StepLoop::iterate`] call.
    Idle,
}

/// Loop state. Only one thread at a time may be "the iterator"; the
/// `Processing`/`Called` pair acts as a single-slot reentrancy lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    /// No step running; iteration can be (re)started.
    Idle,

    /// The step function is executing on some thread.
    Processing,

    /// A completion signal arrived while `Processing`; the loop frame
    /// consumes it on its own stack.
    Called,

    /// A step returned `Pending` without its sub-operation completing;
    /// only that completion resumes the loop.
    Waiting,

    /// Terminal success.
    Succeeded,

    /// Terminal failure.
    Failed,

    /// Externally terminated.
    Closed,
}

/// The task driven by a [`StepLoop`]: one step function plus optional
/// terminal hooks.
///
/// Hooks are never invoked concurrently with `step()`; the loop defers
/// them until the in-flight step has returned.
pub trait Steps: Send {
    /// Execute one step. Returning `Err` is identical to `failed(cause)`
    /// being invoked on behalf of this step.
    fn step(&mut self, flow: &StepLoop) -> Result<Step, Cause>;

    /// The whole iteration completed successfully.
    fn on_success(&mut self) {}

    /// The iteration failed or was closed; receives the recorded cause.
    fn on_failure(&mut self, _cause: &Cause) {}

    /// An abort was accepted; fired before `on_failure`, useful for early
    /// resource release without double-freeing.
    fn on_abort(&mut self, _cause: &Cause) {}
}

/// Abort or close recorded while a step was in flight; the terminal
/// failure hooks wait until that step returns.
struct PendingFailure {
    cause: Cause,
    close: bool,
}

struct Inner {
    state: LoopState,
    /// Completion signal recorded while `Processing`.
    called: Option<Result<(), Cause>>,
    /// Deferred abort/close.
    pending: Option<PendingFailure>,
    aborted: bool,
    closed: bool,
    /// Cause retained once terminal, for diagnostics and late signals.
    terminal: Option<Cause>,
}

/// Decision taken by the loop frame after one step returns.
enum Next {
    Continue,
    Wait,
    Park,
    Succeed,
    Fail { cause: Cause, notify_abort: bool },
}

/// Drives a [`Steps`] task as a single logical asynchronous operation.
pub struct StepLoop {
    inner: SpinLock<Inner>,
    task: SpinLock<Box<dyn Steps>>,
    kind: InvokeKind,
    self_ref: Weak<StepLoop>,
}

impl StepLoop {
    /// Create a loop over `task`, classified `Blocking`.
    pub fn new(task: impl Steps + 'static) -> Arc<Self> {
        Self::with_kind(InvokeKind::Blocking, task)
    }

    /// Create a loop over `task` with an explicit classification.
    pub fn with_kind(kind: InvokeKind, task: impl Steps + 'static) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| StepLoop {
            inner: SpinLock::new(Inner {
                state: LoopState::Idle,
                called: None,
                pending: None,
                aborted: false,
                closed: false,
                terminal: None,
            }),
            task: SpinLock::new(Box::new(task)),
            kind,
            self_ref: self_ref.clone(),
        })
    }

    /// Create a loop from a bare step closure.
    pub fn from_fn(
        f: impl FnMut(&StepLoop) -> Result<Step, Cause> + Send + 'static,
    ) -> Arc<Self> {
        struct FnSteps<F>(F);
        impl<F: FnMut(&StepLoop) -> Result<Step, Cause> + Send> Steps for FnSteps<F> {
            fn step(&mut self, flow: &StepLoop) -> Result<Step, Cause> {
                (self.0)(flow)
            }
        }
        Self::new(FnSteps(f))
    }

    /// An owned handle to this loop, for handing to sub-operations as
    /// their completion.
    pub fn handle(&self) -> Arc<StepLoop> {
        self.self_ref
            .upgrade()
            .expect("StepLoop reached without a strong reference")
    }

    /// Request that the step function run.
    ///
    /// Safe to call from any thread and safe to call redundantly: a call
    /// while the loop is already processing, or waiting on an outstanding
    /// sub-operation, is a no-op.
    pub fn iterate(&self) {
        {
            let mut inner = self.inner.lock();
            match inner.state {
                LoopState::Idle => inner.state = LoopState::Processing,
                // Spurious while processing or waiting, or already
                // terminal.
                _ => return,
            }
        }
        self.process();
    }

    /// Externally terminate the iteration.
    ///
    /// If a step is in flight the terminal failure hooks wait for it to
    /// return; if the loop is parked it fails immediately. Always results
    /// in at most one failure completion.
    pub fn close(&self) {
        let fail_now = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            match inner.state {
                LoopState::Processing | LoopState::Called => {
                    match inner.pending.as_mut() {
                        Some(p) => {
                            p.cause.attach(closed_cause());
                            p.close = true;
                        }
                        None => {
                            inner.pending = Some(PendingFailure {
                                cause: closed_cause(),
                                close: true,
                            });
                        }
                    }
                    None
                }
                LoopState::Waiting | LoopState::Idle => {
                    let cause = closed_cause();
                    inner.state = LoopState::Closed;
                    inner.terminal = Some(cause.clone());
                    Some(cause)
                }
                _ => None,
            }
        };
        if let Some(cause) = fail_now {
            let mut task = self.task.lock();
            self.fail_hooks(&mut task, &cause, false);
        }
    }

    /// True while the loop is parked with no step in flight.
    pub fn is_idle(&self) -> bool {
        self.inner.lock().state == LoopState::Idle
    }

    /// True once the iteration reached terminal success.
    pub fn is_succeeded(&self) -> bool {
        self.inner.lock().state == LoopState::Succeeded
    }

    /// True once the iteration reached terminal failure (not close).
    pub fn is_failed(&self) -> bool {
        self.inner.lock().state == LoopState::Failed
    }

    /// True once `close()` has been requested.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// True once an abort has been accepted, terminal or not.
    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    /// The recorded failure cause, once terminal.
    pub fn failure(&self) -> Option<Cause> {
        self.inner.lock().terminal.clone()
    }

    /// The trampoline. Runs with `inner.state == Processing`, entered by
    /// exactly one thread at a time.
    fn process(&self) {
        let mut task = self.task.lock();
        loop {
            let verdict = task.step(self);

            let next = {
                let mut inner = self.inner.lock();
                let outcome = match inner.state {
                    LoopState::Called => inner.called.take(),
                    _ => None,
                };
                let pending = inner.pending.take();
                let notify_abort = inner.aborted;

                let next = match verdict {
                    Err(cause) => {
                        let cause = fold_pending(&pending, cause);
                        if let Some(Err(extra)) = outcome {
                            cause.attach(extra);
                        }
                        Next::Fail {
                            cause,
                            notify_abort,
                        }
                    }
                    Ok(Step::Done) => match (pending, outcome) {
                        (Some(p), _) => Next::Fail {
                            cause: p.cause,
                            notify_abort,
                        },
                        (None, Some(Err(cause))) => Next::Fail {
                            cause,
                            notify_abort,
                        },
                        (None, _) => Next::Succeed,
                    },
                    Ok(Step::Pending) => match (pending, outcome) {
                        (Some(p), outcome) => {
                            if let Some(Err(extra)) = outcome {
                                p.cause.attach(extra);
                            }
                            Next::Fail {
                                cause: p.cause,
                                notify_abort,
                            }
                        }
                        (None, Some(Ok(()))) => Next::Continue,
                        (None, Some(Err(cause))) => Next::Fail {
                            cause,
                            notify_abort,
                        },
                        (None, None) => Next::Wait,
                    },
                    Ok(Step::Idle) => match (pending, outcome) {
                        (Some(p), _) => Next::Fail {
                            cause: p.cause,
                            notify_abort,
                        },
                        (None, Some(Err(cause))) => Next::Fail {
                            cause,
                            notify_abort,
                        },
                        // A stray success signal with no work available is
                        // dropped; the loop parks as the step requested.
                        (None, _) => Next::Park,
                    },
                };

                match &next {
                    Next::Continue => inner.state = LoopState::Processing,
                    Next::Wait => inner.state = LoopState::Waiting,
                    Next::Park => inner.state = LoopState::Idle,
                    Next::Succeed => inner.state = LoopState::Succeeded,
                    Next::Fail { cause, .. } => {
                        inner.state = if inner.closed {
                            LoopState::Closed
                        } else {
                            LoopState::Failed
                        };
                        inner.terminal = Some(cause.clone());
                    }
                }
                next
            };

            match next {
                Next::Continue => continue,
                Next::Wait | Next::Park => return,
                Next::Succeed => {
                    if let Some(panic_cause) = run_captured(|| task.on_success()) {
                        self.inner.lock().terminal = Some(panic_cause);
                    }
                    return;
                }
                Next::Fail {
                    cause,
                    notify_abort,
                } => {
                    self.fail_hooks(&mut task, &cause, notify_abort);
                    return;
                }
            }
        }
    }

    /// Run the terminal failure hooks. Caller has already transitioned the
    /// state and holds the task lock, so these never race the step
    /// function.
    fn fail_hooks(&self, task: &mut Box<dyn Steps>, cause: &Cause, notify_abort: bool) {
        if notify_abort {
            if let Some(p) = run_captured(|| task.on_abort(cause)) {
                cause.attach(p);
            }
        }
        if let Some(p) = run_captured(|| task.on_failure(cause)) {
            cause.attach(p);
        }
    }

    fn fail_idle(&self, cause: Cause, notify_abort: bool) {
        let mut task = self.task.lock();
        self.fail_hooks(&mut task, &cause, notify_abort);
    }
}

fn fold_pending(pending: &Option<PendingFailure>, cause: Cause) -> Cause {
    match pending {
        Some(p) => {
            p.cause.attach(cause);
            p.cause.clone()
        }
        None => cause,
    }
}

fn closed_cause() -> Cause {
    Cause::new("stepped iteration closed")
}

impl Invocable for StepLoop {
    fn invoke_kind(&self) -> InvokeKind {
        self.kind
    }
}

impl Completion for StepLoop {
    /// The in-flight step's sub-operation completed successfully.
    ///
    /// Reentrant (same-thread) signals are recorded for the active loop
    /// frame; signals while parked resume the loop on this thread; signals
    /// after a terminal state are no-ops.
    fn succeeded(&self) {
        let resume = {
            let mut inner = self.inner.lock();
            match inner.state {
                LoopState::Processing => {
                    if inner.called.is_none() {
                        inner.called = Some(Ok(()));
                    }
                    inner.state = LoopState::Called;
                    false
                }
                LoopState::Called => false,
                LoopState::Waiting => {
                    inner.state = LoopState::Processing;
                    true
                }
                // A success with no sub-operation outstanding is a stray
                // signal; drop it.
                _ => false,
            }
        };
        if resume {
            self.process();
        }
    }

    /// The in-flight step's sub-operation failed.
    ///
    /// Same serialization as [`StepLoop::succeeded`]; on a terminal state
    /// the cause is retained as supplementary diagnostics.
    fn failed(&self, cause: Cause) {
        let fail_now = {
            let mut inner = self.inner.lock();
            match inner.state {
                LoopState::Processing | LoopState::Called => {
                    match &inner.called {
                        None | Some(Ok(())) => inner.called = Some(Err(cause)),
                        Some(Err(recorded)) => recorded.attach(cause),
                    }
                    inner.state = LoopState::Called;
                    None
                }
                LoopState::Waiting | LoopState::Idle => {
                    inner.state = if inner.closed {
                        LoopState::Closed
                    } else {
                        LoopState::Failed
                    };
                    inner.terminal = Some(cause.clone());
                    Some(cause)
                }
                _ => {
                    if let Some(terminal) = &inner.terminal {
                        terminal.attach(cause);
                    }
                    None
                }
            }
        };
        if let Some(cause) = fail_now {
            self.fail_idle(cause, false);
        }
    }

    /// Cooperatively cancel the iteration.
    ///
    /// While a step is in flight the abort is only recorded - the terminal
    /// failure hooks wait for the step to return, so a step aborting
    /// itself observes `is_aborted()` as true while its failure hook has
    /// demonstrably not run yet.
    fn abort(&self, cause: Cause) -> bool {
        let (accepted, fail_now) = {
            let mut inner = self.inner.lock();
            match inner.state {
                LoopState::Processing | LoopState::Called => match inner.pending.as_mut() {
                    Some(p) => {
                        p.cause.attach(cause);
                        (false, None)
                    }
                    None => {
                        inner.aborted = true;
                        inner.pending = Some(PendingFailure {
                            cause,
                            close: false,
                        });
                        (true, None)
                    }
                },
                LoopState::Waiting | LoopState::Idle => {
                    inner.aborted = true;
                    inner.state = LoopState::Failed;
                    inner.terminal = Some(cause.clone());
                    (true, Some(cause))
                }
                _ => {
                    if let Some(terminal) = &inner.terminal {
                        terminal.attach(cause);
                    }
                    (false, None)
                }
            }
        };
        if let Some(cause) = fail_now {
            self.fail_idle(cause, true);
        }
        accepted
    }
}
