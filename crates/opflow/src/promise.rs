//! Future-like handle bridging for completion contracts
//!
//! Some I/O layers want a handle they can wait on or `await`, not a hook
//! they register. [`Promise`] is that handle, and two one-directional
//! adapters bridge it to the completion contract:
//!
//! - [`from_promise`] turns a promise into a completion, so a completion-
//!   driven operation resolves the promise;
//! - [`completing`] builds a promise that, once resolved, drives an
//!   existing completion.
//!
//! Keeping the adapters separate avoids a single object with two
//! completion identities.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Condvar, Mutex};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use crate::cause::Cause;
use crate::completion::{Completion, SharedCompletion};
use crate::invoke::{Invocable, InvokeKind};

type ResolveFn = Box<dyn FnOnce(&Result<(), Cause>) + Send>;

struct PromiseState {
    result: Option<Result<(), Cause>>,
    wakers: Vec<Waker>,
    callbacks: Vec<ResolveFn>,
}

struct PromiseInner {
    state: Mutex<PromiseState>,
    resolved: Condvar,
}

/// A clonable handle to the eventual outcome of one unit of work.
///
/// Resolves exactly once; later `complete`/`fail`/`cancel` calls are no-ops
/// returning `false`. Supports blocking waits and `await`.
#[derive(Clone)]
pub struct Promise {
    inner: Arc<PromiseInner>,
}

impl Promise {
    pub fn new() -> Self {
        Promise {
            inner: Arc::new(PromiseInner {
                state: Mutex::new(PromiseState {
                    result: None,
                    wakers: Vec::new(),
                    callbacks: Vec::new(),
                }),
                resolved: Condvar::new(),
            }),
        }
    }

    /// Create a promise, hand it to `consumer`, and return it.
    pub fn with(consumer: impl FnOnce(&Promise)) -> Self {
        let promise = Promise::new();
        consumer(&promise);
        promise
    }

    /// Resolve successfully. Returns `true` iff this call resolved it.
    pub fn complete(&self) -> bool {
        self.resolve(Ok(()))
    }

    /// Resolve with a failure. Returns `true` iff this call resolved it.
    pub fn fail(&self, cause: Cause) -> bool {
        self.resolve(Err(cause))
    }

    /// Resolve with a cancellation cause. Returns `true` iff this call
    /// resolved it.
    pub fn cancel(&self) -> bool {
        self.resolve(Err(Cause::cancelled()))
    }

    fn resolve(&self, result: Result<(), Cause>) -> bool {
        let (wakers, callbacks, result) = {
            let mut state = match self.inner.state.lock() {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some(recorded) = &state.result {
                // Already resolved: fold the late cause into the recorded
                // one instead of dropping it.
                if let (Err(recorded), Err(late)) = (recorded, &result) {
                    recorded.attach(late.clone());
                }
                return false;
            }
            state.result = Some(result.clone());
            (
                std::mem::take(&mut state.wakers),
                std::mem::take(&mut state.callbacks),
                result,
            )
        };
        self.inner.resolved.notify_all();
        for waker in wakers {
            waker.wake();
        }
        for callback in callbacks {
            callback(&result);
        }
        true
    }

    /// Whether the promise has resolved.
    pub fn is_done(&self) -> bool {
        self.lock_state().result.is_some()
    }

    /// The outcome, if already resolved.
    pub fn try_result(&self) -> Option<Result<(), Cause>> {
        self.lock_state().result.clone()
    }

    /// Block until the promise resolves.
    pub fn wait(&self) -> Result<(), Cause> {
        let mut state = self.lock_state();
        loop {
            if let Some(result) = &state.result {
                return result.clone();
            }
            state = match self.inner.resolved.wait(state) {
                Ok(state) => state,
                Err(poisoned) => poisoned.into_inner(),
            };
        }
    }

    /// Block until the promise resolves or `timeout` elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), Cause>> {
        let deadline = std::time::Instant::now() + timeout;
        let mut state = self.lock_state();
        loop {
            if let Some(result) = &state.result {
                return Some(result.clone());
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return None;
            }
            state = match self.inner.resolved.wait_timeout(state, deadline - now) {
                Ok((state, _)) => state,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Run `f` with the outcome once resolved; immediately if already
    /// resolved.
    pub fn on_resolve(&self, f: impl FnOnce(&Result<(), Cause>) + Send + 'static) {
        let result = {
            let mut state = self.lock_state();
            match &state.result {
                Some(result) => result.clone(),
                None => {
                    state.callbacks.push(Box::new(f));
                    return;
                }
            }
        };
        f(&result);
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, PromiseState> {
        match self.inner.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Default for Promise {
    fn default() -> Self {
        Promise::new()
    }
}

impl Future for Promise {
    type Output = Result<(), Cause>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.lock_state();
        if let Some(result) = &state.result {
            return Poll::Ready(result.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(cx.waker())) {
            state.wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }
}

struct PromiseCompletion {
    promise: Promise,
    kind: InvokeKind,
}

impl Invocable for PromiseCompletion {
    fn invoke_kind(&self) -> InvokeKind {
        self.kind
    }
}

impl Completion for PromiseCompletion {
    fn succeeded(&self) {
        self.promise.complete();
    }

    fn failed(&self, cause: Cause) {
        self.promise.fail(cause);
    }

    fn abort(&self, cause: Cause) -> bool {
        self.promise.fail(cause)
    }
}

/// Completion whose outcome resolves `promise`. Classified `NonBlocking`:
/// resolving a promise only wakes waiters.
pub fn from_promise(promise: Promise) -> SharedCompletion {
    from_promise_with_kind(promise, InvokeKind::NonBlocking)
}

/// Like [`from_promise`] with an explicit classification, for promises
/// whose waiter callbacks may block.
pub fn from_promise_with_kind(promise: Promise, kind: InvokeKind) -> SharedCompletion {
    Arc::new(PromiseCompletion { promise, kind })
}

/// A promise that drives `inner` when resolved: completing the promise
/// succeeds `inner`, failing or cancelling it fails `inner`, and the
/// promise itself then reflects the outcome.
pub fn completing(inner: SharedCompletion) -> Promise {
    let promise = Promise::new();
    promise.on_resolve(move |result| match result {
        Ok(()) => inner.succeeded(),
        Err(cause) => inner.failed(cause.clone()),
    });
    promise
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::completion;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_resolve_once() {
        let p = Promise::new();
        assert!(p.complete());
        assert!(!p.complete());
        assert!(!p.fail(Cause::new("late")));
        assert!(matches!(p.try_result(), Some(Ok(()))));
    }

    #[test]
    fn test_late_cause_folded() {
        let p = Promise::new();
        let cause = Cause::new("first");
        assert!(p.fail(cause.clone()));
        assert!(!p.fail(Cause::new("second")));
        assert_eq!(cause.suppressed().len(), 1);
    }

    #[test]
    fn test_wait_cross_thread() {
        let p = Promise::new();
        let p2 = p.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            p2.complete();
        });
        assert!(p.wait().is_ok());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_timeout_expires() {
        let p = Promise::new();
        assert!(p.wait_timeout(Duration::from_millis(10)).is_none());
        p.cancel();
        let result = p.wait_timeout(Duration::from_millis(10)).unwrap();
        assert!(result.unwrap_err().is_cancelled());
    }

    #[test]
    fn test_on_resolve_after_resolution_runs_inline() {
        let p = Promise::new();
        p.complete();
        let ran = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&ran);
        p.on_resolve(move |r| {
            assert!(r.is_ok());
            n.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_on_resolve_before_resolution_is_deferred() {
        let p = Promise::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let n = Arc::clone(&ran);
        p.on_resolve(move |r| {
            assert!(r.is_err());
            n.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        p.fail(Cause::new("boom"));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_completion_resolves_promise() {
        let p = Promise::new();
        let c = from_promise(p.clone());

        assert_eq!(c.invoke_kind(), InvokeKind::NonBlocking);
        c.succeeded();
        assert!(matches!(p.try_result(), Some(Ok(()))));

        let p = Promise::new();
        let c = from_promise(p.clone());
        c.failed(Cause::new("io error"));
        assert!(p.try_result().unwrap().is_err());
    }

    #[test]
    fn test_abort_cancels_promise() {
        let p = Promise::new();
        let c = from_promise(p.clone());
        assert!(c.abort(Cause::cancelled()));
        assert!(p.try_result().unwrap().unwrap_err().is_cancelled());
        // Already resolved: a late abort reports false.
        assert!(!c.abort(Cause::new("again")));
    }

    #[test]
    fn test_completing_drives_inner() {
        let successes = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&successes);
        let inner = completion::from_fns(
            move || {
                s.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );

        let p = completing(inner);
        assert_eq!(successes.load(Ordering::SeqCst), 0);
        p.complete();
        assert_eq!(successes.load(Ordering::SeqCst), 1);
        assert!(matches!(p.try_result(), Some(Ok(()))));
    }

    #[test]
    fn test_with_hands_out_promise() {
        let p = Promise::with(|p| {
            p.complete();
        });
        assert!(p.is_done());
    }

    #[test]
    fn test_future_poll() {
        // Poll-based smoke test without an async runtime.
        use std::task::{RawWaker, RawWakerVTable};

        fn raw() -> RawWaker {
            fn clone(_: *const ()) -> RawWaker {
                raw()
            }
            fn noop(_: *const ()) {}
            static VTABLE: RawWakerVTable = RawWakerVTable::new(clone, noop, noop, noop);
            RawWaker::new(std::ptr::null(), &VTABLE)
        }

        let waker = unsafe { Waker::from_raw(raw()) };
        let mut cx = Context::from_waker(&waker);

        let mut p = Promise::new();
        assert!(Pin::new(&mut p).poll(&mut cx).is_pending());
        p.complete();
        assert!(matches!(
            Pin::new(&mut p).poll(&mut cx),
            Poll::Ready(Ok(()))
        ));
    }
}
