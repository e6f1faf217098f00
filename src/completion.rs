//! Settle-once completions with scoped resource release.
//!
//! [`CancellableCompletion`] is the one mechanism in this crate for holding
//! a revocable resource across a suspension: a waiter-set entry, an abort
//! listener, a timer. The executor acquires the resource and returns the
//! closure that releases it; the completion guarantees that closure runs
//! exactly once if the wait is abandoned (signal abort or drop) and not at
//! all if the wait settles first.

use std::{
    cell::RefCell,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll, Waker},
};

use crate::signal::{AbortSignal, Aborted, ListenerKey};

/// Release closure returned by a [`CancellableCompletion`] executor.
pub type Cleanup = Box<dyn FnOnce()>;

struct Shared<T> {
    outcome: Option<Result<T, Aborted>>,
    waker: Option<Waker>,
    settled: bool,
    cleanup: Option<Cleanup>,
    listener: Option<(AbortSignal, ListenerKey)>,
}

impl<T> Shared<T> {
    /// Abort path: record the failure first, then release the resource.
    fn abort(shared: &Rc<RefCell<Self>>, reason: Aborted) {
        let cleanup = {
            let mut s = shared.borrow_mut();
            if s.settled {
                return;
            }
            s.settled = true;
            s.outcome = Some(Err(reason));
            // the firing signal already consumed the listener
            s.listener = None;
            if let Some(waker) = s.waker.take() {
                waker.wake();
            }
            s.cleanup.take()
        };
        if let Some(release) = cleanup {
            release();
        }
    }

    fn settle(shared: &Rc<RefCell<Self>>, outcome: Result<T, Aborted>) {
        let (listener, cleanup) = {
            let mut s = shared.borrow_mut();
            if s.settled {
                return;
            }
            s.settled = true;
            s.outcome = Some(outcome);
            if let Some(waker) = s.waker.take() {
                waker.wake();
            }
            (s.listener.take(), s.cleanup.take())
        };
        if let Some((signal, key)) = listener {
            signal.unsubscribe(key);
        }
        // a settled wait releases nothing: whoever settled it already took
        // the resource out of play
        drop(cleanup);
    }
}

/// Settle handle passed to the executor. Cloneable; the first settle wins.
pub struct Completer<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for Completer<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> Completer<T> {
    pub fn resolve(&self, value: T) {
        Shared::settle(&self.shared, Ok(value));
    }

    pub fn abort(&self, reason: Aborted) {
        Shared::settle(&self.shared, Err(reason));
    }

    pub fn is_settled(&self) -> bool {
        self.shared.borrow().settled
    }
}

/// A one-shot wait bounded by an optional [`AbortSignal`].
///
/// Resolves with the executor's value, or fails with [`Aborted`] when the
/// signal trips first. Dropping the future before it settles releases the
/// executor's resources exactly as an abort would, minus the error.
#[must_use = "futures do nothing unless polled"]
pub struct CancellableCompletion<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

/// Not self-referential: every field sits behind an `Rc`.
impl<T> Unpin for CancellableCompletion<T> {}

impl<T: 'static> CancellableCompletion<T> {
    /// Runs `executor` with a settle handle; the returned closure releases
    /// whatever the executor acquired.
    ///
    /// If `signal` is already aborted the executor is never invoked and the
    /// completion is born failed. If the executor settles synchronously the
    /// release closure is dropped unrun and no listener is attached.
    pub fn new(
        signal: Option<&AbortSignal>,
        executor: impl FnOnce(&Completer<T>) -> Option<Cleanup>,
    ) -> Self {
        if let Some(signal) = signal {
            if let Some(reason) = signal.aborted() {
                return Self::settled(Err(reason));
            }
        }

        let shared = Rc::new(RefCell::new(Shared {
            outcome: None,
            waker: None,
            settled: false,
            cleanup: None,
            listener: None,
        }));

        let completer = Completer {
            shared: shared.clone(),
        };
        let cleanup = executor(&completer);

        let settled_in_executor = {
            let mut s = shared.borrow_mut();
            if s.settled {
                // settled inside the executor: release closure never runs
                drop(cleanup);
                true
            } else {
                s.cleanup = cleanup;
                false
            }
        };
        if settled_in_executor {
            return Self { shared };
        }

        if let Some(signal) = signal {
            let weak = Rc::downgrade(&shared);
            let key = signal.subscribe(move |reason| {
                if let Some(shared) = weak.upgrade() {
                    Shared::abort(&shared, reason.clone());
                }
            });
            shared.borrow_mut().listener = Some((signal.clone(), key));
        }

        Self { shared }
    }

    /// A completion that settled before anyone could wait on it.
    pub fn settled(outcome: Result<T, Aborted>) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                outcome: Some(outcome),
                waker: None,
                settled: true,
                cleanup: None,
                listener: None,
            })),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.shared.borrow().settled
    }
}

impl<T> Future for CancellableCompletion<T> {
    type Output = Result<T, Aborted>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut s = self.shared.borrow_mut();
        match s.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None if s.settled => panic!("polled after completion"),
            None => {
                s.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

impl<T> Drop for CancellableCompletion<T> {
    fn drop(&mut self) {
        let (listener, cleanup) = {
            let mut s = self.shared.borrow_mut();
            if s.settled {
                return;
            }
            s.settled = true;
            (s.listener.take(), s.cleanup.take())
        };
        if let Some((signal, key)) = listener {
            signal.unsubscribe(key);
        }
        if let Some(release) = cleanup {
            release();
        }
    }
}

#[cfg(test)]
mod completion_test {
    use std::cell::Cell;

    use crate::signal::AbortController;

    use super::*;

    fn poll_once<T>(fut: &mut CancellableCompletion<T>) -> Poll<Result<T, Aborted>> {
        let waker = futures::task::noop_waker();
        let mut cx = Context::from_waker(&waker);
        Pin::new(fut).poll(&mut cx)
    }

    /// Synchronous resolve inside the executor: no listener, no cleanup.
    #[test]
    fn test_sync_resolve() {
        let ctl = AbortController::new();
        let released = Rc::new(Cell::new(false));

        let released_c = released.clone();
        let mut fut = CancellableCompletion::new(Some(&ctl.signal()), |completer| {
            completer.resolve(7);
            Some(Box::new(move || released_c.set(true)))
        });

        assert_eq!(ctl.signal().listener_count(), 0);
        assert!(matches!(poll_once(&mut fut), Poll::Ready(Ok(7))));
        assert!(!released.get());
    }

    /// Abort before settle: failure first, release exactly once.
    #[test]
    fn test_abort_releases() {
        let ctl = AbortController::new();
        let released = Rc::new(Cell::new(0));

        let released_c = released.clone();
        let mut fut = CancellableCompletion::<()>::new(Some(&ctl.signal()), move |_| {
            Some(Box::new(move || released_c.set(released_c.get() + 1)))
        });
        assert_eq!(ctl.signal().listener_count(), 1);

        ctl.abort();
        assert_eq!(released.get(), 1);
        assert_eq!(ctl.signal().listener_count(), 0);
        assert!(matches!(poll_once(&mut fut), Poll::Ready(Err(_))));

        drop(fut);
        assert_eq!(released.get(), 1);
    }

    /// Settle before the abort handler runs: the settle wins and the
    /// release closure never fires.
    #[test]
    fn test_settle_beats_abort() {
        let ctl = AbortController::new();
        let released = Rc::new(Cell::new(false));

        let released_c = released.clone();
        let mut completer_slot = None;
        let mut fut = CancellableCompletion::new(Some(&ctl.signal()), |completer| {
            completer_slot = Some(completer.clone());
            Some(Box::new(move || released_c.set(true)))
        });

        completer_slot.unwrap().resolve("won");
        assert_eq!(ctl.signal().listener_count(), 0);

        ctl.abort();
        assert!(matches!(poll_once(&mut fut), Poll::Ready(Ok("won"))));
        assert!(!released.get());
    }

    /// An already-aborted signal short-circuits: the executor never runs.
    #[test]
    fn test_preaborted_skips_executor() {
        let ctl = AbortController::new();
        ctl.abort();

        let mut fut: CancellableCompletion<()> =
            CancellableCompletion::new(Some(&ctl.signal()), |_| {
                panic!("executor must not run");
            });
        assert!(matches!(poll_once(&mut fut), Poll::Ready(Err(_))));
    }

    /// Dropping an unsettled completion detaches the listener and runs the
    /// release closure once.
    #[test]
    fn test_drop_releases() {
        let ctl = AbortController::new();
        let released = Rc::new(Cell::new(0));

        let released_c = released.clone();
        let fut: CancellableCompletion<()> =
            CancellableCompletion::new(Some(&ctl.signal()), move |_| {
                Some(Box::new(move || released_c.set(released_c.get() + 1)))
            });
        assert_eq!(ctl.signal().listener_count(), 1);

        drop(fut);
        assert_eq!(released.get(), 1);
        assert_eq!(ctl.signal().listener_count(), 0);

        // the dangling abort is a no-op
        ctl.abort();
        assert_eq!(released.get(), 1);
    }

    /// Without a signal the completion is a plain one-shot.
    #[test]
    fn test_no_signal() {
        let mut completer_slot = None;
        let mut fut = CancellableCompletion::new(None, |completer| {
            completer_slot = Some(completer.clone());
            None
        });
        assert!(matches!(poll_once(&mut fut), Poll::Pending));
        completer_slot.unwrap().resolve(1);
        assert!(matches!(poll_once(&mut fut), Poll::Ready(Ok(1))));
    }
}
