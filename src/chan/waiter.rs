use std::{
    cell::RefCell,
    rc::Rc,
    task::{Context, Poll, Waker},
};

/// A settle-once slot shared between the channel state and one suspended
/// task. The channel keeps one clone in a waiter queue and writes the
/// outcome straight into it; the suspended future polls the other clone.
pub(crate) struct Waiter<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

struct Inner<T> {
    outcome: Option<T>,
    waker: Option<Waker>,
    settled: bool,
}

impl<T> Clone for Waiter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Waiter<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                waker: None,
                settled: false,
            })),
        }
    }

    /// A waiter that was already consumed. Settling it is a no-op; used for
    /// queue entries that only carry a value (see `ChannelState::restore`).
    pub(crate) fn spent() -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                outcome: None,
                waker: None,
                settled: true,
            })),
        }
    }

    /// Delivers the outcome and wakes the suspended task. The first settle
    /// wins; later settles are ignored.
    pub(crate) fn settle(&self, outcome: T) {
        let mut inner = self.inner.borrow_mut();
        if inner.settled {
            return;
        }
        inner.settled = true;
        inner.outcome = Some(outcome);
        if let Some(waker) = inner.waker.take() {
            waker.wake();
        }
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.inner.borrow().settled
    }

    /// Takes the outcome if one was delivered and not yet claimed.
    pub(crate) fn take(&self) -> Option<T> {
        self.inner.borrow_mut().outcome.take()
    }

    pub(crate) fn poll_take(&self, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.inner.borrow_mut();
        match inner.outcome.take() {
            Some(outcome) => Poll::Ready(outcome),
            None if inner.settled => panic!("polled after completion"),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }

    /// Queue-entry identity, for removal on cancellation.
    pub(crate) fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}
