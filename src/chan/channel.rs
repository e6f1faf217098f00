use std::{
    cell::RefCell,
    fmt,
    pin::Pin,
    rc::Rc,
    task::{Context, Poll},
};

use crate::completion::CancellableCompletion;
use crate::signal::AbortSignal;

use super::error::{SendError, TryRecvError, TrySendError};
use super::state::{ChannelState, StartRecv, StartSend};
use super::waiter::Waiter;

/// A typed rendezvous point with an optional FIFO buffer.
///
/// `Channel` is a cheap cloneable handle; every clone talks to the same
/// underlying state. Capacity `0` makes the channel unbuffered: a send
/// completes only by meeting a receive.
pub struct Channel<T> {
    state: Rc<RefCell<ChannelState<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
        }
    }
}

impl<T> Channel<T> {
    /// Creates a channel with room for `capacity` buffered values.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Rc::new(RefCell::new(ChannelState::new(capacity))),
        }
    }

    pub fn capacity(&self) -> usize {
        self.state.borrow().capacity()
    }

    /// Number of currently buffered values.
    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.state.borrow().is_closed()
    }

    /// Delivers `value` if that is possible without suspending: straight to
    /// a parked receiver, else into buffer space.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        self.state.borrow_mut().try_send(value)
    }

    /// Takes the next value if one is immediately available: from the
    /// buffer, or straight from a parked sender on an unbuffered channel.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        self.state.borrow_mut().try_recv()
    }

    /// Delivers `value`, suspending while the channel is full (or, when
    /// unbuffered, until a receiver arrives).
    ///
    /// # Cancel safety
    ///
    /// Dropping the future before completion withdraws the parked send;
    /// the value is lost only if it had not yet been accepted.
    pub fn send(&self, value: T) -> SendFuture<T> {
        SendFuture {
            channel: self.clone(),
            state: SendFutureState::Init(Some(value)),
        }
    }

    /// Takes the next value, suspending while the channel is empty.
    /// Resolves `None` once the channel is closed and drained.
    ///
    /// # Cancel safety
    ///
    /// Dropping the future puts an already-delivered value back at the
    /// head of the channel; no value is lost.
    pub fn recv(&self) -> RecvFuture<T> {
        RecvFuture {
            channel: self.clone(),
            state: RecvFutureState::Init,
        }
    }

    /// Closes the channel. Idempotent.
    ///
    /// Parked receives resolve `None`, parked sends reject with their value
    /// handed back, and every readable/writable subscriber resumes.
    /// Buffered values remain receivable in FIFO order.
    pub fn close(&self) {
        let work = self.state.borrow_mut().close();
        if let Some(work) = work {
            work.finish();
        }
    }

    /// Number of parked readable subscribers. Observability only.
    pub fn readable_waiters(&self) -> usize {
        self.state.borrow().readable_waiters()
    }

    /// Number of parked writable subscribers. Observability only.
    pub fn writable_waiters(&self) -> usize {
        self.state.borrow().writable_waiters()
    }
}

impl<T: 'static> Channel<T> {
    /// Resolves with `tag` once the next receive would not suspend: a value
    /// is available or the channel is closed.
    ///
    /// Fails with [`Aborted`](crate::Aborted) only if `signal` trips first;
    /// aborting (or dropping the completion) withdraws the subscription
    /// immediately.
    pub fn readable<K: 'static>(
        &self,
        tag: K,
        signal: Option<&AbortSignal>,
    ) -> CancellableCompletion<K> {
        let channel = self.clone();
        CancellableCompletion::new(signal, move |completer| {
            let mut state = channel.state.borrow_mut();
            if state.is_readable() {
                drop(state);
                completer.resolve(tag);
                return None;
            }
            let completer = completer.clone();
            let key = state.add_readable_wait(Box::new(move || completer.resolve(tag)));
            drop(state);
            Some(Box::new(move || {
                channel.state.borrow_mut().remove_readable_wait(key);
            }))
        })
    }

    /// Resolves with `tag` once the next send would not suspend: buffer
    /// space is free, a receiver is parked, or the channel is closed (the
    /// send would reject without blocking).
    pub fn writable<K: 'static>(
        &self,
        tag: K,
        signal: Option<&AbortSignal>,
    ) -> CancellableCompletion<K> {
        let channel = self.clone();
        CancellableCompletion::new(signal, move |completer| {
            let mut state = channel.state.borrow_mut();
            if state.is_writable() {
                drop(state);
                completer.resolve(tag);
                return None;
            }
            let completer = completer.clone();
            let key = state.add_writable_wait(Box::new(move || completer.resolve(tag)));
            drop(state);
            Some(Box::new(move || {
                channel.state.borrow_mut().remove_writable_wait(key);
            }))
        })
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("Channel")
            .field("capacity", &state.capacity())
            .field("len", &state.len())
            .field("closed", &state.is_closed())
            .finish()
    }
}

enum SendFutureState<T> {
    Init(Option<T>),
    Parked(Waiter<Result<(), SendError<T>>>),
    Done,
}

#[must_use = "futures do nothing unless polled"]
pub struct SendFuture<T> {
    channel: Channel<T>,
    state: SendFutureState<T>,
}

/// Not self-referential: the waiter sits behind an `Rc`.
impl<T> Unpin for SendFuture<T> {}

impl<T> Future for SendFuture<T> {
    type Output = Result<(), SendError<T>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                SendFutureState::Init(slot) => {
                    let value = slot.take().expect("polled after completion");
                    match this.channel.state.borrow_mut().start_send(value) {
                        StartSend::Done(result) => {
                            this.state = SendFutureState::Done;
                            return Poll::Ready(result);
                        }
                        StartSend::Parked(waiter) => {
                            this.state = SendFutureState::Parked(waiter);
                        }
                    }
                }
                SendFutureState::Parked(waiter) => match waiter.poll_take(cx) {
                    Poll::Ready(result) => {
                        this.state = SendFutureState::Done;
                        return Poll::Ready(result);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                SendFutureState::Done => panic!("polled after completion"),
            }
        }
    }
}

impl<T> Drop for SendFuture<T> {
    fn drop(&mut self) {
        if let SendFutureState::Parked(waiter) = &self.state {
            if !waiter.is_settled() {
                self.channel.state.borrow_mut().cancel_send(waiter);
            }
        }
    }
}

enum RecvFutureState<T> {
    Init,
    Parked(Waiter<Option<T>>),
    Done,
}

#[must_use = "futures do nothing unless polled"]
pub struct RecvFuture<T> {
    channel: Channel<T>,
    state: RecvFutureState<T>,
}

/// Not self-referential: the waiter sits behind an `Rc`.
impl<T> Unpin for RecvFuture<T> {}

impl<T> Future for RecvFuture<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        loop {
            match &mut this.state {
                RecvFutureState::Init => {
                    match this.channel.state.borrow_mut().start_recv() {
                        StartRecv::Done(value) => {
                            this.state = RecvFutureState::Done;
                            return Poll::Ready(value);
                        }
                        StartRecv::Parked(waiter) => {
                            this.state = RecvFutureState::Parked(waiter);
                        }
                    }
                }
                RecvFutureState::Parked(waiter) => match waiter.poll_take(cx) {
                    Poll::Ready(value) => {
                        this.state = RecvFutureState::Done;
                        return Poll::Ready(value);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                RecvFutureState::Done => panic!("polled after completion"),
            }
        }
    }
}

impl<T> Drop for RecvFuture<T> {
    fn drop(&mut self) {
        if let RecvFutureState::Parked(waiter) = &self.state {
            if !waiter.is_settled() {
                self.channel.state.borrow_mut().cancel_recv(waiter);
            } else if let Some(Some(value)) = waiter.take() {
                // delivered but never claimed: put it back
                self.channel.state.borrow_mut().restore(value);
            }
        }
    }
}
