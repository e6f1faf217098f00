use std::{cell::Cell, error::Error, rc::Rc, time::Duration};

use futures::future::LocalBoxFuture;

use crate::chan::{Channel, ChannelClosed, TryRecvError, TrySendError};
use crate::completion::CancellableCompletion;
use crate::signal::{AbortSignal, Aborted};

/// Failure escaping an arm's commit attempt. Surfaced as
/// [`SelectError::Arm`](super::SelectError::Arm) with the arm's name.
pub type ArmFailure = Box<dyn Error>;

/// Outcome of a commit attempt.
pub enum Attempt<T> {
    /// The operation committed.
    Ready(T),
    /// The readiness that triggered the attempt was consumed by another
    /// task in the meantime; the arm has to be re-armed.
    NotReady,
}

/// An operation that can race inside a [`select`](super::Select).
///
/// `watch` arms a wait that resolves when `attempt` is likely to succeed;
/// spurious resolutions are fine, the select loop simply re-arms. `attempt`
/// must mutate shared state only when it returns [`Attempt::Ready`]: a
/// losing or re-arming arm leaves no trace.
pub trait Selectable {
    type Output;

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmFailure>;

    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>>;
}

/// Selectable receive, built by [`Channel::race_recv`].
pub struct RecvOp<T> {
    channel: Channel<T>,
}

impl<T: 'static> Selectable for RecvOp<T> {
    type Output = Option<T>;

    fn attempt(&mut self) -> Result<Attempt<Option<T>>, ArmFailure> {
        match self.channel.try_recv() {
            Ok(value) => Ok(Attempt::Ready(Some(value))),
            Err(TryRecvError::Closed) => Ok(Attempt::Ready(None)),
            Err(TryRecvError::Empty) => Ok(Attempt::NotReady),
        }
    }

    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>> {
        Box::pin(self.channel.readable((), Some(signal)))
    }
}

/// Selectable send, built by [`Channel::race_send`]. Holds the value until
/// the send commits; a send arm against a closed channel fails the select.
pub struct SendOp<T> {
    channel: Channel<T>,
    value: Option<T>,
}

impl<T: 'static> Selectable for SendOp<T> {
    type Output = ();

    fn attempt(&mut self) -> Result<Attempt<()>, ArmFailure> {
        let value = self.value.take().expect("send arm committed twice");
        match self.channel.try_send(value) {
            Ok(()) => Ok(Attempt::Ready(())),
            Err(TrySendError::Full(value)) => {
                self.value = Some(value);
                Ok(Attempt::NotReady)
            }
            Err(TrySendError::Closed(_)) => Err(Box::new(ChannelClosed)),
        }
    }

    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>> {
        Box::pin(self.channel.writable((), Some(signal)))
    }
}

impl<T: 'static> Channel<T> {
    /// A [`Selectable`] that receives from this channel. Commits with
    /// `Some(value)`, or `None` once the channel is closed and drained.
    pub fn race_recv(&self) -> RecvOp<T> {
        RecvOp {
            channel: self.clone(),
        }
    }

    /// A [`Selectable`] that sends `value` into this channel.
    pub fn race_send(&self, value: T) -> SendOp<T> {
        SendOp {
            channel: self.clone(),
            value: Some(value),
        }
    }
}

/// Selectable timer: commits once `duration` elapsed after its wait was
/// first armed. Dropping the wait (losing the select) cancels the timer.
pub struct TimeoutArm {
    duration: Duration,
    fired: Rc<Cell<bool>>,
}

pub fn race_timeout(duration: Duration) -> TimeoutArm {
    TimeoutArm {
        duration,
        fired: Rc::new(Cell::new(false)),
    }
}

impl Selectable for TimeoutArm {
    type Output = ();

    fn attempt(&mut self) -> Result<Attempt<()>, ArmFailure> {
        if self.fired.get() {
            Ok(Attempt::Ready(()))
        } else {
            Ok(Attempt::NotReady)
        }
    }

    fn watch(&mut self, _signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>> {
        let duration = self.duration;
        let fired = self.fired.clone();
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            fired.set(true);
            Ok(())
        })
    }
}

/// Selectable view of an [`AbortSignal`]: commits with the abort outcome
/// once the watched signal trips.
pub struct AbortArm {
    watched: AbortSignal,
}

pub fn race_abort(watched: AbortSignal) -> AbortArm {
    AbortArm { watched }
}

impl Selectable for AbortArm {
    type Output = Aborted;

    fn attempt(&mut self) -> Result<Attempt<Aborted>, ArmFailure> {
        match self.watched.aborted() {
            Some(reason) => Ok(Attempt::Ready(reason)),
            None => Ok(Attempt::NotReady),
        }
    }

    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>> {
        let watched = self.watched.clone();
        Box::pin(CancellableCompletion::new(Some(signal), move |completer| {
            let resolve = completer.clone();
            let key = watched.subscribe(move |_| resolve.resolve(()));
            Some(Box::new(move || watched.unsubscribe(key)))
        }))
    }
}

/// Selectable that never fires and never commits; the disabled-arm
/// placeholder for conditional selects.
pub struct NeverArm;

pub fn race_never() -> NeverArm {
    NeverArm
}

impl Selectable for NeverArm {
    type Output = std::convert::Infallible;

    fn attempt(&mut self) -> Result<Attempt<Self::Output>, ArmFailure> {
        Ok(Attempt::NotReady)
    }

    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>> {
        Box::pin(CancellableCompletion::<()>::new(Some(signal), |_| None))
    }
}
