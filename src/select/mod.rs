//! Fair multi-way race
//!
//! [`Select`] races a set of named arms and performs **exactly one** of
//! them. Arms are channel operations ([`recv`](Select::recv),
//! [`send`](Select::send), any [`Selectable`]), plain futures
//! ([`complete`](Select::complete)), or signal-taking future factories
//! ([`factory`](Select::factory)); helpers cover timers, abort signals and
//! the disabled arm.
//!
//! ## Fairness
//!
//! Arms are shuffled once at entry (Fisher–Yates over a fair RNG), then
//! polled in that fixed order through one shared loop, so ties break
//! uniformly and no arm kind is dispatched ahead of another. Over many
//! races between two equally ready channels each side wins half the time.
//!
//! ## Steals
//!
//! A wakeup proves an arm *was* ready, not that it still is: another task
//! can consume the value between the wakeup and the commit. The race
//! treats a failed commit as a steal and re-arms that arm in place, at its
//! original shuffled position.
//!
//! ## Cancellation
//!
//! Every invocation runs on a fresh signal chained below the caller's
//! (see [`Select::with_signal`]). Winning, failing, aborting or dropping
//! the race cancels all still-pending arm waits: no waiter-set entries,
//! abort listeners or timers survive it.
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use staffetta::{Channel, select::Select};
//!
//! # async fn demo(jobs: Channel<u32>, results: Channel<String>) {
//! enum Step {
//!     Job(Option<u32>),
//!     Sent,
//!     GaveUp,
//! }
//!
//! let step = Select::new()
//!     .recv("job", &jobs, Step::Job)
//!     .send("result", &results, "done".into(), || Step::Sent)
//!     .timeout("deadline", Duration::from_millis(50), || Step::GaveUp)
//!     .run()
//!     .await
//!     .unwrap();
//! # }
//! ```

mod arm;

pub use arm::{
    AbortArm, ArmFailure, Attempt, NeverArm, RecvOp, Selectable, SendOp, TimeoutArm, race_abort,
    race_never, race_timeout,
};

use std::{
    cell::RefCell,
    future::poll_fn,
    rc::Rc,
    task::{Poll, Waker},
    time::Duration,
};

use futures::future::LocalBoxFuture;
use rand::seq::SliceRandom;
use thiserror::Error;
use tracing::trace;

use crate::chan::Channel;
use crate::signal::{self, AbortSignal, Aborted};

/// The committed arm: its name and its mapped result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected<O> {
    pub arm: &'static str,
    pub value: O,
}

/// How a race can fail as a whole.
#[derive(Debug, Error)]
pub enum SelectError {
    /// The caller's signal tripped before any arm committed.
    #[error("select aborted")]
    Aborted(#[from] Aborted),
    /// An arm's commit attempt failed; the arm's identity is preserved for
    /// diagnostics.
    #[error("select arm `{name}` failed")]
    Arm {
        name: &'static str,
        #[source]
        source: ArmFailure,
    },
}

/// Type-erased selectable arm carrying its result mapping.
trait DynArm<O> {
    fn attempt(&mut self) -> Result<Attempt<O>, ArmFailure>;
    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>>;
}

struct MapArm<S, F> {
    op: S,
    map: Option<F>,
}

impl<O, S, F> DynArm<O> for MapArm<S, F>
where
    S: Selectable,
    F: FnOnce(S::Output) -> O,
{
    fn attempt(&mut self) -> Result<Attempt<O>, ArmFailure> {
        match self.op.attempt()? {
            Attempt::Ready(out) => {
                let map = self.map.take().expect("arm committed twice");
                Ok(Attempt::Ready(map(out)))
            }
            Attempt::NotReady => Ok(Attempt::NotReady),
        }
    }

    fn watch(&mut self, signal: &AbortSignal) -> LocalBoxFuture<'static, Result<(), Aborted>> {
        self.op.watch(signal)
    }
}

enum ArmKind<'a, O> {
    Op(Box<dyn DynArm<O> + 'a>),
    Completion(LocalBoxFuture<'a, O>),
    Factory(Box<dyn FnOnce(AbortSignal) -> LocalBoxFuture<'a, O> + 'a>),
}

struct Arm<'a, O> {
    name: &'static str,
    kind: ArmKind<'a, O>,
}

enum Entry<'a, O> {
    Op {
        name: &'static str,
        op: Box<dyn DynArm<O> + 'a>,
        wait: LocalBoxFuture<'static, Result<(), Aborted>>,
    },
    Fut {
        name: &'static str,
        fut: LocalBoxFuture<'a, O>,
    },
}

/// Builder for one fair race. Collect the arms, then [`run`](Select::run).
#[must_use = "a select does nothing until run"]
pub struct Select<'a, O> {
    arms: Vec<Arm<'a, O>>,
    signal: Option<AbortSignal>,
}

impl<O> Default for Select<'_, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a, O> Select<'a, O> {
    pub fn new() -> Self {
        Self {
            arms: Vec::new(),
            signal: None,
        }
    }

    /// Bounds the race by the caller's signal: when it trips,
    /// [`run`](Select::run) fails with [`SelectError::Aborted`] and every
    /// pending arm is cancelled.
    pub fn with_signal(mut self, signal: &AbortSignal) -> Self {
        self.signal = Some(signal.clone());
        self
    }

    fn push(mut self, name: &'static str, kind: ArmKind<'a, O>) -> Self {
        self.arms.push(Arm { name, kind });
        self
    }

    /// Any [`Selectable`], with a mapping into the race's output type.
    pub fn arm<S>(self, name: &'static str, op: S, map: impl FnOnce(S::Output) -> O + 'a) -> Self
    where
        S: Selectable + 'a,
    {
        self.push(
            name,
            ArmKind::Op(Box::new(MapArm {
                op,
                map: Some(map),
            })),
        )
    }

    /// Receive from `channel`; the mapping sees `None` once the channel is
    /// closed and drained.
    pub fn recv<T: 'static>(
        self,
        name: &'static str,
        channel: &Channel<T>,
        map: impl FnOnce(Option<T>) -> O + 'a,
    ) -> Self {
        self.arm(name, channel.race_recv(), map)
    }

    /// Send `value` into `channel`. Against a closed channel the arm fails
    /// the race with [`SelectError::Arm`].
    pub fn send<T: 'static>(
        self,
        name: &'static str,
        channel: &Channel<T>,
        value: T,
        done: impl FnOnce() -> O + 'a,
    ) -> Self {
        self.arm(name, channel.race_send(value), move |()| done())
    }

    /// A plain completion: the future's result, mapped, wins as-is.
    pub fn complete<Fut: Future + 'a>(
        self,
        name: &'static str,
        fut: Fut,
        map: impl FnOnce(Fut::Output) -> O + 'a,
    ) -> Self {
        self.push(
            name,
            ArmKind::Completion(Box::pin(async move { map(fut.await) })),
        )
    }

    /// A completion built from the race's own signal once the race starts.
    pub fn factory<Fut: Future + 'a>(
        self,
        name: &'static str,
        factory: impl FnOnce(AbortSignal) -> Fut + 'a,
        map: impl FnOnce(Fut::Output) -> O + 'a,
    ) -> Self {
        self.push(
            name,
            ArmKind::Factory(Box::new(move |signal| {
                let fut = factory(signal);
                Box::pin(async move { map(fut.await) })
            })),
        )
    }

    /// Fires once `duration` elapsed. Losing cancels the timer.
    pub fn timeout(
        self,
        name: &'static str,
        duration: Duration,
        done: impl FnOnce() -> O + 'a,
    ) -> Self {
        self.arm(name, race_timeout(duration), move |()| done())
    }

    /// Fires once `watched` trips, with the abort outcome.
    pub fn on_abort(
        self,
        name: &'static str,
        watched: &AbortSignal,
        map: impl FnOnce(Aborted) -> O + 'a,
    ) -> Self {
        self.arm(name, race_abort(watched.clone()), map)
    }

    /// An arm that never fires; stands in for a conditionally absent one.
    pub fn never(self, name: &'static str) -> Self {
        self.arm(name, race_never(), |never| match never {})
    }

    /// Runs the race: commits exactly one arm and cancels the rest.
    pub async fn run(self) -> Result<Selected<O>, SelectError> {
        let Select { arms, signal } = self;

        let link = signal::linked(signal.as_ref());
        let ctx = link.signal();
        if let Some(reason) = ctx.aborted() {
            return Err(SelectError::Aborted(reason));
        }

        let mut arms = arms;
        arms.shuffle(&mut rand::thread_rng());

        // refreshed on every poll and fired by the abort listener, so a
        // caller abort wakes the race even when no arm wait is
        // signal-aware (e.g. a lone timer arm)
        let wake_slot: Rc<RefCell<Option<Waker>>> = Rc::new(RefCell::new(None));
        {
            let wake_slot = wake_slot.clone();
            ctx.subscribe(move |_| {
                if let Some(waker) = wake_slot.borrow_mut().take() {
                    waker.wake();
                }
            });
        }

        let mut entries: Vec<Entry<'a, O>> = arms
            .into_iter()
            .map(|arm| match arm.kind {
                ArmKind::Op(mut op) => {
                    let wait = op.watch(&ctx);
                    Entry::Op {
                        name: arm.name,
                        op,
                        wait,
                    }
                }
                ArmKind::Completion(fut) => Entry::Fut {
                    name: arm.name,
                    fut,
                },
                ArmKind::Factory(build) => Entry::Fut {
                    name: arm.name,
                    fut: build(ctx.clone()),
                },
            })
            .collect();

        poll_fn(|cx| {
            if let Some(reason) = ctx.aborted() {
                return Poll::Ready(Err(SelectError::Aborted(reason)));
            }
            *wake_slot.borrow_mut() = Some(cx.waker().clone());

            for entry in &mut entries {
                match entry {
                    Entry::Fut { name, fut } => {
                        if let Poll::Ready(value) = fut.as_mut().poll(cx) {
                            trace!(arm = *name, "select committed");
                            return Poll::Ready(Ok(Selected { arm: *name, value }));
                        }
                    }
                    Entry::Op { name, op, wait } => loop {
                        match wait.as_mut().poll(cx) {
                            Poll::Pending => break,
                            Poll::Ready(Err(reason)) => {
                                return Poll::Ready(Err(SelectError::Aborted(reason)));
                            }
                            Poll::Ready(Ok(())) => match op.attempt() {
                                Err(source) => {
                                    return Poll::Ready(Err(SelectError::Arm {
                                        name: *name,
                                        source,
                                    }));
                                }
                                Ok(Attempt::Ready(value)) => {
                                    trace!(arm = *name, "select committed");
                                    return Poll::Ready(Ok(Selected { arm: *name, value }));
                                }
                                Ok(Attempt::NotReady) => {
                                    // steal: the wakeup's resource went to
                                    // another task; re-arm in place
                                    trace!(arm = *name, "lost the wake race, re-arming");
                                    *wait = op.watch(&ctx);
                                }
                            },
                        }
                    },
                }
            }
            Poll::Pending
        })
        .await
        // dropping `entries` cancels every losing wait; dropping `link`
        // detaches from the caller's signal
    }
}
