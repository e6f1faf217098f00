//! CSP-style channel
//!
//! A [`Channel`] is a typed rendezvous point with an optional FIFO buffer,
//! coordinating cooperatively scheduled tasks on one thread.
//!
//! ```text
//!  send ──► ┌───────────────────────────────┐ ──► recv
//!           │ buffer (FIFO, capacity N ≥ 0) │
//!           │ parked sends | parked recvs   │
//!           └───────────────────────────────┘
//! ```
//!
//! ## Operations
//!
//! | Operation | Suspends? | Behavior |
//! |-----------|-----------|----------|
//! | [`send`](Channel::send) | yes | deliver, or park until there is room |
//! | [`try_send`](Channel::try_send) | no | deliver now or `Full`/`Closed` |
//! | [`recv`](Channel::recv) | yes | take next, `None` once closed + drained |
//! | [`try_recv`](Channel::try_recv) | no | take now or `Empty`/`Closed` |
//! | [`readable`](Channel::readable) | yes | resolve once `recv` would not suspend |
//! | [`writable`](Channel::writable) | yes | resolve once `send` would not suspend |
//! | [`close`](Channel::close) | no | idempotent; buffered values survive |
//!
//! ## Delivery
//!
//! A send meets a parked receive directly (rendezvous, no buffer
//! involvement); otherwise the value is buffered; otherwise the send parks
//! in FIFO order behind the buffer. Unbuffered channels (`capacity == 0`)
//! only ever do rendezvous.
//!
//! ## Wakeups
//!
//! Readiness subscribers ([`readable`](Channel::readable) /
//! [`writable`](Channel::writable), the building blocks of
//! [`select`](crate::select)) are woken one at a time, and only when the
//! woken wait will actually observe readiness. Close wakes everything.
//!
//! ## Example
//!
//! ```
//! use staffetta::Channel;
//!
//! # futures::executor::block_on(async {
//! let ch = Channel::new(2);
//! ch.send(1).await.unwrap();
//! ch.send(2).await.unwrap();
//! ch.close();
//!
//! assert_eq!(ch.recv().await, Some(1));
//! assert_eq!(ch.recv().await, Some(2));
//! assert_eq!(ch.recv().await, None); // closed and drained
//! # });
//! ```

mod channel;
mod error;
mod state;
mod stream;
mod waiter;

pub use channel::{Channel, RecvFuture, SendFuture};
pub use error::{ChannelClosed, SendError, TryRecvError, TrySendError};
pub use stream::ChannelStream;
