//! # staffetta
//!
//! CSP-style channels for cooperatively scheduled, single-threaded async
//! Rust: typed rendezvous points ([`Channel`]), a fair multi-way race
//! ([`select::Select`]) and the cancellation plumbing they share
//! ([`AbortSignal`], [`CancellableCompletion`]).
//!
//! Everything is `!Send` by design: handles are `Rc`-based, there are no
//! locks and no atomics, and "blocked" means a suspended future — never a
//! parked thread. Run it on any single-threaded executor; the timer-backed
//! pieces ([`select::Select::timeout`], [`ops`]) expect a tokio
//! current-thread runtime, and the spawning operators in [`ops`] a
//! [`LocalSet`](tokio::task::LocalSet).
//!
//! ## The pieces
//!
//! | Module | What lives there |
//! |--------|------------------|
//! | [`Channel`] | buffered/unbuffered channels: `send`/`recv`, try-variants, readiness waits |
//! | [`select`] | race heterogeneous arms, commit exactly one, fairly |
//! | [`ops`] | fan-in `merge`, time-partitioned batching, timeout channels, mapped views |
//! | [`AbortController`]/[`AbortSignal`] | one-shot abort broadcast with removable listeners |
//! | [`CancellableCompletion`] | a wait whose resources are released however it ends |
//!
//! ## Example
//!
//! ```
//! use staffetta::{Channel, select::Select};
//!
//! # futures::executor::block_on(async {
//! let jobs = Channel::new(2);
//! jobs.send("a").await.unwrap();
//!
//! let selected = Select::new()
//!     .recv("job", &jobs, |job| job)
//!     .run()
//!     .await
//!     .unwrap();
//! assert_eq!(selected.value, Some("a"));
//! # });
//! ```

mod chan;
mod completion;
mod ring;
mod signal;

pub mod ops;
pub mod select;

pub use chan::{
    Channel, ChannelClosed, ChannelStream, RecvFuture, SendError, SendFuture, TryRecvError,
    TrySendError,
};
pub use completion::{CancellableCompletion, Cleanup, Completer};
pub use signal::{
    AbortController, AbortSignal, Aborted, LinkedAbort, ListenerGuard, ListenerKey, linked,
};
