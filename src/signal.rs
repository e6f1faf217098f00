//! One-shot abort broadcast.
//!
//! [`AbortController`] owns the abort side, [`AbortSignal`] is the cloneable
//! observer side. A signal trips at most once; listeners registered through
//! [`AbortSignal::subscribe`] fire exactly once and can be detached in O(1)
//! by key (or by dropping a [`ListenerGuard`]).
//!
//! [`linked`] builds the derived signal every `select` invocation runs on:
//! aborting the link aborts the derived signal, aborting the upstream signal
//! propagates down, and dropping the link detaches the single upstream
//! listener it holds.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use thiserror::Error;

/// Error produced by every abortable wait whose signal trips, and by an
/// aborted `select`.
#[derive(Debug, Clone, Default, Error)]
#[error("operation aborted")]
pub struct Aborted {
    reason: Option<Rc<str>>,
}

impl Aborted {
    pub fn new() -> Self {
        Self { reason: None }
    }

    pub fn with_reason(reason: impl Into<Rc<str>>) -> Self {
        Self {
            reason: Some(reason.into()),
        }
    }

    /// The reason passed to [`AbortController::abort_with`], if any.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

type Listener = Box<dyn FnOnce(&Aborted)>;

#[derive(Default)]
struct SignalState {
    outcome: Option<Aborted>,
    listeners: HashMap<u64, Listener>,
    next_key: u64,
}

/// Observer half of a one-shot abort broadcast.
#[derive(Clone, Default)]
pub struct AbortSignal {
    state: Rc<RefCell<SignalState>>,
}

/// Key returned by [`AbortSignal::subscribe`]; feed it back to
/// [`AbortSignal::unsubscribe`] to detach the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerKey(Option<u64>);

impl AbortSignal {
    pub fn is_aborted(&self) -> bool {
        self.state.borrow().outcome.is_some()
    }

    /// The abort outcome, if the signal has tripped.
    pub fn aborted(&self) -> Option<Aborted> {
        self.state.borrow().outcome.clone()
    }

    /// Registers `listener` to run when the signal trips.
    ///
    /// On an already-aborted signal the listener fires immediately and
    /// nothing is attached (the returned key unsubscribes nothing).
    pub fn subscribe(&self, listener: impl FnOnce(&Aborted) + 'static) -> ListenerKey {
        let fired = {
            let mut state = self.state.borrow_mut();
            match state.outcome.clone() {
                Some(outcome) => Some(outcome),
                None => {
                    let key = state.next_key;
                    state.next_key += 1;
                    state.listeners.insert(key, Box::new(listener));
                    return ListenerKey(Some(key));
                }
            }
        };
        if let Some(outcome) = fired {
            listener(&outcome);
        }
        ListenerKey(None)
    }

    /// Like [`subscribe`](Self::subscribe), detaching on drop of the guard.
    pub fn subscribe_guarded(&self, listener: impl FnOnce(&Aborted) + 'static) -> ListenerGuard {
        let key = self.subscribe(listener);
        ListenerGuard {
            signal: self.clone(),
            key,
        }
    }

    /// Detaches a listener. A no-op if it already fired or was detached.
    pub fn unsubscribe(&self, key: ListenerKey) {
        if let Some(key) = key.0 {
            self.state.borrow_mut().listeners.remove(&key);
        }
    }

    /// Number of currently attached listeners.
    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }

    /// Trips the signal. Listeners run outside the internal borrow, so they
    /// may re-enter this signal or anything it guards.
    pub(crate) fn fire(&self, outcome: Aborted) {
        let listeners = {
            let mut state = self.state.borrow_mut();
            if state.outcome.is_some() {
                return;
            }
            state.outcome = Some(outcome.clone());
            std::mem::take(&mut state.listeners)
        };
        for (_, listener) in listeners {
            listener(&outcome);
        }
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Abort half of a one-shot broadcast.
#[derive(Debug, Default)]
pub struct AbortController {
    signal: AbortSignal,
}

impl AbortController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Trips the signal. Idempotent; the first abort wins.
    pub fn abort(&self) {
        self.signal.fire(Aborted::new());
    }

    pub fn abort_with(&self, reason: impl Into<Rc<str>>) {
        self.signal.fire(Aborted::with_reason(reason));
    }
}

/// RAII listener registration: detaches from the signal on drop.
#[derive(Debug)]
pub struct ListenerGuard {
    signal: AbortSignal,
    key: ListenerKey,
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        self.signal.unsubscribe(self.key);
    }
}

/// A fresh abortable scope, optionally chained below an upstream signal.
///
/// Aborting the upstream signal aborts [`signal`](LinkedAbort::signal);
/// aborting the link does not touch the upstream. Exactly one listener is
/// attached to the upstream for the lifetime of the link, and dropping the
/// link detaches it.
#[derive(Debug)]
pub struct LinkedAbort {
    controller: AbortController,
    _upstream: Option<ListenerGuard>,
}

impl LinkedAbort {
    pub fn signal(&self) -> AbortSignal {
        self.controller.signal()
    }

    pub fn abort(&self) {
        self.controller.abort();
    }

    pub fn abort_with(&self, reason: impl Into<Rc<str>>) {
        self.controller.abort_with(reason);
    }
}

pub fn linked(upstream: Option<&AbortSignal>) -> LinkedAbort {
    let controller = AbortController::new();
    let guard = upstream.map(|up| {
        let downstream = controller.signal();
        up.subscribe_guarded(move |reason| downstream.fire(reason.clone()))
    });
    LinkedAbort {
        controller,
        _upstream: guard,
    }
}

#[cfg(test)]
mod signal_test {
    use std::{cell::Cell, rc::Rc};

    use super::*;

    /// Listeners fire exactly once and the set drains on abort.
    #[test]
    fn test_fire_once() {
        let ctl = AbortController::new();
        let signal = ctl.signal();
        let hits = Rc::new(Cell::new(0));

        let hits_c = hits.clone();
        signal.subscribe(move |_| hits_c.set(hits_c.get() + 1));
        assert_eq!(signal.listener_count(), 1);

        ctl.abort();
        ctl.abort();
        assert_eq!(hits.get(), 1);
        assert_eq!(signal.listener_count(), 0);
        assert!(signal.is_aborted());
    }

    /// Subscribing after the abort fires immediately, attaching nothing.
    #[test]
    fn test_subscribe_after_abort() {
        let ctl = AbortController::new();
        ctl.abort_with("too late");

        let seen = Rc::new(Cell::new(false));
        let seen_c = seen.clone();
        let key = ctl.signal().subscribe(move |reason| {
            assert_eq!(reason.reason(), Some("too late"));
            seen_c.set(true);
        });

        assert!(seen.get());
        assert_eq!(ctl.signal().listener_count(), 0);
        // unsubscribing the dead key is harmless
        ctl.signal().unsubscribe(key);
    }

    /// Unsubscribe detaches exactly the keyed listener.
    #[test]
    fn test_unsubscribe() {
        let ctl = AbortController::new();
        let signal = ctl.signal();
        let hits = Rc::new(Cell::new(0));

        let hits_a = hits.clone();
        let key = signal.subscribe(move |_| hits_a.set(hits_a.get() + 1));
        let hits_b = hits.clone();
        signal.subscribe(move |_| hits_b.set(hits_b.get() + 10));

        signal.unsubscribe(key);
        assert_eq!(signal.listener_count(), 1);

        ctl.abort();
        assert_eq!(hits.get(), 10);
    }

    /// Guard drop detaches; guard kept attached fires.
    #[test]
    fn test_listener_guard() {
        let ctl = AbortController::new();
        let signal = ctl.signal();
        let hit = Rc::new(Cell::new(false));

        let hit_c = hit.clone();
        let guard = signal.subscribe_guarded(move |_| hit_c.set(true));
        assert_eq!(signal.listener_count(), 1);
        drop(guard);
        assert_eq!(signal.listener_count(), 0);

        ctl.abort();
        assert!(!hit.get());
    }

    /// Upstream abort propagates through a link; the link's own abort
    /// leaves the upstream untouched.
    #[test]
    fn test_linked_propagation() {
        let upstream = AbortController::new();
        let link = linked(Some(&upstream.signal()));
        assert_eq!(upstream.signal().listener_count(), 1);

        link.abort();
        assert!(link.signal().is_aborted());
        assert!(!upstream.signal().is_aborted());

        let link2 = linked(Some(&upstream.signal()));
        upstream.abort_with("upstream gone");
        assert_eq!(
            link2.signal().aborted().unwrap().reason(),
            Some("upstream gone")
        );
    }

    /// Dropping the link removes its upstream listener.
    #[test]
    fn test_linked_detach() {
        let upstream = AbortController::new();
        let link = linked(Some(&upstream.signal()));
        assert_eq!(upstream.signal().listener_count(), 1);
        drop(link);
        assert_eq!(upstream.signal().listener_count(), 0);
    }

    /// A link below an already-aborted upstream starts aborted.
    #[test]
    fn test_linked_preaborted() {
        let upstream = AbortController::new();
        upstream.abort();
        let link = linked(Some(&upstream.signal()));
        assert!(link.signal().is_aborted());
    }
}
