use std::collections::{HashMap, VecDeque};

use tracing::trace;

use crate::ring::Ring;

use super::error::{SendError, TryRecvError, TrySendError};
use super::waiter::Waiter;

/// Resume callback parked in a readable/writable wait set.
///
/// Invoked while the channel state is borrowed: it must settle its
/// completion (slot write + wakeup) and never re-enter the channel.
pub(crate) type Resume = Box<dyn FnOnce()>;

/// One parked send: the value travels with the settle slot and moves into
/// the channel only when the send is accepted.
pub(crate) struct SendEntry<T> {
    pub(crate) value: Option<T>,
    pub(crate) waiter: Waiter<Result<(), SendError<T>>>,
}

impl<T> SendEntry<T> {
    fn take_value(&mut self) -> T {
        self.value.take().expect("parked send without a value")
    }
}

pub(crate) enum StartSend<T> {
    Done(Result<(), SendError<T>>),
    Parked(Waiter<Result<(), SendError<T>>>),
}

pub(crate) enum StartRecv<T> {
    Done(Option<T>),
    Parked(Waiter<Option<T>>),
}

/// The channel state machine.
///
/// Holds the buffer, the two queues of parked operations and the two sets
/// of readiness subscribers. Invariants, for every reachable state:
///
/// - parked receives exist only while the buffer is empty and no send is
///   parked (a pending receive never coexists with an available value);
/// - with `capacity > 0`, an unsettled parked send implies a full buffer;
/// - once closed, no unsettled parked operation remains;
/// - a non-empty wait set implies the channel is not ready in that
///   direction (a wakeup always finds something to observe).
pub(crate) struct ChannelState<T> {
    ring: Ring<T>,
    blocked_sends: VecDeque<SendEntry<T>>,
    blocked_recvs: VecDeque<Waiter<Option<T>>>,
    readable_waits: HashMap<u64, Resume>,
    writable_waits: HashMap<u64, Resume>,
    next_wait_key: u64,
    closed: bool,
}

impl<T> ChannelState<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::with_capacity(capacity),
            blocked_sends: VecDeque::new(),
            blocked_recvs: VecDeque::new(),
            readable_waits: HashMap::new(),
            writable_waits: HashMap::new(),
            next_wait_key: 0,
            closed: false,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.ring.len()
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    /// The next receive would not suspend.
    pub(crate) fn is_readable(&self) -> bool {
        self.closed || !self.ring.is_empty() || !self.blocked_sends.is_empty()
    }

    /// The next send would not suspend. A closed channel counts: the send
    /// rejects without blocking.
    pub(crate) fn is_writable(&self) -> bool {
        self.closed || !self.ring.is_full() || !self.blocked_recvs.is_empty()
    }

    pub(crate) fn try_send(&mut self, value: T) -> Result<(), TrySendError<T>> {
        if self.closed {
            return Err(TrySendError::Closed(value));
        }
        // rendezvous shortcut: hand the value straight to the head receiver
        if let Some(receiver) = self.blocked_recvs.pop_front() {
            receiver.settle(Some(value));
            return Ok(());
        }
        match self.ring.push(value) {
            Ok(()) => {
                self.wake_one_readable();
                Ok(())
            }
            Err(value) => Err(TrySendError::Full(value)),
        }
    }

    pub(crate) fn try_recv(&mut self) -> Result<T, TryRecvError> {
        if self.capacity() == 0 {
            // unbuffered: take straight from the head parked send
            if let Some(mut entry) = self.blocked_sends.pop_front() {
                let value = entry.take_value();
                entry.waiter.settle(Ok(()));
                return Ok(value);
            }
            return Err(self.empty_or_closed());
        }
        let Some(value) = self.ring.pop() else {
            return Err(self.empty_or_closed());
        };
        if let Some(mut entry) = self.blocked_sends.pop_front() {
            // refill the slot we just freed from the head parked send
            let refill = entry.take_value();
            let pushed = self.ring.push(refill);
            debug_assert!(pushed.is_ok());
            entry.waiter.settle(Ok(()));
        } else {
            self.wake_one_writable();
        }
        Ok(value)
    }

    fn empty_or_closed(&self) -> TryRecvError {
        if self.closed {
            TryRecvError::Closed
        } else {
            TryRecvError::Empty
        }
    }

    /// Fast path or park, for the blocking send.
    pub(crate) fn start_send(&mut self, value: T) -> StartSend<T> {
        match self.try_send(value) {
            Ok(()) => StartSend::Done(Ok(())),
            Err(TrySendError::Closed(value)) => StartSend::Done(Err(SendError(value))),
            Err(TrySendError::Full(value)) => {
                let waiter = Waiter::new();
                self.blocked_sends.push_back(SendEntry {
                    value: Some(value),
                    waiter: waiter.clone(),
                });
                // on an unbuffered channel the parked send is itself the
                // readable resource; on a full buffer this is a no-op
                self.wake_one_readable();
                StartSend::Parked(waiter)
            }
        }
    }

    /// Fast path or park, for the blocking receive.
    pub(crate) fn start_recv(&mut self) -> StartRecv<T> {
        match self.try_recv() {
            Ok(value) => StartRecv::Done(Some(value)),
            Err(TryRecvError::Closed) => StartRecv::Done(None),
            Err(TryRecvError::Empty) => {
                let waiter = Waiter::new();
                self.blocked_recvs.push_back(waiter.clone());
                // the parked receive is what makes a rendezvous channel
                // writable
                self.wake_one_writable();
                StartRecv::Parked(waiter)
            }
        }
    }

    /// Gives back a value a cancelled receive was already handed. It goes
    /// to the head receiver, else the buffer front. If other sends refilled
    /// the buffer in the meantime it is kept as a value-only queue entry
    /// drained behind the buffer: nothing is lost, but in that narrow case
    /// the restored value yields after the newer buffered ones.
    pub(crate) fn restore(&mut self, value: T) {
        if let Some(receiver) = self.blocked_recvs.pop_front() {
            receiver.settle(Some(value));
            return;
        }
        match self.ring.push_front(value) {
            Ok(()) => self.wake_one_readable(),
            Err(value) => {
                self.blocked_sends.push_front(SendEntry {
                    value: Some(value),
                    waiter: Waiter::spent(),
                });
                self.wake_one_readable();
            }
        }
    }

    /// Removes a parked send whose future was dropped before settling.
    pub(crate) fn cancel_send(&mut self, waiter: &Waiter<Result<(), SendError<T>>>) {
        if let Some(pos) = self
            .blocked_sends
            .iter()
            .position(|entry| entry.waiter.same(waiter))
        {
            self.blocked_sends.remove(pos);
        }
    }

    /// Removes a parked receive whose future was dropped before settling.
    pub(crate) fn cancel_recv(&mut self, waiter: &Waiter<Option<T>>) {
        if let Some(pos) = self
            .blocked_recvs
            .iter()
            .position(|parked| parked.same(waiter))
        {
            self.blocked_recvs.remove(pos);
        }
    }

    pub(crate) fn add_readable_wait(&mut self, resume: Resume) -> u64 {
        let key = self.next_wait_key;
        self.next_wait_key += 1;
        self.readable_waits.insert(key, resume);
        key
    }

    pub(crate) fn remove_readable_wait(&mut self, key: u64) {
        self.readable_waits.remove(&key);
    }

    pub(crate) fn add_writable_wait(&mut self, resume: Resume) -> u64 {
        let key = self.next_wait_key;
        self.next_wait_key += 1;
        self.writable_waits.insert(key, resume);
        key
    }

    pub(crate) fn remove_writable_wait(&mut self, key: u64) {
        self.writable_waits.remove(&key);
    }

    pub(crate) fn readable_waiters(&self) -> usize {
        self.readable_waits.len()
    }

    pub(crate) fn writable_waiters(&self) -> usize {
        self.writable_waits.len()
    }

    /// Resumes one readable subscriber, chosen arbitrarily. Only called
    /// when the channel just became readable, so the wakeup always finds
    /// something to observe.
    fn wake_one_readable(&mut self) {
        if let Some(key) = self.readable_waits.keys().next().copied() {
            if let Some(resume) = self.readable_waits.remove(&key) {
                resume();
            }
        }
    }

    fn wake_one_writable(&mut self) {
        if let Some(key) = self.writable_waits.keys().next().copied() {
            if let Some(resume) = self.writable_waits.remove(&key) {
                resume();
            }
        }
    }

    /// The close transition. Returns the work to run outside the state
    /// borrow: parked receives to settle empty, parked sends to reject,
    /// and every readiness subscriber (a closed channel is both readable
    /// and writable in the "next op won't block" sense).
    pub(crate) fn close(&mut self) -> Option<CloseWork<T>> {
        if self.closed {
            return None;
        }
        self.closed = true;

        let receivers = std::mem::take(&mut self.blocked_recvs);
        // value-only entries left by cancelled receives behave like
        // buffered values and stay receivable
        let mut senders = Vec::new();
        self.blocked_sends = std::mem::take(&mut self.blocked_sends)
            .into_iter()
            .filter_map(|entry| {
                if entry.waiter.is_settled() {
                    Some(entry)
                } else {
                    senders.push(entry);
                    None
                }
            })
            .collect();

        let resumes = std::mem::take(&mut self.readable_waits)
            .into_values()
            .chain(std::mem::take(&mut self.writable_waits).into_values())
            .collect();

        trace!(
            buffered = self.ring.len(),
            rejected_sends = senders.len(),
            drained_receives = receivers.len(),
            "channel closed"
        );

        Some(CloseWork {
            receivers,
            senders,
            resumes,
        })
    }
}

/// Settling deferred out of the close borrow.
pub(crate) struct CloseWork<T> {
    receivers: VecDeque<Waiter<Option<T>>>,
    senders: Vec<SendEntry<T>>,
    resumes: Vec<Resume>,
}

impl<T> CloseWork<T> {
    pub(crate) fn finish(self) {
        for receiver in self.receivers {
            receiver.settle(None);
        }
        for mut entry in self.senders {
            let value = entry.take_value();
            entry.waiter.settle(Err(SendError(value)));
        }
        for resume in self.resumes {
            resume();
        }
    }
}
