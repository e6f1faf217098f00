use thiserror::Error;

/// Emitted by [`Channel::send`](super::Channel::send) against a closed
/// channel, whether it was closed before the call or while the send was
/// suspended. The value comes back to the caller.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("sending on a closed channel")]
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Consume the error, yielding the value that failed to send.
    pub fn into_inner(self) -> T {
        self.0
    }
}

/// Emitted by [`Channel::try_send`](super::Channel::try_send). The value
/// comes back in either variant.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum TrySendError<T> {
    /// No receiver was waiting and the buffer (if any) was full.
    #[error("sending on a full channel")]
    Full(T),
    /// The channel is closed.
    #[error("sending on a closed channel")]
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Consume the error, yielding the value that failed to send.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Closed(value) => value,
        }
    }
}

impl<T> From<SendError<T>> for TrySendError<T> {
    fn from(err: SendError<T>) -> Self {
        Self::Closed(err.0)
    }
}

/// Emitted by [`Channel::try_recv`](super::Channel::try_recv) when no value
/// is immediately available.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
pub enum TryRecvError {
    /// The channel is open but holds nothing to take right now.
    #[error("receiving on an empty channel")]
    Empty,
    /// The channel is closed and fully drained.
    #[error("channel is empty and closed")]
    Closed,
}

/// Value-less stand-in for [`SendError`] at type-erased seams, such as a
/// failed send arm inside a `select`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Error)]
#[error("sending on a closed channel")]
pub struct ChannelClosed;
