use std::{
    pin::Pin,
    task::{Context, Poll},
};

use futures::Stream;

use super::channel::{Channel, RecvFuture};

impl<T: 'static> Channel<T> {
    /// Iteration view: yields every received value and ends once the
    /// channel is closed and drained.
    pub fn into_stream(self) -> ChannelStream<T> {
        ChannelStream {
            channel: self,
            pending: None,
        }
    }
}

/// [`Stream`] over a channel's values. Ends on closed-and-drained; polling
/// past the end keeps yielding `None`.
#[must_use = "streams do nothing unless polled"]
pub struct ChannelStream<T> {
    channel: Channel<T>,
    pending: Option<RecvFuture<T>>,
}

impl<T> Unpin for ChannelStream<T> {}

impl<T> Stream for ChannelStream<T> {
    type Item = T;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let Self { channel, pending } = &mut *self;
        let fut = pending.get_or_insert_with(|| channel.recv());
        match Pin::new(fut).poll(cx) {
            Poll::Ready(value) => {
                *pending = None;
                Poll::Ready(value)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
