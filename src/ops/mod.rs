//! Composition operators
//!
//! Mechanical combinations of the core channel and select surface: fan-in
//! [`merge`], time-partitioned batching [`partition_time`], one-shot
//! [`timeout`] channels, and value-mapping channel views.
//!
//! The spawning operators ([`merge`], [`partition_time`], [`timeout`]) run
//! their pump tasks on the current thread's
//! [`LocalSet`](tokio::task::LocalSet).

use std::{rc::Rc, time::Duration};

use futures::future::join_all;
use tokio::task::spawn_local;

use crate::chan::{Channel, SendError, TryRecvError, TrySendError};
use crate::completion::CancellableCompletion;
use crate::select::{ArmFailure, Attempt, RecvOp, Select, Selectable, SendOp};
use crate::signal::{AbortSignal, Aborted};

/// Fans every source into one output channel of the given capacity.
///
/// Values from one source keep their order; sources interleave
/// arbitrarily. The output closes once every source has closed and
/// drained. Closing the output early stops the pumps.
pub fn merge<T: 'static>(sources: Vec<Channel<T>>, output_capacity: usize) -> Channel<T> {
    let output = Channel::new(output_capacity);
    let pumps: Vec<_> = sources
        .into_iter()
        .map(|source| {
            let output = output.clone();
            spawn_local(async move {
                while let Some(value) = source.recv().await {
                    if output.send(value).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect();

    let out = output.clone();
    spawn_local(async move {
        let _ = join_all(pumps).await;
        out.close();
    });
    output
}

/// Groups values from `source` into batches of up to `group_size`,
/// flushing a partial batch once `idle_timeout` passes with no new value.
/// The idle timer restarts on every value. Closing the source flushes the
/// remainder and closes the output.
///
/// # Panics
///
/// Panics if `group_size` is zero.
pub fn partition_time<T: 'static>(
    source: Channel<T>,
    group_size: usize,
    idle_timeout: Duration,
) -> Channel<Vec<T>> {
    assert!(group_size >= 1, "group size must be at least 1");

    enum Step<T> {
        Value(Option<T>),
        Idle,
    }

    let output = Channel::new(0);
    let out = output.clone();
    spawn_local(async move {
        loop {
            // the first value of a batch is waited for without a deadline
            let Some(first) = source.recv().await else {
                break;
            };
            let mut group = vec![first];
            let mut source_done = false;
            while group.len() < group_size {
                let step = Select::new()
                    .recv("value", &source, Step::Value)
                    .timeout("idle", idle_timeout, || Step::Idle)
                    .run()
                    .await
                    .expect("neither arm can fail");
                match step.value {
                    Step::Value(Some(value)) => group.push(value),
                    Step::Value(None) => {
                        source_done = true;
                        break;
                    }
                    Step::Idle => break,
                }
            }
            if out.send(group).await.is_err() {
                break;
            }
            if source_done {
                break;
            }
        }
        out.close();
    });
    output
}

/// A channel that delivers one unit after `duration`, then closes.
pub fn timeout(duration: Duration) -> Channel<()> {
    let output = Channel::new(1);
    let out = output.clone();
    spawn_local(async move {
        tokio::time::sleep(duration).await;
        let _ = out.try_send(());
        out.close();
    });
    output
}

impl<T: 'static> Channel<T> {
    /// Readable view of this channel with `map` applied to every value on
    /// the way out.
    pub fn map_recv<U>(&self, map: impl Fn(T) -> U + 'static) -> MappedRecv<T, U> {
        MappedRecv {
            channel: self.clone(),
            map: Rc::new(map),
        }
    }

    /// Writable view of this channel with `map` applied to every value on
    /// the way in.
    pub fn map_send<U>(&self, map: impl Fn(U) -> T + 'static) -> MappedSend<T, U> {
        MappedSend {
            channel: self.clone(),
            map: Rc::new(map),
        }
    }
}

/// Readable channel view produced by [`Channel::map_recv`].
pub struct MappedRecv<T, U> {
    channel: Channel<T>,
    map: Rc<dyn Fn(T) -> U>,
}

impl<T, U> Clone for MappedRecv<T, U> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            map: self.map.clone(),
        }
    }
}

impl<T: 'static, U> MappedRecv<T, U> {
    pub async fn recv(&self) -> Option<U> {
        self.channel.recv().await.map(|value| (self.map)(value))
    }

    pub fn try_recv(&self) -> Result<U, TryRecvError> {
        self.channel.try_recv().map(|value| (self.map)(value))
    }

    pub fn readable<K: 'static>(
        &self,
        tag: K,
        signal: Option<&AbortSignal>,
    ) -> CancellableCompletion<K> {
        self.channel.readable(tag, signal)
    }

    pub fn race_recv(&self) -> MappedRecvOp<T, U> {
        MappedRecvOp {
            op: self.channel.race_recv(),
            map: self.map.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

/// [`Selectable`] receive through a [`MappedRecv`] view.
pub struct MappedRecvOp<T, U> {
    op: RecvOp<T>,
    map: Rc<dyn Fn(T) -> U>,
}

impl<T: 'static, U> Selectable for MappedRecvOp<T, U> {
    type Output = Option<U>;

    fn attempt(&mut self) -> Result<Attempt<Option<U>>, ArmFailure> {
        Ok(match self.op.attempt()? {
            Attempt::Ready(value) => Attempt::Ready(value.map(|v| (self.map)(v))),
            Attempt::NotReady => Attempt::NotReady,
        })
    }

    fn watch(
        &mut self,
        signal: &AbortSignal,
    ) -> futures::future::LocalBoxFuture<'static, Result<(), Aborted>> {
        self.op.watch(signal)
    }
}

/// Writable channel view produced by [`Channel::map_send`]. Errors hand
/// back the already-mapped value.
pub struct MappedSend<T, U> {
    channel: Channel<T>,
    map: Rc<dyn Fn(U) -> T>,
}

impl<T, U> Clone for MappedSend<T, U> {
    fn clone(&self) -> Self {
        Self {
            channel: self.channel.clone(),
            map: self.map.clone(),
        }
    }
}

impl<T: 'static, U> MappedSend<T, U> {
    pub async fn send(&self, value: U) -> Result<(), SendError<T>> {
        self.channel.send((self.map)(value)).await
    }

    pub fn try_send(&self, value: U) -> Result<(), TrySendError<T>> {
        self.channel.try_send((self.map)(value))
    }

    pub fn writable<K: 'static>(
        &self,
        tag: K,
        signal: Option<&AbortSignal>,
    ) -> CancellableCompletion<K> {
        self.channel.writable(tag, signal)
    }

    pub fn race_send(&self, value: U) -> SendOp<T> {
        self.channel.race_send((self.map)(value))
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use tokio::task::{LocalSet, yield_now};
    use tokio::time::advance;

    use super::*;

    /// Everything from every source comes out, per-source order intact,
    /// and the output closes after the last source.
    #[tokio::test]
    async fn test_merge_drains_all_sources() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let a = Channel::new(2);
                let b = Channel::new(2);
                let merged = merge(vec![a.clone(), b.clone()], 4);

                for i in [1, 3] {
                    a.send(i).await.unwrap();
                }
                for i in [2, 4] {
                    b.send(i).await.unwrap();
                }
                a.close();
                b.close();

                let mut seen = Vec::new();
                while let Some(value) = merged.recv().await {
                    seen.push(value);
                }
                let pos = |v| seen.iter().position(|x| *x == v).unwrap();
                assert!(pos(1) < pos(3), "source order lost: {seen:?}");
                assert!(pos(2) < pos(4), "source order lost: {seen:?}");

                seen.sort_unstable();
                assert_eq!(seen, vec![1, 2, 3, 4]);
                assert!(merged.is_closed());
            })
            .await;
    }

    /// A full group flushes immediately, without waiting for the idle
    /// timer.
    #[tokio::test(start_paused = true)]
    async fn test_partition_full_group() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let source = Channel::new(10);
                let groups = partition_time(source.clone(), 3, Duration::from_secs(1));

                for i in 1..=3 {
                    source.send(i).await.unwrap();
                }
                assert_eq!(groups.recv().await, Some(vec![1, 2, 3]));
            })
            .await;
    }

    /// A partial group flushes once the idle timeout passes with nothing
    /// new arriving.
    #[tokio::test(start_paused = true)]
    async fn test_partition_idle_flush() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let source = Channel::new(10);
                let groups = partition_time(source.clone(), 3, Duration::from_millis(1000));

                source.send(1).await.unwrap();
                source.send(2).await.unwrap();
                for _ in 0..4 {
                    yield_now().await;
                }

                advance(Duration::from_millis(500)).await;
                for _ in 0..4 {
                    yield_now().await;
                }
                assert!(matches!(groups.try_recv(), Err(TryRecvError::Empty)));

                advance(Duration::from_millis(1000)).await;
                assert_eq!(groups.recv().await, Some(vec![1, 2]));
            })
            .await;
    }

    /// Closing the source flushes the pending remainder, then the output
    /// closes.
    #[tokio::test(start_paused = true)]
    async fn test_partition_flush_on_close() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let source = Channel::new(10);
                let groups = partition_time(source.clone(), 5, Duration::from_secs(60));

                source.send(7).await.unwrap();
                source.close();

                assert_eq!(groups.recv().await, Some(vec![7]));
                assert_eq!(groups.recv().await, None);
            })
            .await;
    }

    /// The argument check fires at the call site, before any task spawns.
    #[test]
    #[should_panic(expected = "group size")]
    fn test_partition_zero_group_size() {
        let source = Channel::<i32>::new(1);
        let _ = partition_time(source, 0, Duration::from_secs(1));
    }

    /// The timeout channel delivers exactly one unit, then closes.
    #[tokio::test(start_paused = true)]
    async fn test_timeout_channel() {
        let local = LocalSet::new();
        local
            .run_until(async {
                let timer = timeout(Duration::from_millis(100));
                assert_eq!(timer.recv().await, Some(()));
                assert_eq!(timer.recv().await, None);
            })
            .await;
    }

    /// Mapped views translate values in both directions.
    #[tokio::test]
    async fn test_mapped_views() {
        let ch = Channel::new(2);

        let doubled = ch.map_recv(|v: i32| v * 2);
        let stringy = ch.map_send(|s: &str| s.len() as i32);

        stringy.send("four").await.unwrap();
        ch.send(10).await.unwrap();

        assert_eq!(doubled.recv().await, Some(8));
        assert_eq!(doubled.try_recv().unwrap(), 20);
        assert!(matches!(doubled.try_recv(), Err(TryRecvError::Empty)));
    }

    /// A mapped receive arm races like the plain one.
    #[tokio::test]
    async fn test_mapped_race_recv() {
        let ch = Channel::new(1);
        ch.try_send(21).unwrap();
        let doubled = ch.map_recv(|v: i32| v * 2);

        let selected = Select::new()
            .arm("doubled", doubled.race_recv(), |v| v.unwrap())
            .never("other")
            .run()
            .await
            .unwrap();
        assert_eq!(selected.value, 42);
    }
}
