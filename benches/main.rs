//! Channel benchmarks
//!
//! Run with: cargo +nightly bench
//!
//! Everything here is single-threaded by construction: both ends of the
//! channel live on the same executor, so the numbers measure the state
//! machine and the waker plumbing, not cross-core traffic.

#![feature(test)]

extern crate test;

use futures::executor::block_on;
use futures::join;
use staffetta::Channel;
use test::Bencher;

pub const BUFFER_SIZE: usize = 1024;
pub const TOTAL_MESSAGES: usize = 10_000;

/// Producer fills the buffer, consumer drains it; backpressure parks the
/// producer once per lap.
#[bench]
fn buffered_throughput(b: &mut Bencher) {
    b.iter(|| {
        let ch = Channel::new(BUFFER_SIZE);
        let tx = ch.clone();
        block_on(async {
            join!(
                async {
                    for i in 0..TOTAL_MESSAGES {
                        tx.send(i).await.unwrap();
                    }
                    tx.close();
                },
                async {
                    let mut received = 0;
                    while let Some(v) = ch.recv().await {
                        test::black_box(v);
                        received += 1;
                    }
                    assert_eq!(received, TOTAL_MESSAGES);
                },
            );
        });
    });
}

/// Unbuffered ping-pong: every value is a rendezvous, so each transfer
/// parks one side and wakes the other.
#[bench]
fn rendezvous_pingpong(b: &mut Bencher) {
    b.iter(|| {
        let ch = Channel::new(0);
        let tx = ch.clone();
        block_on(async {
            join!(
                async {
                    for i in 0..TOTAL_MESSAGES {
                        tx.send(i).await.unwrap();
                    }
                },
                async {
                    for i in 0..TOTAL_MESSAGES {
                        assert_eq!(ch.recv().await, Some(i));
                    }
                },
            );
        });
    });
}

/// The non-suspending fast path: no futures, no wakers.
#[bench]
fn try_path(b: &mut Bencher) {
    let ch = Channel::new(BUFFER_SIZE);
    b.iter(|| {
        for i in 0..BUFFER_SIZE {
            ch.try_send(i).unwrap();
        }
        for _ in 0..BUFFER_SIZE {
            test::black_box(ch.try_recv().unwrap());
        }
    });
}
