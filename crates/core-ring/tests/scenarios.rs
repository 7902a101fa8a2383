//! The ring's actual job: a producer thread publishing one event at a time
//! while a consumer thread drains it concurrently, with every value
//! accounted for exactly once and no torn reads.

use std::sync::Arc;
use std::thread;

use core_ring::Ring;

type R = Ring<u32, 64>;

fn push(ring: &R, value: u32) {
    loop {
        if let Some((old_tail, n)) = ring.reserve_producer(1) {
            ring.write(old_tail, 0, value);
            ring.publish_producer(old_tail, n);
            return;
        }
        thread::yield_now();
    }
}

#[test]
fn producer_thread_and_consumer_thread_see_every_event_exactly_once() {
    const COUNT: u32 = 5_000;
    let ring = Arc::new(R::new());

    let producer = {
        let ring = Arc::clone(&ring);
        thread::spawn(move || {
            for i in 0..COUNT {
                push(&ring, i);
            }
        })
    };

    let mut received = Vec::with_capacity(COUNT as usize);
    while received.len() < COUNT as usize {
        if let Some(claim) = ring.reserve_consumer(-2) {
            for i in 0..claim.n {
                received.push(ring.read(&claim, i));
            }
            ring.publish_consumer(claim);
        } else {
            thread::yield_now();
        }
    }

    producer.join().unwrap();
    assert_eq!(received, (0..COUNT).collect::<Vec<_>>());
}
