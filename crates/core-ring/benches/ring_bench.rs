//! Throughput of the reserve/publish cycle on both sides of the ring, and
//! of the wrap-coalescing consumer claim the sender thread relies on to
//! drain a batch in one `inject` call instead of one per slot.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use core_ring::Ring;

type R = Ring<u32, 1024>;

fn push_one(ring: &R, value: u32) {
    let (old_tail, n) = ring.reserve_producer(1).expect("producer slot");
    ring.write(old_tail, 0, value);
    ring.publish_producer(old_tail, n);
}

fn drain_all(ring: &R) -> u32 {
    let mut total = 0u32;
    if let Some(claim) = ring.reserve_consumer(-2) {
        for i in 0..claim.n {
            total = total.wrapping_add(ring.read(&claim, i));
        }
        ring.publish_consumer(claim);
    }
    total
}

fn single_event_roundtrip(c: &mut Criterion) {
    let ring = R::new();
    c.bench_function("ring_single_event_roundtrip", |b| {
        b.iter(|| {
            push_one(&ring, black_box(1));
            black_box(drain_all(&ring));
        });
    });
}

fn batch_drain_after_wrap(c: &mut Criterion) {
    c.bench_function("ring_batch_drain_after_wrap", |b| {
        b.iter(|| {
            let ring = R::new();
            for i in 0..600u32 {
                push_one(&ring, i);
                if i % 200 == 0 {
                    black_box(drain_all(&ring));
                }
            }
            black_box(drain_all(&ring));
        });
    });
}

criterion_group!(benches, single_event_roundtrip, batch_drain_after_wrap);
criterion_main!(benches);
