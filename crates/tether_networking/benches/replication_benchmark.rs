//! # Replication Benchmark
//!
//! Measures the per-tick hot path on both ends of a link:
//! 1. Encoding a full spawn batch (snapshot cost)
//! 2. Encoding one changed component per entity (steady-state cost)
//! 3. Applying received frames into a fresh store
//!
//! Target: a 1 000-entity update batch well under one 60 Hz tick budget.

#![allow(missing_docs)]

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use tether_core::components::{register_components, DepthTarget, Name, Position};
use tether_core::{Component, ComponentRegistry, InstanceId, PeerToken, Store, Tick};
use tether_networking::protocol::FrameHeader;
use tether_networking::replication::{apply_frame, encode_batch, PeerLink, PendingBatch};
use tether_networking::DEFAULT_MAX_FRAME_BYTES;

const PEER: PeerToken = PeerToken(1);

fn registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    let _ = register_components(&mut registry);
    registry
}

/// Origin store with `count` replicated entities.
fn populated(count: usize) -> Store {
    let mut store = Store::with_instance(InstanceId(1));
    for i in 0..count {
        let entity = store.spawn_replicated();
        let _ = store.insert(entity, Position::new(i as f32, 0.0, -2.0));
        let _ = store.insert(entity, DepthTarget(2.0));
        let _ = store.insert(entity, Name::new(format!("rov-{i}")));
    }
    store.advance_tick();
    store
}

fn spawn_batch(store: &Store) -> PendingBatch {
    let mut batch = PendingBatch::default();
    for record in store.entities() {
        batch.queue_spawn(record.net_id, record.id);
    }
    batch
}

fn update_batch(store: &Store) -> PendingBatch {
    let mut batch = PendingBatch::default();
    for record in store.entities() {
        batch.queue_update(record.net_id, Position::TYPE_ID, record.id, store.tick());
    }
    batch
}

fn bodies(frames: Vec<Vec<u8>>) -> Vec<Vec<u8>> {
    frames.into_iter().map(|frame| frame[FrameHeader::SIZE..].to_vec()).collect()
}

/// Benchmark encoding a spawn for every entity
fn bench_encode_spawns(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_spawns");
    let registry = registry();

    for count in [100, 1_000, 10_000] {
        let store = populated(count);
        let batch = spawn_batch(&store);

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let frames = encode_batch(
                    black_box(&store),
                    &registry,
                    PEER,
                    batch.clone(),
                    Tick(1),
                    None,
                    DEFAULT_MAX_FRAME_BYTES,
                );
                black_box(frames)
            });
        });
    }

    group.finish();
}

/// Benchmark encoding one changed component per entity
fn bench_encode_updates(c: &mut Criterion) {
    let mut group = c.benchmark_group("encode_updates");
    let registry = registry();

    for count in [100, 1_000, 10_000] {
        let store = populated(count);
        let batch = update_batch(&store);

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let frames = encode_batch(
                    black_box(&store),
                    &registry,
                    PEER,
                    batch.clone(),
                    Tick(1),
                    Some(Tick(1)),
                    DEFAULT_MAX_FRAME_BYTES,
                );
                black_box(frames)
            });
        });
    }

    group.finish();
}

/// Benchmark applying spawn frames into an empty store
fn bench_apply_spawns(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_spawns");
    let registry = registry();

    for count in [100, 1_000, 10_000] {
        let origin = populated(count);
        let frames = bodies(encode_batch(
            &origin,
            &registry,
            PEER,
            spawn_batch(&origin),
            Tick(1),
            None,
            DEFAULT_MAX_FRAME_BYTES,
        ));

        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter_batched(
                || {
                    let mut link = PeerLink::new(PEER, None);
                    link.on_connected(InstanceId(1), None);
                    (Store::with_instance(InstanceId(2)), link)
                },
                |(mut store, mut link)| {
                    for body in &frames {
                        black_box(apply_frame(&mut store, &registry, &mut link, body));
                    }
                    store
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_encode_spawns,
    bench_encode_updates,
    bench_apply_spawns,
);

criterion_main!(benches);
