//! Benchmarks for network data propagation

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use meshdata_core::{ContextId, Ipv6Prefix, NodeId, PrefixFlags};
use meshdata_diffusion::Role;
use meshdata_state::{DatasetStore, Delta, LocalChange};
use meshdata_test::{init_test_tracing, MeshSimulator};
use meshdata_wire::{Frame, Message};

fn prefix(n: u8) -> Ipv6Prefix {
    Ipv6Prefix::new((0x2001_0002_0000_0000u128 | n as u128) << 64, 64).unwrap()
}

fn flags() -> PrefixFlags {
    "paros".parse().unwrap()
}

fn leader_with(prefixes: u8) -> DatasetStore {
    let mut store = DatasetStore::new(NodeId::new(1), true);
    for n in 0..prefixes {
        store
            .apply_local_change(LocalChange::AddPrefix {
                prefix: prefix(n),
                flags: flags(),
                context: ContextId::new(n + 1),
            })
            .unwrap();
    }
    store
}

fn bench_apply_delta(c: &mut Criterion) {
    let leader = leader_with(8);
    let delta = Delta::between(&Default::default(), leader.data());

    c.bench_function("apply_delta_8_prefixes", |b| {
        b.iter(|| {
            let mut store = DatasetStore::new(NodeId::new(2), false);
            black_box(store.apply_delta(black_box(&delta)).unwrap())
        })
    });
}

fn bench_snapshot_codec(c: &mut Criterion) {
    let leader = leader_with(15);
    let frame = Frame::new(NodeId::new(1), Message::Snapshot(leader.snapshot()));
    let bytes = frame.serialize().unwrap();

    c.bench_function("snapshot_encode_15", |b| {
        b.iter(|| black_box(frame.serialize().unwrap()))
    });

    c.bench_function("snapshot_decode_15", |b| {
        b.iter(|| black_box(Frame::parse(black_box(&bytes)).unwrap()))
    });
}

fn bench_chain_convergence(c: &mut Criterion) {
    init_test_tracing();

    c.bench_function("chain_8_publish_and_settle", |b| {
        b.iter(|| {
            let mut sim = MeshSimulator::with_seed(1);
            sim.add_node(1, Role::Authority).unwrap();
            for id in 2..=8 {
                sim.add_node(id, Role::Relay).unwrap();
                sim.link(id - 1, id).unwrap();
            }
            sim.start_all();
            sim.add_prefix(1, prefix(1), flags()).unwrap();
            black_box(sim.settle(100))
        })
    });
}

criterion_group!(
    benches,
    bench_apply_delta,
    bench_snapshot_codec,
    bench_chain_convergence
);
criterion_main!(benches);
