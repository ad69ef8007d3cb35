//! Benchmark for topology evaluation and placement
//!
//! Target: a full pass decision over 1K nodes well under a millisecond

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use storage_autoscaler::{
    decide, Allocator, Class, Device, FakeCloud, FakeStorage, Manager, Config,
    RoundRobinAllocator, StorageNode, Topology,
};
use std::sync::Arc;

const NODES: usize = 1000;

fn class() -> Class {
    Class {
        name: "gp2".into(),
        watermark_high: 75,
        watermark_low: 25,
        disk_size_gb: 8,
        maximum_total_size_gb: u64::MAX / 2,
        minimum_total_size_gb: 0,
        ..Default::default()
    }
}

fn large_topology() -> Topology {
    let nodes = (0..NODES)
        .map(|i| {
            let mut node = StorageNode::new(format!("i-{:08x}", i));
            for d in 0..(i % 8) {
                node.devices.push(Device {
                    id: format!("vol-{:08x}-{}", i, d),
                    path: format!("/dev/xvd{}", (b'f' + d as u8) as char),
                    class: "gp2".into(),
                    size_gb: 8,
                    utilization: ((i * 7 + d * 13) % 100) as u32,
                    ..Default::default()
                });
            }
            node
        })
        .collect();
    Topology::new(nodes)
}

fn bench_utilization(c: &mut Criterion) {
    let mut group = c.benchmark_group("topology");
    group.throughput(Throughput::Elements(NODES as u64));

    let topology = large_topology();
    let class = class();

    group.bench_function("utilization", |b| {
        b.iter(|| black_box(topology.utilization(black_box(&class))));
    });

    group.bench_function("decide", |b| {
        b.iter(|| {
            let utilization = topology.utilization(&class);
            let total = topology.total_storage(&class);
            black_box(decide(&class, utilization, total))
        });
    });

    group.finish();
}

fn bench_allocator(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocator");
    group.throughput(Throughput::Elements(NODES as u64));

    let topology = large_topology();
    let class = class();
    let allocator = RoundRobinAllocator::new();

    group.bench_function("node_to_add_storage", |b| {
        b.iter(|| {
            let _ = black_box(allocator.determine_node_to_add_storage(&topology, &class));
        });
    });

    group.bench_function("storage_to_remove", |b| {
        b.iter(|| {
            black_box(allocator.determine_storage_to_remove(&topology, &class).is_some());
        });
    });

    group.finish();
}

fn bench_reconcile_pass(c: &mut Criterion) {
    let mut group = c.benchmark_group("manager");
    group.throughput(Throughput::Elements(1));

    let rt = tokio::runtime::Runtime::new().unwrap();
    let manager = Manager::new(
        Config::new(vec![class()]),
        Arc::new(FakeCloud::new()),
        Arc::new(FakeStorage::new(large_topology())),
    )
    .unwrap();

    // Mid-range utilization keeps every pass a no-op
    group.bench_function("reconcile_no_change", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = manager.reconcile().await;
            });
        });
    });

    group.finish();
}

criterion_group!(benches, bench_utilization, bench_allocator, bench_reconcile_pass);
criterion_main!(benches);
