// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Benchmarks for port allocation.
//!
//! Run with: `cargo bench --bench ports`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;

use berth::instance::PortAllocator;

/// Allocate and release a single port in an otherwise empty range.
fn bench_allocate_release(c: &mut Criterion) {
    let ports = PortAllocator::new(9000, 9100).unwrap();

    let mut group = c.benchmark_group("port_allocator");
    group.throughput(Throughput::Elements(1));

    group.bench_function("allocate_release_empty", |b| {
        b.iter(|| {
            let port = ports.allocate(black_box("bench")).unwrap();
            ports.release(port);
        });
    });

    group.finish();
}

/// Allocation cost as the range fills up; the free port is always the last one.
fn bench_allocate_near_full(c: &mut Criterion) {
    let mut group = c.benchmark_group("port_allocator_fill");

    for size in [16u16, 256, 4096] {
        let ports = PortAllocator::new(10_000, 10_000 + size - 1).unwrap();
        for _ in 0..size - 1 {
            ports.allocate("filler").unwrap();
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &ports, |b, ports| {
            b.iter(|| {
                let port = ports.allocate(black_box("bench")).unwrap();
                ports.release(port);
            });
        });
    }

    group.finish();
}

/// Availability checks against a half-full range.
fn bench_is_available(c: &mut Criterion) {
    let ports = PortAllocator::new(9000, 9999).unwrap();
    for _ in 0..500 {
        ports.allocate("filler").unwrap();
    }

    c.bench_function("port_is_available", |b| {
        b.iter(|| {
            for port in (9000..10_000).step_by(97) {
                black_box(ports.is_available(black_box(port)));
            }
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_release,
    bench_allocate_near_full,
    bench_is_available
);
criterion_main!(benches);
