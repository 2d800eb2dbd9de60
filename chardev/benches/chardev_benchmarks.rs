//
// Copyright 2017-2026 Hans W. Uhlig. All Rights Reserved.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//! Benchmarks for chardev output paths and the byte ring

use chario::{BackendOptions, Chardev, ChardevOptions, RingBuffer, timestamp_prefix};
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use tokio::runtime::Runtime;

// ============================================================================
// Ring Buffer Benchmarks
// ============================================================================

fn bench_ring_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_write_read");

    for size in [64, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
            let mut ring = RingBuffer::new(4096).unwrap();
            let mut out = vec![0u8; size];
            b.iter(|| {
                ring.write(black_box(&data));
                black_box(ring.read_into(&mut out));
            });
        });
    }

    group.finish();
}

fn bench_ring_overwrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_overwrite");
    let data = vec![b'x'; 16 * 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("16k_into_1k", |b| {
        let mut ring = RingBuffer::new(1024).unwrap();
        b.iter(|| ring.write(black_box(&data)));
    });
    group.finish();
}

// ============================================================================
// Chardev Output Benchmarks
// ============================================================================

fn bench_chardev_write(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("chardev_write");
    let data = vec![b'a'; 1024];
    group.throughput(Throughput::Bytes(data.len() as u64));

    let null = rt
        .block_on(Chardev::open(ChardevOptions::new("bench-null", BackendOptions::Null)))
        .unwrap();
    group.bench_function("null", |b| {
        b.to_async(&rt).iter(|| async { null.write_all(black_box(&data)).await.unwrap() });
    });

    let ringbuf = rt
        .block_on(Chardev::open(ChardevOptions::new(
            "bench-ring",
            BackendOptions::Ringbuf { size: 65536 },
        )))
        .unwrap();
    group.bench_function("ringbuf", |b| {
        b.to_async(&rt).iter(|| async { ringbuf.write_all(black_box(&data)).await.unwrap() });
    });

    group.finish();
}

fn bench_timestamp_prefix(c: &mut Criterion) {
    c.bench_function("timestamp_prefix", |b| {
        b.iter(|| timestamp_prefix(black_box(45_296_789)));
    });
}

criterion_group!(
    benches,
    bench_ring_write_read,
    bench_ring_overwrite,
    bench_chardev_write,
    bench_timestamp_prefix
);
criterion_main!(benches);
