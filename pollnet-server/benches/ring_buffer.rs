use std::hint::black_box;

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use pollnet_server::ring::RingBuffer;

const CAPACITY: usize = 8 * 1460;

fn bench_write_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");
    for chunk in [64usize, 536, 1460] {
        let data = vec![0xA5u8; chunk];
        let mut out = vec![0u8; chunk];
        group.throughput(Throughput::Bytes(chunk as u64));
        group.bench_with_input(BenchmarkId::new("write_read", chunk), &chunk, |b, _| {
            let mut ring = RingBuffer::with_capacity(CAPACITY);
            b.iter(|| {
                ring.write(black_box(&data)).unwrap();
                black_box(ring.read(&mut out));
            })
        });
    }
    group.finish();
}

fn bench_wrapping_read(c: &mut Criterion) {
    let mut ring = RingBuffer::with_capacity(CAPACITY);
    let data = vec![0x5Au8; 1000];
    let mut out = vec![0u8; 1000];
    // Offset the cursors so reads regularly straddle the end of the storage.
    ring.write(&vec![0; 700]).unwrap();
    ring.read(&mut vec![0; 700]);
    c.bench_function("ring_buffer/acknowledged_read", |b| {
        b.iter(|| {
            ring.write(&data).unwrap();
            let mut acknowledged = 0;
            ring.read_with(&mut out, |n| acknowledged += n);
            black_box(acknowledged)
        })
    });
}

criterion_group!(benches, bench_write_read, bench_wrapping_read);
criterion_main!(benches);
