use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use logpipe::{CommitSink, InputBuffer, PerThread};
use std::sync::Arc;

struct NullSink;

impl CommitSink for NullSink {
    fn commit(&self) {}
}

fn benchmark_allocate_discard(c: &mut Criterion) {
    let mut group = c.benchmark_group("InputBuffer_Hot_Path");

    for frame_size in [16usize, 64, 256, 1024].iter() {
        group.throughput(Throughput::Bytes(*frame_size as u64));
        group.bench_with_input(
            BenchmarkId::new("allocate_commit_discard", frame_size),
            frame_size,
            |b, &frame_size| {
                let buffer = InputBuffer::new(64 * 1024, 64, Arc::new(NullSink)).unwrap();
                let base = buffer.frame_ptr(0).as_ptr() as usize;
                let mut prev_end = 0usize;

                b.iter(|| {
                    let frame = buffer.allocate_input_frame(frame_size);
                    let offset = frame.as_ptr() as usize - base;
                    buffer.commit();
                    // The single-frame cycle keeps the buffer drained, so a
                    // frame at offset zero after the first one means the
                    // allocation went through the marker path.
                    if offset == 0 && prev_end != 0 {
                        buffer.wraparound();
                    }
                    buffer.discard_input_frame(frame_size);
                    prev_end = buffer.input_end();
                });
            },
        );
    }

    group.finish();
}

fn benchmark_per_thread_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("PerThread_Get");

    group.bench_function("cached_get", |b| {
        let manager = PerThread::new(|| Ok(0u64)).unwrap();
        // Prime the slot so the loop measures the fast path only
        manager.get().unwrap();

        b.iter(|| {
            let value = manager.get().unwrap();
            std::hint::black_box(value);
        });
    });

    group.finish();
}

criterion_group!(benches, benchmark_allocate_discard, benchmark_per_thread_get);
criterion_main!(benches);
