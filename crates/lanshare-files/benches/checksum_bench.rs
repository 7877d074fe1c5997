//! Performance benchmarks for lanshare-files.
//!
//! Run with: `cargo bench -p lanshare-files`

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use lanshare_files::DEFAULT_CHUNK_SIZE;
use lanshare_files::checksum::{StreamingChecksum, checksum_file};
use rand::RngCore;
use std::io::Write;
use tempfile::NamedTempFile;

/// Streaming checksum throughput across chunk sizes
fn bench_streaming_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("streaming_checksum");

    let mut data = vec![0u8; 8 * 1024 * 1024];
    rand::thread_rng().fill_bytes(&mut data);
    group.throughput(Throughput::Bytes(data.len() as u64));

    for chunk_size in [4 * 1024, 64 * 1024, 256 * 1024, DEFAULT_CHUNK_SIZE] {
        group.bench_with_input(
            BenchmarkId::new("chunk_size", chunk_size),
            &chunk_size,
            |b, &size| {
                b.iter(|| {
                    let mut acc = StreamingChecksum::new();
                    for chunk in data.chunks(size) {
                        acc.update(black_box(chunk));
                    }
                    black_box(acc.finalize())
                });
            },
        );
    }

    group.finish();
}

/// File checksum including disk reads
fn bench_checksum_file(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum_file");

    for size_mb in [1usize, 16] {
        let mut data = vec![0u8; size_mb * 1024 * 1024];
        rand::thread_rng().fill_bytes(&mut data);
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&data).unwrap();
        temp.flush().unwrap();

        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_with_input(BenchmarkId::new("size_mb", size_mb), &temp, |b, file| {
            b.iter(|| black_box(checksum_file(file.path(), DEFAULT_CHUNK_SIZE).unwrap()));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_streaming_checksum, bench_checksum_file);
criterion_main!(benches);
