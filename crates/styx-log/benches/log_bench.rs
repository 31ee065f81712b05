//! Log Performance Benchmarks
//!
//! ## What We Benchmark
//!
//! ### 1. Append (`bench_append`)
//! - Records/second through an Auto writer, including the closing fsync
//! - 100 B and 1 KiB payloads
//!
//! ### 2. Sequential Read (`bench_sequential_read`)
//! - Full scan of a pre-written log with a non-follow reader
//!
//! ### 3. Seek (`bench_seek`)
//! - Seek to 25%, 50% and 90% of the log, then read 100 records
//! - Seeks go through the sparse index, so cost should not grow with the
//!   target position
//!
//! ## Running Benchmarks
//!
//! ```bash
//! cargo bench -p styx-log
//! cargo bench -p styx-log --bench log_bench seek
//! ```

use std::path::Path;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use styx_log::{Error, IoMode, Log, LogConfig, Options, Record, Whence};
use tempfile::TempDir;
use tokio::runtime::Runtime;

const BUFFER_SIZE: usize = 64 * 1024;
const PREFILL: i64 = 10_000;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn bench_config() -> LogConfig {
    LogConfig {
        segment_max_size: 4 * 1024 * 1024,
        index_after_size: 4096,
        ..Default::default()
    }
}

async fn append(log: &Log, count: i64, size: usize) {
    let payload = Record::new(vec![b'x'; size]);
    let mut writer = log.new_writer(BUFFER_SIZE, IoMode::Auto).await.unwrap();
    for _ in 0..count {
        writer.write(&payload).await.unwrap();
    }
    writer.close().await.unwrap();
}

async fn prefilled(path: &Path) -> Log {
    let log = Log::create(path, bench_config(), Options::default())
        .await
        .unwrap();
    append(&log, PREFILL, 1024).await;
    log
}

fn bench_append(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("append");
    let count = 1000;

    for size in [100usize, 1024] {
        let dir = TempDir::new().unwrap();
        let log = rt
            .block_on(Log::create(dir.path().join("log"), bench_config(), Options::default()))
            .unwrap();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.to_async(&rt).iter(|| append(&log, count, size));
        });

        rt.block_on(log.close()).unwrap();
    }

    group.finish();
}

fn bench_sequential_read(c: &mut Criterion) {
    let rt = runtime();
    let dir = TempDir::new().unwrap();
    let log = rt.block_on(prefilled(&dir.path().join("log")));

    let mut group = c.benchmark_group("sequential_read");
    group.throughput(Throughput::Elements(PREFILL as u64));
    group.bench_function("1KiB", |b| {
        b.to_async(&rt).iter(|| async {
            let mut reader = log.new_reader(BUFFER_SIZE, false, IoMode::Auto).await.unwrap();
            let mut record = Record::with_capacity(1024);
            let mut count = 0;
            loop {
                match reader.read(&mut record).await {
                    Ok(_) => count += 1,
                    Err(Error::Eof) => break,
                    Err(e) => panic!("read failed: {e}"),
                }
            }
            black_box(count)
        });
    });
    group.finish();

    rt.block_on(log.close()).unwrap();
}

fn bench_seek(c: &mut Criterion) {
    let rt = runtime();
    let dir = TempDir::new().unwrap();
    let log = rt.block_on(prefilled(&dir.path().join("log")));

    let mut group = c.benchmark_group("seek");
    for percent in [25i64, 50, 90] {
        let target = PREFILL * percent / 100;
        group.bench_with_input(BenchmarkId::from_parameter(percent), &target, |b, &target| {
            b.to_async(&rt).iter(|| async {
                let mut reader = log.new_reader(BUFFER_SIZE, false, IoMode::Auto).await.unwrap();
                reader.seek(target, Whence::Origin).await.unwrap();
                let mut record = Record::with_capacity(1024);
                for _ in 0..100 {
                    reader.read(&mut record).await.unwrap();
                }
                black_box(reader.tell())
            });
        });
    }
    group.finish();

    rt.block_on(log.close()).unwrap();
}

criterion_group!(benches, bench_append, bench_sequential_read, bench_seek);
criterion_main!(benches);
