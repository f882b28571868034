use aicf_store::format::{next_line_number, number_record};
use aicf_store::reader::{InMemoryTail, StreamingTail, TailStrategy};
use aicf_store::storage::StreamOptions;
use aicf_store::{AicfStore, Config, DurabilityMode, Memory, PiiPolicy, RecordKind};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use std::hint::black_box;
use std::path::Path;
use tempfile::TempDir;
use tokio::runtime::Runtime;

const RECORD_COUNTS: &[usize] = &[1_000, 10_000];

fn bench_config(durability: DurabilityMode) -> Config {
    Config {
        durability,
        pii_policy: PiiPolicy::Redact,
        ..Config::default()
    }
}

/// Write `count` memory records straight to disk, bypassing the store.
fn seed_file(dir: &Path, count: usize) {
    let mut content = String::new();
    for i in 0..count {
        let body = if i % 10 == 0 {
            format!("entry {i} mentions the streaming reader")
        } else {
            format!("entry {i} filler content")
        };
        let payloads = vec![
            format!("@MEMORY:mem-{i}"),
            format!("id=mem-{i}"),
            "timestamp=2025-01-01T00:00:00Z".to_string(),
            "memory_type=episodic".to_string(),
            format!("content={body}"),
        ];
        content.push_str(&number_record(i as u64 + 1, &payloads));
    }
    std::fs::write(dir.join(RecordKind::Memory.file_name()), content)
        .expect("failed to seed memories");
}

fn seed_store(count: usize) -> TempDir {
    let temp_dir = tempfile::tempdir().expect("failed to create tempdir");
    seed_file(temp_dir.path(), count);
    temp_dir
}

fn bench_last_records(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to build runtime");
    let mut group = c.benchmark_group("last_records");

    for &count in RECORD_COUNTS {
        let temp_dir = seed_store(count);
        let store = rt
            .block_on(AicfStore::open_with_config(
                temp_dir.path(),
                bench_config(DurabilityMode::None),
            ))
            .expect("failed to open store");

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                rt.block_on(store.get_last_records(RecordKind::Memory, 20))
                    .expect("last records failed");
            });
        });

        drop(store);
        drop(temp_dir);
    }

    group.finish();
}

fn bench_tail_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("tail_strategy");
    let options = StreamOptions::default();

    for &count in RECORD_COUNTS {
        let temp_dir = seed_store(count);
        let path = temp_dir.path().join(RecordKind::Memory.file_name());

        let strategies: Vec<Box<dyn TailStrategy>> = vec![
            Box::new(InMemoryTail {
                max_line_bytes: options.max_line_bytes,
            }),
            Box::new(StreamingTail { options }),
        ];
        for strategy in &strategies {
            group.bench_with_input(
                BenchmarkId::new(strategy.name(), count),
                &count,
                |b, _| {
                    b.iter(|| {
                        let sections = strategy
                            .last_sections(&path, "MEMORY", 20)
                            .expect("tail failed");
                        black_box(sections);
                    });
                },
            );
        }

        drop(temp_dir);
    }

    group.finish();
}

fn bench_next_line_number(c: &mut Criterion) {
    let mut group = c.benchmark_group("next_line_number");
    let options = StreamOptions::default();

    for &count in RECORD_COUNTS {
        let temp_dir = seed_store(count);
        let path = temp_dir.path().join(RecordKind::Memory.file_name());

        group.bench_with_input(BenchmarkId::new("backward_scan", count), &count, |b, _| {
            b.iter(|| black_box(next_line_number(&path, 0, options).expect("numbering failed")));
        });
        group.bench_with_input(BenchmarkId::new("whole_file", count), &count, |b, _| {
            b.iter(|| {
                black_box(next_line_number(&path, u64::MAX, options).expect("numbering failed"))
            });
        });

        drop(temp_dir);
    }

    group.finish();
}

fn bench_search(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to build runtime");
    let mut group = c.benchmark_group("search");
    group.sample_size(20);

    for &count in RECORD_COUNTS {
        let temp_dir = seed_store(count);
        let store = rt
            .block_on(AicfStore::open_with_config(
                temp_dir.path(),
                bench_config(DurabilityMode::None),
            ))
            .expect("failed to open store");

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| {
                let report = rt.block_on(store.search("streaming reader", &[], 10));
                black_box(report);
            });
        });

        drop(store);
        drop(temp_dir);
    }

    group.finish();
}

// ---------------------------------------------------------------------------
// Write throughput across durability modes
// ---------------------------------------------------------------------------

const WRITE_BATCH: usize = 200;

fn bench_write_throughput(c: &mut Criterion) {
    let rt = Runtime::new().expect("failed to build runtime");
    let mut group = c.benchmark_group("write_throughput");
    group.sample_size(10);

    let modes: &[(&str, DurabilityMode)] = &[
        ("fsync", DurabilityMode::Fsync),
        ("flush_only", DurabilityMode::FlushOnly),
        ("none", DurabilityMode::None),
    ];

    for &(label, mode) in modes {
        group.throughput(Throughput::Elements(WRITE_BATCH as u64));
        group.bench_with_input(BenchmarkId::from_parameter(label), &mode, |b, &mode| {
            b.iter_with_setup(
                || {
                    let temp_dir = tempfile::tempdir().expect("failed to create tempdir");
                    let store = rt
                        .block_on(AicfStore::open_with_config(
                            temp_dir.path(),
                            bench_config(mode),
                        ))
                        .expect("failed to open store");
                    (temp_dir, store)
                },
                |(_temp_dir, store)| {
                    for i in 0..WRITE_BATCH {
                        rt.block_on(store.write_memory(Memory::new(
                            "episodic",
                            format!("bench content for record {i}"),
                        )))
                        .expect("write failed");
                    }
                },
            );
        });
    }

    group.finish();
}

fn criterion_config() -> Criterion {
    Criterion::default().sample_size(30)
}

criterion_group! {
    name = benches;
    config = criterion_config();
    targets = bench_last_records, bench_tail_strategies, bench_next_line_number, bench_search, bench_write_throughput
}
criterion_main!(benches);
