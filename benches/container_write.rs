use criterion::{black_box, BatchSize, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};
use tempfile::tempdir;

use telemetry_store::container::WriterOptions;
use telemetry_store::{ContainerReader, ContainerWriter, DecodedSignal, Discovery, VariableRef};

const ROWS: i64 = 20_000;
const COLUMNS: i32 = 16;

fn discovery() -> Discovery {
    Discovery::new(
        (0..ROWS).map(|row| row * 10).collect(),
        (0..COLUMNS)
            .map(|col| VariableRef::new(col, format!("signal_{col}")))
            .collect(),
    )
}

fn signals() -> Vec<DecodedSignal> {
    let mut out = Vec::new();
    for row in 0..ROWS {
        // Roughly a quarter of the cells carry a value.
        for col in (row as i32 % 4..COLUMNS).step_by(4) {
            out.push(DecodedSignal {
                timestamp: row * 10,
                sender: String::new(),
                message: "M".to_string(),
                name: format!("signal_{col}"),
                value: row as f64 + f64::from(col) / 100.0,
                unit: String::new(),
            });
        }
    }
    out
}

fn bench_write(c: &mut Criterion) {
    let discovery = discovery();
    let signals = signals();
    let mut group = c.benchmark_group("container_write");
    for &window in &[256_usize, 1000, 4096] {
        group.bench_with_input(BenchmarkId::from_parameter(window), &window, |b, &window| {
            b.iter_batched(
                || tempdir().expect("tempdir"),
                |dir| {
                    let options = WriterOptions {
                        window,
                        compression_level: 3,
                    };
                    let mut writer = ContainerWriter::create_with_options(
                        dir.path().join("1.h5"),
                        &discovery,
                        options,
                    )
                    .expect("create");
                    for signal in &signals {
                        writer.write(black_box(signal)).expect("write");
                    }
                    writer.finish().expect("finish");
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_project(c: &mut Criterion) {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("1.h5");
    let mut writer = ContainerWriter::create(&path, &discovery()).expect("create");
    for signal in &signals() {
        writer.write(signal).expect("write");
    }
    writer.finish().expect("finish");
    let reader = ContainerReader::open(&path).expect("open");

    c.bench_function("container_read_4_of_16", |b| {
        b.iter(|| reader.read(black_box(&[3, 7, 11, 99])).expect("read"));
    });
}

criterion_group!(benches, bench_write, bench_project);
criterion_main!(benches);
