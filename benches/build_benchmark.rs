use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::thread;
use tempfile::TempDir;

use minify_builder::bridge::pipe;
use minify_builder::builder::{BuildOptions, Builder};
use minify_builder::prefs::{ConfigStore, TomlPreferences};
use minify_builder::resource::ResourcePath;
use minify_builder::strategy::Strategy;
use minify_builder::workspace::FsWorkspace;

/// Create N stylesheets, each configured for the CSS compressor
fn create_stylesheets(root: &Path, count: usize) -> Builder<FsWorkspace> {
    for i in 0..count {
        let dir = root.join(format!("css{}", i % 10));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(format!("style{}.css", i)),
            format!(".rule{i} {{\n  color: #ff0000;\n  margin: 0px 0px 0px 0px;\n}}\n"),
        )
        .unwrap();
    }

    let state = root.join(".minify");
    let workspace = FsWorkspace::open(root, &state, "UTF-8").unwrap();
    let mut prefs = ConfigStore::new(TomlPreferences::in_memory());
    for i in 0..count {
        let path = ResourcePath::new(&format!("css{}/style{}.css", i % 10, i)).unwrap();
        prefs.apply(&path, Some(&Strategy::CssCompress)).unwrap();
    }
    Builder::new(workspace, prefs, BuildOptions::default())
}

/// Benchmark pipe throughput with different chunk sizes
fn bench_pipe(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipe_1mb");
    let payload = vec![b'x'; 1024 * 1024];
    group.throughput(Throughput::Bytes(payload.len() as u64));

    for chunk_size in [256usize, 8 * 1024, 64 * 1024].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(chunk_size),
            chunk_size,
            |b, &chunk_size| {
                b.iter(|| {
                    let (mut writer, mut reader) = pipe(16, chunk_size);
                    let data = payload.clone();
                    let producer = thread::spawn(move || {
                        writer.write_all(&data).unwrap();
                        writer.finish().unwrap()
                    });
                    let mut out = Vec::with_capacity(1024 * 1024);
                    reader.read_to_end(&mut out).unwrap();
                    producer.join().unwrap();
                    black_box(out)
                })
            },
        );
    }

    group.finish();
}

/// Benchmark a full CSS build with different file counts
fn bench_full_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_build_css");
    group.sample_size(10);

    for file_count in [10, 100].iter() {
        let temp = TempDir::new().unwrap();
        let mut builder = create_stylesheets(temp.path(), *file_count);

        group.throughput(Throughput::Elements(*file_count as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(file_count),
            file_count,
            |b, _| b.iter(|| black_box(builder.full_build())),
        );
    }

    group.finish();
}

criterion_group!(benches, bench_pipe, bench_full_build);
criterion_main!(benches);
