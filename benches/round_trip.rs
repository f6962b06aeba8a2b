use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hpi::{Archive, ArchiveWriter, CompressionFlavor, StagedFile};
use std::hint::black_box;
use std::io::Cursor;
use std::time::Duration;

fn generate_test_data(size: usize, pattern: &str) -> Vec<u8> {
    match pattern {
        "text" => {
            let base = b"Lorem ipsum dolor sit amet, consectetur adipiscing elit. ";
            base.iter().cycle().take(size).copied().collect()
        }
        "binary" => (0..size).map(|i| ((i * 17 + 11) % 256) as u8).collect(),
        _ => panic!("Unknown pattern: {pattern}"),
    }
}

fn build_archive_bytes(files: &[(String, Vec<u8>)], flavor: CompressionFlavor) -> Vec<u8> {
    let mut writer = ArchiveWriter::new();
    for (path, data) in files {
        let staged = StagedFile::compress(data, flavor, |_| {}).unwrap();
        writer.add_file(path, staged).unwrap();
    }
    let mut out = Vec::new();
    writer.write(&mut out).unwrap();
    out
}

fn archive_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("archive_round_trip");
    group.measurement_time(Duration::from_secs(15));
    group.sample_size(20);

    for size in [10240usize, 102400, 1048576] {
        let files: Vec<(String, Vec<u8>)> = ["text", "binary"]
            .iter()
            .enumerate()
            .map(|(i, pattern)| {
                (format!("dir{}/file.{}", i, pattern), generate_test_data(size, pattern))
            })
            .collect();
        group.throughput(Throughput::Bytes((size * files.len()) as u64));

        group.bench_with_input(BenchmarkId::new("write_deflate", size), &files, |b, files| {
            b.iter(|| build_archive_bytes(black_box(files), CompressionFlavor::Deflate))
        });

        let bytes = build_archive_bytes(&files, CompressionFlavor::Deflate);
        group.bench_with_input(BenchmarkId::new("read_all", size), &bytes, |b, bytes| {
            b.iter(|| {
                let archive = Archive::from_reader(Cursor::new(bytes.clone())).unwrap();
                let paths: Vec<String> = archive.entries().map(|(p, _)| p.to_string()).collect();
                for path in paths {
                    black_box(archive.read_file(&path).unwrap());
                }
            })
        });
    }
    group.finish();
}

criterion_group!(benches, archive_round_trip);
criterion_main!(benches);
