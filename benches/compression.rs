use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hpi::bitstream::BitWriter;
use hpi::zopfli::{deflate, BlockType, ZopfliOptions};
use hpi::{compress_chunk, CompressionFlavor, CHUNK_SIZE};
use std::hint::black_box;
use std::time::Duration;

fn generate_test_data(size: usize, pattern: &str) -> Vec<u8> {
    match pattern {
        "text" => {
            let base = b"[UNITINFO] { UnitName=ARMCOM; Side=ARM; Description=Commander; } ";
            base.iter().cycle().take(size).copied().collect()
        }
        "binary" => (0..size).map(|i| ((i * 17 + 11) % 256) as u8).collect(),
        "random" => (0..size)
            .map(|i| {
                let x = i as u32;
                (x.wrapping_mul(1664525).wrapping_add(1013904223) >> 13) as u8
            })
            .collect(),
        _ => panic!("Unknown pattern: {}", pattern),
    }
}

fn chunk_flavors(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunk_compression");
    group.measurement_time(Duration::from_secs(10));
    group.sample_size(10);

    for pattern in ["text", "binary", "random"] {
        let data = generate_test_data(CHUNK_SIZE, pattern);
        group.throughput(Throughput::Bytes(data.len() as u64));

        for flavor in [
            CompressionFlavor::Deflate,
            CompressionFlavor::Zopfli { iterations: 1 },
            CompressionFlavor::Zopfli { iterations: 15 },
        ] {
            group.bench_with_input(
                BenchmarkId::new(flavor.to_string(), pattern),
                &data,
                |b, data| b.iter(|| compress_chunk(black_box(data), flavor).unwrap()),
            );
        }
    }
    group.finish();
}

fn block_splitting_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("zopfli_block_splitting");
    group.sample_size(10);

    let mut data = generate_test_data(CHUNK_SIZE / 2, "text");
    data.extend(generate_test_data(CHUNK_SIZE / 2, "random"));
    group.throughput(Throughput::Bytes(data.len() as u64));

    let modes = [
        ("split_first", ZopfliOptions::default().with_iteration_count(5)),
        (
            "split_last",
            ZopfliOptions::default()
                .with_iteration_count(5)
                .with_block_splitting_last(true),
        ),
        (
            "no_split",
            ZopfliOptions::default()
                .with_iteration_count(5)
                .with_block_splitting(false),
        ),
    ];
    for (name, options) in modes {
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| {
                let mut out = BitWriter::new();
                deflate(&options, BlockType::Dynamic, true, black_box(data), &mut out).unwrap();
                out.into_inner()
            })
        });
    }
    group.finish();
}

criterion_group!(benches, chunk_flavors, block_splitting_modes);
criterion_main!(benches);
