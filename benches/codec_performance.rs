use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use datastore_cache::chunk::{map_request, ArrayExtents};
use datastore_cache::request::Point;
use datastore_cache::{ArrayData, ChunkCodec, Request};

fn grid(side: usize) -> (ArrayData, ArrayExtents) {
    let data: Vec<f32> = (0..side * side).map(|v| (v % 1000) as f32 * 0.25).collect();
    (
        data.into(),
        ArrayExtents::from_record_sizes(&[side, side]).unwrap(),
    )
}

fn forward_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("forward");

    for side in [256, 1024, 2048].iter() {
        let (data, extents) = grid(*side);
        group.throughput(Throughput::Bytes(data.size_in_bytes() as u64));
        for chunk_size in [64, 256].iter() {
            let codec = ChunkCodec::new(*chunk_size).unwrap();
            group.bench_with_input(
                BenchmarkId::new(format!("cs{}", chunk_size), side),
                &data,
                |b, data| b.iter(|| black_box(codec.forward(data, &extents).unwrap())),
            );
        }
    }

    group.finish();
}

fn assemble_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("assemble");

    for side in [256, 1024, 2048].iter() {
        let (data, extents) = grid(*side);
        let codec = ChunkCodec::new(256).unwrap();
        let record = codec.forward(&data, &extents).unwrap();
        group.throughput(Throughput::Bytes(data.size_in_bytes() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(side), &record, |b, record| {
            b.iter(|| black_box(codec.assemble(record).unwrap()))
        });
    }

    group.finish();
}

fn request_benchmarks(c: &mut Criterion) {
    let mut group = c.benchmark_group("map_request");

    let (data, extents) = grid(2048);
    let codec = ChunkCodec::new(256).unwrap();
    let record = codec.forward(&data, &extents).unwrap();

    let requests = [
        ("points", Request::Points((0..64).map(|i| Point::new(i * 31, i * 29)).collect())),
        ("row_line", Request::RowLine(vec![0, 1000, 2047])),
        ("column_line", Request::ColumnLine(vec![17])),
        (
            "slab",
            Request::Slab {
                min: Point::new(200, 200),
                max: Point::new(600, 600),
            },
        ),
    ];

    for (name, request) in requests.iter() {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| black_box(map_request(&codec, &record, request).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    forward_benchmarks,
    assemble_benchmarks,
    request_benchmarks
);
criterion_main!(benches);
