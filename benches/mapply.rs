use blockmat::prelude::*;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

fn bench_mapply2(c: &mut Criterion) {
    let mut group = c.benchmark_group("mapply2_add_f64");
    for rows in [16 * 1024, 256 * 1024] {
        let a = DenseMatrix::random(rows, 8, Layout::Row, DType::F64, -1.0, 1.0, 1).unwrap();
        let b = DenseMatrix::random(rows, 8, Layout::Row, DType::F64, -1.0, 1.0, 2).unwrap();
        let op = BulkOperate::same(DType::F64, BinaryOp::Add);
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |bench, _| {
            bench.iter(|| {
                let mut c = a.mapply2(&b, op).unwrap();
                c.materialize_self().unwrap();
                black_box(c)
            })
        });
    }
    group.finish();
}

fn bench_aggregate(c: &mut Criterion) {
    let mut group = c.benchmark_group("aggregate_sum_f64");
    let a = DenseMatrix::random(512 * 1024, 4, Layout::Row, DType::F64, -1.0, 1.0, 3).unwrap();
    group.bench_function("512k_x4", |bench| {
        bench.iter(|| black_box(a.sum().unwrap()))
    });
    group.finish();
}

criterion_group!(benches, bench_mapply2, bench_aggregate);
criterion_main!(benches);
