use criterion::{black_box, criterion_group, criterion_main, Criterion};

pub fn codec(c: &mut Criterion) {
    let source = include_str!("isp-tree.dts");
    let tree = dts_core::from_str(source).unwrap();

    c.bench_function("from_str isp-tree.dts", |b| {
        b.iter(|| dts_core::from_str(black_box(source)))
    });
    c.bench_function("to_string isp-tree.dts", |b| {
        b.iter(|| dts_core::to_string(black_box(&tree)))
    });
}

criterion_group!(benches, codec);
criterion_main!(benches);
