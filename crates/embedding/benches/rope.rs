use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use embedding::positional::rope::{Rope, RopeConfig};

fn bench_rope(c: &mut Criterion) {
    let device = Device::Cpu;
    let rope = Rope::new(RopeConfig {
        head_dim: 128,
        ..RopeConfig::default()
    })
    .expect("rope config");

    let mut group = c.benchmark_group("rope_apply");
    for &rows in &[1usize, 32, 512] {
        let x = Tensor::randn(0f32, 1.0, (rows, 32, 128), &device).expect("input");
        let positions = Tensor::arange(0u32, rows as u32, &device)
            .and_then(|p| p.to_dtype(DType::F32))
            .expect("positions");
        group.bench_with_input(BenchmarkId::from_parameter(rows), &rows, |b, _| {
            b.iter(|| {
                let out = rope.apply(&x, &positions, None).expect("rope");
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_rope);
criterion_main!(benches);
