//! Decode-step benchmark: one new token attending a cache of growing length.
//! Run with: `cargo bench -p attention decode_step`

use attention::{CacheLayout, CausalCache, KeyValueCache};
use candle_core::{DType, Device, Tensor};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const HEADS: usize = 32;
const KV_HEADS: usize = 8;
const HEAD_DIM: usize = 128;

fn filled_cache(device: &Device, len: usize) -> CausalCache {
    let layout = CacheLayout::new(1, KV_HEADS, HEAD_DIM).expect("layout");
    let mut cache = CausalCache::new(layout, device.clone());
    let positions: Vec<usize> = (0..len).collect();
    let kv = Tensor::randn(0f32, 1.0, (len, KV_HEADS, HEAD_DIM), device).expect("kv");
    cache.start_forward(&positions).expect("start");
    cache.set_layer(0).expect("layer");
    cache.append(&kv, &kv).expect("append");
    cache.commit().expect("commit");
    cache
}

fn bench_decode_step(c: &mut Criterion) {
    let device = Device::Cpu;
    let mut group = c.benchmark_group("decode_step");
    for &len in &[128usize, 512, 2048] {
        let mut cache = filled_cache(&device, len);
        let query = Tensor::randn(0f32, 1.0, (1, HEADS, HEAD_DIM), &device).expect("query");
        let kv = Tensor::zeros((1, KV_HEADS, HEAD_DIM), DType::F32, &device).expect("kv");
        let scale = 1.0 / (HEAD_DIM as f64).sqrt();

        // Rolling back after each step keeps the cache at `len` rows.
        group.bench_with_input(BenchmarkId::from_parameter(len), &len, |b, &len| {
            b.iter(|| {
                cache.start_forward(&[len]).expect("start");
                cache.set_layer(0).expect("layer");
                cache.append(&kv, &kv).expect("append");
                let out = cache.attend(&query, scale).expect("attend");
                cache.rollback();
                black_box(out);
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_decode_step);
criterion_main!(benches);
