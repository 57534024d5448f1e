use std::sync::Arc;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use facematch_rpforest::{ForestConfig, ForestIndex, VectorSet};

fn random_unit_vec(dim: usize, seed: u64) -> Vec<f32> {
    let mut v = Vec::with_capacity(dim);
    let mut state = seed;
    for _ in 0..dim {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        v.push(((state >> 33) as f32) / (u32::MAX as f32) - 0.5);
    }
    let norm: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum::<f64>().sqrt();
    if norm > 0.0 {
        let s = (1.0 / norm) as f32;
        for x in &mut v {
            *x *= s;
        }
    }
    v
}

fn gallery(n: usize, dim: usize) -> Arc<VectorSet> {
    Arc::new(
        VectorSet::load((0..n).map(|i| (format!("face-{i}"), random_unit_vec(dim, i as u64 + 1))))
            .expect("valid gallery"),
    )
}

fn bench_build(c: &mut Criterion) {
    let set = gallery(2000, 128);
    let cfg = ForestConfig {
        num_trees: 10,
        seed: 1,
        ..Default::default()
    };

    c.bench_function("rpforest_build_128d_2000v_10t", |b| {
        b.iter(|| {
            let _ = black_box(ForestIndex::build(set.clone(), cfg.clone()));
        });
    });
}

fn bench_search(c: &mut Criterion) {
    let index = ForestIndex::build(
        gallery(10_000, 128),
        ForestConfig {
            num_trees: 20,
            seed: 2,
            ..Default::default()
        },
    )
    .expect("build forest");
    let query = random_unit_vec(128, 999_999);

    c.bench_function("rpforest_search_128d_10000v_20t_k5", |b| {
        b.iter(|| {
            let _ = black_box(index.search(black_box(&query), 5));
        });
    });
}

criterion_group!(benches, bench_build, bench_search);
criterion_main!(benches);
