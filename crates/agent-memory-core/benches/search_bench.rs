//! Benchmarks for the fusion and reranking hot paths.
//! Run with: cargo bench -p agent-memory-core

use agent_memory_core::search::{mmr_select, reciprocal_rank_fusion};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;

fn synthetic_ranked(n: usize) -> Vec<(String, f32)> {
    (0..n).map(|i| (format!("mem-{i}"), 1.0 - (i as f32 / n as f32))).collect()
}

fn synthetic_embeddings(n: usize, dim: usize) -> HashMap<String, Vec<f32>> {
    (0..n)
        .map(|i| {
            let v: Vec<f32> = (0..dim).map(|d| ((i + d) % 7) as f32 / 7.0).collect();
            (format!("mem-{i}"), v)
        })
        .collect()
}

fn bench_reciprocal_rank_fusion(c: &mut Criterion) {
    let semantic = synthetic_ranked(200);
    let lexical = synthetic_ranked(200);

    c.bench_function("reciprocal_rank_fusion_200", |b| {
        b.iter(|| {
            black_box(reciprocal_rank_fusion(&[&semantic, &lexical], 60.0));
        })
    });
}

fn bench_mmr_select(c: &mut Criterion) {
    let ranked = synthetic_ranked(100);
    let embeddings = synthetic_embeddings(100, 32);

    c.bench_function("mmr_select_100_to_10", |b| {
        b.iter(|| {
            black_box(mmr_select(&ranked, &embeddings, 0.7, 10));
        })
    });
}

criterion_group!(benches, bench_reciprocal_rank_fusion, bench_mmr_select);
criterion_main!(benches);
