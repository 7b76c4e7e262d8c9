use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::collections::HashMap;
use taste_engine::algorithms::retriever::{InMemoryRetriever, ItemPredicate};
use taste_engine::algorithms::weighting::{aggregate, WeightingParams};
use taste_engine::algorithms::{popularity::rerank_by_popularity, VectorDimension};
use taste_engine::*;

const DIM: usize = 128;

fn catalog(size: u64) -> Vec<ItemEmbedding> {
    (1..=size)
        .map(|i| ItemEmbedding {
            item_id: ItemId::new(i).unwrap(),
            vector: (0..DIM).map(|j| ((i as usize + j) % 17) as f32 / 17.0 + 0.01).collect(),
            metadata: ItemMetadata {
                schema_version: METADATA_SCHEMA_VERSION,
                name: format!("Game {i}"),
                genres: vec![["Action", "RPG", "Puzzle"][i as usize % 3].to_string()],
                tags: vec![],
                review_score: Some(60.0 + (i % 40) as f32),
                review_count: (i * 37 % 10_000) as u32,
                release_year: Some(2010 + (i % 14) as u16),
                is_free: i % 5 == 0,
            },
        })
        .collect()
}

fn benchmark_preference_aggregation(c: &mut Criterion) {
    let user = UserId::new(1).unwrap();
    let items = catalog(500);
    let embeddings: HashMap<ItemId, ItemEmbedding> =
        items.iter().map(|item| (item.item_id, item.clone())).collect();
    let signals: Vec<OwnedItemSignal> = items
        .iter()
        .map(|item| OwnedItemSignal {
            user_id: user,
            item_id: item.item_id,
            playtime_minutes: (item.item_id.get() * 13 % 6000) as u32,
            last_played_at: Some(Utc::now()),
            completion_ratio: Some(0.5),
            genres: vec![],
        })
        .collect();
    let dimension = VectorDimension::new(DIM).unwrap();
    let params = WeightingParams::from(&Config::default().preference);
    let diversified = WeightingParams { diversify: true, ..params.clone() };
    let now = Utc::now();

    c.bench_function("aggregate_500_signals", |b| {
        b.iter(|| black_box(aggregate(&signals, &embeddings, dimension, &params, now).unwrap()))
    });

    c.bench_function("aggregate_500_signals_diversified", |b| {
        b.iter(|| black_box(aggregate(&signals, &embeddings, dimension, &diversified, now).unwrap()))
    });
}

fn benchmark_vector_retrieval(c: &mut Criterion) {
    let mut retriever = InMemoryRetriever::new(VectorDimension::new(DIM).unwrap());
    for item in catalog(10_000) {
        retriever.upsert(&item).unwrap();
    }
    let query = vec![0.5; DIM];

    c.bench_function("in_memory_retriever_search", |b| {
        let predicate = ItemPredicate::default();
        b.iter(|| black_box(retriever.search(&query, 50, &predicate).unwrap()))
    });

    c.bench_function("in_memory_retriever_filtered_search", |b| {
        let filters = RankingFilters {
            min_review_score: Some(80.0),
            genres: vec!["rpg".to_string()],
            ..RankingFilters::default()
        };
        let predicate = ItemPredicate::from_filters(&filters);
        b.iter(|| black_box(retriever.search(&query, 50, &predicate).unwrap()))
    });
}

fn benchmark_popularity_rerank(c: &mut Criterion) {
    let pool: Vec<(u64, u32)> = (0..150).map(|i| (i, (i * 7919 % 50_000) as u32)).collect();

    for score in [0u8, 100] {
        c.bench_function(&format!("popularity_rerank_{score}"), |b| {
            b.iter(|| {
                let mut candidates = pool.clone();
                black_box(rerank_by_popularity(&mut candidates, score, |(_, count)| *count))
            })
        });
    }
}

criterion_group!(
    benches,
    benchmark_preference_aggregation,
    benchmark_vector_retrieval,
    benchmark_popularity_rerank
);
criterion_main!(benches);
