#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::Arc;
use taste_engine::algorithms::{normalized, VectorDimension};
use taste_engine::services::embedding::EmbeddingProvider;
use taste_engine::services::entitlement::StaticEntitlements;
use taste_engine::*;

pub const DIM: usize = 4;

/// Maps a few keywords onto fixed axes so text queries land near the
/// matching catalog items.
pub struct KeywordProvider;

#[async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn dimension(&self) -> VectorDimension {
        VectorDimension::new(DIM).unwrap()
    }

    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let text = text.to_lowercase();
        let mut vector = vec![0.05; DIM];
        for (axis, keyword) in ["space", "farm", "horror", "puzzle"].iter().enumerate() {
            if text.contains(keyword) {
                vector[axis] += 1.0;
            }
        }
        Ok(vector)
    }
}

pub fn config() -> Config {
    let mut config = Config::default();
    config.vector.dimension = DIM;
    config
}

pub fn state_with(config: Config) -> (AppState, Arc<StaticEntitlements>) {
    let gate = Arc::new(StaticEntitlements::new());
    let state = AppState::in_memory(config, Arc::new(KeywordProvider), gate.clone()).unwrap();
    (state, gate)
}

pub fn state() -> (AppState, Arc<StaticEntitlements>) {
    state_with(config())
}

pub fn user(id: u64) -> UserId {
    UserId::new(id).unwrap()
}

pub fn id(raw: u64) -> ItemId {
    ItemId::new(raw).unwrap()
}

pub fn unit(vector: &[f32]) -> Vec<f32> {
    normalized(vector).unwrap()
}

pub fn item(raw: u64, vector: &[f32], review_count: u32, tags: &[&str]) -> ItemEmbedding {
    ItemEmbedding {
        item_id: id(raw),
        vector: vector.to_vec(),
        metadata: ItemMetadata {
            schema_version: METADATA_SCHEMA_VERSION,
            name: format!("Game {raw}"),
            genres: vec!["Indie".to_string()],
            tags: tags.iter().map(|t| t.to_string()).collect(),
            review_score: Some(85.0),
            review_count,
            release_year: Some(2021),
            is_free: false,
        },
    }
}

pub fn signal(user_id: UserId, raw: u64, playtime_minutes: u32) -> OwnedItemSignal {
    OwnedItemSignal {
        user_id,
        item_id: id(raw),
        playtime_minutes,
        last_played_at: None,
        completion_ratio: None,
        genres: vec![],
    }
}

pub async fn ingest_all(state: &AppState, items: Vec<ItemEmbedding>) {
    for item in items {
        taste_engine::services::vector_db::ingest(state.embeddings.as_ref(), item)
            .await
            .unwrap();
    }
}
