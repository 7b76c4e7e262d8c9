use crate::algorithms::weighting::{self, WeightingParams};
use crate::config::PreferenceConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{ItemId, PreferenceVector, UserId};
use crate::services::storage::{LibraryRepository, PreferenceRepository};
use crate::services::vector_db::EmbeddingRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Full-recompute aggregation of a user's owned-item signals.
pub struct PreferenceVectorBuilder {
    library: Arc<dyn LibraryRepository>,
    embeddings: Arc<dyn EmbeddingRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    params: WeightingParams,
}

impl PreferenceVectorBuilder {
    pub fn new(
        library: Arc<dyn LibraryRepository>,
        embeddings: Arc<dyn EmbeddingRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        config: &PreferenceConfig,
    ) -> Self {
        Self {
            library,
            embeddings,
            preferences,
            params: WeightingParams::from(config),
        }
    }

    pub fn params(&self) -> &WeightingParams {
        &self.params
    }

    pub async fn rebuild(&self, user_id: UserId) -> EngineResult<PreferenceVector> {
        self.rebuild_at(user_id, Utc::now()).await
    }

    /// Recomputes and atomically replaces the stored vector. On any failure
    /// the previously stored vector is left untouched.
    pub async fn rebuild_at(&self, user_id: UserId, now: DateTime<Utc>) -> EngineResult<PreferenceVector> {
        let vector = self.compute_at(user_id, now).await?;
        self.preferences.replace_preference(vector.clone()).await?;

        info!(
            user_id = %user_id,
            contributing = vector.contributing_items,
            below_threshold = vector.report.below_threshold,
            missing_embedding = vector.report.missing_embedding,
            "Rebuilt preference vector"
        );
        Ok(vector)
    }

    /// Builds the vector without persisting it.
    pub async fn compute_at(&self, user_id: UserId, now: DateTime<Utc>) -> EngineResult<PreferenceVector> {
        let signals = self.library.signals(user_id).await?;
        let item_ids: Vec<ItemId> = signals.iter().map(|s| s.item_id).collect();
        let embeddings = self.embeddings.get_many(&item_ids).await?;

        let aggregate = weighting::aggregate(
            &signals,
            &embeddings,
            self.embeddings.dimension(),
            &self.params,
            now,
        )
        .map_err(|e| {
            if let EngineError::InsufficientData(reason) = &e {
                warn!(user_id = %user_id, owned = signals.len(), "Preference rebuild skipped: {}", reason);
            }
            e
        })?;

        Ok(PreferenceVector {
            user_id,
            vector: aggregate.vector,
            updated_at: now,
            contributing_items: aggregate.report.contributing_items,
            report: aggregate.report,
        })
    }

    pub async fn get(&self, user_id: UserId) -> EngineResult<PreferenceVector> {
        self.preferences
            .preference(user_id)
            .await?
            .ok_or_else(|| EngineError::NotFound(format!("no preference vector for user {user_id}; sync the library first")))
    }
}
