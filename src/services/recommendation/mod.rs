pub mod moods;

use crate::algorithms::daily::{next_rollover, pick_day, pick_index};
use crate::algorithms::popularity::rerank_by_popularity;
use crate::algorithms::retriever::{ItemPredicate, Neighbor};
use crate::algorithms::{blend, cosine_distance, similarity_from_distance};
use crate::config::RankingConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::services::cache::PickCache;
use crate::services::embedding::{embed_query, EmbeddingProvider};
use crate::services::entitlement::{require_premium, EntitlementGate};
use crate::services::storage::{LibraryRepository, PreferenceRepository};
use crate::services::vector_db::EmbeddingRepository;
use crate::utils::retry_once;
use crate::utils::validation::{validate_filters, validate_limit, validate_text_query};
use chrono::{DateTime, Utc};
use moods::{compile_filters, MoodPreset, MOOD_PRESETS};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RetrievalRanker {
    embeddings: Arc<dyn EmbeddingRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    library: Arc<dyn LibraryRepository>,
    entitlements: Arc<dyn EntitlementGate>,
    provider: Arc<dyn EmbeddingProvider>,
    picks: Arc<dyn PickCache>,
    config: RankingConfig,
}

/// Playtime bucket shown next to an unplayed gem.
pub fn justification(playtime_minutes: u32) -> String {
    match playtime_minutes {
        0 => "Owned but never launched".to_string(),
        1..=29 => "Briefly tried".to_string(),
        30..=59 => "Played for under an hour".to_string(),
        minutes => {
            let hours = minutes / 60;
            if hours == 1 {
                "Played for 1 hour".to_string()
            } else {
                format!("Played for {hours} hours")
            }
        }
    }
}

impl RetrievalRanker {
    pub fn new(
        embeddings: Arc<dyn EmbeddingRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        library: Arc<dyn LibraryRepository>,
        entitlements: Arc<dyn EntitlementGate>,
        provider: Arc<dyn EmbeddingProvider>,
        picks: Arc<dyn PickCache>,
        config: RankingConfig,
    ) -> Self {
        Self {
            embeddings,
            preferences,
            library,
            entitlements,
            provider,
            picks,
            config,
        }
    }

    pub fn list_moods(&self) -> &'static [MoodPreset] {
        MOOD_PRESETS
    }

    pub async fn recommend(&self, user_id: UserId, request: &RecommendationRequest) -> EngineResult<RecommendationResponse> {
        let limit = request.limit.unwrap_or(self.config.default_limit);
        validate_limit(limit, self.config.max_results)?;
        let filters = compile_filters(request)?;
        validate_filters(&filters)?;

        let query = self.query_vector(user_id, &request.source).await?;
        self.search(user_id, &query, &filters, limit, request.exclude_owned).await
    }

    /// Resolves the vector a retrieval call runs against.
    pub async fn query_vector(&self, user_id: UserId, source: &QuerySource) -> EngineResult<Vec<f32>> {
        match source {
            QuerySource::Preference => self.preference_vector(user_id).await,
            QuerySource::Blended => self.blended_vector(user_id).await,
            QuerySource::Text { query } => {
                require_premium(self.entitlements.as_ref(), user_id, "text queries").await?;
                let text = validate_text_query(query)?;
                embed_query(self.provider.as_ref(), text).await
            }
        }
    }

    async fn preference_vector(&self, user_id: UserId) -> EngineResult<Vec<f32>> {
        self.preferences
            .preference(user_id)
            .await?
            .map(|pv| pv.vector)
            .ok_or_else(|| EngineError::InsufficientData(format!("user {user_id} has no preference vector yet")))
    }

    async fn blended_vector(&self, user_id: UserId) -> EngineResult<Vec<f32>> {
        let base = self.preference_vector(user_id).await?;
        match self.preferences.learned(user_id).await? {
            Some(learned) if learned.vector.len() == base.len() => {
                Ok(blend(&base, &learned.vector, self.config.learned_blend))
            }
            Some(_) => {
                warn!(user_id = %user_id, "Learned vector dimension differs from preference vector, ignoring it");
                Ok(base)
            }
            None => Ok(base),
        }
    }

    async fn owned_items(&self, user_id: UserId) -> EngineResult<HashSet<ItemId>> {
        Ok(self.library.signals(user_id).await?.into_iter().map(|s| s.item_id).collect())
    }

    async fn nearest(&self, query: &[f32], pool: usize, predicate: &ItemPredicate) -> EngineResult<Vec<Neighbor>> {
        let timeout = Duration::from_millis(self.config.query_timeout_ms);
        retry_once("nearest-neighbour query", timeout, || {
            self.embeddings.nearest(query, pool, predicate)
        })
        .await
    }

    /// Candidate retrieval, owned-item exclusion, popularity re-ranking and
    /// truncation for an already resolved query vector.
    pub async fn search(
        &self,
        user_id: UserId,
        query: &[f32],
        filters: &RankingFilters,
        limit: usize,
        exclude_owned: bool,
    ) -> EngineResult<RecommendationResponse> {
        let mut predicate = ItemPredicate::from_filters(filters);
        if exclude_owned {
            predicate = predicate.excluding(self.owned_items(user_id).await?);
        }

        let pool = limit
            .saturating_mul(self.config.candidate_multiplier)
            .min(self.config.max_candidates)
            .max(limit);
        let neighbors = self.nearest(query, pool, &predicate).await?;
        let mut recommendations = self.hydrate(&neighbors).await?;

        let popularity_threshold =
            rerank_by_popularity(&mut recommendations, filters.popularity_score, |item| item.review_count);
        recommendations.truncate(limit);

        debug!(
            user_id = %user_id,
            pool = neighbors.len(),
            returned = recommendations.len(),
            threshold = ?popularity_threshold,
            "Ranked recommendations"
        );

        Ok(RecommendationResponse {
            user_id,
            recommendations,
            popularity_threshold,
            generated_at: Utc::now(),
        })
    }

    async fn hydrate(&self, neighbors: &[Neighbor]) -> EngineResult<Vec<RecommendationItem>> {
        let ids: Vec<ItemId> = neighbors.iter().map(|n| n.item_id).collect();
        let items = self.embeddings.get_many(&ids).await?;

        Ok(neighbors
            .iter()
            .filter_map(|neighbor| {
                let Some(item) = items.get(&neighbor.item_id) else {
                    warn!(item_id = %neighbor.item_id, "Neighbour vanished before hydration");
                    return None;
                };
                let meta = &item.metadata;
                Some(RecommendationItem {
                    item_id: neighbor.item_id,
                    name: meta.name.clone(),
                    similarity: similarity_from_distance(neighbor.distance),
                    distance: neighbor.distance,
                    review_count: meta.review_count,
                    review_score: meta.review_score,
                    genres: meta.genres.clone(),
                    tags: meta.tags.clone(),
                })
            })
            .collect())
    }

    /// Owned items under the playtime ceiling that sit close to the
    /// preference vector, most similar first.
    pub async fn unplayed_gems(&self, user_id: UserId, limit: Option<usize>) -> EngineResult<Vec<UnplayedGem>> {
        let limit = limit.unwrap_or(self.config.default_limit);
        validate_limit(limit, self.config.max_results)?;
        let preference = self.preference_vector(user_id).await?;

        let candidates: Vec<OwnedItemSignal> = self
            .library
            .signals(user_id)
            .await?
            .into_iter()
            .filter(|s| s.playtime_minutes < self.config.unplayed_ceiling_minutes)
            .collect();
        let ids: Vec<ItemId> = candidates.iter().map(|s| s.item_id).collect();
        let items = self.embeddings.get_many(&ids).await?;

        let mut gems: Vec<UnplayedGem> = candidates
            .iter()
            .filter_map(|signal| {
                let item = items.get(&signal.item_id)?;
                if item.vector.len() != preference.len() {
                    return None;
                }
                let similarity = similarity_from_distance(cosine_distance(&preference, &item.vector));
                (similarity >= self.config.unplayed_similarity_floor).then(|| UnplayedGem {
                    item_id: signal.item_id,
                    name: item.metadata.name.clone(),
                    similarity,
                    playtime_minutes: signal.playtime_minutes,
                    justification: justification(signal.playtime_minutes),
                })
            })
            .collect();

        gems.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.item_id.cmp(&b.item_id))
        });
        gems.truncate(limit);
        Ok(gems)
    }

    pub async fn daily_pick(&self, user_id: UserId) -> EngineResult<DailyPick> {
        self.daily_pick_at(user_id, Utc::now()).await
    }

    /// One stable pick per user and day. The first computation of a day is
    /// cached until the next rollover, so later catalog changes do not move it.
    pub async fn daily_pick_at(&self, user_id: UserId, now: DateTime<Utc>) -> EngineResult<DailyPick> {
        let day = pick_day(now, self.config.daily_rollover_hour);

        match self.picks.get(user_id, day).await {
            Ok(Some(pick)) => return Ok(pick),
            Ok(None) => {}
            Err(e) => warn!(user_id = %user_id, "Daily pick cache read failed: {}", e),
        }

        let query = self.blended_vector(user_id).await?;
        let predicate = ItemPredicate::default().excluding(self.owned_items(user_id).await?);
        let neighbors = self.nearest(&query, self.config.daily_pick_pool, &predicate).await?;
        let pool = self.hydrate(&neighbors).await?;

        let index = pick_index(user_id, day, pool.len())
            .ok_or_else(|| EngineError::NotFound(format!("no unowned candidates for user {user_id}")))?;
        let chosen = &pool[index];
        let pick = DailyPick {
            user_id,
            day,
            item_id: chosen.item_id,
            name: chosen.name.clone(),
            similarity: chosen.similarity,
        };

        if let Err(e) = self.picks.put(&pick, next_rollover(day, self.config.daily_rollover_hour)).await {
            warn!(user_id = %user_id, "Daily pick cache write failed: {}", e);
        }
        info!(user_id = %user_id, day = %day, item_id = %pick.item_id, "Selected daily pick");
        Ok(pick)
    }
}
