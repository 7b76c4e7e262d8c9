//! Explicit like/dislike feedback folded into a per-user learned vector.
//!
//! The learned vector starts as a copy of the preference vector (its seed)
//! and is always recomputed by replaying every active event over that seed,
//! ordered by first submission time. Replaying keeps resubmissions
//! idempotent and lets a deletion be reversed exactly when configured to.
//!
//! Every mutation runs inside one [`FeedbackUnit`], which the repository
//! keeps exclusive per user across all instances sharing the backend.

use crate::algorithms::normalized;
use crate::config::FeedbackConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::services::entitlement::{require_premium, EntitlementGate};
use crate::services::kafka::{FeedbackAction, FeedbackMessage, FeedbackPublisher};
use crate::services::storage::{FeedbackRepository, FeedbackUnit, PreferenceRepository};
use crate::services::vector_db::EmbeddingRepository;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct FeedbackLearner {
    feedback: Arc<dyn FeedbackRepository>,
    preferences: Arc<dyn PreferenceRepository>,
    embeddings: Arc<dyn EmbeddingRepository>,
    entitlements: Arc<dyn EntitlementGate>,
    publisher: Option<Arc<dyn FeedbackPublisher>>,
    config: FeedbackConfig,
}

/// `v <- normalize(v + magnitude * x)`; leaves `v` untouched when the sum
/// degenerates to a zero vector.
pub fn nudge(vector: &[f32], item: &[f32], magnitude: f32) -> Vec<f32> {
    let summed: Vec<f32> = vector.iter().zip(item.iter()).map(|(v, x)| v + magnitude * x).collect();
    normalized(&summed).unwrap_or_else(|| vector.to_vec())
}

impl FeedbackLearner {
    pub fn new(
        feedback: Arc<dyn FeedbackRepository>,
        preferences: Arc<dyn PreferenceRepository>,
        embeddings: Arc<dyn EmbeddingRepository>,
        entitlements: Arc<dyn EntitlementGate>,
        config: FeedbackConfig,
    ) -> Self {
        Self {
            feedback,
            preferences,
            embeddings,
            entitlements,
            publisher: None,
            config,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn FeedbackPublisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub async fn submit_feedback(
        &self,
        user_id: UserId,
        item_id: ItemId,
        label: FeedbackLabel,
    ) -> EngineResult<LearnedVector> {
        self.submit_feedback_at(user_id, item_id, label, Utc::now()).await
    }

    pub async fn submit_feedback_at(
        &self,
        user_id: UserId,
        item_id: ItemId,
        label: FeedbackLabel,
        now: DateTime<Utc>,
    ) -> EngineResult<LearnedVector> {
        require_premium(self.entitlements.as_ref(), user_id, "feedback learning").await?;

        if self.embeddings.get(item_id).await?.is_none() {
            return Err(EngineError::NotFound(format!("item {item_id} has no embedding")));
        }

        let mut unit = self.feedback.begin(user_id).await?;
        let seed = self.seed_for(unit.as_mut(), user_id).await?;
        let stored = unit
            .upsert_event(FeedbackEvent::new(user_id, item_id, label, now))
            .await?;
        let learned = self.replay(unit.as_mut(), user_id, seed, now).await?;
        unit.put_learned(learned.clone()).await?;
        unit.commit().await?;
        drop(unit);

        info!(
            user_id = %user_id,
            item_id = %item_id,
            label = %label,
            feedback_count = learned.feedback_count,
            "Applied feedback"
        );
        self.publish(FeedbackMessage {
            user_id,
            item_id: Some(item_id),
            label: Some(stored.label),
            action: FeedbackAction::Submitted,
            at: now,
        })
        .await;

        Ok(learned)
    }

    pub async fn delete_feedback(&self, user_id: UserId, item_id: ItemId) -> EngineResult<()> {
        let mut unit = self.feedback.begin(user_id).await?;
        if !unit.delete_event(item_id).await? {
            return Err(EngineError::NotFound(format!("no feedback from user {user_id} on item {item_id}")));
        }

        if self.config.reverse_on_delete {
            if let Some(current) = unit.learned().await? {
                let learned = self.replay(unit.as_mut(), user_id, current.seed, Utc::now()).await?;
                unit.put_learned(learned).await?;
                debug!(user_id = %user_id, item_id = %item_id, "Reversed deleted feedback");
            }
        }
        unit.commit().await?;
        drop(unit);

        info!(user_id = %user_id, item_id = %item_id, "Deleted feedback");
        self.publish(FeedbackMessage {
            user_id,
            item_id: Some(item_id),
            label: None,
            action: FeedbackAction::Deleted,
            at: Utc::now(),
        })
        .await;
        Ok(())
    }

    pub async fn get_user_feedback(&self, user_id: UserId) -> EngineResult<FeedbackSummary> {
        let mut events = self.feedback.events(user_id).await?;
        events.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(a.item_id.cmp(&b.item_id)));

        let ids: Vec<ItemId> = events.iter().map(|e| e.item_id).collect();
        let items = self.embeddings.get_many(&ids).await?;

        let mut summary = FeedbackSummary::default();
        for event in events {
            let meta = items.get(&event.item_id).map(|item| &item.metadata);
            let entry = FeedbackEntry {
                item_id: event.item_id,
                label: event.label,
                submitted_at: event.updated_at,
                active: event.active,
                name: meta.map(|m| m.name.clone()),
                genres: meta.map(|m| m.genres.clone()).unwrap_or_default(),
                review_score: meta.and_then(|m| m.review_score),
            };
            if event.label.is_positive() {
                summary.positive.push(entry);
            } else {
                summary.negative.push(entry);
            }
        }
        Ok(summary)
    }

    /// Drops the learned vector so ranking falls back to the preference
    /// vector alone. Without `clear_history` the events stay listed but are
    /// deactivated, so later submissions replay only what came after the
    /// reset. Returns the number of events removed.
    pub async fn reset_learned_vector(&self, user_id: UserId, clear_history: bool) -> EngineResult<u64> {
        let mut unit = self.feedback.begin(user_id).await?;
        unit.delete_learned().await?;
        let cleared = if clear_history {
            unit.clear_events().await?
        } else {
            unit.deactivate_events().await?;
            0
        };
        unit.commit().await?;
        drop(unit);

        info!(user_id = %user_id, cleared, "Reset learned vector");
        self.publish(FeedbackMessage {
            user_id,
            item_id: None,
            label: None,
            action: FeedbackAction::Reset,
            at: Utc::now(),
        })
        .await;
        Ok(cleared)
    }

    async fn seed_for(&self, unit: &mut dyn FeedbackUnit, user_id: UserId) -> EngineResult<Vec<f32>> {
        if let Some(learned) = unit.learned().await? {
            return Ok(learned.seed);
        }
        self.preferences
            .preference(user_id)
            .await?
            .map(|pv| pv.vector)
            .ok_or_else(|| {
                EngineError::InsufficientData(format!(
                    "user {user_id} has no preference vector to seed feedback learning"
                ))
            })
    }

    async fn replay(
        &self,
        unit: &mut dyn FeedbackUnit,
        user_id: UserId,
        seed: Vec<f32>,
        now: DateTime<Utc>,
    ) -> EngineResult<LearnedVector> {
        let mut events: Vec<FeedbackEvent> = unit.events().await?.into_iter().filter(|e| e.active).collect();
        events.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.item_id.cmp(&b.item_id)));

        let ids: Vec<ItemId> = events.iter().map(|e| e.item_id).collect();
        let items: HashMap<ItemId, ItemEmbedding> = self.embeddings.get_many(&ids).await?;

        let mut vector = seed.clone();
        let mut applied = 0u32;
        for event in &events {
            match items.get(&event.item_id) {
                Some(item) if item.vector.len() == vector.len() => {
                    vector = nudge(&vector, &item.vector, self.config.magnitude(event.label));
                    applied += 1;
                }
                Some(_) => warn!(item_id = %event.item_id, "Skipping feedback item with mismatched dimension"),
                None => warn!(item_id = %event.item_id, "Skipping feedback item without embedding"),
            }
        }

        Ok(LearnedVector {
            user_id,
            vector,
            seed,
            feedback_count: applied,
            updated_at: now,
        })
    }

    async fn publish(&self, message: FeedbackMessage) {
        if let Some(publisher) = &self.publisher {
            if let Err(e) = publisher.publish(&message).await {
                warn!(user_id = %message.user_id, "Failed to publish feedback event: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithms::{cosine_similarity, VectorDimension};
    use crate::config::Config;
    use crate::services::entitlement::StaticEntitlements;
    use crate::services::storage::InMemoryStore;
    use crate::services::vector_db::InMemoryVectorStore;
    use async_trait::async_trait;
    use chrono::Duration;

    fn item(id: u64, vector: Vec<f32>) -> ItemEmbedding {
        ItemEmbedding {
            item_id: ItemId::new(id).unwrap(),
            vector,
            metadata: ItemMetadata {
                schema_version: METADATA_SCHEMA_VERSION,
                name: format!("Game {id}"),
                genres: vec!["Puzzle".into()],
                tags: vec![],
                review_score: Some(80.0),
                review_count: 100,
                release_year: Some(2020),
                is_free: false,
            },
        }
    }

    struct Fixture {
        learner: FeedbackLearner,
        store: Arc<InMemoryStore>,
        vectors: Arc<InMemoryVectorStore>,
        gate: Arc<StaticEntitlements>,
        user: UserId,
    }

    impl Fixture {
        /// A second learner over the same backing store, as another
        /// process would run it.
        fn sibling(&self, feedback: Arc<dyn FeedbackRepository>) -> FeedbackLearner {
            FeedbackLearner::new(
                feedback,
                self.store.clone(),
                self.vectors.clone(),
                self.gate.clone(),
                self.learner.config.clone(),
            )
        }
    }

    /// Holds the user's unit open for `delay` after reading its events.
    struct SlowReplayRepository {
        inner: Arc<InMemoryStore>,
        delay: std::time::Duration,
    }

    struct SlowReplayUnit<'a> {
        inner: Box<dyn FeedbackUnit + 'a>,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl FeedbackRepository for SlowReplayRepository {
        async fn events(&self, user_id: UserId) -> EngineResult<Vec<FeedbackEvent>> {
            self.inner.events(user_id).await
        }

        async fn begin<'a>(&'a self, user_id: UserId) -> EngineResult<Box<dyn FeedbackUnit + 'a>> {
            let inner = self.inner.begin(user_id).await?;
            Ok(Box::new(SlowReplayUnit { inner, delay: self.delay }))
        }
    }

    #[async_trait]
    impl<'a> FeedbackUnit for SlowReplayUnit<'a> {
        async fn learned(&mut self) -> EngineResult<Option<LearnedVector>> {
            self.inner.learned().await
        }

        async fn events(&mut self) -> EngineResult<Vec<FeedbackEvent>> {
            let events = self.inner.events().await?;
            tokio::time::sleep(self.delay).await;
            Ok(events)
        }

        async fn upsert_event(&mut self, event: FeedbackEvent) -> EngineResult<FeedbackEvent> {
            self.inner.upsert_event(event).await
        }

        async fn delete_event(&mut self, item_id: ItemId) -> EngineResult<bool> {
            self.inner.delete_event(item_id).await
        }

        async fn deactivate_events(&mut self) -> EngineResult<u64> {
            self.inner.deactivate_events().await
        }

        async fn clear_events(&mut self) -> EngineResult<u64> {
            self.inner.clear_events().await
        }

        async fn put_learned(&mut self, vector: LearnedVector) -> EngineResult<()> {
            self.inner.put_learned(vector).await
        }

        async fn delete_learned(&mut self) -> EngineResult<()> {
            self.inner.delete_learned().await
        }

        async fn commit(&mut self) -> EngineResult<()> {
            self.inner.commit().await
        }
    }

    async fn fixture(reverse_on_delete: bool) -> Fixture {
        let dim = VectorDimension::new(3).unwrap();
        let vectors = Arc::new(InMemoryVectorStore::new(dim));
        vectors
            .batch_upsert(&[item(1, vec![1.0, 0.0, 0.0]), item(2, vec![0.0, 1.0, 0.0]), item(3, vec![0.0, 0.0, 1.0])])
            .await
            .unwrap();

        let store = Arc::new(InMemoryStore::new());
        let user = UserId::new(42).unwrap();
        let seed = normalized(&[1.0, 1.0, 1.0]).unwrap();
        store
            .replace_preference(PreferenceVector {
                user_id: user,
                vector: seed,
                updated_at: Utc::now(),
                contributing_items: 3,
                report: BuildReport::default(),
            })
            .await
            .unwrap();

        let gate = Arc::new(StaticEntitlements::new());
        gate.grant(user);

        let mut config = Config::default().feedback;
        config.reverse_on_delete = reverse_on_delete;
        let learner = FeedbackLearner::new(store.clone(), store.clone(), vectors.clone(), gate.clone(), config);
        Fixture {
            learner,
            store,
            vectors,
            gate,
            user,
        }
    }

    fn id(raw: u64) -> ItemId {
        ItemId::new(raw).unwrap()
    }

    #[tokio::test]
    async fn strong_like_moves_toward_item() {
        let f = fixture(false).await;
        let before = f.store.preference(f.user).await.unwrap().unwrap().vector;
        let target = [0.0, 1.0, 0.0];

        let learned = f.learner.submit_feedback(f.user, id(2), FeedbackLabel::StrongLike).await.unwrap();
        assert!(cosine_similarity(&learned.vector, &target) > cosine_similarity(&before, &target));
        assert_eq!(learned.vector.len(), 3);
        assert_eq!(learned.seed, before);
    }

    #[tokio::test]
    async fn strong_dislike_moves_away_from_item() {
        let f = fixture(false).await;
        let before = f.store.preference(f.user).await.unwrap().unwrap().vector;
        let target = [0.0, 0.0, 1.0];

        let learned = f.learner.submit_feedback(f.user, id(3), FeedbackLabel::StrongDislike).await.unwrap();
        assert!(cosine_similarity(&learned.vector, &target) < cosine_similarity(&before, &target));
    }

    #[tokio::test]
    async fn resubmission_is_idempotent() {
        let f = fixture(false).await;
        let now = Utc::now();
        let once = f.learner.submit_feedback_at(f.user, id(1), FeedbackLabel::Like, now).await.unwrap();
        let twice = f
            .learner
            .submit_feedback_at(f.user, id(1), FeedbackLabel::Like, now + Duration::seconds(5))
            .await
            .unwrap();
        assert_eq!(once.vector, twice.vector);
        assert_eq!(twice.feedback_count, 1);
    }

    #[tokio::test]
    async fn requires_entitlement_and_known_item() {
        let f = fixture(false).await;
        f.gate.revoke(f.user);
        assert!(matches!(
            f.learner.submit_feedback(f.user, id(1), FeedbackLabel::Like).await,
            Err(EngineError::PremiumRequired(_))
        ));

        f.gate.grant(f.user);
        assert!(matches!(
            f.learner.submit_feedback(f.user, id(99), FeedbackLabel::Like).await,
            Err(EngineError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn no_preference_vector_is_insufficient_data() {
        let f = fixture(false).await;
        let stranger = UserId::new(7).unwrap();
        f.gate.grant(stranger);
        assert!(matches!(
            f.learner.submit_feedback(stranger, id(1), FeedbackLabel::Like).await,
            Err(EngineError::InsufficientData(_))
        ));
    }

    #[tokio::test]
    async fn delete_keeps_vector_unless_reversal_enabled() {
        let f = fixture(false).await;
        let learned = f.learner.submit_feedback(f.user, id(2), FeedbackLabel::StrongLike).await.unwrap();
        f.learner.delete_feedback(f.user, id(2)).await.unwrap();
        assert_eq!(f.store.learned(f.user).await.unwrap().unwrap().vector, learned.vector);
        assert!(matches!(
            f.learner.delete_feedback(f.user, id(2)).await,
            Err(EngineError::NotFound(_))
        ));

        let f = fixture(true).await;
        let learned = f.learner.submit_feedback(f.user, id(2), FeedbackLabel::StrongLike).await.unwrap();
        f.learner.delete_feedback(f.user, id(2)).await.unwrap();
        let reversed = f.store.learned(f.user).await.unwrap().unwrap();
        assert_eq!(reversed.vector, learned.seed);
        assert_eq!(reversed.feedback_count, 0);
    }

    #[tokio::test]
    async fn listing_groups_by_polarity_newest_first() {
        let f = fixture(false).await;
        let t0 = Utc::now();
        f.learner.submit_feedback_at(f.user, id(1), FeedbackLabel::Like, t0).await.unwrap();
        f.learner
            .submit_feedback_at(f.user, id(2), FeedbackLabel::StrongLike, t0 + Duration::minutes(1))
            .await
            .unwrap();
        f.learner
            .submit_feedback_at(f.user, id(3), FeedbackLabel::Dislike, t0 + Duration::minutes(2))
            .await
            .unwrap();

        let summary = f.learner.get_user_feedback(f.user).await.unwrap();
        let positive: Vec<u64> = summary.positive.iter().map(|e| e.item_id.get()).collect();
        assert_eq!(positive, vec![2, 1]);
        assert_eq!(summary.negative.len(), 1);
        assert_eq!(summary.negative[0].name.as_deref(), Some("Game 3"));
    }

    #[tokio::test]
    async fn reset_with_history() {
        let f = fixture(false).await;
        f.learner.submit_feedback(f.user, id(1), FeedbackLabel::Like).await.unwrap();
        f.learner.submit_feedback(f.user, id(3), FeedbackLabel::Dislike).await.unwrap();

        assert_eq!(f.learner.reset_learned_vector(f.user, false).await.unwrap(), 0);
        assert!(f.store.learned(f.user).await.unwrap().is_none());
        assert_eq!(f.store.events(f.user).await.unwrap().len(), 2);

        assert_eq!(f.learner.reset_learned_vector(f.user, true).await.unwrap(), 2);
        assert!(f.store.events(f.user).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn reset_without_history_starts_a_fresh_replay() {
        let f = fixture(false).await;
        let seed = f.store.preference(f.user).await.unwrap().unwrap().vector;
        let t0 = Utc::now();
        f.learner.submit_feedback_at(f.user, id(2), FeedbackLabel::StrongLike, t0).await.unwrap();
        f.learner.reset_learned_vector(f.user, false).await.unwrap();

        let learned = f
            .learner
            .submit_feedback_at(f.user, id(3), FeedbackLabel::Like, t0 + Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(learned.feedback_count, 1);
        assert_eq!(learned.vector, nudge(&seed, &[0.0, 0.0, 1.0], f.learner.config.magnitude(FeedbackLabel::Like)));

        let summary = f.learner.get_user_feedback(f.user).await.unwrap();
        let states: Vec<(u64, bool)> = summary.positive.iter().map(|e| (e.item_id.get(), e.active)).collect();
        assert_eq!(states, vec![(3, true), (2, false)]);

        // Resubmitting an old item brings it back as a new event.
        let learned = f
            .learner
            .submit_feedback_at(f.user, id(2), FeedbackLabel::StrongLike, t0 + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(learned.feedback_count, 2);
    }

    #[tokio::test]
    async fn learners_sharing_a_store_do_not_lose_updates() {
        let f = fixture(false).await;
        let slow = Arc::new(f.sibling(Arc::new(SlowReplayRepository {
            inner: f.store.clone(),
            delay: std::time::Duration::from_millis(100),
        })));
        let fast = f.sibling(f.store.clone());

        let user = f.user;
        let first = tokio::spawn({
            let slow = slow.clone();
            async move { slow.submit_feedback(user, id(1), FeedbackLabel::Like).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        fast.submit_feedback(user, id(2), FeedbackLabel::Like).await.unwrap();
        first.await.unwrap().unwrap();

        let stored = f.store.learned(user).await.unwrap().unwrap();
        assert_eq!(stored.feedback_count, 2);
        assert_eq!(f.store.events(user).await.unwrap().len(), 2);
        assert_eq!(f.store.locked_users(), 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_all_count() {
        let f = fixture(false).await;
        let (a, b, c) = tokio::join!(
            f.learner.submit_feedback(f.user, id(1), FeedbackLabel::Like),
            f.learner.submit_feedback(f.user, id(2), FeedbackLabel::StrongLike),
            f.learner.submit_feedback(f.user, id(3), FeedbackLabel::Dislike),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let settled = f.store.learned(f.user).await.unwrap().unwrap();
        assert_eq!(settled.feedback_count, 3);

        let again = f.learner.submit_feedback(f.user, id(2), FeedbackLabel::StrongLike).await.unwrap();
        assert_eq!(again.feedback_count, 3);
        assert_eq!(again.vector, settled.vector);
    }

    #[test]
    fn nudge_preserves_dimension_and_degenerate_input() {
        let v = vec![1.0, 0.0];
        assert_eq!(nudge(&v, &[1.0, 0.0], -1.0), v);
        assert_eq!(nudge(&v, &[0.0, 1.0], 0.25).len(), 2);
    }
}
