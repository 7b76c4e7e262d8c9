//! Postgres-backed repositories. Item vectors live in a pgvector column and
//! are searched with the `<=>` cosine-distance operator; per-user vectors are
//! plain `REAL[]`.

use super::{FeedbackRepository, FeedbackUnit, LibraryRepository, PreferenceRepository};
use crate::algorithms::retriever::{ItemPredicate, Neighbor};
use crate::algorithms::VectorDimension;
use crate::error::{EngineError, EngineResult};
use crate::models::{
    BuildReport, FeedbackEvent, FeedbackLabel, ItemEmbedding, ItemId, ItemMetadata, LearnedVector,
    OwnedItemSignal, PreferenceVector, UserId,
};
use crate::services::entitlement::EntitlementGate;
use crate::services::vector_db::EmbeddingRepository;
use async_trait::async_trait;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row, Transaction};
use std::collections::HashMap;
use tracing::info;

pub async fn connect(url: &str, max_connections: u32, run_migrations: bool) -> EngineResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(url)
        .await?;

    if run_migrations {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::Internal(format!("migration failed: {e}")))?;
        info!("Database migrations applied");
    }

    Ok(pool)
}

fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}

fn to_u32(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn signal_from_row(row: &PgRow) -> EngineResult<OwnedItemSignal> {
    Ok(OwnedItemSignal {
        user_id: UserId::from_db(row.try_get("user_id")?)?,
        item_id: ItemId::from_db(row.try_get("item_id")?)?,
        playtime_minutes: to_u32(row.try_get("playtime_minutes")?),
        last_played_at: row.try_get("last_played_at")?,
        completion_ratio: row.try_get("completion_ratio")?,
        genres: row.try_get("genres")?,
    })
}

fn event_from_row(row: &PgRow) -> EngineResult<FeedbackEvent> {
    let label: String = row.try_get("label")?;
    Ok(FeedbackEvent {
        user_id: UserId::from_db(row.try_get("user_id")?)?,
        item_id: ItemId::from_db(row.try_get("item_id")?)?,
        label: label.parse::<FeedbackLabel>()?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        active: row.try_get("active")?,
    })
}

#[async_trait]
impl LibraryRepository for PgStore {
    async fn replace_signals(&self, user_id: UserId, signals: Vec<OwnedItemSignal>) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM owned_item_signals WHERE user_id = $1")
            .bind(user_id.to_db())
            .execute(&mut *tx)
            .await?;

        for signal in &signals {
            sqlx::query(
                "INSERT INTO owned_item_signals \
                 (user_id, item_id, playtime_minutes, last_played_at, completion_ratio, genres) \
                 VALUES ($1, $2, $3, $4, $5, $6)",
            )
            .bind(user_id.to_db())
            .bind(signal.item_id.to_db())
            .bind(to_i32(signal.playtime_minutes))
            .bind(signal.last_played_at)
            .bind(signal.completion_ratio)
            .bind(&signal.genres)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn signals(&self, user_id: UserId) -> EngineResult<Vec<OwnedItemSignal>> {
        let rows = sqlx::query(
            "SELECT user_id, item_id, playtime_minutes, last_played_at, completion_ratio, genres \
             FROM owned_item_signals WHERE user_id = $1 ORDER BY item_id",
        )
        .bind(user_id.to_db())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(signal_from_row).collect()
    }

    async fn delete_signals(&self, user_id: UserId) -> EngineResult<()> {
        sqlx::query("DELETE FROM owned_item_signals WHERE user_id = $1")
            .bind(user_id.to_db())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PreferenceRepository for PgStore {
    async fn preference(&self, user_id: UserId) -> EngineResult<Option<PreferenceVector>> {
        let row = sqlx::query(
            "SELECT vector, contributing_items, below_threshold, missing_embedding, updated_at \
             FROM preference_vectors WHERE user_id = $1",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> EngineResult<PreferenceVector> {
            let contributing = to_u32(row.try_get("contributing_items")?);
            Ok(PreferenceVector {
                user_id,
                vector: row.try_get("vector")?,
                updated_at: row.try_get("updated_at")?,
                contributing_items: contributing,
                report: BuildReport {
                    contributing_items: contributing,
                    below_threshold: to_u32(row.try_get("below_threshold")?),
                    missing_embedding: to_u32(row.try_get("missing_embedding")?),
                },
            })
        })
        .transpose()
    }

    async fn replace_preference(&self, vector: PreferenceVector) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO preference_vectors \
             (user_id, vector, contributing_items, below_threshold, missing_embedding, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id) DO UPDATE SET \
             vector = EXCLUDED.vector, contributing_items = EXCLUDED.contributing_items, \
             below_threshold = EXCLUDED.below_threshold, missing_embedding = EXCLUDED.missing_embedding, \
             updated_at = EXCLUDED.updated_at",
        )
        .bind(vector.user_id.to_db())
        .bind(&vector.vector)
        .bind(to_i32(vector.contributing_items))
        .bind(to_i32(vector.report.below_threshold))
        .bind(to_i32(vector.report.missing_embedding))
        .bind(vector.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn learned(&self, user_id: UserId) -> EngineResult<Option<LearnedVector>> {
        let row = sqlx::query(
            "SELECT vector, seed, feedback_count, updated_at FROM learned_vectors WHERE user_id = $1",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> EngineResult<LearnedVector> {
            Ok(LearnedVector {
                user_id,
                vector: row.try_get("vector")?,
                seed: row.try_get("seed")?,
                feedback_count: to_u32(row.try_get("feedback_count")?),
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }
}

const EVENT_COLUMNS: &str = "user_id, item_id, label, created_at, updated_at, active";

#[async_trait]
impl FeedbackRepository for PgStore {
    async fn events(&self, user_id: UserId) -> EngineResult<Vec<FeedbackEvent>> {
        let rows = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM feedback_events WHERE user_id = $1"))
            .bind(user_id.to_db())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(event_from_row).collect()
    }

    /// Opens a transaction holding `pg_advisory_xact_lock(user_id)`, so every
    /// instance sharing the database serializes on the same user.
    async fn begin<'a>(&'a self, user_id: UserId) -> EngineResult<Box<dyn FeedbackUnit + 'a>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(user_id.to_db())
            .execute(&mut *tx)
            .await?;
        Ok(Box::new(PgFeedbackUnit {
            tx: Some(tx),
            user_id,
        }))
    }
}

/// Rolled back on drop unless committed.
struct PgFeedbackUnit {
    tx: Option<Transaction<'static, Postgres>>,
    user_id: UserId,
}

impl PgFeedbackUnit {
    fn conn(&mut self) -> EngineResult<&mut PgConnection> {
        self.tx
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| EngineError::Internal("feedback transaction already committed".into()))
    }
}

#[async_trait]
impl FeedbackUnit for PgFeedbackUnit {
    async fn learned(&mut self) -> EngineResult<Option<LearnedVector>> {
        let user_id = self.user_id;
        let row = sqlx::query(
            "SELECT vector, seed, feedback_count, updated_at FROM learned_vectors WHERE user_id = $1",
        )
        .bind(user_id.to_db())
        .fetch_optional(self.conn()?)
        .await?;

        row.map(|row| -> EngineResult<LearnedVector> {
            Ok(LearnedVector {
                user_id,
                vector: row.try_get("vector")?,
                seed: row.try_get("seed")?,
                feedback_count: to_u32(row.try_get("feedback_count")?),
                updated_at: row.try_get("updated_at")?,
            })
        })
        .transpose()
    }

    async fn events(&mut self) -> EngineResult<Vec<FeedbackEvent>> {
        let user_id = self.user_id;
        let rows = sqlx::query(&format!("SELECT {EVENT_COLUMNS} FROM feedback_events WHERE user_id = $1"))
            .bind(user_id.to_db())
            .fetch_all(self.conn()?)
            .await?;

        rows.iter().map(event_from_row).collect()
    }

    async fn upsert_event(&mut self, event: FeedbackEvent) -> EngineResult<FeedbackEvent> {
        let row = sqlx::query(&format!(
            "INSERT INTO feedback_events (user_id, item_id, label, created_at, updated_at, active) \
             VALUES ($1, $2, $3, $4, $5, TRUE) \
             ON CONFLICT (user_id, item_id) DO UPDATE SET \
             label = EXCLUDED.label, updated_at = EXCLUDED.updated_at, active = TRUE, \
             created_at = CASE WHEN feedback_events.active THEN feedback_events.created_at \
                               ELSE EXCLUDED.created_at END \
             RETURNING {EVENT_COLUMNS}"
        ))
        .bind(self.user_id.to_db())
        .bind(event.item_id.to_db())
        .bind(event.label.as_str())
        .bind(event.created_at)
        .bind(event.updated_at)
        .fetch_one(self.conn()?)
        .await?;

        event_from_row(&row)
    }

    async fn delete_event(&mut self, item_id: ItemId) -> EngineResult<bool> {
        let user_id = self.user_id;
        let result = sqlx::query("DELETE FROM feedback_events WHERE user_id = $1 AND item_id = $2")
            .bind(user_id.to_db())
            .bind(item_id.to_db())
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn deactivate_events(&mut self) -> EngineResult<u64> {
        let user_id = self.user_id;
        let result = sqlx::query("UPDATE feedback_events SET active = FALSE WHERE user_id = $1 AND active")
            .bind(user_id.to_db())
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn clear_events(&mut self) -> EngineResult<u64> {
        let user_id = self.user_id;
        let result = sqlx::query("DELETE FROM feedback_events WHERE user_id = $1")
            .bind(user_id.to_db())
            .execute(self.conn()?)
            .await?;
        Ok(result.rows_affected())
    }

    async fn put_learned(&mut self, vector: LearnedVector) -> EngineResult<()> {
        sqlx::query(
            "INSERT INTO learned_vectors (user_id, vector, seed, feedback_count, updated_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (user_id) DO UPDATE SET \
             vector = EXCLUDED.vector, seed = EXCLUDED.seed, \
             feedback_count = EXCLUDED.feedback_count, updated_at = EXCLUDED.updated_at",
        )
        .bind(self.user_id.to_db())
        .bind(&vector.vector)
        .bind(&vector.seed)
        .bind(to_i32(vector.feedback_count))
        .bind(vector.updated_at)
        .execute(self.conn()?)
        .await?;
        Ok(())
    }

    async fn delete_learned(&mut self) -> EngineResult<()> {
        let user_id = self.user_id;
        sqlx::query("DELETE FROM learned_vectors WHERE user_id = $1")
            .bind(user_id.to_db())
            .execute(self.conn()?)
            .await?;
        Ok(())
    }

    async fn commit(&mut self) -> EngineResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.commit().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl EntitlementGate for PgStore {
    async fn is_entitled(&self, user_id: UserId) -> EngineResult<bool> {
        let entitled: Option<bool> = sqlx::query_scalar(
            "SELECT premium AND (expires_at IS NULL OR expires_at > now()) \
             FROM user_entitlements WHERE user_id = $1",
        )
        .bind(user_id.to_db())
        .fetch_optional(&self.pool)
        .await?;
        Ok(entitled.unwrap_or(false))
    }
}

/// pgvector-backed item store.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
    dimension: VectorDimension,
}

impl PgVectorStore {
    pub fn new(pool: PgPool, dimension: VectorDimension) -> Self {
        Self { pool, dimension }
    }

    /// Fails fast when previously ingested vectors disagree with the
    /// configured dimension.
    pub async fn verify_stored_dimension(&self) -> EngineResult<()> {
        let stored: Option<i32> =
            sqlx::query_scalar("SELECT vector_dims(embedding) FROM item_embeddings LIMIT 1")
                .fetch_optional(&self.pool)
                .await?;

        match stored {
            Some(actual) if actual as usize != self.dimension.get() => Err(EngineError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: actual as usize,
            }),
            _ => Ok(()),
        }
    }
}

const ITEM_COLUMNS: &str = "item_id, embedding::real[] AS embedding, schema_version, name, genres, tags, \
                            review_score, review_count, release_year, is_free";

fn item_from_row(row: &PgRow) -> EngineResult<ItemEmbedding> {
    let release_year: Option<i16> = row.try_get("release_year")?;
    let schema_version: i16 = row.try_get("schema_version")?;
    Ok(ItemEmbedding {
        item_id: ItemId::from_db(row.try_get("item_id")?)?,
        vector: row.try_get("embedding")?,
        metadata: ItemMetadata {
            schema_version: u16::try_from(schema_version).unwrap_or(0),
            name: row.try_get("name")?,
            genres: row.try_get("genres")?,
            tags: row.try_get("tags")?,
            review_score: row.try_get("review_score")?,
            review_count: to_u32(row.try_get("review_count")?),
            release_year: release_year.and_then(|y| u16::try_from(y).ok()),
            is_free: row.try_get("is_free")?,
        },
    })
}

#[async_trait]
impl EmbeddingRepository for PgVectorStore {
    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    async fn upsert(&self, item: &ItemEmbedding) -> EngineResult<()> {
        self.dimension.check(&item.vector)?;
        let meta = &item.metadata;
        sqlx::query(
            "INSERT INTO item_embeddings \
             (item_id, embedding, schema_version, name, genres, tags, review_score, review_count, release_year, is_free, updated_at) \
             VALUES ($1, $2::real[]::vector, $3, $4, $5, $6, $7, $8, $9, $10, now()) \
             ON CONFLICT (item_id) DO UPDATE SET \
             embedding = EXCLUDED.embedding, schema_version = EXCLUDED.schema_version, name = EXCLUDED.name, \
             genres = EXCLUDED.genres, tags = EXCLUDED.tags, review_score = EXCLUDED.review_score, \
             review_count = EXCLUDED.review_count, release_year = EXCLUDED.release_year, \
             is_free = EXCLUDED.is_free, updated_at = now()",
        )
        .bind(item.item_id.to_db())
        .bind(&item.vector)
        .bind(meta.schema_version as i16)
        .bind(&meta.name)
        .bind(&meta.genres)
        .bind(&meta.tags)
        .bind(meta.review_score)
        .bind(to_i32(meta.review_count))
        .bind(meta.release_year.map(|y| y as i16))
        .bind(meta.is_free)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, item_id: ItemId) -> EngineResult<Option<ItemEmbedding>> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM item_embeddings WHERE item_id = $1"))
            .bind(item_id.to_db())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(item_from_row).transpose()
    }

    async fn get_many(&self, item_ids: &[ItemId]) -> EngineResult<HashMap<ItemId, ItemEmbedding>> {
        if item_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let ids: Vec<i64> = item_ids.iter().map(|id| id.to_db()).collect();
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM item_embeddings WHERE item_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| item_from_row(row).map(|item| (item.item_id, item)))
            .collect()
    }

    async fn nearest(
        &self,
        query: &[f32],
        limit: usize,
        predicate: &ItemPredicate,
    ) -> EngineResult<Vec<Neighbor>> {
        self.dimension.check(query)?;

        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new("SELECT item_id, (embedding <=> ");
        qb.push_bind(query.to_vec());
        qb.push("::real[]::vector)::real AS distance FROM item_embeddings WHERE TRUE");

        if let Some(min) = predicate.min_review_score {
            qb.push(" AND review_score >= ").push_bind(min);
        }
        if predicate.free_only {
            qb.push(" AND is_free");
        }
        if let Some(min) = predicate.release_year_min {
            qb.push(" AND release_year >= ").push_bind(min as i16);
        }
        if let Some(max) = predicate.release_year_max {
            qb.push(" AND release_year <= ").push_bind(max as i16);
        }
        if !predicate.genres.is_empty() {
            qb.push(" AND EXISTS (SELECT 1 FROM unnest(genres) g WHERE lower(g) = ANY(")
                .push_bind(predicate.genres.clone())
                .push("))");
        }
        if !predicate.tags.is_empty() {
            qb.push(" AND EXISTS (SELECT 1 FROM unnest(tags) t WHERE lower(t) = ANY(")
                .push_bind(predicate.tags.clone())
                .push("))");
        }
        if !predicate.exclude.is_empty() {
            let excluded: Vec<i64> = predicate.exclude.iter().map(|id| id.to_db()).collect();
            qb.push(" AND NOT (item_id = ANY(").push_bind(excluded).push("))");
        }
        qb.push(" ORDER BY distance ASC, item_id ASC LIMIT ")
            .push_bind(limit as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> EngineResult<Neighbor> {
                Ok(Neighbor {
                    item_id: ItemId::from_db(row.try_get("item_id")?)?,
                    distance: row.try_get::<f32, _>("distance")?.clamp(0.0, 2.0),
                })
            })
            .collect()
    }
}
