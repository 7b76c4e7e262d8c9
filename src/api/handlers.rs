use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::services::recommendation::moods::MoodPreset;
use crate::services::sync::SyncReport;
use crate::services::vector_db::ingest;
use crate::AppState;

fn user_id(raw: &str) -> EngineResult<UserId> {
    Ok(UserId::from_str(raw)?)
}

fn item_id(raw: &str) -> EngineResult<ItemId> {
    Ok(ItemId::from_str(raw)?)
}

// Request/Response types

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub ingested: usize,
}

/// One owned game as reported by an external library sync.
#[derive(Debug, Deserialize)]
pub struct LibraryEntry {
    pub item_id: ItemId,
    pub playtime_minutes: u32,
    pub last_played_at: Option<DateTime<Utc>>,
    pub completion_ratio: Option<f32>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PreferenceSummary {
    pub user_id: UserId,
    pub updated_at: DateTime<Utc>,
    pub dimension: usize,
    pub report: BuildReport,
}

impl From<&PreferenceVector> for PreferenceSummary {
    fn from(pv: &PreferenceVector) -> Self {
        Self {
            user_id: pv.user_id,
            updated_at: pv.updated_at,
            dimension: pv.vector.len(),
            report: pv.report.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub item_id: ItemId,
    /// Parsed explicitly so unsupported labels get a structured error.
    pub label: String,
}

#[derive(Debug, Serialize)]
pub struct LearnedSummary {
    pub user_id: UserId,
    pub feedback_count: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub clear_history: bool,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

// Handlers

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "taste-engine",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn ingest_items(
    State(state): State<AppState>,
    Json(items): Json<Vec<ItemEmbedding>>,
) -> EngineResult<Json<IngestResponse>> {
    let mut ingested = 0;
    for item in items {
        ingest(state.embeddings.as_ref(), item).await?;
        ingested += 1;
    }
    tracing::info!("Ingested {} items", ingested);
    Ok(Json(IngestResponse { ingested }))
}

pub async fn replace_library(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
    Json(entries): Json<Vec<LibraryEntry>>,
) -> EngineResult<Json<SyncReport>> {
    let user = user_id(&raw_user)?;
    let signals = entries
        .into_iter()
        .map(|entry| OwnedItemSignal {
            user_id: user,
            item_id: entry.item_id,
            playtime_minutes: entry.playtime_minutes,
            last_played_at: entry.last_played_at,
            completion_ratio: entry.completion_ratio,
            genres: entry.genres,
        })
        .collect();
    Ok(Json(state.sync.replace_library(user, signals).await?))
}

pub async fn pull_library(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
) -> EngineResult<Json<SyncReport>> {
    let user = user_id(&raw_user)?;
    let source = state
        .library_source
        .as_ref()
        .ok_or_else(|| EngineError::Validation("library pull sync is not configured".into()))?;
    Ok(Json(state.sync.sync_from(source.as_ref(), user).await?))
}

pub async fn rebuild_preference(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
) -> EngineResult<Json<PreferenceSummary>> {
    let user = user_id(&raw_user)?;
    let vector = state.preference_builder.rebuild(user).await?;
    Ok(Json(PreferenceSummary::from(&vector)))
}

pub async fn get_preference(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
) -> EngineResult<Json<PreferenceVector>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.preference_builder.get(user).await?))
}

pub async fn submit_feedback(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
    Json(request): Json<FeedbackRequest>,
) -> EngineResult<Json<LearnedSummary>> {
    let user = user_id(&raw_user)?;
    let label = FeedbackLabel::from_str(&request.label)?;
    let learned = state.feedback.submit_feedback(user, request.item_id, label).await?;
    Ok(Json(LearnedSummary {
        user_id: user,
        feedback_count: learned.feedback_count,
        updated_at: learned.updated_at,
    }))
}

pub async fn list_feedback(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
) -> EngineResult<Json<FeedbackSummary>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.feedback.get_user_feedback(user).await?))
}

pub async fn delete_feedback(
    State(state): State<AppState>,
    Path((raw_user, raw_item)): Path<(String, String)>,
) -> EngineResult<StatusCode> {
    let user = user_id(&raw_user)?;
    let item = item_id(&raw_item)?;
    state.feedback.delete_feedback(user, item).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn reset_learned(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
    request: Option<Json<ResetRequest>>,
) -> EngineResult<Json<Value>> {
    let user = user_id(&raw_user)?;
    let Json(request) = request.unwrap_or_default();
    let cleared = state.feedback.reset_learned_vector(user, request.clear_history).await?;
    Ok(Json(json!({ "user_id": user, "cleared_events": cleared })))
}

pub async fn recommend(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
    Json(request): Json<RecommendationRequest>,
) -> EngineResult<Json<RecommendationResponse>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.ranker.recommend(user, &request).await?))
}

pub async fn unplayed_gems(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
    Query(query): Query<LimitQuery>,
) -> EngineResult<Json<Vec<UnplayedGem>>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.ranker.unplayed_gems(user, query.limit).await?))
}

pub async fn daily_pick(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
) -> EngineResult<Json<DailyPick>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.ranker.daily_pick(user).await?))
}

pub async fn list_moods(State(state): State<AppState>) -> Json<&'static [MoodPreset]> {
    Json(state.ranker.list_moods())
}

pub async fn start_refinement(
    State(state): State<AppState>,
    Path(raw_user): Path<String>,
    Json(request): Json<StartRefinementRequest>,
) -> EngineResult<Json<RefinementResponse>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.refiner.start(user, &request).await?))
}

pub async fn refine(
    State(state): State<AppState>,
    Path((raw_user, session_id)): Path<(String, Uuid)>,
    Json(request): Json<RefineRequest>,
) -> EngineResult<Json<RefinementResponse>> {
    let user = user_id(&raw_user)?;
    Ok(Json(state.refiner.refine(user, session_id, &request.selections).await?))
}
