mod ids;

pub use ids::{IdParseError, ItemId, UserId};

use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const METADATA_SCHEMA_VERSION: u16 = 1;

/// Descriptive catalog metadata attached to every embedded item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    #[serde(default = "default_schema_version")]
    pub schema_version: u16,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Percentage of positive reviews, 0..=100.
    pub review_score: Option<f32>,
    #[serde(default)]
    pub review_count: u32,
    pub release_year: Option<u16>,
    #[serde(default)]
    pub is_free: bool,
}

fn default_schema_version() -> u16 {
    METADATA_SCHEMA_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemEmbedding {
    pub item_id: ItemId,
    pub vector: Vec<f32>,
    pub metadata: ItemMetadata,
}

/// One owned game in a user's library, as reported by the last sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedItemSignal {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub playtime_minutes: u32,
    pub last_played_at: Option<DateTime<Utc>>,
    /// Achievement completion in 0..=1, present only when it was fetched.
    pub completion_ratio: Option<f32>,
    #[serde(default)]
    pub genres: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub contributing_items: u32,
    pub below_threshold: u32,
    pub missing_embedding: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreferenceVector {
    pub user_id: UserId,
    pub vector: Vec<f32>,
    pub updated_at: DateTime<Utc>,
    pub contributing_items: u32,
    pub report: BuildReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnedVector {
    pub user_id: UserId,
    pub vector: Vec<f32>,
    /// Copy of the preference vector taken when the first feedback arrived.
    pub seed: Vec<f32>,
    pub feedback_count: u32,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackLabel {
    StrongLike,
    Like,
    Dislike,
    StrongDislike,
}

impl FeedbackLabel {
    pub const ALL: [FeedbackLabel; 4] = [
        FeedbackLabel::StrongLike,
        FeedbackLabel::Like,
        FeedbackLabel::Dislike,
        FeedbackLabel::StrongDislike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FeedbackLabel::StrongLike => "strong_like",
            FeedbackLabel::Like => "like",
            FeedbackLabel::Dislike => "dislike",
            FeedbackLabel::StrongDislike => "strong_dislike",
        }
    }

    pub fn is_positive(self) -> bool {
        matches!(self, FeedbackLabel::StrongLike | FeedbackLabel::Like)
    }
}

impl fmt::Display for FeedbackLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeedbackLabel {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FeedbackLabel::ALL
            .into_iter()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| {
                EngineError::Validation(format!(
                    "unsupported feedback label {s:?}; expected one of strong_like, like, dislike, strong_dislike"
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub label: FeedbackLabel,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Cleared by a learned-vector reset; inactive events stay listed but
    /// no longer shape the learned vector.
    pub active: bool,
}

impl FeedbackEvent {
    pub fn new(user_id: UserId, item_id: ItemId, label: FeedbackLabel, at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            item_id,
            label,
            created_at: at,
            updated_at: at,
            active: true,
        }
    }
}

/// Feedback event joined with the item's display metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackEntry {
    pub item_id: ItemId,
    pub label: FeedbackLabel,
    pub submitted_at: DateTime<Utc>,
    pub active: bool,
    pub name: Option<String>,
    pub genres: Vec<String>,
    pub review_score: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackSummary {
    pub positive: Vec<FeedbackEntry>,
    pub negative: Vec<FeedbackEntry>,
}

/// Which vector drives a retrieval call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuerySource {
    Preference,
    Blended,
    Text { query: String },
}

impl Default for QuerySource {
    fn default() -> Self {
        QuerySource::Blended
    }
}

/// Compiled filter and scoring contract shared by every retrieval mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingFilters {
    pub min_review_score: Option<f32>,
    #[serde(default)]
    pub free_only: bool,
    pub release_year_min: Option<u16>,
    pub release_year_max: Option<u16>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "neutral_popularity")]
    pub popularity_score: u8,
}

pub const NEUTRAL_POPULARITY: u8 = 50;

fn neutral_popularity() -> u8 {
    NEUTRAL_POPULARITY
}

impl Default for RankingFilters {
    fn default() -> Self {
        Self {
            min_review_score: None,
            free_only: false,
            release_year_min: None,
            release_year_max: None,
            genres: Vec::new(),
            tags: Vec::new(),
            popularity_score: NEUTRAL_POPULARITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationRequest {
    #[serde(default)]
    pub source: QuerySource,
    pub limit: Option<usize>,
    #[serde(default)]
    pub exclude_owned: bool,
    pub mood: Option<String>,
    /// Explicit values override the mood preset.
    pub min_review_score: Option<f32>,
    pub free_only: Option<bool>,
    pub release_year_min: Option<u16>,
    pub release_year_max: Option<u16>,
    pub genres: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
    pub popularity_score: Option<u8>,
}

impl RecommendationRequest {
    pub fn new(source: QuerySource) -> Self {
        Self {
            source,
            limit: None,
            exclude_owned: false,
            mood: None,
            min_review_score: None,
            free_only: None,
            release_year_min: None,
            release_year_max: None,
            genres: None,
            tags: None,
            popularity_score: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_popularity(mut self, score: u8) -> Self {
        self.popularity_score = Some(score);
        self
    }

    pub fn excluding_owned(mut self) -> Self {
        self.exclude_owned = true;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationItem {
    pub item_id: ItemId,
    pub name: String,
    pub similarity: f32,
    pub distance: f32,
    pub review_count: u32,
    pub review_score: Option<f32>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub user_id: UserId,
    pub recommendations: Vec<RecommendationItem>,
    /// Review-count cutoff applied by popularity re-ranking, if any.
    pub popularity_threshold: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnplayedGem {
    pub item_id: ItemId,
    pub name: String,
    pub similarity: f32,
    pub playtime_minutes: u32,
    pub justification: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPick {
    pub user_id: UserId,
    pub day: chrono::NaiveDate,
    pub item_id: ItemId,
    pub name: String,
    pub similarity: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowUpQuestion {
    pub prompt: String,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementResponse {
    pub session_id: Uuid,
    pub round: u8,
    pub max_rounds: u8,
    pub query: String,
    pub recommendations: Vec<RecommendationItem>,
    pub follow_up: Vec<FollowUpQuestion>,
}

/// Opens a refinement session over a free-text query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartRefinementRequest {
    pub query: String,
    pub limit: Option<usize>,
    #[serde(default)]
    pub exclude_owned: bool,
    pub mood: Option<String>,
    pub popularity_score: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineRequest {
    pub selections: Vec<String>,
}
