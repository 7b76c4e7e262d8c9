//! Named filter bundles. A preset compiles to the same [`RankingFilters`]
//! as a hand-written request; explicit request fields win over it.

use crate::error::{EngineError, EngineResult};
use crate::models::{RankingFilters, RecommendationRequest, NEUTRAL_POPULARITY};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct MoodPreset {
    pub name: &'static str,
    pub description: &'static str,
    pub tags: &'static [&'static str],
    pub genres: &'static [&'static str],
    pub min_review_score: Option<f32>,
    pub popularity_score: u8,
}

pub const MOOD_PRESETS: &[MoodPreset] = &[
    MoodPreset {
        name: "cozy",
        description: "Low-pressure games to unwind with",
        tags: &["cozy", "relaxing", "wholesome", "farming sim", "cute"],
        genres: &[],
        min_review_score: Some(75.0),
        popularity_score: NEUTRAL_POPULARITY,
    },
    MoodPreset {
        name: "competitive",
        description: "Head-to-head play with a skill ceiling",
        tags: &["pvp", "competitive", "esports", "multiplayer"],
        genres: &[],
        min_review_score: Some(70.0),
        popularity_score: 70,
    },
    MoodPreset {
        name: "story_rich",
        description: "Narrative-first experiences",
        tags: &["story rich", "narrative", "choices matter", "visual novel"],
        genres: &[],
        min_review_score: Some(80.0),
        popularity_score: NEUTRAL_POPULARITY,
    },
    MoodPreset {
        name: "quick_session",
        description: "Something you can put down after half an hour",
        tags: &["roguelike", "roguelite", "arcade", "score attack", "short"],
        genres: &[],
        min_review_score: Some(70.0),
        popularity_score: NEUTRAL_POPULARITY,
    },
    MoodPreset {
        name: "hidden_gems",
        description: "Well reviewed and rarely played",
        tags: &[],
        genres: &[],
        min_review_score: Some(85.0),
        popularity_score: 15,
    },
    MoodPreset {
        name: "crowd_pleasers",
        description: "The hits everyone is talking about",
        tags: &[],
        genres: &[],
        min_review_score: Some(80.0),
        popularity_score: 85,
    },
];

pub fn find_preset(name: &str) -> EngineResult<&'static MoodPreset> {
    let wanted = name.trim().to_lowercase();
    MOOD_PRESETS.iter().find(|p| p.name == wanted).ok_or_else(|| {
        let known: Vec<&str> = MOOD_PRESETS.iter().map(|p| p.name).collect();
        EngineError::Validation(format!("unknown mood {name:?}; expected one of {}", known.join(", ")))
    })
}

fn owned(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

impl From<&MoodPreset> for RankingFilters {
    fn from(preset: &MoodPreset) -> Self {
        RankingFilters {
            min_review_score: preset.min_review_score,
            genres: owned(preset.genres),
            tags: owned(preset.tags),
            popularity_score: preset.popularity_score,
            ..RankingFilters::default()
        }
    }
}

/// Starts from the mood preset (if any) and overlays every field the
/// request sets explicitly.
pub fn compile_filters(request: &RecommendationRequest) -> EngineResult<RankingFilters> {
    let mut filters = match &request.mood {
        Some(mood) => RankingFilters::from(find_preset(mood)?),
        None => RankingFilters::default(),
    };

    if let Some(score) = request.min_review_score {
        filters.min_review_score = Some(score);
    }
    if let Some(free_only) = request.free_only {
        filters.free_only = free_only;
    }
    if let Some(year) = request.release_year_min {
        filters.release_year_min = Some(year);
    }
    if let Some(year) = request.release_year_max {
        filters.release_year_max = Some(year);
    }
    if let Some(genres) = &request.genres {
        filters.genres = genres.clone();
    }
    if let Some(tags) = &request.tags {
        filters.tags = tags.clone();
    }
    if let Some(score) = request.popularity_score {
        filters.popularity_score = score;
    }

    Ok(filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::QuerySource;

    #[test]
    fn presets_have_unique_names() {
        let mut names: Vec<&str> = MOOD_PRESETS.iter().map(|p| p.name).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 6);
    }

    #[test]
    fn explicit_fields_override_preset() {
        let mut request = RecommendationRequest::new(QuerySource::Preference).with_popularity(60);
        request.mood = Some("Hidden_Gems".into());
        request.tags = Some(vec!["puzzle".into()]);

        let filters = compile_filters(&request).unwrap();
        assert_eq!(filters.popularity_score, 60);
        assert_eq!(filters.min_review_score, Some(85.0));
        assert_eq!(filters.tags, vec!["puzzle".to_string()]);
    }

    #[test]
    fn no_mood_is_neutral() {
        let filters = compile_filters(&RecommendationRequest::new(QuerySource::Blended)).unwrap();
        assert_eq!(filters, RankingFilters::default());
    }

    #[test]
    fn unknown_mood_is_rejected() {
        let mut request = RecommendationRequest::new(QuerySource::Blended);
        request.mood = Some("spooky".into());
        assert!(matches!(compile_filters(&request), Err(EngineError::Validation(_))));
    }
}
