//! Multi-round narrowing of a free-text query.
//!
//! Each round appends the user's chosen answers to the original query and
//! re-runs text retrieval. Follow-up questions are drawn from the most common
//! tags and genres of the current results that the query does not already
//! mention.

use crate::config::RefinerConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use crate::services::recommendation::RetrievalRanker;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct RefinementSession {
    user_id: UserId,
    original_query: String,
    refinements: Vec<String>,
    round: u8,
    max_rounds: u8,
    request: RecommendationRequest,
    expires_at: DateTime<Utc>,
}

impl RefinementSession {
    fn query(&self) -> String {
        compose_query(&self.original_query, &self.refinements)
    }
}

/// `"{original}. {r1}. {r2}"`
pub fn compose_query(original: &str, refinements: &[String]) -> String {
    std::iter::once(original.trim())
        .chain(refinements.iter().map(|r| r.as_str()))
        .collect::<Vec<_>>()
        .join(". ")
}

fn ranked_labels<'a>(labels: impl Iterator<Item = &'a String>, query: &str) -> Vec<String> {
    let query = query.to_lowercase();
    let mut counts: HashMap<String, (usize, String)> = HashMap::new();
    for label in labels {
        let key = label.to_lowercase();
        if key.is_empty() || query.contains(&key) {
            continue;
        }
        counts.entry(key).or_insert_with(|| (0, label.clone())).0 += 1;
    }

    let mut ranked: Vec<(usize, String)> = counts.into_values().collect();
    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.to_lowercase().cmp(&b.1.to_lowercase())));
    ranked.into_iter().map(|(_, label)| label).collect()
}

/// Up to `max_questions` questions of up to `max_options` options each,
/// tags first, then genres.
pub fn follow_up_questions(
    results: &[RecommendationItem],
    query: &str,
    max_questions: usize,
    max_options: usize,
) -> Vec<FollowUpQuestion> {
    if max_options == 0 {
        return Vec::new();
    }
    let tags = ranked_labels(results.iter().flat_map(|r| r.tags.iter()), query);
    let genres = ranked_labels(results.iter().flat_map(|r| r.genres.iter()), query);

    let tag_questions = tags.chunks(max_options).map(|options| FollowUpQuestion {
        prompt: "Which of these sounds closest to what you want?".to_string(),
        options: options.to_vec(),
    });
    let genre_questions = genres.chunks(max_options).map(|options| FollowUpQuestion {
        prompt: "Any genre you're leaning toward?".to_string(),
        options: options.to_vec(),
    });

    tag_questions.chain(genre_questions).take(max_questions).collect()
}

pub struct ConversationalRefiner {
    ranker: Arc<RetrievalRanker>,
    sessions: DashMap<Uuid, RefinementSession>,
    config: RefinerConfig,
}

impl ConversationalRefiner {
    pub fn new(ranker: Arc<RetrievalRanker>, config: RefinerConfig) -> Self {
        Self {
            ranker,
            sessions: DashMap::new(),
            config,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions.len()
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        self.sessions.retain(|_, session| session.expires_at > now);
    }

    pub async fn start(&self, user_id: UserId, request: &StartRefinementRequest) -> EngineResult<RefinementResponse> {
        let now = Utc::now();
        self.purge_expired(now);

        let mut base = RecommendationRequest::new(QuerySource::Text {
            query: request.query.clone(),
        });
        base.limit = request.limit;
        base.exclude_owned = request.exclude_owned;
        base.mood = request.mood.clone();
        base.popularity_score = request.popularity_score;

        let session = RefinementSession {
            user_id,
            original_query: request.query.trim().to_string(),
            refinements: Vec::new(),
            round: 0,
            max_rounds: self.config.max_rounds,
            request: base,
            expires_at: now + Duration::seconds(self.config.session_ttl_secs),
        };
        let response = self.run(Uuid::new_v4(), &session).await?;
        self.sessions.insert(response.session_id, session);

        info!(user_id = %user_id, session_id = %response.session_id, "Started refinement session");
        Ok(response)
    }

    /// Advances a session owned by `user_id`. Sessions of other users are
    /// reported as missing.
    pub async fn refine(
        &self,
        user_id: UserId,
        session_id: Uuid,
        selections: &[String],
    ) -> EngineResult<RefinementResponse> {
        let now = Utc::now();
        let mut session = self
            .sessions
            .get(&session_id)
            .filter(|s| s.user_id == user_id && s.expires_at > now)
            .map(|s| s.clone())
            .ok_or_else(|| EngineError::NotFound(format!("refinement session {session_id}")))?;

        if session.round >= session.max_rounds {
            return Err(EngineError::Validation(format!(
                "session already used all {} refinement rounds",
                session.max_rounds
            )));
        }
        let chosen: Vec<&str> = selections.iter().map(|s| s.trim()).filter(|s| !s.is_empty()).collect();
        if chosen.is_empty() {
            return Err(EngineError::Validation("at least one selection is required".into()));
        }

        let previous_round = session.round;
        session.refinements.push(chosen.join(", "));
        session.round += 1;
        session.expires_at = now + Duration::seconds(self.config.session_ttl_secs);

        let response = self.run(session_id, &session).await?;

        match self.sessions.get_mut(&session_id) {
            Some(mut stored) if stored.round == previous_round => *stored = session,
            _ => {
                return Err(EngineError::Validation(format!(
                    "refinement session {session_id} changed concurrently; retry"
                )))
            }
        }
        debug!(session_id = %session_id, round = response.round, "Refined query");
        Ok(response)
    }

    async fn run(&self, session_id: Uuid, session: &RefinementSession) -> EngineResult<RefinementResponse> {
        let query = session.query();
        let mut request = session.request.clone();
        request.source = QuerySource::Text { query: query.clone() };

        let recommendations = self.ranker.recommend(session.user_id, &request).await?.recommendations;
        let follow_up = if session.round < session.max_rounds {
            follow_up_questions(&recommendations, &query, self.config.max_questions, self.config.max_options)
        } else {
            Vec::new()
        };

        Ok(RefinementResponse {
            session_id,
            round: session.round,
            max_rounds: session.max_rounds,
            query,
            recommendations,
            follow_up,
        })
    }
}
