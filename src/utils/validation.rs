use crate::algorithms::{normalized, VectorDimension};
use crate::error::{EngineError, EngineResult};
use crate::models::*;
use std::collections::HashSet;

const MAX_NAME_LEN: usize = 256;
const MAX_LABELS: usize = 64;
const MAX_LABEL_LEN: usize = 64;
const MAX_TEXT_QUERY_LEN: usize = 1_000;

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

/// Ingestion-boundary check for catalog items. Returns the item with a
/// unit-length vector and trimmed labels.
pub fn validate_item_embedding(mut item: ItemEmbedding, dimension: VectorDimension) -> EngineResult<ItemEmbedding> {
    dimension.check(&item.vector)?;
    item.vector = normalized(&item.vector)
        .ok_or_else(|| invalid(format!("item {} has a zero-length embedding", item.item_id)))?;

    let meta = &mut item.metadata;
    if meta.schema_version != METADATA_SCHEMA_VERSION {
        return Err(invalid(format!(
            "unsupported metadata schema version {} (expected {})",
            meta.schema_version, METADATA_SCHEMA_VERSION
        )));
    }

    meta.name = meta.name.trim().to_string();
    if meta.name.is_empty() {
        return Err(invalid("item name cannot be empty"));
    }
    if meta.name.len() > MAX_NAME_LEN {
        return Err(invalid(format!("item name too long (max {MAX_NAME_LEN} characters)")));
    }

    meta.genres = clean_labels(&meta.genres, "genre")?;
    meta.tags = clean_labels(&meta.tags, "tag")?;

    if let Some(score) = meta.review_score {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(invalid("review score must be between 0 and 100"));
        }
    }
    if let Some(year) = meta.release_year {
        if !(1970..=2100).contains(&year) {
            return Err(invalid(format!("implausible release year {year}")));
        }
    }

    Ok(item)
}

fn clean_labels(labels: &[String], kind: &str) -> EngineResult<Vec<String>> {
    if labels.len() > MAX_LABELS {
        return Err(invalid(format!("too many {kind}s (max {MAX_LABELS})")));
    }
    let mut cleaned = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim();
        if label.is_empty() {
            continue;
        }
        if label.len() > MAX_LABEL_LEN {
            return Err(invalid(format!("{kind} {label:?} too long (max {MAX_LABEL_LEN} characters)")));
        }
        if !cleaned.iter().any(|existing: &String| existing.eq_ignore_ascii_case(label)) {
            cleaned.push(label.to_string());
        }
    }
    Ok(cleaned)
}

pub fn validate_signals(user_id: UserId, signals: &[OwnedItemSignal]) -> EngineResult<()> {
    let mut seen = HashSet::with_capacity(signals.len());
    for signal in signals {
        if !seen.insert(signal.item_id) {
            return Err(invalid(format!("item {} appears more than once in the library", signal.item_id)));
        }
        if signal.user_id != user_id {
            return Err(invalid(format!(
                "signal for item {} belongs to user {}, not {}",
                signal.item_id, signal.user_id, user_id
            )));
        }
        if let Some(ratio) = signal.completion_ratio {
            if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
                return Err(invalid(format!("completion ratio of item {} must lie in [0, 1]", signal.item_id)));
            }
        }
    }
    Ok(())
}

pub fn validate_limit(limit: usize, max_results: usize) -> EngineResult<()> {
    if limit == 0 {
        return Err(invalid("limit must be greater than 0"));
    }
    if limit > max_results {
        return Err(invalid(format!("limit too large (max {max_results})")));
    }
    Ok(())
}

pub fn validate_filters(filters: &RankingFilters) -> EngineResult<()> {
    if filters.popularity_score > 100 {
        return Err(invalid("popularity score must lie in [0, 100]"));
    }
    if let Some(score) = filters.min_review_score {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(invalid("minimum review score must lie in [0, 100]"));
        }
    }
    if let (Some(min), Some(max)) = (filters.release_year_min, filters.release_year_max) {
        if min > max {
            return Err(invalid("release_year_min must not exceed release_year_max"));
        }
    }
    Ok(())
}

pub fn validate_text_query(query: &str) -> EngineResult<&str> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(invalid("query text cannot be empty"));
    }
    if trimmed.chars().count() > MAX_TEXT_QUERY_LEN {
        return Err(invalid(format!("query text too long (max {MAX_TEXT_QUERY_LEN} characters)")));
    }
    Ok(trimmed)
}
