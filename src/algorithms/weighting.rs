//! Decay-weighted aggregation of owned-item signals into a preference vector.
//!
//! weight = playtime × recency × quality, optionally damped per genre cluster,
//! then a weighted mean of the item vectors normalized to unit length.

use super::{normalized, VectorDimension};
use crate::config::PreferenceConfig;
use crate::error::{EngineError, EngineResult};
use crate::models::{BuildReport, ItemEmbedding, ItemId, OwnedItemSignal};
use chrono::{DateTime, Utc};
use ndarray::Array1;
use std::collections::HashMap;

/// Average Gregorian month.
pub const DAYS_PER_MONTH: f64 = 30.436875;
const SECONDS_PER_MONTH: f64 = DAYS_PER_MONTH * 86_400.0;
const UNTAGGED_CLUSTER: &str = "untagged";

#[derive(Debug, Clone, PartialEq)]
pub struct WeightingParams {
    pub min_playtime_minutes: f64,
    pub half_life_months: f64,
    pub use_quality_weight: bool,
    pub quality_strength: f64,
    pub diversify: bool,
}

impl From<&PreferenceConfig> for WeightingParams {
    fn from(config: &PreferenceConfig) -> Self {
        Self {
            min_playtime_minutes: config.min_playtime_hours * 60.0,
            half_life_months: config.half_life_months,
            use_quality_weight: config.use_quality_weight,
            quality_strength: config.quality_strength,
            diversify: config.diversify,
        }
    }
}

/// Sub-linear in hours so one marathon game cannot dominate the mean.
pub fn playtime_weight(minutes: u32) -> f64 {
    (minutes as f64 / 60.0).ln_1p()
}

pub fn recency_weight(
    last_played_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    half_life_months: f64,
) -> f64 {
    match last_played_at {
        None => 1.0,
        Some(at) => {
            let elapsed_months = (now - at).num_seconds().max(0) as f64 / SECONDS_PER_MONTH;
            0.5f64.powf(elapsed_months / half_life_months)
        }
    }
}

/// Bounded to `[1 - strength, 1 + strength]`.
pub fn quality_weight(completion_ratio: Option<f32>, params: &WeightingParams) -> f64 {
    match completion_ratio {
        Some(ratio) if params.use_quality_weight && ratio.is_finite() => {
            let ratio = (ratio as f64).clamp(0.0, 1.0);
            1.0 + params.quality_strength * (2.0 * ratio - 1.0)
        }
        _ => 1.0,
    }
}

/// Weight of a single signal before genre diversification.
pub fn signal_weight(signal: &OwnedItemSignal, params: &WeightingParams, now: DateTime<Utc>) -> f64 {
    playtime_weight(signal.playtime_minutes)
        * recency_weight(signal.last_played_at, now, params.half_life_months)
        * quality_weight(signal.completion_ratio, params)
}

#[derive(Debug, Clone)]
pub struct Aggregate {
    pub vector: Vec<f32>,
    pub report: BuildReport,
}

struct Contribution<'a> {
    vector: &'a [f32],
    weight: f64,
    cluster: &'a str,
}

/// Aggregates `signals` into a unit preference vector.
///
/// Signals are visited in item-id order and summed in f64, so identical
/// inputs always produce bit-identical output.
pub fn aggregate(
    signals: &[OwnedItemSignal],
    embeddings: &HashMap<ItemId, ItemEmbedding>,
    dimension: VectorDimension,
    params: &WeightingParams,
    now: DateTime<Utc>,
) -> EngineResult<Aggregate> {
    let mut ordered: Vec<&OwnedItemSignal> = signals.iter().collect();
    ordered.sort_by_key(|signal| signal.item_id);

    let mut report = BuildReport::default();
    let mut contributions = Vec::with_capacity(ordered.len());

    for signal in ordered {
        if (signal.playtime_minutes as f64) < params.min_playtime_minutes {
            report.below_threshold += 1;
            continue;
        }
        let Some(embedding) = embeddings.get(&signal.item_id) else {
            tracing::warn!(item_id = %signal.item_id, user_id = %signal.user_id, "owned item has no embedding, skipping");
            report.missing_embedding += 1;
            continue;
        };
        dimension.check(&embedding.vector)?;

        let weight = signal_weight(signal, params, now);
        if !(weight > 0.0) || !weight.is_finite() {
            continue;
        }

        let cluster = signal
            .genres
            .first()
            .or_else(|| embedding.metadata.genres.first())
            .map(String::as_str)
            .unwrap_or(UNTAGGED_CLUSTER);

        contributions.push(Contribution {
            vector: &embedding.vector,
            weight,
            cluster,
        });
    }

    if params.diversify {
        diversify(&mut contributions);
    }

    let mut accumulator = Array1::<f64>::zeros(dimension.get());
    let mut total_weight = 0.0f64;
    for contribution in &contributions {
        let item = Array1::from_iter(contribution.vector.iter().map(|&x| x as f64));
        accumulator.scaled_add(contribution.weight, &item);
        total_weight += contribution.weight;
    }

    if !(total_weight > 0.0) {
        return Err(EngineError::InsufficientData(format!(
            "no owned item carried eligible weight ({} below the playtime threshold, {} without embeddings); lower the threshold or sync more games",
            report.below_threshold, report.missing_embedding
        )));
    }

    let mean: Vec<f32> = accumulator.iter().map(|x| (x / total_weight) as f32).collect();
    let vector = normalized(&mean).ok_or_else(|| {
        EngineError::InsufficientData("weighted item vectors cancel out to zero".into())
    })?;

    report.contributing_items = contributions.len() as u32;
    Ok(Aggregate { vector, report })
}

/// Scales each weight by `1 / sqrt(cluster_size)` so a genre's total pull
/// grows with the square root of its item count.
fn diversify(contributions: &mut [Contribution<'_>]) {
    let mut sizes: HashMap<&str, usize> = HashMap::new();
    for contribution in contributions.iter() {
        *sizes.entry(contribution.cluster).or_insert(0) += 1;
    }
    for contribution in contributions.iter_mut() {
        let size = sizes.get(contribution.cluster).copied().unwrap_or(1);
        contribution.weight /= (size as f64).sqrt();
    }
}
