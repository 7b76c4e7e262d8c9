//! Popularity-aware filter-then-sort over a similarity-ordered pool.

use crate::models::NEUTRAL_POPULARITY;

/// Median of review counts; mean of the two middle values for even sizes.
pub fn median_review_count(counts: &[u32]) -> Option<f64> {
    if counts.is_empty() {
        return None;
    }
    let mut sorted = counts.to_vec();
    sorted.sort_unstable();
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid] as f64)
    } else {
        Some((sorted[mid - 1] as f64 + sorted[mid] as f64) / 2.0)
    }
}

/// Review-count cutoff for a popularity dial setting, or `None` at neutral.
pub fn popularity_threshold(median: f64, popularity_score: u8) -> Option<f64> {
    let p = popularity_score.min(100) as f64;
    let neutral = NEUTRAL_POPULARITY as f64;
    if popularity_score == NEUTRAL_POPULARITY {
        None
    } else if p < neutral {
        Some(median * (1.0 + (neutral - p) / neutral))
    } else {
        Some(median * ((p - neutral) / neutral))
    }
}

/// Re-ranks `pool` in place, which must already be in similarity order.
///
/// Below neutral only items under the threshold survive, least-reviewed
/// first; above neutral only items at or over it survive, most-reviewed
/// first. Sorting is stable so equal counts keep their similarity order.
/// Returns the threshold applied.
pub fn rerank_by_popularity<T>(
    pool: &mut Vec<T>,
    popularity_score: u8,
    review_count: impl Fn(&T) -> u32,
) -> Option<f64> {
    if popularity_score == NEUTRAL_POPULARITY || pool.is_empty() {
        return None;
    }

    let counts: Vec<u32> = pool.iter().map(&review_count).collect();
    let median = median_review_count(&counts)?;
    let threshold = popularity_threshold(median, popularity_score)?;

    if popularity_score < NEUTRAL_POPULARITY {
        pool.retain(|item| (review_count(item) as f64) < threshold);
        pool.sort_by_key(|item| review_count(item));
    } else {
        pool.retain(|item| (review_count(item) as f64) >= threshold);
        pool.sort_by_key(|item| std::cmp::Reverse(review_count(item)));
    }

    Some(threshold)
}
