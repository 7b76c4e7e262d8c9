pub mod daily;
pub mod popularity;
pub mod retriever;
pub mod weighting;

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Norms below this are treated as zero vectors.
pub const NORM_EPSILON: f32 = 1e-6;

/// The single vector size every embedding in a deployment must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VectorDimension(usize);

impl VectorDimension {
    pub fn new(size: usize) -> EngineResult<Self> {
        if size == 0 {
            return Err(EngineError::Validation("vector dimension must be positive".into()));
        }
        Ok(Self(size))
    }

    pub fn get(self) -> usize {
        self.0
    }

    pub fn check(self, vector: &[f32]) -> EngineResult<()> {
        if vector.len() != self.0 {
            return Err(EngineError::DimensionMismatch {
                expected: self.0,
                actual: vector.len(),
            });
        }
        if vector.iter().any(|x| !x.is_finite()) {
            return Err(EngineError::Validation("vector contains NaN or infinite values".into()));
        }
        Ok(())
    }
}

pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Returns `None` for zero or non-finite input instead of dividing by ~0.
pub fn normalized(vector: &[f32]) -> Option<Vec<f32>> {
    let norm = l2_norm(vector);
    if !norm.is_finite() || norm < NORM_EPSILON {
        return None;
    }
    Some(vector.iter().map(|x| x / norm).collect())
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        (dot_product / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Cosine distance in [0, 2].
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    (1.0 - cosine_similarity(a, b)).clamp(0.0, 2.0)
}

/// Maps a distance in [0, 2] onto a similarity in [0, 1].
pub fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - distance / 2.0).clamp(0.0, 1.0)
}

/// `normalize((1 - alpha) * base + alpha * other)`, falling back to `base`
/// when the blend cancels out.
pub fn blend(base: &[f32], other: &[f32], alpha: f32) -> Vec<f32> {
    let mixed: Vec<f32> = base
        .iter()
        .zip(other.iter())
        .map(|(b, o)| (1.0 - alpha) * b + alpha * o)
        .collect();
    normalized(&mixed).unwrap_or_else(|| base.to_vec())
}
