use serde::{Deserialize, Serialize};

use crate::error::SelectError;

/// Selection probabilities aligned with an active subset.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Distribution(Vec<f64>);

impl Distribution {
    #[must_use]
    pub fn probabilities(&self) -> &[f64] {
        &self.0
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<f64> {
        self.0.get(position).copied()
    }
}

/// Softmax over preference scores.
///
/// The maximum is subtracted before exponentiation so large scores do not
/// overflow; the result is the same as the plain formula.
///
/// # Errors
/// Returns [`SelectError::EmptySubset`] when `scores` is empty.
pub fn softmax(scores: &[f64]) -> Result<Distribution, SelectError> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if scores.is_empty() || !max.is_finite() {
        return Err(SelectError::EmptySubset);
    }

    let weights: Vec<f64> = scores.iter().map(|score| (score - max).exp()).collect();
    // The max element contributes exp(0) = 1, so the sum is at least 1.
    let total: f64 = weights.iter().sum();
    Ok(Distribution(weights.into_iter().map(|weight| weight / total).collect()))
}
