use rand::distributions::{Distribution as _, WeightedIndex};
use rand::Rng;

use crate::catalog::EntityId;
use crate::error::SelectError;
use crate::probability::Distribution;

/// Draw one position in `0..distribution.len()` by inverse-CDF sampling.
///
/// # Errors
/// Returns [`SelectError::EmptySubset`] for an empty distribution, or one whose
/// weights are unusable (all zero, negative, or not finite).
pub fn draw_position<R: Rng + ?Sized>(
    distribution: &Distribution,
    rng: &mut R,
) -> Result<usize, SelectError> {
    let index = WeightedIndex::new(distribution.probabilities()).map_err(|err| {
        tracing::debug!(error = %err, "distribution rejected by sampler");
        SelectError::EmptySubset
    })?;
    Ok(index.sample(rng))
}

/// Draw one identifier from `subset`, position `i` chosen with probability
/// `distribution[i]`.
///
/// # Errors
/// Returns [`SelectError::EmptySubset`] for an empty subset and
/// [`SelectError::DistributionMismatch`] when the lengths disagree.
pub fn draw<'a, R: Rng + ?Sized>(
    subset: &'a [EntityId],
    distribution: &Distribution,
    rng: &mut R,
) -> Result<&'a EntityId, SelectError> {
    if subset.is_empty() {
        return Err(SelectError::EmptySubset);
    }
    if subset.len() != distribution.len() {
        return Err(SelectError::DistributionMismatch {
            subset: subset.len(),
            distribution: distribution.len(),
        });
    }
    let position = draw_position(distribution, rng)?;
    subset.get(position).ok_or(SelectError::DistributionMismatch {
        subset: subset.len(),
        distribution: distribution.len(),
    })
}
