//! Experimental condition assignment
//!
//! Picks one condition from a map of relative weights. Weights need not sum
//! to one; they are normalised by the weighted index.

use std::collections::BTreeMap;

use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::Rng;
use thiserror::Error;

/// Why no condition could be selected
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConditionError {
    #[error("condition probability map is empty")]
    EmptyProbabilityMap,

    #[error("condition {condition} has invalid weight {weight}")]
    InvalidWeight { condition: String, weight: f64 },

    #[error("condition weights sum to zero")]
    ZeroTotalWeight,
}

/// Select a condition with probability proportional to its weight
pub fn assign_condition<R: Rng + ?Sized>(
    probabilities: &BTreeMap<String, f64>,
    rng: &mut R,
) -> Result<String, ConditionError> {
    if probabilities.is_empty() {
        return Err(ConditionError::EmptyProbabilityMap);
    }
    if let Some((condition, weight)) = probabilities
        .iter()
        .find(|(_, w)| !w.is_finite() || **w < 0.0)
    {
        return Err(ConditionError::InvalidWeight {
            condition: condition.clone(),
            weight: *weight,
        });
    }

    let (names, weights): (Vec<&String>, Vec<f64>) = probabilities.iter().unzip();
    let index = WeightedIndex::new(&weights).map_err(|e| match e {
        WeightedError::AllWeightsZero => ConditionError::ZeroTotalWeight,
        _ => ConditionError::InvalidWeight {
            condition: String::new(),
            weight: f64::NAN,
        },
    })?;

    Ok(names[index.sample(rng)].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn weights(entries: &[(&str, f64)]) -> BTreeMap<String, f64> {
        entries
            .iter()
            .map(|(name, w)| (name.to_string(), *w))
            .collect()
    }

    #[test]
    fn test_single_entry_always_selected() {
        let map = weights(&[("only", 0.2)]);
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            assert_eq!(assign_condition(&map, &mut rng).unwrap(), "only");
        }
    }

    #[test]
    fn test_empty_map_is_config_error() {
        let mut rng = rand::thread_rng();
        assert_eq!(
            assign_condition(&BTreeMap::new(), &mut rng),
            Err(ConditionError::EmptyProbabilityMap)
        );
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut rng = rand::thread_rng();
        assert!(matches!(
            assign_condition(&weights(&[("A", -1.0), ("B", 1.0)]), &mut rng),
            Err(ConditionError::InvalidWeight { .. })
        ));
        assert!(matches!(
            assign_condition(&weights(&[("A", f64::NAN)]), &mut rng),
            Err(ConditionError::InvalidWeight { .. })
        ));
        assert_eq!(
            assign_condition(&weights(&[("A", 0.0), ("B", 0.0)]), &mut rng),
            Err(ConditionError::ZeroTotalWeight)
        );
    }

    #[test]
    fn test_zero_weight_never_selected() {
        let map = weights(&[("A", 0.0), ("B", 1.0)]);
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..200 {
            assert_eq!(assign_condition(&map, &mut rng).unwrap(), "B");
        }
    }

    #[test]
    fn test_balanced_sampling() {
        let map = weights(&[("A", 0.3334), ("B", 0.3333), ("C", 0.3333)]);
        let n = 3000;
        let mut rng = rand::thread_rng();
        let mut counts: BTreeMap<String, u32> = BTreeMap::new();
        for _ in 0..n {
            *counts
                .entry(assign_condition(&map, &mut rng).unwrap())
                .or_default() += 1;
        }

        let expected = n as f64 / 3.0;
        for name in ["A", "B", "C"] {
            let observed = counts.get(name).copied().unwrap_or(0) as f64;
            assert!(
                (observed - expected).abs() <= expected * 0.1,
                "{} observed {} expected {}",
                name,
                observed,
                expected
            );
        }
    }

    #[test]
    fn test_unnormalised_weights() {
        let map = weights(&[("A", 3.0), ("B", 1.0)]);
        let n = 4000;
        let mut rng = StdRng::seed_from_u64(42);
        let a = (0..n)
            .filter(|_| assign_condition(&map, &mut rng).unwrap() == "A")
            .count() as f64;

        // p = 0.75, sd = sqrt(n p (1-p)) ~= 27.4; allow ~4 sd.
        assert!((a - 3000.0).abs() < 110.0, "observed {}", a);
    }
}
