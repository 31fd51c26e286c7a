//! Condition balance check
//!
//! Draws conditions repeatedly from a weight map and checks every observed
//! count against the normal-approximation 95% binomial interval.

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use cohort_coordination::assign_condition;
use rand::Rng;

/// z for a two-sided 95% interval
const Z_95: f64 = 1.96;

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTally {
    pub condition: String,
    pub observed: u64,
    pub expected: f64,
    pub low: f64,
    pub high: f64,
}

impl ConditionTally {
    pub fn within_interval(&self) -> bool {
        (self.low..=self.high).contains(&(self.observed as f64))
    }
}

/// Parse `name=weight` pairs
pub fn parse_weights(pairs: &[String]) -> Result<BTreeMap<String, f64>> {
    let mut weights = BTreeMap::new();
    for pair in pairs {
        let (name, weight) = pair
            .split_once('=')
            .with_context(|| format!("expected name=weight, got {:?}", pair))?;
        let weight: f64 = weight
            .trim()
            .parse()
            .with_context(|| format!("invalid weight in {:?}", pair))?;
        weights.insert(name.trim().to_string(), weight);
    }
    if weights.is_empty() {
        bail!("at least one condition weight is required");
    }
    Ok(weights)
}

/// Run `draws` assignments and tally each condition
pub fn run_balance_check<R: Rng + ?Sized>(
    weights: &BTreeMap<String, f64>,
    draws: u64,
    rng: &mut R,
) -> Result<Vec<ConditionTally>> {
    let mut counts: BTreeMap<String, u64> = weights.keys().map(|k| (k.clone(), 0)).collect();
    for _ in 0..draws {
        let condition = assign_condition(weights, rng)?;
        *counts.entry(condition).or_default() += 1;
    }

    let total: f64 = weights.values().sum();
    let n = draws as f64;
    Ok(counts
        .into_iter()
        .map(|(condition, observed)| {
            let p = weights.get(&condition).copied().unwrap_or(0.0) / total;
            let expected = n * p;
            let margin = Z_95 * (n * p * (1.0 - p)).sqrt();
            ConditionTally {
                condition,
                observed,
                expected,
                low: expected - margin,
                high: expected + margin,
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_parse_weights() {
        let weights = parse_weights(&["A=0.3334".into(), " B = 0.3333".into()]).unwrap();
        assert_eq!(weights["A"], 0.3334);
        assert_eq!(weights["B"], 0.3333);

        assert!(parse_weights(&["A".into()]).is_err());
        assert!(parse_weights(&["A=x".into()]).is_err());
        assert!(parse_weights(&[]).is_err());
    }

    #[test]
    fn test_three_way_split_is_balanced() {
        let weights = parse_weights(&["A=0.3334".into(), "B=0.3333".into(), "C=0.3333".into()])
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let tallies = run_balance_check(&weights, 3000, &mut rng).unwrap();

        assert_eq!(tallies.len(), 3);
        assert_eq!(tallies.iter().map(|t| t.observed).sum::<u64>(), 3000);
        for tally in &tallies {
            // Within 10% of N/3 regardless of the seed's luck.
            assert!((tally.observed as f64 - 1000.0).abs() < 100.0, "{:?}", tally);
        }
    }

    #[test]
    fn test_zero_weight_condition_never_drawn() {
        let weights = parse_weights(&["A=1".into(), "B=0".into()]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let tallies = run_balance_check(&weights, 200, &mut rng).unwrap();
        let b = tallies.iter().find(|t| t.condition == "B").unwrap();
        assert_eq!(b.observed, 0);
        assert!(b.within_interval());
    }
}
