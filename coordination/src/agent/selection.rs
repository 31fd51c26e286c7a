//! Turn-taking between competing agents

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;

/// Pick one candidate with probability proportional to its words per minute
///
/// Falls back to a uniform choice when every weight is zero.
pub fn select_by_wpm<'a, T, R, F>(candidates: &'a [T], wpm: F, rng: &mut R) -> Option<&'a T>
where
    R: Rng + ?Sized,
    F: Fn(&T) -> u32,
{
    match candidates.len() {
        0 => None,
        1 => candidates.first(),
        _ => {
            let weights: Vec<u32> = candidates.iter().map(&wpm).collect();
            match WeightedIndex::new(&weights) {
                Ok(index) => candidates.get(index.sample(rng)),
                Err(_) => candidates.choose(rng),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_empty_and_single() {
        let mut rng = StdRng::seed_from_u64(1);
        let none: Vec<u32> = Vec::new();
        assert!(select_by_wpm(&none, |w| *w, &mut rng).is_none());
        assert_eq!(select_by_wpm(&[0u32], |w| *w, &mut rng), Some(&0));
    }

    #[test]
    fn test_zero_weight_never_wins() {
        let mut rng = StdRng::seed_from_u64(3);
        let candidates = [("slow", 0u32), ("fast", 120u32)];
        for _ in 0..100 {
            let pick = select_by_wpm(&candidates, |c| c.1, &mut rng).unwrap();
            assert_eq!(pick.0, "fast");
        }
    }

    #[test]
    fn test_all_zero_falls_back_to_uniform() {
        let mut rng = StdRng::seed_from_u64(5);
        let candidates = [("a", 0u32), ("b", 0u32)];
        let mut seen_a = false;
        let mut seen_b = false;
        for _ in 0..100 {
            match select_by_wpm(&candidates, |c| c.1, &mut rng).unwrap().0 {
                "a" => seen_a = true,
                _ => seen_b = true,
            }
        }
        assert!(seen_a && seen_b);
    }

    #[test]
    fn test_weighted_by_wpm() {
        let mut rng = StdRng::seed_from_u64(11);
        let candidates = [("a", 300u32), ("b", 100u32)];
        let n = 4000;
        let a = (0..n)
            .filter(|_| select_by_wpm(&candidates, |c| c.1, &mut rng).unwrap().0 == "a")
            .count() as f64;
        assert!((a - 3000.0).abs() < 110.0, "observed {}", a);
    }
}
