//! # 加权随机选择
//!
//! 阈值在 `[1, total]` 上均匀抽取，返回累计权重首个达到阈值的元素。

use crate::error::{RelayError, Result};
use rand::Rng;

/// 按权重随机挑选一个元素，权重小于 1 的元素按 1 计
pub fn weighted_pick<'a, T, R>(items: &'a [T], weight: impl Fn(&T) -> u64, rng: &mut R) -> Result<&'a T>
where
    R: Rng + ?Sized,
{
    if items.is_empty() {
        return Err(RelayError::exhausted("no candidates to pick from"));
    }

    let total: u64 = items.iter().map(|item| weight(item).max(1)).sum();
    if total == 0 {
        return Err(RelayError::exhausted("total weight of candidates is zero"));
    }

    let threshold = rng.gen_range(1..=total);
    let mut cumulative = 0u64;
    for item in items {
        cumulative += weight(item).max(1);
        if cumulative >= threshold {
            return Ok(item);
        }
    }

    Err(RelayError::internal("weighted selection fell through"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rstest::rstest;

    #[test]
    fn test_empty_candidates_is_exhausted() {
        let mut rng = StdRng::seed_from_u64(1);
        let items: Vec<u64> = Vec::new();
        let err = weighted_pick(&items, |w| *w, &mut rng).unwrap_err();
        assert!(err.is_exhausted());
    }

    #[rstest]
    #[case(vec![1, 0, 3], vec![1.0, 1.0, 3.0])]
    #[case(vec![5, 5], vec![1.0, 1.0])]
    #[case(vec![0, 0, 0, 0], vec![1.0, 1.0, 1.0, 1.0])]
    fn test_frequencies_follow_effective_weights(#[case] weights: Vec<u64>, #[case] expected: Vec<f64>) {
        let mut rng = StdRng::seed_from_u64(42);
        let indexed: Vec<(usize, u64)> = weights.iter().copied().enumerate().collect();
        let rounds = 50_000;
        let mut hits = vec![0usize; weights.len()];
        for _ in 0..rounds {
            let (idx, _) = weighted_pick(&indexed, |(_, w)| *w, &mut rng).unwrap();
            hits[*idx] += 1;
        }

        let expected_total: f64 = expected.iter().sum();
        for (idx, share) in expected.iter().enumerate() {
            let observed = hits[idx] as f64 / f64::from(rounds);
            let wanted = share / expected_total;
            assert!(
                (observed - wanted).abs() < 0.02,
                "index {idx}: observed {observed:.3}, expected {wanted:.3}"
            );
        }
    }

    #[test]
    fn test_single_candidate_always_selected() {
        let mut rng = StdRng::seed_from_u64(7);
        let items = ["only"];
        for _ in 0..100 {
            assert_eq!(*weighted_pick(&items, |_| 0, &mut rng).unwrap(), "only");
        }
    }
}
