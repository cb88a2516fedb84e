//! Top-k categorical sampling over a next-token logit vector.
//!
//! The k highest scores are turned into a probability distribution and one
//! candidate is drawn from it. Returned values are always indices into the
//! original logit vector.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A vocabulary index paired with its logit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopKCandidate {
    pub index: usize,
    pub score: f32,
}

/// Select the `k` highest-scoring entries, best first.
///
/// `k` is clamped to `[1, logits.len()]`. The sort is stable, so equal
/// scores keep their vocabulary order. NaN scores rank below everything.
pub fn top_k_candidates(logits: &[f32], k: usize) -> Vec<TopKCandidate> {
    let mut candidates: Vec<TopKCandidate> = logits
        .iter()
        .enumerate()
        .map(|(index, &score)| TopKCandidate {
            index,
            score: if score.is_nan() { f32::NEG_INFINITY } else { score },
        })
        .collect();
    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    candidates.truncate(k.clamp(1, logits.len().max(1)));
    candidates
}

/// Top-k sampling driven by an explicit uniform draw in `[0, 1)`.
///
/// Empty logits yield index 0. If the exponentiated scores do not sum to a
/// positive finite value the best candidate is returned. If rounding leaves
/// the cumulative mass at or below `draw`, the last candidate is returned.
pub fn sample_top_k_with_draw(logits: &[f32], k: usize, draw: f32) -> usize {
    if logits.is_empty() {
        return 0;
    }
    let candidates = top_k_candidates(logits, k);
    let best = candidates[0];

    let weights: Vec<f32> = candidates
        .iter()
        .map(|c| (c.score - best.score).exp())
        .collect();
    let total: f32 = weights.iter().sum();
    if !(total > 0.0 && total.is_finite()) {
        return best.index;
    }

    let draw = f64::from(draw);
    let mut cumulative = 0.0_f64;
    for (candidate, weight) in candidates.iter().zip(&weights) {
        cumulative += f64::from(weight / total);
        if draw < cumulative {
            return candidate.index;
        }
    }
    candidates[candidates.len() - 1].index
}

/// Top-k sampling consuming exactly one `f32` draw from `rng`.
pub fn sample_top_k<R: Rng + ?Sized>(logits: &[f32], k: usize, rng: &mut R) -> usize {
    let draw: f32 = rng.gen();
    sample_top_k_with_draw(logits, k, draw)
}

/// A top-k sampler bound to its own randomness source.
#[derive(Debug, Clone)]
pub struct TopKSampler<R = StdRng> {
    k: usize,
    rng: R,
}

impl<R: Rng> TopKSampler<R> {
    pub fn new(k: usize, rng: R) -> Self {
        Self { k, rng }
    }

    pub fn k(&self) -> usize {
        self.k
    }

    /// Draw the next vocabulary index from `logits`.
    pub fn sample(&mut self, logits: &[f32]) -> usize {
        sample_top_k(logits, self.k, &mut self.rng)
    }
}

impl TopKSampler<StdRng> {
    /// Reproducible sampler: the same seed and inputs give the same picks.
    pub fn seeded(k: usize, seed: u64) -> Self {
        Self::new(k, StdRng::seed_from_u64(seed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_are_sorted_and_keep_original_indices() {
        let logits = [0.1, 3.0, -1.0, 2.0];
        let top = top_k_candidates(&logits, 2);
        assert_eq!(top.len(), 2);
        assert_eq!(top[0], TopKCandidate { index: 1, score: 3.0 });
        assert_eq!(top[1], TopKCandidate { index: 3, score: 2.0 });
    }

    #[test]
    fn k_is_clamped_to_vocab_size() {
        let logits = [1.0, 2.0, 3.0];
        assert_eq!(top_k_candidates(&logits, 50).len(), 3);
        assert_eq!(top_k_candidates(&logits, 0).len(), 1);
    }

    #[test]
    fn nan_scores_rank_last() {
        let logits = [f32::NAN, 0.5, 1.5];
        let top = top_k_candidates(&logits, 3);
        assert_eq!(top[0].index, 2);
        assert_eq!(top[2].index, 0);
    }

    #[test]
    fn empty_logits_fall_back_to_zero() {
        assert_eq!(sample_top_k_with_draw(&[], 1, 0.5), 0);
        assert_eq!(sample_top_k_with_draw(&[], 40, 0.99), 0);
    }

    #[test]
    fn draw_walks_cumulative_mass() {
        // Two equal candidates share the mass evenly.
        let logits = [5.0, -10.0, 5.0];
        assert_eq!(sample_top_k_with_draw(&logits, 2, 0.0), 0);
        assert_eq!(sample_top_k_with_draw(&logits, 2, 0.49), 0);
        assert_eq!(sample_top_k_with_draw(&logits, 2, 0.51), 2);
    }

    #[test]
    fn k_of_one_is_greedy() {
        let logits = [0.3, 0.9, 0.1, 0.8];
        for draw in [0.0, 0.25, 0.5, 0.999] {
            assert_eq!(sample_top_k_with_draw(&logits, 1, draw), 1);
        }
    }

    #[test]
    fn residual_mass_falls_back_to_last_candidate() {
        let logits = [2.0, 1.0, 0.0];
        assert_eq!(sample_top_k_with_draw(&logits, 3, 1.0), 2);
    }

    #[test]
    fn underflowing_scores_return_best_candidate() {
        let logits = [f32::NEG_INFINITY, f32::NEG_INFINITY, f32::NEG_INFINITY];
        assert_eq!(sample_top_k_with_draw(&logits, 2, 0.7), 0);
    }

    #[test]
    fn seeded_sampler_is_reproducible() {
        let logits: Vec<f32> = (0..64).map(|i| (i % 7) as f32 * 0.5).collect();
        let mut a = TopKSampler::seeded(10, 1234);
        let mut b = TopKSampler::seeded(10, 1234);
        let picks_a: Vec<usize> = (0..32).map(|_| a.sample(&logits)).collect();
        let picks_b: Vec<usize> = (0..32).map(|_| b.sample(&logits)).collect();
        assert_eq!(picks_a, picks_b);
        assert_eq!(a.k(), 10);
    }
}
