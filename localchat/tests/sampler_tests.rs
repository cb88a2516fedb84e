use localchat::{sample_top_k, sample_top_k_with_draw, top_k_candidates, TopKSampler};
use rand::rngs::mock::StepRng;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[test]
fn sampled_index_is_always_in_vocab() {
    let mut rng = StdRng::seed_from_u64(17);
    for vocab in [1usize, 2, 7, 50] {
        let logits: Vec<f32> = (0..vocab).map(|_| rng.gen_range(-20.0..20.0)).collect();
        for k in 1..=vocab {
            for _ in 0..20 {
                let idx = sample_top_k(&logits, k, &mut rng);
                assert!(idx < vocab, "index {idx} out of range for vocab {vocab}");
            }
        }
    }
}

#[test]
fn sampled_index_comes_from_top_k() {
    let logits = [0.0, 9.0, 1.0, 8.0, 2.0, 7.0];
    let allowed: Vec<usize> = top_k_candidates(&logits, 3).iter().map(|c| c.index).collect();
    assert_eq!(allowed, vec![1, 3, 5]);

    let mut sampler = TopKSampler::seeded(3, 8);
    for _ in 0..200 {
        assert!(allowed.contains(&sampler.sample(&logits)));
    }
}

#[test]
fn empty_logits_return_zero_for_any_k() {
    let mut rng = StdRng::seed_from_u64(0);
    for k in [1, 2, 10, 1000] {
        assert_eq!(sample_top_k(&[], k, &mut rng), 0);
    }
}

#[test]
fn tied_very_negative_scores_pick_a_top_candidate() {
    let mut logits = vec![f32::NEG_INFINITY; 8];
    for i in [2, 5, 6] {
        logits[i] = -1e30;
    }
    for draw in [0.0, 0.3, 0.6, 0.999] {
        let idx = sample_top_k_with_draw(&logits, 3, draw);
        assert!([2, 5, 6].contains(&idx));
    }
    assert_eq!(sample_top_k_with_draw(&logits, 3, 0.0), 2);
}

#[test]
fn all_scores_underflowing_return_first_candidate() {
    let logits = [f32::NEG_INFINITY; 5];
    assert_eq!(sample_top_k_with_draw(&logits, 3, 0.5), 0);
}

#[test]
fn fixed_draws_are_deterministic() {
    let logits = [1.0, 2.0, 3.0, 4.0];
    // StepRng with a zero step repeats the same word, so every draw is 0.0.
    let mut low = StepRng::new(0, 0);
    let picks: Vec<usize> = (0..5).map(|_| sample_top_k(&logits, 4, &mut low)).collect();
    assert_eq!(picks, vec![3; 5]);

    // All-ones words give the largest draw below 1.0: the lowest-ranked candidate.
    let mut high = StepRng::new(u64::MAX, 0);
    let picks: Vec<usize> = (0..5).map(|_| sample_top_k(&logits, 4, &mut high)).collect();
    assert_eq!(picks, vec![0; 5]);
}

#[test]
fn huge_logits_do_not_overflow() {
    let logits = [1e30, 1e30 - 1.0, -1e30];
    let idx = sample_top_k_with_draw(&logits, 2, 0.25);
    assert!(idx == 0 || idx == 1);
}
