use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::scheduler::score::ScoredCandidate;
use crate::shard::fnv64a_seed;

/// Builds the deterministic RNG used for weighted candidate selection. Per
/// call, never shared: seeded from `fnv64a(session_hash ∥
/// previous_response_id ∥ model ∥ group_id)`. When neither `session_hash`
/// nor `previous_response_id` is present (anonymous traffic) monotonic-time
/// entropy is folded in so selection doesn't always land on the same
/// candidate.
pub fn seed_rng(
    session_hash: &str,
    previous_response_id: &str,
    model: &str,
    group_id: &str,
) -> StdRng {
    let mut seed = fnv64a_seed(&[session_hash, previous_response_id, model, group_id]);
    if session_hash.is_empty() && previous_response_id.is_empty() {
        seed ^= monotonic_entropy();
    }
    StdRng::seed_from_u64(seed)
}

fn monotonic_entropy() -> u64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_nanos() as u64
}

/// Top-K + weighted-without-replacement: weight `(score_i - min_score) +
/// 1`, degenerate weights (NaN/Inf/≤0) default to 1. Deterministic for a
/// fixed seed.
pub fn weighted_without_replacement(
    top_k: Vec<ScoredCandidate>,
    rng: &mut StdRng,
) -> Vec<ScoredCandidate> {
    if top_k.is_empty() {
        return top_k;
    }
    let min_score = top_k
        .iter()
        .map(|c| c.score)
        .filter(|s| s.is_finite())
        .fold(f64::INFINITY, f64::min);
    let min_score = if min_score.is_finite() { min_score } else { 0.0 };

    let mut pool: Vec<(ScoredCandidate, f64)> = top_k
        .into_iter()
        .map(|c| {
            let raw = c.score - min_score + 1.0;
            let w = if raw.is_finite() && raw > 0.0 { raw } else { 1.0 };
            (c, w)
        })
        .collect();

    let mut order = Vec::with_capacity(pool.len());
    while !pool.is_empty() {
        let total: f64 = pool.iter().map(|(_, w)| *w).sum();
        let pick = rand::Rng::random_range(rng, 0.0..total);
        let mut acc = 0.0;
        let mut idx = pool.len() - 1;
        for (i, (_, w)) in pool.iter().enumerate() {
            acc += *w;
            if pick < acc {
                idx = i;
                break;
            }
        }
        let (candidate, _) = pool.remove(idx);
        order.push(candidate);
    }
    order
}

/// Randomly pairs candidates, keeps the better of each pair, repeats.
/// Never duplicates and always covers the full candidate set.
pub fn power_of_two_choices(
    mut candidates: Vec<ScoredCandidate>,
    rng: &mut StdRng,
) -> Vec<ScoredCandidate> {
    let mut order = Vec::with_capacity(candidates.len());
    while candidates.len() > 1 {
        let i = rand::Rng::random_range(rng, 0..candidates.len());
        let mut j = rand::Rng::random_range(rng, 0..candidates.len());
        while j == i {
            j = rand::Rng::random_range(rng, 0..candidates.len());
        }
        let keep = if candidates[i].score >= candidates[j].score {
            i
        } else {
            j
        };
        let winner = candidates.remove(keep);
        order.push(winner);
    }
    order.extend(candidates);
    order
}

/// Samples one candidate by the softmax CDF over `(score_i - max) /
/// temperature`, then pads the remainder by descending probability.
pub fn softmax_order(
    candidates: Vec<ScoredCandidate>,
    temperature: f64,
    rng: &mut StdRng,
) -> Vec<ScoredCandidate> {
    if candidates.is_empty() {
        return candidates;
    }
    let temperature = temperature.max(1e-6);
    let max_score = candidates
        .iter()
        .map(|c| c.score)
        .fold(f64::NEG_INFINITY, f64::max);
    let mut weighted: Vec<(ScoredCandidate, f64)> = candidates
        .into_iter()
        .map(|c| {
            let p = ((c.score - max_score) / temperature).exp();
            (c, p)
        })
        .collect();
    let total: f64 = weighted.iter().map(|(_, p)| *p).sum();

    let pick = rand::Rng::random_range(rng, 0.0..total.max(1e-12));
    let mut acc = 0.0;
    let mut chosen_idx = weighted.len() - 1;
    for (i, (_, p)) in weighted.iter().enumerate() {
        acc += *p;
        if pick < acc {
            chosen_idx = i;
            break;
        }
    }
    let (chosen, _) = weighted.remove(chosen_idx);

    weighted.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    let mut order = Vec::with_capacity(weighted.len() + 1);
    order.push(chosen);
    order.extend(weighted.into_iter().map(|(c, _)| c));
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, score: f64) -> ScoredCandidate {
        ScoredCandidate {
            account_id: id.to_string(),
            score,
            priority: 0,
            load_rate: 0.0,
            waiting_count: 0,
        }
    }

    #[test]
    fn weighted_seed_is_deterministic() {
        let cands = vec![candidate("a", 0.9), candidate("b", 0.1), candidate("c", 0.5)];
        let mut rng1 = seed_rng("s1", "", "gpt-5.1", "g1");
        let mut rng2 = seed_rng("s1", "", "gpt-5.1", "g1");
        let order1 = weighted_without_replacement(cands.clone(), &mut rng1);
        let order2 = weighted_without_replacement(cands, &mut rng2);
        let ids1: Vec<_> = order1.iter().map(|c| c.account_id.clone()).collect();
        let ids2: Vec<_> = order2.iter().map(|c| c.account_id.clone()).collect();
        assert_eq!(ids1, ids2);
    }

    #[test]
    fn p2c_never_duplicates_and_covers_all() {
        let cands: Vec<_> = (0..6).map(|i| candidate(&format!("a{i}"), i as f64)).collect();
        let mut rng = seed_rng("", "", "", "");
        let order = power_of_two_choices(cands.clone(), &mut rng);
        assert_eq!(order.len(), cands.len());
        let mut ids: Vec<_> = order.iter().map(|c| c.account_id.clone()).collect();
        ids.sort();
        let mut expected: Vec<_> = cands.iter().map(|c| c.account_id.clone()).collect();
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn softmax_low_temperature_prefers_best_score() {
        let cands = vec![candidate("low", 0.1), candidate("high", 3.0)];
        let mut wins = 0;
        for i in 0..100u64 {
            let mut rng = StdRng::seed_from_u64(i);
            let order = softmax_order(cands.clone(), 0.01, &mut rng);
            if order[0].account_id == "high" {
                wins += 1;
            }
        }
        assert!(wins >= 95, "expected argmax to dominate, got {wins}/100");
    }

    #[test]
    fn softmax_high_temperature_is_near_uniform() {
        let cands = vec![candidate("a", 1.0), candidate("b", 0.0)];
        let mut a_first = 0;
        for i in 0..1000u64 {
            let mut rng = StdRng::seed_from_u64(i);
            let order = softmax_order(cands.clone(), 1000.0, &mut rng);
            if order[0].account_id == "a" {
                a_first += 1;
            }
        }
        let ratio = a_first as f64 / 1000.0;
        assert!((ratio - 0.5).abs() < 0.1, "ratio {ratio} not near uniform");
    }
}
