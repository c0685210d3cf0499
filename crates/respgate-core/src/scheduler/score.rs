use crate::config::{ScoreWeights, TrendConfig};

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

/// Everything the scorer needs about one candidate account, already
/// resolved from the account snapshot, load batch, and runtime stats.
#[derive(Debug, Clone)]
pub struct CandidateInput {
    pub account_id: String,
    pub priority: i32,
    pub load_rate: f64,
    pub waiting_count: u32,
    pub concurrency: u32,
    pub error_rate: f64,
    pub ttft_ms: Option<f64>,
    pub load_trend_slope: f64,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub account_id: String,
    pub score: f64,
    pub priority: i32,
    pub load_rate: f64,
    pub waiting_count: u32,
}

/// Implements the weighted scoring formula: `score = w_p·P + w_l·L + w_q·Q
/// + w_e·E + w_t·T`, each factor normalized across the candidate set.
pub fn score_candidates(
    candidates: &[CandidateInput],
    weights: &ScoreWeights,
    trend: &TrendConfig,
) -> Vec<ScoredCandidate> {
    if candidates.is_empty() {
        return Vec::new();
    }

    let min_priority = candidates.iter().map(|c| c.priority).min().unwrap();
    let max_priority = candidates.iter().map(|c| c.priority).max().unwrap();
    let max_observed_concurrency = candidates
        .iter()
        .map(|c| c.concurrency)
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let max_waiting_observed = candidates
        .iter()
        .map(|c| c.waiting_count)
        .max()
        .unwrap_or(0)
        .max(1) as f64;

    let ttft_samples: Vec<f64> = candidates.iter().filter_map(|c| c.ttft_ms).collect();
    let (min_ttft, max_ttft) = if ttft_samples.is_empty() {
        (0.0, 0.0)
    } else {
        (
            ttft_samples.iter().cloned().fold(f64::INFINITY, f64::min),
            ttft_samples.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        )
    };

    candidates
        .iter()
        .map(|c| {
            let p = if max_priority == min_priority {
                1.0
            } else {
                (max_priority - c.priority) as f64 / (max_priority - min_priority) as f64
            };

            let base_load = 1.0 - c.load_rate / 100.0;
            let l = if c.concurrency == 0 {
                base_load
            } else {
                let remaining_slots = c.concurrency as f64 * base_load;
                let blended =
                    0.7 * base_load + 0.3 * (remaining_slots / max_observed_concurrency);
                if trend.enabled {
                    let penalty =
                        0.7 + 0.3 * (1.0 - clamp01(c.load_trend_slope / trend.max_slope.max(1e-9)));
                    blended * penalty
                } else {
                    blended
                }
            };

            let queue_by_observed = 1.0 - c.waiting_count as f64 / max_waiting_observed;
            let queue_by_capacity = if c.concurrency == 0 {
                1.0
            } else {
                1.0 - c.waiting_count as f64 / c.concurrency as f64
            };
            let q = 0.6 * queue_by_observed + 0.4 * queue_by_capacity;

            let e = 1.0 - clamp01(c.error_rate);

            let t = match c.ttft_ms {
                None => 0.5,
                Some(sample) => {
                    if max_ttft > min_ttft {
                        1.0 - (sample - min_ttft) / (max_ttft - min_ttft)
                    } else {
                        1.0
                    }
                }
            };

            let score = weights.priority * p
                + weights.load * clamp01(l)
                + weights.queue * clamp01(q)
                + weights.error_rate * e
                + weights.ttft * t;

            ScoredCandidate {
                account_id: c.account_id.clone(),
                score,
                priority: c.priority,
                load_rate: c.load_rate,
                waiting_count: c.waiting_count,
            }
        })
        .collect()
}

/// Sorts by the defined comparator (descending score; ties broken by
/// priority, load, waiting, then id, all ascending) and truncates to `k`.
pub fn select_top_k(mut candidates: Vec<ScoredCandidate>, k: usize) -> Vec<ScoredCandidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.priority.cmp(&b.priority))
            .then_with(|| a.load_rate.partial_cmp(&b.load_rate).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.waiting_count.cmp(&b.waiting_count))
            .then_with(|| a.account_id.cmp(&b.account_id))
    });
    candidates.truncate(k.max(1));
    candidates
}

/// Standard deviation of load rates among the candidates actually
/// presented to a selection — used for the `load_skew` decision field.
pub fn load_skew(candidates: &[CandidateInput]) -> f64 {
    if candidates.len() < 2 {
        return 0.0;
    }
    let mean = candidates.iter().map(|c| c.load_rate).sum::<f64>() / candidates.len() as f64;
    let variance = candidates
        .iter()
        .map(|c| (c.load_rate - mean).powi(2))
        .sum::<f64>()
        / candidates.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, priority: i32, load_rate: f64, waiting: u32) -> CandidateInput {
        CandidateInput {
            account_id: id.to_string(),
            priority,
            load_rate,
            waiting_count: waiting,
            concurrency: 10,
            error_rate: 0.0,
            ttft_ms: None,
            load_trend_slope: 0.0,
        }
    }

    #[test]
    fn top_k_respects_tiebreak_order() {
        let weights = ScoreWeights::default();
        let trend = TrendConfig { enabled: false, max_slope: 5.0 };
        let cands = vec![
            candidate("b", 1, 10.0, 0),
            candidate("a", 1, 10.0, 0),
        ];
        let scored = score_candidates(&cands, &weights, &trend);
        let top = select_top_k(scored, 2);
        // identical score/priority/load/waiting -> tie-break on id
        assert_eq!(top[0].account_id, "a");
        assert_eq!(top[1].account_id, "b");
    }

    #[test]
    fn top_k_truncates() {
        let weights = ScoreWeights::default();
        let trend = TrendConfig { enabled: false, max_slope: 5.0 };
        let cands: Vec<_> = (0..5)
            .map(|i| candidate(&format!("a{i}"), i, i as f64 * 10.0, 0))
            .collect();
        let scored = score_candidates(&cands, &weights, &trend);
        let top = select_top_k(scored, 2);
        assert_eq!(top.len(), 2);
    }

    #[test]
    fn higher_load_scores_lower() {
        let weights = ScoreWeights::default();
        let trend = TrendConfig { enabled: false, max_slope: 5.0 };
        let cands = vec![candidate("busy", 0, 95.0, 0), candidate("idle", 0, 5.0, 0)];
        let scored = score_candidates(&cands, &weights, &trend);
        let busy = scored.iter().find(|c| c.account_id == "busy").unwrap();
        let idle = scored.iter().find(|c| c.account_id == "idle").unwrap();
        assert!(idle.score > busy.score);
    }
}
