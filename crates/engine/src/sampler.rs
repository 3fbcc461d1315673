//! Weighted sampler — exploration/exploitation pattern selection
//!
//! Weight = (upvotes + 1) / (runs + 1): rarely-tested patterns and
//! well-voted patterns both float to the top. Selection is sampling without
//! replacement proportional to weight. Candidates arrive ordered oldest
//! last-tested first (never-tested rows lead), so equal-weight draws are
//! deterministic under a fixed seed and no pattern starves.

use persistence::repository::PatternRepository;
use persistence::SqlitePool;
use rand::distributions::WeightedIndex;
use rand::prelude::*;

use crate::orchestrator::CycleError;
use crate::types::Pattern;

/// Sampling weight for a pattern
pub fn pattern_weight(pattern: &Pattern) -> f64 {
    (pattern.upvotes as f64 + 1.0) / (pattern.runs as f64 + 1.0)
}

/// Draw up to `n` distinct patterns, proportional to weight, without
/// replacement. An empty candidate list yields an empty result.
pub fn sample_without_replacement(
    mut candidates: Vec<Pattern>,
    n: usize,
    rng: &mut impl Rng,
) -> Vec<Pattern> {
    let mut selected = Vec::with_capacity(n.min(candidates.len()));

    while selected.len() < n && !candidates.is_empty() {
        let weights: Vec<f64> = candidates.iter().map(pattern_weight).collect();
        // Weights are bounded below by 1/(runs+1) > 0
        let dist = WeightedIndex::new(&weights).expect("pattern weights are strictly positive");
        let idx = dist.sample(&mut *rng);
        selected.push(candidates.swap_remove(idx));
    }

    selected
}

/// Sample `n` patterns from the registry
pub async fn sample_from_registry(
    pool: &SqlitePool,
    n: usize,
    rng: &mut impl Rng,
) -> Result<Vec<Pattern>, CycleError> {
    let repo = PatternRepository::new(pool);
    let candidates: Vec<Pattern> = repo
        .sampling_candidates()
        .await?
        .iter()
        .map(Pattern::from_record)
        .collect();

    Ok(sample_without_replacement(candidates, n, rng))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::PatternCondition;
    use crate::types::PatternOrigin;
    use rand::rngs::StdRng;
    use std::collections::BTreeMap;

    fn pattern(id: i64, upvotes: i64, runs: i64) -> Pattern {
        Pattern {
            id,
            signature: format!("sig-{id}"),
            name: format!("pattern {id}"),
            condition: PatternCondition::All { items: Vec::new() },
            win_rate: 0.6,
            sample_size: 30,
            confidence: 0.95,
            rationale: String::new(),
            upvotes,
            downvotes: 0,
            origin: PatternOrigin::ChaosMiner,
            runs,
            last_tested: None,
            h2h_wins: 0,
            h2h_losses: 0,
            timeframes: Vec::new(),
            timeframe_perf: BTreeMap::new(),
        }
    }

    #[test]
    fn test_weight_formula() {
        assert!((pattern_weight(&pattern(1, 0, 0)) - 1.0).abs() < 1e-9);
        assert!((pattern_weight(&pattern(1, 3, 0)) - 4.0).abs() < 1e-9);
        assert!((pattern_weight(&pattern(1, 3, 7)) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_registry_yields_empty_sample() {
        let mut rng = StdRng::seed_from_u64(1);
        let sample = sample_without_replacement(Vec::new(), 5, &mut rng);
        assert!(sample.is_empty());
    }

    #[test]
    fn test_single_pattern_always_selected() {
        let mut rng = StdRng::seed_from_u64(1);
        let sample = sample_without_replacement(vec![pattern(1, 0, 0)], 3, &mut rng);
        assert_eq!(sample.len(), 1);
        assert_eq!(sample[0].id, 1);
    }

    #[test]
    fn test_without_replacement_is_distinct() {
        let mut rng = StdRng::seed_from_u64(9);
        let candidates: Vec<Pattern> = (1..=5).map(|i| pattern(i, 0, 0)).collect();
        let sample = sample_without_replacement(candidates, 5, &mut rng);

        let mut ids: Vec<i64> = sample.iter().map(|p| p.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_fixed_seed_is_reproducible() {
        let candidates: Vec<Pattern> = (1..=6).map(|i| pattern(i, i, 0)).collect();

        let a = sample_without_replacement(candidates.clone(), 3, &mut StdRng::seed_from_u64(77));
        let b = sample_without_replacement(candidates, 3, &mut StdRng::seed_from_u64(77));

        let ids_a: Vec<i64> = a.iter().map(|p| p.id).collect();
        let ids_b: Vec<i64> = b.iter().map(|p| p.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_empirical_frequency_converges_to_weight() {
        // Weights 4:1 → normalized 0.8 / 0.2
        let heavy = pattern(1, 3, 0);
        let light = pattern(2, 0, 0);
        let mut rng = StdRng::seed_from_u64(2024);

        let draws = 10_000;
        let mut heavy_hits = 0u32;
        for _ in 0..draws {
            let sample =
                sample_without_replacement(vec![heavy.clone(), light.clone()], 1, &mut rng);
            if sample[0].id == 1 {
                heavy_hits += 1;
            }
        }

        let freq = heavy_hits as f64 / draws as f64;
        assert!(
            (freq - 0.8).abs() < 0.02,
            "empirical frequency {freq} drifted from 0.8"
        );
    }
}
