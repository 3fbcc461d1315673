//! Pattern miner — promotes statistically significant trial buckets
//!
//! Scans a bounded recent window of trials, groups them by discretized
//! feature combination (momentum tier × volatility tier × volume tier), and
//! promotes buckets whose win rate beats the baseline by a significant margin
//! under a one-sided binomial test. Promotion is an idempotent upsert keyed
//! by the condition's structural signature, so overlapping miner invocations
//! converge on a single registry row per bucket.

use std::collections::HashMap;

use persistence::repository::{PatternRepository, TrialRepository, UpsertOutcome};
use persistence::SqlitePool;
use serde::{Deserialize, Serialize};
use statrs::distribution::{Binomial, DiscreteCDF};
use tracing::info;

use crate::condition::PatternCondition;
use crate::orchestrator::CycleError;
use crate::types::{MomentumTier, PatternOrigin, Trial, VolatilityTier, VolumeTier};

/// Pattern miner configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Minimum bucket size for promotion
    pub min_sample_size: u32,
    /// One-sided binomial p-value bound
    pub p_value: f64,
    /// Win-rate baseline the bucket must beat
    pub baseline: f64,
    /// Recent-window size in trials; mining cost never grows with history
    pub window: u32,
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            min_sample_size: 20,
            p_value: 0.05,
            baseline: 0.5,
            window: 500,
        }
    }
}

/// A feature bucket observed in the mining window
#[derive(Debug, Clone)]
pub struct MinedBucket {
    pub momentum: MomentumTier,
    pub volatility: VolatilityTier,
    pub volume: VolumeTier,
    pub wins: u32,
    pub total: u32,
    pub win_rate: f64,
    pub p_value: f64,
}

impl MinedBucket {
    /// The predicate tree this bucket promotes to
    pub fn condition(&self) -> PatternCondition {
        PatternCondition::All {
            items: vec![
                PatternCondition::MomentumIs {
                    tier: self.momentum,
                },
                PatternCondition::VolatilityIs {
                    tier: self.volatility,
                },
                PatternCondition::VolumeIs { tier: self.volume },
            ],
        }
    }

    pub fn is_significant(&self, config: &MinerConfig) -> bool {
        self.total >= config.min_sample_size
            && self.win_rate > config.baseline
            && self.p_value < config.p_value
    }
}

/// Result of one mining stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningReport {
    pub cycle: i64,
    pub window_len: usize,
    pub buckets_scanned: usize,
    pub promoted: usize,
    pub refreshed: usize,
}

/// One-sided binomial test: probability of seeing at least `wins` successes
/// in `total` trials if the true win rate were `baseline`.
pub fn binomial_p_value(wins: u64, total: u64, baseline: f64) -> f64 {
    if total == 0 || wins == 0 {
        return 1.0;
    }
    match Binomial::new(baseline, total) {
        // sf(k) = P(X > k), so P(X >= wins) = sf(wins - 1)
        Ok(dist) => dist.sf(wins - 1),
        Err(_) => 1.0,
    }
}

/// Bucket a trial window by feature tiers and score each bucket
pub fn mine_window(trials: &[Trial], config: &MinerConfig) -> Vec<MinedBucket> {
    let mut buckets: HashMap<(MomentumTier, VolatilityTier, VolumeTier), (u32, u32)> =
        HashMap::new();

    for trial in trials {
        let key = (
            MomentumTier::bucket(trial.features.momentum),
            VolatilityTier::bucket(trial.features.volatility),
            VolumeTier::bucket(trial.features.volume),
        );
        let entry = buckets.entry(key).or_insert((0, 0));
        entry.1 += 1;
        if trial.is_win {
            entry.0 += 1;
        }
    }

    let mut mined: Vec<MinedBucket> = buckets
        .into_iter()
        .map(|((momentum, volatility, volume), (wins, total))| MinedBucket {
            momentum,
            volatility,
            volume,
            wins,
            total,
            win_rate: wins as f64 / total as f64,
            p_value: binomial_p_value(wins as u64, total as u64, config.baseline),
        })
        .collect();

    // Deterministic output order: biggest buckets first, then by tier names
    mined.sort_by(|a, b| {
        b.total.cmp(&a.total).then_with(|| {
            (a.momentum.as_str(), a.volatility.as_str(), a.volume.as_str()).cmp(&(
                b.momentum.as_str(),
                b.volatility.as_str(),
                b.volume.as_str(),
            ))
        })
    });
    mined
}

/// Run the mining stage: scan the recent window and upsert significant
/// buckets into the registry.
pub async fn run_mining(
    pool: &SqlitePool,
    config: &MinerConfig,
    cycle: i64,
) -> Result<MiningReport, CycleError> {
    let trial_repo = TrialRepository::new(pool);
    let pattern_repo = PatternRepository::new(pool);

    let window = trial_repo.recent_window(config.window as i64).await?;
    let trials: Vec<Trial> = window.iter().map(Trial::from_record).collect();
    let buckets = mine_window(&trials, config);
    let buckets_scanned = buckets.len();

    let mut promoted = 0usize;
    let mut refreshed = 0usize;

    for bucket in buckets.iter().filter(|b| b.is_significant(config)) {
        let condition = bucket.condition();
        let record = persistence::repository::PatternRecord {
            id: None,
            signature: condition.signature(),
            name: condition.describe(),
            condition_json: serde_json::to_string(&condition).unwrap_or_default(),
            win_rate: bucket.win_rate,
            sample_size: bucket.total as i64,
            confidence: 1.0 - bucket.p_value,
            rationale: format!(
                "{} of {} recent trials profitable ({:.0}% win rate, p={:.4})",
                bucket.wins,
                bucket.total,
                bucket.win_rate * 100.0,
                bucket.p_value
            ),
            upvotes: 0,
            downvotes: 0,
            origin: PatternOrigin::ChaosMiner.as_str().to_string(),
            runs: 0,
            last_tested: None,
            h2h_wins: 0,
            h2h_losses: 0,
            timeframes: "[]".to_string(),
            mined_passes: 1,
            created_at: None,
            timeframe_perf: "{}".to_string(),
        };

        match pattern_repo.upsert_mined(&record).await? {
            UpsertOutcome::Promoted => promoted += 1,
            UpsertOutcome::Refreshed => refreshed += 1,
        }
    }

    info!(
        cycle,
        window_len = trials.len(),
        buckets_scanned,
        promoted,
        refreshed,
        "Mining pass complete"
    );

    Ok(MiningReport {
        cycle,
        window_len: trials.len(),
        buckets_scanned,
        promoted,
        refreshed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SnapshotFeatures;
    use persistence::Database;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trial(momentum: Decimal, volatility: Decimal, volume: Decimal, is_win: bool) -> Trial {
        Trial {
            id: None,
            cycle: 1,
            entry_time: 1_700_000_000,
            exit_time: 1_700_000_900,
            entry_price: dec!(100),
            exit_price: if is_win { dec!(101) } else { dec!(99) },
            pnl: if is_win { dec!(1) } else { dec!(-1) },
            is_win,
            justification: "test".to_string(),
            features: SnapshotFeatures {
                price: dec!(100),
                momentum,
                moving_avg: dec!(99),
                volume,
                volatility,
            },
        }
    }

    /// 25 trials in a rising/high/heavy bucket at a 60% win rate, plus 25
    /// trials in a falling/low/thin bucket at 40%.
    fn scenario_window() -> Vec<Trial> {
        let mut trials = Vec::new();
        for i in 0..25 {
            trials.push(trial(dec!(0.8), dec!(2.0), dec!(2.0), i < 15));
        }
        for i in 0..25 {
            trials.push(trial(dec!(-0.8), dec!(0.1), dec!(0.2), i < 10));
        }
        trials
    }

    #[test]
    fn test_binomial_p_value_known_points() {
        // P(X >= 15 | n=25, p=0.5) ≈ 0.212
        let p15 = binomial_p_value(15, 25, 0.5);
        assert!((p15 - 0.212).abs() < 0.01, "p15 = {p15}");

        // P(X >= 18 | n=25, p=0.5) ≈ 0.022
        let p18 = binomial_p_value(18, 25, 0.5);
        assert!((p18 - 0.022).abs() < 0.005, "p18 = {p18}");

        // Degenerate inputs
        assert_eq!(binomial_p_value(0, 25, 0.5), 1.0);
        assert_eq!(binomial_p_value(0, 0, 0.5), 1.0);
    }

    #[test]
    fn test_mine_window_buckets_and_rates() {
        let config = MinerConfig::default();
        let buckets = mine_window(&scenario_window(), &config);

        assert_eq!(buckets.len(), 2);
        let winner = buckets
            .iter()
            .find(|b| b.momentum == MomentumTier::Rising)
            .unwrap();
        assert_eq!(winner.total, 25);
        assert_eq!(winner.wins, 15);
        assert!((winner.win_rate - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_sixty_percent_of_25_fails_default_significance() {
        // 15/25 is not significant at p < 0.05; the default config must not
        // promote it.
        let config = MinerConfig::default();
        let buckets = mine_window(&scenario_window(), &config);
        assert!(buckets.iter().all(|b| !b.is_significant(&config)));
    }

    async fn seed_scenario(db: &Database) {
        let repo = TrialRepository::new(db.pool());
        let records: Vec<_> = scenario_window().iter().map(Trial::to_record).collect();
        repo.append_batch(&records).await.unwrap();
    }

    #[tokio::test]
    async fn test_scenario_promotes_exactly_one_pattern() {
        let db = Database::in_memory().await.unwrap();
        seed_scenario(&db).await;

        // The p-value bound is configuration; loosened here so the 60%/25
        // bucket clears the test while the 40% bucket still fails the
        // baseline check.
        let config = MinerConfig {
            min_sample_size: 20,
            p_value: 0.25,
            ..Default::default()
        };

        let report = run_mining(db.pool(), &config, 5).await.unwrap();
        assert_eq!(report.window_len, 50);
        assert_eq!(report.promoted, 1);
        assert_eq!(report.refreshed, 0);

        let patterns = PatternRepository::new(db.pool());
        let stats = patterns.get_stats().await.unwrap();
        assert_eq!(stats.total_patterns, 1);

        let (rows, _) = patterns
            .get_all_paginated(10, 0, None, None, None)
            .await
            .unwrap();
        assert!((rows[0].win_rate - 0.60).abs() < 1e-9);
        assert_eq!(rows[0].sample_size, 25);
        assert_eq!(rows[0].origin, "chaos_miner");
        assert!(rows[0].sample_size >= config.min_sample_size as i64);
    }

    #[tokio::test]
    async fn test_remining_unchanged_window_creates_no_duplicates() {
        let db = Database::in_memory().await.unwrap();
        seed_scenario(&db).await;

        let config = MinerConfig {
            min_sample_size: 20,
            p_value: 0.25,
            ..Default::default()
        };

        let first = run_mining(db.pool(), &config, 5).await.unwrap();
        assert_eq!(first.promoted, 1);

        let second = run_mining(db.pool(), &config, 6).await.unwrap();
        assert_eq!(second.promoted, 0);
        assert_eq!(second.refreshed, 1);

        let patterns = PatternRepository::new(db.pool());
        let stats = patterns.get_stats().await.unwrap();
        assert_eq!(stats.total_patterns, 1);

        // Running mean of two identical passes leaves the win rate unchanged
        let (rows, _) = patterns
            .get_all_paginated(10, 0, None, None, None)
            .await
            .unwrap();
        assert!((rows[0].win_rate - 0.60).abs() < 1e-9);
        assert_eq!(rows[0].sample_size, 25);
    }
}
