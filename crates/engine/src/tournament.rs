//! Tournament engine — paired backtests over identical historical slices
//!
//! Each matchup simulates both patterns' trading rules independently over the
//! same candle slice, applies the timeframe bonus, and declares a winner:
//! higher bonus-adjusted return, then lower return volatility, then lower
//! pattern id. Results (matchup row + both patterns' counters) are applied as
//! one all-or-nothing transaction. A slice shorter than the minimum window
//! skips the pairing and the next sampled pair takes the slot.

use std::collections::VecDeque;

use chrono::Utc;
use persistence::repository::{MatchupRecord, MatchupRepository, PatternResultUpdate};
use persistence::SqlitePool;
use rand::Rng;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::api::{HistoryProvider, ProviderError};
use crate::condition::PatternCondition;
use crate::features::{FeatureEngine, FEATURE_PERIOD};
use crate::orchestrator::CycleError;
use crate::sampler::sample_from_registry;
use crate::types::{dec_to_f64, f64_to_dec, Candle, Pattern, Timeframe};

/// Tournament engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentConfig {
    pub symbol: String,
    /// Matchups to run per tournament stage
    pub pairs_per_cycle: u32,
    /// Candles requested per slice
    pub slice_bars: u32,
    /// Minimum usable slice length; shorter slices skip the pairing
    pub min_slice_len: u32,
    /// Bars a simulated position is held before exiting
    pub hold_bars: u32,
}

impl Default for TournamentConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            pairs_per_cycle: 3,
            slice_bars: 240,
            min_slice_len: 60,
            hold_bars: 8,
        }
    }
}

/// Outcome of simulating one pattern over a slice
#[derive(Debug, Clone)]
pub struct SimOutcome {
    /// Sum of per-trade returns, in percent
    pub roi: Decimal,
    /// Standard deviation of per-trade returns
    pub volatility: f64,
    pub trades: u32,
}

/// Result of one tournament stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TournamentReport {
    pub cycle: i64,
    pub run: usize,
    pub skipped: usize,
}

/// Simulate a pattern's trading rule over a candle slice.
///
/// Entry when the derived features match the condition and no position is
/// open; exit after `hold_bars` bars. Any position left open at the end of
/// the slice is closed at the final bar.
pub fn simulate_pattern(
    condition: &PatternCondition,
    candles: &[Candle],
    hold_bars: u32,
) -> SimOutcome {
    let mut engine = FeatureEngine::new(FEATURE_PERIOD);
    let mut position: Option<f64> = None;
    let mut bars_held = 0u32;
    let mut returns: Vec<f64> = Vec::new();

    for candle in candles {
        let close = dec_to_f64(candle.close);
        let features = match engine.update(candle) {
            Some(f) => f,
            None => continue,
        };

        match position {
            None => {
                if condition.matches(&features) {
                    position = Some(close);
                    bars_held = 0;
                }
            }
            Some(entry) => {
                bars_held += 1;
                if bars_held >= hold_bars && entry > 0.0 {
                    returns.push((close - entry) / entry * 100.0);
                    position = None;
                }
            }
        }
    }

    // Close any remaining position at the last bar
    if let (Some(entry), Some(last)) = (position, candles.last()) {
        if entry > 0.0 {
            let close = dec_to_f64(last.close);
            returns.push((close - entry) / entry * 100.0);
        }
    }

    let roi: f64 = returns.iter().sum();
    let volatility = if returns.len() < 2 {
        0.0
    } else {
        let n = returns.len() as f64;
        let mean = roi / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    };

    SimOutcome {
        roi: f64_to_dec(roi),
        volatility,
        trades: returns.len() as u32,
    }
}

/// Pick the winner of a matchup.
///
/// Higher bonus-adjusted return wins; an exact tie goes to the lower return
/// volatility; a full tie goes to the lower pattern id.
pub fn decide_winner(
    a: &Pattern,
    sim_a: &SimOutcome,
    b: &Pattern,
    sim_b: &SimOutcome,
    bonus: Decimal,
) -> i64 {
    let adj_a = sim_a.roi * bonus;
    let adj_b = sim_b.roi * bonus;

    if adj_a != adj_b {
        return if adj_a > adj_b { a.id } else { b.id };
    }
    if sim_a.volatility != sim_b.volatility {
        return if sim_a.volatility < sim_b.volatility {
            a.id
        } else {
            b.id
        };
    }
    a.id.min(b.id)
}

/// Run the tournament stage: sample patterns, pair them, backtest each pair
/// over an identical slice, and record outcomes atomically.
pub async fn run_tournaments(
    pool: &SqlitePool,
    history: &dyn HistoryProvider,
    config: &TournamentConfig,
    cycle: i64,
    rng: &mut impl Rng,
) -> Result<TournamentReport, CycleError> {
    // Sample extra patterns beyond the pair budget so skipped pairings can be
    // substituted from the same draw
    let pool_size = (config.pairs_per_cycle as usize) * 2 + 4;
    let sampled = sample_from_registry(pool, pool_size, &mut *rng).await?;

    if sampled.len() < 2 {
        info!(cycle, patterns = sampled.len(), "Not enough patterns for a tournament");
        return Ok(TournamentReport {
            cycle,
            run: 0,
            skipped: 0,
        });
    }

    let matchup_repo = MatchupRepository::new(pool);
    let mut queue: VecDeque<Pattern> = sampled.into();
    let mut run = 0usize;
    let mut skipped = 0usize;

    while run < config.pairs_per_cycle as usize && queue.len() >= 2 {
        let a = queue.pop_front().expect("queue has at least two entries");
        let b = queue.pop_front().expect("queue has at least two entries");

        let timeframes = Timeframe::all();
        let timeframe = timeframes[rng.gen_range(0..timeframes.len())];

        let end_ms = Utc::now().timestamp_millis();
        let start_ms = end_ms - (config.slice_bars as i64) * timeframe.seconds() * 1000;

        let candles = match history
            .candles(&config.symbol, timeframe, start_ms, end_ms)
            .await
        {
            Ok(candles) if candles.len() >= config.min_slice_len as usize => candles,
            Ok(candles) => {
                warn!(
                    cycle,
                    timeframe = timeframe.as_str(),
                    have = candles.len(),
                    need = config.min_slice_len,
                    "Slice too short, substituting next pair"
                );
                skipped += 1;
                continue;
            }
            Err(ProviderError::InsufficientData { have, need }) => {
                warn!(
                    cycle,
                    timeframe = timeframe.as_str(),
                    have,
                    need,
                    "Insufficient data, substituting next pair"
                );
                skipped += 1;
                continue;
            }
            Err(e) => return Err(CycleError::Upstream(e.to_string())),
        };

        let sim_a = simulate_pattern(&a.condition, &candles, config.hold_bars);
        let sim_b = simulate_pattern(&b.condition, &candles, config.hold_bars);

        let bonus = timeframe.bonus();
        let winner = decide_winner(&a, &sim_a, &b, &sim_b, bonus);
        let tested_at = Utc::now().timestamp();

        let matchup = MatchupRecord {
            id: None,
            pattern_a: a.id,
            pattern_b: b.id,
            timeframe: timeframe.as_str().to_string(),
            roi_a: sim_a.roi.to_string(),
            roi_b: sim_b.roi.to_string(),
            bonus: dec_to_f64(bonus),
            winner,
            slice_start: start_ms,
            slice_end: end_ms,
            created_at: None,
        };

        let update_a = PatternResultUpdate {
            pattern_id: a.id,
            won: winner == a.id,
            timeframe: timeframe.as_str().to_string(),
            roi: dec_to_f64(sim_a.roi),
            tested_at,
        };
        let update_b = PatternResultUpdate {
            pattern_id: b.id,
            won: winner == b.id,
            timeframe: timeframe.as_str().to_string(),
            roi: dec_to_f64(sim_b.roi),
            tested_at,
        };

        matchup_repo
            .record_result(&matchup, [&update_a, &update_b])
            .await?;

        info!(
            cycle,
            pattern_a = a.id,
            pattern_b = b.id,
            winner,
            timeframe = timeframe.as_str(),
            roi_a = %sim_a.roi,
            roi_b = %sim_b.roi,
            "Matchup recorded"
        );
        run += 1;
    }

    Ok(TournamentReport {
        cycle,
        run,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MomentumTier, PatternOrigin};
    use async_trait::async_trait;
    use persistence::repository::{PatternRecord, PatternRepository};
    use persistence::Database;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rust_decimal_macros::dec;
    use std::collections::BTreeMap;

    fn rising_slice(len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                let price = f64_to_dec(100.0 + i as f64 * 0.5);
                Candle {
                    open_time: (i as i64) * 900_000,
                    open: price,
                    high: price + dec!(1),
                    low: price - dec!(1),
                    close: price,
                    volume: dec!(100),
                    close_time: ((i + 1) as i64) * 900_000 - 1,
                }
            })
            .collect()
    }

    fn pattern(id: i64, tier: MomentumTier) -> Pattern {
        Pattern {
            id,
            signature: format!("sig-{id}"),
            name: format!("momentum {}", tier.as_str()),
            condition: PatternCondition::MomentumIs { tier },
            win_rate: 0.6,
            sample_size: 30,
            confidence: 0.95,
            rationale: String::new(),
            upvotes: 0,
            downvotes: 0,
            origin: PatternOrigin::ChaosMiner,
            runs: 0,
            last_tested: None,
            h2h_wins: 0,
            h2h_losses: 0,
            timeframes: Vec::new(),
            timeframe_perf: BTreeMap::new(),
        }
    }

    fn outcome(roi: f64, volatility: f64) -> SimOutcome {
        SimOutcome {
            roi: f64_to_dec(roi),
            volatility,
            trades: 3,
        }
    }

    #[test]
    fn test_simulation_trades_when_condition_matches() {
        let candles = rising_slice(120);
        let rising = simulate_pattern(
            &PatternCondition::MomentumIs {
                tier: MomentumTier::Rising,
            },
            &candles,
            8,
        );
        let falling = simulate_pattern(
            &PatternCondition::MomentumIs {
                tier: MomentumTier::Falling,
            },
            &candles,
            8,
        );

        assert!(rising.trades > 0);
        assert!(rising.roi > Decimal::ZERO);
        assert_eq!(falling.trades, 0);
        assert_eq!(falling.roi, Decimal::ZERO);
    }

    #[test]
    fn test_higher_adjusted_return_wins() {
        let a = pattern(1, MomentumTier::Rising);
        let b = pattern(2, MomentumTier::Falling);

        let winner = decide_winner(&a, &outcome(12.0, 2.0), &b, &outcome(10.0, 0.5), dec!(1.10));
        assert_eq!(winner, 1);
    }

    #[test]
    fn test_tie_goes_to_lower_volatility() {
        let a = pattern(1, MomentumTier::Rising);
        let b = pattern(2, MomentumTier::Falling);

        let winner = decide_winner(&a, &outcome(10.0, 2.0), &b, &outcome(10.0, 0.5), dec!(1.20));
        assert_eq!(winner, 2);
    }

    #[test]
    fn test_full_tie_goes_to_lower_id() {
        let a = pattern(4, MomentumTier::Rising);
        let b = pattern(2, MomentumTier::Falling);

        let winner = decide_winner(&a, &outcome(10.0, 1.0), &b, &outcome(10.0, 1.0), dec!(1.00));
        assert_eq!(winner, 2);
    }

    struct FixtureHistory {
        slice: Vec<Candle>,
    }

    #[async_trait]
    impl HistoryProvider for FixtureHistory {
        async fn candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _start_time: i64,
            _end_time: i64,
        ) -> Result<Vec<Candle>, ProviderError> {
            if self.slice.is_empty() {
                return Err(ProviderError::InsufficientData { have: 0, need: 1 });
            }
            Ok(self.slice.clone())
        }
    }

    fn mined(signature: &str, condition: &PatternCondition) -> PatternRecord {
        PatternRecord {
            id: None,
            signature: signature.to_string(),
            name: condition.describe(),
            condition_json: serde_json::to_string(condition).unwrap(),
            win_rate: 0.6,
            sample_size: 30,
            confidence: 0.95,
            rationale: String::new(),
            upvotes: 0,
            downvotes: 0,
            origin: "chaos_miner".to_string(),
            runs: 0,
            last_tested: None,
            h2h_wins: 0,
            h2h_losses: 0,
            timeframes: "[]".to_string(),
            mined_passes: 1,
            created_at: None,
            timeframe_perf: "{}".to_string(),
        }
    }

    async fn seed_patterns(db: &Database) -> (i64, i64) {
        let repo = PatternRepository::new(db.pool());
        let rising = PatternCondition::MomentumIs {
            tier: MomentumTier::Rising,
        };
        let falling = PatternCondition::MomentumIs {
            tier: MomentumTier::Falling,
        };
        repo.upsert_mined(&mined("sig-rising", &rising)).await.unwrap();
        repo.upsert_mined(&mined("sig-falling", &falling)).await.unwrap();
        let rising_id = repo.get_by_signature("sig-rising").await.unwrap().unwrap().id.unwrap();
        let falling_id = repo
            .get_by_signature("sig-falling")
            .await
            .unwrap()
            .unwrap()
            .id
            .unwrap();
        (rising_id, falling_id)
    }

    #[tokio::test]
    async fn test_tournament_records_result_and_counters() {
        let db = Database::in_memory().await.unwrap();
        let (rising_id, falling_id) = seed_patterns(&db).await;

        let history = FixtureHistory {
            slice: rising_slice(120),
        };
        let config = TournamentConfig {
            pairs_per_cycle: 1,
            min_slice_len: 60,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);

        let report = run_tournaments(db.pool(), &history, &config, 10, &mut rng)
            .await
            .unwrap();
        assert_eq!(report.run, 1);
        assert_eq!(report.skipped, 0);

        // On a rising slice, the rising-momentum pattern trades profitably
        // and the falling-momentum pattern sits out at zero ROI
        let patterns = PatternRepository::new(db.pool());
        let winner = patterns.get_by_id(rising_id).await.unwrap().unwrap();
        let loser = patterns.get_by_id(falling_id).await.unwrap().unwrap();

        assert_eq!(winner.runs, 1);
        assert_eq!(winner.h2h_wins, 1);
        assert_eq!(winner.h2h_losses, 0);
        assert!(winner.last_tested.is_some());
        assert_eq!(loser.runs, 1);
        assert_eq!(loser.h2h_wins, 0);
        assert_eq!(loser.h2h_losses, 1);

        let matchups = MatchupRepository::new(db.pool());
        let recent = matchups.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].winner, rising_id);
    }

    #[tokio::test]
    async fn test_insufficient_data_skips_without_recording() {
        let db = Database::in_memory().await.unwrap();
        seed_patterns(&db).await;

        let history = FixtureHistory { slice: Vec::new() };
        let config = TournamentConfig {
            pairs_per_cycle: 1,
            ..Default::default()
        };
        let mut rng = StdRng::seed_from_u64(11);

        let report = run_tournaments(db.pool(), &history, &config, 10, &mut rng)
            .await
            .unwrap();
        assert_eq!(report.run, 0);
        assert!(report.skipped >= 1);

        let matchups = MatchupRepository::new(db.pool());
        assert_eq!(matchups.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_empty_registry_is_a_noop() {
        let db = Database::in_memory().await.unwrap();
        let history = FixtureHistory {
            slice: rising_slice(120),
        };
        let config = TournamentConfig::default();
        let mut rng = StdRng::seed_from_u64(11);

        let report = run_tournaments(db.pool(), &history, &config, 10, &mut rng)
            .await
            .unwrap();
        assert_eq!(report.run, 0);
        assert_eq!(report.skipped, 0);
    }
}
