//! Cycle orchestrator — the state machine an external periodic trigger drives
//!
//! Idle → GeneratingTrades → [every Kth cycle] MiningPatterns → [every Mth
//! cycle] RunningTournaments → Idle. One invocation advances exactly one
//! cycle. Nothing survives in process between invocations: the cycle counter
//! and stage watermarks live in the versioned cycle_state row, and the claim
//! is a compare-and-swap, so overlapping invocations never double-process a
//! window.

use persistence::repository::CycleRepository;
use persistence::{DbError, SqlitePool};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info};

use crate::api::{HistoryProvider, SnapshotProvider};
use crate::generator::{run_generation, GeneratorConfig};
use crate::miner::{run_mining, MinerConfig};
use crate::tournament::{run_tournaments, TournamentConfig};

/// Stages of the cycle state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleStage {
    Idle,
    GeneratingTrades,
    MiningPatterns,
    RunningTournaments,
}

impl CycleStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::GeneratingTrades => "generating_trades",
            Self::MiningPatterns => "mining_patterns",
            Self::RunningTournaments => "running_tournaments",
        }
    }
}

/// Failure taxonomy for a cycle invocation
#[derive(Error, Debug)]
pub enum CycleError {
    /// A batch write failed; the stage aborted with no partial write
    #[error("persistence failure: {0}")]
    Persistence(#[from] DbError),

    /// The snapshot provider could not supply a complete snapshot
    #[error("snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// An upstream collaborator failed outside its defined error contract
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// A concurrent invocation claimed this cycle first
    #[error("cycle overlap: another invocation holds cycle {0}")]
    Overlap(i64),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Persistence(_) => "persistence_failure",
            Self::SnapshotUnavailable(_) => "snapshot_unavailable",
            Self::Upstream(_) => "upstream_failure",
            Self::Overlap(_) => "overlap",
        }
    }

    /// Whether the caller should retry the invocation.
    /// Overlap means the work is already being done elsewhere.
    pub fn retry_recommended(&self) -> bool {
        !matches!(self, Self::Overlap(_))
    }
}

/// Orchestrator configuration, with env-var overrides for deployment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    pub symbol: String,
    /// Mine every Kth cycle
    pub mine_every: i64,
    /// Run tournaments every Mth cycle
    pub tournament_every: i64,
    pub generator: GeneratorConfig,
    pub miner: MinerConfig,
    pub tournament: TournamentConfig,
    /// Fixed RNG seed for deterministic runs; None draws from entropy
    pub seed: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            mine_every: 5,
            tournament_every: 10,
            generator: GeneratorConfig::default(),
            miner: MinerConfig::default(),
            tournament: TournamentConfig::default(),
            seed: None,
        }
    }
}

impl OrchestratorConfig {
    /// Build a config from `CHAOS_*` environment variables, falling back to
    /// the documented defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(symbol) = std::env::var("CHAOS_SYMBOL") {
            config.symbol = symbol.clone();
            config.tournament.symbol = symbol;
        }
        config.mine_every = env_parse("CHAOS_MINE_EVERY", config.mine_every);
        config.tournament_every = env_parse("CHAOS_TOURNAMENT_EVERY", config.tournament_every);
        config.generator.budget = env_parse("CHAOS_TRIAL_BUDGET", config.generator.budget);
        config.miner.min_sample_size = env_parse("CHAOS_MIN_SAMPLE", config.miner.min_sample_size);
        config.miner.p_value = env_parse("CHAOS_P_VALUE", config.miner.p_value);
        config.miner.window = env_parse("CHAOS_MINE_WINDOW", config.miner.window);
        config.tournament.pairs_per_cycle =
            env_parse("CHAOS_PAIRS_PER_CYCLE", config.tournament.pairs_per_cycle);
        config.seed = std::env::var("CHAOS_SEED")
            .ok()
            .and_then(|s| s.parse().ok());

        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Counts and outcomes of one cycle invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    pub cycle: i64,
    pub stage: CycleStage,
    pub trials_generated: usize,
    pub patterns_promoted: usize,
    pub patterns_refreshed: usize,
    pub tournaments_run: usize,
    pub pairings_skipped: usize,
    pub mined: bool,
    pub tournaments_claimed: bool,
}

impl CycleReport {
    fn new(cycle: i64) -> Self {
        Self {
            cycle,
            stage: CycleStage::Idle,
            trials_generated: 0,
            patterns_promoted: 0,
            patterns_refreshed: 0,
            tournaments_run: 0,
            pairings_skipped: 0,
            mined: false,
            tournaments_claimed: false,
        }
    }
}

/// Advance the state machine by exactly one cycle.
pub async fn advance_cycle(
    pool: &SqlitePool,
    snapshots: &dyn SnapshotProvider,
    history: &dyn HistoryProvider,
    config: &OrchestratorConfig,
) -> Result<CycleReport, CycleError> {
    let cycle_repo = CycleRepository::new(pool);

    let cycle = match cycle_repo.claim_next_cycle().await? {
        Some(cycle) => cycle,
        None => {
            let state = cycle_repo.load().await?;
            return Err(CycleError::Overlap(state.cycle));
        }
    };

    let mut rng: StdRng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed ^ cycle as u64),
        None => StdRng::from_entropy(),
    };

    let mut report = CycleReport::new(cycle);

    // Stage 1: trial generation
    report.stage = CycleStage::GeneratingTrades;
    info!(cycle, stage = "generating_trades", "Cycle stage start");
    match run_generation(
        pool,
        snapshots,
        &config.symbol,
        &config.generator,
        cycle,
        &mut rng,
    )
    .await
    {
        Ok(generation) => report.trials_generated = generation.generated,
        Err(e) => {
            error!(cycle, stage = "generating_trades", error = %e, "Cycle stage failed");
            return Err(e);
        }
    }

    // Stage 2: mining, every Kth cycle. The upsert is idempotent, so the
    // stage runs before its watermark moves and a crash mid-mine retries
    // safely.
    if config.mine_every > 0 && cycle % config.mine_every == 0 {
        report.stage = CycleStage::MiningPatterns;
        info!(cycle, stage = "mining_patterns", "Cycle stage start");
        match run_mining(pool, &config.miner, cycle).await {
            Ok(mining) => {
                report.patterns_promoted = mining.promoted;
                report.patterns_refreshed = mining.refreshed;
                report.mined = true;
            }
            Err(e) => {
                error!(cycle, stage = "mining_patterns", error = %e, "Cycle stage failed");
                return Err(e);
            }
        }
        cycle_repo.mark_mined(cycle).await?;
    }

    // Stage 3: tournaments, every Mth cycle. Matchups are append-only, so the
    // stage is claimed before it runs: a replayed window would otherwise
    // duplicate matchup rows.
    if config.tournament_every > 0 && cycle % config.tournament_every == 0 {
        if cycle_repo.claim_tournament(cycle).await? {
            report.stage = CycleStage::RunningTournaments;
            report.tournaments_claimed = true;
            info!(cycle, stage = "running_tournaments", "Cycle stage start");
            match run_tournaments(pool, history, &config.tournament, cycle, &mut rng).await {
                Ok(tournaments) => {
                    report.tournaments_run = tournaments.run;
                    report.pairings_skipped = tournaments.skipped;
                }
                Err(e) => {
                    error!(cycle, stage = "running_tournaments", error = %e, "Cycle stage failed");
                    return Err(e);
                }
            }
        } else {
            info!(cycle, "Tournament window already claimed, skipping");
        }
    }

    report.stage = CycleStage::Idle;
    info!(
        cycle,
        trials = report.trials_generated,
        promoted = report.patterns_promoted,
        refreshed = report.patterns_refreshed,
        tournaments = report.tournaments_run,
        "Cycle complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ProviderError;
    use crate::types::{f64_to_dec, Candle, MarketSnapshot, SnapshotFeatures, Timeframe};
    use async_trait::async_trait;
    use persistence::repository::{PatternRepository, TrialRepository};
    use persistence::Database;
    use rust_decimal_macros::dec;

    struct FixtureSnapshots;

    #[async_trait]
    impl SnapshotProvider for FixtureSnapshots {
        async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError> {
            Ok(MarketSnapshot {
                symbol: symbol.to_string(),
                captured_at: 1_700_000_000,
                features: SnapshotFeatures {
                    price: dec!(50000),
                    momentum: dec!(0.8),
                    moving_avg: dec!(49500),
                    volume: dec!(2.0),
                    volatility: dec!(1.8),
                },
            })
        }
    }

    struct FixtureHistory;

    #[async_trait]
    impl HistoryProvider for FixtureHistory {
        async fn candles(
            &self,
            _symbol: &str,
            _timeframe: Timeframe,
            _start_time: i64,
            _end_time: i64,
        ) -> Result<Vec<Candle>, ProviderError> {
            let slice = (0..120)
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
                .collect();
            Ok(slice)
        }
    }

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            mine_every: 1,
            tournament_every: 1,
            generator: GeneratorConfig {
                budget: 30,
                ..Default::default()
            },
            miner: MinerConfig {
                min_sample_size: 5,
                p_value: 0.99,
                baseline: 0.05,
                ..Default::default()
            },
            seed: Some(42),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cycle_advances_counter_and_generates() {
        let db = Database::in_memory().await.unwrap();
        let config = test_config();

        let report = advance_cycle(db.pool(), &FixtureSnapshots, &FixtureHistory, &config)
            .await
            .unwrap();

        assert_eq!(report.cycle, 1);
        assert_eq!(report.stage, CycleStage::Idle);
        assert_eq!(report.trials_generated, 30);
        assert!(report.mined);
        assert!(report.tournaments_claimed);

        let trials = TrialRepository::new(db.pool());
        assert_eq!(trials.count_for_cycle(1).await.unwrap(), 30);

        let second = advance_cycle(db.pool(), &FixtureSnapshots, &FixtureHistory, &config)
            .await
            .unwrap();
        assert_eq!(second.cycle, 2);
    }

    #[tokio::test]
    async fn test_mining_gated_to_every_kth_cycle() {
        let db = Database::in_memory().await.unwrap();
        let config = OrchestratorConfig {
            mine_every: 5,
            tournament_every: 10,
            seed: Some(42),
            ..test_config()
        };

        let report = advance_cycle(db.pool(), &FixtureSnapshots, &FixtureHistory, &config)
            .await
            .unwrap();
        assert_eq!(report.cycle, 1);
        assert!(!report.mined);
        assert!(!report.tournaments_claimed);
        assert_eq!(report.patterns_promoted, 0);

        let patterns = PatternRepository::new(db.pool());
        assert_eq!(patterns.get_stats().await.unwrap().total_patterns, 0);
    }

    #[tokio::test]
    async fn test_zero_budget_cycle_is_a_successful_noop() {
        let db = Database::in_memory().await.unwrap();
        let mut config = test_config();
        config.generator.budget = 0;
        config.mine_every = 5;
        config.tournament_every = 10;

        let report = advance_cycle(db.pool(), &FixtureSnapshots, &FixtureHistory, &config)
            .await
            .unwrap();
        assert_eq!(report.trials_generated, 0);

        let trials = TrialRepository::new(db.pool());
        assert_eq!(trials.count_all().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_all_stages_flow_into_registry() {
        let db = Database::in_memory().await.unwrap();
        let config = test_config();

        // All trials share one snapshot, so they land in one bucket; the
        // permissive miner config promotes it on the first mining pass.
        let first = advance_cycle(db.pool(), &FixtureSnapshots, &FixtureHistory, &config)
            .await
            .unwrap();
        assert!(first.patterns_promoted <= 1);

        // A few more cycles accumulate runs once two patterns exist
        for _ in 0..3 {
            advance_cycle(db.pool(), &FixtureSnapshots, &FixtureHistory, &config)
                .await
                .unwrap();
        }

        let patterns = PatternRepository::new(db.pool());
        let stats = patterns.get_stats().await.unwrap();
        // The single shared bucket can only ever produce one pattern row
        assert!(stats.total_patterns <= 1);
    }

    #[test]
    fn test_error_taxonomy_kinds() {
        let overlap = CycleError::Overlap(7);
        assert_eq!(overlap.kind(), "overlap");
        assert!(!overlap.retry_recommended());

        let snapshot = CycleError::SnapshotUnavailable("feed down".to_string());
        assert_eq!(snapshot.kind(), "snapshot_unavailable");
        assert!(snapshot.retry_recommended());

        let persistence =
            CycleError::Persistence(DbError::Query("disk full".to_string()));
        assert_eq!(persistence.kind(), "persistence_failure");
        assert!(persistence.retry_recommended());
    }
}
