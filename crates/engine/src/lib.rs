//! Chaos Lab Engine — strategy discovery from randomized trade trials
//!
//! Provides:
//! - Trial generator: randomized chaos trades against live market snapshots
//! - Pattern miner: binomial-test promotion of significant trial buckets
//! - Weighted sampler: exploration/exploitation pattern selection
//! - Tournament engine: paired backtests with timeframe normalization
//! - Cycle orchestrator: the CAS-claimed state machine a periodic trigger drives
//! - Binance public API providers for snapshots and historical candles

pub mod api;
pub mod condition;
pub mod features;
pub mod generator;
pub mod miner;
pub mod orchestrator;
pub mod sampler;
pub mod tournament;
pub mod types;

// Re-exports for convenience
pub use api::{BinanceMarketData, HistoryProvider, ProviderError, SnapshotProvider};
pub use condition::{NumericFeature, PatternCondition};
pub use features::{derive_latest, FeatureEngine, FEATURE_PERIOD};
pub use generator::{generate_batch, run_generation, GenerationReport, GeneratorConfig};
pub use miner::{
    binomial_p_value, mine_window, run_mining, MinedBucket, MinerConfig, MiningReport,
};
pub use orchestrator::{
    advance_cycle, CycleError, CycleReport, CycleStage, OrchestratorConfig,
};
pub use sampler::{pattern_weight, sample_from_registry, sample_without_replacement};
pub use tournament::{
    decide_winner, run_tournaments, simulate_pattern, SimOutcome, TournamentConfig,
    TournamentReport,
};
pub use types::*;
