//! Trial generator — randomized chaos trades against a market snapshot
//!
//! Each cycle produces a batch of synthetic trades with independently
//! randomized entries, hold lengths, and volatility-scaled exits. The
//! justification strings carry no signal; they exist purely as a mining
//! feature. The whole batch lands in one atomic append or not at all.

use persistence::repository::TrialRepository;
use persistence::SqlitePool;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::{ProviderError, SnapshotProvider};
use crate::orchestrator::CycleError;
use crate::types::{f64_to_dec, MarketSnapshot, Trial};

/// Justification templates assigned at random to generated trials
pub const JUSTIFICATIONS: &[&str] = &[
    "momentum continuation into strength",
    "mean reversion toward the moving average",
    "volume spike suggests institutional interest",
    "volatility breakout from compression",
    "fading an overextended move",
    "riding the prevailing trend",
    "contrarian entry against the crowd",
    "thin volume drift, low conviction",
    "high volatility scalp opportunity",
    "price reclaimed its moving average",
    "exhaustion candle after a sharp run",
    "quiet tape, positioning ahead of expansion",
];

/// Trial generator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    /// Trials per cycle; zero is a guaranteed no-op
    pub budget: u32,
    /// Maximum synthetic holding horizon, in bars
    pub max_hold_bars: u32,
    /// Seconds per synthetic bar
    pub bar_seconds: i64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            budget: 50,
            max_hold_bars: 16,
            bar_seconds: 900,
        }
    }
}

/// Result of one generation stage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationReport {
    pub cycle: i64,
    pub generated: usize,
    /// True when the cycle already had trials (retried invocation)
    pub already_generated: bool,
}

/// Build a batch of randomized trials from a snapshot (pure, no I/O)
pub fn generate_batch(
    snapshot: &MarketSnapshot,
    cycle: i64,
    config: &GeneratorConfig,
    rng: &mut impl Rng,
) -> Vec<Trial> {
    let mut trials = Vec::with_capacity(config.budget as usize);

    let price = crate::types::dec_to_f64(snapshot.features.price);
    let volatility = crate::types::dec_to_f64(snapshot.features.volatility).max(0.05);

    for _ in 0..config.budget {
        let entry_jitter: f64 = rng.gen_range(-0.001..=0.001);
        let entry = price * (1.0 + entry_jitter);

        let hold_bars = rng.gen_range(1..=config.max_hold_bars.max(1));
        // Random walk scaled by snapshot volatility and holding time
        let move_pct = rng.gen_range(-2.5..=2.5) * volatility * (hold_bars as f64).sqrt();
        let exit = entry * (1.0 + move_pct / 100.0);

        let entry_price = f64_to_dec(entry);
        let exit_price = f64_to_dec(exit);
        let pnl = exit_price - entry_price;

        let justification = JUSTIFICATIONS[rng.gen_range(0..JUSTIFICATIONS.len())];

        trials.push(Trial {
            id: None,
            cycle,
            entry_time: snapshot.captured_at,
            exit_time: snapshot.captured_at + (hold_bars as i64) * config.bar_seconds,
            entry_price,
            exit_price,
            pnl,
            is_win: pnl > rust_decimal::Decimal::ZERO,
            justification: justification.to_string(),
            features: snapshot.features.clone(),
        });
    }

    trials
}

/// Run the generation stage for one cycle: fetch a snapshot, build the batch,
/// append it atomically.
pub async fn run_generation(
    pool: &SqlitePool,
    provider: &dyn SnapshotProvider,
    symbol: &str,
    config: &GeneratorConfig,
    cycle: i64,
    rng: &mut impl Rng,
) -> Result<GenerationReport, CycleError> {
    // Zero budget short-circuits before any I/O
    if config.budget == 0 {
        return Ok(GenerationReport {
            cycle,
            generated: 0,
            already_generated: false,
        });
    }

    let repo = TrialRepository::new(pool);

    // Idempotency: a retried invocation for an already-populated cycle
    // performs no duplicate work
    if repo.count_for_cycle(cycle).await? > 0 {
        info!(cycle, "Trials already recorded for cycle, skipping generation");
        return Ok(GenerationReport {
            cycle,
            generated: 0,
            already_generated: true,
        });
    }

    let snapshot = provider.snapshot(symbol).await.map_err(|e| match &e {
        ProviderError::SnapshotUnavailable { .. } => CycleError::SnapshotUnavailable(e.to_string()),
        _ => CycleError::Upstream(e.to_string()),
    })?;

    let batch = generate_batch(&snapshot, cycle, config, &mut *rng);
    let generated = repo.append_batch(&batch.iter().map(Trial::to_record).collect::<Vec<_>>())
        .await?;

    info!(cycle, generated, symbol, "Generated trial batch");
    Ok(GenerationReport {
        cycle,
        generated,
        already_generated: false,
    })
}
