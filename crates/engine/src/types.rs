//! Core types for the strategy-discovery engine

use persistence::repository::{PatternRecord, TimeframePerf, TrialRecord};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::condition::PatternCondition;

/// A single candlestick (OHLCV)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// Candle intervals tournaments run on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl Timeframe {
    pub fn all() -> &'static [Timeframe] {
        &[Self::M1, Self::M5, Self::M15, Self::H1, Self::H4, Self::D1]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::H1 => "1h",
            Self::H4 => "4h",
            Self::D1 => "1d",
        }
    }

    pub fn parse(s: &str) -> Option<Timeframe> {
        match s {
            "1m" => Some(Self::M1),
            "5m" => Some(Self::M5),
            "15m" => Some(Self::M15),
            "1h" => Some(Self::H1),
            "4h" => Some(Self::H4),
            "1d" => Some(Self::D1),
            _ => None,
        }
    }

    pub fn seconds(&self) -> i64 {
        match self {
            Self::M1 => 60,
            Self::M5 => 300,
            Self::M15 => 900,
            Self::H1 => 3_600,
            Self::H4 => 14_400,
            Self::D1 => 86_400,
        }
    }

    /// Normalization multiplier applied to tournament returns so slices on
    /// slow timeframes (fewer trade opportunities) stay comparable to fast
    /// ones.
    pub fn bonus(&self) -> Decimal {
        match self {
            Self::M1 => dec!(1.00),
            Self::M5 => dec!(1.05),
            Self::M15 => dec!(1.10),
            Self::H1 => dec!(1.20),
            Self::H4 => dec!(1.30),
            Self::D1 => dec!(1.50),
        }
    }
}

/// The feature vector captured at trial entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFeatures {
    pub price: Decimal,
    /// Rate of change over the feature window, in percent
    pub momentum: Decimal,
    pub moving_avg: Decimal,
    /// Relative volume: current bar volume over its rolling mean
    pub volume: Decimal,
    /// Standard deviation of per-bar returns over the window, in percent
    pub volatility: Decimal,
}

/// A complete market snapshot from the snapshot provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub captured_at: i64,
    pub features: SnapshotFeatures,
}

// ============================================================================
// Feature tiers — the discretized buckets the miner groups trials by
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MomentumTier {
    Falling,
    Flat,
    Rising,
}

impl MomentumTier {
    pub fn bucket(momentum: Decimal) -> Self {
        if momentum < dec!(-0.2) {
            Self::Falling
        } else if momentum > dec!(0.2) {
            Self::Rising
        } else {
            Self::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Falling => "falling",
            Self::Flat => "flat",
            Self::Rising => "rising",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolatilityTier {
    Low,
    Medium,
    High,
}

impl VolatilityTier {
    pub fn bucket(volatility: Decimal) -> Self {
        if volatility < dec!(0.5) {
            Self::Low
        } else if volatility > dec!(1.5) {
            Self::High
        } else {
            Self::Medium
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeTier {
    Thin,
    Normal,
    Heavy,
}

impl VolumeTier {
    pub fn bucket(relative_volume: Decimal) -> Self {
        if relative_volume < dec!(0.75) {
            Self::Thin
        } else if relative_volume > dec!(1.5) {
            Self::Heavy
        } else {
            Self::Normal
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Thin => "thin",
            Self::Normal => "normal",
            Self::Heavy => "heavy",
        }
    }
}

// ============================================================================
// Trial
// ============================================================================

/// A randomized chaos trade outcome — raw material for pattern mining
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub id: Option<i64>,
    pub cycle: i64,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub pnl: Decimal,
    pub is_win: bool,
    pub justification: String,
    pub features: SnapshotFeatures,
}

impl Trial {
    pub fn to_record(&self) -> TrialRecord {
        TrialRecord {
            id: self.id,
            cycle: self.cycle,
            entry_time: self.entry_time,
            exit_time: self.exit_time,
            entry_price: self.entry_price.to_string(),
            exit_price: self.exit_price.to_string(),
            pnl: self.pnl.to_string(),
            is_win: self.is_win as i64,
            justification: self.justification.clone(),
            snap_price: self.features.price.to_string(),
            snap_momentum: self.features.momentum.to_string(),
            snap_moving_avg: self.features.moving_avg.to_string(),
            snap_volume: self.features.volume.to_string(),
            snap_volatility: self.features.volatility.to_string(),
            created_at: None,
        }
    }

    pub fn from_record(record: &TrialRecord) -> Self {
        Self {
            id: record.id,
            cycle: record.cycle,
            entry_time: record.entry_time,
            exit_time: record.exit_time,
            entry_price: parse_dec(&record.entry_price),
            exit_price: parse_dec(&record.exit_price),
            pnl: parse_dec(&record.pnl),
            is_win: record.is_win != 0,
            justification: record.justification.clone(),
            features: SnapshotFeatures {
                price: parse_dec(&record.snap_price),
                momentum: parse_dec(&record.snap_momentum),
                moving_avg: parse_dec(&record.snap_moving_avg),
                volume: parse_dec(&record.snap_volume),
                volatility: parse_dec(&record.snap_volatility),
            },
        }
    }
}

// ============================================================================
// Pattern
// ============================================================================

/// Where a pattern came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternOrigin {
    ChaosMiner,
    Seeded,
    Manual,
}

impl PatternOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChaosMiner => "chaos_miner",
            Self::Seeded => "seeded",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "seeded" => Self::Seeded,
            "manual" => Self::Manual,
            _ => Self::ChaosMiner,
        }
    }
}

/// A discovered pattern with its running statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub id: i64,
    pub signature: String,
    pub name: String,
    pub condition: PatternCondition,
    pub win_rate: f64,
    pub sample_size: i64,
    pub confidence: f64,
    pub rationale: String,
    pub upvotes: i64,
    pub downvotes: i64,
    pub origin: PatternOrigin,
    pub runs: i64,
    pub last_tested: Option<i64>,
    pub h2h_wins: i64,
    pub h2h_losses: i64,
    pub timeframes: Vec<Timeframe>,
    pub timeframe_perf: BTreeMap<String, TimeframePerf>,
}

impl Pattern {
    pub fn from_record(record: &PatternRecord) -> Self {
        let condition: PatternCondition = serde_json::from_str(&record.condition_json)
            .unwrap_or(PatternCondition::All { items: Vec::new() });

        let timeframes: Vec<String> =
            serde_json::from_str(&record.timeframes).unwrap_or_default();
        let timeframes = timeframes
            .iter()
            .filter_map(|t| Timeframe::parse(t))
            .collect();

        let timeframe_perf: BTreeMap<String, TimeframePerf> =
            serde_json::from_str(&record.timeframe_perf).unwrap_or_default();

        Self {
            id: record.id.unwrap_or(0),
            signature: record.signature.clone(),
            name: record.name.clone(),
            condition,
            win_rate: record.win_rate,
            sample_size: record.sample_size,
            confidence: record.confidence,
            rationale: record.rationale.clone(),
            upvotes: record.upvotes,
            downvotes: record.downvotes,
            origin: PatternOrigin::parse(&record.origin),
            runs: record.runs,
            last_tested: record.last_tested,
            h2h_wins: record.h2h_wins,
            h2h_losses: record.h2h_losses,
            timeframes,
            timeframe_perf,
        }
    }

    /// Head-to-head win ratio over all tournament runs
    pub fn win_ratio(&self) -> f64 {
        let played = self.h2h_wins + self.h2h_losses;
        if played == 0 {
            0.0
        } else {
            self.h2h_wins as f64 / played as f64
        }
    }

    /// Mean ROI across all tested timeframes
    pub fn avg_roi(&self) -> f64 {
        if self.timeframe_perf.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.timeframe_perf.values().map(|p| p.avg_roi).sum();
        sum / self.timeframe_perf.len() as f64
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a TEXT-encoded decimal column, defaulting to zero on corruption
pub fn parse_dec(s: &str) -> Decimal {
    Decimal::from_str_exact(s).unwrap_or(Decimal::ZERO)
}

/// Convert a Decimal to f64 for statistics
pub fn dec_to_f64(d: Decimal) -> f64 {
    d.to_string().parse::<f64>().unwrap_or(0.0)
}

/// Convert an f64 back to Decimal, rounded to 6 places
pub fn f64_to_dec(x: f64) -> Decimal {
    Decimal::from_str_exact(&format!("{:.6}", x)).unwrap_or(Decimal::ZERO)
}
