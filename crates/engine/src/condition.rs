//! Structured pattern conditions
//!
//! A pattern's condition is a predicate tree over snapshot features: tier
//! leaves (the discretized buckets the miner emits), numeric threshold
//! leaves, and boolean combinators. Trees are compared for deduplication by a
//! structural signature, never by their display text.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::{
    dec_to_f64, MomentumTier, SnapshotFeatures, VolatilityTier, VolumeTier,
};

/// Numeric snapshot features addressable by threshold leaves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericFeature {
    Price,
    Momentum,
    MovingAverage,
    Volume,
    Volatility,
}

impl NumericFeature {
    pub fn extract(&self, features: &SnapshotFeatures) -> Decimal {
        match self {
            Self::Price => features.price,
            Self::Momentum => features.momentum,
            Self::MovingAverage => features.moving_avg,
            Self::Volume => features.volume,
            Self::Volatility => features.volatility,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Price => "price",
            Self::Momentum => "momentum",
            Self::MovingAverage => "moving average",
            Self::Volume => "volume",
            Self::Volatility => "volatility",
        }
    }
}

/// Predicate tree evaluated against snapshot features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PatternCondition {
    MomentumIs { tier: MomentumTier },
    VolatilityIs { tier: VolatilityTier },
    VolumeIs { tier: VolumeTier },
    FeatureAbove { feature: NumericFeature, threshold: f64 },
    FeatureBelow { feature: NumericFeature, threshold: f64 },
    All { items: Vec<PatternCondition> },
    Any { items: Vec<PatternCondition> },
    Not { item: Box<PatternCondition> },
}

impl PatternCondition {
    /// Evaluate the predicate against a feature vector
    pub fn matches(&self, features: &SnapshotFeatures) -> bool {
        match self {
            Self::MomentumIs { tier } => MomentumTier::bucket(features.momentum) == *tier,
            Self::VolatilityIs { tier } => {
                VolatilityTier::bucket(features.volatility) == *tier
            }
            Self::VolumeIs { tier } => VolumeTier::bucket(features.volume) == *tier,
            Self::FeatureAbove { feature, threshold } => {
                dec_to_f64(feature.extract(features)) > *threshold
            }
            Self::FeatureBelow { feature, threshold } => {
                dec_to_f64(feature.extract(features)) < *threshold
            }
            Self::All { items } => items.iter().all(|c| c.matches(features)),
            Self::Any { items } => items.iter().any(|c| c.matches(features)),
            Self::Not { item } => !item.matches(features),
        }
    }

    /// Deterministic structural signature for dedup-by-upsert.
    ///
    /// serde serializes enum variants and struct fields in declaration order,
    /// so the JSON form is canonical for a given tree.
    pub fn signature(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_default();
        let hash = Sha256::digest(json.as_bytes());
        format!("{:x}", hash)
    }

    /// Human-readable rendering used as the pattern name
    pub fn describe(&self) -> String {
        match self {
            Self::MomentumIs { tier } => format!("momentum {}", tier.as_str()),
            Self::VolatilityIs { tier } => format!("volatility {}", tier.as_str()),
            Self::VolumeIs { tier } => format!("volume {}", tier.as_str()),
            Self::FeatureAbove { feature, threshold } => {
                format!("{} > {}", feature.as_str(), threshold)
            }
            Self::FeatureBelow { feature, threshold } => {
                format!("{} < {}", feature.as_str(), threshold)
            }
            Self::All { items } => items
                .iter()
                .map(|c| c.describe())
                .collect::<Vec<_>>()
                .join(" + "),
            Self::Any { items } => items
                .iter()
                .map(|c| c.describe())
                .collect::<Vec<_>>()
                .join(" | "),
            Self::Not { item } => format!("not ({})", item.describe()),
        }
    }
}
