//! Rolling feature derivation from candle streams
//!
//! Turns raw OHLCV bars into the snapshot feature vector the rest of the
//! engine works with: price, momentum (rate of change), moving average,
//! relative volume, and return volatility. Used by the snapshot provider to
//! build live snapshots and by the tournament engine to evaluate pattern
//! conditions bar-by-bar over historical slices.

use ta::indicators::{RateOfChange, SimpleMovingAverage, StandardDeviation};
use ta::Next;

use crate::types::{dec_to_f64, f64_to_dec, Candle, SnapshotFeatures};

/// Default lookback for all derived features
pub const FEATURE_PERIOD: usize = 20;

/// Bar-by-bar feature calculator
pub struct FeatureEngine {
    period: usize,
    sma: SimpleMovingAverage,
    roc: RateOfChange,
    ret_sd: StandardDeviation,
    vol_sma: SimpleMovingAverage,
    last_close: Option<f64>,
    bars_seen: usize,
}

impl FeatureEngine {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            sma: SimpleMovingAverage::new(period).expect("Invalid SMA period"),
            roc: RateOfChange::new(period).expect("Invalid ROC period"),
            ret_sd: StandardDeviation::new(period).expect("Invalid SD period"),
            vol_sma: SimpleMovingAverage::new(period).expect("Invalid volume SMA period"),
            last_close: None,
            bars_seen: 0,
        }
    }

    /// Feed one candle; returns features once the warmup window has filled
    pub fn update(&mut self, candle: &Candle) -> Option<SnapshotFeatures> {
        let close = dec_to_f64(candle.close);
        let volume = dec_to_f64(candle.volume);

        let moving_avg = self.sma.next(close);
        let momentum = self.roc.next(close);

        let volatility = match self.last_close {
            Some(last) if last > 0.0 => {
                let ret_pct = (close - last) / last * 100.0;
                self.ret_sd.next(ret_pct)
            }
            _ => self.ret_sd.next(0.0),
        };

        let vol_mean = self.vol_sma.next(volume);
        let relative_volume = if vol_mean > 0.0 { volume / vol_mean } else { 1.0 };

        self.last_close = Some(close);
        self.bars_seen += 1;

        if self.bars_seen <= self.period {
            return None;
        }

        Some(SnapshotFeatures {
            price: candle.close,
            momentum: f64_to_dec(momentum),
            moving_avg: f64_to_dec(moving_avg),
            volume: f64_to_dec(relative_volume),
            volatility: f64_to_dec(volatility),
        })
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.period);
    }
}

/// Run the engine over a full slice and return the last feature vector
pub fn derive_latest(candles: &[Candle], period: usize) -> Option<SnapshotFeatures> {
    let mut engine = FeatureEngine::new(period);
    let mut latest = None;
    for candle in candles {
        if let Some(features) = engine.update(candle) {
            latest = Some(features);
        }
    }
    latest
}
