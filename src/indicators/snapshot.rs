use super::{calculate_macd, calculate_rsi, calculate_vwma, Macd};
use crate::models::Candle;
use serde::{Deserialize, Serialize};

/// Lookback lengths for the indicator suite
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IndicatorSettings {
    pub vwma_period: usize,
    pub rsi_period: usize,
    pub macd_fast: usize,
    pub macd_slow: usize,
    pub macd_signal: usize,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            vwma_period: 20,
            rsi_period: 14,
            macd_fast: 12,
            macd_slow: 26,
            macd_signal: 9,
        }
    }
}

/// Indicator values for one timeframe. `None` means not enough history.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorSnapshot {
    pub vwma: Option<f64>,
    pub rsi: Option<f64>,
    pub macd: Option<Macd>,
}

/// Snapshot labelled with the timeframe it was computed for
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimeframeIndicators {
    pub timeframe: String,
    pub snapshot: IndicatorSnapshot,
}

/// Sort candles ascending by start time, keeping the last copy of any duplicated timestamp
pub fn normalize_candles(candles: &[Candle]) -> Vec<Candle> {
    let mut sorted = candles.to_vec();
    // Stable sort keeps input order within equal timestamps
    sorted.sort_by_key(|c| c.start_time);

    let mut deduped: Vec<Candle> = Vec::with_capacity(sorted.len());
    for candle in sorted {
        match deduped.last_mut() {
            Some(last) if last.start_time == candle.start_time => *last = candle,
            _ => deduped.push(candle),
        }
    }
    deduped
}

/// Compute the full indicator suite for one candle series
pub fn compute_snapshot(candles: &[Candle], settings: &IndicatorSettings) -> IndicatorSnapshot {
    let candles = normalize_candles(candles);
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();

    IndicatorSnapshot {
        vwma: calculate_vwma(&candles, settings.vwma_period),
        rsi: calculate_rsi(&closes, settings.rsi_period),
        macd: calculate_macd(
            &closes,
            settings.macd_fast,
            settings.macd_slow,
            settings.macd_signal,
        ),
    }
}

/// Compute one snapshot per timeframe, preserving the input order of labels
pub fn compute_timeframes(
    series: &[(String, Vec<Candle>)],
    settings: &IndicatorSettings,
) -> Vec<TimeframeIndicators> {
    series
        .iter()
        .map(|(timeframe, candles)| TimeframeIndicators {
            timeframe: timeframe.clone(),
            snapshot: compute_snapshot(candles, settings),
        })
        .collect()
}
