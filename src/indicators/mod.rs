// Technical indicators module
// Implements VWMA, RSI and MACD over candle series

pub mod macd;
pub mod moving_average;
pub mod rsi;
pub mod snapshot;

pub use macd::{calculate_macd, Macd};
pub use moving_average::{calculate_ema, calculate_ema_series, calculate_sma, calculate_vwma};
pub use rsi::calculate_rsi;
pub use snapshot::{
    compute_snapshot, compute_timeframes, normalize_candles, IndicatorSettings,
    IndicatorSnapshot, TimeframeIndicators,
};
