use crate::models::Candle;

/// Calculate Simple Moving Average (SMA) over the last `period` values
pub fn calculate_sma(prices: &[f64], period: usize) -> Option<f64> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum: f64 = prices.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average (EMA), returning the latest value
pub fn calculate_ema(prices: &[f64], period: usize) -> Option<f64> {
    calculate_ema_series(prices, period)
        .into_iter()
        .last()
        .flatten()
}

/// Calculate the full EMA series aligned with `prices`.
///
/// Entries before index `period - 1` are `None`. The series is seeded with the
/// simple average of the first `period` values and uses the multiplier
/// `2 / (period + 1)`. When an input (or the resulting value) is not finite the
/// previous EMA value is carried forward instead of breaking the series.
pub fn calculate_ema_series(prices: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut series = vec![None; prices.len()];
    if period == 0 || prices.len() < period {
        return series;
    }

    let seed = prices[..period].iter().sum::<f64>() / period as f64;
    if !seed.is_finite() {
        return series;
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut ema = seed;
    series[period - 1] = Some(ema);

    for (i, price) in prices.iter().enumerate().skip(period) {
        let next = (price - ema) * multiplier + ema;
        if next.is_finite() {
            ema = next;
        }
        series[i] = Some(ema);
    }

    series
}

/// Volume-weighted moving average of closes over the last `period` candles.
///
/// Expects candles sorted ascending by start time. Returns `None` with fewer
/// than `period` candles or when the window carries no volume.
pub fn calculate_vwma(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }

    let window = &candles[candles.len() - period..];
    let (weighted, volume) = window.iter().fold((0.0, 0.0), |(w, v), c| {
        (w + c.close * c.volume, v + c.volume)
    });

    if volume <= 0.0 {
        return None;
    }

    let vwma = weighted / volume;
    vwma.is_finite().then_some(vwma)
}
