use super::moving_average::calculate_ema_series;
use serde::Serialize;

/// Latest MACD triplet
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
    pub histogram: f64,
}

/// Calculate MACD over the full close history.
///
/// Requires at least `slow + signal` prices. The MACD line is `EMA(fast) -
/// EMA(slow)` wherever both are defined; the signal line is an EMA of that
/// series and the histogram is `line - signal`.
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal: usize) -> Option<Macd> {
    if fast == 0 || signal == 0 || fast >= slow || prices.len() < slow + signal {
        return None;
    }

    let fast_series = calculate_ema_series(prices, fast);
    let slow_series = calculate_ema_series(prices, slow);

    let macd_series: Vec<f64> = fast_series
        .iter()
        .zip(slow_series.iter())
        .filter_map(|(f, s)| match (f, s) {
            (Some(f), Some(s)) => Some(f - s),
            _ => None,
        })
        .collect();

    let line = *macd_series.last()?;
    let signal_value = calculate_ema_series(&macd_series, signal)
        .into_iter()
        .last()
        .flatten()?;

    Some(Macd {
        line,
        signal: signal_value,
        histogram: line - signal_value,
    })
}
