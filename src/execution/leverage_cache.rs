use crate::api::{ExchangeError, LeverageSetter};
use std::collections::HashMap;
use std::sync::Mutex;

/// What `ensure_leverage` had to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeverageSync {
    /// Cache already held this value, no call made
    Cached,
    /// Venue accepted the new leverage
    Updated,
    /// Venue reported the leverage was already set
    AlreadySet,
}

/// Last leverage confirmed by the venue, keyed by (category, symbol).
///
/// Lives for the process lifetime and mirrors venue-side state, so a restart
/// simply costs one extra set-leverage call per symbol.
#[derive(Debug, Default)]
pub struct LeverageCache {
    confirmed: Mutex<HashMap<(String, String), u32>>,
}

impl LeverageCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, category: &str, symbol: &str) -> Option<u32> {
        self.confirmed
            .lock()
            .ok()?
            .get(&(category.to_string(), symbol.to_string()))
            .copied()
    }

    fn record(&self, category: &str, symbol: &str, leverage: u32) {
        if let Ok(mut confirmed) = self.confirmed.lock() {
            confirmed.insert((category.to_string(), symbol.to_string()), leverage);
        }
    }

    /// Make sure the venue's leverage for `symbol` equals `leverage`.
    ///
    /// Errors other than "leverage not modified" are returned untouched and
    /// leave the cache as it was.
    pub async fn ensure_leverage<S>(
        &self,
        setter: &S,
        symbol: &str,
        leverage: u32,
    ) -> Result<LeverageSync, ExchangeError>
    where
        S: LeverageSetter + ?Sized,
    {
        let category = setter.category().to_string();

        if self.get(&category, symbol) == Some(leverage) {
            tracing::debug!(symbol = %symbol, leverage, "Leverage already cached");
            return Ok(LeverageSync::Cached);
        }

        match setter.set_leverage(symbol, leverage).await {
            Ok(()) => {
                tracing::info!(symbol = %symbol, leverage, "Leverage updated");
                self.record(&category, symbol, leverage);
                Ok(LeverageSync::Updated)
            }
            Err(e) if e.is_leverage_unchanged() => {
                tracing::info!(symbol = %symbol, leverage, "Leverage already set on venue");
                self.record(&category, symbol, leverage);
                Ok(LeverageSync::AlreadySet)
            }
            Err(e) => Err(e),
        }
    }
}
