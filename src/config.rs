// Application configuration
//
// Layering (lowest to highest): built-in defaults, optional TOML file,
// PERPBOT__SECTION__KEY environment variables (.env is loaded by the binary).

use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::api::BybitConfig;
use crate::indicators::IndicatorSettings;
use crate::llm::{LlmConfig, DEFAULT_TEMPLATE};
use crate::notify::TelegramConfig;

pub const DEFAULT_CONFIG_FILE: &str = "config/perpbot";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read prompt template {path}: {source}")]
    Template {
        path: PathBuf,
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingConfig {
    pub symbol: String,
    pub interval_secs: u64,
    pub timeframes: Vec<String>,
    pub candle_limit: usize,
    pub max_leverage: u32,
    pub dry_run: bool,
    pub prompt_template: Option<PathBuf>,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            symbol: "BTCUSDT".to_string(),
            interval_secs: 300,
            timeframes: vec![
                "5m".to_string(),
                "15m".to_string(),
                "1h".to_string(),
                "4h".to_string(),
            ],
            candle_limit: 200,
            max_leverage: 20,
            dry_run: false,
            prompt_template: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsConfig {
    pub url: String,
    #[serde(default = "default_news_limit")]
    pub limit: usize,
}

fn default_news_limit() -> usize {
    10
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub exchange: BybitConfig,
    pub llm: LlmConfig,
    pub trading: TradingConfig,
    pub indicators: IndicatorSettings,
    pub telegram: Option<TelegramConfig>,
    pub news: Option<NewsConfig>,
}

impl AppConfig {
    /// Load from `path` (required) or the default file (optional), then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("PERPBOT")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("trading.timeframes")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check required settings before any cycle runs
    pub fn validate(&self) -> Result<(), ConfigError> {
        let trading = &self.trading;

        if trading.symbol.trim().is_empty() {
            return Err(ConfigError::Invalid("trading.symbol is empty".to_string()));
        }
        if trading.timeframes.is_empty() {
            return Err(ConfigError::Invalid(
                "trading.timeframes must list at least one timeframe".to_string(),
            ));
        }
        if let Some(tf) = trading
            .timeframes
            .iter()
            .find(|tf| crate::api::bybit::kline_interval(tf).is_none())
        {
            return Err(ConfigError::Invalid(format!(
                "unsupported timeframe '{}'",
                tf
            )));
        }
        if trading.max_leverage == 0 {
            return Err(ConfigError::Invalid(
                "trading.max_leverage must be at least 1".to_string(),
            ));
        }
        if trading.candle_limit == 0 {
            return Err(ConfigError::Invalid(
                "trading.candle_limit must be positive".to_string(),
            ));
        }
        if !trading.dry_run
            && (self.exchange.api_key.trim().is_empty()
                || self.exchange.api_secret.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "exchange.api_key and exchange.api_secret are required unless dry_run is set"
                    .to_string(),
            ));
        }
        if self.llm.api_key.trim().is_empty() {
            return Err(ConfigError::Invalid("llm.api_key is required".to_string()));
        }

        let ind = &self.indicators;
        if ind.vwma_period == 0 || ind.rsi_period == 0 || ind.macd_signal == 0 || ind.macd_fast == 0
        {
            return Err(ConfigError::Invalid(
                "indicator periods must be positive".to_string(),
            ));
        }
        if ind.macd_fast >= ind.macd_slow {
            return Err(ConfigError::Invalid(format!(
                "indicators.macd_fast ({}) must be below macd_slow ({})",
                ind.macd_fast, ind.macd_slow
            )));
        }

        if let Some(telegram) = &self.telegram {
            if telegram.bot_token.trim().is_empty() || telegram.chat_id.trim().is_empty() {
                return Err(ConfigError::Invalid(
                    "telegram.bot_token and telegram.chat_id are both required".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// Configured prompt template, or the built-in one
    pub fn prompt_template(&self) -> Result<String, ConfigError> {
        match &self.trading.prompt_template {
            Some(path) => std::fs::read_to_string(path).map_err(|source| ConfigError::Template {
                path: path.clone(),
                source,
            }),
            None => Ok(DEFAULT_TEMPLATE.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.exchange.api_key = "key".to_string();
        cfg.exchange.api_secret = "secret".to_string();
        cfg.llm.api_key = "sk-test".to_string();
        cfg
    }

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.trading.interval_secs, 300);
        assert_eq!(cfg.trading.timeframes, vec!["5m", "15m", "1h", "4h"]);
        assert_eq!(cfg.exchange.category, "linear");
        assert_eq!(cfg.exchange.recv_window_ms, 5000);
        assert_eq!(cfg.indicators, IndicatorSettings::default());
        assert!(cfg.telegram.is_none());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_credentials() {
        let mut cfg = valid();
        cfg.exchange.api_secret.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));

        // Dry run does not need exchange keys
        cfg.trading.dry_run = true;
        assert!(cfg.validate().is_ok());

        cfg.llm.api_key.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_trading_settings() {
        let mut cfg = valid();
        cfg.trading.symbol = "  ".to_string();
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.trading.timeframes.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.trading.timeframes = vec!["7m".to_string()];
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.indicators.macd_fast = 26;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let path = std::env::temp_dir().join(format!("perpbot-{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(
            &path,
            r#"
[exchange]
api_key = "k"
api_secret = "s"

[llm]
api_key = "sk"
model = "gpt-4o"

[trading]
symbol = "ETHUSDT"
interval_secs = 600
timeframes = ["15m", "1h"]

[telegram]
bot_token = "123:abc"
chat_id = "42"
"#,
        )
        .unwrap();

        let cfg = AppConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(cfg.trading.symbol, "ETHUSDT");
        assert_eq!(cfg.trading.interval_secs, 600);
        assert_eq!(cfg.trading.timeframes, vec!["15m", "1h"]);
        assert_eq!(cfg.trading.candle_limit, 200);
        assert_eq!(cfg.llm.model, "gpt-4o");
        assert_eq!(cfg.exchange.base_url, crate::api::bybit::BYBIT_API_BASE);
        let telegram = cfg.telegram.as_ref().unwrap();
        assert_eq!(telegram.base_url, "https://api.telegram.org");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let path = Path::new("/definitely/not/here/perpbot.toml");
        assert!(matches!(
            AppConfig::load(Some(path)),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_builtin_template() {
        let cfg = valid();
        let template = cfg.prompt_template().unwrap();
        assert!(template.contains("{{indicators}}"));
    }
}
