use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use governor::{Quota, RateLimiter};
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use super::{ExchangeError, LeverageSetter, MarketDataSource, OrderGateway};
use crate::models::{
    AccountSnapshot, Candle, InstrumentMeta, OrderInstruction, Position, PositionSide,
    PositionState, Ticker,
};

// Bybit v5 unified API
// Docs: https://bybit-exchange.github.io/docs/v5/intro
pub const BYBIT_API_BASE: &str = "https://api.bybit.com";

type HmacSha256 = Hmac<Sha256>;

type BybitRateLimiter = RateLimiter<
    governor::state::direct::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Connection settings for [`BybitClient`]
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BybitConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    pub category: String,
    pub account_type: String,
    pub recv_window_ms: u64,
    pub requests_per_second: u32,
    pub timeout_secs: u64,
}

impl Default for BybitConfig {
    fn default() -> Self {
        Self {
            base_url: BYBIT_API_BASE.to_string(),
            api_key: String::new(),
            api_secret: String::new(),
            category: "linear".to_string(),
            account_type: "UNIFIED".to_string(),
            recv_window_ms: 5000,
            requests_per_second: 10,
            timeout_secs: 10,
        }
    }
}

/// Response envelope shared by every v5 endpoint.
///
/// `result` is decoded only after `retCode` is known to be 0, since error
/// replies carry an empty object there.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    ret_code: i64,
    #[serde(default)]
    ret_msg: String,
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ListResult<T> {
    list: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletEntry {
    total_equity: String,
    total_available_balance: String,
    total_initial_margin: String,
    total_maintenance_margin: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerEntry {
    symbol: String,
    last_price: String,
    #[serde(default)]
    mark_price: Option<String>,
    #[serde(default)]
    funding_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InstrumentEntry {
    symbol: String,
    lot_size_filter: LotSizeFilter,
    price_filter: PriceFilter,
    #[serde(default)]
    leverage_filter: Option<LeverageFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LotSizeFilter {
    min_order_qty: String,
    #[serde(default)]
    max_order_qty: Option<String>,
    qty_step: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceFilter {
    min_price: String,
    #[serde(default)]
    max_price: Option<String>,
    tick_size: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeverageFilter {
    max_leverage: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionEntry {
    symbol: String,
    side: String,
    size: String,
    avg_price: String,
    leverage: String,
    #[serde(default)]
    unrealised_pnl: String,
    #[serde(default)]
    liq_price: String,
    #[serde(default)]
    take_profit: String,
    #[serde(default)]
    stop_loss: String,
    #[serde(default)]
    position_idx: u8,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResult {
    order_id: String,
}

/// Bybit v5 REST client for linear perpetuals
#[derive(Clone)]
pub struct BybitClient {
    client: Client,
    config: BybitConfig,
    rate_limiter: Arc<BybitRateLimiter>,
}

impl BybitClient {
    pub fn new(config: BybitConfig) -> Result<Self, ExchangeError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let per_second = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
        let rate_limiter = Arc::new(RateLimiter::direct(Quota::per_second(per_second)));

        Ok(Self {
            client,
            config,
            rate_limiter,
        })
    }

    fn sign(&self, timestamp: &str, payload: &str) -> Result<String, ExchangeError> {
        let mut mac = HmacSha256::new_from_slice(self.config.api_secret.as_bytes())
            .map_err(|e| ExchangeError::Signing(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(self.config.api_key.as_bytes());
        mac.update(self.config.recv_window_ms.to_string().as_bytes());
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Unsigned GET for public market endpoints
    async fn get_public<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<T, ExchangeError> {
        let query = query_string(params);
        let url = format!("{}{}?{}", self.config.base_url, endpoint, query);

        self.rate_limiter.until_ready().await;
        let response = self.client.get(&url).send().await?;
        Self::unwrap_envelope(response).await
    }

    /// Signed request for private endpoints. GET params go in the query, POST params in the body.
    async fn send_signed<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        body: Option<serde_json::Value>,
    ) -> Result<T, ExchangeError> {
        let timestamp = Utc::now().timestamp_millis().to_string();
        let query = query_string(params);
        let body_text = body.as_ref().map(|b| b.to_string()).unwrap_or_default();
        let payload = if method == Method::GET { &query } else { &body_text };
        let signature = self.sign(&timestamp, payload)?;

        let url = if query.is_empty() {
            format!("{}{}", self.config.base_url, endpoint)
        } else {
            format!("{}{}?{}", self.config.base_url, endpoint, query)
        };

        let mut request = self
            .client
            .request(method, &url)
            .header("X-BAPI-API-KEY", &self.config.api_key)
            .header("X-BAPI-TIMESTAMP", &timestamp)
            .header("X-BAPI-RECV-WINDOW", self.config.recv_window_ms.to_string())
            .header("X-BAPI-SIGN", signature);

        if body.is_some() {
            request = request
                .header("Content-Type", "application/json")
                .body(body_text);
        }

        self.rate_limiter.until_ready().await;
        let response = request.send().await?;
        Self::unwrap_envelope(response).await
    }

    async fn unwrap_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ExchangeError> {
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body: text,
            });
        }

        let envelope: Envelope = serde_json::from_str(&text)
            .map_err(|e| ExchangeError::Decode(format!("{} (body: {})", e, text)))?;

        if envelope.ret_code != 0 {
            return Err(ExchangeError::Venue {
                code: envelope.ret_code,
                message: envelope.ret_msg,
            });
        }

        serde_json::from_value(envelope.result)
            .map_err(|e| ExchangeError::Decode(format!("{} (body: {})", e, text)))
    }
}

#[async_trait]
impl MarketDataSource for BybitClient {
    async fn account_snapshot(&self) -> Result<AccountSnapshot, ExchangeError> {
        let result: ListResult<WalletEntry> = self
            .send_signed(
                Method::GET,
                "/v5/account/wallet-balance",
                &[("accountType", self.config.account_type.clone())],
                None,
            )
            .await?;

        let wallet = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode("empty wallet list".to_string()))?;

        Ok(AccountSnapshot {
            total_equity: parse_num(&wallet.total_equity).max(0.0),
            available_balance: parse_num(&wallet.total_available_balance).max(0.0),
            used_margin: parse_num(&wallet.total_initial_margin).max(0.0),
            maintenance_margin: parse_num(&wallet.total_maintenance_margin).max(0.0),
        })
    }

    async fn ticker(&self, symbol: &str) -> Result<Ticker, ExchangeError> {
        let result: ListResult<TickerEntry> = self
            .get_public(
                "/v5/market/tickers",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;

        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("no ticker for {}", symbol)))?;

        let last_price = parse_num(&entry.last_price);
        if last_price <= 0.0 {
            return Err(ExchangeError::Decode(format!(
                "invalid last price '{}' for {}",
                entry.last_price, symbol
            )));
        }

        Ok(Ticker {
            symbol: entry.symbol,
            last_price,
            mark_price: entry.mark_price.as_deref().and_then(parse_opt),
            funding_rate: entry.funding_rate.as_deref().and_then(parse_any),
        })
    }

    async fn instrument_meta(&self, symbol: &str) -> Result<InstrumentMeta, ExchangeError> {
        let result: ListResult<InstrumentEntry> = self
            .get_public(
                "/v5/market/instruments-info",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                ],
            )
            .await?;

        let entry = result
            .list
            .into_iter()
            .next()
            .ok_or_else(|| ExchangeError::Decode(format!("unknown instrument {}", symbol)))?;

        let meta = InstrumentMeta {
            symbol: entry.symbol,
            min_order_qty: parse_num(&entry.lot_size_filter.min_order_qty),
            max_order_qty: entry.lot_size_filter.max_order_qty.as_deref().and_then(parse_opt),
            qty_step: parse_num(&entry.lot_size_filter.qty_step),
            tick_size: parse_num(&entry.price_filter.tick_size),
            min_price: parse_num(&entry.price_filter.min_price),
            max_price: entry.price_filter.max_price.as_deref().and_then(parse_opt),
            max_leverage: entry
                .leverage_filter
                .as_ref()
                .and_then(|f| parse_opt(&f.max_leverage)),
        };

        if meta.qty_step <= 0.0 || meta.tick_size <= 0.0 || meta.min_order_qty <= 0.0 {
            return Err(ExchangeError::Decode(format!(
                "incomplete trading filters for {}",
                symbol
            )));
        }

        Ok(meta)
    }

    async fn position(&self, symbol: &str) -> Result<PositionState, ExchangeError> {
        let result: ListResult<PositionEntry> = self
            .send_signed(
                Method::GET,
                "/v5/position/list",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                ],
                None,
            )
            .await?;

        Ok(position_state_from(result.list))
    }

    async fn candles(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let interval = kline_interval(timeframe).ok_or_else(|| {
            ExchangeError::Decode(format!("unsupported timeframe '{}'", timeframe))
        })?;

        let result: ListResult<Vec<String>> = self
            .get_public(
                "/v5/market/kline",
                &[
                    ("category", self.config.category.clone()),
                    ("symbol", symbol.to_string()),
                    ("interval", interval.to_string()),
                    ("limit", limit.clamp(1, 1000).to_string()),
                ],
            )
            .await?;

        // Rows are [start, open, high, low, close, volume, turnover], newest first
        let candles = result
            .list
            .iter()
            .filter_map(|row| {
                if row.len() < 6 {
                    return None;
                }
                Some(Candle {
                    start_time: row[0].parse().ok()?,
                    open: row[1].parse().ok()?,
                    high: row[2].parse().ok()?,
                    low: row[3].parse().ok()?,
                    close: row[4].parse().ok()?,
                    volume: row[5].parse().ok()?,
                })
            })
            .collect();

        Ok(candles)
    }
}

#[async_trait]
impl LeverageSetter for BybitClient {
    fn category(&self) -> &str {
        &self.config.category
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> Result<(), ExchangeError> {
        let body = json!({
            "category": self.config.category,
            "symbol": symbol,
            "buyLeverage": leverage.to_string(),
            "sellLeverage": leverage.to_string(),
        });

        let _: serde_json::Value = self
            .send_signed(Method::POST, "/v5/position/set-leverage", &[], Some(body))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl OrderGateway for BybitClient {
    async fn place_order(&self, order: &OrderInstruction) -> Result<String, ExchangeError> {
        let body = order_body(&self.config.category, order);

        tracing::info!(
            "🚀 Sending order: {} {} {} @ {} ({})",
            order.side.as_str(),
            order.quantity,
            order.symbol,
            order.price,
            order.client_order_id
        );

        let result: CreateOrderResult = self
            .send_signed(Method::POST, "/v5/order/create", &[], Some(body))
            .await?;
        Ok(result.order_id)
    }
}

/// JSON body for /v5/order/create
fn order_body(category: &str, order: &OrderInstruction) -> serde_json::Value {
    let mut body = json!({
        "category": category,
        "symbol": order.symbol,
        "side": order.side.as_str(),
        "orderType": "Limit",
        "qty": format_num(order.quantity),
        "price": format_num(order.price),
        "timeInForce": "GTC",
        "reduceOnly": order.reduce_only,
        "orderLinkId": order.client_order_id,
    });

    if let Some(idx) = order.position_index {
        body["positionIdx"] = json!(idx);
    }
    if let Some(tp) = order.take_profit {
        body["takeProfit"] = json!(format_num(tp));
        body["tpTriggerBy"] = json!("LastPrice");
    }
    if let Some(sl) = order.stop_loss {
        body["stopLoss"] = json!(format_num(sl));
        body["slTriggerBy"] = json!("LastPrice");
    }
    body
}

/// Pick the held position and detect hedge mode from the raw position list
fn position_state_from(entries: Vec<PositionEntry>) -> PositionState {
    let hedge_mode = entries.iter().any(|e| e.position_idx != 0);

    let position = entries.into_iter().find_map(|e| {
        let size = parse_num(&e.size);
        if size <= 0.0 {
            return None;
        }
        let side = match e.side.as_str() {
            "Buy" => PositionSide::Long,
            "Sell" => PositionSide::Short,
            _ => return None,
        };
        Some(Position {
            symbol: e.symbol,
            side,
            size,
            entry_price: parse_num(&e.avg_price),
            leverage: parse_num(&e.leverage).round().max(1.0) as u32,
            unrealized_pnl: parse_num(&e.unrealised_pnl),
            liq_price: parse_opt(&e.liq_price),
            take_profit: parse_opt(&e.take_profit),
            stop_loss: parse_opt(&e.stop_loss),
            position_index: e.position_idx,
        })
    });

    PositionState {
        position,
        hedge_mode,
    }
}

/// Map "5m" / "1h" / "1d" style labels to Bybit kline intervals
pub fn kline_interval(timeframe: &str) -> Option<&'static str> {
    Some(match timeframe.to_ascii_lowercase().as_str() {
        "1m" => "1",
        "3m" => "3",
        "5m" => "5",
        "15m" => "15",
        "30m" => "30",
        "1h" => "60",
        "2h" => "120",
        "4h" => "240",
        "6h" => "360",
        "12h" => "720",
        "1d" => "D",
        "1w" => "W",
        _ => return None,
    })
}

fn query_string(params: &[(&str, String)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

fn parse_num(value: &str) -> f64 {
    value.trim().parse::<f64>().unwrap_or(0.0)
}

/// Positive number or None (venue uses "" and "0" for unset)
fn parse_opt(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|v| *v > 0.0)
}

fn parse_any(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok()
}

fn format_num(value: f64) -> String {
    let text = format!("{:.8}", value);
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType, TimeInForce, TriggerReference};

    fn entry(side: &str, size: &str, idx: u8) -> PositionEntry {
        PositionEntry {
            symbol: "BTCUSDT".to_string(),
            side: side.to_string(),
            size: size.to_string(),
            avg_price: "50000".to_string(),
            leverage: "5".to_string(),
            unrealised_pnl: "12.5".to_string(),
            liq_price: "".to_string(),
            take_profit: "0".to_string(),
            stop_loss: "48000".to_string(),
            position_idx: idx,
        }
    }

    #[test]
    fn test_one_way_position() {
        let state = position_state_from(vec![entry("Sell", "0.25", 0)]);
        assert!(!state.hedge_mode);
        let position = state.position.unwrap();
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.size, 0.25);
        assert_eq!(position.leverage, 5);
        assert_eq!(position.liq_price, None);
        assert_eq!(position.take_profit, None);
        assert_eq!(position.stop_loss, Some(48000.0));
    }

    #[test]
    fn test_hedge_mode_picks_non_empty_slot() {
        let state = position_state_from(vec![entry("Buy", "0", 1), entry("Sell", "1.5", 2)]);
        assert!(state.hedge_mode);
        let position = state.position.unwrap();
        assert_eq!(position.side, PositionSide::Short);
        assert_eq!(position.position_index, 2);
    }

    #[test]
    fn test_flat_account() {
        let state = position_state_from(vec![entry("", "0", 0)]);
        assert!(!state.hedge_mode);
        assert!(state.position.is_none());
    }

    #[test]
    fn test_kline_interval_mapping() {
        assert_eq!(kline_interval("15m"), Some("15"));
        assert_eq!(kline_interval("4H"), Some("240"));
        assert_eq!(kline_interval("1d"), Some("D"));
        assert_eq!(kline_interval("7m"), None);
    }

    #[test]
    fn test_format_num_trims() {
        assert_eq!(format_num(0.12), "0.12");
        assert_eq!(format_num(50000.0), "50000");
        assert_eq!(format_num(0.00012345), "0.00012345");
    }

    #[test]
    fn test_order_body_fields() {
        let order = OrderInstruction {
            symbol: "BTCUSDT".to_string(),
            side: OrderSide::Buy,
            order_type: OrderType::Limit,
            quantity: 0.12,
            price: 50000.0,
            time_in_force: TimeInForce::GoodTilCancel,
            reduce_only: false,
            leverage: 3,
            position_index: Some(1),
            stop_loss: Some(48000.0),
            take_profit: Some(55000.0),
            trigger_reference: TriggerReference::LastPrice,
            client_order_id: "pb-abc".to_string(),
        };

        let body = order_body("linear", &order);
        assert_eq!(body["side"], "Buy");
        assert_eq!(body["qty"], "0.12");
        assert_eq!(body["price"], "50000");
        assert_eq!(body["timeInForce"], "GTC");
        assert_eq!(body["positionIdx"], 1);
        assert_eq!(body["stopLoss"], "48000");
        assert_eq!(body["tpTriggerBy"], "LastPrice");
        assert_eq!(body["orderLinkId"], "pb-abc");
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let client = BybitClient::new(BybitConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..Default::default()
        })
        .unwrap();
        let signature = client.sign("1700000000000", "category=linear").unwrap();
        assert_eq!(signature.len(), 64);
        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
