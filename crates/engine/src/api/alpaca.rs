//! Alpaca Markets REST binding
//!
//! Implements the `Broker` trait against the Alpaca trading and market-data
//! hosts. Money fields arrive as JSON strings and are parsed through
//! `rust_decimal` before conversion to `f64`. All calls pass through the
//! per-family token buckets in `limiter`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response, StatusCode};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use tracing::{debug, warn};

use crate::api::limiter::TokenBucket;
use crate::broker::{
    Account, Broker, BrokerPosition, LastTrade, OrderConfirmation, OrderRequest, OrderSide, Quote,
};
use crate::error::{EngineError, EngineResult};
use crate::types::PriceBar;

const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
const LIVE_TRADING_URL: &str = "https://api.alpaca.markets";
const DATA_URL: &str = "https://data.alpaca.markets";
const MAX_BARS_PER_REQUEST: u32 = 10_000;

const KEY_HEADER: &str = "APCA-API-KEY-ID";
const SECRET_HEADER: &str = "APCA-API-SECRET-KEY";

/// API credentials plus the paper/live switch
#[derive(Debug, Clone)]
pub struct AlpacaCredentials {
    pub api_key: String,
    pub secret_key: String,
    pub paper: bool,
}

impl AlpacaCredentials {
    /// Read `APCA_API_KEY_ID` / `APCA_API_SECRET_KEY` from the environment;
    /// `APCA_PAPER=false` switches to the live trading host.
    pub fn from_env() -> EngineResult<Self> {
        let api_key = std::env::var("APCA_API_KEY_ID").map_err(|_| EngineError::NotAuthenticated)?;
        let secret_key =
            std::env::var("APCA_API_SECRET_KEY").map_err(|_| EngineError::NotAuthenticated)?;
        let paper = std::env::var("APCA_PAPER")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        Ok(Self {
            api_key,
            secret_key,
            paper,
        })
    }
}

/// Alpaca trading + market data client
pub struct AlpacaBroker {
    client: Client,
    trading_url: String,
    data_url: String,
    api_key: String,
    secret_key: String,
    trading_limiter: TokenBucket,
    data_limiter: TokenBucket,
}

// ---------------------------------------------------------------------------
// Raw wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawAccount {
    account_number: String,
    status: String,
    cash: String,
    equity: String,
    buying_power: String,
    portfolio_value: String,
    #[serde(default)]
    pattern_day_trader: bool,
}

#[derive(Debug, Deserialize)]
struct RawPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    current_price: String,
    market_value: String,
    unrealized_pl: String,
}

#[derive(Debug, Deserialize)]
struct RawBar {
    t: DateTime<Utc>,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
}

#[derive(Debug, Deserialize)]
struct BarsResponse {
    bars: Option<Vec<RawBar>>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    #[serde(rename = "bp")]
    bid_price: Option<f64>,
    #[serde(rename = "ap")]
    ask_price: Option<f64>,
    #[serde(rename = "bs")]
    bid_size: Option<f64>,
    #[serde(rename = "as")]
    ask_size: Option<f64>,
    #[serde(rename = "t")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LatestQuoteResponse {
    quote: Option<RawQuote>,
}

#[derive(Debug, Deserialize)]
struct RawTrade {
    #[serde(rename = "p")]
    price: f64,
    #[serde(rename = "s")]
    size: Option<f64>,
    #[serde(rename = "t")]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct LatestTradeResponse {
    trade: Option<RawTrade>,
}

#[derive(Debug, Deserialize)]
struct RawOrder {
    id: String,
    symbol: String,
    qty: String,
    side: String,
    status: String,
    filled_avg_price: Option<String>,
}

/// Alpaca encodes money as JSON strings; parse exactly, expose as f64
fn parse_money(value: &str) -> EngineResult<f64> {
    Decimal::from_str(value)
        .ok()
        .and_then(|d| d.to_f64())
        .ok_or_else(|| {
            EngineError::validation(format!("unparseable money field from broker: {value}"))
        })
}

impl AlpacaBroker {
    pub fn new(credentials: AlpacaCredentials) -> Self {
        let trading_url = if credentials.paper {
            PAPER_TRADING_URL
        } else {
            LIVE_TRADING_URL
        };
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            trading_url: trading_url.to_string(),
            data_url: DATA_URL.to_string(),
            api_key: credentials.api_key,
            secret_key: credentials.secret_key,
            trading_limiter: TokenBucket::alpaca_trading(),
            data_limiter: TokenBucket::alpaca_data(),
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        self.client
            .get(url)
            .header(KEY_HEADER, &self.api_key)
            .header(SECRET_HEADER, &self.secret_key)
    }

    /// Map non-success statuses into the engine taxonomy
    async fn check_status(response: Response, context: &str) -> EngineResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(EngineError::NotAuthenticated);
        }
        Err(EngineError::ExecutionFailure(format!(
            "{context}: HTTP {status}: {body}"
        )))
    }
}

#[async_trait]
impl Broker for AlpacaBroker {
    async fn get_account(&self) -> EngineResult<Account> {
        self.trading_limiter.acquire().await;
        let url = format!("{}/v2/account", self.trading_url);
        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("account request failed: {e}")))?;
        let response = Self::check_status(response, "get_account").await?;
        let raw: RawAccount = response
            .json()
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("account decode failed: {e}")))?;

        Ok(Account {
            account_number: raw.account_number,
            status: raw.status,
            equity: parse_money(&raw.equity)?,
            cash: parse_money(&raw.cash)?,
            buying_power: parse_money(&raw.buying_power)?,
            portfolio_value: parse_money(&raw.portfolio_value)?,
            pattern_day_trader: raw.pattern_day_trader,
        })
    }

    async fn get_positions(&self) -> EngineResult<Vec<BrokerPosition>> {
        self.trading_limiter.acquire().await;
        let url = format!("{}/v2/positions", self.trading_url);
        let response = self
            .get(&url)
            .send()
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("positions request failed: {e}")))?;
        let response = Self::check_status(response, "get_positions").await?;
        let raw: Vec<RawPosition> = response
            .json()
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("positions decode failed: {e}")))?;

        raw.into_iter()
            .map(|p| {
                Ok(BrokerPosition {
                    symbol: p.symbol,
                    qty: parse_money(&p.qty)?,
                    avg_entry_price: parse_money(&p.avg_entry_price)?,
                    current_price: parse_money(&p.current_price)?,
                    market_value: parse_money(&p.market_value)?,
                    unrealized_pl: parse_money(&p.unrealized_pl)?,
                })
            })
            .collect()
    }

    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<PriceBar>> {
        let mut all_bars = Vec::new();
        let mut page_token: Option<String> = None;

        debug!(symbol, timeframe, "Fetching bars from Alpaca");

        loop {
            self.data_limiter.acquire().await;

            let mut url = format!(
                "{}/v2/stocks/{}/bars?timeframe={}&start={}&end={}&limit={}&adjustment=raw",
                self.data_url,
                symbol,
                timeframe,
                start.to_rfc3339(),
                end.to_rfc3339(),
                MAX_BARS_PER_REQUEST
            );
            if let Some(token) = &page_token {
                url.push_str(&format!("&page_token={token}"));
            }

            let response = self.get(&url).send().await.map_err(|e| {
                EngineError::data_unavailable(symbol, format!("bar request failed: {e}"))
            })?;
            let status = response.status();
            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(EngineError::NotAuthenticated);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(EngineError::data_unavailable(
                    symbol,
                    format!("HTTP {status}: {body}"),
                ));
            }
            let page: BarsResponse = response.json().await.map_err(|e| {
                EngineError::data_unavailable(symbol, format!("bar decode failed: {e}"))
            })?;

            if let Some(bars) = page.bars {
                all_bars.extend(bars.into_iter().map(|b| PriceBar {
                    timestamp: b.t,
                    open: b.o,
                    high: b.h,
                    low: b.l,
                    close: b.c,
                    volume: b.v,
                }));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(symbol, count = all_bars.len(), "Fetched bars");
        Ok(all_bars)
    }

    async fn submit_order(&self, order: &OrderRequest) -> EngineResult<OrderConfirmation> {
        self.trading_limiter.acquire().await;
        let url = format!("{}/v2/orders", self.trading_url);

        // Client order id makes resubmissions traceable in the broker UI
        let client_order_id = format!("tradedesk-{:08x}", rand::random::<u32>());

        let mut body = serde_json::json!({
            "symbol": order.symbol,
            "qty": order.qty.to_string(),
            "side": order.side,
            "type": order.order_type,
            "time_in_force": order.time_in_force,
            "client_order_id": client_order_id,
        });
        if let Some(limit_price) = order.limit_price {
            body["limit_price"] = serde_json::json!(limit_price.to_string());
        }

        let response = self
            .client
            .post(&url)
            .header(KEY_HEADER, &self.api_key)
            .header(SECRET_HEADER, &self.secret_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("order request failed: {e}")))?;
        let response = Self::check_status(response, "submit_order").await?;
        let raw: RawOrder = response
            .json()
            .await
            .map_err(|e| EngineError::ExecutionFailure(format!("order decode failed: {e}")))?;

        let side = match raw.side.as_str() {
            "sell" => OrderSide::Sell,
            _ => OrderSide::Buy,
        };
        let filled_avg_price = match raw.filled_avg_price.as_deref() {
            Some(price) => Some(parse_money(price)?),
            None => None,
        };

        Ok(OrderConfirmation {
            id: raw.id,
            symbol: raw.symbol,
            qty: parse_money(&raw.qty)?,
            side,
            status: raw.status,
            filled_avg_price,
        })
    }

    async fn get_latest_quote(&self, symbol: &str) -> EngineResult<Option<Quote>> {
        self.data_limiter.acquire().await;
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.data_url, symbol);
        let response = self.get(&url).send().await.map_err(|e| {
            EngineError::data_unavailable(symbol, format!("quote request failed: {e}"))
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response, "get_latest_quote").await?;
        let raw: LatestQuoteResponse = response.json().await.map_err(|e| {
            warn!(symbol, error = %e, "quote decode failed");
            EngineError::data_unavailable(symbol, format!("quote decode failed: {e}"))
        })?;

        Ok(raw.quote.map(|q| Quote {
            bid_price: q.bid_price.filter(|p| *p > 0.0),
            ask_price: q.ask_price.filter(|p| *p > 0.0),
            bid_size: q.bid_size,
            ask_size: q.ask_size,
            timestamp: q.timestamp,
        }))
    }

    async fn get_latest_trade(&self, symbol: &str) -> EngineResult<Option<LastTrade>> {
        self.data_limiter.acquire().await;
        let url = format!("{}/v2/stocks/{}/trades/latest", self.data_url, symbol);
        let response = self.get(&url).send().await.map_err(|e| {
            EngineError::data_unavailable(symbol, format!("trade request failed: {e}"))
        })?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::check_status(response, "get_latest_trade").await?;
        let raw: LatestTradeResponse = response.json().await.map_err(|e| {
            EngineError::data_unavailable(symbol, format!("trade decode failed: {e}"))
        })?;

        Ok(raw.trade.map(|t| LastTrade {
            price: t.price,
            size: t.size,
            timestamp: t.timestamp,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_money() {
        assert_eq!(parse_money("100000.25").unwrap(), 100_000.25);
        assert_eq!(parse_money("-42.5").unwrap(), -42.5);
        assert!(parse_money("not-a-number").is_err());
    }

    #[test]
    fn test_raw_quote_reserved_field_name() {
        // "as" is the ask-size key on the wire
        let json = r#"{"bp": 99.5, "ap": 100.5, "bs": 2.0, "as": 3.0, "t": null}"#;
        let quote: RawQuote = serde_json::from_str(json).unwrap();
        assert_eq!(quote.bid_price, Some(99.5));
        assert_eq!(quote.ask_size, Some(3.0));
    }

    #[test]
    fn test_bars_response_tolerates_missing_bars() {
        let page: BarsResponse = serde_json::from_str(r#"{"bars": null}"#).unwrap();
        assert!(page.bars.is_none());
        assert!(page.next_page_token.is_none());
    }

    #[test]
    fn test_credentials_paper_flag_default() {
        let creds = AlpacaCredentials {
            api_key: "k".to_string(),
            secret_key: "s".to_string(),
            paper: true,
        };
        let broker = AlpacaBroker::new(creds);
        assert!(broker.trading_url.contains("paper"));
    }
}
