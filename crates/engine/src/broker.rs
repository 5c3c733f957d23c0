//! Brokerage interface consumed by the engine core
//!
//! The core never implements a brokerage; it consumes this capability set
//! through `Arc<dyn Broker>`. The concrete Alpaca binding lives in
//! `api::alpaca`, and tests use the in-process `MockBroker` below.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::PriceBar;

/// Account snapshot as reported by the brokerage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub account_number: String,
    pub status: String,
    pub equity: f64,
    pub cash: f64,
    pub buying_power: f64,
    pub portfolio_value: f64,
    pub pattern_day_trader: bool,
}

/// A broker-confirmed holding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub qty: f64,
    pub avg_entry_price: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pl: f64,
}

/// Latest NBBO quote; either side may be missing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub bid_size: Option<f64>,
    pub ask_size: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Latest trade print
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastTrade {
    pub price: f64,
    pub size: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "buy"),
            OrderSide::Sell => write!(f, "sell"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// An order to submit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub qty: f64,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub limit_price: Option<f64>,
}

impl OrderRequest {
    /// Market/day order, the shape every scheduler-driven fill uses
    pub fn market(symbol: impl Into<String>, qty: f64, side: OrderSide) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            side,
            order_type: OrderType::Market,
            time_in_force: TimeInForce::Day,
            limit_price: None,
        }
    }
}

/// Brokerage acknowledgement of a submitted order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderConfirmation {
    pub id: String,
    pub symbol: String,
    pub qty: f64,
    pub side: OrderSide,
    pub status: String,
    pub filled_avg_price: Option<f64>,
}

/// Capability set the core consumes and never implements
#[async_trait]
pub trait Broker: Send + Sync {
    async fn get_account(&self) -> EngineResult<Account>;

    async fn get_positions(&self) -> EngineResult<Vec<BrokerPosition>>;

    /// Historical bars, ascending by timestamp. `timeframe` uses broker
    /// notation, e.g. "1Day", "1Hour", "15Min".
    async fn get_bars(
        &self,
        symbol: &str,
        timeframe: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> EngineResult<Vec<PriceBar>>;

    async fn submit_order(&self, order: &OrderRequest) -> EngineResult<OrderConfirmation>;

    async fn get_latest_quote(&self, symbol: &str) -> EngineResult<Option<Quote>>;

    async fn get_latest_trade(&self, symbol: &str) -> EngineResult<Option<LastTrade>>;
}

// ============================================================================
// Test double
// ============================================================================
