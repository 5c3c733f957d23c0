//! Live quote stream over the Alpaca market-data WebSocket
//!
//! Authenticates, subscribes to quote updates for a symbol set, and pushes
//! parsed quotes into an mpsc channel. The position monitor can consume the
//! channel as a push price feed instead of polling; its exit-detection
//! contract does not change either way. Reconnects with a fixed backoff
//! until cancelled.

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

const DEFAULT_STREAM_URL: &str = "wss://stream.data.alpaca.markets/v2/iex";
const RECONNECT_DELAY_SECS: u64 = 5;

/// A pushed quote update
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuoteUpdate {
    pub symbol: String,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
}

/// Connection parameters for the quote stream
#[derive(Debug, Clone)]
pub struct QuoteStreamConfig {
    pub url: String,
    pub api_key: String,
    pub secret_key: String,
    pub symbols: Vec<String>,
}

impl QuoteStreamConfig {
    pub fn new(api_key: String, secret_key: String, symbols: Vec<String>) -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            api_key,
            secret_key,
            symbols,
        }
    }
}

/// Incoming stream message; Alpaca batches these in JSON arrays
#[derive(Debug, Deserialize)]
struct StreamMessage {
    #[serde(rename = "T")]
    message_type: String,
    #[serde(rename = "S")]
    symbol: Option<String>,
    #[serde(rename = "bp")]
    bid_price: Option<f64>,
    #[serde(rename = "ap")]
    ask_price: Option<f64>,
    #[serde(rename = "msg")]
    msg: Option<String>,
}

/// Run the stream until `cancelled` is set, forwarding quotes into `tx`.
/// Dropped receivers also end the loop.
pub async fn run_quote_stream(
    config: QuoteStreamConfig,
    tx: mpsc::Sender<QuoteUpdate>,
    cancelled: Arc<AtomicBool>,
) {
    info!(symbols = config.symbols.len(), "Quote stream starting");

    while !cancelled.load(Ordering::Relaxed) {
        match run_connection(&config, &tx, &cancelled).await {
            Ok(()) => break, // clean shutdown (cancel or receiver gone)
            Err(e) => {
                warn!(error = %e, "Quote stream connection lost, reconnecting");
                for _ in 0..(RECONNECT_DELAY_SECS * 2) {
                    if cancelled.load(Ordering::Relaxed) {
                        break;
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                }
            }
        }
    }

    info!("Quote stream stopped");
}

async fn run_connection(
    config: &QuoteStreamConfig,
    tx: &mpsc::Sender<QuoteUpdate>,
    cancelled: &Arc<AtomicBool>,
) -> anyhow::Result<()> {
    let (ws, _) = connect_async(&config.url).await?;
    let (mut write, mut read) = ws.split();

    let auth = serde_json::json!({
        "action": "auth",
        "key": config.api_key,
        "secret": config.secret_key,
    });
    write.send(Message::Text(auth.to_string())).await?;

    let subscribe = serde_json::json!({
        "action": "subscribe",
        "quotes": config.symbols,
    });
    write.send(Message::Text(subscribe.to_string())).await?;

    while let Some(message) = read.next().await {
        if cancelled.load(Ordering::Relaxed) {
            return Ok(());
        }
        let text = match message? {
            Message::Text(text) => text,
            Message::Ping(payload) => {
                write.send(Message::Pong(payload)).await?;
                continue;
            }
            Message::Close(_) => anyhow::bail!("server closed the stream"),
            _ => continue,
        };

        let batch: Vec<StreamMessage> = match serde_json::from_str(&text) {
            Ok(batch) => batch,
            Err(e) => {
                debug!(error = %e, "skipping unparseable stream message");
                continue;
            }
        };

        for item in batch {
            match item.message_type.as_str() {
                "q" => {
                    let Some(symbol) = item.symbol else { continue };
                    let update = QuoteUpdate {
                        symbol,
                        bid_price: item.bid_price.filter(|p| *p > 0.0),
                        ask_price: item.ask_price.filter(|p| *p > 0.0),
                    };
                    if tx.send(update).await.is_err() {
                        // Receiver gone: nothing left to feed
                        return Ok(());
                    }
                }
                "error" => {
                    anyhow::bail!("stream error: {}", item.msg.unwrap_or_default())
                }
                _ => {} // subscription acks, trade messages we didn't ask for
            }
        }
    }

    anyhow::bail!("stream ended unexpectedly")
}
