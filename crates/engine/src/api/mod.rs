//! Outbound brokerage bindings: REST client, rate limiting, quote stream

pub mod alpaca;
pub mod limiter;
pub mod stream;

pub use alpaca::{AlpacaBroker, AlpacaCredentials};
pub use limiter::TokenBucket;
pub use stream::{run_quote_stream, QuoteStreamConfig, QuoteUpdate};
