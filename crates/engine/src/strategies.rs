//! Trading strategies
//!
//! Four rule-based strategies behind a single tagged dispatch: momentum
//! breakout, RSI mean reversion, dual moving-average crossover, and
//! Bollinger band bounce. Each kind carries its own parameter struct with
//! documented defaults; caller overrides are merged over the defaults and
//! range-validated at construction. `Strategy::analyze` evaluates every
//! configured symbol once per call using the two most recent bars plus the
//! rolling indicators, and never fails: symbols with insufficient history
//! are skipped, and buy signals that cannot be sized are dropped with a
//! warning.

use crate::error::{EngineError, EngineResult};
use crate::indicators::{rolling_max, rolling_std, rsi, sma};
use crate::sizing::shares_for_allocation;
use crate::types::{MarketData, PriceBar, Signal};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

// ============================================================================
// Strategy kinds
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    MomentumBreakout,
    MeanReversionRsi,
    DualMovingAverage,
    BollingerBounce,
}

impl StrategyKind {
    pub fn all() -> &'static [StrategyKind] {
        &[
            Self::MomentumBreakout,
            Self::MeanReversionRsi,
            Self::DualMovingAverage,
            Self::BollingerBounce,
        ]
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MomentumBreakout => "Momentum Breakout",
            Self::MeanReversionRsi => "Mean Reversion RSI",
            Self::DualMovingAverage => "Dual Moving Average",
            Self::BollingerBounce => "Bollinger Band Bounce",
        }
    }

    /// Stable identifier used on the wire and in storage
    pub fn id(&self) -> &'static str {
        match self {
            Self::MomentumBreakout => "momentum_breakout",
            Self::MeanReversionRsi => "mean_reversion_rsi",
            Self::DualMovingAverage => "dual_moving_average",
            Self::BollingerBounce => "bollinger_bounce",
        }
    }
}

impl std::str::FromStr for StrategyKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "momentum_breakout" => Ok(Self::MomentumBreakout),
            "mean_reversion_rsi" => Ok(Self::MeanReversionRsi),
            "dual_moving_average" => Ok(Self::DualMovingAverage),
            "bollinger_bounce" => Ok(Self::BollingerBounce),
            other => Err(EngineError::validation(format!(
                "unknown strategy type: {other}"
            ))),
        }
    }
}

// ============================================================================
// Parameters
// ============================================================================

/// Per-kind parameter set with documented defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyParams {
    MomentumBreakout {
        /// Days of highs to look back for the breakout level (default: 20)
        lookback_period: usize,
        /// Volume must exceed this multiple of average volume (default: 1.5)
        volume_multiplier: f64,
        /// Percentage of portfolio per entry (default: 10)
        position_size_pct: f64,
        /// Stop loss percentage below entry (default: 5)
        stop_loss_pct: f64,
        /// Take profit percentage above entry (default: 15)
        take_profit_pct: f64,
    },
    MeanReversionRsi {
        /// RSI calculation period (default: 14)
        rsi_period: usize,
        /// Oversold threshold (default: 30)
        rsi_oversold: f64,
        /// Overbought threshold (default: 70)
        rsi_overbought: f64,
        /// Trend-filter moving average period (default: 200)
        ma_period: usize,
        /// Percentage of portfolio per entry (default: 10)
        position_size_pct: f64,
    },
    DualMovingAverage {
        /// Fast moving average period (default: 50)
        fast_ma: usize,
        /// Slow moving average period (default: 200)
        slow_ma: usize,
        /// Trend filter MA period (default: 20)
        trend_ma: usize,
        /// Percentage of portfolio per entry (default: 20)
        position_size_pct: f64,
    },
    BollingerBounce {
        /// Band period (default: 20)
        bb_period: usize,
        /// Band width in standard deviations (default: 2.0)
        bb_std_dev: f64,
        /// Percentage of portfolio per entry (default: 10)
        position_size_pct: f64,
    },
}

impl StrategyParams {
    pub fn default_for(kind: StrategyKind) -> Self {
        match kind {
            StrategyKind::MomentumBreakout => Self::MomentumBreakout {
                lookback_period: 20,
                volume_multiplier: 1.5,
                position_size_pct: 10.0,
                stop_loss_pct: 5.0,
                take_profit_pct: 15.0,
            },
            StrategyKind::MeanReversionRsi => Self::MeanReversionRsi {
                rsi_period: 14,
                rsi_oversold: 30.0,
                rsi_overbought: 70.0,
                ma_period: 200,
                position_size_pct: 10.0,
            },
            StrategyKind::DualMovingAverage => Self::DualMovingAverage {
                fast_ma: 50,
                slow_ma: 200,
                trend_ma: 20,
                position_size_pct: 20.0,
            },
            StrategyKind::BollingerBounce => Self::BollingerBounce {
                bb_period: 20,
                bb_std_dev: 2.0,
                position_size_pct: 10.0,
            },
        }
    }

    /// Merge caller overrides over the defaults for `kind`.
    ///
    /// Unknown keys are rejected; a wrong-typed value surfaces as a
    /// `Validation` error.
    pub fn merged(
        kind: StrategyKind,
        overrides: &HashMap<String, Value>,
    ) -> EngineResult<Self> {
        let mut merged = match serde_json::to_value(Self::default_for(kind)) {
            Ok(Value::Object(map)) => map,
            _ => unreachable!("params always serialize to an object"),
        };

        for (key, value) in overrides {
            if !merged.contains_key(key.as_str()) {
                return Err(EngineError::validation(format!(
                    "unknown parameter '{key}' for strategy {}",
                    kind.id()
                )));
            }
            merged.insert(key.clone(), value.clone());
        }

        serde_json::from_value(Value::Object(merged)).map_err(|e| {
            EngineError::validation(format!("invalid parameters for {}: {e}", kind.id()))
        })
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            Self::MomentumBreakout { .. } => StrategyKind::MomentumBreakout,
            Self::MeanReversionRsi { .. } => StrategyKind::MeanReversionRsi,
            Self::DualMovingAverage { .. } => StrategyKind::DualMovingAverage,
            Self::BollingerBounce { .. } => StrategyKind::BollingerBounce,
        }
    }

    pub fn position_size_pct(&self) -> f64 {
        match self {
            Self::MomentumBreakout {
                position_size_pct, ..
            }
            | Self::MeanReversionRsi {
                position_size_pct, ..
            }
            | Self::DualMovingAverage {
                position_size_pct, ..
            }
            | Self::BollingerBounce {
                position_size_pct, ..
            } => *position_size_pct,
        }
    }

    /// Bars required before this parameter set can produce a signal
    pub fn min_history(&self) -> usize {
        match self {
            Self::MomentumBreakout {
                lookback_period, ..
            } => lookback_period + 1,
            Self::MeanReversionRsi { ma_period, .. } => *ma_period,
            Self::DualMovingAverage { slow_ma, .. } => slow_ma + 1,
            Self::BollingerBounce { bb_period, .. } => bb_period + 2,
        }
    }

    /// Range-validate every parameter
    pub fn validate(&self) -> EngineResult<()> {
        let pct = self.position_size_pct();
        if !(pct > 0.0 && pct <= 100.0) {
            return Err(EngineError::validation(format!(
                "position_size_pct must be in (0, 100], got {pct}"
            )));
        }

        match self {
            Self::MomentumBreakout {
                lookback_period,
                volume_multiplier,
                stop_loss_pct,
                take_profit_pct,
                ..
            } => {
                if !(5..=100).contains(lookback_period) {
                    return Err(EngineError::validation(format!(
                        "lookback_period must be in [5, 100], got {lookback_period}"
                    )));
                }
                if !(1.0..=5.0).contains(volume_multiplier) {
                    return Err(EngineError::validation(format!(
                        "volume_multiplier must be in [1.0, 5.0], got {volume_multiplier}"
                    )));
                }
                if !(0.0..100.0).contains(stop_loss_pct) || *stop_loss_pct == 0.0 {
                    return Err(EngineError::validation(format!(
                        "stop_loss_pct must be in (0, 100), got {stop_loss_pct}"
                    )));
                }
                if *take_profit_pct <= 0.0 {
                    return Err(EngineError::validation(format!(
                        "take_profit_pct must be positive, got {take_profit_pct}"
                    )));
                }
            }
            Self::MeanReversionRsi {
                rsi_period,
                rsi_oversold,
                rsi_overbought,
                ma_period,
                ..
            } => {
                if !(5..=50).contains(rsi_period) {
                    return Err(EngineError::validation(format!(
                        "rsi_period must be in [5, 50], got {rsi_period}"
                    )));
                }
                if !(10.0..=40.0).contains(rsi_oversold) {
                    return Err(EngineError::validation(format!(
                        "rsi_oversold must be in [10, 40], got {rsi_oversold}"
                    )));
                }
                if !(60.0..=90.0).contains(rsi_overbought) {
                    return Err(EngineError::validation(format!(
                        "rsi_overbought must be in [60, 90], got {rsi_overbought}"
                    )));
                }
                if !(50..=300).contains(ma_period) {
                    return Err(EngineError::validation(format!(
                        "ma_period must be in [50, 300], got {ma_period}"
                    )));
                }
            }
            Self::DualMovingAverage {
                fast_ma,
                slow_ma,
                trend_ma,
                ..
            } => {
                if fast_ma >= slow_ma {
                    return Err(EngineError::validation(format!(
                        "fast_ma ({fast_ma}) must be less than slow_ma ({slow_ma})"
                    )));
                }
                if !(5..=200).contains(fast_ma) {
                    return Err(EngineError::validation(format!(
                        "fast_ma must be in [5, 200], got {fast_ma}"
                    )));
                }
                if !(50..=500).contains(slow_ma) {
                    return Err(EngineError::validation(format!(
                        "slow_ma must be in [50, 500], got {slow_ma}"
                    )));
                }
                if *trend_ma == 0 {
                    return Err(EngineError::validation(
                        "trend_ma must be at least 1".to_string(),
                    ));
                }
            }
            Self::BollingerBounce {
                bb_period,
                bb_std_dev,
                ..
            } => {
                if !(10..=100).contains(bb_period) {
                    return Err(EngineError::validation(format!(
                        "bb_period must be in [10, 100], got {bb_period}"
                    )));
                }
                if !(1.0..=3.0).contains(bb_std_dev) {
                    return Err(EngineError::validation(format!(
                        "bb_std_dev must be in [1.0, 3.0], got {bb_std_dev}"
                    )));
                }
            }
        }

        Ok(())
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// A configured strategy instance: kind + symbols + validated parameters
#[derive(Debug, Clone)]
pub struct Strategy {
    kind: StrategyKind,
    symbols: Vec<String>,
    params: StrategyParams,
}

impl Strategy {
    /// Build a strategy from caller overrides merged over the kind's defaults
    pub fn new(
        kind: StrategyKind,
        symbols: Vec<String>,
        overrides: &HashMap<String, Value>,
    ) -> EngineResult<Self> {
        let params = StrategyParams::merged(kind, overrides)?;
        Self::with_params(symbols, params)
    }

    /// Build a strategy from an explicit parameter set
    pub fn with_params(symbols: Vec<String>, params: StrategyParams) -> EngineResult<Self> {
        if symbols.is_empty() {
            return Err(EngineError::validation(
                "a strategy needs at least one symbol".to_string(),
            ));
        }
        params.validate()?;
        Ok(Self {
            kind: params.kind(),
            symbols,
            params,
        })
    }

    pub fn kind(&self) -> StrategyKind {
        self.kind
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn params(&self) -> &StrategyParams {
        &self.params
    }

    pub fn min_history(&self) -> usize {
        self.params.min_history()
    }

    /// Evaluate every configured symbol against its bar history and return
    /// trade signals. Symbols missing from `history` or with fewer bars
    /// than the strategy's window are skipped for this cycle. Buy signals
    /// that cannot be sized (no portfolio value, allocation below one
    /// share) are dropped with a log line, not an error.
    pub fn analyze(&self, history: &MarketData, portfolio_value: Option<f64>) -> Vec<Signal> {
        let mut signals = Vec::new();

        for symbol in &self.symbols {
            let Some(bars) = history.get(symbol) else {
                continue;
            };
            if bars.len() < self.params.min_history() {
                continue;
            }

            match &self.params {
                StrategyParams::MomentumBreakout { .. } => {
                    self.analyze_momentum(symbol, bars, portfolio_value, &mut signals)
                }
                StrategyParams::MeanReversionRsi { .. } => {
                    self.analyze_mean_reversion(symbol, bars, portfolio_value, &mut signals)
                }
                StrategyParams::DualMovingAverage { .. } => {
                    self.analyze_dual_ma(symbol, bars, portfolio_value, &mut signals)
                }
                StrategyParams::BollingerBounce { .. } => {
                    self.analyze_bollinger(symbol, bars, portfolio_value, &mut signals)
                }
            }
        }

        signals
    }

    /// Size a buy or drop it: sizing failures cost the signal, never the cycle
    fn size_or_skip(&self, symbol: &str, price: f64, portfolio_value: Option<f64>) -> Option<f64> {
        let pct = self.params.position_size_pct();
        match shares_for_allocation(price, portfolio_value.unwrap_or(0.0), pct) {
            Ok(qty) if qty > 0.0 => Some(qty),
            Ok(_) => {
                debug!(symbol, price, pct, "allocation below one share, skipping buy");
                None
            }
            Err(e) => {
                warn!(symbol, error = %e, "cannot size buy signal, skipping");
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Momentum breakout: close above the prior N-day high on elevated volume
    // ------------------------------------------------------------------
    fn analyze_momentum(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        portfolio_value: Option<f64>,
        out: &mut Vec<Signal>,
    ) {
        let StrategyParams::MomentumBreakout {
            lookback_period,
            volume_multiplier,
            stop_loss_pct,
            take_profit_pct,
            ..
        } = &self.params
        else {
            return;
        };

        let highs: Vec<f64> = bars.iter().map(|b| b.high).collect();
        let volumes: Vec<f64> = bars.iter().map(|b| b.volume).collect();
        let high_n = rolling_max(&highs, *lookback_period);
        let avg_volume = sma(&volumes, *lookback_period);

        let last = bars.len() - 1;
        let current = &bars[last];
        let (Some(prior_high), Some(avg_vol)) = (high_n[last - 1], avg_volume[last]) else {
            return;
        };

        let breakout =
            current.close > prior_high && current.volume > volume_multiplier * avg_vol;
        if !breakout {
            return;
        }

        let Some(quantity) = self.size_or_skip(symbol, current.close, portfolio_value) else {
            return;
        };

        let stop_loss = current.close * (1.0 - stop_loss_pct / 100.0);
        let take_profit = current.close * (1.0 + take_profit_pct / 100.0);
        out.push(
            Signal::buy(
                symbol,
                quantity,
                format!(
                    "Momentum breakout: close {:.2} > {}d high {:.2}",
                    current.close, lookback_period, prior_high
                ),
            )
            .with_meta("entry_price", current.close)
            .with_meta("stop_loss", stop_loss)
            .with_meta("take_profit", take_profit),
        );
    }

    // ------------------------------------------------------------------
    // RSI mean reversion: buy oversold above the trend MA, sell overbought
    // ------------------------------------------------------------------
    fn analyze_mean_reversion(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        portfolio_value: Option<f64>,
        out: &mut Vec<Signal>,
    ) {
        let StrategyParams::MeanReversionRsi {
            rsi_period,
            rsi_oversold,
            rsi_overbought,
            ma_period,
            ..
        } = &self.params
        else {
            return;
        };

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let rsi_values = rsi(&closes, *rsi_period);
        let ma_values = sma(&closes, *ma_period);

        let last = bars.len() - 1;
        let current = &bars[last];
        let (Some(current_rsi), Some(current_ma)) = (rsi_values[last], ma_values[last]) else {
            return;
        };

        if current_rsi < *rsi_oversold && current.close > current_ma {
            let Some(quantity) = self.size_or_skip(symbol, current.close, portfolio_value) else {
                return;
            };
            out.push(
                Signal::buy(
                    symbol,
                    quantity,
                    format!(
                        "RSI oversold: {:.1} < {}, price above {}d MA",
                        current_rsi, rsi_oversold, ma_period
                    ),
                )
                .with_meta("rsi", current_rsi)
                .with_meta("ma", current_ma)
                .with_meta("entry_price", current.close),
            );
        } else if current_rsi > *rsi_overbought {
            out.push(
                Signal::sell(
                    symbol,
                    0.0,
                    format!("RSI overbought: {:.1} > {}", current_rsi, rsi_overbought),
                )
                .with_meta("rsi", current_rsi),
            );
        }
    }

    // ------------------------------------------------------------------
    // Dual MA: golden cross buys (with trend filter), death cross sells
    // ------------------------------------------------------------------
    fn analyze_dual_ma(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        portfolio_value: Option<f64>,
        out: &mut Vec<Signal>,
    ) {
        let StrategyParams::DualMovingAverage {
            fast_ma,
            slow_ma,
            trend_ma,
            ..
        } = &self.params
        else {
            return;
        };

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let fast = sma(&closes, *fast_ma);
        let slow = sma(&closes, *slow_ma);
        let trend = sma(&closes, *trend_ma);

        let last = bars.len() - 1;
        let current = &bars[last];
        let (Some(fast_now), Some(slow_now), Some(fast_prev), Some(slow_prev)) =
            (fast[last], slow[last], fast[last - 1], slow[last - 1])
        else {
            return;
        };

        let golden_cross = fast_prev <= slow_prev && fast_now > slow_now;
        let death_cross = fast_prev >= slow_prev && fast_now < slow_now;

        if golden_cross {
            // Trend filter: only take the cross when price sits above the trend MA
            let Some(trend_now) = trend[last] else {
                return;
            };
            if current.close <= trend_now {
                return;
            }
            let Some(quantity) = self.size_or_skip(symbol, current.close, portfolio_value) else {
                return;
            };
            out.push(
                Signal::buy(
                    symbol,
                    quantity,
                    format!(
                        "Golden cross: {}d MA crossed above {}d MA, price above {}d trend filter",
                        fast_ma, slow_ma, trend_ma
                    ),
                )
                .with_meta("fast_ma", fast_now)
                .with_meta("slow_ma", slow_now)
                .with_meta("entry_price", current.close),
            );
        } else if death_cross {
            out.push(
                Signal::sell(
                    symbol,
                    0.0,
                    format!(
                        "Death cross: {}d MA crossed below {}d MA",
                        fast_ma, slow_ma
                    ),
                )
                .with_meta("fast_ma", fast_now)
                .with_meta("slow_ma", slow_now),
            );
        }
    }

    // ------------------------------------------------------------------
    // Bollinger bounce: confirmed recovery off the lower band buys,
    // upper band or middle cross from below sells
    // ------------------------------------------------------------------
    fn analyze_bollinger(
        &self,
        symbol: &str,
        bars: &[PriceBar],
        portfolio_value: Option<f64>,
        out: &mut Vec<Signal>,
    ) {
        let StrategyParams::BollingerBounce {
            bb_period,
            bb_std_dev,
            ..
        } = &self.params
        else {
            return;
        };

        let closes: Vec<f64> = bars.iter().map(|b| b.close).collect();
        let middle = sma(&closes, *bb_period);
        let std = rolling_std(&closes, *bb_period);

        let last = bars.len() - 1;
        let current = &bars[last];
        let previous = &bars[last - 1];
        let (Some(mid_now), Some(std_now), Some(mid_prev), Some(std_prev)) =
            (middle[last], std[last], middle[last - 1], std[last - 1])
        else {
            return;
        };

        let upper_now = mid_now + bb_std_dev * std_now;
        let lower_now = mid_now - bb_std_dev * std_now;
        let lower_prev = mid_prev - bb_std_dev * std_prev;

        // A bounce, not a breakout: previous close at/below the lower band,
        // current close recovered above it but still under the middle
        let bounce = previous.close <= lower_prev
            && current.close > lower_now
            && current.close < mid_now;

        if bounce {
            let Some(quantity) = self.size_or_skip(symbol, current.close, portfolio_value) else {
                return;
            };
            out.push(
                Signal::buy(
                    symbol,
                    quantity,
                    format!(
                        "Bollinger bounce: price recovered above lower band {:.2}",
                        lower_now
                    ),
                )
                .with_meta("entry_price", current.close)
                .with_meta("lower_band", lower_now)
                .with_meta("upper_band", upper_now)
                .with_meta("sma", mid_now),
            );
        } else if current.close >= upper_now
            || (previous.close < mid_prev && current.close >= mid_now)
        {
            out.push(
                Signal::sell(
                    symbol,
                    0.0,
                    "Bollinger exit: price reached upper band or crossed the middle".to_string(),
                )
                .with_meta("exit_price", current.close)
                .with_meta("upper_band", upper_now),
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
