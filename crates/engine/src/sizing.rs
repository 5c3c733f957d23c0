//! Position sizing shared by all strategies

use crate::error::{EngineError, EngineResult};

/// Convert a target portfolio allocation into a whole share quantity.
///
/// `quantity = floor(portfolio_value * allocation_pct / 100 / price)`.
/// Returns 0 when the allocation cannot cover a single share, otherwise at
/// least 1. A missing or non-positive portfolio value is a
/// `SizingUnavailable` condition the caller treats as "skip this signal".
pub fn shares_for_allocation(
    price: f64,
    portfolio_value: f64,
    allocation_pct: f64,
) -> EngineResult<f64> {
    if !(allocation_pct > 0.0 && allocation_pct <= 100.0) {
        return Err(EngineError::InvalidAllocation {
            pct: allocation_pct,
        });
    }
    if portfolio_value <= 0.0 {
        return Err(EngineError::SizingUnavailable(format!(
            "portfolio value must be positive, got {portfolio_value}"
        )));
    }
    if price <= 0.0 {
        return Err(EngineError::SizingUnavailable(format!(
            "price must be positive, got {price}"
        )));
    }

    let allocation = portfolio_value * allocation_pct / 100.0;
    if allocation < price {
        return Ok(0.0);
    }
    Ok((allocation / price).floor().max(1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_division() {
        // $1000 portfolio, 10% allocation, $10 price -> exactly 10 shares
        assert_eq!(shares_for_allocation(10.0, 1000.0, 10.0).unwrap(), 10.0);
    }

    #[test]
    fn test_allocation_below_one_share_is_zero() {
        // $100 portfolio, 10% allocation, $1000 price -> can't afford a share
        assert_eq!(shares_for_allocation(1000.0, 100.0, 10.0).unwrap(), 0.0);
    }

    #[test]
    fn test_fractional_allocation_floors() {
        // $10,000 * 10% / $33 = 30.3 -> 30 shares
        assert_eq!(shares_for_allocation(33.0, 10_000.0, 10.0).unwrap(), 30.0);
    }

    #[test]
    fn test_at_least_one_share_when_affordable() {
        // allocation $150 covers exactly one $150 share
        assert_eq!(shares_for_allocation(150.0, 1500.0, 10.0).unwrap(), 1.0);
    }

    #[test]
    fn test_invalid_allocation_pct() {
        assert!(matches!(
            shares_for_allocation(10.0, 1000.0, 0.0),
            Err(EngineError::InvalidAllocation { .. })
        ));
        assert!(matches!(
            shares_for_allocation(10.0, 1000.0, 101.0),
            Err(EngineError::InvalidAllocation { .. })
        ));
        assert!(matches!(
            shares_for_allocation(10.0, 1000.0, -5.0),
            Err(EngineError::InvalidAllocation { .. })
        ));
    }

    #[test]
    fn test_missing_portfolio_value() {
        assert!(matches!(
            shares_for_allocation(10.0, 0.0, 10.0),
            Err(EngineError::SizingUnavailable(_))
        ));
        assert!(matches!(
            shares_for_allocation(10.0, -500.0, 10.0),
            Err(EngineError::SizingUnavailable(_))
        ));
    }

    #[test]
    fn test_non_positive_price() {
        assert!(matches!(
            shares_for_allocation(0.0, 1000.0, 10.0),
            Err(EngineError::SizingUnavailable(_))
        ));
    }

    #[test]
    fn test_full_allocation() {
        assert_eq!(shares_for_allocation(50.0, 1000.0, 100.0).unwrap(), 20.0);
    }
}
