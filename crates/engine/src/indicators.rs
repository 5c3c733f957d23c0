//! Rolling-window indicator math consumed by the strategies
//!
//! Every function takes an ordered series and returns a sequence of the
//! same length; leading entries are `None` until the trailing window is
//! full. Inputs shorter than the window yield all-`None` output rather
//! than an error, so callers can probe "not yet available" instead of
//! handling failures. All functions are pure and deterministic.

/// Trailing simple moving average over `window` points.
pub fn sma(series: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    if window == 0 || series.len() < window {
        return out;
    }
    for i in (window - 1)..series.len() {
        let sum: f64 = series[i + 1 - window..=i].iter().sum();
        out[i] = Some(sum / window as f64);
    }
    out
}

/// Trailing population standard deviation over `window` points.
pub fn rolling_std(series: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    if window == 0 || series.len() < window {
        return out;
    }
    for i in (window - 1)..series.len() {
        let slice = &series[i + 1 - window..=i];
        let mean = slice.iter().sum::<f64>() / window as f64;
        let variance = slice.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / window as f64;
        out[i] = Some(variance.sqrt());
    }
    out
}

/// Relative strength index over `period` per-step deltas.
///
/// gain = simple mean of positive deltas, loss = simple mean of absolute
/// negative deltas; `rsi = 100 - 100 / (1 + gain/loss)`, defined as 100
/// when the loss side is zero. First defined at index `period` (one delta
/// per step, `period` deltas per window).
pub fn rsi(series: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    if period == 0 || series.len() < period + 1 {
        return out;
    }
    let deltas: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();
    for i in period..series.len() {
        // deltas[i - period..i] are the steps ending at series[i]
        let window = &deltas[i - period..i];
        let gain: f64 = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss: f64 = window.iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;
        out[i] = Some(if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        });
    }
    out
}

/// Trailing maximum over `window` points, used for breakout detection.
pub fn rolling_max(series: &[f64], window: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; series.len()];
    if window == 0 || series.len() < window {
        return out;
    }
    for i in (window - 1)..series.len() {
        let max = series[i + 1 - window..=i]
            .iter()
            .copied()
            .fold(f64::MIN, f64::max);
        out[i] = Some(max);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_sma_basic() {
        let values = sma(&[1.0, 2.0, 3.0, 4.0, 5.0], 3);
        assert_eq!(values.len(), 5);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert_close(values[2].unwrap(), 2.0);
        assert_close(values[3].unwrap(), 3.0);
        assert_close(values[4].unwrap(), 4.0);
    }

    #[test]
    fn test_sma_short_series_is_all_none() {
        let values = sma(&[1.0, 2.0], 5);
        assert_eq!(values, vec![None, None]);
    }

    #[test]
    fn test_sma_window_equals_length() {
        let values = sma(&[2.0, 4.0, 6.0], 3);
        assert_eq!(values[..2], [None, None]);
        assert_close(values[2].unwrap(), 4.0);
    }

    #[test]
    fn test_rolling_std_constant_series_is_zero() {
        let values = rolling_std(&[7.0; 10], 4);
        for v in values.iter().skip(3) {
            assert_close(v.unwrap(), 0.0);
        }
    }

    #[test]
    fn test_rolling_std_known_value() {
        // population std of [2, 4, 4, 4, 5, 5, 7, 9] is exactly 2
        let series = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let values = rolling_std(&series, 8);
        assert_close(values[7].unwrap(), 2.0);
    }

    #[test]
    fn test_rsi_bounds() {
        // Pseudo-random walk: RSI must stay within [0, 100]
        let mut series = vec![100.0];
        let mut x: u64 = 12345;
        for _ in 0..200 {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let step = ((x >> 33) % 400) as f64 / 100.0 - 2.0;
            let prev = *series.last().unwrap();
            series.push(prev + step);
        }
        for value in rsi(&series, 14).into_iter().flatten() {
            assert!((0.0..=100.0).contains(&value), "RSI out of bounds: {value}");
        }
    }

    #[test]
    fn test_rsi_is_100_when_no_losses() {
        let series: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let values = rsi(&series, 14);
        assert_eq!(values[13], None);
        assert_close(values[14].unwrap(), 100.0);
        assert_close(values[29].unwrap(), 100.0);
    }

    #[test]
    fn test_rsi_is_0_when_no_gains() {
        let series: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let values = rsi(&series, 14);
        assert_close(values.last().unwrap().unwrap(), 0.0);
    }

    #[test]
    fn test_rsi_known_value() {
        // Alternating +2/-1 deltas over a 4-step window: gain = 4/4, loss = 2/4
        // rs = 2, rsi = 100 - 100/3
        let series = [10.0, 12.0, 11.0, 13.0, 12.0];
        let values = rsi(&series, 4);
        assert_close(values[4].unwrap(), 100.0 - 100.0 / 3.0);
    }

    #[test]
    fn test_rsi_short_series_is_all_none() {
        let values = rsi(&[1.0, 2.0, 3.0], 14);
        assert!(values.iter().all(|v| v.is_none()));
    }

    #[test]
    fn test_rolling_max() {
        let values = rolling_max(&[3.0, 1.0, 4.0, 1.0, 5.0, 9.0, 2.0], 3);
        assert_eq!(values[0], None);
        assert_eq!(values[1], None);
        assert_close(values[2].unwrap(), 4.0);
        assert_close(values[3].unwrap(), 4.0);
        assert_close(values[4].unwrap(), 5.0);
        assert_close(values[5].unwrap(), 9.0);
        assert_close(values[6].unwrap(), 9.0);
    }

    #[test]
    fn test_zero_window_is_all_none() {
        assert!(sma(&[1.0, 2.0], 0).iter().all(|v| v.is_none()));
        assert!(rolling_std(&[1.0, 2.0], 0).iter().all(|v| v.is_none()));
        assert!(rsi(&[1.0, 2.0], 0).iter().all(|v| v.is_none()));
        assert!(rolling_max(&[1.0, 2.0], 0).iter().all(|v| v.is_none()));
    }
}
