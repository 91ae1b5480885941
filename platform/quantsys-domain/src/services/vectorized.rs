//! Close-to-close backtest over a matrix of prices and target weights.
//!
//! Much faster than the event engine and cost-free; useful as a sanity check
//! for weight-based strategies.

use crate::value_objects::equity_point::EquityPoint;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub timestamp: i64,
    pub prices: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRow {
    pub timestamp: i64,
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorizedResult {
    pub equity_curve: Vec<EquityPoint>,
    pub returns: Vec<f64>,
}

/// Weights held at row `i - 1` earn the returns of row `i`. A weight row
/// with no match in `prices` is ignored; a missing weight counts as zero.
pub fn run_vectorized(
    prices: &[PriceRow],
    weights: &[WeightRow],
    initial_capital: f64,
) -> Result<VectorizedResult, String> {
    if !initial_capital.is_finite() || initial_capital <= 0.0 {
        return Err("initial_capital must be finite and > 0".to_string());
    }
    let instruments: Vec<&String> = prices
        .first()
        .map(|row| row.prices.keys().collect())
        .unwrap_or_default();
    if instruments.is_empty() {
        return Err("no instruments provided".to_string());
    }
    for pair in prices.windows(2) {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(format!(
                "price rows must be strictly increasing (got {} after {})",
                pair[1].timestamp, pair[0].timestamp
            ));
        }
    }
    for row in prices {
        for instrument in &instruments {
            match row.prices.get(*instrument) {
                Some(price) if price.is_finite() && *price > 0.0 => {}
                Some(price) => {
                    return Err(format!(
                        "invalid price {price} for {instrument} at {}",
                        row.timestamp
                    ))
                }
                None => {
                    return Err(format!(
                        "missing price for {instrument} at {}",
                        row.timestamp
                    ))
                }
            }
        }
    }

    let by_ts: BTreeMap<i64, &BTreeMap<String, f64>> = weights
        .iter()
        .map(|row| (row.timestamp, &row.weights))
        .collect();
    let empty = BTreeMap::new();

    let mut equity = initial_capital;
    let mut returns = Vec::with_capacity(prices.len());
    let mut curve = Vec::with_capacity(prices.len());
    for (i, row) in prices.iter().enumerate() {
        let period_return = if i == 0 {
            0.0
        } else {
            let previous = &prices[i - 1];
            let held = by_ts.get(&previous.timestamp).copied().unwrap_or(&empty);
            instruments
                .iter()
                .map(|instrument| {
                    let weight = held.get(*instrument).copied().unwrap_or(0.0);
                    let r = row.prices[*instrument] / previous.prices[*instrument] - 1.0;
                    weight * r
                })
                .sum()
        };
        equity *= 1.0 + period_return;
        returns.push(period_return);
        curve.push(EquityPoint {
            timestamp: row.timestamp,
            equity,
            cash: equity,
            gross_exposure: 0.0,
            realized_pnl: equity - initial_capital,
            unrealized_pnl: 0.0,
        });
    }

    Ok(VectorizedResult {
        equity_curve: curve,
        returns,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prices(ts: i64, a: f64, b: f64) -> PriceRow {
        PriceRow {
            timestamp: ts,
            prices: BTreeMap::from([("AAA".to_string(), a), ("BBB".to_string(), b)]),
        }
    }

    fn weights(ts: i64, a: f64, b: f64) -> WeightRow {
        WeightRow {
            timestamp: ts,
            weights: BTreeMap::from([("AAA".to_string(), a), ("BBB".to_string(), b)]),
        }
    }

    #[test]
    fn weights_are_lagged_one_row() {
        let rows = vec![prices(1, 100.0, 50.0), prices(2, 110.0, 50.0), prices(3, 110.0, 55.0)];
        // Switching to BBB at row 2 only affects the return of row 3.
        let signals = vec![weights(1, 1.0, 0.0), weights(2, 0.0, 1.0)];
        let result = run_vectorized(&rows, &signals, 1_000.0).expect("run");
        assert_eq!(result.returns.len(), 3);
        assert_eq!(result.returns[0], 0.0);
        assert!((result.returns[1] - 0.10).abs() < 1e-12);
        assert!((result.returns[2] - 0.10).abs() < 1e-12);
        assert!((result.equity_curve[2].equity - 1_210.0).abs() < 1e-9);
    }

    #[test]
    fn missing_weights_mean_flat() {
        let rows = vec![prices(1, 100.0, 50.0), prices(2, 200.0, 10.0)];
        let result = run_vectorized(&rows, &[], 500.0).expect("run");
        assert_eq!(result.equity_curve[1].equity, 500.0);
    }

    #[test]
    fn rejects_empty_or_invalid_input() {
        assert!(run_vectorized(&[], &[], 1.0).is_err());
        assert!(run_vectorized(&[prices(1, 1.0, 1.0)], &[], 0.0).is_err());
        assert!(run_vectorized(&[prices(2, 1.0, 1.0), prices(1, 1.0, 1.0)], &[], 1.0).is_err());
        assert!(run_vectorized(&[prices(1, 1.0, f64::NAN)], &[], 1.0).is_err());
    }
}
