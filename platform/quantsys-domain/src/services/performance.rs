use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::fill::Fill;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Annual rate; converted to a per-period rate internally.
    pub risk_free_rate: f64,
    pub periods_per_year: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.0,
            periods_per_year: 252.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub periods: usize,
    pub initial_equity: f64,
    pub final_equity: f64,
    pub net_profit: f64,
    pub total_return: f64,
    pub cagr: f64,
    pub volatility: f64,
    pub sharpe: f64,
    pub sortino: f64,
    /// Peak-to-trough decline as a non-positive fraction.
    pub max_drawdown: f64,
    pub trades: usize,
    pub closed_trades: usize,
    pub win_rate: f64,
    pub total_commission: f64,
    pub total_slippage: f64,
}

/// Summarizes an equity curve whose first point is the baseline.
pub fn summarize(
    curve: &[EquityPoint],
    fills: &[Fill],
    config: &PerformanceConfig,
) -> PerformanceSummary {
    let (initial_equity, final_equity) = match (curve.first(), curve.last()) {
        (Some(first), Some(last)) => (first.equity, last.equity),
        _ => (0.0, 0.0),
    };
    let returns = period_returns(curve);
    let periods = returns.len();
    let ppy = if config.periods_per_year > 0.0 {
        config.periods_per_year
    } else {
        252.0
    };
    let rf_period = config.risk_free_rate / ppy;

    let total_return = if initial_equity > 0.0 {
        final_equity / initial_equity - 1.0
    } else {
        0.0
    };
    let cagr = compound_annual_growth(initial_equity, final_equity, periods, ppy);

    let std = sample_std(&returns);
    let volatility = std.map(|s| s * ppy.sqrt()).unwrap_or(0.0);
    let mean_excess = if periods > 0 {
        returns.iter().map(|r| r - rf_period).sum::<f64>() / periods as f64
    } else {
        0.0
    };
    let sharpe = match std {
        Some(s) if s > 0.0 => mean_excess / s * ppy.sqrt(),
        _ => 0.0,
    };
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let sortino = match sample_std(&downside) {
        Some(s) if s > 0.0 => mean_excess / s * ppy.sqrt(),
        _ => 0.0,
    };

    let (closed_trades, wins) = closed_trade_outcomes(fills);
    let win_rate = if closed_trades == 0 {
        0.0
    } else {
        wins as f64 / closed_trades as f64
    };

    PerformanceSummary {
        periods,
        initial_equity,
        final_equity,
        net_profit: final_equity - initial_equity,
        total_return,
        cagr,
        volatility,
        sharpe,
        sortino,
        max_drawdown: max_drawdown(curve),
        trades: fills.len(),
        closed_trades,
        win_rate,
        total_commission: fills.iter().map(|f| f.commission).sum(),
        total_slippage: fills.iter().map(|f| f.slippage_cost).sum(),
    }
}

pub fn period_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .filter(|pair| pair[0].equity > 0.0)
        .map(|pair| pair[1].equity / pair[0].equity - 1.0)
        .collect()
}

pub fn max_drawdown(curve: &[EquityPoint]) -> f64 {
    let mut peak = f64::NEG_INFINITY;
    let mut worst = 0.0f64;
    for point in curve {
        peak = peak.max(point.equity);
        if peak > 0.0 {
            worst = worst.min(point.equity / peak - 1.0);
        }
    }
    worst
}

fn compound_annual_growth(initial: f64, last: f64, periods: usize, ppy: f64) -> f64 {
    if periods == 0 || initial <= 0.0 {
        return 0.0;
    }
    let growth = last / initial;
    if growth <= 0.0 {
        return -1.0;
    }
    let years = periods as f64 / ppy;
    growth.powf(1.0 / years) - 1.0
}

fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let var = values
        .iter()
        .map(|v| {
            let diff = v - mean;
            diff * diff
        })
        .sum::<f64>()
        / (values.len() as f64 - 1.0);
    Some(var.sqrt())
}

/// Counts fills that reduced an existing position and how many of those
/// realized a gain.
fn closed_trade_outcomes(fills: &[Fill]) -> (usize, usize) {
    let mut held: BTreeMap<&str, f64> = BTreeMap::new();
    let mut closed = 0usize;
    let mut wins = 0usize;
    for fill in fills {
        let qty = held.entry(fill.instrument.as_str()).or_insert(0.0);
        let signed = fill.side.sign() * fill.quantity;
        if *qty != 0.0 && qty.signum() != signed.signum() {
            closed += 1;
            if fill.realized_pnl > 0.0 {
                wins += 1;
            }
        }
        *qty += signed;
        if qty.abs() < 1e-9 {
            *qty = 0.0;
        }
    }
    (closed, wins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::side::Side;

    fn point(ts: i64, equity: f64) -> EquityPoint {
        EquityPoint {
            timestamp: ts,
            equity,
            cash: equity,
            gross_exposure: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }

    fn fill(side: Side, qty: f64, price: f64, realized: f64) -> Fill {
        Fill {
            order_id: 1,
            instrument: "AAA".to_string(),
            side,
            quantity: qty,
            price,
            reference_price: price,
            commission: 1.0,
            slippage_cost: 0.5,
            realized_pnl: realized,
            timestamp: 1,
        }
    }

    #[test]
    fn computes_net_profit_and_drawdown() {
        let curve = vec![point(0, 100.0), point(1, 80.0), point(2, 120.0)];
        let summary = summarize(&curve, &[], &PerformanceConfig::default());
        assert_eq!(summary.periods, 2);
        assert_eq!(summary.net_profit, 20.0);
        assert!((summary.max_drawdown + 0.2).abs() < 1e-12);
        assert!((summary.total_return - 0.2).abs() < 1e-12);
    }

    #[test]
    fn cagr_annualizes_by_periods_per_year() {
        let curve = vec![point(0, 100.0), point(1, 110.0)];
        let summary = summarize(
            &curve,
            &[],
            &PerformanceConfig {
                risk_free_rate: 0.0,
                periods_per_year: 1.0,
            },
        );
        assert!((summary.cagr - 0.1).abs() < 1e-12);
    }

    #[test]
    fn flat_curve_has_zero_ratios() {
        let curve = vec![point(0, 100.0), point(1, 100.0), point(2, 100.0)];
        let summary = summarize(&curve, &[], &PerformanceConfig::default());
        assert_eq!(summary.sharpe, 0.0);
        assert_eq!(summary.sortino, 0.0);
        assert_eq!(summary.max_drawdown, 0.0);
    }

    #[test]
    fn baseline_only_curve_is_well_defined() {
        let summary = summarize(&[point(0, 100.0)], &[], &PerformanceConfig::default());
        assert_eq!(summary.periods, 0);
        assert_eq!(summary.cagr, 0.0);
        assert_eq!(summary.final_equity, 100.0);
    }

    #[test]
    fn win_rate_counts_position_reducing_fills() {
        let fills = vec![
            fill(Side::Buy, 2.0, 100.0, 0.0),
            fill(Side::Sell, 1.0, 120.0, 20.0),
            fill(Side::Sell, 1.0, 90.0, -10.0),
        ];
        let summary = summarize(&[point(0, 1.0)], &fills, &PerformanceConfig::default());
        assert_eq!(summary.trades, 3);
        assert_eq!(summary.closed_trades, 2);
        assert!((summary.win_rate - 0.5).abs() < 1e-12);
        assert!((summary.total_commission - 3.0).abs() < 1e-12);
        assert!((summary.total_slippage - 1.5).abs() < 1e-12);
    }
}
