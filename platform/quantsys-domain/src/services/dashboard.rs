//! Payload shapes served to the research dashboard.

use crate::entities::portfolio::Portfolio;
use crate::services::performance::PerformanceSummary;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::market_event::MarketEvent;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Headline numbers. `cagr` and `max_drawdown` are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KpiSnapshot {
    pub cagr: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub position_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityCurveRow {
    pub date: String,
    pub portfolio: f64,
    pub benchmark: Option<f64>,
}

pub fn kpi_snapshot(summary: &PerformanceSummary, position_count: usize) -> KpiSnapshot {
    KpiSnapshot {
        cagr: round2(summary.cagr * 100.0),
        sharpe: round2(summary.sharpe),
        max_drawdown: round2(summary.max_drawdown * 100.0),
        position_count,
    }
}

pub fn kpi_snapshot_for_portfolio(summary: &PerformanceSummary, portfolio: &Portfolio) -> KpiSnapshot {
    kpi_snapshot(summary, portfolio.open_position_count())
}

/// One row per UTC day holding the last equity of that day.
pub fn equity_curve_rows(
    curve: &[EquityPoint],
    benchmark: Option<&[EquityPoint]>,
) -> Vec<EquityCurveRow> {
    let benchmark_by_day: BTreeMap<String, f64> = benchmark
        .map(|points| daily_last(points).into_iter().collect())
        .unwrap_or_default();

    daily_last(curve)
        .into_iter()
        .map(|(date, portfolio)| EquityCurveRow {
            benchmark: benchmark_by_day.get(&date).copied(),
            date,
            portfolio,
        })
        .collect()
}

/// Buy-and-hold curve for `instrument`, fully invested at its first valid price.
pub fn benchmark_curve(events: &[MarketEvent], instrument: &str, initial_cash: f64) -> Vec<EquityPoint> {
    let mut units: Option<f64> = None;
    let mut out: Vec<EquityPoint> = Vec::new();
    for event in events.iter().filter(|e| e.instrument == instrument) {
        if !event.price.is_finite() || event.price <= 0.0 {
            continue;
        }
        let held = *units.get_or_insert(initial_cash / event.price);
        let equity = held * event.price;
        let point = EquityPoint {
            timestamp: event.timestamp,
            equity,
            cash: 0.0,
            gross_exposure: equity,
            realized_pnl: 0.0,
            unrealized_pnl: equity - initial_cash,
        };
        match out.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => out.push(point),
        }
    }
    out
}

fn daily_last(points: &[EquityPoint]) -> Vec<(String, f64)> {
    let mut rows: Vec<(String, f64)> = Vec::new();
    for point in points {
        let Some(dt) = DateTime::from_timestamp(point.timestamp, 0) else {
            continue;
        };
        let date = dt.format("%Y-%m-%d").to_string();
        match rows.last_mut() {
            Some((last_date, value)) if *last_date == date => *value = point.equity,
            _ => rows.push((date, point.equity)),
        }
    }
    rows
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn kpis_are_reported_in_percent() {
        let summary = PerformanceSummary {
            cagr: 0.285,
            sharpe: 1.8249,
            max_drawdown: -0.123,
            ..PerformanceSummary::default()
        };
        let kpis = kpi_snapshot(&summary, 5);
        assert_eq!(kpis.cagr, 28.5);
        assert_eq!(kpis.sharpe, 1.82);
        assert_eq!(kpis.max_drawdown, -12.3);
        assert_eq!(kpis.position_count, 5);
    }

    #[test]
    fn equity_rows_keep_last_point_per_day_and_join_benchmark() {
        let day = 86_400;
        let curve = vec![
            point(0, 100.0),
            point(3_600, 101.0),
            point(day + 10, 103.0),
        ];
        let bench = vec![point(10, 50.0), point(day + 20, 55.0)];
        let rows = equity_curve_rows(&curve, Some(&bench));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].date, "1970-01-01");
        assert_eq!(rows[0].portfolio, 101.0);
        assert_eq!(rows[0].benchmark, Some(50.0));
        assert_eq!(rows[1].date, "1970-01-02");
        assert_eq!(rows[1].benchmark, Some(55.0));

        let json = serde_json::to_value(&rows[0]).expect("json");
        assert_eq!(json["date"], "1970-01-01");
    }

    #[test]
    fn benchmark_is_buy_and_hold_from_first_price() {
        let events = vec![
            MarketEvent::trade(1, "SPY", 100.0),
            MarketEvent::trade(1, "AAA", 7.0),
            MarketEvent::trade(2, "SPY", 110.0),
        ];
        let curve = benchmark_curve(&events, "SPY", 1_000.0);
        assert_eq!(curve.len(), 2);
        assert!((curve[0].equity - 1_000.0).abs() < 1e-9);
        assert!((curve[1].equity - 1_100.0).abs() < 1e-9);
    }
}
