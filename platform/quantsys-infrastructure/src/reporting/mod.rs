//! On-disk formats of a run directory.
//!
//! Each CSV file has one row struct used both ways, so the column set of
//! what `backtest` writes and what `report` reads cannot drift apart.

use quantsys_domain::services::audit::AuditEvent;
use quantsys_domain::services::engine::RejectedOrder;
use quantsys_domain::services::performance::PerformanceSummary;
use quantsys_domain::value_objects::equity_point::EquityPoint;
use quantsys_domain::value_objects::fill::Fill;
use quantsys_domain::value_objects::order::OrderKind;
use quantsys_domain::value_objects::side::Side;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Debug, Serialize, Deserialize)]
struct TradeRow {
    timestamp: i64,
    order_id: u64,
    instrument: String,
    side: String,
    qty: f64,
    price: f64,
    reference_price: f64,
    commission: f64,
    slippage: f64,
    realized_pnl: f64,
}

impl From<&Fill> for TradeRow {
    fn from(fill: &Fill) -> Self {
        Self {
            timestamp: fill.timestamp,
            order_id: fill.order_id,
            instrument: fill.instrument.clone(),
            side: fill.side.as_str().to_string(),
            qty: fill.quantity,
            price: fill.price,
            reference_price: fill.reference_price,
            commission: fill.commission,
            slippage: fill.slippage_cost,
            realized_pnl: fill.realized_pnl,
        }
    }
}

impl TryFrom<TradeRow> for Fill {
    type Error = String;

    fn try_from(row: TradeRow) -> Result<Self, Self::Error> {
        Ok(Fill {
            order_id: row.order_id,
            instrument: row.instrument,
            side: Side::parse(&row.side)?,
            quantity: row.qty,
            price: row.price,
            reference_price: row.reference_price,
            commission: row.commission,
            slippage_cost: row.slippage,
            realized_pnl: row.realized_pnl,
            timestamp: row.timestamp,
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EquityRow {
    timestamp: i64,
    equity: f64,
    cash: f64,
    gross_exposure: f64,
    realized_pnl: f64,
    unrealized_pnl: f64,
}

impl From<&EquityPoint> for EquityRow {
    fn from(point: &EquityPoint) -> Self {
        Self {
            timestamp: point.timestamp,
            equity: point.equity,
            cash: point.cash,
            gross_exposure: point.gross_exposure,
            realized_pnl: point.realized_pnl,
            unrealized_pnl: point.unrealized_pnl,
        }
    }
}

impl From<EquityRow> for EquityPoint {
    fn from(row: EquityRow) -> Self {
        EquityPoint {
            timestamp: row.timestamp,
            equity: row.equity,
            cash: row.cash,
            gross_exposure: row.gross_exposure,
            realized_pnl: row.realized_pnl,
            unrealized_pnl: row.unrealized_pnl,
        }
    }
}

#[derive(Debug, Serialize)]
struct RejectedRow<'a> {
    order_id: u64,
    created_at: i64,
    instrument: &'a str,
    side: &'static str,
    qty: f64,
    order_type: &'static str,
    limit_price: Option<f64>,
    code: &'static str,
    reason: String,
}

impl<'a> From<&'a RejectedOrder> for RejectedRow<'a> {
    fn from(rejected: &'a RejectedOrder) -> Self {
        let order = &rejected.order;
        let (order_type, limit_price) = match order.kind {
            OrderKind::Market => ("market", None),
            OrderKind::Limit { limit_price } => ("limit", Some(limit_price)),
        };
        Self {
            order_id: order.id,
            created_at: order.created_at,
            instrument: &order.instrument,
            side: order.side.as_str(),
            qty: order.quantity,
            order_type,
            limit_price,
            code: rejected.reason.code(),
            reason: rejected.reason.to_string(),
        }
    }
}

/// Writes `header` first so empty files still carry their columns.
fn write_csv<R: Serialize>(
    path: &Path,
    header: &[&str],
    rows: impl IntoIterator<Item = R>,
) -> Result<(), String> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)
        .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    wtr.write_record(header)
        .map_err(|err| format!("failed to write header of {}: {err}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .map_err(|err| format!("failed to write row to {}: {err}", path.display()))?;
    }
    wtr.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))
}

fn read_csv<R: DeserializeOwned>(path: &Path) -> Result<Vec<R>, String> {
    let mut rdr = csv::Reader::from_path(path)
        .map_err(|err| format!("failed to open {}: {err}", path.display()))?;
    rdr.deserialize()
        .enumerate()
        .map(|(index, row)| {
            row.map_err(|err| format!("{} row {}: {err}", path.display(), index + 1))
        })
        .collect()
}

const TRADE_COLUMNS: [&str; 10] = [
    "timestamp",
    "order_id",
    "instrument",
    "side",
    "qty",
    "price",
    "reference_price",
    "commission",
    "slippage",
    "realized_pnl",
];

const EQUITY_COLUMNS: [&str; 6] = [
    "timestamp",
    "equity",
    "cash",
    "gross_exposure",
    "realized_pnl",
    "unrealized_pnl",
];

const REJECTED_COLUMNS: [&str; 9] = [
    "order_id",
    "created_at",
    "instrument",
    "side",
    "qty",
    "order_type",
    "limit_price",
    "code",
    "reason",
];

pub fn write_trades_csv(path: &Path, fills: &[Fill]) -> Result<(), String> {
    write_csv(path, &TRADE_COLUMNS, fills.iter().map(TradeRow::from))
}

pub fn write_equity_csv(path: &Path, points: &[EquityPoint]) -> Result<(), String> {
    write_csv(path, &EQUITY_COLUMNS, points.iter().map(EquityRow::from))
}

pub fn write_rejected_orders_csv(path: &Path, rejected: &[RejectedOrder]) -> Result<(), String> {
    write_csv(path, &REJECTED_COLUMNS, rejected.iter().map(RejectedRow::from))
}

pub fn read_trades_csv(path: &Path) -> Result<Vec<Fill>, String> {
    read_csv::<TradeRow>(path)?
        .into_iter()
        .map(Fill::try_from)
        .collect()
}

pub fn read_equity_csv(path: &Path) -> Result<Vec<EquityPoint>, String> {
    Ok(read_csv::<EquityRow>(path)?
        .into_iter()
        .map(EquityPoint::from)
        .collect())
}

/// One JSON object per line, in the order given.
pub fn write_audit_jsonl(path: &Path, events: &[AuditEvent]) -> Result<(), String> {
    let file =
        File::create(path).map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    let mut out = BufWriter::new(file);
    for event in events {
        serde_json::to_writer(&mut out, event)
            .map_err(|err| format!("failed to encode audit event: {err}"))?;
        out.write_all(b"\n")
            .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
    }
    out.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))
}

/// `summary.json`: `meta` and `config_snapshot` as given, metrics under
/// `summary`.
pub fn write_summary_json(
    path: &Path,
    summary: &PerformanceSummary,
    meta: Option<&serde_json::Value>,
    config_snapshot: Option<&serde_json::Value>,
) -> Result<(), String> {
    write_json(
        path,
        &serde_json::json!({
            "meta": meta,
            "config_snapshot": config_snapshot,
            "summary": summary,
        }),
    )
}

pub fn write_json(path: &Path, value: &serde_json::Value) -> Result<(), String> {
    let file =
        File::create(path).map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut out, value)
        .map_err(|err| format!("failed to write {}: {err}", path.display()))?;
    out.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))
}
