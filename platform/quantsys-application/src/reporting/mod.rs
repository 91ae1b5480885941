use crate::config::Config;
use crate::shared::{
    build_performance_config, config_snapshot_json, resolve_execution_config,
    summary_meta_json_from_equity,
};
use quantsys_domain::repositories::artifacts::{ArtifactReader, ArtifactWriter};
use quantsys_domain::services::audit::{sort_audit_events, AuditEvent};
use quantsys_domain::services::dashboard::{equity_curve_rows, kpi_snapshot, KpiSnapshot};
use quantsys_domain::services::performance::{summarize, PerformanceConfig, PerformanceSummary};
use quantsys_domain::value_objects::equity_point::EquityPoint;
use quantsys_domain::value_objects::fill::Fill;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::info_span;

pub struct GenerateReportResult {
    pub input_dir: PathBuf,
    pub run_id: String,
    pub summary: PerformanceSummary,
    pub kpis: KpiSnapshot,
}

/// Recomputes `summary.json`, `kpis.json`, `equity_curve.json` and
/// `logs.jsonl` from the trade and equity files of a finished run.
pub fn generate_report(
    input_dir: &Path,
    reader: &dyn ArtifactReader,
    writer: &dyn ArtifactWriter,
) -> Result<GenerateReportResult, String> {
    let _span = info_span!("generate_report", input_dir = %input_dir.display()).entered();

    let stage_start = Instant::now();
    let trades_path = input_dir.join("trades.csv");
    let equity_path = input_dir.join("equity.csv");
    let config_path = input_dir.join("config_snapshot.toml");

    if !reader.exists(&trades_path) || !reader.exists(&equity_path) {
        return Err(format!(
            "missing trades.csv or equity.csv in {}",
            input_dir.display()
        ));
    }

    let fills = reader.read_trades_csv(&trades_path)?;
    let equity = reader.read_equity_csv(&equity_path)?;

    let config = reader
        .read_config_snapshot_toml(&config_path)?
        .as_deref()
        .and_then(|raw| load_config_from_str(raw).ok());
    let performance = config
        .as_ref()
        .map(build_performance_config)
        .unwrap_or_default();
    let summary = summarize(&equity, &fills, &performance);
    metrics::histogram!("quantsys.report.generate_ms")
        .record(stage_start.elapsed().as_millis() as f64);
    metrics::gauge!("quantsys.report.trades").set(fills.len() as f64);

    let (run_id, meta, config_snapshot) = match &config {
        Some(config) => {
            let meta = summary_meta_json_from_equity(config, &equity);
            let execution = resolve_execution_config(config)?;
            let snapshot = config_snapshot_json(config, &execution);
            (config.run.run_id.clone(), meta, Some(snapshot))
        }
        None => ("unknown".to_string(), None, None),
    };

    writer.write_summary_json(
        input_dir.join("summary.json").as_path(),
        &summary,
        meta.as_ref(),
        config_snapshot.as_ref(),
    )?;

    let kpis = kpi_snapshot(&summary, open_positions_from_fills(&fills));
    let kpis_json =
        serde_json::to_value(&kpis).map_err(|err| format!("failed to serialize kpis: {err}"))?;
    writer.write_json(input_dir.join("kpis.json").as_path(), &kpis_json)?;

    let rows_json = serde_json::to_value(equity_curve_rows(&equity, None))
        .map_err(|err| format!("failed to serialize equity curve rows: {err}"))?;
    writer.write_json(input_dir.join("equity_curve.json").as_path(), &rows_json)?;

    let events = build_report_events(&run_id, &fills, &summary, &equity, &performance, input_dir);
    writer.write_audit_jsonl(input_dir.join("logs.jsonl").as_path(), &events)?;

    Ok(GenerateReportResult {
        input_dir: input_dir.to_path_buf(),
        run_id,
        summary,
        kpis,
    })
}

fn load_config_from_str(raw: &str) -> Result<Config, String> {
    toml::from_str(raw).map_err(|err| format!("failed to parse config snapshot TOML: {err}"))
}

/// Instruments whose net filled quantity is non-zero.
fn open_positions_from_fills(fills: &[Fill]) -> usize {
    let mut net: BTreeMap<&str, f64> = BTreeMap::new();
    for fill in fills {
        *net.entry(fill.instrument.as_str()).or_insert(0.0) += fill.side.sign() * fill.quantity;
    }
    net.values().filter(|qty| qty.abs() > 1e-9).count()
}

fn build_report_events(
    run_id: &str,
    fills: &[Fill],
    summary: &PerformanceSummary,
    equity: &[EquityPoint],
    performance: &PerformanceConfig,
    input_dir: &Path,
) -> Vec<AuditEvent> {
    let end_ts = equity.last().map(|p| p.timestamp).unwrap_or(0);
    let mut events = Vec::with_capacity(fills.len() + 2);

    for fill in fills {
        events.push(AuditEvent {
            run_id: run_id.to_string(),
            timestamp: fill.timestamp,
            stage: "trade".to_string(),
            instrument: Some(fill.instrument.clone()),
            action: "fill".to_string(),
            error: None,
            details: serde_json::json!({
                "order_id": fill.order_id,
                "side": fill.side.as_str(),
                "qty": fill.quantity,
                "price": fill.price,
                "commission": fill.commission,
                "slippage": fill.slippage_cost,
                "realized_pnl": fill.realized_pnl,
            }),
        });
    }

    events.push(AuditEvent {
        run_id: run_id.to_string(),
        timestamp: end_ts,
        stage: "report".to_string(),
        instrument: None,
        action: "recompute".to_string(),
        error: None,
        details: serde_json::json!({
            "input_dir": input_dir.display().to_string(),
            "trades": fills.len(),
            "periods": summary.periods,
            "periods_per_year": performance.periods_per_year,
        }),
    });

    events.push(AuditEvent {
        run_id: run_id.to_string(),
        timestamp: end_ts,
        stage: "summary".to_string(),
        instrument: None,
        action: "complete".to_string(),
        error: None,
        details: serde_json::json!({
            "trades": summary.trades,
            "win_rate": summary.win_rate,
            "net_profit": summary.net_profit,
            "sharpe": summary.sharpe,
            "max_drawdown": summary.max_drawdown,
        }),
    });

    sort_audit_events(&mut events);
    events
}

#[cfg(test)]
mod tests {
    use super::open_positions_from_fills;
    use quantsys_domain::value_objects::fill::Fill;
    use quantsys_domain::value_objects::side::Side;

    fn fill(instrument: &str, side: Side, qty: f64) -> Fill {
        Fill {
            order_id: 1,
            instrument: instrument.to_string(),
            side,
            quantity: qty,
            price: 10.0,
            reference_price: 10.0,
            commission: 0.0,
            slippage_cost: 0.0,
            realized_pnl: 0.0,
            timestamp: 1,
        }
    }

    #[test]
    fn open_positions_ignore_round_trips() {
        let fills = vec![
            fill("AAA", Side::Buy, 2.0),
            fill("AAA", Side::Sell, 2.0),
            fill("BBB", Side::Sell, 1.0),
        ];
        assert_eq!(open_positions_from_fills(&fills), 1);
    }
}
