use crate::config::Config;
use crate::shared::{
    build_performance_config, build_strategy, check_feed_quality, config_snapshot_json,
    resolve_engine_config, summary_meta_json_from_equity,
};
use quantsys_domain::repositories::artifacts::ArtifactWriter;
use quantsys_domain::repositories::market_data::{EventQuery, EventRepository};
use quantsys_domain::services::audit::{sort_audit_events, AuditEvent};
use quantsys_domain::services::dashboard::{benchmark_curve, equity_curve_rows, kpi_snapshot_for_portfolio};
use quantsys_domain::services::engine::{BacktestResult, Backtester, ExecutionConfig};
use quantsys_domain::services::performance::{summarize, PerformanceSummary};
use quantsys_domain::services::scenario::{portfolio_weights, stress_test};
use quantsys_domain::value_objects::equity_point::EquityPoint;
use std::path::PathBuf;
use std::time::Instant;
use tracing::{info, info_span, warn};

pub fn run_backtest(
    config: &Config,
    config_toml: &str,
    out: Option<PathBuf>,
    events_repo: &dyn EventRepository,
    artifacts: &dyn ArtifactWriter,
) -> Result<PathBuf, String> {
    run_backtest_with_cancel(config, config_toml, out, events_repo, artifacts, None)
}

pub fn run_backtest_with_cancel(
    config: &Config,
    config_toml: &str,
    out: Option<PathBuf>,
    events_repo: &dyn EventRepository,
    artifacts: &dyn ArtifactWriter,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<PathBuf, String> {
    let _span = info_span!(
        "run_backtest",
        run_id = %config.run.run_id,
        events_path = %config.paths.events_path
    )
    .entered();

    let mut audit_extras: Vec<AuditEvent> = Vec::new();

    let stage_start = Instant::now();
    let (events, feed_report) = events_repo.load_events(&EventQuery {
        source: PathBuf::from(&config.paths.events_path),
        instruments: config.run.instruments.clone(),
        start: None,
        end: None,
    })?;
    metrics::histogram!("quantsys.backtest.load_events_ms")
        .record(stage_start.elapsed().as_millis() as f64);
    audit_extras.push(timing_event(
        &config.run.run_id,
        0,
        "timing",
        None,
        "load_events",
        stage_start.elapsed().as_millis() as u64,
        serde_json::json!({
            "rows": feed_report.rows,
            "instruments": feed_report.instruments,
            "duplicates": feed_report.duplicates,
            "out_of_order": feed_report.out_of_order,
            "invalid_price": feed_report.invalid_price,
        }),
    ));
    check_feed_quality(config, &feed_report)?;

    let engine_config = resolve_engine_config(config)?;
    let mut strategy = build_strategy(config)?;
    let engine = Backtester::new(engine_config).map_err(|err| err.to_string())?;

    let benchmark = config
        .report
        .as_ref()
        .and_then(|report| report.benchmark.as_deref())
        .map(|instrument| benchmark_curve(&events, instrument, config.run.initial_capital));

    let stage_start = Instant::now();
    let cancel = should_cancel.map(|f| f as &dyn Fn() -> bool);
    let result = engine
        .run_with_cancel(&config.run.run_id, events, &mut strategy, cancel)
        .map_err(|err| format!("backtest {} failed: {err}", config.run.run_id))?;
    let engine_ms = stage_start.elapsed().as_millis() as f64;
    metrics::histogram!("quantsys.backtest.engine_ms").record(engine_ms);
    metrics::gauge!("quantsys.backtest.events_processed").set(result.events_processed as f64);
    metrics::gauge!("quantsys.backtest.trades").set(result.trade_log.len() as f64);
    metrics::gauge!("quantsys.backtest.rejected_orders").set(result.rejected_orders.len() as f64);
    metrics::gauge!("quantsys.backtest.engine_events_per_sec").set(if engine_ms > 0.0 {
        (result.events_processed as f64) / (engine_ms / 1000.0)
    } else {
        0.0
    });
    metrics::counter!("quantsys.backtest.runs_total", "status" => result.status.as_str())
        .increment(1);
    audit_extras.push(timing_event(
        &config.run.run_id,
        0,
        "timing",
        None,
        "run_engine",
        stage_start.elapsed().as_millis() as u64,
        serde_json::json!({ "events_processed": result.events_processed }),
    ));

    if let Some(failure) = &result.failure {
        warn!(error = %failure, "backtest finished with a failure");
    }
    info!(
        status = result.status.as_str(),
        final_equity = result.final_equity(),
        "backtest complete"
    );

    write_outputs(
        config,
        config_toml,
        out,
        result,
        engine.config().execution.clone(),
        benchmark,
        artifacts,
        audit_extras,
    )
}

fn timing_event(
    run_id: &str,
    timestamp: i64,
    stage: &str,
    instrument: Option<&str>,
    action: &str,
    duration_ms: u64,
    details: serde_json::Value,
) -> AuditEvent {
    AuditEvent {
        run_id: run_id.to_string(),
        timestamp,
        stage: stage.to_string(),
        instrument: instrument.map(|s| s.to_string()),
        action: action.to_string(),
        error: None,
        details: serde_json::json!({
            "duration_ms": duration_ms,
            "details": details,
        }),
    }
}

#[allow(clippy::too_many_arguments)]
fn write_outputs(
    config: &Config,
    config_toml: &str,
    out: Option<PathBuf>,
    result: BacktestResult,
    execution: ExecutionConfig,
    benchmark: Option<Vec<EquityPoint>>,
    artifacts: &dyn ArtifactWriter,
    mut audit_extras: Vec<AuditEvent>,
) -> Result<PathBuf, String> {
    let base_dir = out.unwrap_or_else(|| PathBuf::from(&config.paths.out_dir));
    let run_dir = base_dir.join(&config.run.run_id);
    artifacts.ensure_dir(&run_dir)?;

    artifacts.write_trades_csv(run_dir.join("trades.csv").as_path(), &result.trade_log)?;
    artifacts.write_equity_csv(run_dir.join("equity.csv").as_path(), &result.equity_curve)?;
    artifacts.write_rejected_orders_csv(
        run_dir.join("rejected_orders.csv").as_path(),
        &result.rejected_orders,
    )?;

    let summary = summarize(
        &result.equity_curve,
        &result.trade_log,
        &build_performance_config(config),
    );
    let meta = run_meta_json(config, &result);
    let config_snapshot = config_snapshot_json(config, &execution);
    artifacts.write_summary_json(
        run_dir.join("summary.json").as_path(),
        &summary,
        Some(&meta),
        Some(&config_snapshot),
    )?;

    write_dashboard_payloads(
        config,
        &run_dir,
        &summary,
        &result,
        benchmark.as_deref(),
        artifacts,
    )?;

    let mut audit_events = result.audit_events;
    audit_events.append(&mut audit_extras);
    sort_audit_events(&mut audit_events);
    artifacts.write_audit_jsonl(run_dir.join("logs.jsonl").as_path(), &audit_events)?;

    artifacts
        .write_config_snapshot_toml(run_dir.join("config_snapshot.toml").as_path(), config_toml)?;

    Ok(run_dir)
}

fn run_meta_json(config: &Config, result: &BacktestResult) -> serde_json::Value {
    let mut meta = summary_meta_json_from_equity(config, &result.equity_curve)
        .unwrap_or_else(|| serde_json::json!({ "run_id": config.run.run_id }));
    if let Some(object) = meta.as_object_mut() {
        object.insert("status".to_string(), result.status.as_str().into());
        object.insert(
            "failure".to_string(),
            serde_json::to_value(&result.failure).unwrap_or(serde_json::Value::Null),
        );
        object.insert("events_processed".to_string(), result.events_processed.into());
        object.insert(
            "rejected_orders".to_string(),
            result.rejected_orders.len().into(),
        );
        object.insert(
            "unfilled_orders".to_string(),
            result.unfilled_orders.len().into(),
        );
    }
    meta
}

fn write_dashboard_payloads(
    config: &Config,
    run_dir: &std::path::Path,
    summary: &PerformanceSummary,
    result: &BacktestResult,
    benchmark: Option<&[EquityPoint]>,
    artifacts: &dyn ArtifactWriter,
) -> Result<(), String> {
    let kpis = kpi_snapshot_for_portfolio(summary, &result.final_portfolio);
    let kpis_json = serde_json::to_value(&kpis)
        .map_err(|err| format!("failed to serialize kpis: {err}"))?;
    artifacts.write_json(run_dir.join("kpis.json").as_path(), &kpis_json)?;

    let rows = equity_curve_rows(&result.equity_curve, benchmark);
    let rows_json = serde_json::to_value(&rows)
        .map_err(|err| format!("failed to serialize equity curve rows: {err}"))?;
    artifacts.write_json(run_dir.join("equity_curve.json").as_path(), &rows_json)?;

    let scenarios = config
        .report
        .as_ref()
        .and_then(|report| report.stress_scenarios.as_ref());
    if let Some(scenarios) = scenarios {
        let weights = portfolio_weights(&result.final_portfolio);
        let results: Vec<_> = scenarios
            .iter()
            .filter_map(|name| stress_test(&weights, name))
            .collect();
        let stress_json = serde_json::json!({
            "weights": weights,
            "scenarios": results,
        });
        artifacts.write_json(run_dir.join("stress.json").as_path(), &stress_json)?;
    }
    Ok(())
}
