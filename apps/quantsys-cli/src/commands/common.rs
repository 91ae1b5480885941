use quantsys_application::config::Config;
use std::path::Path;

pub(super) fn log_config_summary(command: &str, config: &Config) {
    tracing::info!(
        command,
        run_id = %config.run.run_id,
        events_path = %config.paths.events_path,
        out_dir = %config.paths.out_dir,
        initial_capital = config.run.initial_capital,
        commission_rate = config.costs.commission_rate,
        slippage_bps = config.costs.slippage_bps,
        "config loaded"
    );
}

pub(super) fn artifacts_for_run(run_dir: &Path) -> serde_json::Value {
    let file = |name: &str| run_dir.join(name).display().to_string();
    serde_json::json!({
        "run_dir": run_dir.display().to_string(),
        "trades_csv": file("trades.csv"),
        "equity_csv": file("equity.csv"),
        "rejected_orders_csv": file("rejected_orders.csv"),
        "summary_json": file("summary.json"),
        "kpis_json": file("kpis.json"),
        "equity_curve_json": file("equity_curve.json"),
        "logs_jsonl": file("logs.jsonl"),
        "config_snapshot_toml": file("config_snapshot.toml"),
    })
}

pub(super) fn read_summary_json(run_dir: &Path) -> Result<serde_json::Value, String> {
    let path = run_dir.join("summary.json");
    let raw = std::fs::read_to_string(&path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("failed to parse {}: {err}", path.display()))
}
