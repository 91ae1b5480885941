use std::path::PathBuf;

pub(super) fn run_backtest(
    config_path: PathBuf,
    out: Option<PathBuf>,
) -> Result<serde_json::Value, String> {
    let (config, config_toml) =
        quantsys_application::config::load_config_with_source(&config_path)?;
    super::common::log_config_summary("backtest", &config);

    let deps = crate::infra::build_engine_deps();
    let run_dir = quantsys_application::backtesting::run_backtest(
        &config,
        &config_toml,
        out,
        deps.events.as_ref(),
        deps.artifacts.as_ref(),
    )?;

    let summary = super::common::read_summary_json(&run_dir)?;
    Ok(serde_json::json!({
        "status": summary["meta"]["status"].clone(),
        "mode": "backtest",
        "run_id": config.run.run_id,
        "failure": summary["meta"]["failure"].clone(),
        "summary": summary["summary"].clone(),
        "artifacts": super::common::artifacts_for_run(&run_dir),
    }))
}
