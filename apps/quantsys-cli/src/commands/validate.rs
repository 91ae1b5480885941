use std::path::PathBuf;

pub(super) fn run_validate(config_path: PathBuf, strict: bool) -> Result<serde_json::Value, String> {
    let config = quantsys_application::config::load_config(&config_path)?;
    super::common::log_config_summary("validate", &config);

    let events = crate::infra::build_events_repo();
    let report = quantsys_application::validation::validate(&config, strict, events.as_ref())?;
    Ok(serde_json::json!({
        "status": "ok",
        "mode": "validate",
        "strict": strict,
        "run_id": config.run.run_id,
        "report": report,
    }))
}
