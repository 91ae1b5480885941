use std::path::PathBuf;

pub(super) fn run_report(input: PathBuf) -> Result<serde_json::Value, String> {
    let deps = crate::infra::build_reporting_deps();
    let result = quantsys_application::reporting::generate_report(
        input.as_path(),
        deps.reader.as_ref(),
        deps.writer.as_ref(),
    )?;
    Ok(serde_json::json!({
        "status": "ok",
        "mode": "report",
        "run_id": result.run_id,
        "input_dir": result.input_dir.display().to_string(),
        "summary": result.summary,
        "kpis": result.kpis,
    }))
}
