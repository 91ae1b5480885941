use quantsys_application::experiments::sweep::SweepProgress;
use std::path::PathBuf;

pub(super) fn run_sweep(sweep_path: PathBuf) -> Result<serde_json::Value, String> {
    let deps = crate::infra::build_engine_deps();
    let mut on_progress = |progress: SweepProgress| {
        tracing::info!(
            completed = progress.completed_runs,
            total = progress.total_runs,
            ok = progress.ok_runs,
            skipped = progress.skipped_runs,
            errors = progress.error_runs,
            last_run_id = progress.last_run_id.as_deref().unwrap_or(""),
            "sweep progress"
        );
        if let Some(err) = progress.last_error.as_deref() {
            tracing::warn!(error = %err, "sweep run failed");
        }
    };

    let result = quantsys_application::experiments::sweep::run_sweep_with_hooks(
        sweep_path.as_path(),
        deps.events.as_ref(),
        deps.artifacts.as_ref(),
        Some(&mut on_progress),
        None,
    )?;

    let count = |status: &str| result.runs.iter().filter(|r| r.status == status).count();
    Ok(serde_json::json!({
        "status": "ok",
        "mode": "sweep",
        "sweep_id": result.sweep_id,
        "sweep_dir": result.sweep_dir.display().to_string(),
        "manifest_json": result.sweep_dir.join("manifest.json").display().to_string(),
        "results_csv": result.sweep_dir.join("results.csv").display().to_string(),
        "leaderboard_csv": result.sweep_dir.join("leaderboard.csv").display().to_string(),
        "runs_total": result.runs.len(),
        "runs_ok": count("ok"),
        "runs_skipped": count("skipped"),
        "runs_error": count("error"),
    }))
}
