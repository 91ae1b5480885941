//! Parameter sweeps: one base config, a grid of overrides, optional time
//! splits. Every combination is a full backtest with its own run directory;
//! the sweep directory gets `manifest.json`, `results.csv` and
//! `leaderboard.csv`.

use super::grid::{render_config, run_id_for, Assignment, ParamGrid, SweepParam};
use super::outputs::write_sweep_outputs;
use super::pool::{is_cancelled, run_jobs, CancelHook, CANCELLED};
use crate::config::Config;
use quantsys_domain::repositories::artifacts::ArtifactWriter;
use quantsys_domain::repositories::market_data::{
    EventQuery, EventRepository, InMemoryEventRepository,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepFile {
    pub base: SweepBase,
    pub sweep: SweepMeta,
    #[serde(default)]
    pub params: Vec<SweepParam>,
    pub leaderboard: Option<LeaderboardConfig>,
    pub splits: Option<Vec<SweepSplit>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepBase {
    /// Relative paths resolve against the sweep file's directory.
    pub config: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepMeta {
    pub id: String,
    pub parallelism: Option<usize>,
    pub resume: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LeaderboardConfig {
    pub sort_by: Option<String>,
    pub descending: Option<bool>,
}

/// Inclusive time window. Bounds take epoch seconds, `YYYY-MM-DD` or RFC 3339.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SweepSplit {
    pub id: String,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl SweepSplit {
    fn full() -> Self {
        Self {
            id: "full".to_string(),
            start: None,
            end: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepRunEntry {
    pub run_id: String,
    pub split_id: String,
    pub params: Assignment,
    /// `ok`, `failed` or `cancelled` from the run itself; `skipped` on resume;
    /// `error` when the run never produced a summary.
    pub status: String,
    pub error: Option<String>,
    pub metrics: Option<RunMetrics>,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RunMetrics {
    pub events_processed: u64,
    pub trades: u64,
    pub win_rate: f64,
    pub net_profit: f64,
    pub total_return: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
    pub total_commission: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepResult {
    pub sweep_id: String,
    pub sweep_dir: PathBuf,
    pub base_config: String,
    pub runs: Vec<SweepRunEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SweepProgress {
    pub total_runs: usize,
    pub completed_runs: usize,
    pub ok_runs: usize,
    pub skipped_runs: usize,
    pub error_runs: usize,
    pub last_run_id: Option<String>,
    pub last_error: Option<String>,
}

pub fn run_sweep(
    sweep_path: &Path,
    events_repo: &dyn EventRepository,
    artifacts: &(dyn ArtifactWriter + Sync),
) -> Result<SweepResult, String> {
    run_sweep_with_hooks(sweep_path, events_repo, artifacts, None, None)
}

/// `on_progress` fires once up front and after every finished or skipped
/// run. Cancelling aborts the sweep with `Err("cancelled")`; no sweep
/// outputs are written.
pub fn run_sweep_with_hooks(
    sweep_path: &Path,
    events_repo: &dyn EventRepository,
    artifacts: &(dyn ArtifactWriter + Sync),
    on_progress: Option<&mut dyn FnMut(SweepProgress)>,
    should_cancel: Option<&(dyn Fn() -> bool + Sync)>,
) -> Result<SweepResult, String> {
    let raw = std::fs::read_to_string(sweep_path)
        .map_err(|err| format!("failed to read sweep config {}: {err}", sweep_path.display()))?;
    let sweep: SweepFile = toml::from_str(&raw)
        .map_err(|err| format!("failed to parse sweep TOML {}: {err}", sweep_path.display()))?;
    let _span = info_span!("run_sweep", sweep_id = %sweep.sweep.id).entered();

    let grid = ParamGrid::new(&sweep.params)?;
    let splits = sweep
        .splits
        .clone()
        .unwrap_or_else(|| vec![SweepSplit::full()]);
    let windows = splits
        .iter()
        .map(split_window)
        .collect::<Result<Vec<_>, String>>()?;

    let base_path = resolve_relative(sweep_path, &sweep.base.config);
    let (base_config, base_source) = crate::config::load_config_with_source(&base_path)?;
    let base_doc: toml::Table = toml::from_str(&base_source)
        .map_err(|err| format!("failed to parse base config {}: {err}", base_path.display()))?;

    let out_dir = PathBuf::from(&base_config.paths.out_dir);
    let sweep_dir = out_dir.join("sweeps").join(&sweep.sweep.id);
    std::fs::create_dir_all(&sweep_dir)
        .map_err(|err| format!("failed to create sweep dir {}: {err}", sweep_dir.display()))?;

    // One load for the whole sweep; splits and runs share it.
    let (events, _) = events_repo.load_events(&EventQuery {
        source: PathBuf::from(&base_config.paths.events_path),
        instruments: base_config.run.instruments.clone(),
        start: None,
        end: None,
    })?;

    let workers = sweep.sweep.parallelism.unwrap_or(1).max(1);
    let resume = sweep.sweep.resume.unwrap_or(false);
    let assignments = grid.assignments();
    let mut tracker = ProgressTracker::new(assignments.len() * splits.len(), on_progress);
    info!(
        runs = tracker.progress.total_runs,
        splits = splits.len(),
        workers,
        resume,
        "sweep started"
    );

    let mut runs = Vec::with_capacity(tracker.progress.total_runs);
    for (split, window) in splits.iter().zip(&windows) {
        if is_cancelled(should_cancel) {
            return Err(CANCELLED.to_string());
        }
        let split_events = InMemoryEventRepository::new(
            events
                .iter()
                .filter(|event| window.accepts(event))
                .cloned()
                .collect(),
        );

        // `None` marks a slot that one of `jobs` fills, in order.
        let mut slots: Vec<Option<SweepRunEntry>> = Vec::with_capacity(assignments.len());
        let mut jobs: Vec<RunJob> = Vec::new();
        for assignment in &assignments {
            let run_id = run_id_for(&sweep.sweep.id, &split.id, assignment);
            let summary_path = out_dir.join(&run_id).join("summary.json");
            if resume && summary_path.exists() {
                let entry = SweepRunEntry {
                    run_id,
                    split_id: split.id.clone(),
                    params: assignment.clone(),
                    status: "skipped".to_string(),
                    error: None,
                    metrics: read_summary(&summary_path).ok().map(|s| run_metrics(&s)),
                };
                tracker.record(&entry);
                slots.push(Some(entry));
                continue;
            }

            let doc = render_config(&base_doc, assignment, &run_id)?;
            let config_toml = toml::to_string_pretty(&doc)
                .map_err(|err| format!("failed to render config for {run_id}: {err}"))?;
            let config: Config = toml::from_str(&config_toml)
                .map_err(|err| format!("invalid config for {run_id}: {err}"))?;
            slots.push(None);
            jobs.push(RunJob {
                run_id,
                split_id: split.id.clone(),
                params: assignment.clone(),
                config,
                config_toml,
            });
        }

        let executed = run_jobs(
            &jobs,
            workers,
            should_cancel,
            |job| execute_job(job, &split_events, artifacts, should_cancel),
            &mut |entry| tracker.record(entry),
        )?;
        let mut executed = executed.into_iter();
        for slot in slots {
            let entry = match slot {
                Some(entry) => entry,
                None => executed
                    .next()
                    .ok_or_else(|| format!("split {} lost a run result", split.id))?,
            };
            runs.push(entry);
        }
    }

    let result = SweepResult {
        sweep_id: sweep.sweep.id.clone(),
        sweep_dir,
        base_config: base_path.display().to_string(),
        runs,
    };
    write_sweep_outputs(&result, sweep.leaderboard.as_ref())?;
    info!(
        runs = result.runs.len(),
        ok = tracker.progress.ok_runs,
        skipped = tracker.progress.skipped_runs,
        errors = tracker.progress.error_runs,
        "sweep finished"
    );
    Ok(result)
}

struct RunJob {
    run_id: String,
    split_id: String,
    params: Assignment,
    config: Config,
    config_toml: String,
}

struct ProgressTracker<'a> {
    progress: SweepProgress,
    hook: Option<&'a mut dyn FnMut(SweepProgress)>,
}

impl<'a> ProgressTracker<'a> {
    fn new(total_runs: usize, hook: Option<&'a mut dyn FnMut(SweepProgress)>) -> Self {
        let mut tracker = Self {
            progress: SweepProgress {
                total_runs,
                ..SweepProgress::default()
            },
            hook,
        };
        tracker.emit();
        tracker
    }

    fn record(&mut self, entry: &SweepRunEntry) {
        let p = &mut self.progress;
        p.completed_runs += 1;
        p.last_run_id = Some(entry.run_id.clone());
        p.last_error = entry.error.clone();
        match entry.status.as_str() {
            "ok" => p.ok_runs += 1,
            "skipped" => p.skipped_runs += 1,
            "failed" | "error" => p.error_runs += 1,
            _ => {}
        }
        self.emit();
    }

    fn emit(&mut self) {
        if let Some(hook) = self.hook.as_mut() {
            hook(self.progress.clone());
        }
    }
}

/// A run that errors becomes an `error` entry; the sweep carries on.
fn execute_job(
    job: &RunJob,
    events: &InMemoryEventRepository,
    artifacts: &(dyn ArtifactWriter + Sync),
    should_cancel: CancelHook<'_>,
) -> SweepRunEntry {
    let outcome = crate::backtesting::run_backtest_with_cancel(
        &job.config,
        &job.config_toml,
        None,
        events,
        artifacts,
        should_cancel,
    )
    .and_then(|run_dir| read_summary(&run_dir.join("summary.json")));

    let (status, error, metrics) = match outcome {
        Ok(summary) => {
            let status = summary
                .pointer("/meta/status")
                .and_then(|v| v.as_str())
                .unwrap_or("ok")
                .to_string();
            (status, None, Some(run_metrics(&summary)))
        }
        Err(err) => {
            warn!(run_id = %job.run_id, error = %err, "sweep run errored");
            ("error".to_string(), Some(err), None)
        }
    };
    metrics::counter!("quantsys.sweep.runs_total", "status" => status.clone()).increment(1);

    SweepRunEntry {
        run_id: job.run_id.clone(),
        split_id: job.split_id.clone(),
        params: job.params.clone(),
        status,
        error,
        metrics,
    }
}

fn read_summary(path: &Path) -> Result<serde_json::Value, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("failed to parse {}: {err}", path.display()))
}

fn run_metrics(summary_json: &serde_json::Value) -> RunMetrics {
    let number = |pointer: &str| {
        summary_json
            .pointer(pointer)
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0)
    };
    let count = |pointer: &str| {
        summary_json
            .pointer(pointer)
            .and_then(|v| v.as_u64())
            .unwrap_or(0)
    };
    RunMetrics {
        events_processed: count("/meta/events_processed"),
        trades: count("/summary/trades"),
        win_rate: number("/summary/win_rate"),
        net_profit: number("/summary/net_profit"),
        total_return: number("/summary/total_return"),
        sharpe: number("/summary/sharpe"),
        max_drawdown: number("/summary/max_drawdown"),
        total_commission: number("/summary/total_commission"),
    }
}

fn resolve_relative(sweep_path: &Path, base: &str) -> PathBuf {
    let base = Path::new(base);
    if base.is_absolute() {
        return base.to_path_buf();
    }
    sweep_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(base)
}

fn split_window(split: &SweepSplit) -> Result<EventQuery, String> {
    let bound = |raw: &Option<String>| {
        raw.as_deref()
            .map(parse_bound)
            .transpose()
            .map_err(|err| format!("split {}: {err}", split.id))
    };
    Ok(EventQuery {
        source: PathBuf::new(),
        instruments: None,
        start: bound(&split.start)?,
        end: bound(&split.end)?,
    })
}

fn parse_bound(raw: &str) -> Result<i64, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("timestamp cannot be empty".to_string());
    }
    if let Ok(seconds) = raw.parse::<i64>() {
        return Ok(seconds);
    }
    if let Some(midnight) = chrono::NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
    {
        return Ok(midnight.and_utc().timestamp());
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|_| format!("unsupported timestamp {raw:?} (epoch seconds, YYYY-MM-DD or RFC 3339)"))
}
