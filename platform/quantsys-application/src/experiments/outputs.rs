use super::sweep::{LeaderboardConfig, RunMetrics, SweepResult, SweepRunEntry};
use serde::Serialize;
use std::cmp::Ordering;
use std::path::Path;

#[derive(Serialize)]
struct ResultRow<'a> {
    run_id: &'a str,
    split_id: &'a str,
    status: &'a str,
    events_processed: Option<u64>,
    trades: Option<u64>,
    win_rate: Option<f64>,
    net_profit: Option<f64>,
    total_return: Option<f64>,
    sharpe: Option<f64>,
    max_drawdown: Option<f64>,
    total_commission: Option<f64>,
    error: &'a str,
}

impl<'a> From<&'a SweepRunEntry> for ResultRow<'a> {
    fn from(entry: &'a SweepRunEntry) -> Self {
        let m = entry.metrics;
        Self {
            run_id: &entry.run_id,
            split_id: &entry.split_id,
            status: &entry.status,
            events_processed: m.map(|m| m.events_processed),
            trades: m.map(|m| m.trades),
            win_rate: m.map(|m| m.win_rate),
            net_profit: m.map(|m| m.net_profit),
            total_return: m.map(|m| m.total_return),
            sharpe: m.map(|m| m.sharpe),
            max_drawdown: m.map(|m| m.max_drawdown),
            total_commission: m.map(|m| m.total_commission),
            error: entry.error.as_deref().unwrap_or(""),
        }
    }
}

#[derive(Serialize)]
struct LeaderboardRow<'a> {
    rank: usize,
    run_id: &'a str,
    split_id: &'a str,
    trades: u64,
    win_rate: f64,
    net_profit: f64,
    total_return: f64,
    sharpe: f64,
    max_drawdown: f64,
}

pub(crate) fn write_sweep_outputs(
    result: &SweepResult,
    leaderboard: Option<&LeaderboardConfig>,
) -> Result<(), String> {
    let dir = result.sweep_dir.as_path();

    let manifest = dir.join("manifest.json");
    let json = serde_json::to_vec_pretty(result)
        .map_err(|err| format!("failed to serialize sweep manifest: {err}"))?;
    std::fs::write(&manifest, json)
        .map_err(|err| format!("failed to write {}: {err}", manifest.display()))?;

    write_rows(
        &dir.join("results.csv"),
        result.runs.iter().map(ResultRow::from),
    )?;
    write_rows(
        &dir.join("leaderboard.csv"),
        leaderboard_rows(&result.runs, leaderboard).into_iter(),
    )
}

/// Ranks `ok` runs that have metrics. Default key: `sharpe`, best first.
fn leaderboard_rows<'a>(
    runs: &'a [SweepRunEntry],
    config: Option<&LeaderboardConfig>,
) -> Vec<LeaderboardRow<'a>> {
    let key = config
        .and_then(|c| c.sort_by.as_deref())
        .map(|key| key.trim().to_lowercase())
        .unwrap_or_else(|| "sharpe".to_string());
    let descending = config.and_then(|c| c.descending).unwrap_or(true);

    let mut ranked: Vec<(&SweepRunEntry, RunMetrics)> = runs
        .iter()
        .filter(|entry| entry.status == "ok")
        .filter_map(|entry| entry.metrics.map(|metrics| (entry, metrics)))
        .collect();
    ranked.sort_by(|(_, a), (_, b)| {
        let order = sort_value(a, &key)
            .partial_cmp(&sort_value(b, &key))
            .unwrap_or(Ordering::Equal);
        if descending {
            order.reverse()
        } else {
            order
        }
    });

    ranked
        .into_iter()
        .enumerate()
        .map(|(index, (entry, m))| LeaderboardRow {
            rank: index + 1,
            run_id: &entry.run_id,
            split_id: &entry.split_id,
            trades: m.trades,
            win_rate: m.win_rate,
            net_profit: m.net_profit,
            total_return: m.total_return,
            sharpe: m.sharpe,
            max_drawdown: m.max_drawdown,
        })
        .collect()
}

fn sort_value(metrics: &RunMetrics, key: &str) -> f64 {
    match key {
        "net_profit" => metrics.net_profit,
        "total_return" => metrics.total_return,
        "max_drawdown" | "max_dd" => metrics.max_drawdown,
        "win_rate" => metrics.win_rate,
        "trades" => metrics.trades as f64,
        "total_commission" => metrics.total_commission,
        _ => metrics.sharpe,
    }
}

fn write_rows<T: Serialize>(path: &Path, rows: impl Iterator<Item = T>) -> Result<(), String> {
    let mut wtr = csv::Writer::from_path(path)
        .map_err(|err| format!("failed to create {}: {err}", path.display()))?;
    for row in rows {
        wtr.serialize(row)
            .map_err(|err| format!("failed to write row to {}: {err}", path.display()))?;
    }
    wtr.flush()
        .map_err(|err| format!("failed to flush {}: {err}", path.display()))
}
