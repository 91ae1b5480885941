mod backtest;
mod common;
mod report;
mod sweep;
mod validate;

use std::path::PathBuf;

pub enum Command {
    Backtest { config: PathBuf, out: Option<PathBuf> },
    Validate { config: PathBuf, strict: bool },
    Report { input: PathBuf },
    Sweep { config: PathBuf },
}

pub fn run(command: Command) -> Result<serde_json::Value, String> {
    let start = std::time::Instant::now();
    let (label, result) = match command {
        Command::Backtest { config, out } => ("backtest", backtest::run_backtest(config, out)),
        Command::Validate { config, strict } => {
            ("validate", validate::run_validate(config, strict))
        }
        Command::Report { input } => ("report", report::run_report(input)),
        Command::Sweep { config } => ("sweep", sweep::run_sweep(config)),
    };
    let status = if result.is_ok() { "ok" } else { "error" };
    metrics::counter!("quantsys.cli.commands_total", "command" => label, "status" => status)
        .increment(1);
    metrics::histogram!("quantsys.cli.command_ms", "command" => label)
        .record(start.elapsed().as_millis() as f64);
    result
}
