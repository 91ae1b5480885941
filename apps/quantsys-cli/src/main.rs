mod commands;
mod infra;
mod obs;

use clap::{Parser, Subcommand};
use commands::Command;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quantsys")]
#[command(
    about = "Event-driven backtests with commission and slippage modeling",
    version,
    arg_required_else_help = true
)]
#[command(
    after_help = "Examples:\n  quantsys backtest --config configs/sample.toml --out runs/\n  quantsys validate --config configs/sample.toml --strict\n  quantsys sweep --config configs/sweep.toml\n  quantsys report --input runs/<run_id>/\n"
)]
struct Cli {
    /// Default tracing filter; env QUANTSYS_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Log output: text | json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    /// Serve Prometheus metrics on host:port.
    #[arg(long, global = true)]
    metrics_addr: Option<String>,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Run one backtest and write its artifacts under <out>/<run_id>/.
    Backtest {
        #[arg(long)]
        config: PathBuf,
        /// Overrides paths.out_dir.
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Check the config and the event feed without running.
    Validate {
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value_t = false)]
        strict: bool,
    },
    /// Recompute summary, KPIs and logs from an existing run directory.
    Report {
        #[arg(long)]
        input: PathBuf,
    },
    /// Expand a parameter grid over a base config and run every combination.
    Sweep {
        #[arg(long)]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = obs::init_tracing(&cli.log_level, &cli.log_format) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
    if let Err(err) = obs::init_metrics(cli.metrics_addr.as_deref()) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }

    let command = match cli.command {
        CliCommand::Backtest { config, out } => Command::Backtest { config, out },
        CliCommand::Validate { config, strict } => Command::Validate { config, strict },
        CliCommand::Report { input } => Command::Report { input },
        CliCommand::Sweep { config } => Command::Sweep { config },
    };

    match commands::run(command) {
        Ok(json) => {
            println!(
                "{}",
                serde_json::to_string(&json)
                    .unwrap_or_else(|_| "{\"status\":\"error\",\"error\":\"json\"}".to_string())
            );
        }
        Err(err) => {
            let code = if err.contains("strict validation failed") {
                2
            } else {
                1
            };
            eprintln!("error: {err}");
            std::process::exit(code);
        }
    }
}
