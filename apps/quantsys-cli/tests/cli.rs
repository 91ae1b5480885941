use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_tmp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    std::env::temp_dir().join(format!("quantsys_{prefix}_{}_{}", std::process::id(), now))
}

fn quantsys() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_quantsys"));
    cmd.env("QUANTSYS_LOG", "warn");
    cmd
}

fn write_fixture(dir: &Path) -> PathBuf {
    fs::create_dir_all(dir).expect("create fixture dir");
    let mut csv = String::from("timestamp,instrument,price,volume\n");
    for day in 1..=30 {
        let price = 100.0 + ((day as f64) * 0.4).sin() * 8.0;
        csv.push_str(&format!("{},SPY,{price:.4},1000\n", day * 86_400));
    }
    fs::write(dir.join("events.csv"), csv).expect("write events");

    let config = format!(
        r#"
[run]
run_id = "cli_run"
initial_capital = 10000.0

[paths]
events_path = "{events}"
out_dir = "{out}"

[costs]
commission_rate = 0.001
slippage_bps = 5.0

[strategy]
kind = "sma_cross"
instrument = "SPY"
quantity = 10.0
sma_short = 2
sma_long = 5
"#,
        events = dir.join("events.csv").display(),
        out = dir.join("runs").display(),
    );
    let config_path = dir.join("config.toml");
    fs::write(&config_path, config).expect("write config");
    config_path
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line = stdout.lines().last().expect("json line on stdout");
    serde_json::from_str(line).expect("stdout is json")
}

#[test]
fn backtest_then_report_round_trip() {
    let dir = unique_tmp_dir("cli_backtest");
    let config_path = write_fixture(&dir);

    let output = quantsys()
        .args(["backtest", "--config"])
        .arg(&config_path)
        .output()
        .expect("run backtest");
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let json = stdout_json(&output);
    assert_eq!(json["mode"], "backtest");
    assert_eq!(json["status"], "ok");

    let run_dir = dir.join("runs").join("cli_run");
    for name in [
        "trades.csv",
        "equity.csv",
        "rejected_orders.csv",
        "summary.json",
        "kpis.json",
        "equity_curve.json",
        "logs.jsonl",
        "config_snapshot.toml",
    ] {
        assert!(run_dir.join(name).exists(), "missing {name}");
    }

    let output = quantsys()
        .args(["report", "--input"])
        .arg(&run_dir)
        .output()
        .expect("run report");
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["run_id"], "cli_run");
    assert_eq!(report["summary"]["trades"], json["summary"]["trades"]);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn validate_prints_feed_quality() {
    let dir = unique_tmp_dir("cli_validate");
    let config_path = write_fixture(&dir);

    let output = quantsys()
        .args(["validate", "--strict", "--config"])
        .arg(&config_path)
        .output()
        .expect("run validate");
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["report"]["events"]["rows"], 30);
    assert_eq!(json["report"]["events"]["clean"], true);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn missing_config_exits_with_error() {
    let output = quantsys()
        .args(["backtest", "--config", "/definitely/not/here.toml"])
        .output()
        .expect("run backtest");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error: failed to read config"));
}
