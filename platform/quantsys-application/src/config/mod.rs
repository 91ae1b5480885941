use quantsys_domain::services::engine::OrderingPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StrategyName {
    BuyAndHold,
    SmaCross,
    Hold,
    TargetWeights,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub paths: PathsConfig,
    pub costs: CostsConfig,
    pub execution: Option<ExecutionConfig>,
    pub strategy: StrategyConfig,
    pub metrics: Option<MetricsConfig>,
    pub data_quality: Option<DataQualityConfig>,
    pub report: Option<ReportConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: String,
    pub initial_capital: f64,
    pub start_timestamp: Option<i64>,
    pub ordering: Option<OrderingPolicy>,
    /// Restricts both the loaded feed and the tradable universe.
    pub instruments: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub events_path: String,
    pub out_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct CostsConfig {
    /// Fraction of traded notional, e.g. `0.001` for 10 bps.
    pub commission_rate: f64,
    pub commission_fixed: Option<f64>,
    pub slippage_bps: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ExecutionConfig {
    pub slippage_model: Option<String>,
    pub reference_volume: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct StrategyConfig {
    pub kind: StrategyName,
    pub instrument: Option<String>,
    pub quantity: Option<f64>,
    pub sma_short: Option<u64>,
    pub sma_long: Option<u64>,
    pub weights: Option<BTreeMap<String, f64>>,
    pub rebalance_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    pub risk_free_rate: Option<f64>,
    pub periods_per_year: Option<f64>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct DataQualityConfig {
    pub max_duplicates: Option<usize>,
    pub max_out_of_order: Option<usize>,
    pub max_invalid_price: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReportConfig {
    /// Instrument used for the buy-and-hold benchmark column.
    pub benchmark: Option<String>,
    pub stress_scenarios: Option<Vec<String>>,
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    let (config, _source) = load_config_with_source(path)?;
    Ok(config)
}

pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    Ok((config, contents))
}

pub fn to_toml_pretty(config: &Config) -> Result<String, String> {
    toml::to_string_pretty(config)
        .map_err(|err| format!("failed to serialize config as TOML: {err}"))
}
