use crate::config::{Config, StrategyName};
use quantsys_domain::services::engine::{EngineConfig, ExecutionConfig, OrderingPolicy};
use quantsys_domain::services::feed_quality::FeedQualityReport;
use quantsys_domain::services::performance::PerformanceConfig;
use quantsys_domain::services::strategy::{
    BuyAndHold, HoldStrategy, SmaCross, StrategyKind, TargetWeights,
};
use quantsys_domain::value_objects::equity_point::EquityPoint;

pub fn resolve_execution_config(config: &Config) -> Result<ExecutionConfig, String> {
    let slippage_bps = config.costs.slippage_bps;
    if !slippage_bps.is_finite() || slippage_bps < 0.0 {
        return Err("costs.slippage_bps must be finite and >= 0".to_string());
    }

    let exec = config.execution.as_ref();
    let model = exec
        .and_then(|exec| exec.slippage_model.as_deref())
        .map(|s| s.trim().to_lowercase())
        .unwrap_or_else(|| {
            if slippage_bps > 0.0 {
                "fixed_bps".to_string()
            } else {
                "none".to_string()
            }
        });

    ExecutionConfig::from_options(
        config.costs.commission_rate,
        config.costs.commission_fixed.unwrap_or(0.0),
        &model,
        slippage_bps,
        exec.and_then(|exec| exec.reference_volume),
    )
    .map_err(|err| err.to_string())
}

pub fn resolve_engine_config(config: &Config) -> Result<EngineConfig, String> {
    let execution = resolve_execution_config(config)?;
    let mut engine = EngineConfig::new(config.run.initial_capital)
        .with_execution(execution)
        .with_ordering(config.run.ordering.unwrap_or(OrderingPolicy::Strict));
    if let Some(start) = config.run.start_timestamp {
        engine = engine.with_start_timestamp(start);
    }
    if let Some(instruments) = &config.run.instruments {
        engine = engine.with_universe(instruments.iter().cloned());
    }
    engine.validate().map_err(|err| err.to_string())?;
    Ok(engine)
}

pub fn resolve_sma_windows(config: &Config) -> (usize, usize) {
    match (config.strategy.sma_short, config.strategy.sma_long) {
        (Some(short), Some(long)) => (short as usize, long as usize),
        _ => (10, 50),
    }
}

pub fn build_strategy(config: &Config) -> Result<StrategyKind, String> {
    let strategy = &config.strategy;
    let instrument = || {
        strategy
            .instrument
            .clone()
            .or_else(|| {
                config
                    .run
                    .instruments
                    .as_ref()
                    .and_then(|list| list.first().cloned())
            })
            .ok_or_else(|| format!("strategy.kind={} requires strategy.instrument", kind_label(strategy.kind)))
    };
    let quantity = strategy.quantity.unwrap_or(1.0);

    let kind = match strategy.kind {
        StrategyName::BuyAndHold => StrategyKind::BuyAndHold(BuyAndHold::new(instrument()?, quantity)),
        StrategyName::SmaCross => {
            let (short, long) = resolve_sma_windows(config);
            if short == 0 || long == 0 || short >= long {
                return Err(format!(
                    "strategy.sma_short ({short}) must be > 0 and below strategy.sma_long ({long})"
                ));
            }
            StrategyKind::SmaCross(SmaCross::new(instrument()?, short, long, quantity))
        }
        StrategyName::Hold => StrategyKind::Hold(HoldStrategy),
        StrategyName::TargetWeights => {
            let weights = strategy
                .weights
                .clone()
                .filter(|w| !w.is_empty())
                .ok_or_else(|| "strategy.kind=target_weights requires strategy.weights".to_string())?;
            if weights.values().any(|w| !w.is_finite()) {
                return Err("strategy.weights must be finite".to_string());
            }
            let every = strategy.rebalance_seconds.unwrap_or(86_400);
            if every <= 0 {
                return Err("strategy.rebalance_seconds must be > 0".to_string());
            }
            StrategyKind::TargetWeights(TargetWeights::new(weights, every))
        }
    };
    Ok(kind)
}

pub fn kind_label(kind: StrategyName) -> &'static str {
    match kind {
        StrategyName::BuyAndHold => "buy_and_hold",
        StrategyName::SmaCross => "sma_cross",
        StrategyName::Hold => "hold",
        StrategyName::TargetWeights => "target_weights",
    }
}

pub fn build_performance_config(config: &Config) -> PerformanceConfig {
    let defaults = PerformanceConfig::default();
    PerformanceConfig {
        risk_free_rate: config
            .metrics
            .as_ref()
            .and_then(|metrics| metrics.risk_free_rate)
            .unwrap_or(defaults.risk_free_rate),
        periods_per_year: config
            .metrics
            .as_ref()
            .and_then(|metrics| metrics.periods_per_year)
            .unwrap_or(defaults.periods_per_year),
    }
}

pub fn check_feed_quality(config: &Config, report: &FeedQualityReport) -> Result<(), String> {
    let Some(limits) = config.data_quality.as_ref() else {
        return Ok(());
    };
    let checks = [
        ("duplicates", report.duplicates, limits.max_duplicates),
        ("out_of_order", report.out_of_order, limits.max_out_of_order),
        ("invalid_price", report.invalid_price, limits.max_invalid_price),
    ];
    for (label, found, max) in checks {
        if let Some(max) = max {
            if found > max {
                return Err(format!(
                    "data quality check failed: {label}={found} exceeds max_{label}={max}"
                ));
            }
        }
    }
    Ok(())
}

pub fn summary_meta_json_from_equity(
    config: &Config,
    equity: &[EquityPoint],
) -> Option<serde_json::Value> {
    let start = equity.first()?.timestamp;
    let end = equity.last()?.timestamp;
    Some(serde_json::json!({
        "run_id": config.run.run_id,
        "strategy": kind_label(config.strategy.kind),
        "instruments": config.run.instruments,
        "start": start,
        "end": end,
    }))
}

pub fn config_snapshot_json(config: &Config, execution: &ExecutionConfig) -> serde_json::Value {
    serde_json::json!({
        "run": {
            "initial_capital": config.run.initial_capital,
            "start_timestamp": config.run.start_timestamp,
            "ordering": config.run.ordering.unwrap_or(OrderingPolicy::Strict),
            "instruments": config.run.instruments,
        },
        "costs": {
            "commission_rate": execution.commission_rate,
            "commission_fixed": execution.commission_fixed,
            "slippage_bps": config.costs.slippage_bps,
        },
        "execution": {
            "slippage_model": execution.slippage_model_name(),
            "slippage": execution.slippage,
            "fill_policy": execution.fill_policy,
        },
        "strategy": {
            "kind": kind_label(config.strategy.kind),
            "instrument": config.strategy.instrument,
            "quantity": config.strategy.quantity,
            "sma_short": config.strategy.sma_short,
            "sma_long": config.strategy.sma_long,
            "weights": config.strategy.weights,
            "rebalance_seconds": config.strategy.rebalance_seconds,
        },
        "metrics": build_performance_config(config),
        "data_quality": config.data_quality.as_ref().map(|dq| serde_json::json!({
            "max_duplicates": dq.max_duplicates,
            "max_out_of_order": dq.max_out_of_order,
            "max_invalid_price": dq.max_invalid_price,
        })),
    })
}

#[cfg(test)]
mod tests {
    use super::{build_strategy, check_feed_quality, resolve_engine_config, resolve_execution_config};
    use crate::config::Config;
    use quantsys_domain::services::engine::SlippageModel;
    use quantsys_domain::services::feed_quality::FeedQualityReport;
    use quantsys_domain::services::strategy::Strategy;

    fn config_with(extra: &str) -> Config {
        let toml_str = format!(
            r#"
[run]
run_id = "test_run"
initial_capital = 1000.0

[paths]
events_path = "events.csv"
out_dir = "runs/"

[costs]
commission_rate = 0.001
slippage_bps = 5.0

{extra}
"#
        );
        toml::from_str(&toml_str).expect("config should parse")
    }

    #[test]
    fn slippage_defaults_to_fixed_bps_when_non_zero() {
        let cfg = config_with("[strategy]\nkind = \"hold\"\n");
        let exec = resolve_execution_config(&cfg).expect("resolve");
        assert_eq!(exec.slippage, SlippageModel::FixedBps { bps: 5.0 });
    }

    #[test]
    fn volume_model_requires_reference_volume() {
        let cfg = config_with(
            "[execution]\nslippage_model = \"volume_proportional\"\n\n[strategy]\nkind = \"hold\"\n",
        );
        let err = resolve_execution_config(&cfg).expect_err("missing reference volume");
        assert!(err.contains("reference_volume"));
    }

    #[test]
    fn engine_config_carries_universe_and_start() {
        let mut cfg = config_with("[strategy]\nkind = \"hold\"\n");
        cfg.run.instruments = Some(vec!["AAA".to_string()]);
        cfg.run.start_timestamp = Some(5);
        let engine = resolve_engine_config(&cfg).expect("engine");
        assert_eq!(engine.start_timestamp, Some(5));
        assert!(engine.universe.as_ref().is_some_and(|u| u.contains("AAA")));
    }

    #[test]
    fn sma_cross_needs_ordered_windows() {
        let cfg = config_with(
            "[strategy]\nkind = \"sma_cross\"\ninstrument = \"AAA\"\nsma_short = 20\nsma_long = 5\n",
        );
        assert!(build_strategy(&cfg).is_err());

        let cfg = config_with(
            "[strategy]\nkind = \"sma_cross\"\ninstrument = \"AAA\"\nsma_short = 2\nsma_long = 5\n",
        );
        let strategy = build_strategy(&cfg).expect("strategy");
        assert_eq!(strategy.name(), "sma_cross");
    }

    #[test]
    fn buy_and_hold_needs_an_instrument() {
        let cfg = config_with("[strategy]\nkind = \"buy_and_hold\"\n");
        assert!(build_strategy(&cfg).is_err());
    }

    #[test]
    fn feed_quality_limits_are_enforced() {
        let cfg = config_with("[strategy]\nkind = \"hold\"\n\n[data_quality]\nmax_duplicates = 0\n");
        let clean = FeedQualityReport::default();
        assert!(check_feed_quality(&cfg, &clean).is_ok());
        let dirty = FeedQualityReport {
            duplicates: 2,
            ..FeedQualityReport::default()
        };
        let err = check_feed_quality(&cfg, &dirty).expect_err("limit exceeded");
        assert!(err.contains("duplicates=2"));
    }
}
