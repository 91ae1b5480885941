use crate::config::Config;
use crate::shared::{build_strategy, kind_label, resolve_engine_config};
use quantsys_domain::repositories::market_data::{EventQuery, EventRepository};
use quantsys_domain::services::feed_quality::FeedQualityReport;
use quantsys_domain::services::strategy::Strategy;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info_span;

/// Loads the feed and resolves engine and strategy settings without running.
///
/// With `strict`, any `[data_quality]` limit left unset counts as zero.
pub fn validate(
    config: &Config,
    strict: bool,
    events_repo: &dyn EventRepository,
) -> Result<serde_json::Value, String> {
    let _span = info_span!(
        "validate",
        strict = strict,
        run_id = %config.run.run_id,
        events_path = %config.paths.events_path
    )
    .entered();

    let engine = resolve_engine_config(config)?;
    let strategy = build_strategy(config)?;

    let stage_start = Instant::now();
    let (events, report) = events_repo.load_events(&EventQuery {
        source: PathBuf::from(&config.paths.events_path),
        instruments: config.run.instruments.clone(),
        start: None,
        end: None,
    })?;
    metrics::histogram!("quantsys.validate.load_events_ms")
        .record(stage_start.elapsed().as_millis() as f64);

    let limits = config.data_quality.as_ref();
    let default_limit = if strict { Some(0) } else { None };
    let max_duplicates = limits.and_then(|l| l.max_duplicates).or(default_limit);
    let max_out_of_order = limits.and_then(|l| l.max_out_of_order).or(default_limit);
    let max_invalid_price = limits.and_then(|l| l.max_invalid_price).or(default_limit);

    let exceeded = |found: usize, max: Option<usize>| max.is_some_and(|max| found > max);
    if strict
        && (exceeded(report.duplicates, max_duplicates)
            || exceeded(report.out_of_order, max_out_of_order)
            || exceeded(report.invalid_price, max_invalid_price))
    {
        return Err("strict validation failed: data quality limits exceeded".to_string());
    }

    if let (Some(start), Some(first)) = (engine.start_timestamp, report.first_timestamp) {
        if start >= first {
            return Err(format!(
                "run.start_timestamp ({start}) must precede the first event ({first})"
            ));
        }
    }

    metrics::gauge!("quantsys.validate.events.duplicates").set(report.duplicates as f64);
    metrics::gauge!("quantsys.validate.events.out_of_order").set(report.out_of_order as f64);
    metrics::gauge!("quantsys.validate.events.invalid_price").set(report.invalid_price as f64);

    Ok(serde_json::json!({
        "events": feed_quality_json(&report),
        "loaded_rows": events.len(),
        "strategy": {
            "kind": kind_label(config.strategy.kind),
            "name": strategy.name(),
        },
        "execution": {
            "slippage_model": engine.execution.slippage_model_name(),
            "commission_rate": engine.execution.commission_rate,
            "commission_fixed": engine.execution.commission_fixed,
        },
        "limits": {
            "max_duplicates": max_duplicates,
            "max_out_of_order": max_out_of_order,
            "max_invalid_price": max_invalid_price,
        },
        "strict": strict,
    }))
}

fn feed_quality_json(report: &FeedQualityReport) -> serde_json::Value {
    serde_json::json!({
        "rows": report.rows,
        "instruments": report.instruments,
        "duplicates": report.duplicates,
        "out_of_order": report.out_of_order,
        "invalid_price": report.invalid_price,
        "first_timestamp": report.first_timestamp,
        "last_timestamp": report.last_timestamp,
        "clean": report.is_clean(),
    })
}
