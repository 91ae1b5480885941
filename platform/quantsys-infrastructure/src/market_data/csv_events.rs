use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use quantsys_domain::repositories::market_data::{EventQuery, EventRepository};
use quantsys_domain::services::feed_quality::{feed_quality_from_events, FeedQualityReport};
use quantsys_domain::value_objects::market_event::MarketEvent;
use serde::Deserialize;
use std::fs::File;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info_span, warn};

#[derive(Debug, Deserialize)]
struct EventRecord {
    timestamp: String,
    instrument: String,
    price: f64,
    #[serde(default)]
    volume: Option<f64>,
    #[serde(default)]
    bid: Option<f64>,
    #[serde(default)]
    ask: Option<f64>,
}

/// Reads `timestamp,instrument,price[,volume][,bid][,ask]` files.
///
/// Rows come back in file order. Ordering and price validity are left to the
/// engine; they only show up as counts in the [`FeedQualityReport`].
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvEventRepository;

impl CsvEventRepository {
    pub fn new() -> Self {
        Self
    }
}

impl EventRepository for CsvEventRepository {
    fn load_events(
        &self,
        query: &EventQuery,
    ) -> Result<(Vec<MarketEvent>, FeedQualityReport), String> {
        let start = Instant::now();
        let result = load_csv(&query.source).map(|events| {
            let events: Vec<MarketEvent> =
                events.into_iter().filter(|e| query.accepts(e)).collect();
            let report = feed_quality_from_events(&events);
            (events, report)
        });
        let result_label = if result.is_ok() { "ok" } else { "err" };
        metrics::counter!("quantsys.infra.events.load.calls_total", "result" => result_label)
            .increment(1);
        metrics::histogram!("quantsys.infra.events.load_ms")
            .record(start.elapsed().as_millis() as f64);
        if let Ok((_, report)) = &result {
            if !report.is_clean() {
                warn!(
                    duplicates = report.duplicates,
                    out_of_order = report.out_of_order,
                    invalid_price = report.invalid_price,
                    "event feed has quality issues"
                );
            }
        }
        result
    }
}

pub fn load_csv(path: &Path) -> Result<Vec<MarketEvent>, String> {
    let _span = info_span!("load_events_csv", path = %path.display()).entered();
    let file = File::open(path)
        .map_err(|err| format!("failed to open events CSV {}: {}", path.display(), err))?;
    let mut reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(file);

    let mut events = Vec::new();
    for (row, result) in reader.deserialize::<EventRecord>().enumerate() {
        let record =
            result.map_err(|err| format!("failed to parse CSV row {}: {}", row + 1, err))?;
        let timestamp = parse_timestamp(&record.timestamp)
            .map_err(|err| format!("row {}: {err}", row + 1))?;
        if record.instrument.is_empty() {
            return Err(format!("row {}: instrument cannot be empty", row + 1));
        }
        events.push(MarketEvent {
            timestamp,
            instrument: record.instrument,
            price: record.price,
            volume: record.volume,
            bid: record.bid,
            ask: record.ask,
        });
    }
    debug!(rows = events.len(), "events loaded");
    Ok(events)
}

fn parse_timestamp(value: &str) -> Result<i64, String> {
    if let Ok(seconds) = value.parse::<i64>() {
        return Ok(seconds);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.timestamp());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        let dt: DateTime<Utc> = Utc.from_utc_datetime(&naive);
        return Ok(dt.timestamp());
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(naive) = date.and_hms_opt(0, 0, 0) {
            return Ok(Utc.from_utc_datetime(&naive).timestamp());
        }
    }

    Err(format!("unsupported timestamp format: {}", value))
}
