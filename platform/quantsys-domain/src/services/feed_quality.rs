use crate::value_objects::market_event::MarketEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Counts of suspicious rows in a feed. Nothing is dropped or reordered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedQualityReport {
    pub rows: usize,
    /// Rows repeating an earlier `(timestamp, instrument)` pair.
    pub duplicates: usize,
    /// Rows whose timestamp is below the previous row's.
    pub out_of_order: usize,
    pub invalid_price: usize,
    pub instruments: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

impl FeedQualityReport {
    pub fn is_clean(&self) -> bool {
        self.duplicates == 0 && self.out_of_order == 0 && self.invalid_price == 0
    }
}

pub fn feed_quality_from_events(events: &[MarketEvent]) -> FeedQualityReport {
    let mut report = FeedQualityReport {
        rows: events.len(),
        ..FeedQualityReport::default()
    };
    let mut seen: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    let mut previous: Option<i64> = None;

    for event in events {
        if !seen
            .entry(event.instrument.as_str())
            .or_default()
            .insert(event.timestamp)
        {
            report.duplicates += 1;
        }
        if previous.is_some_and(|prev| event.timestamp < prev) {
            report.out_of_order += 1;
        }
        if !event.price.is_finite() || event.price <= 0.0 {
            report.invalid_price += 1;
        }
        previous = Some(event.timestamp);
        report.first_timestamp = Some(
            report
                .first_timestamp
                .map_or(event.timestamp, |ts| ts.min(event.timestamp)),
        );
        report.last_timestamp = Some(
            report
                .last_timestamp
                .map_or(event.timestamp, |ts| ts.max(event.timestamp)),
        );
    }
    report.instruments = seen.len();
    report
}
