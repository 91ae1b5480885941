use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A single observation from the price/event feed.
///
/// Events are totally ordered by `(timestamp, instrument)`; two events sharing
/// both keep their feed order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketEvent {
    pub timestamp: i64,
    pub instrument: String,
    pub price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bid: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ask: Option<f64>,
}

impl MarketEvent {
    pub fn trade(timestamp: i64, instrument: impl Into<String>, price: f64) -> Self {
        Self {
            timestamp,
            instrument: instrument.into(),
            price,
            volume: None,
            bid: None,
            ask: None,
        }
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }

    pub fn with_quote(mut self, bid: f64, ask: f64) -> Self {
        self.bid = Some(bid);
        self.ask = Some(ask);
        self
    }

    pub fn cmp_key(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.instrument.cmp(&other.instrument))
    }
}
