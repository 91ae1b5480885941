use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderKind {
    Market,
    Limit { limit_price: f64 },
}

/// What a strategy asks for. The engine stamps it into an [`Order`].
#[derive(Debug, Clone, PartialEq)]
pub struct OrderRequest {
    pub instrument: String,
    pub side: Side,
    pub quantity: f64,
    pub kind: OrderKind,
}

impl OrderRequest {
    pub fn market(instrument: impl Into<String>, side: Side, quantity: f64) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            quantity,
            kind: OrderKind::Market,
        }
    }

    pub fn limit(instrument: impl Into<String>, side: Side, quantity: f64, limit_price: f64) -> Self {
        Self {
            instrument: instrument.into(),
            side,
            quantity,
            kind: OrderKind::Limit { limit_price },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: u64,
    pub instrument: String,
    pub side: Side,
    pub quantity: f64,
    pub kind: OrderKind,
    /// Timestamp of the event the strategy was reacting to.
    pub created_at: i64,
}

impl Order {
    pub fn limit_price(&self) -> Option<f64> {
        match self.kind {
            OrderKind::Market => None,
            OrderKind::Limit { limit_price } => Some(limit_price),
        }
    }
}
