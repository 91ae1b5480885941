use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: u64,
    pub instrument: String,
    pub side: Side,
    pub quantity: f64,
    /// Executed price, after slippage.
    pub price: f64,
    /// Event price the fill was derived from.
    pub reference_price: f64,
    pub commission: f64,
    pub slippage_cost: f64,
    pub realized_pnl: f64,
    pub timestamp: i64,
}

impl Fill {
    pub fn notional(&self) -> f64 {
        self.quantity * self.price
    }
}
