use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: String,
    /// Signed: negative when short.
    pub quantity: f64,
    pub avg_price: f64,
    pub realized_pnl: f64,
}

impl Position {
    pub fn flat(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            quantity: 0.0,
            avg_price: 0.0,
            realized_pnl: 0.0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    pub fn market_value(&self, mark: f64) -> f64 {
        self.quantity * mark
    }

    pub fn unrealized_pnl(&self, mark: f64) -> f64 {
        if self.is_flat() {
            return 0.0;
        }
        (mark - self.avg_price) * self.quantity
    }
}
