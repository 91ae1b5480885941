use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: f64,
    pub cash: f64,
    pub gross_exposure: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
}

impl EquityPoint {
    pub fn baseline(timestamp: i64, cash: f64) -> Self {
        Self {
            timestamp,
            equity: cash,
            cash,
            gross_exposure: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
        }
    }
}
