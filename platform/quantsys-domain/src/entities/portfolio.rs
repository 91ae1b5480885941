use crate::value_objects::position::Position;
use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Residual quantities below this are treated as flat.
const QTY_EPSILON: f64 = 1e-9;

/// Cash, positions and last marks for a single run.
///
/// Positions that go flat are kept as zero entries (`avg_price = 0`) for the
/// rest of the run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    cash: f64,
    positions: BTreeMap<String, Position>,
    marks: BTreeMap<String, f64>,
    realized_pnl: f64,
    total_commission: f64,
}

impl Portfolio {
    pub fn new_with_cash(initial_cash: f64) -> Self {
        Self {
            cash: initial_cash,
            ..Self::default()
        }
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn total_commission(&self) -> f64 {
        self.total_commission
    }

    pub fn positions(&self) -> &BTreeMap<String, Position> {
        &self.positions
    }

    pub fn position(&self, instrument: &str) -> Option<&Position> {
        self.positions.get(instrument)
    }

    pub fn position_qty(&self, instrument: &str) -> f64 {
        self.positions
            .get(instrument)
            .map(|pos| pos.quantity)
            .unwrap_or(0.0)
    }

    pub fn mark(&self, instrument: &str) -> Option<f64> {
        self.marks.get(instrument).copied()
    }

    pub fn marks(&self) -> &BTreeMap<String, f64> {
        &self.marks
    }

    pub fn update_mark(&mut self, instrument: &str, price: f64) {
        match self.marks.get_mut(instrument) {
            Some(mark) => *mark = price,
            None => {
                self.marks.insert(instrument.to_string(), price);
            }
        }
    }

    /// Cash after a hypothetical fill, without mutating anything.
    pub fn cash_after_fill(&self, side: Side, quantity: f64, price: f64, commission: f64) -> f64 {
        self.cash - side.sign() * quantity * price - commission
    }

    /// Applies a fill using average-cost accounting and returns the P&L it
    /// realized (gross of commission).
    pub fn apply_fill(
        &mut self,
        instrument: &str,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
    ) -> f64 {
        if quantity <= 0.0 {
            return 0.0;
        }

        self.cash = self.cash_after_fill(side, quantity, price, commission);
        self.total_commission += commission;

        let signed = side.sign() * quantity;
        let position = self
            .positions
            .entry(instrument.to_string())
            .or_insert_with(|| Position::flat(instrument));

        let held = position.quantity;
        let mut realized = 0.0;
        if held == 0.0 || held.signum() == signed.signum() {
            let next_qty = held + signed;
            position.avg_price =
                (held.abs() * position.avg_price + quantity * price) / next_qty.abs();
            position.quantity = next_qty;
        } else {
            let closed = held.abs().min(quantity);
            realized = (price - position.avg_price) * closed * held.signum();
            let next_qty = held + signed;
            if next_qty.abs() < QTY_EPSILON {
                position.quantity = 0.0;
                position.avg_price = 0.0;
            } else if next_qty.signum() == held.signum() {
                position.quantity = next_qty;
            } else {
                // Flipped through zero: the remainder opens at the trade price.
                position.quantity = next_qty;
                position.avg_price = price;
            }
        }

        position.realized_pnl += realized;
        self.realized_pnl += realized;
        realized
    }

    fn valuation_price(&self, position: &Position) -> f64 {
        self.marks
            .get(&position.instrument)
            .copied()
            .unwrap_or(position.avg_price)
    }

    /// Cash plus every position valued at its last mark.
    pub fn equity(&self) -> f64 {
        self.cash
            + self
                .positions
                .values()
                .map(|pos| pos.market_value(self.valuation_price(pos)))
                .sum::<f64>()
    }

    pub fn gross_exposure(&self) -> f64 {
        self.positions
            .values()
            .map(|pos| pos.market_value(self.valuation_price(pos)).abs())
            .sum()
    }

    pub fn unrealized_pnl(&self) -> f64 {
        self.positions
            .values()
            .map(|pos| pos.unrealized_pnl(self.valuation_price(pos)))
            .sum()
    }

    pub fn open_position_count(&self) -> usize {
        self.positions.values().filter(|pos| !pos.is_flat()).count()
    }
}
