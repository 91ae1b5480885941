pub mod equity_point;
pub mod fill;
pub mod market_event;
pub mod order;
pub mod position;
pub mod side;
