use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that prevent a backtest from starting.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BacktestError {
    /// Input events went backwards in time under the strict ordering policy.
    #[error(
        "event #{index} ({instrument}) at timestamp {timestamp} precedes previous timestamp {previous}"
    )]
    OutOfOrder {
        index: usize,
        instrument: String,
        timestamp: i64,
        previous: i64,
    },

    /// The configured baseline timestamp is not before the first event.
    #[error("start timestamp {start} must precede the first event timestamp {first}")]
    StartNotBeforeFirstEvent { start: i64, first: i64 },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BacktestError {
    pub fn is_ordering_error(&self) -> bool {
        matches!(
            self,
            Self::OutOfOrder { .. } | Self::StartNotBeforeFirstEvent { .. }
        )
    }
}

/// Why a single order was rejected. The run keeps going.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InvalidOrderError {
    #[error("quantity must be finite and > 0 (got {quantity})")]
    NonPositiveQuantity { quantity: f64 },

    #[error("unknown instrument: {instrument}")]
    UnknownInstrument { instrument: String },

    #[error("limit price must be finite and > 0 (got {limit_price})")]
    InvalidLimitPrice { limit_price: f64 },
}

impl InvalidOrderError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::NonPositiveQuantity { .. } => "non_positive_quantity",
            Self::UnknownInstrument { .. } => "unknown_instrument",
            Self::InvalidLimitPrice { .. } => "invalid_limit_price",
        }
    }
}

/// Fatal condition hit mid-run; reported inside a failed result.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EngineFailure {
    #[error("numeric instability at {timestamp} ({instrument}): {detail}")]
    NumericInstability {
        timestamp: i64,
        instrument: String,
        detail: String,
    },
}

#[cfg(test)]
mod tests {
    use super::{BacktestError, InvalidOrderError};

    #[test]
    fn ordering_errors_are_classified() {
        let err = BacktestError::OutOfOrder {
            index: 3,
            instrument: "AAA".to_string(),
            timestamp: 5,
            previous: 9,
        };
        assert!(err.is_ordering_error());
        assert!(err.to_string().contains("precedes previous timestamp 9"));
        assert!(!BacktestError::Config("x".to_string()).is_ordering_error());
    }

    #[test]
    fn invalid_order_serializes_with_kind_tag() {
        let err = InvalidOrderError::NonPositiveQuantity { quantity: -5.0 };
        let json = serde_json::to_value(&err).expect("serialize");
        assert_eq!(json["kind"], "non_positive_quantity");
        assert_eq!(err.code(), "non_positive_quantity");
    }
}
