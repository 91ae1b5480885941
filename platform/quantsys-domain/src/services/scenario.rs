use crate::entities::portfolio::Portfolio;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scenario {
    pub name: &'static str,
    /// Uniform return applied to every holding.
    pub shock: f64,
}

pub const SCENARIOS: [Scenario; 4] = [
    Scenario {
        name: "crash",
        shock: -0.30,
    },
    Scenario {
        name: "rally",
        shock: 0.20,
    },
    Scenario {
        name: "mild_bear",
        shock: -0.10,
    },
    Scenario {
        name: "mild_bull",
        shock: 0.10,
    },
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: String,
    pub shock: f64,
    pub expected_return: f64,
    pub per_instrument: BTreeMap<String, f64>,
}

pub fn find_scenario(name: &str) -> Option<Scenario> {
    let name = name.trim();
    SCENARIOS
        .iter()
        .copied()
        .find(|scenario| scenario.name.eq_ignore_ascii_case(name))
}

pub fn stress_test(weights: &BTreeMap<String, f64>, scenario: &str) -> Option<ScenarioResult> {
    let Some(found) = find_scenario(scenario) else {
        warn!(scenario = %scenario, "unknown stress scenario");
        return None;
    };
    let per_instrument: BTreeMap<String, f64> = weights
        .iter()
        .map(|(instrument, weight)| (instrument.clone(), weight * found.shock))
        .collect();
    Some(ScenarioResult {
        scenario: found.name.to_string(),
        shock: found.shock,
        expected_return: per_instrument.values().sum(),
        per_instrument,
    })
}

pub fn stress_test_all(weights: &BTreeMap<String, f64>) -> Vec<ScenarioResult> {
    SCENARIOS
        .iter()
        .filter_map(|scenario| stress_test(weights, scenario.name))
        .collect()
}

/// Signed market value of each position as a fraction of equity.
///
/// Positions without a mark are skipped; an empty map is returned when
/// equity is not positive.
pub fn portfolio_weights(portfolio: &Portfolio) -> BTreeMap<String, f64> {
    let equity = portfolio.equity();
    if !equity.is_finite() || equity <= 0.0 {
        return BTreeMap::new();
    }
    portfolio
        .positions()
        .iter()
        .filter(|(_, position)| !position.is_flat())
        .filter_map(|(instrument, position)| {
            let mark = portfolio.mark(instrument)?;
            Some((instrument.clone(), position.market_value(mark) / equity))
        })
        .collect()
}
