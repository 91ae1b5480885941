use crate::entities::portfolio::Portfolio;
use crate::services::audit::AuditEvent;
use crate::value_objects::market_event::MarketEvent;
use crate::value_objects::order::OrderRequest;
use crate::value_objects::side::Side;
use serde_json::json;
use std::collections::{BTreeMap, VecDeque};

/// Trading decisions, one call per market event.
///
/// The portfolio is read-only here; orders only take effect through the
/// engine's execution model.
pub trait Strategy {
    fn name(&self) -> &str;

    fn on_event(&mut self, _event: &MarketEvent, _portfolio: &Portfolio) -> Vec<OrderRequest> {
        Vec::new()
    }

    /// Events with an empty `run_id` are stamped by the engine.
    fn drain_audit_events(&mut self) -> Vec<AuditEvent> {
        Vec::new()
    }
}

impl<S: Strategy + ?Sized> Strategy for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn on_event(&mut self, event: &MarketEvent, portfolio: &Portfolio) -> Vec<OrderRequest> {
        (**self).on_event(event, portfolio)
    }

    fn drain_audit_events(&mut self) -> Vec<AuditEvent> {
        (**self).drain_audit_events()
    }
}

pub struct BuyAndHold {
    instrument: String,
    quantity: f64,
    has_bought: bool,
}

impl BuyAndHold {
    pub fn new(instrument: impl Into<String>, quantity: f64) -> Self {
        Self {
            instrument: instrument.into(),
            quantity,
            has_bought: false,
        }
    }
}

impl Strategy for BuyAndHold {
    fn name(&self) -> &str {
        "buy_and_hold"
    }

    fn on_event(&mut self, event: &MarketEvent, _portfolio: &Portfolio) -> Vec<OrderRequest> {
        if self.has_bought || event.instrument != self.instrument {
            return Vec::new();
        }
        self.has_bought = true;
        vec![OrderRequest::market(
            self.instrument.clone(),
            Side::Buy,
            self.quantity,
        )]
    }
}

/// Long-only moving-average crossover on one instrument.
pub struct SmaCross {
    instrument: String,
    short_window: usize,
    long_window: usize,
    quantity: f64,
    prices: VecDeque<f64>,
}

impl SmaCross {
    pub fn new(
        instrument: impl Into<String>,
        short_window: usize,
        long_window: usize,
        quantity: f64,
    ) -> Self {
        Self {
            instrument: instrument.into(),
            short_window,
            long_window,
            quantity,
            prices: VecDeque::with_capacity(long_window + 1),
        }
    }

    fn sma(&self, window: usize) -> Option<f64> {
        if window == 0 || self.prices.len() < window {
            return None;
        }
        Some(self.prices.iter().rev().take(window).sum::<f64>() / window as f64)
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn on_event(&mut self, event: &MarketEvent, portfolio: &Portfolio) -> Vec<OrderRequest> {
        if event.instrument != self.instrument {
            return Vec::new();
        }
        self.prices.push_back(event.price);
        while self.prices.len() > self.long_window.max(self.short_window) {
            self.prices.pop_front();
        }

        let (Some(short), Some(long)) = (self.sma(self.short_window), self.sma(self.long_window))
        else {
            return Vec::new();
        };

        let held = portfolio.position_qty(&self.instrument);
        if short > long && held <= 0.0 {
            return vec![OrderRequest::market(
                self.instrument.clone(),
                Side::Buy,
                self.quantity,
            )];
        }
        if short < long && held > 0.0 {
            return vec![OrderRequest::market(
                self.instrument.clone(),
                Side::Sell,
                held,
            )];
        }
        Vec::new()
    }
}

pub struct HoldStrategy;

impl Strategy for HoldStrategy {
    fn name(&self) -> &str {
        "hold"
    }
}

/// Periodically trades the portfolio toward fixed target weights.
///
/// Weights are scaled down by their absolute sum when it exceeds 1. Orders
/// still waiting for a fill are not netted against the next rebalance.
pub struct TargetWeights {
    weights: BTreeMap<String, f64>,
    rebalance_every_seconds: i64,
    next_rebalance: Option<i64>,
    audit_events: Vec<AuditEvent>,
}

impl TargetWeights {
    pub fn new(weights: BTreeMap<String, f64>, rebalance_every_seconds: i64) -> Self {
        Self {
            weights,
            rebalance_every_seconds: rebalance_every_seconds.max(1),
            next_rebalance: None,
            audit_events: Vec::new(),
        }
    }

    fn scale(&self) -> f64 {
        let gross: f64 = self.weights.values().map(|w| w.abs()).sum();
        if gross > 1.0 {
            1.0 / gross
        } else {
            1.0
        }
    }
}

impl Strategy for TargetWeights {
    fn name(&self) -> &str {
        "target_weights"
    }

    fn on_event(&mut self, event: &MarketEvent, portfolio: &Portfolio) -> Vec<OrderRequest> {
        if self
            .next_rebalance
            .is_some_and(|next| event.timestamp < next)
        {
            return Vec::new();
        }
        if self.weights.keys().any(|inst| portfolio.mark(inst).is_none()) {
            return Vec::new();
        }
        let equity = portfolio.equity();
        if !equity.is_finite() || equity <= 0.0 {
            return Vec::new();
        }

        let scale = self.scale();
        let mut orders = Vec::new();
        for (instrument, weight) in &self.weights {
            let Some(mark) = portfolio.mark(instrument) else {
                continue;
            };
            let target_qty = equity * weight * scale / mark;
            let delta = target_qty - portfolio.position_qty(instrument);
            if !delta.is_finite() || delta.abs() < 1e-9 {
                continue;
            }
            let side = if delta > 0.0 { Side::Buy } else { Side::Sell };
            orders.push(OrderRequest::market(instrument.clone(), side, delta.abs()));
        }

        self.audit_events.push(AuditEvent {
            run_id: String::new(),
            timestamp: event.timestamp,
            stage: "strategy".to_string(),
            instrument: None,
            action: "rebalance".to_string(),
            error: None,
            details: json!({
                "strategy_id": self.name(),
                "equity": equity,
                "orders": orders.len(),
                "scale": scale,
            }),
        });
        self.next_rebalance = Some(event.timestamp + self.rebalance_every_seconds);
        orders
    }

    fn drain_audit_events(&mut self) -> Vec<AuditEvent> {
        std::mem::take(&mut self.audit_events)
    }
}

pub enum StrategyKind {
    BuyAndHold(BuyAndHold),
    SmaCross(SmaCross),
    Hold(HoldStrategy),
    TargetWeights(TargetWeights),
}

impl Strategy for StrategyKind {
    fn name(&self) -> &str {
        match self {
            StrategyKind::BuyAndHold(s) => s.name(),
            StrategyKind::SmaCross(s) => s.name(),
            StrategyKind::Hold(s) => s.name(),
            StrategyKind::TargetWeights(s) => s.name(),
        }
    }

    fn on_event(&mut self, event: &MarketEvent, portfolio: &Portfolio) -> Vec<OrderRequest> {
        match self {
            StrategyKind::BuyAndHold(s) => s.on_event(event, portfolio),
            StrategyKind::SmaCross(s) => s.on_event(event, portfolio),
            StrategyKind::Hold(s) => s.on_event(event, portfolio),
            StrategyKind::TargetWeights(s) => s.on_event(event, portfolio),
        }
    }

    fn drain_audit_events(&mut self) -> Vec<AuditEvent> {
        match self {
            StrategyKind::BuyAndHold(s) => s.drain_audit_events(),
            StrategyKind::SmaCross(s) => s.drain_audit_events(),
            StrategyKind::Hold(s) => s.drain_audit_events(),
            StrategyKind::TargetWeights(s) => s.drain_audit_events(),
        }
    }
}
