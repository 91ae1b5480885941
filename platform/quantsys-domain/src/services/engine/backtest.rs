use crate::entities::portfolio::Portfolio;
use crate::errors::{BacktestError, EngineFailure, InvalidOrderError};
use crate::services::audit::{sort_audit_events, AuditEvent};
use crate::services::engine::execution::ExecutionConfig;
use crate::services::event_feed::{collect_events, EventFeed};
use crate::services::strategy::Strategy;
use crate::value_objects::equity_point::EquityPoint;
use crate::value_objects::fill::Fill;
use crate::value_objects::market_event::MarketEvent;
use crate::value_objects::order::{Order, OrderRequest};
use crate::value_objects::side::Side;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, info, info_span, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingPolicy {
    /// Reject input whose timestamps go backwards.
    #[default]
    Strict,
    /// Stable-sort input by `(timestamp, instrument)` before replaying it.
    Resort,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub initial_cash: f64,
    /// Timestamp of the baseline equity point. Defaults to one second before
    /// the first event.
    pub start_timestamp: Option<i64>,
    pub ordering: OrderingPolicy,
    /// Tradable instruments. Defaults to every instrument seen in the input.
    pub universe: Option<BTreeSet<String>>,
    pub execution: ExecutionConfig,
}

impl EngineConfig {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            start_timestamp: None,
            ordering: OrderingPolicy::Strict,
            universe: None,
            execution: ExecutionConfig::frictionless(),
        }
    }

    pub fn with_execution(mut self, execution: ExecutionConfig) -> Self {
        self.execution = execution;
        self
    }

    pub fn with_ordering(mut self, ordering: OrderingPolicy) -> Self {
        self.ordering = ordering;
        self
    }

    pub fn with_start_timestamp(mut self, start_timestamp: i64) -> Self {
        self.start_timestamp = Some(start_timestamp);
        self
    }

    pub fn with_universe<I, S>(mut self, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.universe = Some(instruments.into_iter().map(Into::into).collect());
        self
    }

    pub fn validate(&self) -> Result<(), BacktestError> {
        if !self.initial_cash.is_finite() || self.initial_cash <= 0.0 {
            return Err(BacktestError::Config(
                "initial_cash must be finite and > 0".to_string(),
            ));
        }
        if let Some(universe) = &self.universe {
            if universe.is_empty() {
                return Err(BacktestError::Config(
                    "universe cannot be empty when configured".to_string(),
                ));
            }
        }
        self.execution.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Ok,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedOrder {
    pub order: Order,
    pub reason: InvalidOrderError,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BacktestResult {
    pub run_id: String,
    pub strategy: String,
    pub status: RunStatus,
    pub failure: Option<EngineFailure>,
    pub initial_cash: f64,
    pub equity_curve: Vec<EquityPoint>,
    pub trade_log: Vec<Fill>,
    pub rejected_orders: Vec<RejectedOrder>,
    pub unfilled_orders: Vec<Order>,
    pub final_portfolio: Portfolio,
    pub events_processed: usize,
    pub audit_events: Vec<AuditEvent>,
}

impl BacktestResult {
    pub fn is_ok(&self) -> bool {
        self.status == RunStatus::Ok
    }

    pub fn final_equity(&self) -> f64 {
        self.equity_curve
            .last()
            .map(|point| point.equity)
            .unwrap_or(self.initial_cash)
    }
}

/// Replays market events against a strategy.
///
/// Every run owns its own state; one `Backtester` can serve any number of
/// sequential or concurrent runs.
#[derive(Debug, Clone)]
pub struct Backtester {
    config: EngineConfig,
}

impl Backtester {
    pub fn new(config: EngineConfig) -> Result<Self, BacktestError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn run<S>(
        &self,
        run_id: &str,
        events: Vec<MarketEvent>,
        strategy: &mut S,
    ) -> Result<BacktestResult, BacktestError>
    where
        S: Strategy + ?Sized,
    {
        self.run_with_cancel(run_id, events, strategy, None)
    }

    pub fn run_feed<F, S>(
        &self,
        run_id: &str,
        feed: &mut F,
        strategy: &mut S,
    ) -> Result<BacktestResult, BacktestError>
    where
        F: EventFeed + ?Sized,
        S: Strategy + ?Sized,
    {
        let events = collect_events(feed);
        self.run(run_id, events, strategy)
    }

    /// `should_cancel` is polled before every event.
    pub fn run_with_cancel<S>(
        &self,
        run_id: &str,
        events: Vec<MarketEvent>,
        strategy: &mut S,
        should_cancel: Option<&dyn Fn() -> bool>,
    ) -> Result<BacktestResult, BacktestError>
    where
        S: Strategy + ?Sized,
    {
        let _span = info_span!(
            "backtest",
            run_id = %run_id,
            strategy = %strategy.name(),
            events = events.len()
        )
        .entered();

        let events = self.prepare_events(events)?;
        let baseline_ts = self.baseline_timestamp(&events)?;
        let universe = self.config.universe.clone().unwrap_or_else(|| {
            events
                .iter()
                .map(|event| event.instrument.clone())
                .collect()
        });

        let mut run = SimulationLoop::new(run_id, &self.config, universe, baseline_ts);
        run.audit(
            baseline_ts,
            "engine",
            None,
            "start",
            None,
            json!({
                "strategy": strategy.name(),
                "events": events.len(),
                "initial_cash": self.config.initial_cash,
                "ordering": self.config.ordering,
                "execution": self.config.execution,
            }),
        );

        for event in &events {
            if should_cancel.map(|f| f()).unwrap_or(false) {
                run.cancel(event.timestamp);
                break;
            }
            if let Err(failure) = run.process_event(event, &mut *strategy) {
                run.halt(event, failure);
                break;
            }
        }

        Ok(run.finish(&mut *strategy))
    }

    fn prepare_events(&self, mut events: Vec<MarketEvent>) -> Result<Vec<MarketEvent>, BacktestError> {
        if self.config.ordering == OrderingPolicy::Strict {
            for (index, pair) in events.windows(2).enumerate() {
                if pair[1].timestamp < pair[0].timestamp {
                    return Err(BacktestError::OutOfOrder {
                        index: index + 1,
                        instrument: pair[1].instrument.clone(),
                        timestamp: pair[1].timestamp,
                        previous: pair[0].timestamp,
                    });
                }
            }
        }
        // Stable: same-key events keep feed order.
        events.sort_by(|a, b| a.cmp_key(b));
        Ok(events)
    }

    fn baseline_timestamp(&self, events: &[MarketEvent]) -> Result<i64, BacktestError> {
        let Some(first) = events.first() else {
            return Ok(self.config.start_timestamp.unwrap_or(0));
        };
        match self.config.start_timestamp {
            Some(start) if start >= first.timestamp => Err(BacktestError::StartNotBeforeFirstEvent {
                start,
                first: first.timestamp,
            }),
            Some(start) => Ok(start),
            None => first.timestamp.checked_sub(1).ok_or_else(|| {
                BacktestError::Config(format!(
                    "first event timestamp {} leaves no room for a baseline point",
                    first.timestamp
                ))
            }),
        }
    }
}

/// State captured before an event so a fatal failure can undo it.
struct Checkpoint {
    portfolio: Portfolio,
    queue: Option<(String, VecDeque<Order>)>,
    next_order_id: u64,
    fills: usize,
    rejected: usize,
    audits: usize,
}

struct SimulationLoop<'a> {
    run_id: String,
    initial_cash: f64,
    execution: &'a ExecutionConfig,
    universe: BTreeSet<String>,
    portfolio: Portfolio,
    pending: BTreeMap<String, VecDeque<Order>>,
    next_order_id: u64,
    equity_curve: Vec<EquityPoint>,
    trade_log: Vec<Fill>,
    rejected_orders: Vec<RejectedOrder>,
    audit_events: Vec<AuditEvent>,
    events_processed: usize,
    last_timestamp: i64,
    status: RunStatus,
    failure: Option<EngineFailure>,
}

impl<'a> SimulationLoop<'a> {
    fn new(
        run_id: &str,
        config: &'a EngineConfig,
        universe: BTreeSet<String>,
        baseline_ts: i64,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            initial_cash: config.initial_cash,
            execution: &config.execution,
            universe,
            portfolio: Portfolio::new_with_cash(config.initial_cash),
            pending: BTreeMap::new(),
            next_order_id: 1,
            equity_curve: vec![EquityPoint::baseline(baseline_ts, config.initial_cash)],
            trade_log: Vec::new(),
            rejected_orders: Vec::new(),
            audit_events: Vec::new(),
            events_processed: 0,
            last_timestamp: baseline_ts,
            status: RunStatus::Ok,
            failure: None,
        }
    }

    /// Applies one event atomically: on failure every fill, order and audit
    /// record it produced is rolled back and its fills go back to pending.
    fn process_event<S>(&mut self, event: &MarketEvent, strategy: &mut S) -> Result<(), EngineFailure>
    where
        S: Strategy + ?Sized,
    {
        let checkpoint = self.checkpoint(&event.instrument);
        let outcome = self.apply_event(event, strategy);
        if outcome.is_err() {
            self.restore(checkpoint);
        }
        outcome
    }

    fn apply_event<S>(&mut self, event: &MarketEvent, strategy: &mut S) -> Result<(), EngineFailure>
    where
        S: Strategy + ?Sized,
    {
        validate_event(event)?;
        self.portfolio.update_mark(&event.instrument, event.price);
        self.resolve_pending(event)?;

        let requests = strategy.on_event(event, &self.portfolio);
        for request in requests {
            self.submit(event, request, strategy.name());
        }

        self.record_equity(event)?;
        self.events_processed += 1;
        self.last_timestamp = event.timestamp;
        Ok(())
    }

    fn checkpoint(&self, instrument: &str) -> Checkpoint {
        Checkpoint {
            portfolio: self.portfolio.clone(),
            queue: self
                .pending
                .get(instrument)
                .map(|orders| (instrument.to_string(), orders.clone())),
            next_order_id: self.next_order_id,
            fills: self.trade_log.len(),
            rejected: self.rejected_orders.len(),
            audits: self.audit_events.len(),
        }
    }

    fn restore(&mut self, checkpoint: Checkpoint) {
        let Checkpoint {
            portfolio,
            queue,
            next_order_id,
            fills,
            rejected,
            audits,
        } = checkpoint;
        self.portfolio = portfolio;
        self.trade_log.truncate(fills);
        self.rejected_orders.truncate(rejected);
        self.audit_events.truncate(audits);
        for orders in self.pending.values_mut() {
            orders.retain(|order| order.id < next_order_id);
        }
        self.pending.retain(|_, orders| !orders.is_empty());
        if let Some((instrument, orders)) = queue {
            self.pending.insert(instrument, orders);
        }
        self.next_order_id = next_order_id;
    }

    fn resolve_pending(&mut self, event: &MarketEvent) -> Result<(), EngineFailure> {
        let Some(mut queue) = self.pending.remove(&event.instrument) else {
            return Ok(());
        };

        let mut waiting = VecDeque::with_capacity(queue.len());
        while let Some(order) = queue.pop_front() {
            // Orders never fill on the event that produced them.
            if order.created_at >= event.timestamp {
                waiting.push_back(order);
                continue;
            }
            match self.try_fill(&order, event) {
                Ok(true) => {}
                Ok(false) => waiting.push_back(order),
                Err(failure) => return Err(failure),
            }
        }

        if !waiting.is_empty() {
            self.pending.insert(event.instrument.clone(), waiting);
        }
        Ok(())
    }

    fn try_fill(&mut self, order: &Order, event: &MarketEvent) -> Result<bool, EngineFailure> {
        let price = self
            .execution
            .fill_price(order.side, event.price, order.quantity, event.volume);

        if let Some(limit) = order.limit_price() {
            let marketable = match order.side {
                Side::Buy => price <= limit,
                Side::Sell => price >= limit,
            };
            if !marketable {
                return Ok(false);
            }
        }

        let commission = self.execution.commission(order.quantity, price);
        let next_cash = self
            .portfolio
            .cash_after_fill(order.side, order.quantity, price, commission);
        if !price.is_finite() || !commission.is_finite() || !next_cash.is_finite() {
            return Err(numeric_instability(
                event,
                format!("fill for order {} produced non-finite cash or price", order.id),
            ));
        }

        let realized_pnl = self.portfolio.apply_fill(
            &order.instrument,
            order.side,
            order.quantity,
            price,
            commission,
        );
        let slippage_cost = (price - event.price).abs() * order.quantity;
        let fill = Fill {
            order_id: order.id,
            instrument: order.instrument.clone(),
            side: order.side,
            quantity: order.quantity,
            price,
            reference_price: event.price,
            commission,
            slippage_cost,
            realized_pnl,
            timestamp: event.timestamp,
        };

        debug!(
            order_id = fill.order_id,
            instrument = %fill.instrument,
            side = fill.side.as_str(),
            qty = fill.quantity,
            price = fill.price,
            commission = fill.commission,
            "order filled"
        );
        self.audit(
            event.timestamp,
            "trade",
            Some(&fill.instrument),
            "fill",
            None,
            json!({
                "order_id": fill.order_id,
                "side": fill.side.as_str(),
                "qty": fill.quantity,
                "price": fill.price,
                "reference_price": fill.reference_price,
                "commission": fill.commission,
                "slippage": fill.slippage_cost,
                "realized_pnl": fill.realized_pnl,
                "order_created_at": order.created_at,
            }),
        );
        self.trade_log.push(fill);
        Ok(true)
    }

    fn submit(&mut self, event: &MarketEvent, request: OrderRequest, strategy_id: &str) {
        let order = Order {
            id: self.next_order_id,
            instrument: request.instrument,
            side: request.side,
            quantity: request.quantity,
            kind: request.kind,
            created_at: event.timestamp,
        };
        self.next_order_id += 1;

        match self.validate_order(&order) {
            Ok(()) => {
                self.audit(
                    event.timestamp,
                    "order",
                    Some(&order.instrument),
                    "schedule",
                    None,
                    json!({
                        "order_id": order.id,
                        "side": order.side.as_str(),
                        "qty": order.quantity,
                        "kind": order.kind,
                        "strategy_id": strategy_id,
                    }),
                );
                self.pending
                    .entry(order.instrument.clone())
                    .or_default()
                    .push_back(order);
            }
            Err(reason) => {
                warn!(
                    order_id = order.id,
                    instrument = %order.instrument,
                    reason = %reason,
                    "order rejected"
                );
                self.audit(
                    event.timestamp,
                    "order",
                    Some(&order.instrument),
                    "reject",
                    Some(reason.code()),
                    json!({
                        "order_id": order.id,
                        "side": order.side.as_str(),
                        "qty": order.quantity,
                        "reason": reason.to_string(),
                        "strategy_id": strategy_id,
                    }),
                );
                self.rejected_orders.push(RejectedOrder { order, reason });
            }
        }
    }

    fn validate_order(&self, order: &Order) -> Result<(), InvalidOrderError> {
        if !order.quantity.is_finite() || order.quantity <= 0.0 {
            return Err(InvalidOrderError::NonPositiveQuantity {
                quantity: order.quantity,
            });
        }
        if !self.universe.contains(&order.instrument) {
            return Err(InvalidOrderError::UnknownInstrument {
                instrument: order.instrument.clone(),
            });
        }
        if let Some(limit_price) = order.limit_price() {
            if !limit_price.is_finite() || limit_price <= 0.0 {
                return Err(InvalidOrderError::InvalidLimitPrice { limit_price });
            }
        }
        Ok(())
    }

    fn record_equity(&mut self, event: &MarketEvent) -> Result<(), EngineFailure> {
        let equity = self.portfolio.equity();
        if !equity.is_finite() {
            return Err(numeric_instability(event, "equity is not finite".to_string()));
        }
        let point = EquityPoint {
            timestamp: event.timestamp,
            equity,
            cash: self.portfolio.cash(),
            gross_exposure: self.portfolio.gross_exposure(),
            realized_pnl: self.portfolio.realized_pnl(),
            unrealized_pnl: self.portfolio.unrealized_pnl(),
        };
        // One point per timestamp: later events at the same time overwrite.
        match self.equity_curve.last_mut() {
            Some(last) if last.timestamp == point.timestamp => *last = point,
            _ => self.equity_curve.push(point),
        }
        Ok(())
    }

    fn cancel(&mut self, timestamp: i64) {
        info!(events_processed = self.events_processed, "backtest cancelled");
        self.status = RunStatus::Cancelled;
        self.audit(
            timestamp,
            "engine",
            None,
            "cancel",
            None,
            json!({ "events_processed": self.events_processed }),
        );
    }

    fn halt(&mut self, event: &MarketEvent, failure: EngineFailure) {
        // The failing event was rolled back and never reached
        // `record_equity`, so the curve already ends before it.
        warn!(error = %failure, "backtest halted");
        self.audit(
            event.timestamp,
            "engine",
            Some(&event.instrument),
            "halt",
            Some("numeric_instability"),
            json!({ "failure": failure }),
        );
        self.status = RunStatus::Failed;
        self.failure = Some(failure);
    }

    fn finish<S>(mut self, strategy: &mut S) -> BacktestResult
    where
        S: Strategy + ?Sized,
    {
        for mut event in strategy.drain_audit_events() {
            if event.run_id.is_empty() {
                event.run_id = self.run_id.clone();
            }
            self.audit_events.push(event);
        }

        let mut unfilled_orders: Vec<Order> = std::mem::take(&mut self.pending)
            .into_values()
            .flatten()
            .collect();
        unfilled_orders.sort_by_key(|order| order.id);

        let final_equity = self
            .equity_curve
            .last()
            .map(|point| point.equity)
            .unwrap_or(self.initial_cash);
        info!(
            status = self.status.as_str(),
            events_processed = self.events_processed,
            fills = self.trade_log.len(),
            rejected = self.rejected_orders.len(),
            unfilled = unfilled_orders.len(),
            final_equity,
            "backtest finished"
        );
        self.audit(
            self.last_timestamp,
            "engine",
            None,
            "complete",
            None,
            json!({
                "status": self.status.as_str(),
                "events_processed": self.events_processed,
                "fills": self.trade_log.len(),
                "rejected_orders": self.rejected_orders.len(),
                "unfilled_orders": unfilled_orders.len(),
                "final_equity": final_equity,
            }),
        );
        sort_audit_events(&mut self.audit_events);

        BacktestResult {
            run_id: self.run_id,
            strategy: strategy.name().to_string(),
            status: self.status,
            failure: self.failure,
            initial_cash: self.initial_cash,
            equity_curve: self.equity_curve,
            trade_log: self.trade_log,
            rejected_orders: self.rejected_orders,
            unfilled_orders,
            final_portfolio: self.portfolio,
            events_processed: self.events_processed,
            audit_events: self.audit_events,
        }
    }

    fn audit(
        &mut self,
        timestamp: i64,
        stage: &str,
        instrument: Option<&str>,
        action: &str,
        error: Option<&str>,
        details: serde_json::Value,
    ) {
        self.audit_events.push(AuditEvent {
            run_id: self.run_id.clone(),
            timestamp,
            stage: stage.to_string(),
            instrument: instrument.map(|s| s.to_string()),
            action: action.to_string(),
            error: error.map(|s| s.to_string()),
            details,
        });
    }
}

fn validate_event(event: &MarketEvent) -> Result<(), EngineFailure> {
    if !event.price.is_finite() || event.price <= 0.0 {
        return Err(numeric_instability(
            event,
            format!("price must be finite and > 0 (got {})", event.price),
        ));
    }
    if let Some(volume) = event.volume {
        if !volume.is_finite() || volume < 0.0 {
            return Err(numeric_instability(
                event,
                format!("volume must be finite and >= 0 (got {volume})"),
            ));
        }
    }
    for (label, quote) in [("bid", event.bid), ("ask", event.ask)] {
        if let Some(value) = quote {
            if !value.is_finite() || value <= 0.0 {
                return Err(numeric_instability(
                    event,
                    format!("{label} must be finite and > 0 (got {value})"),
                ));
            }
        }
    }
    Ok(())
}

fn numeric_instability(event: &MarketEvent, detail: String) -> EngineFailure {
    EngineFailure::NumericInstability {
        timestamp: event.timestamp,
        instrument: event.instrument.clone(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::{Backtester, EngineConfig, RunStatus};
    use crate::services::event_feed::VecEventFeed;
    use crate::services::strategy::HoldStrategy;
    use crate::value_objects::market_event::MarketEvent;

    #[test]
    fn run_counts_processed_events() {
        let events = vec![
            MarketEvent::trade(1, "AAA", 1.0),
            MarketEvent::trade(2, "AAA", 1.0),
        ];
        let engine = Backtester::new(EngineConfig::new(1_000.0)).expect("engine");
        let result = engine.run("run1", events, &mut HoldStrategy).expect("run");
        assert_eq!(result.status, RunStatus::Ok);
        assert_eq!(result.events_processed, 2);
        assert_eq!(result.equity_curve.len(), 3);
    }

    #[test]
    fn run_feed_drains_the_feed() {
        let mut feed = VecEventFeed::new(vec![MarketEvent::trade(10, "AAA", 5.0)]);
        let engine = Backtester::new(EngineConfig::new(100.0)).expect("engine");
        let result = engine.run_feed("feed", &mut feed, &mut HoldStrategy).expect("run");
        assert_eq!(feed.remaining(), 0);
        assert_eq!(result.equity_curve[0].timestamp, 9);
    }

    #[test]
    fn empty_feed_yields_baseline_only() {
        let engine = Backtester::new(EngineConfig::new(100.0)).expect("engine");
        let result = engine.run("empty", Vec::new(), &mut HoldStrategy).expect("run");
        assert!(result.is_ok());
        assert_eq!(result.equity_curve.len(), 1);
        assert_eq!(result.equity_curve[0].timestamp, 0);
        assert_eq!(result.final_equity(), 100.0);
    }

    #[test]
    fn rejects_invalid_initial_cash() {
        assert!(Backtester::new(EngineConfig::new(0.0)).is_err());
        assert!(Backtester::new(EngineConfig::new(f64::NAN)).is_err());
    }
}
