use quantsys_domain::entities::portfolio::Portfolio;
use quantsys_domain::errors::{BacktestError, EngineFailure, InvalidOrderError};
use quantsys_domain::services::engine::{
    BacktestResult, Backtester, EngineConfig, ExecutionConfig, OrderingPolicy, RunStatus,
};
use quantsys_domain::services::strategy::{BuyAndHold, SmaCross, Strategy};
use quantsys_domain::value_objects::market_event::MarketEvent;
use quantsys_domain::value_objects::order::OrderRequest;
use quantsys_domain::value_objects::side::Side;
use std::cell::Cell;

/// Emits each request on the first event matching its timestamp and instrument.
struct Scripted {
    script: Vec<(i64, OrderRequest)>,
}

impl Scripted {
    fn new(script: Vec<(i64, OrderRequest)>) -> Self {
        Self { script }
    }
}

impl Strategy for Scripted {
    fn name(&self) -> &str {
        "scripted"
    }

    fn on_event(&mut self, event: &MarketEvent, _portfolio: &Portfolio) -> Vec<OrderRequest> {
        let mut out = Vec::new();
        self.script.retain(|(ts, request)| {
            if *ts == event.timestamp && request.instrument == event.instrument {
                out.push(request.clone());
                false
            } else {
                true
            }
        });
        out
    }
}

fn trade(ts: i64, instrument: &str, price: f64) -> MarketEvent {
    MarketEvent::trade(ts, instrument, price)
}

fn abc_feed() -> Vec<MarketEvent> {
    vec![trade(1, "A", 100.0), trade(2, "A", 102.0), trade(3, "A", 101.0)]
}

fn run(config: EngineConfig, events: Vec<MarketEvent>, strategy: &mut dyn Strategy) -> BacktestResult {
    Backtester::new(config)
        .expect("valid config")
        .run("it", events, strategy)
        .expect("run")
}

#[test]
fn market_order_fills_at_next_event_and_marks_to_market() {
    let mut strategy = Scripted::new(vec![(1, OrderRequest::market("A", Side::Buy, 10.0))]);
    let result = run(EngineConfig::new(10_000.0), abc_feed(), &mut strategy);

    assert_eq!(result.status, RunStatus::Ok);
    assert_eq!(result.trade_log.len(), 1);
    let fill = &result.trade_log[0];
    assert_eq!(fill.timestamp, 2);
    assert_eq!(fill.price, 102.0);
    assert_eq!(fill.reference_price, 102.0);

    let last = result.equity_curve.last().expect("curve");
    assert_eq!(last.timestamp, 3);
    assert!((last.equity - (10_000.0 - 1_020.0 + 1_010.0)).abs() < 1e-9);
    assert!((last.cash - 8_980.0).abs() < 1e-9);
    assert!((last.unrealized_pnl + 10.0).abs() < 1e-9);
}

#[test]
fn curve_has_baseline_plus_one_point_per_event() {
    let result = run(EngineConfig::new(1_000.0), abc_feed(), &mut BuyAndHold::new("A", 1.0));
    assert_eq!(result.events_processed, 3);
    assert_eq!(result.equity_curve.len(), result.events_processed + 1);
    assert_eq!(result.equity_curve[0].timestamp, 0);
    assert_eq!(result.equity_curve[0].equity, 1_000.0);
    assert!(result
        .equity_curve
        .windows(2)
        .all(|pair| pair[0].timestamp < pair[1].timestamp));
}

#[test]
fn invalid_quantity_is_rejected_without_stopping_the_run() {
    let mut strategy = Scripted::new(vec![
        (1, OrderRequest::market("A", Side::Buy, -5.0)),
        (2, OrderRequest::market("A", Side::Buy, 1.0)),
    ]);
    let result = run(EngineConfig::new(1_000.0), abc_feed(), &mut strategy);

    assert_eq!(result.status, RunStatus::Ok);
    assert_eq!(result.rejected_orders.len(), 1);
    assert_eq!(
        result.rejected_orders[0].reason,
        InvalidOrderError::NonPositiveQuantity { quantity: -5.0 }
    );
    assert_eq!(result.trade_log.len(), 1);
    assert_eq!(result.events_processed, 3);
    assert!(result
        .audit_events
        .iter()
        .any(|e| e.action == "reject" && e.error.as_deref() == Some("non_positive_quantity")));
}

#[test]
fn orders_outside_the_universe_are_rejected() {
    let mut strategy = Scripted::new(vec![(1, OrderRequest::market("ZZZ", Side::Buy, 1.0))]);
    let events = vec![trade(1, "ZZZ", 5.0), trade(2, "ZZZ", 5.0)];
    let config = EngineConfig::new(1_000.0).with_universe(["A"]);
    let result = run(config, events, &mut strategy);
    assert_eq!(
        result.rejected_orders[0].reason,
        InvalidOrderError::UnknownInstrument {
            instrument: "ZZZ".to_string()
        }
    );
    assert!(result.trade_log.is_empty());
}

#[test]
fn nan_price_halts_and_truncates_the_curve() {
    let events = vec![trade(1, "A", 100.0), trade(2, "A", f64::NAN), trade(3, "A", 101.0)];
    let result = run(EngineConfig::new(1_000.0), events, &mut BuyAndHold::new("A", 1.0));

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.events_processed, 1);
    let timestamps: Vec<i64> = result.equity_curve.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![0, 1]);
    match result.failure {
        Some(EngineFailure::NumericInstability { timestamp, ref instrument, .. }) => {
            assert_eq!(timestamp, 2);
            assert_eq!(instrument, "A");
        }
        None => panic!("expected a failure"),
    }
    assert!(result.trade_log.is_empty());
    assert_eq!(result.unfilled_orders.len(), 1);
}

fn frictionless() -> EngineConfig {
    let execution = ExecutionConfig::from_options(0.0, 0.0, "none", 0.0, None).expect("costs");
    EngineConfig::new(1_000.0).with_execution(execution)
}

fn assert_consistent_halt(result: &BacktestResult) {
    let last = result.equity_curve.last().expect("curve");
    assert!(result.trade_log.iter().all(|fill| fill.timestamp <= last.timestamp));
    assert_eq!(result.final_portfolio.cash(), last.cash);
    assert_eq!(result.final_portfolio.equity(), last.equity);
}

#[test]
fn cash_overflow_rolls_back_the_whole_event() {
    let mut strategy = Scripted::new(vec![
        (1, OrderRequest::market("A", Side::Buy, 1.0)),
        (1, OrderRequest::market("A", Side::Buy, 1e308)),
    ]);
    let events = vec![trade(1, "A", 100.0), trade(2, "A", 100.0), trade(3, "A", 100.0)];
    let result = run(frictionless(), events, &mut strategy);

    assert_eq!(result.status, RunStatus::Failed);
    assert!(matches!(
        result.failure,
        Some(EngineFailure::NumericInstability { timestamp: 2, .. })
    ));
    let timestamps: Vec<i64> = result.equity_curve.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![0, 1]);
    assert!(result.trade_log.is_empty(), "fill before the overflow is undone");
    assert_eq!(result.final_portfolio.position_qty("A"), 0.0);
    let unfilled: Vec<u64> = result.unfilled_orders.iter().map(|o| o.id).collect();
    assert_eq!(unfilled, vec![1, 2]);
    assert!(result
        .audit_events
        .iter()
        .all(|event| event.action != "fill"));
    assert_consistent_halt(&result);
}

#[test]
fn equity_overflow_halts_with_the_last_valid_state() {
    let mut strategy = Scripted::new(vec![
        (1, OrderRequest::market("A", Side::Sell, 1e306)),
        (2, OrderRequest::market("A", Side::Buy, 1.0)),
    ]);
    let events = vec![trade(1, "A", 100.0), trade(2, "A", 100.0), trade(3, "A", 1_000.0)];
    let result = run(frictionless(), events, &mut strategy);

    assert_eq!(result.status, RunStatus::Failed);
    assert_eq!(result.events_processed, 2);
    match &result.failure {
        Some(EngineFailure::NumericInstability { timestamp, detail, .. }) => {
            assert_eq!(*timestamp, 3);
            assert!(detail.contains("equity"));
        }
        None => panic!("expected a failure"),
    }
    let timestamps: Vec<i64> = result.equity_curve.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![0, 1, 2]);
    assert_eq!(result.trade_log.len(), 1);
    assert_eq!(result.trade_log[0].timestamp, 2);
    assert_eq!(result.final_portfolio.position_qty("A"), -1e306);
    let unfilled: Vec<u64> = result.unfilled_orders.iter().map(|o| o.id).collect();
    assert_eq!(unfilled, vec![2]);
    assert_consistent_halt(&result);
}

#[test]
fn non_positive_quote_halts_the_run() {
    let events = vec![
        trade(1, "A", 100.0),
        trade(2, "A", 100.0).with_quote(0.0, 100.5),
        trade(3, "A", 101.0),
    ];
    let result = run(EngineConfig::new(1_000.0), events, &mut BuyAndHold::new("A", 1.0));

    assert_eq!(result.status, RunStatus::Failed);
    match &result.failure {
        Some(EngineFailure::NumericInstability { detail, .. }) => assert!(detail.contains("bid")),
        None => panic!("expected a failure"),
    }
    assert_eq!(result.equity_curve.len(), 2);
}

#[test]
fn first_event_at_the_minimum_timestamp_has_no_baseline_slot() {
    let engine = Backtester::new(EngineConfig::new(100.0)).expect("engine");
    let err = engine
        .run("min", vec![trade(i64::MIN, "A", 10.0)], &mut BuyAndHold::new("A", 1.0))
        .expect_err("baseline");
    assert!(matches!(err, BacktestError::Config(ref msg) if msg.contains("baseline")));

    let result = engine
        .run("min", vec![trade(i64::MIN + 1, "A", 10.0)], &mut BuyAndHold::new("A", 1.0))
        .expect("run");
    assert_eq!(result.equity_curve[0].timestamp, i64::MIN);
    assert_eq!(result.equity_curve[0].equity, 100.0);
}

#[test]
fn fills_never_look_ahead() {
    let events: Vec<MarketEvent> = [10.0, 11.0, 12.0, 9.0, 8.0, 7.0, 12.0, 14.0, 15.0, 11.0, 9.0]
        .iter()
        .enumerate()
        .map(|(i, price)| trade(i as i64 + 1, "A", *price))
        .collect();
    let result = run(
        EngineConfig::new(1_000.0),
        events.clone(),
        &mut SmaCross::new("A", 1, 3, 2.0),
    );
    assert!(result.trade_log.len() >= 2);

    for fill in &result.trade_log {
        let scheduled = result
            .audit_events
            .iter()
            .find(|e| e.action == "schedule" && e.details["order_id"] == fill.order_id)
            .expect("schedule audit");
        assert!(fill.timestamp > scheduled.timestamp);
        let event = events
            .iter()
            .find(|e| e.timestamp == fill.timestamp)
            .expect("fill event");
        assert_eq!(fill.reference_price, event.price);
    }
}

#[test]
fn identical_runs_are_identical() {
    let config = EngineConfig::new(5_000.0).with_execution(
        ExecutionConfig::from_options(0.001, 1.0, "fixed_bps", 5.0, None).expect("costs"),
    );
    let events: Vec<MarketEvent> = (1..=40)
        .map(|i| trade(i, "A", 100.0 + (i as f64 * 0.7).sin() * 5.0))
        .collect();
    let a = run(config.clone(), events.clone(), &mut SmaCross::new("A", 2, 5, 3.0));
    let b = run(config, events, &mut SmaCross::new("A", 2, 5, 3.0));
    assert_eq!(a, b);
}

#[test]
fn frictionless_round_trip_conserves_cash() {
    let mut strategy = Scripted::new(vec![
        (1, OrderRequest::market("A", Side::Buy, 10.0)),
        (3, OrderRequest::market("A", Side::Sell, 10.0)),
    ]);
    let events = vec![
        trade(1, "A", 100.0),
        trade(2, "A", 102.0),
        trade(3, "A", 101.0),
        trade(4, "A", 105.0),
    ];
    let result = run(EngineConfig::new(10_000.0), events, &mut strategy);

    let realized: f64 = result.trade_log.iter().map(|f| f.realized_pnl).sum();
    assert!((realized - 30.0).abs() < 1e-9);
    let cash = result.final_portfolio.cash();
    assert!((cash - (10_000.0 + realized)).abs() < 1e-9);
    assert_eq!(result.final_portfolio.position_qty("A"), 0.0);
    // Flat positions stay in the book.
    assert!(result.final_portfolio.position("A").is_some());
}

#[test]
fn higher_commission_never_increases_final_cash() {
    let events: Vec<MarketEvent> = (1..=30)
        .map(|i| trade(i, "A", 50.0 + (i % 7) as f64))
        .collect();
    let mut last_cash = f64::INFINITY;
    for rate in [0.0, 0.0005, 0.002, 0.01] {
        let config = EngineConfig::new(10_000.0).with_execution(
            ExecutionConfig::from_options(rate, 0.0, "none", 0.0, None).expect("costs"),
        );
        let result = run(config, events.clone(), &mut SmaCross::new("A", 2, 4, 5.0));
        let cash = result.final_portfolio.cash();
        assert!(cash <= last_cash + 1e-9, "rate {rate}: {cash} > {last_cash}");
        last_cash = cash;
    }
}

#[test]
fn cancellation_stops_between_events() {
    let polls = Cell::new(0usize);
    let should_cancel = || {
        polls.set(polls.get() + 1);
        polls.get() > 2
    };
    let engine = Backtester::new(EngineConfig::new(1_000.0)).expect("engine");
    let result = engine
        .run_with_cancel("cancel", abc_feed(), &mut BuyAndHold::new("A", 1.0), Some(&should_cancel))
        .expect("run");

    assert_eq!(result.status, RunStatus::Cancelled);
    assert_eq!(result.events_processed, 2);
    assert_eq!(result.equity_curve.len(), 3);
    assert!(result.audit_events.iter().any(|e| e.action == "cancel"));
}

#[test]
fn orders_pending_at_feed_end_are_reported_unfilled() {
    let mut strategy = Scripted::new(vec![
        (3, OrderRequest::market("A", Side::Buy, 1.0)),
        (3, OrderRequest::market("A", Side::Buy, 2.0)),
    ]);
    let result = run(EngineConfig::new(1_000.0), abc_feed(), &mut strategy);
    assert!(result.trade_log.is_empty());
    let ids: Vec<u64> = result.unfilled_orders.iter().map(|o| o.id).collect();
    assert_eq!(ids, vec![1, 2]);
    assert!(result.unfilled_orders.iter().all(|o| o.created_at == 3));
}

#[test]
fn strict_ordering_rejects_backwards_time_and_resort_repairs_it() {
    let events = vec![trade(2, "A", 10.0), trade(1, "A", 11.0)];

    let strict = Backtester::new(EngineConfig::new(100.0)).expect("engine");
    let err = strict
        .run("strict", events.clone(), &mut BuyAndHold::new("A", 1.0))
        .expect_err("out of order");
    assert_eq!(
        err,
        BacktestError::OutOfOrder {
            index: 1,
            instrument: "A".to_string(),
            timestamp: 1,
            previous: 2,
        }
    );
    assert!(err.is_ordering_error());

    let resort = run(
        EngineConfig::new(100.0).with_ordering(OrderingPolicy::Resort),
        events,
        &mut BuyAndHold::new("A", 1.0),
    );
    let timestamps: Vec<i64> = resort.equity_curve.iter().map(|p| p.timestamp).collect();
    assert_eq!(timestamps, vec![0, 1, 2]);
    assert_eq!(resort.trade_log[0].price, 10.0);
}

#[test]
fn start_timestamp_must_precede_first_event() {
    let engine = Backtester::new(EngineConfig::new(100.0).with_start_timestamp(1)).expect("engine");
    let err = engine
        .run("start", abc_feed(), &mut BuyAndHold::new("A", 1.0))
        .expect_err("start");
    assert_eq!(err, BacktestError::StartNotBeforeFirstEvent { start: 1, first: 1 });

    let engine = Backtester::new(EngineConfig::new(100.0).with_start_timestamp(-10)).expect("engine");
    let result = engine
        .run("start", abc_feed(), &mut BuyAndHold::new("A", 1.0))
        .expect("run");
    assert_eq!(result.equity_curve[0].timestamp, -10);
}

#[test]
fn same_timestamp_events_produce_a_single_equity_point() {
    let events = vec![
        trade(1, "A", 10.0),
        trade(1, "B", 20.0),
        trade(2, "A", 11.0),
        trade(2, "B", 19.0),
    ];
    let mut strategy = Scripted::new(vec![(1, OrderRequest::market("B", Side::Buy, 1.0))]);
    let result = run(EngineConfig::new(1_000.0), events, &mut strategy);
    assert_eq!(result.events_processed, 4);
    assert_eq!(result.equity_curve.len(), 3);
    // B filled at 19 and is marked at 19.
    assert!((result.equity_curve[2].equity - 1_000.0).abs() < 1e-9);
}

#[test]
fn limit_orders_wait_until_marketable() {
    let events = vec![
        trade(1, "A", 100.0),
        trade(2, "A", 101.0),
        trade(3, "A", 98.0),
        trade(4, "A", 97.0),
    ];
    let mut strategy = Scripted::new(vec![(1, OrderRequest::limit("A", Side::Buy, 1.0, 99.0))]);
    let result = run(EngineConfig::new(1_000.0), events, &mut strategy);
    assert_eq!(result.trade_log.len(), 1);
    assert_eq!(result.trade_log[0].timestamp, 3);
    assert_eq!(result.trade_log[0].price, 98.0);
    assert!(result.unfilled_orders.is_empty());
}

#[test]
fn invalid_limit_price_is_rejected() {
    let mut strategy = Scripted::new(vec![(1, OrderRequest::limit("A", Side::Buy, 1.0, 0.0))]);
    let result = run(EngineConfig::new(1_000.0), abc_feed(), &mut strategy);
    assert_eq!(
        result.rejected_orders[0].reason,
        InvalidOrderError::InvalidLimitPrice { limit_price: 0.0 }
    );
}

#[test]
fn volume_proportional_slippage_and_commission_hit_cash() {
    let execution =
        ExecutionConfig::from_options(0.0, 2.0, "volume_proportional", 100.0, Some(1_000.0))
            .expect("costs");
    let events = vec![
        trade(1, "A", 100.0).with_volume(500.0),
        trade(2, "A", 100.0).with_volume(500.0),
    ];
    let mut strategy = Scripted::new(vec![(1, OrderRequest::market("A", Side::Buy, 10.0))]);
    let result = run(EngineConfig::new(10_000.0).with_execution(execution), events, &mut strategy);

    let fill = &result.trade_log[0];
    // 100 bps * 10 / 1000 = 1 bps.
    assert!((fill.price - 100.01).abs() < 1e-9);
    assert!((fill.slippage_cost - 0.1).abs() < 1e-9);
    assert_eq!(fill.commission, 2.0);
    let expected_cash = 10_000.0 - 10.0 * fill.price - 2.0;
    assert!((result.final_portfolio.cash() - expected_cash).abs() < 1e-9);
    assert!((result.final_portfolio.total_commission() - 2.0).abs() < 1e-12);
}

#[test]
fn audit_trail_is_stamped_and_sorted() {
    let result = run(EngineConfig::new(1_000.0), abc_feed(), &mut BuyAndHold::new("A", 1.0));
    assert!(result.audit_events.iter().all(|e| e.run_id == "it"));
    assert!(result
        .audit_events
        .windows(2)
        .all(|pair| pair[0].timestamp <= pair[1].timestamp));
    let actions: Vec<&str> = result.audit_events.iter().map(|e| e.action.as_str()).collect();
    assert!(actions.contains(&"start"));
    assert!(actions.contains(&"fill"));
    assert!(actions.contains(&"complete"));
}
