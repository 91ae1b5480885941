pub mod backtest;
pub mod execution;

pub use backtest::{
    BacktestResult, Backtester, EngineConfig, OrderingPolicy, RejectedOrder, RunStatus,
};
pub use execution::{ExecutionConfig, FillPolicy, SlippageModel};
