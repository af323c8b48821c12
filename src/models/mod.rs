//! Domain models shared across agents, schedulers, and persistence.

pub mod disclosure;
pub mod execution;
pub mod intent;

pub use disclosure::{parse_amount_range, TradeDisclosure, TransactionType};
pub use execution::{ExecutionResult, ExecutionSummary, PerformanceSnapshot};
pub use intent::{SignalSource, TradeIntent, TradeSide};
