//! Trading logic: balance snapshotting, buy sizing, and the
//! allowance-and-threshold rebalancing engine.

pub mod engine;
pub mod sizing;
pub mod snapshot;

pub use engine::{CycleOutcome, RebalanceEngine};
pub use sizing::{BuyDecision, BuySizer, DailySpendCounter};
pub use snapshot::{BalanceSnapshotter, ValuedPosition};
