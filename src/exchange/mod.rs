//! Exchange access for the rebalancer.
//!
//! The `MarginExchange` trait is the seam between the policy engine and
//! the outside world: account balances, prices, trading limits, pair
//! resolution, and market order submission. `BinanceClient` implements it
//! against the Binance spot/margin REST API; `MockExchange` implements it
//! in memory for tests.

mod client;
mod error;
pub mod mock;
mod traits;
mod types;

pub use client::BinanceClient;
pub use error::{ExchangeError, ExchangeResult};
pub use mock::MockExchange;
pub use traits::MarginExchange;
pub use types::*;
