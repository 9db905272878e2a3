//! # Margin Rebalancer
//!
//! A polling bot that rebalances a Binance cross-margin account around
//! fixed quote-value thresholds: positions worth more than the sell
//! threshold are skimmed back down, positions worth less than the buy
//! threshold are topped up, and each asset carries a persisted "buy
//! rights" allowance that is earned by selling and spent by buying.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `exchange`: Binance margin REST client and the `MarginExchange` trait
//! - `ledger`: Per-asset allowance state (the only persisted mutable state)
//! - `strategy`: Balance snapshotting, buy sizing, and the policy engine
//! - `persistence`: SQLite ledger store and append-only trade log
//! - `notify`: Best-effort Telegram notifications
//! - `utils`: Shared decimal arithmetic

pub mod config;
pub mod exchange;
pub mod ledger;
pub mod notify;
pub mod persistence;
pub mod strategy;
pub mod utils;

pub use config::Config;
