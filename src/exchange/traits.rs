//! The capability seam between the policy engine and the exchange.

use crate::exchange::error::ExchangeResult;
use crate::exchange::types::{AssetBalance, OrderFill, OrderSide, SymbolTradingLimits};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Margin trading capability consumed by the snapshotter and the engine.
///
/// Every method can fail transiently (network, rate limit); callers treat
/// such failures as "retry next cycle" and never abort the process.
#[async_trait]
pub trait MarginExchange: Send + Sync {
    /// Free and borrowed balances for every asset in the margin account.
    async fn get_account_balances(&self) -> ExchangeResult<HashMap<String, AssetBalance>>;

    /// Latest price for a trading pair, in the quote currency.
    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal>;

    /// Minimum quantity, quantity step, and minimum notional for a pair.
    async fn get_trading_limits(&self, symbol: &str) -> ExchangeResult<SymbolTradingLimits>;

    /// Submit a cross-margin market order.
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<OrderFill>;

    /// Find the quote-currency pair for an asset, if one trades.
    ///
    /// `Ok(None)` means the asset has no tradable pair and is permanently
    /// excluded; an `Err` means the probe itself failed and may be retried.
    async fn resolve_pair(&self, asset: &str) -> ExchangeResult<Option<String>>;
}
