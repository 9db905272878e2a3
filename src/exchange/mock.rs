//! In-memory exchange for tests.

use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::traits::MarginExchange;
use crate::exchange::types::{
    AssetBalance, OrderFill, OrderSide, OrderStatus, SymbolTradingLimits,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// An order accepted by the mock, kept for assertions.
#[derive(Debug, Clone)]
pub struct RecordedOrder {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
}

/// Mock exchange that serves balances, prices, and limits from memory.
///
/// Symbols listed in the failure sets return transient errors, which lets
/// tests drive the skip-and-continue paths of the snapshotter and engine.
pub struct MockExchange {
    quote_asset: String,
    balances: Arc<RwLock<HashMap<String, AssetBalance>>>,
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    limits: Arc<RwLock<HashMap<String, SymbolTradingLimits>>>,
    failing_prices: Arc<RwLock<HashSet<String>>>,
    failing_orders: Arc<RwLock<HashSet<String>>>,
    orders: Arc<RwLock<Vec<RecordedOrder>>>,
    order_id_counter: AtomicI64,
}

impl MockExchange {
    pub fn new(quote_asset: impl Into<String>) -> Self {
        Self {
            quote_asset: quote_asset.into(),
            balances: Arc::new(RwLock::new(HashMap::new())),
            prices: Arc::new(RwLock::new(HashMap::new())),
            limits: Arc::new(RwLock::new(HashMap::new())),
            failing_prices: Arc::new(RwLock::new(HashSet::new())),
            failing_orders: Arc::new(RwLock::new(HashSet::new())),
            orders: Arc::new(RwLock::new(Vec::new())),
            order_id_counter: AtomicI64::new(1),
        }
    }

    pub async fn set_balance(&self, asset: &str, free: Decimal, borrowed: Decimal) {
        self.balances
            .write()
            .await
            .insert(asset.to_string(), AssetBalance { free, borrowed });
    }

    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.prices.write().await.insert(symbol.to_string(), price);
    }

    pub async fn set_limits(&self, symbol: &str, limits: SymbolTradingLimits) {
        self.limits.write().await.insert(symbol.to_string(), limits);
    }

    /// Make price lookups for `symbol` fail with a transient error.
    pub async fn fail_price(&self, symbol: &str) {
        self.failing_prices.write().await.insert(symbol.to_string());
    }

    /// Make order submission for `symbol` fail.
    pub async fn fail_orders(&self, symbol: &str) {
        self.failing_orders.write().await.insert(symbol.to_string());
    }

    /// Orders accepted so far, in submission order.
    pub async fn orders(&self) -> Vec<RecordedOrder> {
        self.orders.read().await.clone()
    }
}

#[async_trait]
impl MarginExchange for MockExchange {
    async fn get_account_balances(&self) -> ExchangeResult<HashMap<String, AssetBalance>> {
        Ok(self.balances.read().await.clone())
    }

    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        if self.failing_prices.read().await.contains(symbol) {
            return Err(ExchangeError::Api {
                code: -1001,
                message: "Internal error; unable to process your request".into(),
            });
        }
        self.prices
            .read()
            .await
            .get(symbol)
            .copied()
            .ok_or_else(|| ExchangeError::UnknownSymbol(symbol.to_string()))
    }

    async fn get_trading_limits(&self, symbol: &str) -> ExchangeResult<SymbolTradingLimits> {
        Ok(self
            .limits
            .read()
            .await
            .get(symbol)
            .copied()
            .unwrap_or_else(SymbolTradingLimits::defaults))
    }

    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<OrderFill> {
        if self.failing_orders.read().await.contains(symbol) {
            return Err(ExchangeError::Api {
                code: -2010,
                message: "Account has insufficient balance for requested action".into(),
            });
        }

        let price = self.get_price(symbol).await?;
        self.orders.write().await.push(RecordedOrder {
            symbol: symbol.to_string(),
            side,
            quantity,
        });

        Ok(OrderFill {
            symbol: symbol.to_string(),
            order_id: self.order_id_counter.fetch_add(1, Ordering::SeqCst),
            executed_qty: quantity,
            cummulative_quote_qty: quantity * price,
            status: OrderStatus::Filled,
            side,
        })
    }

    async fn resolve_pair(&self, asset: &str) -> ExchangeResult<Option<String>> {
        if asset == self.quote_asset {
            return Ok(None);
        }
        let symbol = format!("{}{}", asset, self.quote_asset);
        Ok(self
            .prices
            .read()
            .await
            .contains_key(&symbol)
            .then_some(symbol))
    }
}
