//! Type definitions for Binance API responses and shared exchange types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Cross-margin account snapshot.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginAccountInfo {
    pub user_assets: Vec<MarginUserAsset>,
}

/// One asset row in the margin account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarginUserAsset {
    pub asset: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub free: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub borrowed: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub locked: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub net_asset: Decimal,
}

/// Free and borrowed amounts for one asset, as seen by the policy engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssetBalance {
    pub free: Decimal,
    pub borrowed: Decimal,
}

impl AssetBalance {
    /// Net spendable quantity: free minus borrowed margin.
    pub fn net(&self) -> Decimal {
        self.free - self.borrowed
    }
}

/// Latest price for a symbol.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceTicker {
    pub symbol: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// Server time response, used for request timestamp synchronization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: i64,
}

/// Exchange metadata for one or more symbols.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeInfo {
    pub symbols: Vec<SymbolInfo>,
}

/// Per-symbol metadata with its trading filters.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SymbolInfo {
    pub symbol: String,
    #[serde(default)]
    pub filters: Vec<SymbolFilter>,
}

/// Trading filters attached to a symbol.
///
/// Spot symbols carry `NOTIONAL`, older listings `MIN_NOTIONAL`; both map
/// to the same minimum trade value. Unrecognized filter types are kept as
/// `Other` and ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "filterType")]
pub enum SymbolFilter {
    #[serde(rename = "LOT_SIZE", rename_all = "camelCase")]
    LotSize {
        #[serde(with = "rust_decimal::serde::str")]
        min_qty: Decimal,
        #[serde(with = "rust_decimal::serde::str")]
        step_size: Decimal,
    },
    #[serde(rename = "MIN_NOTIONAL", rename_all = "camelCase")]
    MinNotional {
        #[serde(with = "rust_decimal::serde::str")]
        min_notional: Decimal,
    },
    #[serde(rename = "NOTIONAL", rename_all = "camelCase")]
    Notional {
        #[serde(with = "rust_decimal::serde::str")]
        min_notional: Decimal,
    },
    #[serde(other)]
    Other,
}

/// Resolved order size constraints for a trading pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTradingLimits {
    pub min_quantity: Decimal,
    pub quantity_step: Decimal,
    pub min_notional: Decimal,
}

impl SymbolTradingLimits {
    /// Fallbacks used when the exchange reports no filter for a pair.
    pub fn defaults() -> Self {
        Self {
            min_quantity: Decimal::new(1, 4),  // 0.0001
            quantity_step: Decimal::new(1, 4), // 0.0001
            min_notional: Decimal::new(5, 0),
        }
    }

    /// Extract limits from a symbol's filter list, falling back per field.
    pub fn from_filters(filters: &[SymbolFilter]) -> Self {
        let mut limits = Self::defaults();
        for filter in filters {
            match filter {
                SymbolFilter::LotSize { min_qty, step_size } => {
                    limits.min_quantity = *min_qty;
                    limits.quantity_step = *step_size;
                }
                SymbolFilter::MinNotional { min_notional }
                | SymbolFilter::Notional { min_notional } => {
                    limits.min_notional = *min_notional;
                }
                SymbolFilter::Other => {}
            }
        }
        limits
    }
}

/// Order side (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Wire and report representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "BUY",
            OrderSide::Sell => "SELL",
        }
    }
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
    Expired,
}

/// Response to a margin market order.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFill {
    pub symbol: String,
    pub order_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub executed_qty: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub cummulative_quote_qty: Decimal,
    pub status: OrderStatus,
    pub side: OrderSide,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_limits_from_filters() {
        let json = r#"{
            "symbol": "BTCUSDT",
            "filters": [
                {"filterType": "PRICE_FILTER", "minPrice": "0.01", "maxPrice": "1000000", "tickSize": "0.01"},
                {"filterType": "LOT_SIZE", "minQty": "0.00001", "maxQty": "9000", "stepSize": "0.00001"},
                {"filterType": "NOTIONAL", "minNotional": "5.00000000", "applyMinToMarket": true}
            ]
        }"#;
        let info: SymbolInfo = serde_json::from_str(json).unwrap();
        let limits = SymbolTradingLimits::from_filters(&info.filters);
        assert_eq!(limits.min_quantity, dec!(0.00001));
        assert_eq!(limits.quantity_step, dec!(0.00001));
        assert_eq!(limits.min_notional, dec!(5.00000000));
    }

    #[test]
    fn test_limits_defaults_when_filters_missing() {
        let limits = SymbolTradingLimits::from_filters(&[]);
        assert_eq!(limits.min_quantity, dec!(0.0001));
        assert_eq!(limits.quantity_step, dec!(0.0001));
        assert_eq!(limits.min_notional, dec!(5));
    }

    #[test]
    fn test_margin_account_deserializes() {
        let json = r#"{
            "borrowEnabled": true,
            "userAssets": [
                {"asset": "BTC", "borrowed": "0.02", "free": "0.10", "interest": "0", "locked": "0", "netAsset": "0.08"}
            ]
        }"#;
        let account: MarginAccountInfo = serde_json::from_str(json).unwrap();
        assert_eq!(account.user_assets.len(), 1);
        assert_eq!(account.user_assets[0].free, dec!(0.10));
        assert_eq!(account.user_assets[0].borrowed, dec!(0.02));
    }

    #[test]
    fn test_order_fill_deserializes() {
        let json = r#"{
            "symbol": "ETHUSDT",
            "orderId": 42,
            "clientOrderId": "abc",
            "executedQty": "7.50",
            "cummulativeQuoteQty": "15.00",
            "status": "FILLED",
            "side": "SELL",
            "type": "MARKET"
        }"#;
        let fill: OrderFill = serde_json::from_str(json).unwrap();
        assert_eq!(fill.status, OrderStatus::Filled);
        assert_eq!(fill.side, OrderSide::Sell);
        assert_eq!(fill.executed_qty, dec!(7.50));
    }
}
