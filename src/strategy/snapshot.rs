//! Per-cycle valuation of tracked assets.

use crate::exchange::{ExchangeResult, MarginExchange};
use crate::ledger::AllowanceLedger;
use rust_decimal::Decimal;
use tracing::warn;

/// One asset valued in the quote currency. Rebuilt every cycle, never
/// persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValuedPosition {
    pub asset: String,
    pub symbol: String,
    pub net_quantity: Decimal,
    pub unit_price: Decimal,
    pub quote_value: Decimal,
}

/// Converts raw margin balances into valued positions.
///
/// This is the only point where live exchange state enters the engine.
pub struct BalanceSnapshotter {
    quote_asset: String,
}

impl BalanceSnapshotter {
    pub fn new(quote_asset: impl Into<String>) -> Self {
        Self {
            quote_asset: quote_asset.into(),
        }
    }

    /// Value every tracked asset with a positive net balance.
    ///
    /// A failed price lookup excludes only that asset from the cycle; a
    /// failed balance fetch aborts the snapshot. The quote currency is
    /// appended last as a synthetic position at price 1.
    pub async fn snapshot<E: MarginExchange>(
        &self,
        exchange: &E,
        ledger: &AllowanceLedger,
    ) -> ExchangeResult<Vec<ValuedPosition>> {
        let balances = exchange.get_account_balances().await?;
        let mut positions = Vec::with_capacity(ledger.len() + 1);

        for entry in ledger.iter() {
            let Some(symbol) = &entry.symbol else {
                continue;
            };

            let net = balances
                .get(&entry.asset)
                .copied()
                .unwrap_or_default()
                .net();
            if net <= Decimal::ZERO {
                continue;
            }

            let price = match exchange.get_price(symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(asset = %entry.asset, error = %e, "Price lookup failed, asset skipped this cycle");
                    continue;
                }
            };
            if price <= Decimal::ZERO {
                warn!(asset = %entry.asset, %price, "Non-positive price, asset skipped this cycle");
                continue;
            }

            positions.push(ValuedPosition {
                asset: entry.asset.clone(),
                symbol: symbol.clone(),
                net_quantity: net,
                unit_price: price,
                quote_value: net * price,
            });
        }

        let quote_free = balances
            .get(&self.quote_asset)
            .map(|b| b.free)
            .unwrap_or_default();
        positions.push(ValuedPosition {
            asset: self.quote_asset.clone(),
            symbol: self.quote_asset.clone(),
            net_quantity: quote_free,
            unit_price: Decimal::ONE,
            quote_value: quote_free,
        });

        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::MockExchange;
    use crate::ledger::TrackedAsset;
    use rust_decimal_macros::dec;

    fn ledger() -> AllowanceLedger {
        AllowanceLedger::from_assets(vec![
            TrackedAsset::new("BTC", "BTCUSDT"),
            TrackedAsset::new("ETH", "ETHUSDT"),
            TrackedAsset::excluded("NOPAIR"),
        ])
    }

    #[tokio::test]
    async fn test_snapshot_values_positions() {
        let exchange = MockExchange::new("USDT");
        exchange.set_balance("BTC", dec!(0.002), dec!(0)).await;
        exchange.set_balance("ETH", dec!(0.03), dec!(0.01)).await;
        exchange.set_balance("USDT", dec!(12.5), dec!(0)).await;
        exchange.set_price("BTCUSDT", dec!(50000)).await;
        exchange.set_price("ETHUSDT", dec!(2000)).await;

        let positions = BalanceSnapshotter::new("USDT")
            .snapshot(&exchange, &ledger())
            .await
            .unwrap();

        assert_eq!(positions.len(), 3);
        assert_eq!(positions[0].asset, "BTC");
        assert_eq!(positions[0].quote_value, dec!(100.000));
        // Net quantity subtracts borrowed margin
        assert_eq!(positions[1].net_quantity, dec!(0.02));
        assert_eq!(positions[1].quote_value, dec!(40.00));
        // Quote currency last, at price 1
        assert_eq!(positions[2].asset, "USDT");
        assert_eq!(positions[2].unit_price, Decimal::ONE);
        assert_eq!(positions[2].quote_value, dec!(12.5));
    }

    #[tokio::test]
    async fn test_price_failure_excludes_only_that_asset() {
        let exchange = MockExchange::new("USDT");
        exchange.set_balance("BTC", dec!(0.002), dec!(0)).await;
        exchange.set_balance("ETH", dec!(0.03), dec!(0)).await;
        exchange.set_balance("USDT", dec!(5), dec!(0)).await;
        exchange.set_price("BTCUSDT", dec!(50000)).await;
        exchange.set_price("ETHUSDT", dec!(2000)).await;
        exchange.fail_price("BTCUSDT").await;

        let positions = BalanceSnapshotter::new("USDT")
            .snapshot(&exchange, &ledger())
            .await
            .unwrap();

        let assets: Vec<_> = positions.iter().map(|p| p.asset.as_str()).collect();
        assert_eq!(assets, ["ETH", "USDT"]);
    }

    #[tokio::test]
    async fn test_zero_and_negative_net_skipped() {
        let exchange = MockExchange::new("USDT");
        exchange.set_balance("BTC", dec!(0), dec!(0)).await;
        exchange.set_balance("ETH", dec!(0.01), dec!(0.02)).await;
        exchange.set_price("BTCUSDT", dec!(50000)).await;
        exchange.set_price("ETHUSDT", dec!(2000)).await;

        let positions = BalanceSnapshotter::new("USDT")
            .snapshot(&exchange, &ledger())
            .await
            .unwrap();

        // Only the synthetic quote entry remains
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].asset, "USDT");
        assert_eq!(positions[0].quote_value, Decimal::ZERO);
    }
}
