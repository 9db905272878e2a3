//! The allowance-and-threshold rebalancing engine.
//!
//! One cycle runs the sell pass over every valued position, then the buy
//! pass. Sells skim the excess above the sell threshold and earn back a
//! buy right; buys top up underweight positions and spend one. The
//! ledger is saved after each pass so a crash never loses allowance
//! state accumulated before it.

use crate::config::{BuySizing, TradingConfig};
use crate::exchange::{MarginExchange, OrderSide};
use crate::ledger::AllowanceLedger;
use crate::notify::TelegramNotifier;
use crate::persistence::{LedgerStore, TradeRecord};
use crate::strategy::sizing::{BuyDecision, BuySizer, DailySpendCounter};
use crate::strategy::snapshot::ValuedPosition;
use crate::utils::decimal::normalize_to_step;
use anyhow::Result;
use chrono::{NaiveDate, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::{debug, error, info, warn};

/// Smallest order quantity the randomized variant will submit.
const MIN_BUY_QUANTITY: Decimal = dec!(0.000001);

/// What one cycle executed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CycleOutcome {
    pub sells: u32,
    pub buys: u32,
}

impl CycleOutcome {
    pub fn traded(&self) -> bool {
        self.sells > 0 || self.buys > 0
    }
}

/// The stateful policy engine. Sole writer of the allowance ledger.
pub struct RebalanceEngine<R: Rng> {
    quote_asset: String,
    sell_threshold: Decimal,
    buy_threshold: Decimal,
    sizer: BuySizer,
    daily: DailySpendCounter,
    rng: R,
}

impl<R: Rng> RebalanceEngine<R> {
    pub fn new(trading: &TradingConfig, today: NaiveDate, rng: R) -> Self {
        Self {
            quote_asset: trading.quote_asset.clone(),
            sell_threshold: trading.sell_threshold,
            buy_threshold: trading.buy_threshold,
            sizer: BuySizer::from_config(trading),
            daily: DailySpendCounter::new(today),
            rng,
        }
    }

    /// Reset the daily buy budget when the calendar day has advanced.
    pub fn roll_daily(&mut self, today: NaiveDate) {
        if self.daily.roll_over(today) && self.sizer.sizing() == BuySizing::DailyCapped {
            info!("Daily buy budget reset");
        }
    }

    /// Sell the excess of every position above the sell threshold.
    ///
    /// Order failures and unavailable limits skip the asset; the pass
    /// always finishes and the ledger is saved at the end.
    pub async fn sell_pass<E: MarginExchange>(
        &mut self,
        exchange: &E,
        positions: &[ValuedPosition],
        ledger: &mut AllowanceLedger,
        store: &LedgerStore,
        notifier: &TelegramNotifier,
    ) -> Result<u32> {
        let mut sells = 0;

        for position in positions.iter().filter(|p| p.asset != self.quote_asset) {
            if position.quote_value <= self.sell_threshold {
                continue;
            }

            let limits = match exchange.get_trading_limits(&position.symbol).await {
                Ok(limits) => limits,
                Err(e) => {
                    warn!(asset = %position.asset, error = %e, "Trading limits unavailable, sell skipped");
                    continue;
                }
            };

            let excess = position.quote_value - self.sell_threshold;
            let quantity =
                normalize_to_step(excess / position.unit_price, limits.quantity_step);
            let notional = quantity * position.unit_price;

            if notional < limits.min_notional {
                info!(
                    asset = %position.asset,
                    %notional,
                    min_notional = %limits.min_notional,
                    "Sell below minimum notional, skipped"
                );
                continue;
            }

            match exchange
                .submit_market_order(&position.symbol, OrderSide::Sell, quantity)
                .await
            {
                Ok(fill) => {
                    let buy_rights = match ledger.get_mut(&position.asset) {
                        Some(entry) => {
                            entry.record_sell();
                            entry.buy_rights
                        }
                        None => 0,
                    };

                    let total_value = fill.cummulative_quote_qty;
                    let remaining_value =
                        (position.net_quantity - fill.executed_qty) * position.unit_price;

                    self.log_trade(
                        store,
                        TradeRecord {
                            timestamp: Utc::now(),
                            asset: position.asset.clone(),
                            action: OrderSide::Sell,
                            quantity: fill.executed_qty,
                            price: position.unit_price,
                            total_value,
                            remaining_value,
                            buy_rights,
                            daily_remaining: self.sizer.daily_remaining(&self.daily),
                        },
                    );

                    info!(
                        "[SELL] {} {:.6} sold for {:.2} {}. Position now {:.2} {}",
                        position.asset,
                        fill.executed_qty,
                        total_value,
                        self.quote_asset,
                        remaining_value,
                        self.quote_asset
                    );
                    notifier
                        .notify(&format!(
                            "[SELL] {} {:.6} sold. Remaining position: {:.2} {}",
                            position.asset, fill.executed_qty, remaining_value, self.quote_asset
                        ))
                        .await;
                    sells += 1;
                }
                Err(e) => {
                    error!(
                        asset = %position.asset,
                        error = %e,
                        transient = e.is_transient(),
                        "Sell order failed"
                    );
                }
            }
        }

        store.save_ledger(ledger)?;
        Ok(sells)
    }

    /// Top up every underweight position that still has buy rights.
    ///
    /// Spends only the quote balance that existed at snapshot time,
    /// decremented locally as buys execute. With daily-capped sizing an
    /// exhausted budget halts the whole pass.
    pub async fn buy_pass<E: MarginExchange>(
        &mut self,
        exchange: &E,
        positions: &[ValuedPosition],
        ledger: &mut AllowanceLedger,
        store: &LedgerStore,
        notifier: &TelegramNotifier,
    ) -> Result<u32> {
        let mut buys = 0;
        let mut available = positions
            .iter()
            .find(|p| p.asset == self.quote_asset)
            .map(|p| p.quote_value)
            .unwrap_or_default();

        for position in positions.iter().filter(|p| p.asset != self.quote_asset) {
            let Some(entry) = ledger.get(&position.asset) else {
                continue;
            };
            if entry.buy_rights == 0 {
                debug!(asset = %position.asset, "No buy rights left, skipped");
                continue;
            }
            if position.quote_value >= self.buy_threshold {
                continue;
            }
            if available <= Decimal::ZERO {
                debug!(asset = %position.asset, "No quote balance left this cycle");
                continue;
            }

            let spend = match self.sizer.desired_spend(
                &mut self.rng,
                position.quote_value,
                available,
                &self.daily,
            ) {
                BuyDecision::Spend(spend) => spend,
                BuyDecision::HaltPass => {
                    warn!("Daily buy limit exhausted, halting buy pass");
                    notifier
                        .notify("Daily buy limit exhausted, buys paused until tomorrow")
                        .await;
                    break;
                }
            };

            let limits = match exchange.get_trading_limits(&position.symbol).await {
                Ok(limits) => limits,
                Err(e) => {
                    warn!(asset = %position.asset, error = %e, "Trading limits unavailable, buy skipped");
                    continue;
                }
            };

            let mut quantity =
                normalize_to_step(spend / position.unit_price, limits.quantity_step);
            if self.sizer.sizing() == BuySizing::Randomized {
                quantity = quantity.max(MIN_BUY_QUANTITY);
            }
            let notional = quantity * position.unit_price;

            if notional < limits.min_notional {
                info!(
                    asset = %position.asset,
                    %notional,
                    min_notional = %limits.min_notional,
                    "Buy below minimum notional, skipped"
                );
                continue;
            }

            match exchange
                .submit_market_order(&position.symbol, OrderSide::Buy, quantity)
                .await
            {
                Ok(fill) => {
                    let buy_rights = match ledger.get_mut(&position.asset) {
                        Some(entry) => {
                            entry.consume_buy_right();
                            entry.buy_rights
                        }
                        None => 0,
                    };

                    let spent = fill.cummulative_quote_qty;
                    available -= spent;
                    if self.sizer.sizing() == BuySizing::DailyCapped {
                        self.daily.record_spend(spent);
                    }
                    let remaining_value = position.quote_value + spent;

                    self.log_trade(
                        store,
                        TradeRecord {
                            timestamp: Utc::now(),
                            asset: position.asset.clone(),
                            action: OrderSide::Buy,
                            quantity: fill.executed_qty,
                            price: position.unit_price,
                            total_value: spent,
                            remaining_value,
                            buy_rights,
                            daily_remaining: self.sizer.daily_remaining(&self.daily),
                        },
                    );

                    info!(
                        "[BUY] {} {:.6} bought ({:.2} {}). Buy rights: {}",
                        position.asset, fill.executed_qty, spent, self.quote_asset, buy_rights
                    );
                    notifier
                        .notify(&format!(
                            "[BUY] {} {:.6} bought ({:.2} {}). Buy rights: {}",
                            position.asset, fill.executed_qty, spent, self.quote_asset, buy_rights
                        ))
                        .await;
                    buys += 1;
                }
                Err(e) => {
                    error!(
                        asset = %position.asset,
                        error = %e,
                        transient = e.is_transient(),
                        "Buy order failed"
                    );
                }
            }
        }

        store.save_ledger(ledger)?;
        Ok(buys)
    }

    /// Trade-log writes never abort a pass.
    fn log_trade(&self, store: &LedgerStore, record: TradeRecord) {
        if let Err(e) = store.append_trade(&record) {
            warn!(asset = %record.asset, error = %e, "Failed to append trade record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;
    use crate::exchange::{MockExchange, SymbolTradingLimits};
    use crate::ledger::TrackedAsset;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    fn silent_notifier() -> TelegramNotifier {
        TelegramNotifier::new(&TelegramConfig::default()).unwrap()
    }

    fn engine(trading: &TradingConfig) -> RebalanceEngine<StdRng> {
        RebalanceEngine::new(trading, day(), StdRng::seed_from_u64(42))
    }

    fn position(asset: &str, net: Decimal, price: Decimal) -> ValuedPosition {
        ValuedPosition {
            asset: asset.to_string(),
            symbol: format!("{}USDT", asset),
            net_quantity: net,
            unit_price: price,
            quote_value: net * price,
        }
    }

    fn quote_position(free: Decimal) -> ValuedPosition {
        ValuedPosition {
            asset: "USDT".to_string(),
            symbol: "USDT".to_string(),
            net_quantity: free,
            unit_price: Decimal::ONE,
            quote_value: free,
        }
    }

    fn limits(step: Decimal, min_notional: Decimal) -> SymbolTradingLimits {
        SymbolTradingLimits {
            min_quantity: step,
            quantity_step: step,
            min_notional,
        }
    }

    #[tokio::test]
    async fn test_sell_skims_excess_and_grants_right() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("XRPUSDT", dec!(2)).await;
        exchange
            .set_limits("XRPUSDT", limits(dec!(0.01), dec!(5)))
            .await;

        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("XRP", "XRPUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        // 35 units at price 2 = 70 quote value, 15 above the threshold
        let positions = vec![position("XRP", dec!(35), dec!(2)), quote_position(dec!(0))];
        let sells = engine
            .sell_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(sells, 1);
        let orders = exchange.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].side, OrderSide::Sell);
        assert_eq!(orders[0].quantity, dec!(7.50));

        let entry = ledger.get("XRP").unwrap();
        assert_eq!(entry.sells_executed, 1);
        assert_eq!(entry.buy_rights, 4);

        let trades = store.recent_trades(10).unwrap();
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].action, OrderSide::Sell);
        assert_eq!(trades[0].total_value, dec!(15.00));
        assert_eq!(trades[0].remaining_value, dec!(55.00));
    }

    #[tokio::test]
    async fn test_no_sell_at_or_below_threshold() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("ADAUSDT", dec!(1)).await;

        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("ADA", "ADAUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        // Exactly at the threshold: the trigger is strictly greater-than
        let positions = vec![position("ADA", dec!(55), dec!(1)), quote_position(dec!(100))];
        let sells = engine
            .sell_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(sells, 0);
        assert!(exchange.orders().await.is_empty());
        assert_eq!(ledger.get("ADA").unwrap().sells_executed, 0);
    }

    #[tokio::test]
    async fn test_sell_below_min_notional_skipped() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("DOTUSDT", dec!(1)).await;
        exchange
            .set_limits("DOTUSDT", limits(dec!(0.01), dec!(5)))
            .await;

        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("DOT", "DOTUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        // 57 value: excess 2 is below the 5 minimum notional
        let positions = vec![position("DOT", dec!(57), dec!(1)), quote_position(dec!(0))];
        let sells = engine
            .sell_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(sells, 0);
        assert!(exchange.orders().await.is_empty());
        assert_eq!(ledger.get("DOT").unwrap().buy_rights, 3);
    }

    #[tokio::test]
    async fn test_sell_failure_does_not_abort_pass() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("AAAUSDT", dec!(1)).await;
        exchange.set_price("BBBUSDT", dec!(1)).await;
        exchange.fail_orders("AAAUSDT").await;

        let mut ledger = AllowanceLedger::from_assets(vec![
            TrackedAsset::new("AAA", "AAAUSDT"),
            TrackedAsset::new("BBB", "BBBUSDT"),
        ]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        let positions = vec![
            position("AAA", dec!(70), dec!(1)),
            position("BBB", dec!(70), dec!(1)),
            quote_position(dec!(0)),
        ];
        let sells = engine
            .sell_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        // AAA failed, BBB still went through; only BBB earned a right
        assert_eq!(sells, 1);
        assert_eq!(ledger.get("AAA").unwrap().sells_executed, 0);
        assert_eq!(ledger.get("BBB").unwrap().sells_executed, 1);
    }

    #[tokio::test]
    async fn test_no_buy_without_rights() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("XLMUSDT", dec!(1)).await;

        let mut drained = TrackedAsset::new("XLM", "XLMUSDT");
        while drained.consume_buy_right() {}
        let mut ledger = AllowanceLedger::from_assets(vec![drained]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        // Underweight and plenty of balance, but no rights left
        let positions = vec![position("XLM", dec!(20), dec!(1)), quote_position(dec!(500))];
        let buys = engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(buys, 0);
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_no_buy_at_or_above_threshold() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("LTCUSDT", dec!(1)).await;

        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("LTC", "LTCUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        let positions = vec![position("LTC", dec!(35), dec!(1)), quote_position(dec!(500))];
        let buys = engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(buys, 0);
        assert!(exchange.orders().await.is_empty());
    }

    #[tokio::test]
    async fn test_randomized_buy_spends_within_bounds_and_consumes_right() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("TRXUSDT", dec!(0.1)).await;
        exchange
            .set_limits("TRXUSDT", limits(dec!(0.1), dec!(5)))
            .await;

        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("TRX", "TRXUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        let positions = vec![
            position("TRX", dec!(100), dec!(0.1)),
            quote_position(dec!(200)),
        ];
        let buys = engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(buys, 1);
        let orders = exchange.orders().await;
        assert_eq!(orders[0].side, OrderSide::Buy);
        let notional = orders[0].quantity * dec!(0.1);
        assert!(notional >= dec!(5) && notional <= dec!(10), "notional={}", notional);
        assert_eq!(ledger.get("TRX").unwrap().buy_rights, 2);
    }

    #[tokio::test]
    async fn test_buy_pass_tracks_spent_balance() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("AAAUSDT", dec!(1)).await;
        exchange.set_price("BBBUSDT", dec!(1)).await;
        exchange.set_limits("AAAUSDT", limits(dec!(1), dec!(5))).await;
        exchange.set_limits("BBBUSDT", limits(dec!(1), dec!(5))).await;

        let mut ledger = AllowanceLedger::from_assets(vec![
            TrackedAsset::new("AAA", "AAAUSDT"),
            TrackedAsset::new("BBB", "BBBUSDT"),
        ]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        // Only enough balance for one buy: the second asset must see the
        // reduced balance, and whatever it spends stays within it
        let positions = vec![
            position("AAA", dec!(10), dec!(1)),
            position("BBB", dec!(10), dec!(1)),
            quote_position(dec!(8)),
        ];
        engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        let total_spent: Decimal = exchange
            .orders()
            .await
            .iter()
            .map(|o| o.quantity * dec!(1))
            .sum();
        assert!(total_spent <= dec!(8), "spent {} of 8 available", total_spent);
    }

    #[tokio::test]
    async fn test_daily_cap_halts_pass_and_bounds_spend() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("AAAUSDT", dec!(1)).await;
        exchange.set_price("BBBUSDT", dec!(1)).await;
        exchange.set_limits("AAAUSDT", limits(dec!(1), dec!(5))).await;
        exchange.set_limits("BBBUSDT", limits(dec!(1), dec!(5))).await;

        let mut ledger = AllowanceLedger::from_assets(vec![
            TrackedAsset::new("AAA", "AAAUSDT"),
            TrackedAsset::new("BBB", "BBBUSDT"),
        ]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig {
            buy_sizing: BuySizing::DailyCapped,
            daily_buy_limit: dec!(10),
            ..TradingConfig::default()
        };
        let mut engine = engine(&trading);

        // Each asset wants a 15-unit top-up; the 10-unit daily budget
        // funds the first and halts the pass before the second
        let positions = vec![
            position("AAA", dec!(20), dec!(1)),
            position("BBB", dec!(20), dec!(1)),
            quote_position(dec!(100)),
        ];
        let buys = engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert_eq!(buys, 1);
        let orders = exchange.orders().await;
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].symbol, "AAAUSDT");
        assert_eq!(orders[0].quantity, dec!(10));
        assert_eq!(ledger.get("BBB").unwrap().buy_rights, 3);

        let trades = store.recent_trades(10).unwrap();
        assert_eq!(trades[0].daily_remaining, Some(dec!(0)));
    }

    #[tokio::test]
    async fn test_daily_reset_restores_budget() {
        let exchange = MockExchange::new("USDT");
        exchange.set_price("AAAUSDT", dec!(1)).await;
        exchange.set_limits("AAAUSDT", limits(dec!(1), dec!(5))).await;

        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("AAA", "AAAUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig {
            buy_sizing: BuySizing::DailyCapped,
            daily_buy_limit: dec!(10),
            ..TradingConfig::default()
        };
        let mut engine = engine(&trading);

        let positions = vec![position("AAA", dec!(20), dec!(1)), quote_position(dec!(100))];
        engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();
        // Budget exhausted: nothing more today
        let buys = engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();
        assert_eq!(buys, 0);

        // Next day the budget returns
        engine.roll_daily(NaiveDate::from_ymd_opt(2024, 3, 2).unwrap());
        let buys = engine
            .buy_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();
        assert_eq!(buys, 1);
    }

    #[tokio::test]
    async fn test_ledger_saved_even_without_trades() {
        let exchange = MockExchange::new("USDT");
        let mut ledger = AllowanceLedger::from_assets(vec![TrackedAsset::new("BTC", "BTCUSDT")]);
        let store = LedgerStore::new(":memory:").unwrap();
        let trading = TradingConfig::default();
        let mut engine = engine(&trading);

        let positions = vec![quote_position(dec!(1))];
        engine
            .sell_pass(&exchange, &positions, &mut ledger, &store, &silent_notifier())
            .await
            .unwrap();

        assert!(store.load_ledger().unwrap().is_some());
    }
}
