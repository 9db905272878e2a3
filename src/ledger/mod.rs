//! Per-asset allowance state.
//!
//! Each tracked asset carries a "buy rights" counter: selling earns at
//! most one right per fill, buying spends one. The ledger is the only
//! mutable state the bot persists, and the policy engine is its only
//! writer.

use crate::config::TradingConfig;
use crate::exchange::{ExchangeResult, MarginExchange};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Initial buy rights for a freshly scanned asset, and the base of the
/// lifetime allowance ceiling `base + sells_executed`.
pub const ALLOWANCE_BASE: u32 = 3;

/// Allowance record for one asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedAsset {
    pub asset: String,
    /// Quote-currency trading pair; `None` marks an asset with no
    /// tradable pair, which stays excluded across restarts.
    pub symbol: Option<String>,
    pub buy_rights: u32,
    pub sells_executed: u32,
}

impl TrackedAsset {
    /// A tradable asset entering the ledger with the full initial allowance.
    pub fn new(asset: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            symbol: Some(symbol.into()),
            buy_rights: ALLOWANCE_BASE,
            sells_executed: 0,
        }
    }

    /// An asset with no quote pair, retained so it is never re-probed.
    pub fn excluded(asset: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            symbol: None,
            buy_rights: 0,
            sells_executed: 0,
        }
    }

    /// Register an executed sell: one more lifetime sell, and one buy
    /// right back, capped at `ALLOWANCE_BASE + sells_executed`.
    pub fn record_sell(&mut self) {
        self.sells_executed += 1;
        self.buy_rights = (self.buy_rights + 1).min(ALLOWANCE_BASE + self.sells_executed);
    }

    /// Spend one buy right. Returns false if none remain.
    pub fn consume_buy_right(&mut self) -> bool {
        if self.buy_rights == 0 {
            return false;
        }
        self.buy_rights -= 1;
        true
    }
}

/// The full set of tracked assets: an ordered sequence for persistence
/// and iteration, with an asset-code index for O(1) lookup.
#[derive(Debug, Default, Clone)]
pub struct AllowanceLedger {
    assets: Vec<TrackedAsset>,
    index: HashMap<String, usize>,
}

impl AllowanceLedger {
    /// Rebuild a ledger from a persisted sequence.
    pub fn from_assets(assets: Vec<TrackedAsset>) -> Self {
        let index = assets
            .iter()
            .enumerate()
            .map(|(i, a)| (a.asset.clone(), i))
            .collect();
        Self { assets, index }
    }

    pub fn insert(&mut self, asset: TrackedAsset) {
        if let Some(&i) = self.index.get(&asset.asset) {
            self.assets[i] = asset;
        } else {
            self.index.insert(asset.asset.clone(), self.assets.len());
            self.assets.push(asset);
        }
    }

    pub fn get(&self, asset: &str) -> Option<&TrackedAsset> {
        self.index.get(asset).map(|&i| &self.assets[i])
    }

    pub fn get_mut(&mut self, asset: &str) -> Option<&mut TrackedAsset> {
        self.index.get(asset).map(|&i| &mut self.assets[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackedAsset> {
        self.assets.iter()
    }

    pub fn assets(&self) -> &[TrackedAsset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// First-run scan: build the ledger from every margin asset with a
    /// positive net balance, a resolvable quote pair, and a valuation of
    /// at least `min_scan_value`.
    ///
    /// Assets without a pair are recorded as permanently excluded.
    /// Per-asset lookup failures skip the asset for this scan only; a
    /// balance fetch failure aborts the scan.
    pub async fn bootstrap<E: MarginExchange>(
        exchange: &E,
        config: &TradingConfig,
    ) -> ExchangeResult<Self> {
        let balances = exchange.get_account_balances().await?;
        let mut ledger = Self::default();

        // Stable scan order regardless of map iteration order
        let mut entries: Vec<_> = balances.into_iter().collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        info!("Initial scan: selecting assets to track");

        for (asset, balance) in entries {
            if asset == config.quote_asset || config.excluded_assets.contains(&asset) {
                continue;
            }

            let net = balance.net();
            if net <= Decimal::ZERO {
                continue;
            }

            let symbol = match exchange.resolve_pair(&asset).await {
                Ok(symbol) => symbol,
                Err(e) => {
                    warn!(%asset, error = %e, "Pair resolution failed, asset skipped this scan");
                    continue;
                }
            };

            let Some(symbol) = symbol else {
                debug!(%asset, "No quote pair, excluding permanently");
                ledger.insert(TrackedAsset::excluded(asset));
                continue;
            };

            let price = match exchange.get_price(&symbol).await {
                Ok(price) => price,
                Err(e) => {
                    warn!(%asset, error = %e, "Price lookup failed, asset skipped this scan");
                    continue;
                }
            };

            let value = net * price;
            if value < config.min_scan_value {
                debug!(%asset, %value, "Below minimum scan value, not tracked");
                continue;
            }

            info!(%asset, %symbol, %value, "Tracking asset");
            ledger.insert(TrackedAsset::new(asset, symbol));
        }

        info!(tracked = ledger.len(), "Initial scan complete");
        Ok(ledger)
    }
}
