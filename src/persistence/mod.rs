//! SQLite persistence for the allowance ledger and the trade log.
//!
//! The ledger table is rewritten in full on every save inside one
//! transaction; the trades table is append-only and mirrors the columns
//! of the original spreadsheet report.

use crate::exchange::OrderSide;
use crate::ledger::{AllowanceLedger, TrackedAsset};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use rust_decimal::Decimal;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

/// One executed trade, as logged.
#[derive(Debug, Clone)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub asset: String,
    pub action: OrderSide,
    pub quantity: Decimal,
    pub price: Decimal,
    /// Trade notional: quantity * price.
    pub total_value: Decimal,
    /// Position value in quote currency after the trade.
    pub remaining_value: Decimal,
    /// Buy rights left for the asset after the trade.
    pub buy_rights: u32,
    /// Remaining daily buy budget, when daily-capped sizing is active.
    pub daily_remaining: Option<Decimal>,
}

/// SQLite-backed store for the ledger and the trade log.
pub struct LedgerStore {
    conn: Connection,
}

impl LedgerStore {
    /// Open the database, initializing the schema if needed.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;

        let store = Self { conn };
        store.init_schema()?;

        info!("Ledger store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            -- Allowance ledger (rewritten in full on save)
            CREATE TABLE IF NOT EXISTS tracked_assets (
                ordinal INTEGER PRIMARY KEY,
                asset TEXT NOT NULL UNIQUE,
                symbol TEXT,
                buy_rights INTEGER NOT NULL,
                sells_executed INTEGER NOT NULL
            );

            -- Trade log (append-only)
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                asset TEXT NOT NULL,
                action TEXT NOT NULL,
                quantity TEXT NOT NULL,
                price TEXT NOT NULL,
                total_value TEXT NOT NULL,
                remaining_value TEXT NOT NULL,
                buy_rights INTEGER NOT NULL,
                daily_remaining TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_trades_timestamp ON trades(timestamp);
            CREATE INDEX IF NOT EXISTS idx_trades_asset ON trades(asset);
            "#,
        )?;

        debug!("Database schema initialized");
        Ok(())
    }

    /// Persist the full ledger, replacing previous contents.
    pub fn save_ledger(&self, ledger: &AllowanceLedger) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;

        tx.execute("DELETE FROM tracked_assets", [])?;

        for (ordinal, asset) in ledger.iter().enumerate() {
            tx.execute(
                r#"
                INSERT INTO tracked_assets (ordinal, asset, symbol, buy_rights, sells_executed)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
                params![
                    ordinal as i64,
                    asset.asset,
                    asset.symbol,
                    asset.buy_rights,
                    asset.sells_executed,
                ],
            )?;
        }

        tx.commit()?;

        debug!(assets = ledger.len(), "Ledger saved to database");
        Ok(())
    }

    /// Load the ledger in its persisted order.
    ///
    /// Returns `None` when no assets have ever been saved, which tells
    /// the caller to run the first-run scan.
    pub fn load_ledger(&self) -> Result<Option<AllowanceLedger>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT asset, symbol, buy_rights, sells_executed
            FROM tracked_assets
            ORDER BY ordinal
            "#,
        )?;

        let assets: Vec<TrackedAsset> = stmt
            .query_map([], |row| {
                Ok(TrackedAsset {
                    asset: row.get(0)?,
                    symbol: row.get(1)?,
                    buy_rights: row.get(2)?,
                    sells_executed: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<_, _>>()?;

        if assets.is_empty() {
            return Ok(None);
        }

        info!(assets = assets.len(), "Loaded allowance ledger from database");
        Ok(Some(AllowanceLedger::from_assets(assets)))
    }

    /// Append one trade to the log.
    pub fn append_trade(&self, record: &TradeRecord) -> Result<()> {
        self.conn.execute(
            r#"
            INSERT INTO trades (timestamp, asset, action, quantity, price, total_value,
                                remaining_value, buy_rights, daily_remaining)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.timestamp.to_rfc3339(),
                record.asset,
                record.action.as_str(),
                record.quantity.to_string(),
                record.price.to_string(),
                record.total_value.to_string(),
                record.remaining_value.to_string(),
                record.buy_rights,
                record.daily_remaining.map(|v| v.to_string()),
            ],
        )?;
        Ok(())
    }

    /// Most recent trades, newest first.
    pub fn recent_trades(&self, limit: usize) -> Result<Vec<TradeRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT timestamp, asset, action, quantity, price, total_value,
                   remaining_value, buy_rights, daily_remaining
            FROM trades
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )?;

        let trades: Vec<TradeRecord> = stmt
            .query_map([limit], |row| {
                let action: String = row.get(2)?;
                let daily: Option<String> = row.get(8)?;
                Ok(TradeRecord {
                    timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>(0)?)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                    asset: row.get(1)?,
                    action: if action == "BUY" {
                        OrderSide::Buy
                    } else {
                        OrderSide::Sell
                    },
                    quantity: Decimal::from_str(&row.get::<_, String>(3)?).unwrap_or_default(),
                    price: Decimal::from_str(&row.get::<_, String>(4)?).unwrap_or_default(),
                    total_value: Decimal::from_str(&row.get::<_, String>(5)?).unwrap_or_default(),
                    remaining_value: Decimal::from_str(&row.get::<_, String>(6)?)
                        .unwrap_or_default(),
                    buy_rights: row.get(7)?,
                    daily_remaining: daily.and_then(|v| Decimal::from_str(&v).ok()),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(trades)
    }
}
