//! Configuration management for the margin rebalancer.
//!
//! Loads settings from environment variables and config files.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Binance API credentials
    #[serde(default)]
    pub binance: BinanceConfig,
    /// Telegram notification settings
    #[serde(default)]
    pub telegram: TelegramConfig,
    /// Threshold and allowance policy parameters
    #[serde(default)]
    pub trading: TradingConfig,
    /// Polling cadence
    #[serde(default)]
    pub schedule: ScheduleConfig,
    /// Storage locations
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinanceConfig {
    /// API key for authentication
    #[serde(default)]
    pub api_key: String,
    /// Secret key for signing requests
    #[serde(default)]
    pub secret_key: String,
    /// Use testnet instead of production
    #[serde(default)]
    pub testnet: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token used in the sendMessage URL
    #[serde(default)]
    pub bot_token: String,
    /// Destination chat
    #[serde(default)]
    pub chat_id: String,
    /// Disabled by default so the bot runs without credentials
    #[serde(default)]
    pub enabled: bool,
}

/// How the buy pass sizes each purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuySizing {
    /// Uniform random spend in `[buy_min, buy_max]`, capped by balance.
    Randomized,
    /// Top up toward the buy threshold, bounded by the daily limit.
    DailyCapped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Unit of account all values are computed in
    #[serde(default = "default_quote_asset")]
    pub quote_asset: String,
    /// Quote value above which the excess is sold
    #[serde(default = "default_sell_threshold")]
    pub sell_threshold: Decimal,
    /// Quote value below which top-up buys trigger
    #[serde(default = "default_buy_threshold")]
    pub buy_threshold: Decimal,
    /// Buy sizing policy
    #[serde(default = "default_buy_sizing")]
    pub buy_sizing: BuySizing,
    /// Lower bound of a randomized buy, in quote currency
    #[serde(default = "default_buy_min")]
    pub buy_min: Decimal,
    /// Upper bound of a randomized buy, in quote currency
    #[serde(default = "default_buy_max")]
    pub buy_max: Decimal,
    /// Maximum total buy spend per UTC day (daily_capped sizing)
    #[serde(default = "default_daily_buy_limit")]
    pub daily_buy_limit: Decimal,
    /// Minimum valuation for an asset to enter the ledger at first scan
    #[serde(default = "default_min_scan_value")]
    pub min_scan_value: Decimal,
    /// Asset codes never scanned or traded
    #[serde(default)]
    pub excluded_assets: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between polling cycles
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
    /// Seconds between console status summaries
    #[serde(default = "default_summary_interval")]
    pub summary_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database holding the ledger and the trade log
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

// Default value functions
fn default_quote_asset() -> String {
    "USDT".to_string()
}

fn default_sell_threshold() -> Decimal {
    Decimal::new(55, 0)
}

fn default_buy_threshold() -> Decimal {
    Decimal::new(35, 0)
}

fn default_buy_sizing() -> BuySizing {
    BuySizing::Randomized
}

fn default_buy_min() -> Decimal {
    Decimal::new(6, 0)
}

fn default_buy_max() -> Decimal {
    Decimal::new(10, 0)
}

fn default_daily_buy_limit() -> Decimal {
    Decimal::new(50, 0)
}

fn default_min_scan_value() -> Decimal {
    Decimal::new(10, 0)
}

fn default_check_interval() -> u64 {
    20
}

fn default_summary_interval() -> u64 {
    60
}

fn default_db_path() -> String {
    "data/rebalancer.db".to_string()
}

impl Config {
    /// Load configuration from environment variables and config files.
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::default().separator("__").prefix("MRB"))
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.trading.sell_threshold > self.trading.buy_threshold,
            "sell_threshold must be greater than buy_threshold"
        );

        anyhow::ensure!(
            self.trading.buy_min > Decimal::ZERO && self.trading.buy_min <= self.trading.buy_max,
            "buy_min must be positive and at most buy_max"
        );

        anyhow::ensure!(
            self.trading.daily_buy_limit > Decimal::ZERO,
            "daily_buy_limit must be positive"
        );

        anyhow::ensure!(
            self.schedule.check_interval_secs >= 1,
            "check_interval_secs must be at least 1"
        );

        if self.telegram.enabled {
            anyhow::ensure!(
                !self.telegram.bot_token.is_empty() && !self.telegram.chat_id.is_empty(),
                "telegram notifications enabled but bot_token or chat_id is empty"
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            binance: BinanceConfig::default(),
            telegram: TelegramConfig::default(),
            trading: TradingConfig::default(),
            schedule: ScheduleConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Default for BinanceConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            secret_key: String::new(),
            testnet: false,
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            chat_id: String::new(),
            enabled: false,
        }
    }
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            quote_asset: default_quote_asset(),
            sell_threshold: default_sell_threshold(),
            buy_threshold: default_buy_threshold(),
            buy_sizing: default_buy_sizing(),
            buy_min: default_buy_min(),
            buy_max: default_buy_max(),
            daily_buy_limit: default_daily_buy_limit(),
            min_scan_value: default_min_scan_value(),
            excluded_assets: Vec::new(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
            summary_interval_secs: default_summary_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}
