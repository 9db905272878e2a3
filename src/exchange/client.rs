//! Binance margin REST API client.

use crate::config::BinanceConfig;
use crate::exchange::error::{ExchangeError, ExchangeResult};
use crate::exchange::traits::MarginExchange;
use crate::exchange::types::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

const SPOT_BASE_URL: &str = "https://api.binance.com";
const SPOT_TESTNET_URL: &str = "https://testnet.binance.vision";

/// Binance API client for the cross-margin account.
pub struct BinanceClient {
    http: Client,
    api_key: String,
    secret_key: String,
    base_url: String,
    quote_asset: String,
    /// Signed request timestamps are shifted by this many milliseconds to
    /// stay inside the exchange's recv window when the local clock drifts.
    time_offset_ms: AtomicI64,
}

impl BinanceClient {
    /// Create a new Binance client from configuration.
    pub fn new(config: &BinanceConfig, quote_asset: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = if config.testnet {
            SPOT_TESTNET_URL.to_string()
        } else {
            SPOT_BASE_URL.to_string()
        };

        Ok(Self {
            http,
            api_key: config.api_key.clone(),
            secret_key: config.secret_key.clone(),
            base_url,
            quote_asset: quote_asset.into(),
            time_offset_ms: AtomicI64::new(0),
        })
    }

    /// Synchronize the request timestamp offset against server time.
    ///
    /// Failure is non-fatal: signed requests fall back to the local clock.
    #[instrument(skip(self))]
    pub async fn sync_time(&self) {
        let url = format!("{}/api/v3/time", self.base_url);
        match self.get_json::<ServerTime>(&url).await {
            Ok(server) => {
                let local = Self::local_millis();
                let offset = server.server_time - local;
                self.time_offset_ms.store(offset, Ordering::Relaxed);
                debug!(offset_ms = offset, "Server time synchronized");
            }
            Err(e) => {
                warn!(error = %e, "Time synchronization failed, using local clock");
            }
        }
    }

    fn local_millis() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("Time went backwards")
            .as_millis() as i64
    }

    /// Current request timestamp in milliseconds, offset-corrected.
    fn timestamp(&self) -> i64 {
        Self::local_millis() + self.time_offset_ms.load(Ordering::Relaxed)
    }

    /// Generate HMAC-SHA256 signature for authenticated requests.
    fn sign(&self, query_string: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret_key.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(query_string.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Build `key=value&...&signature=...` from the given parameters.
    fn signed_query(&self, params: &[(&str, String)]) -> String {
        let query: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let signature = self.sign(&query);
        format!("{}&signature={}", query, signature)
    }

    /// GET an unauthenticated endpoint and parse the JSON body.
    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> ExchangeResult<T> {
        let response = self.http.get(url).send().await?;
        Self::parse_response(response).await
    }

    /// Check the HTTP status and decode the body.
    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> ExchangeResult<T> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ExchangeError::from_api_response(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| ExchangeError::Parse(format!("{}: {}", e, body)))
    }
}

#[async_trait]
impl MarginExchange for BinanceClient {
    #[instrument(skip(self))]
    async fn get_account_balances(&self) -> ExchangeResult<HashMap<String, AssetBalance>> {
        let query = self.signed_query(&[("timestamp", self.timestamp().to_string())]);
        let url = format!("{}/sapi/v1/margin/account?{}", self.base_url, query);

        let response = self
            .http
            .get(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        let account: MarginAccountInfo = Self::parse_response(response).await?;

        Ok(account
            .user_assets
            .into_iter()
            .map(|a| {
                (
                    a.asset,
                    AssetBalance {
                        free: a.free,
                        borrowed: a.borrowed,
                    },
                )
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_price(&self, symbol: &str) -> ExchangeResult<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let ticker: PriceTicker = self.get_json(&url).await?;
        Ok(ticker.price)
    }

    #[instrument(skip(self))]
    async fn get_trading_limits(&self, symbol: &str) -> ExchangeResult<SymbolTradingLimits> {
        let url = format!("{}/api/v3/exchangeInfo?symbol={}", self.base_url, symbol);
        let info: ExchangeInfo = self.get_json(&url).await?;

        Ok(info
            .symbols
            .iter()
            .find(|s| s.symbol == symbol)
            .map(|s| SymbolTradingLimits::from_filters(&s.filters))
            .unwrap_or_else(SymbolTradingLimits::defaults))
    }

    #[instrument(skip(self))]
    async fn submit_market_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: Decimal,
    ) -> ExchangeResult<OrderFill> {
        let query = self.signed_query(&[
            ("symbol", symbol.to_string()),
            ("side", side.as_str().to_string()),
            ("type", "MARKET".to_string()),
            ("quantity", quantity.to_string()),
            ("isIsolated", "FALSE".to_string()),
            ("newOrderRespType", "FULL".to_string()),
            ("timestamp", self.timestamp().to_string()),
        ]);
        let url = format!("{}/sapi/v1/margin/order?{}", self.base_url, query);

        debug!(%symbol, side = side.as_str(), %quantity, "Submitting margin market order");

        let response = self
            .http
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await?;
        Self::parse_response(response).await
    }

    #[instrument(skip(self))]
    async fn resolve_pair(&self, asset: &str) -> ExchangeResult<Option<String>> {
        if asset == self.quote_asset {
            return Ok(None);
        }

        let symbol = format!("{}{}", asset, self.quote_asset);
        match self.get_price(&symbol).await {
            Ok(_) => Ok(Some(symbol)),
            Err(e) if e.is_unknown_symbol() => Ok(None),
            Err(e) => Err(e),
        }
    }
}
