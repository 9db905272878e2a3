//! Best-effort Telegram notifications.
//!
//! Every executed trade is broadcast to a Telegram chat. Delivery is
//! fire-and-forget: failures are logged and never propagated, so a
//! Telegram outage cannot disturb the trading loop.

use crate::config::TelegramConfig;
use anyhow::{Context, Result};
use reqwest::Client;
use tracing::{debug, warn};

const TELEGRAM_BASE_URL: &str = "https://api.telegram.org";

/// Telegram `sendMessage` channel.
pub struct TelegramNotifier {
    http: Client,
    base_url: String,
    bot_token: String,
    chat_id: String,
    enabled: bool,
}

impl TelegramNotifier {
    /// Create a notifier from configuration.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        Self::with_base_url(config, TELEGRAM_BASE_URL)
    }

    /// Create a notifier against a custom API host (used in tests).
    pub fn with_base_url(config: &TelegramConfig, base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            bot_token: config.bot_token.clone(),
            chat_id: config.chat_id.clone(),
            enabled: config.enabled,
        })
    }

    /// Send a message. Never fails; problems are logged and dropped.
    pub async fn notify(&self, text: &str) {
        if !self.enabled {
            debug!(%text, "Notifications disabled, message dropped");
            return;
        }

        let url = format!("{}/bot{}/sendMessage", self.base_url, self.bot_token);
        let result = self
            .http
            .get(&url)
            .query(&[("chat_id", self.chat_id.as_str()), ("text", text)])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!("Notification delivered");
            }
            Ok(response) => {
                warn!(status = %response.status(), "Telegram rejected notification");
            }
            Err(e) => {
                warn!(error = %e, "Failed to deliver notification");
            }
        }
    }
}
