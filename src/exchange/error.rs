//! Exchange error types.

use thiserror::Error;

/// Result alias for exchange operations.
pub type ExchangeResult<T> = Result<T, ExchangeError>;

/// Errors that can occur when talking to the exchange.
///
/// Callers branch on the variant: transient failures mean "skip this
/// asset or cycle and retry on the next poll", never process exit.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Network-level failure (connect, timeout, TLS).
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Error returned by the exchange itself.
    ///
    /// Binance reports errors as `{"code": -1000, "msg": "..."}`.
    #[error("exchange API error {code}: {message}")]
    Api { code: i32, message: String },

    /// Response body did not match the expected shape.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// The requested trading pair does not exist on the exchange.
    #[error("unknown trading pair: {0}")]
    UnknownSymbol(String),
}

impl ExchangeError {
    /// Parse a Binance error body into a typed error.
    pub fn from_api_response(status: u16, body: &str) -> Self {
        #[derive(serde::Deserialize)]
        struct ApiError {
            code: i32,
            msg: String,
        }

        match serde_json::from_str::<ApiError>(body) {
            Ok(err) => Self::Api {
                code: err.code,
                message: err.msg,
            },
            Err(_) => Self::Parse(format!("HTTP {}: {}", status, body)),
        }
    }

    /// Whether retrying on a later cycle is likely to succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            // Binance server-side and rate-limit errors
            Self::Api { code, .. } => matches!(code, -1000 | -1001 | -1003 | -1015 | -1016),
            _ => false,
        }
    }

    /// Whether the error indicates the symbol simply does not trade.
    pub fn is_unknown_symbol(&self) -> bool {
        match self {
            Self::UnknownSymbol(_) => true,
            // -1121: invalid symbol
            Self::Api { code, .. } => *code == -1121,
            _ => false,
        }
    }
}
