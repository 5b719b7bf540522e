//! Broker quote gateway
//!
//! REST access to point-in-time quotes. The engine only needs the last
//! traded price; everything else in the broker payload is ignored.

use crate::auth::BrokerCredentials;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Quote fetches are bounded so one slow symbol cannot stall a scan pass.
const QUOTE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum QuoteError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("broker error {code}: {message}")]
    Broker { code: i64, message: String },
    #[error("no quote data for {0}")]
    NoData(String),
    #[error("unparseable quote payload: {0}")]
    Parse(String),
}

/// Point-in-time price source. Object safe so the engine can be exercised
/// against a scripted gateway in tests.
#[async_trait]
pub trait QuoteGateway: Send + Sync {
    /// Last traded price for one symbol.
    async fn last_price(&self, symbol: &str) -> Result<Decimal, QuoteError>;
}

/// Quote client against the broker REST API.
pub struct BrokerQuoteClient {
    client: reqwest::Client,
    base_url: String,
    credentials: BrokerCredentials,
}

impl BrokerQuoteClient {
    pub fn new(base_url: String, credentials: BrokerCredentials) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(QUOTE_TIMEOUT)
                .build()
                .unwrap_or_default(),
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    /// Extract the last traded price from a broker quote payload.
    ///
    /// Shape: `{"code": 200, "d": [{"v": {"lp": <price>}}]}`.
    fn parse_last_price(body: &Value, symbol: &str) -> Result<Decimal, QuoteError> {
        let code = body.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        if code != 200 {
            let message = body
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("quote request rejected")
                .to_string();
            return Err(QuoteError::Broker { code, message });
        }

        let lp = body
            .get("d")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .and_then(|entry| entry.get("v"))
            .and_then(|v| v.get("lp"))
            .ok_or_else(|| QuoteError::NoData(symbol.to_string()))?;

        match lp {
            Value::Number(n) => n
                .as_f64()
                .and_then(Decimal::from_f64_retain)
                .ok_or_else(|| QuoteError::Parse(format!("lp={}", n))),
            Value::String(s) => s
                .parse::<Decimal>()
                .map_err(|_| QuoteError::Parse(format!("lp={}", s))),
            other => Err(QuoteError::Parse(format!("lp={}", other))),
        }
    }
}

#[async_trait]
impl QuoteGateway for BrokerQuoteClient {
    async fn last_price(&self, symbol: &str) -> Result<Decimal, QuoteError> {
        let url = format!("{}/data/quotes", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("symbols", symbol)])
            .header("Authorization", self.credentials.auth_header())
            .send()
            .await?;

        let body: Value = response.json().await?;
        Self::parse_last_price(&body, symbol)
    }
}
