//! JSON-over-HTTP ledger gateway client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::LedgerConfig;

use super::{LedgerClient, LedgerError, MintReceipt, MintRequest};

/// Ledger client talking to a signing gateway.
///
/// `POST {url}/mints` submits and waits for confirmation;
/// `GET {url}/mints/{effect_key}` answers 404 until a mint with that key exists.
pub struct HttpLedgerClient {
    client: Client,
    config: LedgerConfig,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: String,
}

impl HttpLedgerClient {
    /// Create a new ledger client.
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        if config.url.trim().is_empty() {
            return Err(LedgerError::NotConfigured("ledger url is empty".to_string()));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key {
            Some(ref key) if !key.is_empty() => request.bearer_auth(key),
            _ => request,
        }
    }

    async fn error_from_response(response: reqwest::Response) -> LedgerError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|b| b.error)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| body.chars().take(200).collect());

        match status {
            429 => LedgerError::RateLimited,
            400..=499 => LedgerError::Rejected(message),
            _ => LedgerError::ServerError { status, message },
        }
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn submit_mint(&self, request: MintRequest) -> Result<MintReceipt, LedgerError> {
        let url = format!("{}/mints", self.base_url());
        debug!(effect_key = %request.effect_key, content_id = %request.content_id, "Submitting mint");

        let response = self
            .authorize(self.client.post(&url))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<MintReceipt>()
            .await
            .map_err(|e| LedgerError::ParseError(e.to_string()))
    }

    async fn find_mint(&self, effect_key: &str) -> Result<Option<MintReceipt>, LedgerError> {
        let url = format!("{}/mints/{}", self.base_url(), effect_key);

        let response = self.authorize(self.client.get(&url)).send().await?;

        if response.status() == 404 {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        response
            .json::<MintReceipt>()
            .await
            .map(Some)
            .map_err(|e| LedgerError::ParseError(e.to_string()))
    }
}
