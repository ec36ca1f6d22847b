//! IPFS-compatible HTTP API content store.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{multipart, Client};
use serde::Deserialize;
use tracing::debug;

use crate::config::ContentStoreConfig;

use super::{ContentMetadata, ContentStore, ContentStoreError, StoredContent};

/// Content store backed by an IPFS node's `/api/v0` HTTP API.
pub struct HttpContentStore {
    client: Client,
    config: ContentStoreConfig,
}

#[derive(Debug, Deserialize)]
struct AddResponse {
    #[serde(rename = "Hash")]
    hash: String,
    #[serde(rename = "Size", default)]
    size: Option<String>,
}

impl HttpContentStore {
    /// Create a new content store client.
    pub fn new(config: ContentStoreConfig) -> Result<Self, ContentStoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()?;

        Ok(Self { client, config })
    }

    /// Get the API base URL without trailing slash.
    fn api_url(&self) -> &str {
        self.config.api_url.trim_end_matches('/')
    }

    /// Public URL for a content id.
    pub fn gateway_url(&self, content_id: &str) -> String {
        format!(
            "{}/ipfs/{}",
            self.config.gateway_url.trim_end_matches('/'),
            content_id
        )
    }

    async fn error_from_response(response: reqwest::Response) -> ContentStoreError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        ContentStoreError::ApiError {
            status,
            message: body.chars().take(200).collect(),
        }
    }
}

#[async_trait]
impl ContentStore for HttpContentStore {
    fn name(&self) -> &str {
        "ipfs"
    }

    async fn put(
        &self,
        bytes: Vec<u8>,
        metadata: ContentMetadata,
    ) -> Result<StoredContent, ContentStoreError> {
        let url = format!("{}/api/v0/add", self.api_url());
        let size_bytes = bytes.len() as u64;

        let mut part = multipart::Part::bytes(bytes).file_name(metadata.file_name.clone());
        if let Some(ref content_type) = metadata.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| ContentStoreError::Rejected(e.to_string()))?;
        }
        let form = multipart::Form::new().part("file", part);

        debug!(file = %metadata.file_name, size_bytes, "Adding content");

        let response = self
            .client
            .post(&url)
            .query(&[("pin", "true"), ("cid-version", "1")])
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let added: AddResponse = response
            .json()
            .await
            .map_err(|e| ContentStoreError::ParseError(e.to_string()))?;

        Ok(StoredContent {
            gateway_url: self.gateway_url(&added.hash),
            size_bytes: added
                .size
                .and_then(|s| s.parse().ok())
                .unwrap_or(size_bytes),
            content_id: added.hash,
        })
    }

    async fn get(&self, content_id: &str) -> Result<Vec<u8>, ContentStoreError> {
        let url = format!("{}/api/v0/cat", self.api_url());

        let response = self
            .client
            .post(&url)
            .query(&[("arg", content_id)])
            .send()
            .await?;

        let status = response.status();
        if status == 404 {
            return Err(ContentStoreError::NotFound(content_id.to_string()));
        }
        if !status.is_success() {
            let err = Self::error_from_response(response).await;
            // Kubo answers 500 with "merkledag: not found" for unknown ids
            if let ContentStoreError::ApiError { ref message, .. } = err {
                if message.contains("not found") {
                    return Err(ContentStoreError::NotFound(content_id.to_string()));
                }
            }
            return Err(err);
        }

        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_url_trims_slash() {
        let store = HttpContentStore::new(ContentStoreConfig {
            gateway_url: "https://gateway.example.com/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(
            store.gateway_url("bafy123"),
            "https://gateway.example.com/ipfs/bafy123"
        );
    }

    #[test]
    fn test_parse_add_response() {
        let json = r#"{"Name":"rendition.mp4","Hash":"bafybeigdyr","Size":"2048"}"#;
        let added: AddResponse = serde_json::from_str(json).unwrap();
        assert_eq!(added.hash, "bafybeigdyr");
        assert_eq!(added.size.as_deref(), Some("2048"));
    }

    #[tokio::test]
    async fn test_put_connection_refused_is_transient() {
        let store = HttpContentStore::new(ContentStoreConfig {
            api_url: "http://127.0.0.1:1".to_string(),
            timeout_secs: 2,
            ..Default::default()
        })
        .unwrap();

        let err = store
            .put(b"hello".to_vec(), ContentMetadata::default())
            .await
            .unwrap_err();
        assert_eq!(err.classify(), crate::job::FailureKind::Transient);
    }
}
