//! Payloads and results exchanged between stages.
//!
//! Every payload carries the original `AssetRequest` so later stages (and
//! the chainer) never need to look back at earlier jobs.

use serde::{Deserialize, Serialize};

use crate::transcoder::{Rendition, RenditionFormat};

/// Descriptive metadata of an uploaded asset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetMetadata {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// What the uploader asked for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetRequest {
    pub source_location: String,
    pub metadata: AssetMetadata,
    /// Creator identity; owner of the minted token.
    pub creator: String,
    /// Royalty in basis points.
    pub royalty_bps: u16,
    /// Who is told about the mint. Defaults to the creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    pub target_formats: Vec<RenditionFormat>,
}

impl AssetRequest {
    pub fn recipient(&self) -> &str {
        self.recipient.as_deref().unwrap_or(&self.creator)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscodePayload {
    pub request: AssetRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinPayload {
    pub request: AssetRequest,
    pub renditions: Vec<Rendition>,
    pub duration_seconds: f64,
}

impl PinPayload {
    /// The rendition whose content id identifies the asset.
    pub fn primary(&self) -> Option<&Rendition> {
        self.renditions.first()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedRendition {
    pub format: RenditionFormat,
    pub content_id: String,
    pub size_bytes: u64,
}

/// Receipt of the pin stage; also stored as its effect receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinResult {
    /// Content id of the primary rendition.
    pub content_id: String,
    pub gateway_url: String,
    /// Location of the token metadata document.
    pub metadata_uri: String,
    pub renditions: Vec<PinnedRendition>,
    pub effect_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MintPayload {
    pub request: AssetRequest,
    pub content_id: String,
    pub gateway_url: String,
    pub metadata_uri: String,
    pub duration_seconds: f64,
}

/// Receipt of the mint stage; also stored as its effect receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintResult {
    pub asset_token_id: String,
    pub tx_receipt: String,
    pub effect_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyPayload {
    /// The correlation id of the run.
    pub asset_id: String,
    pub token_id: String,
    pub receipt_id: String,
    pub recipient: String,
    pub content_id: String,
    pub gateway_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyResult {
    pub sink: String,
    pub recipient: String,
}
