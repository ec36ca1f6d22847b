//! Content-addressed storage for rendition bytes.

mod ipfs;
mod types;

pub use ipfs::HttpContentStore;
pub use types::{ContentMetadata, ContentStoreError, StoredContent};

use async_trait::async_trait;

/// A content-addressed store. The same bytes always yield the same content id.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store name for logging and metrics.
    fn name(&self) -> &str;

    /// Store and pin the bytes, returning their content id.
    async fn put(
        &self,
        bytes: Vec<u8>,
        metadata: ContentMetadata,
    ) -> Result<StoredContent, ContentStoreError>;

    /// Fetch the bytes stored under a content id.
    async fn get(&self, content_id: &str) -> Result<Vec<u8>, ContentStoreError>;
}
