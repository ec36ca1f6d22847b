//! Mock content store for testing.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::content_store::{ContentMetadata, ContentStore, ContentStoreError, StoredContent};

/// Mock implementation of the ContentStore trait.
///
/// By default every put returns the content id `cid123`; `content_addressed`
/// derives ids from the bytes instead.
#[derive(Debug)]
pub struct MockContentStore {
    fixed_cid: Option<String>,
    objects: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    puts: Arc<RwLock<Vec<ContentMetadata>>>,
    errors: Arc<RwLock<VecDeque<ContentStoreError>>>,
}

impl Default for MockContentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockContentStore {
    pub fn new() -> Self {
        Self::with_fixed_cid("cid123")
    }

    pub fn with_fixed_cid(cid: impl Into<String>) -> Self {
        Self {
            fixed_cid: Some(cid.into()),
            objects: Arc::new(RwLock::new(HashMap::new())),
            puts: Arc::new(RwLock::new(Vec::new())),
            errors: Arc::new(RwLock::new(VecDeque::new())),
        }
    }

    pub fn content_addressed() -> Self {
        Self {
            fixed_cid: None,
            ..Self::new()
        }
    }

    /// Metadata of every successful put.
    pub async fn recorded_puts(&self) -> Vec<ContentMetadata> {
        self.puts.read().await.clone()
    }

    pub async fn put_count(&self) -> usize {
        self.puts.read().await.len()
    }

    /// Fail the next call with `error`.
    pub async fn push_error(&self, error: ContentStoreError) {
        self.errors.write().await.push_back(error);
    }

    fn content_id(&self, bytes: &[u8]) -> String {
        match &self.fixed_cid {
            Some(cid) => cid.clone(),
            None => {
                let digest = format!("{:x}", Sha256::digest(bytes));
                format!("bafy{}", &digest[..16])
            }
        }
    }
}

#[async_trait]
impl ContentStore for MockContentStore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn put(
        &self,
        bytes: Vec<u8>,
        metadata: ContentMetadata,
    ) -> Result<StoredContent, ContentStoreError> {
        if let Some(err) = self.errors.write().await.pop_front() {
            return Err(err);
        }

        let content_id = self.content_id(&bytes);
        let size_bytes = bytes.len() as u64;
        self.objects.write().await.insert(content_id.clone(), bytes);
        self.puts.write().await.push(metadata);

        Ok(StoredContent {
            gateway_url: format!("https://ipfs.io/ipfs/{}", content_id),
            content_id,
            size_bytes,
        })
    }

    async fn get(&self, content_id: &str) -> Result<Vec<u8>, ContentStoreError> {
        if let Some(err) = self.errors.write().await.pop_front() {
            return Err(err);
        }
        self.objects
            .read()
            .await
            .get(content_id)
            .cloned()
            .ok_or_else(|| ContentStoreError::NotFound(content_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_content_addressed_ids_follow_bytes() {
        let store = MockContentStore::content_addressed();
        let a = store.put(b"abc".to_vec(), ContentMetadata::default()).await.unwrap();
        let b = store.put(b"abc".to_vec(), ContentMetadata::default()).await.unwrap();
        let c = store.put(b"abd".to_vec(), ContentMetadata::default()).await.unwrap();

        assert_eq!(a.content_id, b.content_id);
        assert_ne!(a.content_id, c.content_id);
        assert_eq!(store.get(&a.content_id).await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn test_missing_content() {
        let store = MockContentStore::new();
        assert!(matches!(
            store.get("nope").await,
            Err(ContentStoreError::NotFound(_))
        ));
    }
}
