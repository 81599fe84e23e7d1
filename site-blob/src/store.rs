use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{BlobError, BlobResult};

/// Core blob storage operations - must be implemented by all storage backends
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a whole object under `path`, replacing any previous content
    async fn put(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> BlobResult<PutResult>;

    /// Public URL for a stored path
    fn public_url(&self, path: &str) -> String;

    /// Remove objects. Missing paths are not an error.
    async fn remove(&self, paths: &[String]) -> BlobResult<()>;

    /// Assemble `parts` (in order) into a single object at `dest`.
    ///
    /// Only stores advertising `supports_compose` implement this.
    async fn compose(
        &self,
        parts: &[String],
        dest: &str,
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        let _ = (parts, dest, content_type);
        Err(BlobError::Unsupported)
    }

    /// Get store capabilities
    fn capabilities(&self) -> StoreCapabilities;
}

/// Result of a successful put operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutResult {
    pub etag: Option<String>,
    pub size_bytes: u64,
}

impl PutResult {
    pub fn new(size_bytes: u64) -> Self {
        Self {
            etag: None,
            size_bytes,
        }
    }

    pub fn with_etag<S: Into<String>>(mut self, etag: S) -> Self {
        self.etag = Some(etag.into());
        self
    }
}

/// Store capabilities
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreCapabilities {
    pub supports_compose: bool,
    pub max_object_bytes: Option<u64>,
}

impl StoreCapabilities {
    pub fn basic() -> Self {
        Self {
            supports_compose: false,
            max_object_bytes: None,
        }
    }

    pub fn with_compose(mut self) -> Self {
        self.supports_compose = true;
        self
    }

    pub fn with_max_object_bytes(mut self, bytes: u64) -> Self {
        self.max_object_bytes = Some(bytes);
        self
    }
}
