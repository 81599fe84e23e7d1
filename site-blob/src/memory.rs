use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::RwLock;

use crate::{BlobError, BlobResult, BlobStore, PutResult, StoreCapabilities};

/// An object held by [`MemoryBlobStore`]
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

/// One storage call observed by [`MemoryBlobStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlobOp {
    Put { path: String, size_bytes: u64 },
    Remove { paths: Vec<String> },
    Compose { parts: Vec<String>, dest: String },
}

/// In-memory store for tests and local development
#[derive(Clone)]
pub struct MemoryBlobStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
    ops: Arc<RwLock<Vec<BlobOp>>>,
    base_url: String,
    capabilities: StoreCapabilities,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            ops: Arc::new(RwLock::new(Vec::new())),
            base_url: "memory://bucket".to_string(),
            capabilities: StoreCapabilities::basic(),
        }
    }

    /// Prefix used by `public_url`
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Advertise and serve `compose`
    pub fn with_compose(mut self) -> Self {
        self.capabilities = self.capabilities.with_compose();
        self
    }

    /// Advertise a per-object size limit and refuse larger puts
    pub fn with_max_object_bytes(mut self, bytes: u64) -> Self {
        self.capabilities = self.capabilities.with_max_object_bytes(bytes);
        self
    }

    pub fn get(&self, path: &str) -> Option<StoredObject> {
        self.objects.read().get(path).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.read().contains_key(path)
    }

    /// All stored paths, sorted
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Every storage call in the order it was made
    pub fn ops(&self) -> Vec<BlobOp> {
        self.ops.read().clone()
    }

    /// Paths written with `put`, in call order
    pub fn put_paths(&self) -> Vec<String> {
        self.ops
            .read()
            .iter()
            .filter_map(|op| match op {
                BlobOp::Put { path, .. } => Some(path.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(
        &self,
        path: &str,
        content_type: Option<&str>,
        bytes: Bytes,
    ) -> BlobResult<PutResult> {
        if path.is_empty() {
            return Err(BlobError::invalid("Object path must not be empty"));
        }

        let size_bytes = bytes.len() as u64;
        if let Some(max) = self.capabilities.max_object_bytes {
            if size_bytes > max {
                return Err(BlobError::invalid(format!(
                    "Object of {} bytes exceeds the {} byte limit",
                    size_bytes, max
                )));
            }
        }
        self.objects.write().insert(
            path.to_string(),
            StoredObject {
                bytes,
                content_type: content_type.map(str::to_string),
            },
        );
        self.ops.write().push(BlobOp::Put {
            path: path.to_string(),
            size_bytes,
        });

        Ok(PutResult::new(size_bytes))
    }

    fn public_url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn remove(&self, paths: &[String]) -> BlobResult<()> {
        {
            let mut objects = self.objects.write();
            for path in paths {
                objects.remove(path);
            }
        }
        self.ops.write().push(BlobOp::Remove {
            paths: paths.to_vec(),
        });
        Ok(())
    }

    async fn compose(
        &self,
        parts: &[String],
        dest: &str,
        content_type: Option<&str>,
    ) -> BlobResult<PutResult> {
        if !self.capabilities.supports_compose {
            return Err(BlobError::Unsupported);
        }

        let assembled = {
            let objects = self.objects.read();
            let mut buf = BytesMut::new();
            for part in parts {
                let object = objects.get(part).ok_or_else(|| BlobError::not_found(part.clone()))?;
                buf.extend_from_slice(&object.bytes);
            }
            buf.freeze()
        };

        let size_bytes = assembled.len() as u64;
        self.objects.write().insert(
            dest.to_string(),
            StoredObject {
                bytes: assembled,
                content_type: content_type.map(str::to_string),
            },
        );
        self.ops.write().push(BlobOp::Compose {
            parts: parts.to_vec(),
            dest: dest.to_string(),
        });

        Ok(PutResult::new(size_bytes))
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.capabilities.clone()
    }
}
