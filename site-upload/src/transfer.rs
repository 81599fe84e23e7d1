//! One transfer attempt: a single put, or sequential chunks plus assembly.
//!
//! Chunks are written one after another to `{path}.chunk.{i}`. Once all are
//! stored they are composed server-side when the store supports it; otherwise
//! the whole payload is written to the destination in one put. Chunk objects
//! are removed afterwards, and on failure whatever was written is cleaned up
//! best effort.

use std::sync::Arc;

use bytes::Bytes;
use site_blob::{BlobStore, PathStrategy};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TransferError;

const CHUNK_CONTENT_TYPE: &str = "application/octet-stream";

/// Number of chunks needed for `size_bytes`
pub fn total_chunks(size_bytes: u64, chunk_size: u64) -> u32 {
    if chunk_size == 0 {
        return 1;
    }
    size_bytes.div_ceil(chunk_size).max(1) as u32
}

/// Percent complete after `done` of `total` chunks
pub fn chunk_progress(done: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    ((100.0 * f64::from(done)) / f64::from(total)).round().min(100.0) as u8
}

/// How a payload will be written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPlan {
    Single,
    Chunked { total_chunks: u32, chunk_size: u64 },
}

impl TransferPlan {
    /// Chunk only when the payload exceeds `chunk_size`
    pub fn for_size(size_bytes: u64, chunk_size: u64) -> Self {
        if chunk_size == 0 || size_bytes <= chunk_size {
            Self::Single
        } else {
            Self::Chunked {
                total_chunks: total_chunks(size_bytes, chunk_size),
                chunk_size,
            }
        }
    }
}

/// Payload for one attempt
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub destination_path: String,
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

/// Writes payloads to a [`BlobStore`]
#[derive(Clone)]
pub struct ChunkedTransfer {
    store: Arc<dyn BlobStore>,
    paths: Arc<dyn PathStrategy>,
    chunk_size: u64,
}

impl ChunkedTransfer {
    pub fn new(store: Arc<dyn BlobStore>, paths: Arc<dyn PathStrategy>, chunk_size: u64) -> Self {
        Self {
            store,
            paths,
            chunk_size,
        }
    }

    pub fn plan(&self, size_bytes: u64) -> TransferPlan {
        TransferPlan::for_size(size_bytes, self.chunk_size)
    }

    /// Run one attempt and return the public URL of the stored object.
    ///
    /// `cancel` is checked between chunks, never in the middle of a put.
    pub async fn run<P>(
        &self,
        request: TransferRequest,
        cancel: &CancellationToken,
        mut on_progress: P,
    ) -> Result<String, TransferError>
    where
        P: FnMut(u8),
    {
        let content_type = request.content_type.as_deref();

        match self.plan(request.bytes.len() as u64) {
            TransferPlan::Single => {
                if cancel.is_cancelled() {
                    return Err(TransferError::Cancelled);
                }
                self.store
                    .put(&request.destination_path, content_type, request.bytes)
                    .await?;
                on_progress(100);
            }
            TransferPlan::Chunked {
                total_chunks,
                chunk_size,
            } => {
                debug!(
                    "Writing {} in {} chunks of {} bytes",
                    request.destination_path, total_chunks, chunk_size
                );
                let written = self
                    .write_chunks(&request, total_chunks, chunk_size, cancel, &mut on_progress)
                    .await?;

                if let Err(e) = self.assemble(&request, &written).await {
                    self.cleanup(&written).await;
                    return Err(e);
                }
                self.cleanup(&written).await;
            }
        }

        Ok(self.store.public_url(&request.destination_path))
    }

    async fn write_chunks<P>(
        &self,
        request: &TransferRequest,
        total_chunks: u32,
        chunk_size: u64,
        cancel: &CancellationToken,
        on_progress: &mut P,
    ) -> Result<Vec<String>, TransferError>
    where
        P: FnMut(u8),
    {
        let len = request.bytes.len();
        let chunk_size = chunk_size as usize;
        let mut written = Vec::with_capacity(total_chunks as usize);

        for index in 0..total_chunks {
            if cancel.is_cancelled() {
                self.cleanup(&written).await;
                return Err(TransferError::Cancelled);
            }

            let start = index as usize * chunk_size;
            let end = (start + chunk_size).min(len);
            let path = self.paths.chunk_path(&request.destination_path, index);

            if let Err(e) = self
                .store
                .put(&path, Some(CHUNK_CONTENT_TYPE), request.bytes.slice(start..end))
                .await
            {
                self.cleanup(&written).await;
                return Err(e.into());
            }

            written.push(path);
            on_progress(chunk_progress(index + 1, total_chunks));
        }

        if cancel.is_cancelled() {
            self.cleanup(&written).await;
            return Err(TransferError::Cancelled);
        }

        Ok(written)
    }

    async fn assemble(&self, request: &TransferRequest, parts: &[String]) -> Result<(), TransferError> {
        let content_type = request.content_type.as_deref();

        if self.store.capabilities().supports_compose {
            self.store
                .compose(parts, &request.destination_path, content_type)
                .await?;
        } else {
            self.store
                .put(&request.destination_path, content_type, request.bytes.clone())
                .await?;
        }
        Ok(())
    }

    /// Best effort; a failed cleanup never fails the attempt
    async fn cleanup(&self, paths: &[String]) {
        if paths.is_empty() {
            return;
        }
        if let Err(e) = self.store.remove(paths).await {
            warn!("Failed to remove {} chunk objects: {}", paths.len(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use site_blob::{BlobOp, DefaultPathStrategy, MemoryBlobStore};

    fn transfer(store: &MemoryBlobStore, chunk_size: u64) -> ChunkedTransfer {
        ChunkedTransfer::new(Arc::new(store.clone()), Arc::new(DefaultPathStrategy), chunk_size)
    }

    fn request(len: usize) -> TransferRequest {
        TransferRequest {
            destination_path: "site/report.pdf".to_string(),
            content_type: Some("application/pdf".to_string()),
            bytes: Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>()),
        }
    }

    #[test]
    fn chunk_count_rounds_up() {
        assert_eq!(total_chunks(12 * 1024 * 1024, 5 * 1024 * 1024), 3);
        assert_eq!(total_chunks(10, 5), 2);
        assert_eq!(total_chunks(11, 5), 3);
        assert_eq!(TransferPlan::for_size(5, 5), TransferPlan::Single);
    }

    proptest! {
        #[test]
        fn chunks_cover_payload_exactly(size in 1u64..1_000_000_000, chunk in 1u64..50_000_000) {
            let n = u64::from(total_chunks(size, chunk));
            prop_assert!(n * chunk >= size);
            prop_assert!((n - 1) * chunk < size);
        }

        #[test]
        fn progress_is_monotonic(total in 1u32..500) {
            let mut last = 0;
            for done in 1..=total {
                let p = chunk_progress(done, total);
                prop_assert!(p >= last);
                last = p;
            }
            prop_assert_eq!(last, 100);
        }
    }

    #[tokio::test]
    async fn small_payload_is_a_single_put() {
        let store = MemoryBlobStore::new();
        let mut progress = Vec::new();

        let url = transfer(&store, 1024)
            .run(request(100), &CancellationToken::new(), |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(url, "memory://bucket/site/report.pdf");
        assert_eq!(store.put_paths(), vec!["site/report.pdf".to_string()]);
        assert_eq!(progress, vec![100]);
    }

    #[tokio::test]
    async fn chunked_without_compose_rewrites_and_cleans_up() {
        let store = MemoryBlobStore::new();
        let mut progress = Vec::new();
        let req = request(2500);
        let original = req.bytes.clone();

        transfer(&store, 1000)
            .run(req, &CancellationToken::new(), |p| progress.push(p))
            .await
            .unwrap();

        assert_eq!(
            store.put_paths(),
            vec![
                "site/report.pdf.chunk.0".to_string(),
                "site/report.pdf.chunk.1".to_string(),
                "site/report.pdf.chunk.2".to_string(),
                "site/report.pdf".to_string(),
            ]
        );
        assert_eq!(progress, vec![33, 67, 100]);
        assert_eq!(store.paths(), vec!["site/report.pdf".to_string()]);
        assert_eq!(store.get("site/report.pdf").unwrap().bytes, original);
    }

    #[tokio::test]
    async fn chunked_with_compose_assembles_server_side() {
        let store = MemoryBlobStore::new().with_compose();
        let req = request(2500);
        let original = req.bytes.clone();

        transfer(&store, 1000)
            .run(req, &CancellationToken::new(), |_| {})
            .await
            .unwrap();

        assert!(store
            .ops()
            .iter()
            .any(|op| matches!(op, BlobOp::Compose { parts, .. } if parts.len() == 3)));
        assert_eq!(store.paths(), vec!["site/report.pdf".to_string()]);
        assert_eq!(store.get("site/report.pdf").unwrap().bytes, original);
    }

    #[tokio::test]
    async fn cancelled_before_start_writes_nothing() {
        let store = MemoryBlobStore::new();
        let token = CancellationToken::new();
        token.cancel();

        let err = transfer(&store, 1000).run(request(2500), &token, |_| {}).await.unwrap_err();
        assert!(err.is_cancelled());
        assert!(store.ops().is_empty());
    }

    #[tokio::test]
    async fn cancel_between_chunks_removes_written_chunks() {
        let store = MemoryBlobStore::new();
        let token = CancellationToken::new();
        let trigger = token.clone();

        let err = transfer(&store, 1000)
            .run(request(2500), &token, |p| {
                if p >= 33 {
                    trigger.cancel();
                }
            })
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert!(store.is_empty());
        assert!(store
            .ops()
            .contains(&BlobOp::Remove { paths: vec!["site/report.pdf.chunk.0".to_string()] }));
    }
}
