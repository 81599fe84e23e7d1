//! Shared test doubles for the pipeline suites.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_stream::StreamExt;

use site_blob::{BlobError, BlobOp, BlobResult, BlobStore, MemoryBlobStore, PutResult, StoreCapabilities};
use site_upload::{
    CompressionError, DecodedImage, EncodedImage, EventStream, ImageCodec, UploadEvent,
};

/// Wraps [`MemoryBlobStore`] with injected put failures, put latency and
/// concurrency tracking.
#[derive(Clone)]
pub struct FlakyStore {
    inner: MemoryBlobStore,
    state: Arc<FlakyState>,
}

#[derive(Default)]
struct FlakyState {
    fail_remaining: AtomicU32,
    fail_all: AtomicBool,
    put_delay: Mutex<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    put_calls: Mutex<Vec<(String, Instant)>>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::wrap(MemoryBlobStore::new())
    }

    pub fn wrap(inner: MemoryBlobStore) -> Self {
        Self {
            inner,
            state: Arc::new(FlakyState::default()),
        }
    }

    /// The next `n` puts fail with a backend error
    pub fn fail_next(&self, n: u32) {
        self.state.fail_remaining.store(n, Ordering::SeqCst);
    }

    /// Every put fails until [`heal`](Self::heal)
    pub fn fail_always(&self) {
        self.state.fail_all.store(true, Ordering::SeqCst);
    }

    pub fn heal(&self) {
        self.state.fail_all.store(false, Ordering::SeqCst);
        self.state.fail_remaining.store(0, Ordering::SeqCst);
    }

    pub fn set_put_delay(&self, delay: Duration) {
        *self.state.put_delay.lock() = delay;
    }

    pub fn memory(&self) -> &MemoryBlobStore {
        &self.inner
    }

    /// Highest number of puts observed running at once
    pub fn max_concurrent_puts(&self) -> usize {
        self.state.max_active.load(Ordering::SeqCst)
    }

    /// Every put call (failed ones included) with the time it started
    pub fn put_calls(&self) -> Vec<(String, Instant)> {
        self.state.put_calls.lock().clone()
    }

    pub fn put_count(&self) -> usize {
        self.state.put_calls.lock().len()
    }

    pub fn ops(&self) -> Vec<BlobOp> {
        self.inner.ops()
    }

    fn should_fail(&self) -> bool {
        if self.state.fail_all.load(Ordering::SeqCst) {
            return true;
        }
        self.state
            .fail_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BlobStore for FlakyStore {
    async fn put(&self, path: &str, content_type: Option<&str>, bytes: Bytes) -> BlobResult<PutResult> {
        self.state.put_calls.lock().push((path.to_string(), Instant::now()));
        let active = self.state.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.max_active.fetch_max(active, Ordering::SeqCst);

        let delay = *self.state.put_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = if self.should_fail() {
            Err(BlobError::backend_message("503 Service Unavailable"))
        } else {
            self.inner.put(path, content_type, bytes).await
        };

        self.state.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn public_url(&self, path: &str) -> String {
        self.inner.public_url(path)
    }

    async fn remove(&self, paths: &[String]) -> BlobResult<()> {
        self.inner.remove(paths).await
    }

    async fn compose(&self, parts: &[String], dest: &str, content_type: Option<&str>) -> BlobResult<PutResult> {
        self.inner.compose(parts, dest, content_type).await
    }

    fn capabilities(&self) -> StoreCapabilities {
        self.inner.capabilities()
    }
}

/// Reports fixed dimensions and "encodes" to a fixed number of bytes
pub struct MockCodec {
    pub width: u32,
    pub height: u32,
    pub output_len: usize,
    pub fail_decode: bool,
    pub encoded_sizes: Mutex<Vec<(u32, u32)>>,
}

impl MockCodec {
    pub fn new(width: u32, height: u32, output_len: usize) -> Self {
        Self {
            width,
            height,
            output_len,
            fail_decode: false,
            encoded_sizes: Mutex::new(Vec::new()),
        }
    }

    pub fn broken() -> Self {
        Self {
            fail_decode: true,
            ..Self::new(0, 0, 0)
        }
    }
}

impl ImageCodec for MockCodec {
    fn decode(&self, _bytes: &[u8]) -> Result<DecodedImage, CompressionError> {
        if self.fail_decode {
            return Err(CompressionError::Decode("unsupported marker".to_string()));
        }
        Ok(DecodedImage::new(self.width, self.height, Vec::new()))
    }

    fn encode(
        &self,
        _image: DecodedImage,
        width: u32,
        height: u32,
        _quality: u8,
    ) -> Result<EncodedImage, CompressionError> {
        self.encoded_sizes.lock().push((width, height));
        Ok(EncodedImage {
            bytes: vec![0xD8; self.output_len],
            mime_type: "image/jpeg".to_string(),
        })
    }
}

/// Next event matching `pred`, failing the test after a (virtual) minute
pub async fn next_event_matching<F>(events: &mut EventStream, mut pred: F) -> UploadEvent
where
    F: FnMut(&UploadEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            let event = events.next().await.expect("event stream ended");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timeout waiting for event")
}

/// Deterministic payload of `len` bytes
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 253) as u8).collect()
}

pub const KIB: usize = 1024;
pub const MIB: usize = 1024 * 1024;
