//! The upload manager: accepts files, dispatches them under the concurrency
//! cap, and drives each one through preprocessing, transfer and retries.
//!
//! All mutable state (item store, in-flight count, cancellation tokens) sits
//! behind one mutex, so dispatch decisions are serialized. A finished
//! pipeline releases its slot and pulls the next item itself; there is no
//! polling loop.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use bytes::Bytes;
use chrono::Utc;
use futures_core::Stream;
use parking_lot::Mutex;
use site_blob::{BlobStore, DefaultPathStrategy, PathStrategy};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::preprocess::{ImageCodec, Preprocessor, RasterCodec};
use crate::retry::{RetryController, RetryOutcome, RetryStep};
use crate::store::{ItemStore, UploadStats};
use crate::transfer::{ChunkedTransfer, TransferRequest};
use crate::{
    ConnectivityMonitor, ItemId, RawFile, TransferError, UploadConfig, UploadError, UploadEvent,
    UploadItem, UploadPriority, UploadResult, UploadState,
};

/// Fresh ids and paths tried per file before giving up on a collision
const ALLOCATE_ATTEMPTS: usize = 3;

/// Stream of upload events
pub type EventStream = Pin<Box<dyn Stream<Item = UploadEvent> + Send>>;

/// What happened to each file passed to [`UploadManager::submit`]
#[derive(Debug, Default)]
pub struct SubmitReport {
    /// Ids of accepted files, in submission order
    pub accepted: Vec<ItemId>,

    /// One error per rejected file: `Validation`, or `Config` when the path
    /// strategy kept producing a destination already in use
    pub rejected: Vec<UploadError>,
}

impl SubmitReport {
    pub fn all_accepted(&self) -> bool {
        self.rejected.is_empty()
    }
}

struct DispatchState {
    items: ItemStore,
    in_flight: usize,
    tokens: HashMap<ItemId, RunToken>,
    next_run: u64,
}

/// Cancellation handle of one pipeline run; `run` tells successive runs of
/// the same item apart
struct RunToken {
    run: u64,
    token: CancellationToken,
}

struct Inner {
    config: UploadConfig,
    store: Arc<dyn BlobStore>,
    paths: Arc<dyn PathStrategy>,
    preprocessor: Preprocessor,
    transfer: ChunkedTransfer,
    connectivity: ConnectivityMonitor,
    state: Mutex<DispatchState>,
    events: broadcast::Sender<UploadEvent>,
    settled: Notify,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }
}

/// Builder for [`UploadManager`]
pub struct UploadManagerBuilder {
    config: UploadConfig,
    store: Arc<dyn BlobStore>,
    paths: Arc<dyn PathStrategy>,
    codec: Option<Arc<dyn ImageCodec>>,
    connectivity: ConnectivityMonitor,
}

impl UploadManagerBuilder {
    /// Image backend for preprocessing (defaults to [`RasterCodec`])
    pub fn codec(mut self, codec: Arc<dyn ImageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Upload images exactly as submitted
    pub fn without_preprocessing(mut self) -> Self {
        self.codec = None;
        self
    }

    pub fn path_strategy(mut self, paths: Arc<dyn PathStrategy>) -> Self {
        self.paths = paths;
        self
    }

    /// Share a connectivity monitor with whoever observes the network
    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Validate the config and start the connectivity watcher.
    ///
    /// Must be called inside a tokio runtime.
    pub fn build(self) -> UploadResult<UploadManager> {
        let mut config = self.config;
        config.validate()?;

        if let Some(limit) = self.store.capabilities().max_object_bytes {
            if limit < config.validation.max_file_bytes {
                debug!("Capping max file size at the store's {} byte object limit", limit);
                config.validation.max_file_bytes = limit;
            }
        }

        let preprocessor = match self.codec {
            Some(codec) => Preprocessor::new(codec, &config.device),
            None => Preprocessor::disabled(),
        };
        let transfer = ChunkedTransfer::new(
            self.store.clone(),
            self.paths.clone(),
            config.device.chunk_size_bytes,
        );
        let items = ItemStore::new();
        let events = items.events();

        let inner = Arc::new(Inner {
            config,
            store: self.store,
            paths: self.paths,
            preprocessor,
            transfer,
            connectivity: self.connectivity,
            state: Mutex::new(DispatchState {
                items,
                in_flight: 0,
                tokens: HashMap::new(),
                next_run: 0,
            }),
            events,
            settled: Notify::new(),
            watcher: Mutex::new(None),
        });

        let watcher = spawn_connectivity_watcher(Arc::downgrade(&inner), &inner.connectivity);
        *inner.watcher.lock() = Some(watcher);

        info!(
            "Upload manager ready for bucket {} (max {} concurrent)",
            inner.config.bucket, inner.config.device.max_concurrent_uploads
        );
        Ok(UploadManager { inner })
    }
}

/// Resume dispatch whenever connectivity comes back
fn spawn_connectivity_watcher(inner: Weak<Inner>, connectivity: &ConnectivityMonitor) -> JoinHandle<()> {
    let mut subscription = connectivity.subscribe();
    tokio::spawn(async move {
        while let Some(online) = subscription.changed().await {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            if online {
                info!("Back online, resuming dispatch");
                UploadManager { inner }.dispatch();
            } else {
                info!("Offline, dispatch paused");
            }
        }
    })
}

/// Coordinates every upload of one bucket
#[derive(Clone)]
pub struct UploadManager {
    inner: Arc<Inner>,
}

impl UploadManager {
    /// Manager with the default path strategy, image codec and an online monitor
    pub fn new(store: Arc<dyn BlobStore>, config: UploadConfig) -> UploadResult<Self> {
        Self::builder(store, config).build()
    }

    pub fn builder(store: Arc<dyn BlobStore>, config: UploadConfig) -> UploadManagerBuilder {
        UploadManagerBuilder {
            config,
            store,
            paths: Arc::new(DefaultPathStrategy),
            codec: Some(Arc::new(RasterCodec)),
            connectivity: ConnectivityMonitor::online(),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.inner.config
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    /// Validate and enqueue `files`. Returns immediately; uploads run in the
    /// background.
    #[instrument(skip(self, files), fields(count = files.len()))]
    pub fn submit(&self, files: Vec<RawFile>, priority: UploadPriority) -> SubmitReport {
        let mut report = SubmitReport::default();
        {
            let mut state = self.inner.state.lock();
            for file in files {
                if let Err(source) = self
                    .inner
                    .config
                    .validation
                    .validate(&file.mime_type, file.size_bytes())
                {
                    warn!("Rejected {}: {}", file.name, source);
                    report.rejected.push(UploadError::validation(file.name, source));
                    continue;
                }

                let (id, destination_path) = match self.allocate(&state.items, &file.name) {
                    Ok(allocated) => allocated,
                    Err(e) => {
                        warn!("Rejected {}: {}", file.name, e);
                        report.rejected.push(e);
                        continue;
                    }
                };
                debug!("Queued {} as {} -> {}", file.name, id, destination_path);

                let item = UploadItem::new(
                    id.clone(),
                    file.name,
                    file.mime_type,
                    file.bytes,
                    destination_path,
                    priority,
                );
                match state.items.insert(item) {
                    Ok(()) => report.accepted.push(id),
                    Err(e) => report.rejected.push(e),
                }
            }
        }

        if !report.accepted.is_empty() {
            info!("Accepted {} file(s) at {} priority", report.accepted.len(), priority);
            self.dispatch();
        }
        report
    }

    /// Fresh id and destination path for `file_name`, neither used by any record
    fn allocate(&self, items: &ItemStore, file_name: &str) -> UploadResult<(ItemId, String)> {
        let prefix = &self.inner.config.destination_prefix;
        for _ in 0..ALLOCATE_ATTEMPTS {
            let id = ItemId::generate(file_name);
            let path = self.inner.paths.object_path(prefix, file_name);
            if items.get(&id).is_none() && !items.path_in_use(&path) {
                return Ok((id, path));
            }
            debug!("Destination {} already taken, generating another", path);
        }
        Err(UploadError::config(format!(
            "no unused destination path for {} under {}",
            file_name, prefix
        )))
    }

    /// Submit a single file
    pub fn submit_file(&self, file: RawFile, priority: UploadPriority) -> UploadResult<ItemId> {
        let mut report = self.submit(vec![file], priority);
        if let Some(rejection) = report.rejected.pop() {
            return Err(rejection);
        }
        report
            .accepted
            .pop()
            .ok_or_else(|| UploadError::config("submission produced no item"))
    }

    /// Cancel a queued or in-flight item.
    ///
    /// A queued item is removed at once without touching the network. An
    /// in-flight item is flagged and its running pipeline stops at the next
    /// chunk boundary or backoff; a write already on the wire completes, and
    /// whatever it stored is removed again.
    #[instrument(skip(self), fields(item_id = %id))]
    pub fn cancel(&self, id: &ItemId) -> UploadResult<()> {
        let mut state = self.inner.state.lock();
        let current = state
            .items
            .get(id)
            .map(|item| item.state)
            .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

        match current {
            UploadState::Removed => return Ok(()),
            UploadState::Succeeded | UploadState::Failed => {
                return Err(UploadError::invalid_state(
                    id.as_str(),
                    current.name(),
                    "queued, compressing, uploading or retrying",
                ));
            }
            _ => {}
        }

        if state.items.dequeue(id) {
            state.items.update(id, UploadItem::remove);
            state.items.publish(UploadEvent::Removed {
                item_id: id.clone(),
                at: Utc::now(),
            });
            drop(state);
            info!("Cancelled queued upload");
            self.inner.settled.notify_waiters();
            return Ok(());
        }

        state.items.update(id, |item| item.cancel_requested = true);
        if let Some(handle) = state.tokens.get(id) {
            handle.token.cancel();
        }
        info!("Cancellation requested for in-flight upload");
        Ok(())
    }

    /// Requeue a failed item at high priority with a fresh retry budget
    #[instrument(skip(self), fields(item_id = %id))]
    pub fn retry_manually(&self, id: &ItemId) -> UploadResult<()> {
        {
            let mut state = self.inner.state.lock();
            let current = state
                .items
                .get(id)
                .map(|item| item.state)
                .ok_or_else(|| UploadError::NotFound(id.to_string()))?;
            if current != UploadState::Failed {
                return Err(UploadError::invalid_state(id.as_str(), current.name(), "failed"));
            }

            state.items.update(id, |item| item.requeue(UploadPriority::High));
            state.items.enqueue(id.clone(), UploadPriority::High);
        }

        info!("Manual retry queued");
        self.dispatch();
        Ok(())
    }

    /// Dispose of an item: cancel it if still running, delete its stored
    /// object if it succeeded, and drop the record.
    #[instrument(skip(self), fields(item_id = %id))]
    pub async fn remove(&self, id: &ItemId) -> UploadResult<()> {
        let stored_path = {
            let mut state = self.inner.state.lock();
            let item = state
                .items
                .remove(id)
                .ok_or_else(|| UploadError::NotFound(id.to_string()))?;

            if !item.is_terminal() {
                if let Some(handle) = state.tokens.get(id) {
                    handle.token.cancel();
                }
            }
            if item.state != UploadState::Removed {
                state.items.publish(UploadEvent::Removed {
                    item_id: id.clone(),
                    at: Utc::now(),
                });
            }

            (item.state == UploadState::Succeeded).then_some(item.destination_path)
        };
        self.inner.settled.notify_waiters();

        if let Some(path) = stored_path {
            self.inner
                .store
                .remove(&[path])
                .await
                .map_err(TransferError::from)?;
        }
        info!("Upload removed");
        Ok(())
    }

    /// Cancel everything, delete stored objects of succeeded items and empty
    /// the store.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> UploadResult<()> {
        let stored_paths = {
            let mut state = self.inner.state.lock();
            for handle in state.tokens.values() {
                handle.token.cancel();
            }

            let drained = state.items.drain();
            let mut stored_paths = Vec::new();
            for item in drained {
                match item.state {
                    UploadState::Succeeded => stored_paths.push(item.destination_path),
                    UploadState::Removed => continue,
                    _ => {}
                }
                state.items.publish(UploadEvent::Removed {
                    item_id: item.id,
                    at: Utc::now(),
                });
            }
            stored_paths
        };
        self.inner.settled.notify_waiters();

        if !stored_paths.is_empty() {
            self.inner
                .store
                .remove(&stored_paths)
                .await
                .map_err(TransferError::from)?;
        }
        info!("Cleared all uploads ({} stored objects removed)", stored_paths.len());
        Ok(())
    }

    /// Snapshot of every item, oldest first
    pub fn items(&self) -> Vec<UploadItem> {
        self.inner.state.lock().items.list()
    }

    pub fn item(&self, id: &ItemId) -> Option<UploadItem> {
        self.inner.state.lock().items.get(id).cloned()
    }

    pub fn items_in_state(&self, state: UploadState) -> Vec<UploadItem> {
        self.inner.state.lock().items.by_state(state)
    }

    pub fn stats(&self) -> UploadStats {
        let state = self.inner.state.lock();
        state.items.stats(state.in_flight)
    }

    /// Live event feed. Events published before subscribing are not replayed.
    pub fn subscribe(&self) -> EventStream {
        let stream = BroadcastStream::new(self.inner.events.subscribe()).filter_map(|result| result.ok());
        Box::pin(stream)
    }

    /// Raw receiver, for callers that want to observe `Lagged`
    pub fn subscribe_raw(&self) -> broadcast::Receiver<UploadEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once every item is terminal and no pipeline is running
    pub async fn settled(&self) {
        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_settled() {
                return;
            }
            notified.await;
        }
    }

    fn is_settled(&self) -> bool {
        let state = self.inner.state.lock();
        state.in_flight == 0 && state.items.all_terminal()
    }

    /// Fill free slots from the queue
    fn dispatch(&self) {
        if self.inner.config.enable_offline_queue && !self.inner.connectivity.is_online() {
            debug!("Offline, not dispatching");
            return;
        }

        let launches = {
            let mut state = self.inner.state.lock();
            let mut launches = Vec::new();
            while state.in_flight < self.inner.config.device.max_concurrent_uploads {
                let Some(id) = state.items.pop_next() else {
                    break;
                };
                let token = CancellationToken::new();
                let run = state.next_run;
                state.next_run += 1;
                state.tokens.insert(
                    id.clone(),
                    RunToken {
                        run,
                        token: token.clone(),
                    },
                );
                state.in_flight += 1;
                launches.push((id, run, token));
            }
            launches
        };

        for (id, run, token) in launches {
            let manager = self.clone();
            tokio::spawn(async move {
                manager.run_pipeline(&id, token).await;
                manager.release_slot(&id, run);
            });
        }
    }

    /// Free the slot held by pipeline `run` of `id`. A manual retry may have
    /// started a newer run of the same item already; its token stays.
    fn release_slot(&self, id: &ItemId, run: u64) {
        {
            let mut state = self.inner.state.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            if state.tokens.get(id).is_some_and(|handle| handle.run == run) {
                state.tokens.remove(id);
            }
        }
        self.inner.settled.notify_waiters();
        self.dispatch();
    }

    #[instrument(skip(self, token), fields(item_id = %id))]
    async fn run_pipeline(&self, id: &ItemId, token: CancellationToken) {
        let Some((bytes, mime_type, destination_path)) = self.payload(id) else {
            return;
        };
        if token.is_cancelled() {
            self.finish_removed(id);
            return;
        }

        let (bytes, mime_type) = if self.inner.preprocessor.applies_to(&mime_type, bytes.len() as u64) {
            self.with_item(id, UploadItem::start_compressing);
            let processed = self.inner.preprocessor.process(&mime_type, bytes).await;
            if processed.compressed {
                let (compressed, mime) = (processed.bytes.clone(), processed.mime_type.clone());
                self.with_item(id, |item| item.replace_payload(compressed, mime));
            }
            (processed.bytes, processed.mime_type)
        } else {
            (bytes, mime_type)
        };

        if token.is_cancelled() {
            self.finish_removed(id);
            return;
        }

        let request = TransferRequest {
            destination_path: destination_path.clone(),
            content_type: Some(mime_type),
            bytes,
        };

        let mut controller = RetryController::new(&self.inner.config.retry, &token);
        if self.inner.config.enable_offline_queue {
            controller = controller.gated_by(&self.inner.connectivity);
        }

        let request = &request;
        let token_ref = &token;
        let outcome = controller
            .run(
                move |_| self.attempt(request.clone(), token_ref, id),
                move |step| self.observe_step(id, step),
            )
            .await;

        match outcome {
            RetryOutcome::Succeeded { value: url, attempts } => {
                if !self.finish_succeeded(id, url, attempts) {
                    // Cancel wins over a write that completed anyway
                    if let Err(e) = self.inner.store.remove(&[destination_path]).await {
                        warn!("Failed to remove object of cancelled upload: {}", e);
                    }
                    self.finish_removed(id);
                }
            }
            RetryOutcome::Exhausted { attempts, last_error } => {
                self.finish_failed(id, attempts, last_error);
            }
            RetryOutcome::Cancelled { .. } => self.finish_removed(id),
        }
    }

    async fn attempt(
        &self,
        request: TransferRequest,
        token: &CancellationToken,
        id: &ItemId,
    ) -> Result<String, TransferError> {
        self.inner
            .transfer
            .run(request, token, |percent| self.record_progress(id, percent))
            .await
    }

    fn payload(&self, id: &ItemId) -> Option<(Bytes, String, String)> {
        let state = self.inner.state.lock();
        state
            .items
            .get(id)
            .map(|item| (item.payload(), item.mime_type.clone(), item.destination_path.clone()))
    }

    fn with_item<R>(&self, id: &ItemId, f: impl FnOnce(&mut UploadItem) -> R) -> Option<R> {
        self.inner.state.lock().items.update(id, f)
    }

    fn record_progress(&self, id: &ItemId, percent: u8) {
        let mut state = self.inner.state.lock();
        if state.items.update(id, |item| item.record_progress(percent)) == Some(true) {
            state.items.publish(UploadEvent::Progress {
                item_id: id.clone(),
                percent,
                at: Utc::now(),
            });
        }
    }

    fn observe_step(&self, id: &ItemId, step: RetryStep) {
        let mut state = self.inner.state.lock();
        match step {
            RetryStep::Attempt { number } => {
                state.items.update(id, UploadItem::start_attempt);
                debug!("Starting attempt {}", number);
            }
            RetryStep::Backoff { attempt, delay, error } => {
                state.items.update(id, |item| item.schedule_retry(error.clone()));
                state.items.publish(UploadEvent::Retrying {
                    item_id: id.clone(),
                    attempt,
                    delay,
                    error,
                    at: Utc::now(),
                });
            }
        }
    }

    /// False if the item was cancelled or disposed of meanwhile
    fn finish_succeeded(&self, id: &ItemId, url: String, attempts: u32) -> bool {
        let mut state = self.inner.state.lock();
        let cancelled = state
            .items
            .get(id)
            .map_or(true, |item| item.cancel_requested || item.is_terminal());
        if cancelled {
            return false;
        }

        state.items.update(id, |item| item.succeed(url.clone()));
        state.items.publish(UploadEvent::Succeeded {
            item_id: id.clone(),
            storage_url: url,
            at: Utc::now(),
        });
        drop(state);

        info!("Upload succeeded after {} attempt(s)", attempts);
        true
    }

    fn finish_failed(&self, id: &ItemId, attempts: u32, last_error: String) {
        let exhausted = UploadError::Exhausted {
            attempts,
            last_error: last_error.clone(),
        };

        let mut state = self.inner.state.lock();
        let Some(item) = state.items.get(id) else {
            return;
        };
        if item.is_terminal() {
            return;
        }
        if item.cancel_requested {
            drop(state);
            self.finish_removed(id);
            return;
        }

        if state.items.update(id, |item| item.fail(last_error)).is_some() {
            state.items.publish(UploadEvent::Failed {
                item_id: id.clone(),
                error: exhausted.to_string(),
                at: Utc::now(),
            });
        }
        drop(state);

        error!("Upload failed: {}", exhausted);
    }

    fn finish_removed(&self, id: &ItemId) {
        let mut state = self.inner.state.lock();
        let removed = state.items.update(id, |item| {
            if item.is_terminal() {
                return false;
            }
            item.remove();
            true
        });
        if removed == Some(true) {
            state.items.publish(UploadEvent::Removed {
                item_id: id.clone(),
                at: Utc::now(),
            });
            drop(state);
            info!("Upload cancelled");
        }
    }
}
