//! # site-upload: resilient file uploads for construction-site QA
//!
//! Field crews attach photos and documents to inspection checklist items from
//! phones and laptops on unreliable connections. `site-upload` takes those
//! files and gets them into object storage:
//!
//! - **Validation at the door**: empty, oversized or unsupported files are
//!   rejected synchronously and never enter the queue
//! - **Priority dispatch**: higher priority first, FIFO within a priority,
//!   never more than `max_concurrent_uploads` in flight
//! - **Image preprocessing**: large photos are resized and re-encoded as JPEG
//!   before their first attempt, only when that makes them smaller
//! - **Chunked transfer**: large payloads are written in sequential chunks
//!   with per-chunk progress, then assembled
//! - **Bounded retries**: exponential backoff (1s, 2s, 4s, ...) capped at
//!   `max_delay`, with an explicit attempt budget
//! - **Offline queue**: nothing is dispatched or retried while offline;
//!   dispatch resumes when connectivity returns
//! - **Cancel wins**: a cancelled item ends `removed`, and anything written
//!   for it is cleaned up
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use site_upload::prelude::*;
//! use site_blob::MemoryBlobStore;
//!
//! # #[tokio::main]
//! # async fn main() -> UploadResult<()> {
//! let store = MemoryBlobStore::new();
//! let config = UploadConfig::new("qa-photos").with_destination_prefix("insp-42/item-7");
//! let manager = UploadManager::new(Arc::new(store.clone()), config)?;
//!
//! let report = manager.submit(
//!     vec![RawFile::new("handover.pdf", "application/pdf", b"%PDF-1.7".to_vec())],
//!     UploadPriority::Normal,
//! );
//! assert!(report.all_accepted());
//!
//! manager.settled().await;
//! let item = manager.item(&report.accepted[0]).unwrap();
//! assert_eq!(item.state, UploadState::Succeeded);
//! assert!(item.storage_url.unwrap().starts_with("memory://bucket/insp-42/item-7/"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! submit ──► ItemStore (queue) ──► dispatch ──► pipeline task per item
//!                 ▲                                │
//!                 │          Preprocessor ◄────────┤ once, before attempt 1
//!                 │       RetryController ◄────────┤ attempts + backoff
//!                 │      ChunkedTransfer ◄─────────┤ put / chunks + compose
//!                 └──── release slot, pull next ◄──┘
//!
//! ConnectivityMonitor ──► resumes dispatch when back online
//! ```

pub mod config;
pub mod connectivity;
pub mod error;
pub mod manager;
pub mod preprocess;
pub mod retry;
pub mod store;
#[cfg(feature = "tracing-basic")]
pub mod telemetry;
pub mod transfer;
pub mod types;

pub use config::{DeviceProfile, UploadConfig, ValidationRules};
pub use connectivity::{ConnectivityMonitor, ConnectivityProbe, ConnectivitySubscription};
pub use error::{CompressionError, TransferError, UploadError, UploadResult, ValidationError};
pub use manager::{EventStream, SubmitReport, UploadManager, UploadManagerBuilder};
pub use preprocess::{DecodedImage, EncodedImage, ImageCodec, Preprocessed, Preprocessor, RasterCodec};
pub use retry::{RetryController, RetryOutcome, RetryPolicy, RetryStep};
pub use store::{ItemStore, UploadStats};
pub use transfer::{ChunkedTransfer, TransferPlan, TransferRequest};
pub use types::{mime_from_name, ItemId, RawFile, UploadEvent, UploadItem, UploadPriority, UploadState};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        ConnectivityMonitor, DeviceProfile, ItemId, RawFile, RetryPolicy, SubmitReport,
        UploadConfig, UploadError, UploadEvent, UploadItem, UploadManager, UploadPriority,
        UploadResult, UploadState, ValidationRules,
    };
}
