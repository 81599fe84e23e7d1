//! # site-blob: object storage contract for the upload pipeline
//!
//! `site-blob` is the narrow seam between the upload pipeline and whatever
//! object storage actually holds the bytes. The pipeline only ever needs three
//! things from storage:
//!
//! - **put** a whole object under a path
//! - **resolve** the public URL of a stored path
//! - **remove** a set of paths, idempotently (removing a missing path succeeds)
//!
//! Stores that can assemble an object from previously written parts advertise
//! it through [`StoreCapabilities::supports_compose`] and implement
//! [`BlobStore::compose`]; the pipeline uses it instead of re-uploading the
//! whole payload after a chunked transfer.
//!
//! ## Quick Start
//!
//! ```rust
//! use site_blob::prelude::*;
//! use bytes::Bytes;
//!
//! # #[tokio::main]
//! # async fn main() -> BlobResult<()> {
//! let store = MemoryBlobStore::new().with_base_url("https://cdn.example.com/qa-photos");
//!
//! let path = DefaultPathStrategy.object_path("insp-1/item-7", "crack.jpg");
//! store.put(&path, Some("image/jpeg"), Bytes::from_static(b"...")).await?;
//!
//! let url = store.public_url(&path);
//! assert!(url.starts_with("https://cdn.example.com/qa-photos/insp-1/item-7/"));
//!
//! // Removal is idempotent
//! store.remove(&[path.clone()]).await?;
//! store.remove(&[path]).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  UploadManager  │  ← pipeline (site-upload)
//! ├─────────────────┤
//! │  PathStrategy   │  ← where objects and chunks live
//! ├─────────────────┤
//! │   BlobStore     │  ← storage primitives
//! └─────────────────┘
//! ```

mod error;
mod memory;
pub mod keys;
#[cfg(feature = "s3")]
mod s3_store;
pub mod store;

pub use error::{BlobError, BlobResult};
pub use keys::{DefaultPathStrategy, PathStrategy};
pub use memory::{BlobOp, MemoryBlobStore, StoredObject};
#[cfg(feature = "s3")]
pub use s3_store::{S3BlobStore, S3Config};
pub use store::{BlobStore, PutResult, StoreCapabilities};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{
        BlobError, BlobResult, BlobStore, DefaultPathStrategy, MemoryBlobStore, PathStrategy,
        PutResult, StoreCapabilities,
    };
}
