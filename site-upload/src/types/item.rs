use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{ItemId, UploadPriority};

/// Upload item lifecycle
///
/// ```text
/// queued → [compressing] → uploading → succeeded
///                            ↕      ↘
///                         retrying → failed
/// queued | compressing | uploading | retrying → removed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// Waiting for a dispatch slot
    Queued,

    /// Image payload is being shrunk before the first attempt
    Compressing,

    /// A transfer attempt is running
    Uploading,

    /// Last attempt failed, waiting out the backoff delay
    Retrying,

    /// Stored; `storage_url` is set
    Succeeded,

    /// Retry budget exhausted; `last_error` is set
    Failed,

    /// Cancelled by the caller
    Removed,
}

impl UploadState {
    /// Terminal states accept no further mutation except disposal
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Removed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Queued, Compressing)
                | (Queued, Uploading)
                | (Compressing, Uploading)
                | (Uploading, Succeeded)
                | (Uploading, Retrying)
                | (Uploading, Failed)
                | (Retrying, Uploading)
                | (Retrying, Failed)
                | (Queued, Removed)
                | (Compressing, Removed)
                | (Uploading, Removed)
                | (Retrying, Removed)
                | (Failed, Queued)
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Compressing => "compressing",
            Self::Uploading => "uploading",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Removed => "removed",
        }
    }
}

impl std::fmt::Display for UploadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One submitted file's lifecycle record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadItem {
    /// Unique item identifier
    pub id: ItemId,

    /// Payload; replaced by the compressed bytes when preprocessing wins
    #[serde(skip)]
    pub(crate) bytes: Bytes,

    pub display_name: String,

    /// Size of the original submission
    pub size_bytes: u64,

    pub mime_type: String,

    /// Where the object is written in the bucket
    pub destination_path: String,

    pub priority: UploadPriority,

    pub state: UploadState,

    /// 0-100; only moves backwards when a new attempt restarts a chunk sequence
    pub progress_percent: u8,

    /// Attempts consumed so far
    pub attempt_count: u32,

    /// Present only while retrying or failed
    pub last_error: Option<String>,

    /// Present only once succeeded
    pub storage_url: Option<String>,

    /// Cancellation has been requested for an in-flight item
    pub cancel_requested: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UploadItem {
    /// Create a new queued item
    pub fn new(
        id: ItemId,
        display_name: String,
        mime_type: String,
        bytes: Bytes,
        destination_path: String,
        priority: UploadPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            size_bytes: bytes.len() as u64,
            bytes,
            display_name,
            mime_type,
            destination_path,
            priority,
            state: UploadState::Queued,
            progress_percent: 0,
            attempt_count: 0,
            last_error: None,
            storage_url: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Current payload length (after any compression)
    pub fn payload_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub(crate) fn payload(&self) -> Bytes {
        self.bytes.clone()
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move to `state`. Moves the lifecycle does not allow are refused and
    /// leave the item untouched.
    pub(crate) fn set_state(&mut self, state: UploadState) -> bool {
        if !self.state.can_transition_to(state) {
            warn!("Refusing illegal transition of {} from {} to {}", self.id, self.state, state);
            debug_assert!(false, "illegal transition {} -> {}", self.state, state);
            return false;
        }
        self.state = state;
        self.updated_at = Utc::now();
        true
    }

    pub(crate) fn start_compressing(&mut self) {
        self.set_state(UploadState::Compressing);
    }

    /// Replace the payload with preprocessed bytes
    pub(crate) fn replace_payload(&mut self, bytes: Bytes, mime_type: String) {
        self.bytes = bytes;
        self.mime_type = mime_type;
        self.updated_at = Utc::now();
    }

    /// Begin a new attempt
    pub(crate) fn start_attempt(&mut self) {
        if self.set_state(UploadState::Uploading) {
            self.attempt_count += 1;
            self.progress_percent = 0;
            self.last_error = None;
        }
    }

    /// Record progress; ignores values that would move backwards
    pub(crate) fn record_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if percent <= self.progress_percent {
            return false;
        }
        self.progress_percent = percent;
        self.updated_at = Utc::now();
        true
    }

    pub(crate) fn schedule_retry(&mut self, error: String) {
        if self.set_state(UploadState::Retrying) {
            self.last_error = Some(error);
        }
    }

    pub(crate) fn succeed(&mut self, storage_url: String) {
        if self.set_state(UploadState::Succeeded) {
            self.progress_percent = 100;
            self.storage_url = Some(storage_url);
            self.last_error = None;
        }
    }

    pub(crate) fn fail(&mut self, error: String) {
        if self.set_state(UploadState::Failed) {
            self.last_error = Some(error);
        }
    }

    pub(crate) fn remove(&mut self) {
        if self.set_state(UploadState::Removed) {
            self.last_error = None;
        }
    }

    /// Reset a failed item for a manual retry
    pub(crate) fn requeue(&mut self, priority: UploadPriority) {
        if self.set_state(UploadState::Queued) {
            self.attempt_count = 0;
            self.last_error = None;
            self.progress_percent = 0;
            self.cancel_requested = false;
            self.priority = priority;
        }
    }
}
