use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ItemId, UploadPriority, UploadState};

/// Change notifications published by the item store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UploadEvent {
    /// Item accepted and waiting for a slot
    Queued {
        item_id: ItemId,
        priority: UploadPriority,
        at: DateTime<Utc>,
    },

    /// Lifecycle transition
    StateChanged {
        item_id: ItemId,
        from: UploadState,
        to: UploadState,
        at: DateTime<Utc>,
    },

    /// Transfer progress of the current attempt
    Progress {
        item_id: ItemId,
        percent: u8,
        at: DateTime<Utc>,
    },

    /// Attempt failed, next one scheduled after `delay`
    Retrying {
        item_id: ItemId,
        attempt: u32,
        delay: Duration,
        error: String,
        at: DateTime<Utc>,
    },

    /// Item stored
    Succeeded {
        item_id: ItemId,
        storage_url: String,
        at: DateTime<Utc>,
    },

    /// Retry budget exhausted
    Failed {
        item_id: ItemId,
        error: String,
        at: DateTime<Utc>,
    },

    /// Item cancelled or disposed of
    Removed {
        item_id: ItemId,
        at: DateTime<Utc>,
    },
}

impl UploadEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Queued { .. } => "queued",
            Self::StateChanged { .. } => "state_changed",
            Self::Progress { .. } => "progress",
            Self::Retrying { .. } => "retrying",
            Self::Succeeded { .. } => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Removed { .. } => "removed",
        }
    }

    /// Get the item ID from any event
    pub fn item_id(&self) -> &ItemId {
        match self {
            Self::Queued { item_id, .. } => item_id,
            Self::StateChanged { item_id, .. } => item_id,
            Self::Progress { item_id, .. } => item_id,
            Self::Retrying { item_id, .. } => item_id,
            Self::Succeeded { item_id, .. } => item_id,
            Self::Failed { item_id, .. } => item_id,
            Self::Removed { item_id, .. } => item_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Queued { at, .. } => at,
            Self::StateChanged { at, .. } => at,
            Self::Progress { at, .. } => at,
            Self::Retrying { at, .. } => at,
            Self::Succeeded { at, .. } => at,
            Self::Failed { at, .. } => at,
            Self::Removed { at, .. } => at,
        }
    }
}
