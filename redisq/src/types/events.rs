use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ItemId;

/// In-process lifecycle events for observability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum QueueEvent {
    /// Item was appended to the source queue
    Enqueued {
        item_id: ItemId,
        queue: String,
        at: DateTime<Utc>,
    },

    /// Item was claimed by this engine
    Claimed {
        item_id: ItemId,
        deadline: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Item was acknowledged and removed from processing
    Acked {
        item_id: ItemId,
        at: DateTime<Utc>,
    },

    /// Item was moved to the error queue
    Failed {
        item_id: ItemId,
        reason: String,
        at: DateTime<Utc>,
    },

    /// A reclaim pass returned expired claims to circulation
    Reclaimed {
        requeued: usize,
        dead_lettered: usize,
        at: DateTime<Utc>,
    },
}

impl QueueEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Claimed { .. } => "claimed",
            Self::Acked { .. } => "acked",
            Self::Failed { .. } => "failed",
            Self::Reclaimed { .. } => "reclaimed",
        }
    }

    /// Item the event refers to, if it refers to a single one
    pub fn item_id(&self) -> Option<&ItemId> {
        match self {
            Self::Enqueued { item_id, .. }
            | Self::Claimed { item_id, .. }
            | Self::Acked { item_id, .. }
            | Self::Failed { item_id, .. } => Some(item_id),
            Self::Reclaimed { .. } => None,
        }
    }

    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. } => at,
            Self::Claimed { at, .. } => at,
            Self::Acked { at, .. } => at,
            Self::Failed { at, .. } => at,
            Self::Reclaimed { at, .. } => at,
        }
    }
}
