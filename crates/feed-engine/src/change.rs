use serde::Serialize;

use crate::presence::ThreadKey;

/// One discrete state change produced while reducing the stream.
///
/// Observers subscribe to these through the bus instead of diffing the view themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum FeedChange {
    Inserted {
        id: i64,
    },
    Updated {
        id: i64,
    },
    Removed {
        id: i64,
    },
    PlaceholderResolved {
        placeholder_id: i64,
        id: i64,
    },
    ReplyCountChanged {
        parent_id: i64,
        reply_count: u32,
    },
    PresenceChanged {
        thread: ThreadKey,
        actors: Vec<String>,
    },
    WorkflowChanged {
        entity_id: i64,
    },
    NoticeRaised {
        message: String,
    },
    NoticeCleared,
    PaginationChanged {
        offset: usize,
        has_more: bool,
    },
    ConnectionChanged {
        connected: bool,
        attempt: u32,
    },
    Reset,
    /// A stream frame that could not be decoded and was skipped.
    Rejected {
        reason: String,
    },
}

impl FeedChange {
    pub fn kind(&self) -> &'static str {
        match self {
            FeedChange::Inserted { .. } => "inserted",
            FeedChange::Updated { .. } => "updated",
            FeedChange::Removed { .. } => "removed",
            FeedChange::PlaceholderResolved { .. } => "placeholder_resolved",
            FeedChange::ReplyCountChanged { .. } => "reply_count_changed",
            FeedChange::PresenceChanged { .. } => "presence_changed",
            FeedChange::WorkflowChanged { .. } => "workflow_changed",
            FeedChange::NoticeRaised { .. } => "notice_raised",
            FeedChange::NoticeCleared => "notice_cleared",
            FeedChange::PaginationChanged { .. } => "pagination_changed",
            FeedChange::ConnectionChanged { .. } => "connection_changed",
            FeedChange::Reset => "reset",
            FeedChange::Rejected { .. } => "rejected",
        }
    }

    /// Whether the ordered entity view may look different after this change.
    pub fn touches_view(&self) -> bool {
        matches!(
            self,
            FeedChange::Inserted { .. }
                | FeedChange::Updated { .. }
                | FeedChange::Removed { .. }
                | FeedChange::PlaceholderResolved { .. }
                | FeedChange::ReplyCountChanged { .. }
                | FeedChange::Reset
        )
    }
}

pub type ChangeSet = Vec<FeedChange>;
