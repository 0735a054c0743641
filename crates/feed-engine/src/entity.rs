use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::presence::ThreadKey;

/// Shared handle to an entity. Unchanged entities keep the same allocation across merges.
pub type EntityRef = Arc<Entity>;

/// Ordered top-level collection owned by one feed.
pub type Collection = Arc<Vec<EntityRef>>;

/// One unit in a live feed: a post, a chat message or a workstream record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Server-assigned; negative ids are client-side optimistic placeholders.
    pub id: i64,
    #[serde(alias = "agent", alias = "sender")]
    pub author: String,
    #[serde(default)]
    pub kind: EntityKind,
    #[serde(default, alias = "content")]
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub viewer_vote: Vote,
    #[serde(default)]
    pub reply_count: u32,
    #[serde(default)]
    pub reactions: HashMap<String, String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub category: Option<String>,
    /// Client-only: while in the future the entity is kept near the top of every sort.
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub local_priority: Option<DateTime<Utc>>,
}

impl Entity {
    pub fn new(id: i64, author: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            author: author.into(),
            kind: EntityKind::default(),
            body: body.into(),
            parent_id: None,
            created_at: Utc::now(),
            score: 0,
            viewer_vote: Vote::Neutral,
            reply_count: 0,
            reactions: HashMap::new(),
            pinned: false,
            category: None,
            local_priority: None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.id < 0
    }

    pub fn is_top_level(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn thread_key(&self) -> ThreadKey {
        ThreadKey::from_parent(self.parent_id)
    }

    pub fn reaction_count(&self) -> usize {
        self.reactions.len()
    }

    pub fn is_boosted(&self, now: DateTime<Utc>) -> bool {
        self.local_priority.is_some_and(|until| until > now)
    }

    /// Equality over the fields the server mutates after creation.
    pub fn same_state(&self, other: &Entity) -> bool {
        self.body == other.body
            && self.score == other.score
            && self.viewer_vote == other.viewer_vote
            && self.reply_count == other.reply_count
            && self.pinned == other.pinned
            && self.reactions == other.reactions
    }

    /// Whether this confirmed entity is the server copy of `placeholder`.
    ///
    /// Matching is by author and body only, so two identical rapid posts from one author
    /// can resolve against each other's placeholder.
    pub fn confirms(&self, placeholder: &Entity) -> bool {
        placeholder.is_placeholder()
            && !self.is_placeholder()
            && self.author == placeholder.author
            && self.body == placeholder.body
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    #[default]
    Text,
    ToolCall,
    PhaseMarker,
    #[serde(other)]
    Other,
}

/// The viewer's vote on an entity; travels as `-1`, `0` or `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "i8", into = "i8")]
pub enum Vote {
    Down,
    #[default]
    Neutral,
    Up,
}

impl Vote {
    pub fn value(self) -> i64 {
        match self {
            Vote::Down => -1,
            Vote::Neutral => 0,
            Vote::Up => 1,
        }
    }

    /// Up or down; neutral is a resulting state, never a click.
    pub fn is_direction(self) -> bool {
        self != Vote::Neutral
    }

    /// Result of clicking `direction` while this vote is active: the same direction clears.
    pub fn toggle(self, direction: Vote) -> Vote {
        if self == direction {
            Vote::Neutral
        } else {
            direction
        }
    }
}

impl TryFrom<i8> for Vote {
    type Error = InvalidVote;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Vote::Down),
            0 => Ok(Vote::Neutral),
            1 => Ok(Vote::Up),
            other => Err(InvalidVote(other)),
        }
    }
}

impl From<Vote> for i8 {
    fn from(vote: Vote) -> i8 {
        match vote {
            Vote::Down => -1,
            Vote::Neutral => 0,
            Vote::Up => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("vote must be -1, 0 or 1, got {0}")]
pub struct InvalidVote(pub i8);
