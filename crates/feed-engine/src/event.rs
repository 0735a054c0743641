//! Closed taxonomy of push-stream events.
//!
//! Each stream message is one JSON object carrying a `type` tag. Unknown tags decode to
//! [`FeedEvent::Unknown`] so newer servers never break older clients.

use serde::{Deserialize, Serialize};

use crate::entity::Entity;
use crate::presence::ThreadKey;
use crate::workflow::{WorkflowFlavor, WorkflowPhase};
use crate::FeedResult;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedEvent {
    Snapshot(SnapshotEvent),
    EntityCreated(EntityEvent),
    EntityUpdated(EntityEvent),
    ActorThinking(ActorEvent),
    ActorIdle(ActorEvent),
    ReactionSet(ReactionEvent),
    Vote(VoteEvent),
    ReplyCount(ReplyCountEvent),
    #[serde(alias = "workflow_dispatched")]
    WorkflowStarted(WorkflowStartedEvent),
    WorkflowPhase(WorkflowPhaseEvent),
    WorkflowProgress(WorkflowProgressEvent),
    WorkflowCompleted(WorkflowCompletedEvent),
    RateLimited(RateLimitedEvent),
    Heartbeat,
    Connected,
    Reset,
    #[serde(other)]
    Unknown,
}

impl FeedEvent {
    pub fn decode(raw: &str) -> FeedResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FeedEvent::Snapshot(_) => "snapshot",
            FeedEvent::EntityCreated(_) => "entity_created",
            FeedEvent::EntityUpdated(_) => "entity_updated",
            FeedEvent::ActorThinking(_) => "actor_thinking",
            FeedEvent::ActorIdle(_) => "actor_idle",
            FeedEvent::ReactionSet(_) => "reaction_set",
            FeedEvent::Vote(_) => "vote",
            FeedEvent::ReplyCount(_) => "reply_count",
            FeedEvent::WorkflowStarted(_) => "workflow_started",
            FeedEvent::WorkflowPhase(_) => "workflow_phase",
            FeedEvent::WorkflowProgress(_) => "workflow_progress",
            FeedEvent::WorkflowCompleted(_) => "workflow_completed",
            FeedEvent::RateLimited(_) => "rate_limited",
            FeedEvent::Heartbeat => "heartbeat",
            FeedEvent::Connected => "connected",
            FeedEvent::Reset => "reset",
            FeedEvent::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEvent {
    #[serde(alias = "posts", alias = "messages", alias = "workstreams")]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEvent {
    #[serde(alias = "post", alias = "message", alias = "workstream")]
    pub entity: Entity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorEvent {
    #[serde(default, alias = "parent_id")]
    pub thread_id: Option<i64>,
    #[serde(alias = "agent")]
    pub actor: String,
}

impl ActorEvent {
    pub fn thread(&self) -> ThreadKey {
        ThreadKey::from_parent(self.thread_id)
    }
}

/// `reaction: None` clears the actor's reaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionEvent {
    #[serde(alias = "post_id", alias = "message_id")]
    pub entity_id: i64,
    #[serde(alias = "agent")]
    pub actor: String,
    #[serde(default)]
    pub reaction: Option<String>,
}

/// Either an absolute `score` or a relative `delta`; `score` wins when both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoteEvent {
    #[serde(alias = "post_id", alias = "message_id")]
    pub entity_id: i64,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub delta: Option<i64>,
    #[serde(default)]
    pub voter: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyCountEvent {
    #[serde(alias = "post_id", alias = "message_id")]
    pub entity_id: i64,
    pub reply_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStartedEvent {
    #[serde(alias = "post_id", alias = "message_id", alias = "workstream_id")]
    pub entity_id: i64,
    #[serde(default)]
    pub flavor: WorkflowFlavor,
    #[serde(default, alias = "agents")]
    pub actors: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPhaseEvent {
    #[serde(alias = "post_id", alias = "message_id", alias = "workstream_id")]
    pub entity_id: i64,
    pub phase: WorkflowPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowProgressEvent {
    #[serde(alias = "post_id", alias = "message_id", alias = "workstream_id")]
    pub entity_id: i64,
    #[serde(alias = "progress")]
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCompletedEvent {
    #[serde(alias = "post_id", alias = "message_id", alias = "workstream_id")]
    pub entity_id: i64,
    #[serde(default)]
    pub flavor: Option<WorkflowFlavor>,
    #[serde(default)]
    pub summary: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitedEvent {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub retry_after_secs: Option<u64>,
}
