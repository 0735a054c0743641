use std::collections::HashMap;

use serde::Serialize;

use crate::entity::{Entity, Vote};
use crate::event::VoteEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    InFlight,
    Failed,
}

/// The viewer's vote as applied locally but not yet confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingVote {
    pub vote: Vote,
    /// Sum of the score deltas applied locally since the last confirmed state.
    pub delta: i64,
    pub status: MutationStatus,
    outstanding: u32,
}

/// What a vote click did locally; `vote` is what gets sent to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoteIntent {
    pub entity_id: i64,
    pub previous: Vote,
    pub vote: Vote,
    pub delta: i64,
}

/// Applies viewer mutations ahead of the network and reconciles them with what the
/// server later reports.
#[derive(Debug)]
pub struct MutationGateway {
    viewer: String,
    pending: HashMap<i64, PendingVote>,
    last_placeholder: i64,
}

impl MutationGateway {
    pub fn new(viewer: impl Into<String>) -> Self {
        Self {
            viewer: viewer.into(),
            pending: HashMap::new(),
            last_placeholder: 0,
        }
    }

    pub fn viewer(&self) -> &str {
        &self.viewer
    }

    /// Toggles the viewer's vote on `entity`: repeating a direction clears it, switching
    /// moves the score by the difference.
    pub fn vote(&mut self, entity: &Entity, direction: Vote) -> (Entity, VoteIntent) {
        let previous = entity.viewer_vote;
        let vote = previous.toggle(direction);
        let delta = vote.value() - previous.value();

        let mut updated = entity.clone();
        updated.viewer_vote = vote;
        updated.score += delta;

        let pending = self.pending.entry(entity.id).or_insert(PendingVote {
            vote,
            delta: 0,
            status: MutationStatus::InFlight,
            outstanding: 0,
        });
        pending.vote = vote;
        pending.delta += delta;
        pending.status = MutationStatus::InFlight;
        pending.outstanding += 1;

        let intent = VoteIntent {
            entity_id: entity.id,
            previous,
            vote,
            delta,
        };
        (updated, intent)
    }

    /// Records the REST outcome of one vote call.
    pub fn settle(&mut self, entity_id: i64, succeeded: bool) {
        let Some(pending) = self.pending.get_mut(&entity_id) else {
            return;
        };
        pending.outstanding = pending.outstanding.saturating_sub(1);
        if !succeeded {
            pending.status = MutationStatus::Failed;
            return;
        }
        if pending.outstanding == 0 && pending.status == MutationStatus::InFlight {
            self.pending.remove(&entity_id);
        }
    }

    /// Applies a streamed vote to `entity`. Echoes of the viewer's own vote never count twice.
    ///
    /// A vote without a voter is taken as our echo while a call is in flight and the event
    /// matches it: an absolute score equal to the optimistic one, or a delta equal to the
    /// pending delta.
    pub fn apply_vote_event(&mut self, entity: &Entity, event: &VoteEvent) -> Option<Entity> {
        let score = match event.voter.as_deref() {
            Some(voter) if voter == self.viewer => {
                self.pending.remove(&entity.id);
                event.score?
            }
            None if self.is_anonymous_echo(entity, event) => {
                self.pending.remove(&entity.id);
                return None;
            }
            _ => match (event.score, event.delta) {
                (Some(score), _) => score + self.in_flight_delta(entity.id),
                (None, Some(delta)) => entity.score + delta,
                (None, None) => return None,
            },
        };
        if score == entity.score {
            return None;
        }
        let mut updated = entity.clone();
        updated.score = score;
        Some(updated)
    }

    fn is_anonymous_echo(&self, entity: &Entity, event: &VoteEvent) -> bool {
        let Some(pending) = self
            .pending
            .get(&entity.id)
            .filter(|p| p.status == MutationStatus::InFlight)
        else {
            return false;
        };
        match (event.score, event.delta) {
            (Some(score), _) => score == entity.score,
            (None, Some(delta)) => delta != 0 && delta == pending.delta,
            (None, None) => false,
        }
    }

    /// Folds pending votes into an authoritative copy of an entity before it is merged.
    ///
    /// Agreement or a failed call drops the pending vote and the server copy stands; a call
    /// still in flight is re-applied on top of the server score.
    pub fn reconcile(&mut self, incoming: &mut Entity) {
        let Some(pending) = self.pending.get(&incoming.id) else {
            return;
        };
        if incoming.viewer_vote == pending.vote || pending.status == MutationStatus::Failed {
            self.pending.remove(&incoming.id);
            return;
        }
        incoming.score += pending.vote.value() - incoming.viewer_vote.value();
        incoming.viewer_vote = pending.vote;
    }

    fn in_flight_delta(&self, entity_id: i64) -> i64 {
        self.pending
            .get(&entity_id)
            .filter(|p| p.status == MutationStatus::InFlight)
            .map(|p| p.delta)
            .unwrap_or(0)
    }

    pub fn pending(&self, entity_id: i64) -> Option<&PendingVote> {
        self.pending.get(&entity_id)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Next client-side id for an optimistic placeholder: -1, -2, ...
    pub fn next_placeholder_id(&mut self) -> i64 {
        self.last_placeholder -= 1;
        self.last_placeholder
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
