//! Canonical state of one feed and the reducer that applies stream events to it.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use feed_sdk::{Draft, Page};
use tracing::{debug, trace};

use crate::change::{ChangeSet, FeedChange};
use crate::clock::span;
use crate::config::FeedConfig;
use crate::entity::{Collection, Entity, EntityRef, Vote};
use crate::event::{FeedEvent, ReactionEvent, VoteEvent};
use crate::merge;
use crate::notice::{Notice, NoticeBoard};
use crate::optimistic::{MutationGateway, VoteIntent};
use crate::pagination::{PageRequest, PaginationCursor};
use crate::presence::{PresenceTracker, ThreadKey};
use crate::ranking::{self, SortMode};
use crate::workflow::{WorkflowBoard, WorkflowRecord};

/// A locally submitted entity waiting for the create call.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub draft: Draft,
    /// Top-level posts get a placeholder; replies do not.
    pub placeholder_id: Option<i64>,
    pub changes: ChangeSet,
}

#[derive(Debug)]
pub struct FeedStore {
    entities: Collection,
    seen_replies: HashSet<i64>,
    presence: PresenceTracker,
    workflows: WorkflowBoard,
    notices: NoticeBoard,
    cursor: PaginationCursor,
    gateway: MutationGateway,
    sort: SortMode,
    local_priority_window: chrono::Duration,
}

impl FeedStore {
    pub fn new(config: &FeedConfig) -> Self {
        Self {
            entities: Arc::new(Vec::new()),
            seen_replies: HashSet::new(),
            presence: PresenceTracker::new(config.presence_max_age),
            workflows: WorkflowBoard::new(),
            notices: NoticeBoard::new(config.notice_ttl),
            cursor: PaginationCursor::new(config.page_size),
            gateway: MutationGateway::new(config.viewer.clone()),
            sort: config.sort,
            local_priority_window: span(config.local_priority_window),
        }
    }

    /// Reduces one stream event into the store. Total over [`FeedEvent`].
    pub fn apply(&mut self, event: FeedEvent, now: DateTime<Utc>) -> ChangeSet {
        let kind = event.kind();
        let changes = match event {
            FeedEvent::Snapshot(snapshot) => self.apply_snapshot(snapshot.entities, snapshot.has_more),
            FeedEvent::EntityCreated(created) => self.apply_created(created.entity),
            FeedEvent::EntityUpdated(updated) => self.apply_updated(updated.entity),
            FeedEvent::ActorThinking(actor) => {
                let thread = actor.thread();
                if self.presence.add(thread, &actor.actor, now) {
                    vec![self.presence_change(thread)]
                } else {
                    Vec::new()
                }
            }
            FeedEvent::ActorIdle(actor) => self.clear_presence(actor.thread(), &actor.actor),
            FeedEvent::ReactionSet(reaction) => self.apply_reaction(reaction),
            FeedEvent::Vote(vote) => self.apply_vote(vote),
            FeedEvent::ReplyCount(count) => self.raise_reply_count(count.entity_id, count.reply_count),
            FeedEvent::WorkflowStarted(started) => {
                let changed =
                    self.workflows
                        .start(started.entity_id, started.flavor, &started.actors, now);
                workflow_change(changed, started.entity_id)
            }
            FeedEvent::WorkflowPhase(phase) => {
                let changed = self.workflows.advance(phase.entity_id, phase.phase, now);
                workflow_change(changed, phase.entity_id)
            }
            FeedEvent::WorkflowProgress(progress) => {
                let changed = self
                    .workflows
                    .progress(progress.entity_id, progress.percent, now);
                workflow_change(changed, progress.entity_id)
            }
            FeedEvent::WorkflowCompleted(completed) => {
                let changed = self.workflows.complete(
                    completed.entity_id,
                    completed.flavor,
                    completed.summary,
                    now,
                );
                workflow_change(changed, completed.entity_id)
            }
            FeedEvent::RateLimited(limited) => {
                let message = if limited.message.is_empty() {
                    "rate limited".to_string()
                } else {
                    limited.message
                };
                let notice = self.notices.raise(message, limited.retry_after_secs, now);
                vec![FeedChange::NoticeRaised {
                    message: notice.message.clone(),
                }]
            }
            FeedEvent::Reset => self.reset(),
            FeedEvent::Heartbeat | FeedEvent::Connected | FeedEvent::Unknown => Vec::new(),
        };
        trace!(target = "feed.store", kind, changes = changes.len(), "applied event");
        changes
    }

    fn apply_snapshot(&mut self, entities: Vec<Entity>, has_more: Option<bool>) -> ChangeSet {
        let received = entities.len();
        let incoming = self.reconcile_incoming(entities);
        let merged = merge::merge(&self.entities, incoming);
        self.entities = merged.collection;
        let mut changes = merged.changes;
        self.cursor.reset_window(received, has_more);
        changes.push(self.pagination_change());
        changes
    }

    fn apply_created(&mut self, entity: Entity) -> ChangeSet {
        let mut changes = self.clear_presence(entity.thread_key(), &entity.author);
        if entity.is_placeholder() {
            debug!(target = "feed.store", id = entity.id, "ignoring streamed placeholder id");
            return changes;
        }
        match entity.parent_id {
            Some(parent_id) => {
                if self.seen_replies.insert(entity.id) {
                    changes.extend(self.bump_reply_count(parent_id));
                }
            }
            None => {
                let merged = merge::prepend(&self.entities, entity);
                self.entities = merged.collection;
                changes.extend(merged.changes);
            }
        }
        changes
    }

    fn apply_updated(&mut self, mut entity: Entity) -> ChangeSet {
        if !entity.is_top_level() {
            return Vec::new();
        }
        self.gateway.reconcile(&mut entity);
        let merged = merge::upsert(&self.entities, entity);
        self.entities = merged.collection;
        merged.changes
    }

    fn apply_reaction(&mut self, event: ReactionEvent) -> ChangeSet {
        let ReactionEvent {
            entity_id,
            actor,
            reaction,
        } = event;
        let next = merge::edit(&self.entities, entity_id, |entity| {
            if entity.reactions.get(&actor) == reaction.as_ref() {
                return None;
            }
            let mut updated = entity.clone();
            match reaction {
                Some(symbol) => {
                    updated.reactions.insert(actor, symbol);
                }
                None => {
                    updated.reactions.remove(&actor);
                }
            }
            Some(updated)
        });
        self.replace(next, FeedChange::Updated { id: entity_id })
    }

    fn apply_vote(&mut self, event: VoteEvent) -> ChangeSet {
        let gateway = &mut self.gateway;
        let next = merge::edit(&self.entities, event.entity_id, |entity| {
            gateway.apply_vote_event(entity, &event)
        });
        self.replace(next, FeedChange::Updated { id: event.entity_id })
    }

    /// Reply counts only grow on the client.
    fn raise_reply_count(&mut self, parent_id: i64, reply_count: u32) -> ChangeSet {
        let next = merge::edit(&self.entities, parent_id, |entity| {
            (reply_count > entity.reply_count).then(|| {
                let mut updated = entity.clone();
                updated.reply_count = reply_count;
                updated
            })
        });
        self.replace(
            next,
            FeedChange::ReplyCountChanged {
                parent_id,
                reply_count,
            },
        )
    }

    fn bump_reply_count(&mut self, parent_id: i64) -> ChangeSet {
        let Some(parent) = self.entity(parent_id) else {
            return Vec::new();
        };
        self.raise_reply_count(parent_id, parent.reply_count.saturating_add(1))
    }

    fn replace(&mut self, next: Option<Collection>, change: FeedChange) -> ChangeSet {
        match next {
            Some(collection) => {
                self.entities = collection;
                vec![change]
            }
            None => Vec::new(),
        }
    }

    fn clear_presence(&mut self, thread: ThreadKey, actor: &str) -> ChangeSet {
        if self.presence.remove(thread, actor) {
            vec![self.presence_change(thread)]
        } else {
            Vec::new()
        }
    }

    fn presence_change(&self, thread: ThreadKey) -> FeedChange {
        FeedChange::PresenceChanged {
            thread,
            actors: self.presence.actors(thread).to_vec(),
        }
    }

    fn pagination_change(&self) -> FeedChange {
        FeedChange::PaginationChanged {
            offset: self.cursor.offset(),
            has_more: self.cursor.has_more(),
        }
    }

    fn reconcile_incoming(&mut self, entities: Vec<Entity>) -> Vec<Entity> {
        entities
            .into_iter()
            .filter(Entity::is_top_level)
            .map(|mut entity| {
                self.gateway.reconcile(&mut entity);
                entity
            })
            .collect()
    }

    /// Expires stale presence entries and notices.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> ChangeSet {
        let mut changes: ChangeSet = self
            .presence
            .sweep(now)
            .into_iter()
            .map(|thread| FeedChange::PresenceChanged {
                thread,
                actors: Vec::new(),
            })
            .collect();
        if self.notices.sweep(now) {
            changes.push(FeedChange::NoticeCleared);
        }
        changes
    }

    /// Applies the viewer's vote locally. `None` when the entity is not in the collection
    /// or `direction` is neutral.
    pub fn vote(&mut self, entity_id: i64, direction: Vote) -> Option<(VoteIntent, ChangeSet)> {
        if !direction.is_direction() {
            return None;
        }
        let entity = self.entity(entity_id)?;
        let (updated, intent) = self.gateway.vote(&entity, direction);
        let next = merge::edit(&self.entities, entity_id, |_| Some(updated));
        let changes = self.replace(next, FeedChange::Updated { id: entity_id });
        Some((intent, changes))
    }

    pub fn record_vote_outcome(&mut self, entity_id: i64, succeeded: bool) {
        self.gateway.settle(entity_id, succeeded);
    }

    /// Creates the draft for a new entity and, for top-level posts, a boosted placeholder.
    pub fn submit(
        &mut self,
        body: impl Into<String>,
        parent_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Submission {
        let draft = Draft {
            body: body.into(),
            parent_id,
        };
        if parent_id.is_some() {
            return Submission {
                draft,
                placeholder_id: None,
                changes: Vec::new(),
            };
        }
        let id = self.gateway.next_placeholder_id();
        let mut placeholder = Entity::new(id, self.gateway.viewer(), draft.body.clone());
        placeholder.created_at = now;
        placeholder.local_priority = Some(now + self.local_priority_window);
        let merged = merge::prepend(&self.entities, placeholder);
        self.entities = merged.collection;
        Submission {
            draft,
            placeholder_id: Some(id),
            changes: merged.changes,
        }
    }

    /// Drops a placeholder whose create call failed. Confirmed entities are never removed here.
    pub fn discard_placeholder(&mut self, placeholder_id: i64) -> ChangeSet {
        if placeholder_id >= 0 {
            return Vec::new();
        }
        let next = merge::remove(&self.entities, placeholder_id);
        self.replace(next, FeedChange::Removed { id: placeholder_id })
    }

    pub fn begin_page(&mut self) -> Option<PageRequest> {
        self.cursor.begin()
    }

    pub fn finish_page(&mut self, request: PageRequest, page: Page<Entity>) -> ChangeSet {
        let received = page.entities.len();
        if !self.cursor.complete(request, received, page.has_more) {
            debug!(target = "feed.store", offset = request.offset, "dropping superseded page");
            return Vec::new();
        }
        let incoming = self.reconcile_incoming(page.entities);
        let merged = merge::append(&self.entities, incoming);
        self.entities = merged.collection;
        let mut changes = merged.changes;
        changes.push(self.pagination_change());
        changes
    }

    pub fn abort_page(&mut self, request: PageRequest) {
        self.cursor.abort(request);
    }

    /// Full-session reset; the only path that deletes confirmed entities client-side.
    pub fn reset(&mut self) -> ChangeSet {
        self.entities = Arc::new(Vec::new());
        self.seen_replies.clear();
        self.presence.clear();
        self.workflows.clear();
        self.notices.clear();
        self.cursor.reset();
        self.gateway.clear();
        vec![FeedChange::Reset]
    }

    /// The collection ordered by the store's sort mode.
    pub fn view(&self, now: DateTime<Utc>) -> Vec<EntityRef> {
        ranking::sort(&self.entities, self.sort, now)
    }

    pub fn view_by(&self, mode: SortMode, now: DateTime<Utc>) -> Vec<EntityRef> {
        ranking::sort(&self.entities, mode, now)
    }

    pub fn set_sort(&mut self, mode: SortMode) {
        self.sort = mode;
    }

    pub fn sort(&self) -> SortMode {
        self.sort
    }

    pub fn entities(&self) -> Collection {
        Arc::clone(&self.entities)
    }

    pub fn entity(&self, id: i64) -> Option<EntityRef> {
        self.entities.iter().find(|e| e.id == id).cloned()
    }

    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    pub fn workflow(&self, entity_id: i64) -> Option<&WorkflowRecord> {
        self.workflows.get(entity_id)
    }

    pub fn workflows(&self) -> &WorkflowBoard {
        &self.workflows
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notices.current()
    }

    pub fn cursor(&self) -> &PaginationCursor {
        &self.cursor
    }

    pub fn gateway(&self) -> &MutationGateway {
        &self.gateway
    }
}

fn workflow_change(changed: bool, entity_id: i64) -> ChangeSet {
    if changed {
        vec![FeedChange::WorkflowChanged { entity_id }]
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> FeedStore {
        FeedStore::new(&FeedConfig::default().with_viewer("me"))
    }

    fn event(value: serde_json::Value) -> FeedEvent {
        serde_json::from_value(value).expect("event")
    }

    fn entity(id: i64, author: &str, body: &str) -> serde_json::Value {
        json!({"id": id, "author": author, "body": body, "created_at": "2026-03-01T12:00:00Z"})
    }

    fn seeded(now: DateTime<Utc>) -> FeedStore {
        let mut store = store();
        store.apply(
            event(json!({"type": "snapshot", "entities": [entity(2, "ana", "two"), entity(1, "bo", "one")]})),
            now,
        );
        store
    }

    fn ids(store: &FeedStore) -> Vec<i64> {
        store.entities().iter().map(|e| e.id).collect()
    }

    #[test]
    fn reply_increments_parent_once_and_stays_out_of_list() {
        let now = Utc::now();
        let mut store = seeded(now);
        let mut reply = entity(10, "cy", "reply");
        reply["parent_id"] = json!(1);

        let changes = store.apply(event(json!({"type": "entity_created", "entity": reply.clone()})), now);
        assert_eq!(
            changes,
            vec![FeedChange::ReplyCountChanged { parent_id: 1, reply_count: 1 }]
        );
        assert_eq!(store.entity(1).unwrap().reply_count, 1);
        assert_eq!(ids(&store), vec![2, 1]);

        assert!(store
            .apply(event(json!({"type": "entity_created", "entity": reply})), now)
            .is_empty());
        assert_eq!(store.entity(1).unwrap().reply_count, 1);
    }

    #[test]
    fn created_entity_clears_author_presence() {
        let now = Utc::now();
        let mut store = seeded(now);
        store.apply(event(json!({"type": "actor_thinking", "actor": "cy"})), now);
        assert_eq!(store.presence().actors(ThreadKey::Global), ["cy"]);

        let changes = store.apply(
            event(json!({"type": "entity_created", "entity": entity(3, "cy", "three")})),
            now,
        );
        assert_eq!(
            changes,
            vec![
                FeedChange::PresenceChanged { thread: ThreadKey::Global, actors: vec![] },
                FeedChange::Inserted { id: 3 },
            ]
        );
        assert_eq!(ids(&store), vec![3, 2, 1]);
    }

    #[test]
    fn reaction_updates_only_target() {
        let now = Utc::now();
        let mut store = seeded(now);
        let before = store.entities();
        let changes = store.apply(
            event(json!({"type": "reaction_set", "post_id": 2, "actor": "bo", "reaction": "🔥"})),
            now,
        );
        assert_eq!(changes, vec![FeedChange::Updated { id: 2 }]);
        let after = store.entities();
        assert!(Arc::ptr_eq(&after[1], &before[1]));
        assert_eq!(after[0].reactions.get("bo").map(String::as_str), Some("🔥"));

        let cleared = store.apply(
            event(json!({"type": "reaction_set", "entity_id": 2, "actor": "bo"})),
            now,
        );
        assert_eq!(cleared.len(), 1);
        assert!(store.entity(2).unwrap().reactions.is_empty());
    }

    #[test]
    fn reply_count_event_never_lowers() {
        let now = Utc::now();
        let mut store = seeded(now);
        store.apply(event(json!({"type": "reply_count", "entity_id": 1, "reply_count": 4})), now);
        assert!(store
            .apply(event(json!({"type": "reply_count", "entity_id": 1, "reply_count": 2})), now)
            .is_empty());
        assert_eq!(store.entity(1).unwrap().reply_count, 4);
    }

    #[test]
    fn submit_then_confirm_resolves_placeholder() {
        let now = Utc::now();
        let mut store = seeded(now);
        let submission = store.submit("hello", None, now);
        assert_eq!(submission.placeholder_id, Some(-1));
        assert_eq!(ids(&store), vec![-1, 2, 1]);
        assert!(store.entity(-1).unwrap().is_boosted(now));

        let changes = store.apply(
            event(json!({"type": "entity_created", "entity": entity(42, "me", "hello")})),
            now,
        );
        assert_eq!(
            changes,
            vec![FeedChange::PlaceholderResolved { placeholder_id: -1, id: 42 }]
        );
        assert_eq!(ids(&store), vec![42, 2, 1]);
        assert!(store.entity(42).unwrap().is_boosted(now));
    }

    #[test]
    fn failed_submit_discards_placeholder() {
        let now = Utc::now();
        let mut store = seeded(now);
        let submission = store.submit("oops", None, now);
        let changes = store.discard_placeholder(submission.placeholder_id.unwrap());
        assert_eq!(changes, vec![FeedChange::Removed { id: -1 }]);
        assert_eq!(ids(&store), vec![2, 1]);
        assert!(store.discard_placeholder(2).is_empty());
    }

    #[test]
    fn replies_get_no_placeholder() {
        let now = Utc::now();
        let mut store = seeded(now);
        let submission = store.submit("nested", Some(1), now);
        assert_eq!(submission.placeholder_id, None);
        assert_eq!(submission.draft.parent_id, Some(1));
        assert_eq!(ids(&store), vec![2, 1]);
    }

    #[test]
    fn rate_limit_notice_expires_on_sweep() {
        let now = Utc::now();
        let mut store = store();
        let changes = store.apply(event(json!({"type": "rate_limited", "message": "slow down"})), now);
        assert_eq!(changes, vec![FeedChange::NoticeRaised { message: "slow down".into() }]);
        assert!(store.sweep(now + chrono::Duration::seconds(5)).is_empty());
        assert_eq!(
            store.sweep(now + chrono::Duration::seconds(10)),
            vec![FeedChange::NoticeCleared]
        );
        assert!(store.notice().is_none());
    }

    #[test]
    fn workflow_events_build_records() {
        let now = Utc::now();
        let mut store = store();
        store.apply(
            event(json!({"type": "workflow_started", "entity_id": 5, "actors": ["scout"]})),
            now,
        );
        store.apply(event(json!({"type": "workflow_phase", "entity_id": 5, "phase": "debate"})), now);
        let changes = store.apply(
            event(json!({"type": "workflow_completed", "entity_id": 5, "summary": "done"})),
            now,
        );
        assert_eq!(changes, vec![FeedChange::WorkflowChanged { entity_id: 5 }]);
        let record = store.workflow(5).unwrap();
        assert!(record.completed);
        assert_eq!(record.actors, vec!["scout"]);
    }

    fn scored(score: i64) -> FeedStore {
        let mut store = store();
        let mut post = entity(1, "bo", "one");
        post["score"] = json!(score);
        store.apply(event(json!({"type": "snapshot", "entities": [post]})), Utc::now());
        store
    }

    #[test]
    fn voterless_broadcast_of_own_vote_counts_once() {
        let now = Utc::now();
        let mut store = scored(5);
        store.vote(1, Vote::Up).expect("vote");
        assert_eq!(store.entity(1).unwrap().score, 6);

        let changes = store.apply(event(json!({"type": "vote", "entity_id": 1, "score": 6})), now);
        assert!(changes.is_empty());
        assert_eq!(store.entity(1).unwrap().score, 6);

        let mut store = scored(5);
        store.vote(1, Vote::Up).expect("vote");
        store.apply(event(json!({"type": "vote", "entity_id": 1, "delta": 1})), now);
        assert_eq!(store.entity(1).unwrap().score, 6);
        assert_eq!(store.gateway().pending_count(), 0);
    }

    #[test]
    fn neutral_is_not_a_vote_direction() {
        let mut store = scored(5);
        assert!(store.vote(1, Vote::Neutral).is_none());
        assert_eq!(store.entity(1).unwrap().score, 5);
        assert_eq!(store.gateway().pending_count(), 0);
    }

    #[test]
    fn snapshot_sets_cursor_and_reset_clears() {
        let now = Utc::now();
        let mut store = seeded(now);
        assert_eq!(store.cursor().offset(), 2);
        assert!(!store.cursor().has_more());

        assert_eq!(store.apply(event(json!({"type": "reset"})), now), vec![FeedChange::Reset]);
        assert!(store.entities().is_empty());
        assert!(store.cursor().has_more());
    }

    #[test]
    fn ignored_events_change_nothing() {
        let now = Utc::now();
        let mut store = seeded(now);
        let before = store.entities();
        for raw in [json!({"type": "heartbeat"}), json!({"type": "connected"}), json!({"type": "mystery"})] {
            assert!(store.apply(event(raw), now).is_empty());
        }
        assert!(Arc::ptr_eq(&before, &store.entities()));
    }
}
