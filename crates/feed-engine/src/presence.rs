use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::span;

/// Thread an activity indicator belongs to: a parent entity or the feed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadKey {
    Global,
    Thread(i64),
}

impl ThreadKey {
    pub fn from_parent(parent_id: Option<i64>) -> Self {
        parent_id.map(ThreadKey::Thread).unwrap_or(ThreadKey::Global)
    }
}

impl fmt::Display for ThreadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadKey::Global => f.write_str("global"),
            ThreadKey::Thread(id) => write!(f, "thread:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEntry {
    /// Active actors in arrival order, without duplicates.
    pub actors: Vec<String>,
    /// Time of the most recent activity in this thread.
    pub last_active_at: DateTime<Utc>,
}

/// Per-thread "actor is active" markers that expire on their own.
#[derive(Debug)]
pub struct PresenceTracker {
    entries: HashMap<ThreadKey, PresenceEntry>,
    max_age: chrono::Duration,
}

impl PresenceTracker {
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: HashMap::new(),
            max_age: span(max_age),
        }
    }

    /// Marks `actor` active in `key`. Returns true when the actor set changed.
    pub fn add(&mut self, key: ThreadKey, actor: &str, now: DateTime<Utc>) -> bool {
        let entry = self.entries.entry(key).or_insert_with(|| PresenceEntry {
            actors: Vec::new(),
            last_active_at: now,
        });
        entry.last_active_at = now;
        if entry.actors.iter().any(|existing| existing == actor) {
            return false;
        }
        entry.actors.push(actor.to_string());
        true
    }

    /// Clears `actor` from `key`, dropping the entry once nobody is left.
    pub fn remove(&mut self, key: ThreadKey, actor: &str) -> bool {
        let Some(entry) = self.entries.get_mut(&key) else {
            return false;
        };
        let before = entry.actors.len();
        entry.actors.retain(|existing| existing != actor);
        let changed = entry.actors.len() != before;
        if entry.actors.is_empty() {
            self.entries.remove(&key);
        }
        changed
    }

    /// Drops every entry older than the max age, returning the expired keys in order.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<ThreadKey> {
        let cutoff = now - self.max_age;
        let mut expired: Vec<ThreadKey> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.last_active_at <= cutoff)
            .map(|(key, _)| *key)
            .collect();
        expired.sort();
        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }

    pub fn actors(&self, key: ThreadKey) -> &[String] {
        self.entries
            .get(&key)
            .map(|entry| entry.actors.as_slice())
            .unwrap_or(&[])
    }

    pub fn entry(&self, key: ThreadKey) -> Option<&PresenceEntry> {
        self.entries.get(&key)
    }

    /// All live entries ordered by key.
    pub fn entries(&self) -> Vec<(ThreadKey, PresenceEntry)> {
        let mut entries: Vec<(ThreadKey, PresenceEntry)> = self
            .entries
            .iter()
            .map(|(key, entry)| (*key, entry.clone()))
            .collect();
        entries.sort_by_key(|(key, _)| *key);
        entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(Duration::from_secs(30))
    }

    #[test]
    fn deduplicates_actors_per_thread() {
        let mut presence = tracker();
        let now = Utc::now();
        assert!(presence.add(ThreadKey::Global, "scout", now));
        assert!(!presence.add(ThreadKey::Global, "scout", now));
        assert!(presence.add(ThreadKey::Global, "critic", now));
        assert!(presence.add(ThreadKey::Thread(7), "scout", now));
        assert_eq!(presence.actors(ThreadKey::Global), ["scout", "critic"]);
        assert_eq!(presence.actors(ThreadKey::Thread(7)), ["scout"]);
    }

    #[test]
    fn empty_entries_are_dropped() {
        let mut presence = tracker();
        let now = Utc::now();
        presence.add(ThreadKey::Thread(1), "scout", now);
        assert!(!presence.remove(ThreadKey::Thread(1), "nobody"));
        assert!(presence.remove(ThreadKey::Thread(1), "scout"));
        assert!(presence.entry(ThreadKey::Thread(1)).is_none());
        assert!(!presence.remove(ThreadKey::Thread(1), "scout"));
    }

    #[test]
    fn sweep_expires_stranded_entries() {
        let clock = ManualClock::new(Utc::now());
        let mut presence = tracker();
        presence.add(ThreadKey::Thread(3), "scout", clock.now());

        clock.advance(Duration::from_secs(29));
        assert!(presence.sweep(clock.now()).is_empty());

        clock.advance(Duration::from_secs(2));
        presence.add(ThreadKey::Global, "critic", clock.now());
        assert_eq!(presence.sweep(clock.now()), vec![ThreadKey::Thread(3)]);
        assert!(presence.actors(ThreadKey::Thread(3)).is_empty());
        assert_eq!(presence.actors(ThreadKey::Global), ["critic"]);
    }

    #[test]
    fn new_activity_refreshes_entry_age() {
        let clock = ManualClock::new(Utc::now());
        let mut presence = tracker();
        presence.add(ThreadKey::Global, "scout", clock.now());
        clock.advance(Duration::from_secs(20));
        presence.add(ThreadKey::Global, "critic", clock.now());
        clock.advance(Duration::from_secs(20));
        assert!(presence.sweep(clock.now()).is_empty());
    }

    #[test]
    fn repeat_announcement_records_last_activity() {
        let clock = ManualClock::new(Utc::now());
        let mut presence = tracker();
        presence.add(ThreadKey::Thread(4), "scout", clock.now());
        clock.advance(Duration::from_secs(25));
        assert!(!presence.add(ThreadKey::Thread(4), "scout", clock.now()));
        assert_eq!(presence.entry(ThreadKey::Thread(4)).unwrap().last_active_at, clock.now());

        clock.advance(Duration::from_secs(25));
        assert!(presence.sweep(clock.now()).is_empty());
        clock.advance(Duration::from_secs(5));
        assert_eq!(presence.sweep(clock.now()), vec![ThreadKey::Thread(4)]);
    }

    #[test]
    fn thread_key_from_parent() {
        assert_eq!(ThreadKey::from_parent(None), ThreadKey::Global);
        assert_eq!(ThreadKey::from_parent(Some(9)), ThreadKey::Thread(9));
        assert_eq!(ThreadKey::Thread(9).to_string(), "thread:9");
    }
}
