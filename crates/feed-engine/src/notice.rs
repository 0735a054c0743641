use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::span;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub message: String,
    pub raised_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub retry_after_secs: Option<u64>,
}

/// The single rate-limit notice a feed shows at a time; a newer notice replaces the old one.
#[derive(Debug)]
pub struct NoticeBoard {
    current: Option<Notice>,
    ttl: chrono::Duration,
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            current: None,
            ttl: span(ttl),
        }
    }

    pub fn raise(
        &mut self,
        message: impl Into<String>,
        retry_after_secs: Option<u64>,
        now: DateTime<Utc>,
    ) -> &Notice {
        self.current.insert(Notice {
            message: message.into(),
            raised_at: now,
            expires_at: now + self.ttl,
            retry_after_secs,
        })
    }

    /// Drops the notice once its TTL has elapsed. Returns true when one was cleared.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> bool {
        if self.current.as_ref().is_some_and(|n| n.expires_at <= now) {
            self.current = None;
            return true;
        }
        false
    }

    pub fn current(&self) -> Option<&Notice> {
        self.current.as_ref()
    }

    pub fn clear(&mut self) {
        self.current = None;
    }
}
