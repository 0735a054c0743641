use std::time::Duration;

use crate::backoff::BackoffSchedule;
use crate::ranking::SortMode;

pub const DEFAULT_PAGE_SIZE: usize = 30;
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(45);
pub const DEFAULT_PRESENCE_MAX_AGE: Duration = Duration::from_secs(30);
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(10);
pub const DEFAULT_LOCAL_PRIORITY_WINDOW: Duration = Duration::from_secs(60);

/// Tunables for one feed session.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Bus topic the session publishes its change records on.
    pub topic: String,
    /// Author name of the local user; used to recognise echoes of its own actions.
    pub viewer: String,
    pub page_size: usize,
    pub sort: SortMode,
    pub heartbeat_timeout: Duration,
    pub backoff: BackoffSchedule,
    pub presence_max_age: Duration,
    pub sweep_interval: Duration,
    pub notice_ttl: Duration,
    pub local_priority_window: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            topic: "feed".into(),
            viewer: "anonymous".into(),
            page_size: DEFAULT_PAGE_SIZE,
            sort: SortMode::default(),
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            backoff: BackoffSchedule::default(),
            presence_max_age: DEFAULT_PRESENCE_MAX_AGE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            notice_ttl: DEFAULT_NOTICE_TTL,
            local_priority_window: DEFAULT_LOCAL_PRIORITY_WINDOW,
        }
    }
}

impl FeedConfig {
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    pub fn with_viewer(mut self, viewer: impl Into<String>) -> Self {
        self.viewer = viewer.into();
        self
    }
}
