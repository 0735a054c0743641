use std::sync::Arc;
use std::time::Instant;

use feed_engine::FeedSession;

#[derive(Clone)]
pub struct AppState {
    start: Instant,
    session: Arc<FeedSession>,
}

impl AppState {
    pub fn new(session: Arc<FeedSession>) -> Self {
        Self {
            start: Instant::now(),
            session,
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }

    pub fn session(&self) -> &FeedSession {
        &self.session
    }
}
