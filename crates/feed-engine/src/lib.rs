//! Feed engine: live event-stream reconciliation for timeline, group-chat and workflow feeds.
//!
//! Responsibilities:
//! - holding one push-stream connection per feed with heartbeat watchdog and bounded backoff
//! - decoding the typed event stream and reducing it into render-stable collections
//! - diffing snapshots against local state while preserving identity of unchanged entities
//! - tracking ephemeral activity (thinking indicators, sub-workflows, rate-limit notices)
//! - applying optimistic votes and posts ahead of the REST round trip
//! - ranking the collection on read and paging older entities in

use thiserror::Error;

pub mod backoff;
pub mod change;
pub mod clock;
pub mod config;
pub mod connection;
pub mod entity;
pub mod event;
pub mod merge;
pub mod notice;
pub mod optimistic;
pub mod pagination;
pub mod presence;
pub mod ranking;
pub mod session;
pub mod store;
pub mod transport;
pub mod workflow;

pub use change::{ChangeSet, FeedChange};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FeedConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use entity::{Collection, Entity, EntityKind, EntityRef, Vote};
pub use event::FeedEvent;
pub use presence::ThreadKey;
pub use ranking::SortMode;
pub use session::FeedSession;
pub use store::FeedStore;
pub use transport::{InMemoryTransport, PushTransport, SseTransport};

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed api error: {0}")]
    Api(#[from] feed_sdk::ApiError),
    #[error("malformed feed event: {0}")]
    Decode(#[from] serde_json::Error),
}

pub type FeedResult<T> = Result<T, FeedError>;
