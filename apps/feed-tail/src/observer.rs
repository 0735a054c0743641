//! Bus subscriber that turns change records into log lines and metrics.

use feed_bus::BusMessage;
use feed_engine::FeedChange;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::metrics;

pub fn spawn_observer(mut changes: broadcast::Receiver<BusMessage<FeedChange>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(message) => record(&message.topic, &message.payload),
                Err(RecvError::Lagged(skipped)) => {
                    metrics::LAGGED_CHANGES.inc_by(skipped);
                    warn!(skipped, "observer lagged behind the change stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub fn record(topic: &str, change: &FeedChange) {
    metrics::CHANGES.with_label_values(&[change.kind()]).inc();
    match change {
        FeedChange::Inserted { id } => info!(topic, id, "entity inserted"),
        FeedChange::PlaceholderResolved { placeholder_id, id } => {
            info!(topic, placeholder_id, id, "optimistic entity confirmed")
        }
        FeedChange::Removed { id } => info!(topic, id, "entity removed"),
        FeedChange::ConnectionChanged { connected, attempt } => {
            metrics::CONNECTED.set(i64::from(*connected));
            if *connected {
                info!(topic, "stream connected");
            } else {
                metrics::RECONNECTS.inc();
                warn!(topic, attempt, "stream disconnected");
            }
        }
        FeedChange::Rejected { reason } => {
            metrics::REJECTED_FRAMES.inc();
            warn!(topic, reason = %reason, "stream frame rejected");
        }
        FeedChange::NoticeRaised { message } => warn!(topic, message = %message, "rate limited"),
        FeedChange::Reset => info!(topic, "feed reset"),
        other => debug!(topic, change = ?other, "feed change"),
    }
}
