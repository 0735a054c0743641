//! Connection manager: one push stream per feed, kept alive with a heartbeat watchdog and
//! bounded exponential backoff.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::backoff::BackoffSchedule;
use crate::clock::Clock;
use crate::config::FeedConfig;
use crate::transport::{FrameStream, PushTransport, TransportFrame};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    pub connected: bool,
    /// Consecutive failed attempts since the last inbound frame.
    pub reconnect_attempt: u32,
    pub last_event_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    ConnectFailed(String),
    Error(String),
    Ended,
    HeartbeatTimeout,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::ConnectFailed(err) => write!(f, "connect failed: {err}"),
            DropReason::Error(err) => write!(f, "stream error: {err}"),
            DropReason::Ended => f.write_str("stream ended"),
            DropReason::HeartbeatTimeout => f.write_str("heartbeat timeout"),
        }
    }
}

/// What the manager reports to its consumer, in stream order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSignal {
    Opened,
    Frame(String),
    Dropped {
        attempt: u32,
        retry_in: Duration,
        reason: DropReason,
    },
}

struct Running {
    alive: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

pub struct ConnectionManager {
    transport: Arc<dyn PushTransport>,
    heartbeat_timeout: Duration,
    backoff: BackoffSchedule,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<ConnectionState>>,
    running: Mutex<Option<Running>>,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn PushTransport>, config: &FeedConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            transport,
            heartbeat_timeout: config.heartbeat_timeout,
            backoff: config.backoff.clone(),
            clock,
            state: Arc::new(RwLock::new(ConnectionState::default())),
            running: Mutex::new(None),
        }
    }

    /// Opens the stream and forwards signals to `sink` until [`disconnect`](Self::disconnect).
    /// A second call tears down the first connection.
    pub fn connect(&self, sink: mpsc::UnboundedSender<StreamSignal>) {
        self.disconnect();
        let alive = Arc::new(AtomicBool::new(true));
        let worker = Worker {
            transport: Arc::clone(&self.transport),
            heartbeat_timeout: self.heartbeat_timeout,
            backoff: self.backoff.clone(),
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            alive: Arc::clone(&alive),
            sink,
        };
        let handle = tokio::spawn(worker.run());
        *self.running.lock() = Some(Running { alive, handle });
    }

    /// Stops the stream and any scheduled reconnect. Safe to call repeatedly or before connect.
    pub fn disconnect(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        running.alive.store(false, Ordering::SeqCst);
        running.handle.abort();
        let mut state = self.state.write();
        state.connected = false;
        state.reconnect_attempt = 0;
        debug!(target = "feed.stream", "stream disconnected");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn state(&self) -> ConnectionState {
        self.state.read().clone()
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("heartbeat_timeout", &self.heartbeat_timeout)
            .field("state", &*self.state.read())
            .field("running", &self.is_running())
            .finish()
    }
}

struct Worker {
    transport: Arc<dyn PushTransport>,
    heartbeat_timeout: Duration,
    backoff: BackoffSchedule,
    clock: Arc<dyn Clock>,
    state: Arc<RwLock<ConnectionState>>,
    alive: Arc<AtomicBool>,
    sink: mpsc::UnboundedSender<StreamSignal>,
}

impl Worker {
    fn live(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.sink.is_closed()
    }

    async fn run(self) {
        let mut attempt: u32 = 0;
        while self.live() {
            let reason = match self.transport.open().await {
                Ok(frames) => self.pump(frames, &mut attempt).await,
                Err(err) => DropReason::ConnectFailed(err.to_string()),
            };
            if !self.live() {
                break;
            }

            let retry_in = self.backoff.delay(attempt);
            attempt = attempt.saturating_add(1);
            {
                let mut state = self.state.write();
                state.connected = false;
                state.reconnect_attempt = attempt;
            }
            warn!(
                target = "feed.stream",
                attempt,
                delay_ms = retry_in.as_millis() as u64,
                reason = %reason,
                "stream dropped; reconnecting"
            );
            let signal = StreamSignal::Dropped {
                attempt,
                retry_in,
                reason,
            };
            if self.sink.send(signal).is_err() {
                break;
            }
            sleep(retry_in).await;
        }
        debug!(target = "feed.stream", "stream worker stopped");
    }

    /// Forwards frames until the stream fails, ends or goes quiet for longer than the
    /// heartbeat timeout.
    async fn pump(&self, mut frames: FrameStream, attempt: &mut u32) -> DropReason {
        let watchdog = sleep(self.heartbeat_timeout);
        tokio::pin!(watchdog);
        loop {
            tokio::select! {
                frame = frames.next() => {
                    let frame = match frame {
                        Some(Ok(frame)) => frame,
                        Some(Err(err)) => return DropReason::Error(err.to_string()),
                        None => return DropReason::Ended,
                    };
                    *attempt = 0;
                    watchdog.as_mut().reset(Instant::now() + self.heartbeat_timeout);
                    let signal = {
                        let mut state = self.state.write();
                        state.reconnect_attempt = 0;
                        state.last_event_at = Some(self.clock.now());
                        match frame {
                            TransportFrame::Open => {
                                state.connected = true;
                                info!(target = "feed.stream", "stream open");
                                StreamSignal::Opened
                            }
                            TransportFrame::Message(raw) => {
                                state.connected = true;
                                StreamSignal::Frame(raw)
                            }
                        }
                    };
                    if self.sink.send(signal).is_err() {
                        return DropReason::Ended;
                    }
                }
                _ = &mut watchdog => return DropReason::HeartbeatTimeout,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::transport::InMemoryTransport;

    fn manager(transport: Arc<InMemoryTransport>) -> ConnectionManager {
        ConnectionManager::new(transport, &FeedConfig::default(), Arc::new(SystemClock))
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<StreamSignal>) -> StreamSignal {
        rx.recv().await.expect("signal")
    }

    fn retry_secs(signal: &StreamSignal) -> u64 {
        match signal {
            StreamSignal::Dropped { retry_in, .. } => retry_in.as_secs(),
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_frames_and_marks_connected() {
        let transport = InMemoryTransport::new();
        let script = transport.script();
        script.open();
        script.message(r#"{"type":"heartbeat"}"#);

        let manager = manager(Arc::clone(&transport));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect(tx);

        assert_eq!(next(&mut rx).await, StreamSignal::Opened);
        assert_eq!(next(&mut rx).await, StreamSignal::Frame(r#"{"type":"heartbeat"}"#.into()));
        let state = manager.state();
        assert!(state.connected);
        assert_eq!(state.reconnect_attempt, 0);
        assert!(state.last_event_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn failures_follow_backoff_table() {
        let transport = InMemoryTransport::new();
        let manager = manager(Arc::clone(&transport));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect(tx);

        let mut delays = Vec::new();
        for _ in 0..7 {
            delays.push(retry_secs(&next(&mut rx).await));
        }
        assert_eq!(delays, vec![1, 2, 5, 10, 30, 30, 30]);
        assert_eq!(manager.state().reconnect_attempt, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frame_restarts_backoff() {
        let transport = InMemoryTransport::new();
        transport.script().fail("refused");
        transport.script().fail("refused");
        let healthy = transport.script();
        healthy.open();
        healthy.message(r#"{"type":"heartbeat"}"#);
        healthy.fail("reset by peer");

        let manager = manager(Arc::clone(&transport));
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect(tx);

        assert_eq!(retry_secs(&next(&mut rx).await), 1);
        assert_eq!(retry_secs(&next(&mut rx).await), 2);
        assert_eq!(next(&mut rx).await, StreamSignal::Opened);
        assert!(matches!(next(&mut rx).await, StreamSignal::Frame(_)));
        match next(&mut rx).await {
            StreamSignal::Dropped { attempt, retry_in, reason } => {
                assert_eq!(attempt, 1);
                assert_eq!(retry_in, Duration::from_secs(1));
                assert_eq!(reason, DropReason::Error("stream failed: reset by peer".into()));
            }
            other => panic!("expected drop, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn silent_stream_trips_watchdog() {
        let transport = InMemoryTransport::new();
        let script = transport.script();
        script.open();

        let manager = manager(Arc::clone(&transport));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let started = Instant::now();
        manager.connect(tx);

        assert_eq!(next(&mut rx).await, StreamSignal::Opened);
        match next(&mut rx).await {
            StreamSignal::Dropped { reason, .. } => assert_eq!(reason, DropReason::HeartbeatTimeout),
            other => panic!("expected drop, got {other:?}"),
        }
        assert!(started.elapsed() >= Duration::from_secs(45));
        assert!(!manager.state().connected);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_stops_reconnects() {
        let transport = InMemoryTransport::new();
        let manager = manager(Arc::clone(&transport));
        manager.disconnect();

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.connect(tx);
        assert_eq!(retry_secs(&next(&mut rx).await), 1);
        manager.disconnect();
        manager.disconnect();

        let opens = transport.open_count();
        sleep(Duration::from_secs(120)).await;
        assert_eq!(transport.open_count(), opens);
        assert!(rx.recv().await.is_none());
        assert!(!manager.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_replaces_first() {
        let transport = InMemoryTransport::new();
        let first = transport.script();
        first.open();
        let manager = manager(Arc::clone(&transport));

        let (tx1, mut rx1) = mpsc::unbounded_channel();
        manager.connect(tx1);
        assert_eq!(next(&mut rx1).await, StreamSignal::Opened);

        let second = transport.script();
        second.open();
        let (tx2, mut rx2) = mpsc::unbounded_channel();
        manager.connect(tx2);
        assert_eq!(next(&mut rx2).await, StreamSignal::Opened);
        assert!(rx1.recv().await.is_none());
        assert!(first.is_closed());
    }
}
