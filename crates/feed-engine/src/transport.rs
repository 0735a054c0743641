//! Push-stream transports.
//!
//! A transport only knows how to open one stream of raw frames. Reconnecting, the heartbeat
//! watchdog and decoding live above it in the connection manager and store.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use reqwest::header::ACCEPT;
use reqwest::Client;
use reqwest_eventsource::{Event, EventSource};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::ranking::SortMode;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportFrame {
    Open,
    Message(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("invalid stream url: {0}")]
    InvalidUrl(String),
    #[error("failed to open stream: {0}")]
    Connect(String),
    #[error("stream failed: {0}")]
    Stream(String),
}

impl From<url::ParseError> for TransportError {
    fn from(err: url::ParseError) -> Self {
        TransportError::InvalidUrl(err.to_string())
    }
}

pub type FrameStream = BoxStream<'static, Result<TransportFrame, TransportError>>;

#[async_trait]
pub trait PushTransport: Send + Sync + 'static {
    /// Opens a fresh stream. The stream ends, or yields an error, when the connection drops.
    async fn open(&self) -> Result<FrameStream, TransportError>;
}

/// Server-sent events over HTTP.
#[derive(Debug, Clone)]
pub struct SseTransport {
    http: Client,
    url: Url,
    token: Option<String>,
}

impl SseTransport {
    pub fn new(stream_url: &str, token: Option<String>) -> Result<Self, TransportError> {
        Ok(Self {
            http: Client::new(),
            url: Url::parse(stream_url)?,
            token,
        })
    }

    /// Asks the server to rank and size its snapshots the way the client will.
    pub fn with_view(mut self, sort: SortMode, limit: usize) -> Self {
        self.url
            .query_pairs_mut()
            .append_pair("sort", sort.as_str())
            .append_pair("limit", &limit.to_string());
        self
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl PushTransport for SseTransport {
    async fn open(&self) -> Result<FrameStream, TransportError> {
        let mut request = self
            .http
            .get(self.url.clone())
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let source =
            EventSource::new(request).map_err(|err| TransportError::Connect(err.to_string()))?;

        // The source retries on its own; dropping it on the first error hands reconnects
        // back to the connection manager.
        let frames = stream::unfold(Some(Box::pin(source)), |state| async move {
            let mut source = state?;
            match source.next().await? {
                Ok(Event::Open) => Some((Ok(TransportFrame::Open), Some(source))),
                Ok(Event::Message(message)) => {
                    Some((Ok(TransportFrame::Message(message.data)), Some(source)))
                }
                Err(err) => Some((Err(TransportError::Stream(err.to_string())), None)),
            }
        });
        Ok(frames.boxed())
    }
}

type Scripted = mpsc::UnboundedReceiver<Result<TransportFrame, TransportError>>;

/// Transport that replays scripted connections, one per `open`.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    scripts: Mutex<VecDeque<Scripted>>,
    opens: AtomicUsize,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the next connection and returns the handle that drives it.
    pub fn script(&self) -> ScriptHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.scripts.lock().push_back(rx);
        ScriptHandle { tx }
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for InMemoryTransport {
    async fn open(&self) -> Result<FrameStream, TransportError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let Some(rx) = self.scripts.lock().pop_front() else {
            return Err(TransportError::Connect("no scripted connection".into()));
        };
        let frames = stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        });
        Ok(frames.boxed())
    }
}

/// Feeds one scripted connection. Dropping the handle ends the stream.
#[derive(Debug, Clone)]
pub struct ScriptHandle {
    tx: mpsc::UnboundedSender<Result<TransportFrame, TransportError>>,
}

impl ScriptHandle {
    pub fn open(&self) -> bool {
        self.tx.send(Ok(TransportFrame::Open)).is_ok()
    }

    pub fn message(&self, raw: impl Into<String>) -> bool {
        self.tx.send(Ok(TransportFrame::Message(raw.into()))).is_ok()
    }

    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.tx.send(Err(TransportError::Stream(reason.into()))).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_parameters_are_appended() {
        let transport = SseTransport::new("https://feed.example/stream?channel=main", None)
            .expect("url")
            .with_view(SortMode::Top, 30);
        assert_eq!(
            transport.url().as_str(),
            "https://feed.example/stream?channel=main&sort=top&limit=30"
        );
    }

    #[test]
    fn rejects_relative_urls() {
        assert!(matches!(
            SseTransport::new("/stream", None),
            Err(TransportError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn scripted_connections_replay_in_order() {
        let transport = InMemoryTransport::new();
        let first = transport.script();
        first.open();
        first.message("{\"type\":\"heartbeat\"}");
        drop(first);

        let mut stream = transport.open().await.expect("open");
        assert_eq!(stream.next().await, Some(Ok(TransportFrame::Open)));
        assert_eq!(
            stream.next().await,
            Some(Ok(TransportFrame::Message("{\"type\":\"heartbeat\"}".into())))
        );
        assert_eq!(stream.next().await, None);

        assert!(transport.open().await.is_err());
        assert_eq!(transport.open_count(), 2);
    }
}
