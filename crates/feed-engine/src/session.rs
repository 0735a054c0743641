//! One live feed as an owned resource.
//!
//! [`FeedSession::open`] wires a connection manager, a store and a pump task together;
//! [`FeedSession::close`] (or drop) tears all of it down. Several sessions can run side by
//! side in one process, each publishing its change records on its own bus topic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use feed_bus::{Bus, BusMessage};
use feed_sdk::{FeedApi, PageQuery};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use crate::change::{ChangeSet, FeedChange};
use crate::clock::{Clock, SystemClock};
use crate::config::FeedConfig;
use crate::connection::{ConnectionManager, ConnectionState, StreamSignal};
use crate::entity::{Collection, Entity, EntityRef, Vote};
use crate::event::{EntityEvent, FeedEvent};
use crate::notice::Notice;
use crate::optimistic::VoteIntent;
use crate::presence::{PresenceEntry, ThreadKey};
use crate::ranking::SortMode;
use crate::store::FeedStore;
use crate::transport::PushTransport;
use crate::workflow::WorkflowRecord;
use crate::FeedResult;

/// Work that reaches the store from outside the push stream.
#[derive(Debug)]
enum Ingest {
    Event(FeedEvent),
    VoteSettled { entity_id: i64, succeeded: bool },
    SubmitFailed { placeholder_id: i64 },
}

pub struct FeedSession {
    config: FeedConfig,
    store: Arc<RwLock<FeedStore>>,
    bus: Arc<dyn Bus<FeedChange>>,
    api: Arc<dyn FeedApi<Entity>>,
    clock: Arc<dyn Clock>,
    connection: ConnectionManager,
    signals: mpsc::UnboundedSender<StreamSignal>,
    ingest: mpsc::UnboundedSender<Ingest>,
    pump: Mutex<Option<JoinHandle<()>>>,
    enabled: AtomicBool,
}

impl FeedSession {
    /// Starts the feed. Must be called from within a tokio runtime.
    pub fn open(
        config: FeedConfig,
        transport: Arc<dyn PushTransport>,
        api: Arc<dyn FeedApi<Entity>>,
        bus: Arc<dyn Bus<FeedChange>>,
    ) -> Self {
        Self::open_with_clock(config, transport, api, bus, Arc::new(SystemClock))
    }

    pub fn open_with_clock(
        config: FeedConfig,
        transport: Arc<dyn PushTransport>,
        api: Arc<dyn FeedApi<Entity>>,
        bus: Arc<dyn Bus<FeedChange>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(RwLock::new(FeedStore::new(&config)));
        let connection = ConnectionManager::new(transport, &config, Arc::clone(&clock));
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();

        let pump = Pump {
            store: Arc::clone(&store),
            bus: Arc::clone(&bus),
            topic: config.topic.clone(),
            clock: Arc::clone(&clock),
        };
        let handle = tokio::spawn(pump.run(signals_rx, ingest_rx, config.sweep_interval));
        connection.connect(signals_tx.clone());
        info!(target = "feed.session", topic = %config.topic, "feed session opened");

        Self {
            config,
            store,
            bus,
            api,
            clock,
            connection,
            signals: signals_tx,
            ingest: ingest_tx,
            pump: Mutex::new(Some(handle)),
            enabled: AtomicBool::new(true),
        }
    }

    /// Stops the stream, timers and pump. Idempotent.
    pub fn close(&self) {
        self.connection.disconnect();
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
            info!(target = "feed.session", topic = %self.config.topic, "feed session closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.pump.lock().is_none()
    }

    /// Suspends or resumes the stream. Accumulated state is kept either way.
    pub fn set_enabled(&self, enabled: bool) {
        let was = self.enabled.swap(enabled, Ordering::SeqCst);
        if was == enabled || self.is_closed() {
            return;
        }
        if enabled {
            debug!(target = "feed.session", topic = %self.config.topic, "resuming stream");
            self.connection.connect(self.signals.clone());
        } else {
            debug!(target = "feed.session", topic = %self.config.topic, "suspending stream");
            self.connection.disconnect();
            self.publish(vec![FeedChange::ConnectionChanged {
                connected: false,
                attempt: 0,
            }]);
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage<FeedChange>> {
        self.bus.subscribe(&self.config.topic)
    }

    pub fn topic(&self) -> &str {
        &self.config.topic
    }

    /// Entities in display order for the session's sort mode.
    pub fn view(&self) -> Vec<EntityRef> {
        self.store.read().view(self.clock.now())
    }

    pub fn view_by(&self, mode: SortMode) -> Vec<EntityRef> {
        self.store.read().view_by(mode, self.clock.now())
    }

    pub fn sort(&self) -> SortMode {
        self.store.read().sort()
    }

    pub fn set_sort(&self, mode: SortMode) {
        self.store.write().set_sort(mode);
    }

    /// The canonical collection in arrival order.
    pub fn snapshot(&self) -> Collection {
        self.store.read().entities()
    }

    pub fn entity(&self, id: i64) -> Option<EntityRef> {
        self.store.read().entity(id)
    }

    pub fn presence(&self) -> Vec<(ThreadKey, PresenceEntry)> {
        self.store.read().presence().entries()
    }

    pub fn workflow(&self, entity_id: i64) -> Option<WorkflowRecord> {
        self.store.read().workflow(entity_id).cloned()
    }

    pub fn workflows(&self) -> Vec<WorkflowRecord> {
        self.store.read().workflows().records()
    }

    pub fn notice(&self) -> Option<Notice> {
        self.store.read().notice().cloned()
    }

    pub fn has_more(&self) -> bool {
        self.store.read().cursor().has_more()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Applies the viewer's vote immediately and sends it in the background.
    pub fn vote(&self, entity_id: i64, direction: Vote) -> Option<VoteIntent> {
        let (intent, changes) = self.store.write().vote(entity_id, direction)?;
        self.publish(changes);

        let api = Arc::clone(&self.api);
        let ingest = self.ingest.clone();
        tokio::spawn(async move {
            let succeeded = match api.vote(entity_id, i8::from(intent.vote)).await {
                Ok(()) => true,
                Err(err) => {
                    warn!(target = "feed.session", entity_id, error = %err, "vote failed");
                    false
                }
            };
            let _ = ingest.send(Ingest::VoteSettled {
                entity_id,
                succeeded,
            });
        });
        Some(intent)
    }

    /// Posts a new entity. Top-level posts show a placeholder until the server confirms;
    /// returns its id.
    pub fn submit(&self, body: impl Into<String>, parent_id: Option<i64>) -> Option<i64> {
        let now = self.clock.now();
        let submission = self.store.write().submit(body, parent_id, now);
        let placeholder_id = submission.placeholder_id;
        self.publish(submission.changes);

        let api = Arc::clone(&self.api);
        let ingest = self.ingest.clone();
        let draft = submission.draft;
        tokio::spawn(async move {
            let item = match api.create(&draft).await {
                Ok(entity) => Ingest::Event(FeedEvent::EntityCreated(EntityEvent { entity })),
                Err(err) => {
                    warn!(target = "feed.session", error = %err, "create failed");
                    match placeholder_id {
                        Some(placeholder_id) => Ingest::SubmitFailed { placeholder_id },
                        None => return,
                    }
                }
            };
            let _ = ingest.send(item);
        });
        placeholder_id
    }

    /// Fetches the next older page. A no-op once the feed is exhausted or while a page is
    /// already loading.
    pub async fn load_more(&self) -> FeedResult<ChangeSet> {
        let (request, sort) = {
            let mut store = self.store.write();
            match store.begin_page() {
                Some(request) => (request, store.sort()),
                None => return Ok(Vec::new()),
            }
        };
        let query = PageQuery {
            sort: Some(sort.to_string()),
            ..PageQuery::window(request.offset, request.limit)
        };
        match self.api.fetch_page(&query).await {
            Ok(page) => {
                let changes = self.store.write().finish_page(request, page);
                self.publish(changes.clone());
                Ok(changes)
            }
            Err(err) => {
                self.store.write().abort_page(request);
                warn!(target = "feed.session", offset = request.offset, error = %err, "page fetch failed");
                Err(err.into())
            }
        }
    }

    /// Feeds an event into the session as if it had arrived on the stream.
    pub fn ingest(&self, event: FeedEvent) {
        let _ = self.ingest.send(Ingest::Event(event));
    }

    fn publish(&self, changes: ChangeSet) {
        publish(self.bus.as_ref(), &self.config.topic, changes);
    }
}

impl Drop for FeedSession {
    fn drop(&mut self) {
        self.close();
    }
}

struct Pump {
    store: Arc<RwLock<FeedStore>>,
    bus: Arc<dyn Bus<FeedChange>>,
    topic: String,
    clock: Arc<dyn Clock>,
}

impl Pump {
    async fn run(
        self,
        mut signals: mpsc::UnboundedReceiver<StreamSignal>,
        mut ingest: mpsc::UnboundedReceiver<Ingest>,
        sweep_every: Duration,
    ) {
        let mut sweep = interval_at(Instant::now() + sweep_every, sweep_every);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let changes = tokio::select! {
                Some(signal) = signals.recv() => self.on_signal(signal),
                Some(item) = ingest.recv() => self.on_ingest(item),
                _ = sweep.tick() => {
                    let now = self.clock.now();
                    self.store.write().sweep(now)
                }
            };
            publish(self.bus.as_ref(), &self.topic, changes);
        }
    }

    fn on_signal(&self, signal: StreamSignal) -> ChangeSet {
        match signal {
            StreamSignal::Opened => vec![FeedChange::ConnectionChanged {
                connected: true,
                attempt: 0,
            }],
            StreamSignal::Frame(raw) => match FeedEvent::decode(&raw) {
                Ok(event) => self.apply(event),
                Err(err) => {
                    warn!(target = "feed.stream", error = %err, "skipping malformed event");
                    vec![FeedChange::Rejected {
                        reason: err.to_string(),
                    }]
                }
            },
            StreamSignal::Dropped { attempt, .. } => vec![FeedChange::ConnectionChanged {
                connected: false,
                attempt,
            }],
        }
    }

    fn on_ingest(&self, item: Ingest) -> ChangeSet {
        match item {
            Ingest::Event(event) => self.apply(event),
            Ingest::VoteSettled {
                entity_id,
                succeeded,
            } => {
                self.store.write().record_vote_outcome(entity_id, succeeded);
                Vec::new()
            }
            Ingest::SubmitFailed { placeholder_id } => {
                self.store.write().discard_placeholder(placeholder_id)
            }
        }
    }

    fn apply(&self, event: FeedEvent) -> ChangeSet {
        let now = self.clock.now();
        self.store.write().apply(event, now)
    }
}

fn publish(bus: &dyn Bus<FeedChange>, topic: &str, changes: ChangeSet) {
    for change in changes {
        if let Err(err) = bus.publish(topic, change) {
            trace!(target = "feed.session", error = %err, "change not delivered");
        }
    }
}
