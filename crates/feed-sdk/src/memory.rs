use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::{ApiError, Draft, FeedApi, Page, PageQuery, VoteRequest};

/// In-memory adapter for tests and offline wiring.
///
/// Pages are served from a fixed backing list by offset/limit (filters are not applied).
/// `create` answers with queued responses in order.
pub struct InMemoryFeedApi<E> {
    entities: Mutex<Vec<E>>,
    created: Mutex<VecDeque<E>>,
    votes: Mutex<Vec<VoteRequest>>,
    drafts: Mutex<Vec<Draft>>,
    queries: Mutex<Vec<PageQuery>>,
    fail_mutations: AtomicBool,
}

impl<E> Default for InMemoryFeedApi<E> {
    fn default() -> Self {
        Self {
            entities: Mutex::new(Vec::new()),
            created: Mutex::new(VecDeque::new()),
            votes: Mutex::new(Vec::new()),
            drafts: Mutex::new(Vec::new()),
            queries: Mutex::new(Vec::new()),
            fail_mutations: AtomicBool::new(false),
        }
    }
}

impl<E> InMemoryFeedApi<E> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_entities(entities: Vec<E>) -> Arc<Self> {
        Arc::new(Self {
            entities: Mutex::new(entities),
            ..Self::default()
        })
    }

    pub async fn push_entities(&self, entities: impl IntoIterator<Item = E>) {
        self.entities.lock().await.extend(entities);
    }

    pub async fn queue_created(&self, entity: E) {
        self.created.lock().await.push_back(entity);
    }

    /// Makes every subsequent vote/create call fail until reset.
    pub fn fail_mutations(&self, fail: bool) {
        self.fail_mutations.store(fail, Ordering::SeqCst);
    }

    pub async fn votes(&self) -> Vec<VoteRequest> {
        self.votes.lock().await.clone()
    }

    pub async fn drafts(&self) -> Vec<Draft> {
        self.drafts.lock().await.clone()
    }

    pub async fn queries(&self) -> Vec<PageQuery> {
        self.queries.lock().await.clone()
    }

    fn check_mutations(&self) -> Result<(), ApiError> {
        if self.fail_mutations.load(Ordering::SeqCst) {
            Err(ApiError::Unavailable("mutations disabled".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl<E> FeedApi<E> for InMemoryFeedApi<E>
where
    E: Clone + Send + Sync + 'static,
{
    async fn fetch_page(&self, query: &PageQuery) -> Result<Page<E>, ApiError> {
        self.queries.lock().await.push(query.clone());
        let guard = self.entities.lock().await;
        let start = query.offset.min(guard.len());
        let end = query.offset.saturating_add(query.limit).min(guard.len());
        Ok(Page {
            entities: guard[start..end].to_vec(),
            has_more: Some(end < guard.len()),
        })
    }

    async fn vote(&self, entity_id: i64, direction: i8) -> Result<(), ApiError> {
        self.check_mutations()?;
        self.votes.lock().await.push(VoteRequest {
            entity_id,
            direction,
        });
        Ok(())
    }

    async fn create(&self, draft: &Draft) -> Result<E, ApiError> {
        self.check_mutations()?;
        self.drafts.lock().await.push(draft.clone());
        self.created
            .lock()
            .await
            .pop_front()
            .ok_or_else(|| ApiError::Unavailable("no queued create response".into()))
    }
}
