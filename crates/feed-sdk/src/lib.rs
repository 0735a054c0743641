//! Asynchronous client for the feed REST endpoints.
//!
//! The live engine treats these endpoints as a boundary: pages seed and extend the
//! local collection, mutations are fire-and-forget and their responses are fed back
//! into the engine as ordinary events.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod memory;

pub use memory::InMemoryFeedApi;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("feed api unavailable: {0}")]
    Unavailable(String),
}

/// Window and filters for `GET /entities`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageQuery {
    pub offset: usize,
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
}

impl PageQuery {
    pub fn window(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<E> {
    #[serde(alias = "posts", alias = "messages", alias = "workstreams")]
    pub entities: Vec<E>,
    /// Absent when the server leaves it to the client to infer from the page length.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

/// Body of `POST /entities`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Draft {
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<i64>,
}

/// Body of `POST /entities/{id}/vote`; `direction` is the viewer's resulting vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    pub entity_id: i64,
    pub direction: i8,
}

#[async_trait]
pub trait FeedApi<E>: Send + Sync {
    async fn fetch_page(&self, query: &PageQuery) -> Result<Page<E>, ApiError>;

    async fn vote(&self, entity_id: i64, direction: i8) -> Result<(), ApiError>;

    async fn create(&self, draft: &Draft) -> Result<E, ApiError>;
}

#[derive(Clone)]
pub struct FeedClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl FeedClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into(),
            token,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

async fn expect_success(res: Response) -> Result<Response, ApiError> {
    if res.status().is_success() {
        Ok(res)
    } else {
        let status = res.status();
        let body = res.text().await.unwrap_or_default();
        Err(ApiError::UnexpectedStatus { status, body })
    }
}

#[async_trait]
impl<E> FeedApi<E> for FeedClient
where
    E: DeserializeOwned + Send + 'static,
{
    async fn fetch_page(&self, query: &PageQuery) -> Result<Page<E>, ApiError> {
        let url = self.endpoint("entities");
        let res = self
            .authorize(self.http.get(url).query(query))
            .send()
            .await?;
        Ok(expect_success(res).await?.json::<Page<E>>().await?)
    }

    async fn vote(&self, entity_id: i64, direction: i8) -> Result<(), ApiError> {
        let url = self.endpoint(&format!("entities/{entity_id}/vote"));
        let res = self
            .authorize(self.http.post(url).json(&VoteRequest {
                entity_id,
                direction,
            }))
            .send()
            .await?;
        expect_success(res).await?;
        Ok(())
    }

    async fn create(&self, draft: &Draft) -> Result<E, ApiError> {
        let url = self.endpoint("entities");
        let res = self.authorize(self.http.post(url).json(draft)).send().await?;
        Ok(expect_success(res).await?.json::<E>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};
    use std::collections::HashMap;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve");
        });
        format!("http://{addr}/")
    }

    fn test_router() -> Router {
        Router::new()
            .route(
                "/entities",
                get(
                    |Query(params): Query<HashMap<String, String>>, headers: HeaderMap| async move {
                        let offset: i64 = params["offset"].parse().unwrap();
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or_default()
                            .to_string();
                        Json(json!({
                            "posts": [{"id": offset + 1, "auth": auth, "sort": params.get("sort")}],
                            "has_more": true
                        }))
                    },
                )
                .post(|Json(draft): Json<Draft>| async move {
                    Json(json!({"id": 99, "body": draft.body}))
                }),
            )
            .route(
                "/entities/:id/vote",
                post(|Path(id): Path<i64>, Json(req): Json<VoteRequest>| async move {
                    if id == req.entity_id && req.direction == 1 {
                        StatusCode::NO_CONTENT
                    } else {
                        StatusCode::CONFLICT
                    }
                }),
            )
    }

    #[tokio::test]
    async fn fetches_page_with_query_and_token() {
        let base = serve(test_router()).await;
        let client = FeedClient::new(base, Some("secret".into()));
        let mut query = PageQuery::window(30, 30);
        query.sort = Some("hot".into());

        let page = <FeedClient as FeedApi<Value>>::fetch_page(&client, &query)
            .await
            .expect("page");
        assert_eq!(page.has_more, Some(true));
        assert_eq!(page.entities.len(), 1);
        assert_eq!(page.entities[0]["id"], 31);
        assert_eq!(page.entities[0]["auth"], "Bearer secret");
        assert_eq!(page.entities[0]["sort"], "hot");
    }

    #[tokio::test]
    async fn vote_reports_unexpected_status() {
        let base = serve(test_router()).await;
        let client = FeedClient::new(base, None);

        <FeedClient as FeedApi<Value>>::vote(&client, 5, 1)
            .await
            .expect("vote ok");
        let err = <FeedClient as FeedApi<Value>>::vote(&client, 5, -1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::UnexpectedStatus { status, .. } if status.as_u16() == 409
        ));
    }

    #[tokio::test]
    async fn create_returns_server_entity() {
        let base = serve(test_router()).await;
        let client = FeedClient::new(base, None);
        let draft = Draft {
            body: "hello".into(),
            parent_id: None,
        };
        let created = <FeedClient as FeedApi<Value>>::create(&client, &draft)
            .await
            .expect("created");
        assert_eq!(created, json!({"id": 99, "body": "hello"}));
    }

    #[test]
    fn query_omits_unset_filters() {
        let query = PageQuery::window(0, 10);
        let value = serde_json::to_value(&query).unwrap();
        assert_eq!(value, json!({"offset": 0, "limit": 10}));
    }
}
