use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use feed_engine::connection::ConnectionState;
use feed_engine::notice::Notice;
use feed_engine::workflow::WorkflowRecord;
use feed_engine::{Entity, SortMode, Vote};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::metrics;
use crate::state::AppState;

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    uptime_secs: u64,
    topic: String,
    connection: ConnectionState,
    entities: usize,
}

async fn health() -> &'static str {
    "ok"
}

/// Ready once the stream has delivered at least one frame and is currently open.
async fn ready(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    let session = state.session();
    let connection = session.connection_state();
    let status = if connection.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if connection.connected { "ok" } else { "connecting" },
            uptime_secs: state.uptime_secs(),
            topic: session.topic().to_string(),
            connection,
            entities: session.snapshot().len(),
        }),
    )
}

#[derive(Deserialize)]
struct ViewQuery {
    sort: Option<String>,
}

#[derive(Serialize)]
struct ViewResponse {
    sort: SortMode,
    has_more: bool,
    notice: Option<Notice>,
    entities: Vec<Entity>,
}

async fn view(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<ViewResponse>, (StatusCode, Json<serde_json::Value>)> {
    let session = state.session();
    let sort = match query.sort.as_deref().map(str::parse::<SortMode>) {
        Some(Ok(sort)) => Some(sort),
        Some(Err(err)) => return Err((StatusCode::BAD_REQUEST, Json(json!({"error": err})))),
        None => None,
    };
    let entities = match sort {
        Some(sort) => session.view_by(sort),
        None => session.view(),
    };
    Ok(Json(ViewResponse {
        sort: sort.unwrap_or(session.sort()),
        has_more: session.has_more(),
        notice: session.notice(),
        entities: entities.iter().map(|entity| Entity::clone(entity)).collect(),
    }))
}

#[derive(Serialize)]
struct PresenceView {
    thread: String,
    actors: Vec<String>,
    since: DateTime<Utc>,
}

async fn presence(State(state): State<AppState>) -> Json<Vec<PresenceView>> {
    let entries = state
        .session()
        .presence()
        .into_iter()
        .map(|(thread, entry)| PresenceView {
            thread: thread.to_string(),
            actors: entry.actors,
            since: entry.last_active_at,
        })
        .collect();
    Json(entries)
}

async fn workflows(State(state): State<AppState>) -> Json<Vec<WorkflowRecord>> {
    Json(state.session().workflows())
}

async fn workflow(
    State(state): State<AppState>,
    Path(entity_id): Path<i64>,
) -> Result<Json<WorkflowRecord>, StatusCode> {
    state
        .session()
        .workflow(entity_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

#[derive(Deserialize)]
struct VoteBody {
    direction: i8,
}

async fn vote(
    State(state): State<AppState>,
    Path(entity_id): Path<i64>,
    Json(body): Json<VoteBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    let direction = match Vote::try_from(body.direction) {
        Ok(direction) if direction.is_direction() => direction,
        Ok(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "direction must be -1 or 1"})),
            );
        }
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": err.to_string()})),
            );
        }
    };
    match state.session().vote(entity_id, direction) {
        Some(intent) => (
            StatusCode::ACCEPTED,
            Json(json!({
                "entity_id": intent.entity_id,
                "vote": intent.vote,
                "delta": intent.delta,
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("entity {entity_id} not loaded")})),
        ),
    }
}

#[derive(Deserialize)]
struct PostBody {
    body: String,
    #[serde(default)]
    parent_id: Option<i64>,
}

async fn create(
    State(state): State<AppState>,
    Json(post): Json<PostBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    if post.body.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "body must not be empty"})),
        );
    }
    let placeholder_id = state.session().submit(post.body, post.parent_id);
    (
        StatusCode::ACCEPTED,
        Json(json!({"placeholder_id": placeholder_id})),
    )
}

async fn load_more(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let session = state.session();
    match session.load_more().await {
        Ok(changes) => (
            StatusCode::OK,
            Json(json!({"changes": changes.len(), "has_more": session.has_more()})),
        ),
        Err(err) => {
            warn!(error = %err, "load more failed");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"error": err.to_string()})),
            )
        }
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain")],
        metrics::gather(),
    )
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route("/readyz", get(ready))
        .route("/view", get(view))
        .route("/presence", get(presence))
        .route("/workflows", get(workflows))
        .route("/workflows/:entity_id", get(workflow))
        .route("/entities", post(create))
        .route("/entities/:entity_id/vote", post(vote))
        .route("/load-more", post(load_more))
        .with_state(state)
}
