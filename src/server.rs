//! JSON HTTP query surface.
//!
//! Exposes the retrieval service to embedding callers (bots, scripts,
//! dashboards) while the scanner keeps running in the same process.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/memes/status` | `{current_count, max_count, available_emojis}` |
//! | `GET`  | `/memes/count` | Number of indexed records |
//! | `GET`  | `/memes/emotions` | Distinct emotion labels |
//! | `GET`  | `/memes/descriptions` | Distinct descriptions |
//! | `GET`  | `/memes/random?n=` | Random sample (default 1) |
//! | `GET`  | `/memes/emotion/{label}` | Random record with that emotion or tag |
//! | `GET`  | `/memes/search?q=` | Random record whose description matches |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "no meme with emotion: 开心" } }
//! ```

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::engine::Engine;
use crate::models::{LibraryStatus, MemeRecord, MemeSummary};

/// Builds the router. Split out so tests can drive it without binding.
pub fn router(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/memes/status", get(handle_status))
        .route("/memes/count", get(handle_count))
        .route("/memes/emotions", get(handle_emotions))
        .route("/memes/descriptions", get(handle_descriptions))
        .route("/memes/random", get(handle_random))
        .route("/memes/emotion/{label}", get(handle_by_emotion))
        .route("/memes/search", get(handle_search))
        .layer(cors)
        .with_state(engine)
}

/// Serves the query surface on `bind` until `cancel` fires.
pub async fn run_server(
    engine: Arc<Engine>,
    bind: &str,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(engine);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind = %bind, "query server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn handle_status(State(engine): State<Arc<Engine>>) -> Json<LibraryStatus> {
    Json(engine.status().await)
}

#[derive(Serialize)]
struct CountResponse {
    count: usize,
}

async fn handle_count(State(engine): State<Arc<Engine>>) -> Json<CountResponse> {
    Json(CountResponse {
        count: engine.count().await,
    })
}

async fn handle_emotions(State(engine): State<Arc<Engine>>) -> Json<Vec<String>> {
    Json(engine.emotions().await)
}

async fn handle_descriptions(State(engine): State<Arc<Engine>>) -> Json<Vec<String>> {
    Json(engine.descriptions().await)
}

#[derive(Deserialize)]
struct RandomParams {
    n: Option<usize>,
}

async fn handle_random(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<RandomParams>,
) -> Json<Vec<MemeSummary>> {
    Json(engine.random_sample(params.n.unwrap_or(1)).await)
}

/// Record as returned over HTTP, with its id inlined.
#[derive(Serialize)]
struct RecordResponse {
    id: String,
    #[serde(flatten)]
    record: MemeRecord,
}

impl From<MemeRecord> for RecordResponse {
    fn from(record: MemeRecord) -> Self {
        Self {
            id: record.id.clone(),
            record,
        }
    }
}

async fn handle_by_emotion(
    State(engine): State<Arc<Engine>>,
    Path(label): Path<String>,
) -> Result<Json<RecordResponse>, AppError> {
    engine
        .by_emotion(&label)
        .await
        .map(|r| Json(r.into()))
        .ok_or_else(|| not_found(format!("no meme with emotion: {}", label)))
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
}

async fn handle_search(
    State(engine): State<Arc<Engine>>,
    Query(params): Query<SearchParams>,
) -> Result<Json<RecordResponse>, AppError> {
    let q = params
        .q
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("q must not be empty"))?;
    engine
        .by_description(&q)
        .await
        .map(|r| Json(r.into()))
        .ok_or_else(|| not_found(format!("no meme matching: {}", q)))
}
