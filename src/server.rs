//! HTTP front door.
//!
//! | Route                    | Purpose                                  |
//! |--------------------------|------------------------------------------|
//! | `POST /start`            | spawn a session, returns `call_id`       |
//! | `GET /status/{call_id}`  | server-sent events, one JSON per message |
//! | `POST /cookies`          | store cookies for the URL's hostname     |
//! | `GET /jobs/{call_id}`    | job summary                              |
//! | `/*`                     | static assets, when configured           |

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive},
        IntoResponse, Response, Sse,
    },
    routing::{get, post},
    Json, Router,
};
use browserman_agent::{cookies, CookieRecord, CookieStore};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::jobs::JobManager;

/// `server:` section of the config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Directory served at `/`, with `index.html` as fallback.
    pub assets_dir: Option<PathBuf>,
    /// Seconds a finished job stays addressable before it is dropped.
    pub job_ttl_secs: u64,
}

impl ServerConfig {
    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8000".into(),
            assets_dir: None,
            job_ttl_secs: crate::jobs::DEFAULT_JOB_TTL.as_secs(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub jobs: Arc<JobManager>,
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    query: String,
}

#[derive(Debug, Deserialize)]
struct CookieUpload {
    url: String,
    cookies: Vec<CookieRecord>,
}

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

pub fn router(state: AppState, assets_dir: Option<&std::path::Path>) -> Router {
    let router = Router::new()
        .route("/start", post(start))
        .route("/status/{call_id}", get(status))
        .route("/cookies", post(store_cookies))
        .route("/jobs/{call_id}", get(job_summary))
        .with_state(state);

    let router = match assets_dir {
        Some(dir) => router.fallback_service(
            ServeDir::new(dir).not_found_service(ServeFile::new(dir.join("index.html"))),
        ),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

async fn start(State(state): State<AppState>, Json(req): Json<StartRequest>) -> Response {
    let query = req.query.trim();
    if query.is_empty() {
        return error(StatusCode::BAD_REQUEST, "query must not be empty");
    }
    let call_id = state.jobs.spawn(query);
    info!("started job {} for: {}", call_id, query);
    Json(json!({ "call_id": call_id })).into_response()
}

async fn status(State(state): State<AppState>, Path(call_id): Path<Uuid>) -> Response {
    let Some(log) = state.jobs.events(&call_id) else {
        return error(StatusCode::NOT_FOUND, format!("unknown call_id {}", call_id));
    };
    debug!("streaming job {}", call_id);

    let stream = log.subscribe().map(|event| {
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok::<_, Infallible>(SseEvent::default().data(data))
    });
    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
        .into_response()
}

async fn store_cookies(State(state): State<AppState>, Json(req): Json<CookieUpload>) -> Response {
    let Some(host) = cookies::hostname(&req.url) else {
        return error(
            StatusCode::BAD_REQUEST,
            format!("no hostname in url {:?}", req.url),
        );
    };
    let count = req.cookies.len();
    if let Err(e) = state.jobs.agent().cookies().put(&host, req.cookies).await {
        return error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }
    info!("stored {} cookies for {}", count, host);
    Json(json!({ "hostname": host, "stored": count })).into_response()
}

async fn job_summary(State(state): State<AppState>, Path(call_id): Path<Uuid>) -> Response {
    match state.jobs.get(&call_id) {
        Some(job) => Json(job.summary()).into_response(),
        None => error(StatusCode::NOT_FOUND, format!("unknown call_id {}", call_id)),
    }
}

/// Longest pause between two eviction sweeps.
const MAX_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically drop finished jobs so idle servers release their logs too.
fn spawn_sweeper(jobs: Arc<JobManager>) {
    let period = jobs
        .ttl()
        .clamp(Duration::from_secs(1), MAX_SWEEP_INTERVAL);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            jobs.evict_finished();
        }
    });
}

/// Bind and serve until the process exits.
pub async fn serve(state: AppState, config: &ServerConfig) -> anyhow::Result<()> {
    spawn_sweeper(Arc::clone(&state.jobs));
    let app = router(state, config.assets_dir.as_deref());
    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    info!("listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
