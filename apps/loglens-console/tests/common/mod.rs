#![allow(dead_code)]

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use axum::{
    extract::{Multipart, Path, RawQuery, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use loglens_console::{build_router, AppConfig, AppState};

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const VALID_ACCESS: &str = "T1";
pub const RENEWED_ACCESS: &str = "T2";
pub const VALID_REFRESH: &str = "R1";

#[derive(Debug, Default)]
pub struct Calls {
    pub refresh: AtomicUsize,
    pub resource: AtomicUsize,
    pub stream: AtomicUsize,
    pub rejected: AtomicUsize,
    pub upload: AtomicUsize,
}

impl Calls {
    pub fn refresh(&self) -> usize {
        self.refresh.load(Ordering::SeqCst)
    }

    pub fn resource(&self) -> usize {
        self.resource.load(Ordering::SeqCst)
    }

    pub fn stream(&self) -> usize {
        self.stream.load(Ordering::SeqCst)
    }

    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    pub fn upload(&self) -> usize {
        self.upload.load(Ordering::SeqCst)
    }
}

/// Stand-in for the LogLens backend: `R1` refreshes to `T2`, and `T1`/`T2` are the only
/// access tokens it accepts. `/api/clusters/:id` rejects every token.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub calls: Arc<Calls>,
}

impl MockBackend {
    pub async fn spawn() -> Result<Self, std::io::Error> {
        let calls = Arc::new(Calls::default());
        let app = Router::new()
            .route("/api/auth/refresh", post(refresh))
            .route("/api/auth/login", post(login))
            .route("/api/me", get(resource))
            .route("/resource", get(resource))
            .route("/slow", get(slow))
            .route("/api/clusters/:id", get(reject_all))
            .route("/api/sources", post(upload))
            .route("/api/anomalies/:fingerprint/review", post(echo_json))
            .route("/api/reports", post(echo_json))
            .route("/api/incidents", get(echo_query))
            .route("/api/analyses/:id/export.md", get(export_markdown))
            .route("/api/live-tail/stream", get(live_tail_stream))
            .route("/healthz", get(healthz))
            .with_state(calls.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, calls })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn console(&self) -> Router {
        let config = AppConfig {
            backend_internal_url: self.base_url(),
            ..AppConfig::default()
        };
        build_router(AppState::new(&config).expect("mock backend url is valid"))
    }
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn authorized(headers: &HeaderMap) -> bool {
    matches!(bearer(headers), Some(VALID_ACCESS) | Some(RENEWED_ACCESS))
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "detail": "Given token not valid for any token type" })),
    )
        .into_response()
}

async fn refresh(State(calls): State<Arc<Calls>>, Json(body): Json<Value>) -> Response {
    calls.refresh.fetch_add(1, Ordering::SeqCst);
    if body["refresh"] == VALID_REFRESH {
        Json(json!({ "access": RENEWED_ACCESS })).into_response()
    } else {
        unauthorized()
    }
}

async fn login(Json(body): Json<Value>) -> Response {
    if body["username"] == "ops" && body["password"] == "hunter2" {
        Json(json!({
            "access": VALID_ACCESS,
            "refresh": VALID_REFRESH,
            "user": { "id": 1, "username": "ops" },
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "detail": "No active account found with the given credentials" })),
        )
            .into_response()
    }
}

async fn resource(State(calls): State<Arc<Calls>>, headers: HeaderMap) -> Response {
    calls.resource.fetch_add(1, Ordering::SeqCst);
    if authorized(&headers) {
        Json(json!({ "ok": true })).into_response()
    } else {
        unauthorized()
    }
}

async fn slow(headers: HeaderMap) -> Response {
    tokio::time::sleep(Duration::from_secs(5)).await;
    if authorized(&headers) {
        Json(json!({ "ok": true })).into_response()
    } else {
        unauthorized()
    }
}

async fn reject_all(State(calls): State<Arc<Calls>>) -> Response {
    calls.rejected.fetch_add(1, Ordering::SeqCst);
    unauthorized()
}

/// Echoes every multipart field as `{ name: { file_name, content_type, text } }`.
async fn upload(
    State(calls): State<Arc<Calls>>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Response {
    calls.upload.fetch_add(1, Ordering::SeqCst);
    let mut fields = serde_json::Map::new();
    while let Ok(Some(field)) = multipart.next_field().await {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let Ok(text) = field.text().await else {
            return StatusCode::BAD_REQUEST.into_response();
        };
        fields.insert(
            name,
            json!({ "file_name": file_name, "content_type": content_type, "text": text }),
        );
    }
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(Value::Object(fields)).into_response()
}

async fn echo_json(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "received": body })).into_response()
}

async fn echo_query(headers: HeaderMap, RawQuery(query): RawQuery) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    Json(json!({ "query": query })).into_response()
}

async fn export_markdown(headers: HeaderMap, Path(id): Path<String>) -> Response {
    if !authorized(&headers) {
        return unauthorized();
    }
    (
        [(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"analysis-{id}.md\""),
        )],
        format!("# Analysis {id}\n"),
    )
        .into_response()
}

async fn live_tail_stream(
    State(calls): State<Arc<Calls>>,
    headers: HeaderMap,
    RawQuery(query): RawQuery,
) -> Response {
    calls.stream.fetch_add(1, Ordering::SeqCst);
    if !authorized(&headers) {
        return unauthorized();
    }
    let frame = json!({
        "events": [],
        "cursor": 0,
        "snapshot": true,
        "query": query,
    });
    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        format!("data: {frame}\n\n"),
    )
        .into_response()
}

async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "checks": { "database": "ok", "redis": "ok" } }))
}
