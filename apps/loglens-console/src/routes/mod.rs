mod auth;
mod live_tail;
mod resources;

use std::time::Duration;

use axum::{
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{metrics, proxy::parse_response_body, session::CookieError, state::AppState};

pub use live_tail::{LiveTailQuery, LIVE_TAIL_STREAM_TIMEOUT};

pub const AUTH_REQUIRED_MESSAGE: &str = "Authentication required. Please sign in.";

const STATUS_CHECK_TIMEOUT: Duration = Duration::from_millis(5_000);

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        .route("/api/system/status", get(system_status))
        .route("/api/auth/login", post(auth::login))
        .route("/api/auth/register", post(auth::register))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::me))
        .route("/api/auth/change-password", post(auth::change_password))
        .route("/api/auth/sessions", get(auth::list_sessions))
        .route("/api/auth/sessions/revoke-all", post(auth::revoke_all_sessions))
        .route("/api/dashboard/summary", get(resources::dashboard_summary))
        .route(
            "/api/sources",
            post(resources::upload_source).layer(DefaultBodyLimit::max(resources::MAX_UPLOAD_BYTES)),
        )
        .route(
            "/api/sources/:source_id",
            get(resources::get_source).delete(resources::delete_source),
        )
        .route(
            "/api/sources/:source_id/analyze",
            post(resources::analyze_source),
        )
        .route(
            "/api/analyses/:analysis_id/clusters",
            get(resources::analysis_clusters),
        )
        .route(
            "/api/analyses/:analysis_id/export-md",
            get(resources::export_analysis_markdown),
        )
        .route(
            "/api/analyses/:analysis_id/export-json",
            get(resources::export_analysis_json),
        )
        .route("/api/clusters/:cluster_id", get(resources::get_cluster))
        .route("/api/anomalies", get(resources::list_anomalies))
        .route("/api/anomalies/:fingerprint", get(resources::get_anomaly))
        .route(
            "/api/anomalies/:fingerprint/review",
            post(resources::review_anomaly),
        )
        .route("/api/incidents", get(resources::list_incidents))
        .route("/api/incidents/:incident_id", get(resources::get_incident))
        .route(
            "/api/reports",
            get(resources::list_reports).post(resources::create_report),
        )
        .route(
            "/api/reports/:report_id/regenerate",
            post(resources::regenerate_report),
        )
        .route(
            "/api/report-schedules",
            get(resources::list_report_schedules).post(resources::create_report_schedule),
        )
        .route(
            "/api/report-schedules/:schedule_id",
            patch(resources::update_report_schedule),
        )
        .route(
            "/api/settings/workspace",
            get(resources::get_workspace_settings).put(resources::update_workspace_settings),
        )
        .route(
            "/api/integrations",
            get(resources::get_integrations).put(resources::update_integrations),
        )
        .route("/api/integrations/test", post(resources::test_integrations))
        .route("/api/live-tail/stream", get(live_tail::stream))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "ok"
}

async fn prometheus_metrics() -> String {
    metrics::export_prometheus()
}

/// Reports the deployment environment and whether the backend's queue is reachable.
async fn system_status(State(state): State<AppState>) -> Json<Value> {
    let queue_health = match state.backend().get("/healthz", STATUS_CHECK_TIMEOUT).await {
        Ok(response) if response.status().is_success() => {
            let raw = response.text().await.unwrap_or_default();
            let body = parse_response_body(&raw);
            if body["checks"]["redis"] == "ok" {
                "ok"
            } else {
                "degraded"
            }
        }
        Ok(response) => {
            warn!(target: "loglens::proxy", status = %response.status(), "backend health check unhealthy");
            "degraded"
        }
        Err(err) => {
            warn!(target: "loglens::proxy", error = %err, "backend health check failed");
            "degraded"
        }
    };
    Json(json!({
        "environment": state.environment(),
        "queue_health": queue_health,
    }))
}

#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    SessionExpired,
    BadRequest(String),
    BadGateway(&'static str),
}

#[derive(Debug, Serialize)]
struct ApiErrorBody<'a> {
    error: &'a str,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, detail) = match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                AUTH_REQUIRED_MESSAGE.to_string(),
            ),
            ApiError::SessionExpired => (
                StatusCode::UNAUTHORIZED,
                "session_expired",
                AUTH_REQUIRED_MESSAGE.to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "bad_gateway", msg.to_string()),
        };
        (status, Json(ApiErrorBody { error, detail })).into_response()
    }
}

impl From<CookieError> for ApiError {
    fn from(err: CookieError) -> Self {
        warn!(target: "loglens::proxy", error = %err, "failed to encode session cookie");
        ApiError::BadGateway("Failed to update session cookies.")
    }
}

/// Accepts only plain decimal identifiers, the only shape the backend routes take.
pub(crate) fn numeric_id<'a>(raw: &'a str, kind: &str) -> Result<&'a str, ApiError> {
    if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) {
        Ok(raw)
    } else {
        Err(ApiError::BadRequest(format!("Invalid {kind} id.")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use axum::{
        body::{self, Body},
        http::{header, Request},
    };
    use tower::util::ServiceExt;

    fn test_app() -> Router {
        let config = AppConfig {
            backend_internal_url: "http://127.0.0.1:9".into(),
            ..AppConfig::default()
        };
        build_router(AppState::new(&config).unwrap())
    }

    async fn body_json(response: Response) -> Value {
        let bytes = body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn numeric_ids_reject_everything_but_digits() {
        assert!(numeric_id("42", "source").is_ok());
        assert!(numeric_id("", "source").is_err());
        assert!(numeric_id("4a", "source").is_err());
        assert!(numeric_id("-1", "source").is_err());
    }

    #[tokio::test]
    async fn logout_clears_both_cookies_without_backend() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/auth/logout")
                    .header(header::COOKIE, "loglens_access=T1; loglens_refresh=R1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with("loglens_access=;")));
        assert!(cookies.iter().any(|c| c.starts_with("loglens_refresh=;")));
        assert_eq!(body_json(response).await["detail"], "Logged out.");
    }

    #[tokio::test]
    async fn missing_session_is_rejected_before_any_backend_call() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/auth/me")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_json(response).await["detail"], AUTH_REQUIRED_MESSAGE);
    }

    #[tokio::test]
    async fn invalid_identifiers_are_bad_requests() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/sources/abc")
                    .header(header::COOKIE, "loglens_access=T1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["detail"], "Invalid source id.");
    }

    #[tokio::test]
    async fn dashboard_rejects_unknown_windows() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/dashboard/summary?window=90d")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await["detail"],
            "Unsupported window '90d'. Allowed values: 24h, 7d, 30d."
        );
    }

    #[tokio::test]
    async fn transport_failure_maps_to_bad_gateway() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/auth/me")
                    .header(header::COOKIE, "loglens_access=T1; loglens_refresh=R1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        assert_eq!(body_json(response).await["detail"], "Backend request failed.");
    }

    #[tokio::test]
    async fn system_status_degrades_when_backend_unreachable() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .uri("/api/system/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["environment"], "dev");
        assert_eq!(body["queue_health"], "degraded");
    }
}
