use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, Multipart, Path, Query, RawQuery, State},
    response::Response,
};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use url::form_urlencoded;

use crate::{
    proxy::{proxy_binary, proxy_json},
    session::{CredentialStore, FormPart, ProxyRequest},
    state::AppState,
};

use super::{numeric_id, ApiError};

const STANDARD_TIMEOUT: Duration = Duration::from_millis(15_000);
const REPORTING_TIMEOUT: Duration = Duration::from_millis(20_000);

const DASHBOARD_WINDOWS: [&str; 3] = ["24h", "7d", "30d"];
const MAX_SERVICE_LEN: usize = 128;

pub(super) const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;
const DEFAULT_UPLOAD_NAME: &str = "source.log";
const FILE_REQUIRED_MESSAGE: &str = "File is required.";

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    window: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    service: Option<String>,
}

pub async fn dashboard_summary(
    State(state): State<AppState>,
    store: CredentialStore,
    Query(query): Query<DashboardQuery>,
) -> Result<Response, ApiError> {
    let window = dashboard_window(query.window.as_deref())?;
    let request = ProxyRequest::get("/api/dashboard/summary")
        .query(Some(&format!("window={window}")))
        .timeout(REPORTING_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

/// Forwards a log upload as `multipart/form-data` with the file and an optional display name.
pub async fn upload_source(
    State(state): State<AppState>,
    store: CredentialStore,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let multipart = multipart.map_err(|_| ApiError::BadRequest(FILE_REQUIRED_MESSAGE.into()))?;
    let parts = read_upload_form(multipart).await?;
    let request = ProxyRequest::post("/api/sources")
        .multipart(parts)
        .timeout(STANDARD_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn get_source(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(source_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&source_id, "source")?;
    let request = ProxyRequest::get(format!("/api/sources/{id}")).timeout(STANDARD_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn delete_source(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(source_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&source_id, "source")?;
    let request = ProxyRequest::delete(format!("/api/sources/{id}")).timeout(STANDARD_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn analyze_source(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(source_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&source_id, "source")?;
    let request =
        ProxyRequest::post(format!("/api/sources/{id}/analyze")).timeout(STANDARD_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn analysis_clusters(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(analysis_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&analysis_id, "analysis")?;
    let request =
        ProxyRequest::get(format!("/api/analyses/{id}/clusters")).timeout(STANDARD_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn export_analysis_markdown(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(analysis_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&analysis_id, "analysis")?;
    let request =
        ProxyRequest::get(format!("/api/analyses/{id}/export.md")).timeout(REPORTING_TIMEOUT);
    Ok(proxy_binary(state.executor(), store, request, "text/markdown; charset=utf-8").await)
}

pub async fn export_analysis_json(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(analysis_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&analysis_id, "analysis")?;
    let request =
        ProxyRequest::get(format!("/api/analyses/{id}/export.json")).timeout(REPORTING_TIMEOUT);
    Ok(proxy_binary(state.executor(), store, request, "application/json").await)
}

pub async fn get_cluster(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(cluster_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&cluster_id, "cluster")?;
    let request = ProxyRequest::get(format!("/api/clusters/{id}")).timeout(STANDARD_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn list_anomalies(
    State(state): State<AppState>,
    store: CredentialStore,
    RawQuery(query): RawQuery,
) -> Response {
    let request = ProxyRequest::get("/api/anomalies")
        .query(query.as_deref())
        .timeout(REPORTING_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn get_anomaly(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(fingerprint): Path<String>,
    Query(query): Query<AnomalyQuery>,
) -> Result<Response, ApiError> {
    let fingerprint = anomaly_fingerprint(&fingerprint)?;
    let service = query
        .service
        .as_deref()
        .map(str::trim)
        .filter(|service| !service.is_empty());
    let encoded = match service {
        Some(service) if service.chars().count() > MAX_SERVICE_LEN => {
            return Err(ApiError::BadRequest(format!(
                "service exceeds {MAX_SERVICE_LEN} characters."
            )));
        }
        Some(service) => Some(
            form_urlencoded::Serializer::new(String::new())
                .append_pair("service", service)
                .finish(),
        ),
        None => None,
    };
    let request = ProxyRequest::get(format!("/api/anomalies/{fingerprint}"))
        .query(encoded.as_deref())
        .timeout(REPORTING_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn review_anomaly(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(fingerprint): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let fingerprint = anomaly_fingerprint(&fingerprint)?;
    let request = ProxyRequest::post(format!("/api/anomalies/{fingerprint}/review"))
        .json_body(review_payload(&body))
        .timeout(REPORTING_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn list_incidents(
    State(state): State<AppState>,
    store: CredentialStore,
    RawQuery(query): RawQuery,
) -> Response {
    let request = ProxyRequest::get("/api/incidents")
        .query(query.as_deref())
        .timeout(REPORTING_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn get_incident(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(incident_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&incident_id, "incident")?;
    let request = ProxyRequest::get(format!("/api/incidents/{id}")).timeout(REPORTING_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn list_reports(State(state): State<AppState>, store: CredentialStore) -> Response {
    let request = ProxyRequest::get("/api/reports").timeout(REPORTING_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn create_report(
    State(state): State<AppState>,
    store: CredentialStore,
    body: Bytes,
) -> Response {
    let request = ProxyRequest::post("/api/reports")
        .json_body(report_payload(&body))
        .timeout(REPORTING_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn regenerate_report(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(report_id): Path<String>,
) -> Result<Response, ApiError> {
    let id = numeric_id(&report_id, "report")?;
    let request =
        ProxyRequest::post(format!("/api/reports/{id}/regenerate")).timeout(REPORTING_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn list_report_schedules(
    State(state): State<AppState>,
    store: CredentialStore,
) -> Response {
    let request = ProxyRequest::get("/api/report-schedules").timeout(REPORTING_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn create_report_schedule(
    State(state): State<AppState>,
    store: CredentialStore,
    body: Bytes,
) -> Response {
    let request = ProxyRequest::post("/api/report-schedules")
        .json_body(body)
        .timeout(REPORTING_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn update_report_schedule(
    State(state): State<AppState>,
    store: CredentialStore,
    Path(schedule_id): Path<String>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let id = numeric_id(&schedule_id, "schedule")?;
    let request = ProxyRequest::patch(format!("/api/report-schedules/{id}"))
        .json_body(body)
        .timeout(REPORTING_TIMEOUT);
    Ok(proxy_json(state.executor(), store, request).await)
}

pub async fn get_workspace_settings(
    State(state): State<AppState>,
    store: CredentialStore,
) -> Response {
    let request = ProxyRequest::get("/api/settings/workspace").timeout(STANDARD_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn update_workspace_settings(
    State(state): State<AppState>,
    store: CredentialStore,
    body: Bytes,
) -> Response {
    let request = ProxyRequest::put("/api/settings/workspace")
        .json_body(body)
        .timeout(STANDARD_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn get_integrations(State(state): State<AppState>, store: CredentialStore) -> Response {
    let request = ProxyRequest::get("/api/integrations").timeout(STANDARD_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn update_integrations(
    State(state): State<AppState>,
    store: CredentialStore,
    body: Bytes,
) -> Response {
    let request = ProxyRequest::put("/api/integrations")
        .json_body(body)
        .timeout(STANDARD_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

pub async fn test_integrations(
    State(state): State<AppState>,
    store: CredentialStore,
    body: Bytes,
) -> Response {
    let request = ProxyRequest::post("/api/integrations/test")
        .json_body(body)
        .timeout(STANDARD_TIMEOUT);
    proxy_json(state.executor(), store, request).await
}

fn dashboard_window(raw: Option<&str>) -> Result<&'static str, ApiError> {
    let window = raw
        .map(|w| w.trim().to_ascii_lowercase())
        .filter(|w| !w.is_empty())
        .unwrap_or_else(|| "24h".to_string());
    if let Some(allowed) = DASHBOARD_WINDOWS.iter().copied().find(|allowed| *allowed == window) {
        Ok(allowed)
    } else {
        Err(ApiError::BadRequest(format!(
            "Unsupported window '{window}'. Allowed values: {}.",
            DASHBOARD_WINDOWS.join(", ")
        )))
    }
}

/// Fingerprints are lowercase hex digests between 32 and 64 characters.
async fn read_upload_form(mut multipart: Multipart) -> Result<Vec<FormPart>, ApiError> {
    let file_required = || ApiError::BadRequest(FILE_REQUIRED_MESSAGE.into());
    let mut file = None;
    let mut display_name = None;
    while let Some(field) = multipart.next_field().await.map_err(|_| file_required())? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("file") if field.file_name().is_some() => {
                let file_name = field
                    .file_name()
                    .filter(|name| !name.is_empty())
                    .unwrap_or(DEFAULT_UPLOAD_NAME)
                    .to_string();
                let content_type = field.content_type().map(str::to_string);
                let value = field.bytes().await.map_err(|_| file_required())?;
                file = Some(FormPart {
                    name: "file".into(),
                    value,
                    file_name: Some(file_name),
                    content_type,
                });
            }
            Some("name") => {
                let text = field.text().await.map_err(|_| file_required())?;
                let trimmed = text.trim();
                display_name = (!trimmed.is_empty()).then(|| trimmed.to_string());
            }
            _ => {}
        }
    }

    let mut parts = vec![file.ok_or_else(file_required)?];
    if let Some(display_name) = display_name {
        parts.push(FormPart::text("name", display_name));
    }
    Ok(parts)
}

fn json_object(body: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Rebuilds the review request from `service` and `status`; anything else is dropped.
fn review_payload(body: &[u8]) -> Bytes {
    let payload = json_object(body);
    let service = payload.get("service").and_then(Value::as_str).unwrap_or("");
    let status = payload
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("reviewed");
    Bytes::from(json!({ "service": service, "status": status }).to_string())
}

fn report_payload(body: &[u8]) -> Bytes {
    let payload = json_object(body);
    let mut report = Map::new();
    for key in ["analysis_id", "format"] {
        if let Some(value) = payload.get(key) {
            report.insert(key.to_string(), value.clone());
        }
    }
    Bytes::from(Value::Object(report).to_string())
}

fn anomaly_fingerprint(raw: &str) -> Result<&str, ApiError> {
    let valid = (32..=64).contains(&raw.len())
        && raw.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if valid {
        Ok(raw)
    } else {
        Err(ApiError::BadRequest("Invalid anomaly fingerprint.".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dashboard_window_defaults_to_a_day() {
        assert_eq!(dashboard_window(None).unwrap(), "24h");
        assert_eq!(dashboard_window(Some("  ")).unwrap(), "24h");
        assert_eq!(dashboard_window(Some("30d")).unwrap(), "30d");
        assert_eq!(dashboard_window(Some(" 7D ")).unwrap(), "7d");
        assert!(dashboard_window(Some("1y")).is_err());
    }

    fn decoded(bytes: Bytes) -> Value {
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn review_payload_keeps_only_service_and_status() {
        let body = br#"{"service":"api","status":"dismissed","note":"drop me"}"#;
        assert_eq!(
            decoded(review_payload(body)),
            json!({ "service": "api", "status": "dismissed" })
        );
        assert_eq!(
            decoded(review_payload(b"not json")),
            json!({ "service": "", "status": "reviewed" })
        );
        assert_eq!(
            decoded(review_payload(br#"{"service":7,"status":null}"#)),
            json!({ "service": "", "status": "reviewed" })
        );
    }

    #[test]
    fn report_payload_keeps_analysis_and_format() {
        let body = br#"{"analysis_id":12,"format":"markdown","title":"ignored"}"#;
        assert_eq!(
            decoded(report_payload(body)),
            json!({ "analysis_id": 12, "format": "markdown" })
        );
        assert_eq!(decoded(report_payload(br#"{"format":"json"}"#)), json!({ "format": "json" }));
        assert_eq!(decoded(report_payload(b"[1,2]")), json!({}));
    }

    #[test]
    fn fingerprints_must_be_lowercase_hex_digests() {
        let md5 = "0123456789abcdef0123456789abcdef";
        assert!(anomaly_fingerprint(md5).is_ok());
        assert!(anomaly_fingerprint(&md5.repeat(2)).is_ok());
        assert!(anomaly_fingerprint(&md5[..31]).is_err());
        assert!(anomaly_fingerprint(&md5.to_uppercase()).is_err());
        assert!(anomaly_fingerprint(&format!("{md5}{md5}0")).is_err());
    }
}
