//! Browser-facing relays built on [`SessionExecutor`].
//!
//! Each relay runs one execution, applies its session mutation to the outgoing cookies, and
//! maps the outcome to a response: JSON bodies, raw downloads, or an event stream relayed
//! chunk by chunk.

use axum::{
    body::Body,
    http::{
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_TYPE},
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::warn;

use crate::routes::ApiError;
use crate::session::{CredentialStore, ExecutionOutcome, ProxyRequest, SessionExecutor};

pub async fn proxy_json(
    executor: &SessionExecutor,
    mut store: CredentialStore,
    request: ProxyRequest,
) -> Response {
    let result = json_response(executor, &mut store, &request).await;
    (store, result).into_response()
}

pub async fn proxy_binary(
    executor: &SessionExecutor,
    mut store: CredentialStore,
    request: ProxyRequest,
    fallback_content_type: &'static str,
) -> Response {
    let result = binary_response(executor, &mut store, &request, fallback_content_type).await;
    (store, result).into_response()
}

pub async fn proxy_stream(
    executor: &SessionExecutor,
    mut store: CredentialStore,
    request: ProxyRequest,
    fallback_content_type: &'static str,
) -> Response {
    let result = stream_response(executor, &mut store, &request, fallback_content_type).await;
    (store, result).into_response()
}

/// Empty bodies become `{}` and non-JSON text is wrapped as `{"detail": text}`.
pub fn parse_response_body(raw: &str) -> Value {
    if raw.is_empty() {
        return json!({});
    }
    serde_json::from_str(raw).unwrap_or_else(|_| json!({ "detail": raw }))
}

async fn forward(
    executor: &SessionExecutor,
    store: &mut CredentialStore,
    request: &ProxyRequest,
) -> Result<reqwest::Response, ApiError> {
    let execution = executor.execute(&store.read(), request).await;
    execution.mutation.apply(store)?;
    match execution.outcome {
        ExecutionOutcome::Authenticated(response) => Ok(response),
        ExecutionOutcome::AuthMissing => Err(ApiError::Unauthorized),
        ExecutionOutcome::TransportFailure(_) => Err(ApiError::BadGateway(BACKEND_FAILURE)),
    }
}

const BACKEND_FAILURE: &str = "Backend request failed.";

async fn json_response(
    executor: &SessionExecutor,
    store: &mut CredentialStore,
    request: &ProxyRequest,
) -> Result<Response, ApiError> {
    let response = forward(executor, store, request).await?;
    relay_json(response, &request.path).await
}

async fn relay_json(response: reqwest::Response, path: &str) -> Result<Response, ApiError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED {
        return Err(ApiError::SessionExpired);
    }
    let raw = response.text().await.map_err(|err| {
        warn!(target: "loglens::proxy", path, error = %err, "failed to read backend body");
        ApiError::BadGateway(BACKEND_FAILURE)
    })?;
    Ok((status, Json(parse_response_body(&raw))).into_response())
}

async fn binary_response(
    executor: &SessionExecutor,
    store: &mut CredentialStore,
    request: &ProxyRequest,
    fallback_content_type: &'static str,
) -> Result<Response, ApiError> {
    let response = forward(executor, store, request).await?;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return relay_json(response, &request.path).await;
    }

    let content_type = content_type_or(&response, fallback_content_type);
    let disposition = response.headers().get(CONTENT_DISPOSITION).cloned();
    let body = response.bytes().await.map_err(|err| {
        warn!(target: "loglens::proxy", path = %request.path, error = %err, "failed to read backend download");
        ApiError::BadGateway(BACKEND_FAILURE)
    })?;

    let mut relayed = (status, body).into_response();
    let headers = relayed.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    if let Some(disposition) = disposition {
        headers.insert(CONTENT_DISPOSITION, disposition);
    }
    Ok(relayed)
}

async fn stream_response(
    executor: &SessionExecutor,
    store: &mut CredentialStore,
    request: &ProxyRequest,
    fallback_content_type: &'static str,
) -> Result<Response, ApiError> {
    let response = forward(executor, store, request).await?;
    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        return relay_json(response, &request.path).await;
    }

    let content_type = content_type_or(&response, fallback_content_type);
    // Dropping the relayed body (client went away) drops the upstream response with it.
    let mut relayed = (status, Body::from_stream(response.bytes_stream())).into_response();
    let headers = relayed.headers_mut();
    headers.insert(CONTENT_TYPE, content_type);
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    Ok(relayed)
}

fn content_type_or(response: &reqwest::Response, fallback: &'static str) -> HeaderValue {
    response
        .headers()
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(fallback))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_becomes_empty_object() {
        assert_eq!(parse_response_body(""), json!({}));
    }

    #[test]
    fn plain_text_body_is_wrapped_as_detail() {
        assert_eq!(
            parse_response_body("upstream exploded"),
            json!({ "detail": "upstream exploded" })
        );
    }

    #[test]
    fn json_body_passes_through() {
        assert_eq!(
            parse_response_body(r#"{"items":[1,2]}"#),
            json!({ "items": [1, 2] })
        );
    }
}
