use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::{
    proxy::{parse_response_body, proxy_json},
    session::{CredentialPair, CredentialStore, ProxyRequest},
    state::AppState,
};

use super::ApiError;

const AUTH_PROXY_TIMEOUT: Duration = Duration::from_millis(15_000);
const ME_PROXY_TIMEOUT: Duration = Duration::from_millis(10_000);

/// How a credential-issuing call (login or registration) is relayed.
struct CredentialExchange {
    path: &'static str,
    success_status: StatusCode,
    failure_message: &'static str,
    clear_on_unauthorized: bool,
}

pub async fn login(
    State(state): State<AppState>,
    mut store: CredentialStore,
    body: Bytes,
) -> Response {
    let result = login_with(&state, &mut store, &body).await;
    (store, result).into_response()
}

pub async fn register(
    State(state): State<AppState>,
    mut store: CredentialStore,
    body: Bytes,
) -> Response {
    let result = register_with(&state, &mut store, &body).await;
    (store, result).into_response()
}

pub async fn logout(mut store: CredentialStore) -> Result<impl IntoResponse, ApiError> {
    store.clear()?;
    Ok((store, Json(json!({ "detail": "Logged out." }))))
}

pub async fn me(State(state): State<AppState>, store: CredentialStore) -> Response {
    proxy_json(
        state.executor(),
        store,
        ProxyRequest::get("/api/me").timeout(ME_PROXY_TIMEOUT),
    )
    .await
}

pub async fn change_password(
    State(state): State<AppState>,
    store: CredentialStore,
    body: Bytes,
) -> Response {
    proxy_json(
        state.executor(),
        store,
        ProxyRequest::post("/api/auth/change-password").json_body(body),
    )
    .await
}

pub async fn list_sessions(State(state): State<AppState>, store: CredentialStore) -> Response {
    proxy_json(
        state.executor(),
        store,
        ProxyRequest::get("/api/auth/sessions"),
    )
    .await
}

pub async fn revoke_all_sessions(
    State(state): State<AppState>,
    store: CredentialStore,
) -> Response {
    proxy_json(
        state.executor(),
        store,
        ProxyRequest::post("/api/auth/sessions/revoke-all"),
    )
    .await
}

async fn login_with(
    state: &AppState,
    store: &mut CredentialStore,
    body: &[u8],
) -> Result<Response, ApiError> {
    let input = parse_json_payload(body)?;
    let username = read_string_field(&input, "username");
    let password = read_string_field(&input, "password");
    if username.is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest(
            "Username and password are required.".into(),
        ));
    }
    exchange_credentials(
        state,
        store,
        CredentialExchange {
            path: "/api/auth/login",
            success_status: StatusCode::OK,
            failure_message: "Login request failed.",
            clear_on_unauthorized: true,
        },
        json!({ "username": username, "password": password }),
    )
    .await
}

async fn register_with(
    state: &AppState,
    store: &mut CredentialStore,
    body: &[u8],
) -> Result<Response, ApiError> {
    let input = parse_json_payload(body)?;
    let username = read_string_field(&input, "username");
    let email = read_string_field(&input, "email").to_lowercase();
    let password = read_string_field(&input, "password");
    let password_confirm = read_string_field(&input, "password_confirm");
    if [&username, &email, &password, &password_confirm]
        .iter()
        .any(|field| field.is_empty())
    {
        return Err(ApiError::BadRequest(
            "Username, email, password, and password confirmation are required.".into(),
        ));
    }
    exchange_credentials(
        state,
        store,
        CredentialExchange {
            path: "/api/auth/register",
            success_status: StatusCode::CREATED,
            failure_message: "Registration request failed.",
            clear_on_unauthorized: false,
        },
        json!({
            "username": username,
            "email": email,
            "password": password,
            "password_confirm": password_confirm,
        }),
    )
    .await
}

/// Posts credentials to the backend and moves the returned tokens into cookies.
/// Only `{user}` is returned to the browser.
async fn exchange_credentials(
    state: &AppState,
    store: &mut CredentialStore,
    exchange: CredentialExchange,
    payload: Value,
) -> Result<Response, ApiError> {
    let response = state
        .backend()
        .post_json(exchange.path, &payload, AUTH_PROXY_TIMEOUT)
        .await
        .map_err(|err| {
            warn!(target: "loglens::session", path = exchange.path, error = %err, "credential exchange failed");
            ApiError::BadGateway(exchange.failure_message)
        })?;

    let status = response.status();
    let raw = response.text().await.map_err(|err| {
        warn!(target: "loglens::session", path = exchange.path, error = %err, "credential exchange body unreadable");
        ApiError::BadGateway(exchange.failure_message)
    })?;
    let body = parse_response_body(&raw);

    if !status.is_success() {
        if status == StatusCode::UNAUTHORIZED && exchange.clear_on_unauthorized {
            store.clear()?;
        }
        return Ok((status, Json(body)).into_response());
    }

    let (Some(access), Some(refresh)) = (body["access"].as_str(), body["refresh"].as_str()) else {
        warn!(target: "loglens::session", path = exchange.path, "backend auth response missing tokens");
        return Err(ApiError::BadGateway("Invalid auth response from backend."));
    };
    store.write(&CredentialPair::new(access, refresh), false)?;
    info!(target: "loglens::session", path = exchange.path, "session established");

    let user = body.get("user").cloned().unwrap_or(Value::Null);
    Ok((exchange.success_status, Json(json!({ "user": user }))).into_response())
}

fn parse_json_payload(body: &[u8]) -> Result<Value, ApiError> {
    serde_json::from_slice(body).map_err(|_| ApiError::BadRequest("Invalid JSON payload.".into()))
}

fn read_string_field(input: &Value, field: &str) -> String {
    input
        .get(field)
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}
