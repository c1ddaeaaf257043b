use std::time::Duration;

use axum::{
    extract::{Query, State},
    response::Response,
};
use serde::Deserialize;
use tracing::debug;
use url::form_urlencoded;

use crate::{
    proxy::proxy_stream,
    session::{CredentialStore, ProxyRequest},
    state::AppState,
};

use super::ApiError;

/// Upper bound on a single relayed stream; the browser reconnects after it lapses.
pub const LIVE_TAIL_STREAM_TIMEOUT: Duration = Duration::from_millis(70_000);

const MAX_SEARCH_LEN: usize = 200;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LiveTailQuery {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub analysis_id: Option<String>,
}

impl LiveTailQuery {
    /// Normalizes the filters and encodes them for the backend, or explains why they are invalid.
    pub fn to_backend_query(&self) -> Result<String, ApiError> {
        let level = trimmed(&self.level).to_lowercase();
        let search = trimmed(&self.q);
        let analysis_id = trimmed(&self.analysis_id);

        if search.chars().count() > MAX_SEARCH_LEN {
            return Err(ApiError::BadRequest(format!(
                "Search query exceeds {MAX_SEARCH_LEN} characters."
            )));
        }
        if !analysis_id.is_empty() && !analysis_id.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ApiError::BadRequest("analysis_id must be numeric.".into()));
        }

        let mut params = form_urlencoded::Serializer::new(String::new());
        if !level.is_empty() {
            params.append_pair("level", &level);
        }
        if !search.is_empty() {
            params.append_pair("q", search);
        }
        if !analysis_id.is_empty() {
            params.append_pair("analysis_id", analysis_id);
        }
        Ok(params.finish())
    }
}

fn trimmed(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or_default()
}

pub async fn stream(
    State(state): State<AppState>,
    store: CredentialStore,
    Query(query): Query<LiveTailQuery>,
) -> Result<Response, ApiError> {
    let backend_query = query.to_backend_query()?;
    debug!(target: "loglens::live_tail", query = %backend_query, "relaying live tail stream");
    let request = ProxyRequest::get("/api/live-tail/stream")
        .query(Some(&backend_query))
        .timeout(LIVE_TAIL_STREAM_TIMEOUT);
    Ok(proxy_stream(state.executor(), store, request, "text/event-stream").await)
}
