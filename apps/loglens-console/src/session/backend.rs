use std::time::Duration;

use bytes::Bytes;
use reqwest::{
    header::HeaderMap,
    multipart::{Form, Part},
    Client, Method, Response,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("invalid backend url '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("http client error: {0}")]
    Client(#[from] reqwest::Error),
}

/// One named field of a `multipart/form-data` body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPart {
    pub name: String,
    pub value: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl FormPart {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Bytes::from(value.into()),
            file_name: None,
            content_type: None,
        }
    }

    fn to_part(&self) -> Result<Part, reqwest::Error> {
        let mut part = Part::bytes(self.value.to_vec());
        if let Some(file_name) = &self.file_name {
            part = part.file_name(file_name.clone());
        }
        if let Some(content_type) = &self.content_type {
            part = part.mime_str(content_type)?;
        }
        Ok(part)
    }
}

/// Outbound body. Multipart fields are kept as data so the form can be rebuilt for a retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyBody {
    Bytes(Bytes),
    Multipart(Vec<FormPart>),
}

/// One outbound call, built by a route handler and consumed once by the executor.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub path: String,
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<ProxyBody>,
    pub timeout: Option<Duration>,
}

impl ProxyRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method,
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Appends a raw, already-encoded query string.
    pub fn query(mut self, query: Option<&str>) -> Self {
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            self.path.push(if self.path.contains('?') { '&' } else { '?' });
            self.path.push_str(query);
        }
        self
    }

    pub fn json_body(mut self, body: Bytes) -> Self {
        self.headers.insert(
            reqwest::header::CONTENT_TYPE,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        self.body = Some(ProxyBody::Bytes(body));
        self
    }

    pub fn multipart(mut self, parts: Vec<FormPart>) -> Self {
        self.body = Some(ProxyBody::Multipart(parts));
        self
    }
}

/// Thin wrapper over the backend's HTTP surface.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
}

#[derive(Debug, Serialize)]
struct RefreshRequest<'a> {
    refresh: &'a str,
}

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    access: Option<String>,
}

impl BackendClient {
    pub fn new(base_url: &str) -> Result<Self, BackendError> {
        Url::parse(base_url).map_err(|source| BackendError::InvalidUrl {
            url: base_url.to_string(),
            source,
        })?;
        let http = Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Exchanges a refresh token for a fresh access token. Every failure collapses to `None`.
    pub async fn refresh_access_token(&self, refresh_token: &str, timeout: Duration) -> Option<String> {
        let response = match self
            .http
            .post(self.url("/api/auth/refresh"))
            .json(&RefreshRequest {
                refresh: refresh_token,
            })
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(err) => {
                debug!(target: "loglens::session", error = %err, "token refresh request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            debug!(
                target: "loglens::session",
                status = %response.status(),
                "token refresh rejected"
            );
            return None;
        }

        match response.json::<RefreshResponse>().await {
            Ok(RefreshResponse {
                access: Some(access),
            }) if !access.trim().is_empty() => Some(access),
            Ok(_) => {
                debug!(target: "loglens::session", "token refresh response missing access token");
                None
            }
            Err(err) => {
                debug!(target: "loglens::session", error = %err, "token refresh response malformed");
                None
            }
        }
    }

    pub async fn send_authenticated(
        &self,
        request: &ProxyRequest,
        access_token: &str,
        timeout: Duration,
    ) -> Result<Response, reqwest::Error> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path))
            .headers(request.headers.clone())
            .bearer_auth(access_token)
            .timeout(timeout);
        builder = match &request.body {
            Some(ProxyBody::Bytes(body)) => builder.body(body.clone()),
            Some(ProxyBody::Multipart(parts)) => {
                let form = parts
                    .iter()
                    .try_fold(Form::new(), |form, field| {
                        Ok::<_, reqwest::Error>(form.part(field.name.clone(), field.to_part()?))
                    })?;
                builder.multipart(form)
            }
            None => builder,
        };
        builder.send().await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> Result<Response, reqwest::Error> {
        self.http
            .post(self.url(path))
            .json(body)
            .timeout(timeout)
            .send()
            .await
    }

    pub async fn get(&self, path: &str, timeout: Duration) -> Result<Response, reqwest::Error> {
        self.http.get(self.url(path)).timeout(timeout).send().await
    }
}
