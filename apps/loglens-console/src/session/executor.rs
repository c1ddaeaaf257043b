//! Authenticated call execution with transparent access-token renewal.
//!
//! One logical call renews at most once before the first attempt (access cookie missing)
//! and at most once after a 401. The result is always a value: the caller branches on
//! [`ExecutionOutcome`] and applies the [`SessionMutation`] to its [`CredentialStore`].

use std::time::{Duration, Instant};

use reqwest::{Response, StatusCode};
use tracing::{debug, warn};

use crate::metrics;

use super::{
    backend::{BackendClient, ProxyRequest},
    cookies::{CookieError, CredentialPair, CredentialStore, StoredCredentials},
};

pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Change to apply to the credential cookies once a call has finished.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionMutation {
    #[default]
    None,
    Clear,
    Renew(String),
}

impl SessionMutation {
    fn finalize(status: StatusCode, renewed_access_token: Option<String>) -> Self {
        if status == StatusCode::UNAUTHORIZED {
            return SessionMutation::Clear;
        }
        renewed_access_token.map_or(SessionMutation::None, SessionMutation::Renew)
    }

    pub fn clears_credentials(&self) -> bool {
        matches!(self, SessionMutation::Clear)
    }

    pub fn renewed_access_token(&self) -> Option<&str> {
        match self {
            SessionMutation::Renew(token) => Some(token),
            _ => None,
        }
    }

    pub fn apply(&self, store: &mut CredentialStore) -> Result<(), CookieError> {
        match self {
            SessionMutation::None => Ok(()),
            SessionMutation::Clear => store.clear(),
            SessionMutation::Renew(token) => store.write(&CredentialPair::access_only(token), true),
        }
    }
}

#[derive(Debug)]
pub enum ExecutionOutcome {
    Authenticated(Response),
    AuthMissing,
    TransportFailure(reqwest::Error),
}

impl ExecutionOutcome {
    fn label(&self) -> &'static str {
        match self {
            ExecutionOutcome::Authenticated(_) => "authenticated",
            ExecutionOutcome::AuthMissing => "auth_missing",
            ExecutionOutcome::TransportFailure(_) => "transport_failure",
        }
    }
}

#[derive(Debug)]
pub struct Execution {
    pub outcome: ExecutionOutcome,
    pub mutation: SessionMutation,
}

impl Execution {
    fn auth_missing(refresh_token_present: bool) -> Self {
        Self {
            outcome: ExecutionOutcome::AuthMissing,
            mutation: if refresh_token_present {
                SessionMutation::Clear
            } else {
                SessionMutation::None
            },
        }
    }

    fn transport_failure(err: reqwest::Error) -> Self {
        Self {
            outcome: ExecutionOutcome::TransportFailure(err),
            mutation: SessionMutation::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionExecutor {
    backend: BackendClient,
    default_timeout: Duration,
}

impl SessionExecutor {
    pub fn new(backend: BackendClient, default_timeout: Duration) -> Self {
        Self {
            backend,
            default_timeout,
        }
    }

    pub fn backend(&self) -> &BackendClient {
        &self.backend
    }

    pub async fn execute(&self, credentials: &StoredCredentials, request: &ProxyRequest) -> Execution {
        let started = Instant::now();
        let execution = self.execute_inner(credentials, request).await;
        let label = execution.outcome.label();
        metrics::PROXY_OUTCOMES.with_label_values(&[label]).inc();
        metrics::PROXY_DURATION
            .with_label_values(&[label])
            .observe(started.elapsed().as_secs_f64());
        execution
    }

    async fn execute_inner(
        &self,
        credentials: &StoredCredentials,
        request: &ProxyRequest,
    ) -> Execution {
        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let refresh_token = credentials.refresh_token.as_deref();
        let mut renewed_access_token = None;
        let mut access_token = credentials.access_token.clone();

        if access_token.is_none() {
            if let Some(refresh_token) = refresh_token {
                renewed_access_token = self.renew(refresh_token, timeout).await;
                access_token = renewed_access_token.clone();
            }
        }

        let Some(access_token) = access_token else {
            debug!(
                target: "loglens::session",
                path = %request.path,
                had_refresh_token = refresh_token.is_some(),
                "no usable access token"
            );
            return Execution::auth_missing(refresh_token.is_some());
        };

        let mut response = match self
            .backend
            .send_authenticated(request, &access_token, timeout)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                warn!(target: "loglens::session", path = %request.path, error = %err, "backend request failed");
                return Execution::transport_failure(err);
            }
        };

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Some(refresh_token) = refresh_token {
                if let Some(token) = self.renew(refresh_token, timeout).await {
                    response = match self.backend.send_authenticated(request, &token, timeout).await {
                        Ok(response) => response,
                        Err(err) => {
                            warn!(
                                target: "loglens::session",
                                path = %request.path,
                                error = %err,
                                "backend retry after renewal failed"
                            );
                            return Execution::transport_failure(err);
                        }
                    };
                    renewed_access_token = Some(token);
                }
            }
        }

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!(target: "loglens::session", path = %request.path, "backend rejected session");
        }
        Execution {
            outcome: ExecutionOutcome::Authenticated(response),
            mutation: SessionMutation::finalize(status, renewed_access_token),
        }
    }

    async fn renew(&self, refresh_token: &str, timeout: Duration) -> Option<String> {
        let renewed = self
            .backend
            .refresh_access_token(refresh_token, timeout)
            .await;
        let outcome = if renewed.is_some() { "renewed" } else { "failed" };
        metrics::SESSION_RENEWALS.with_label_values(&[outcome]).inc();
        debug!(target: "loglens::session", outcome, "access token renewal attempted");
        renewed
    }
}
