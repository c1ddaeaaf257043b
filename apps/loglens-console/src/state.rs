use std::sync::Arc;

use axum::extract::FromRef;

use crate::config::AppConfig;
use crate::session::{BackendClient, BackendError, CookiePolicy, SessionExecutor};

#[derive(Clone)]
pub struct AppState {
    executor: SessionExecutor,
    cookie_policy: CookiePolicy,
    environment: Arc<str>,
}

impl AppState {
    pub fn new(config: &AppConfig) -> Result<Self, BackendError> {
        let backend = BackendClient::new(&config.backend_internal_url)?;
        Ok(Self {
            executor: SessionExecutor::new(backend, config.proxy_timeout()),
            cookie_policy: CookiePolicy {
                secure: config.is_production(),
            },
            environment: Arc::from(config.app_env.as_str()),
        })
    }

    pub fn executor(&self) -> &SessionExecutor {
        &self.executor
    }

    pub fn backend(&self) -> &BackendClient {
        self.executor.backend()
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }
}

impl FromRef<AppState> for CookiePolicy {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_policy
    }
}
