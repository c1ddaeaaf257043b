use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_backend_url")]
    pub backend_internal_url: String,
    #[serde(default)]
    pub log_filter: Option<String>,
    #[serde(default = "default_app_env")]
    pub app_env: String,
    #[serde(default = "default_proxy_timeout_ms")]
    pub proxy_timeout_ms: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            backend_internal_url: default_backend_url(),
            log_filter: None,
            app_env: default_app_env(),
            proxy_timeout_ms: default_proxy_timeout_ms(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()
            .and_then(|c| c.try_deserialize())
            .map(AppConfig::normalize)
            .unwrap_or_else(|_| AppConfig::default().normalize())
    }

    fn normalize(mut self) -> Self {
        self.log_filter = normalize_opt(self.log_filter.take());
        self.app_env = self.app_env.trim().to_ascii_lowercase();
        if self.app_env.is_empty() {
            self.app_env = default_app_env();
        }
        self.backend_internal_url = self.backend_internal_url.trim().to_string();
        if self.backend_internal_url.is_empty() {
            self.backend_internal_url = default_backend_url();
        }
        if self.proxy_timeout_ms == 0 {
            self.proxy_timeout_ms = default_proxy_timeout_ms();
        }
        self
    }

    pub fn is_production(&self) -> bool {
        matches!(self.app_env.as_str(), "production" | "prod")
    }

    pub fn proxy_timeout(&self) -> Duration {
        Duration::from_millis(self.proxy_timeout_ms)
    }

    pub fn log_filter(&self) -> &str {
        self.log_filter
            .as_deref()
            .unwrap_or("info,loglens_console=debug")
    }
}

fn normalize_opt(value: Option<String>) -> Option<String> {
    value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_backend_url() -> String {
    "http://backend:8000".to_string()
}

fn default_app_env() -> String {
    "dev".to_string()
}

fn default_proxy_timeout_ms() -> u64 {
    15_000
}
