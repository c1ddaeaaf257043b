use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::AppConfig;

/// `RUST_LOG` wins over the configured filter. Production logs are compact and uncolored.
pub fn init_tracing(config: &AppConfig) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_filter()))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let production = config.is_production();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(!production);

    let registry = Registry::default().with(env_filter);
    if production {
        registry.with(fmt_layer.compact()).init();
    } else {
        registry.with(fmt_layer).init();
    }
}
