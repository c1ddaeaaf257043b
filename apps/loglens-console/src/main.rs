use std::net::SocketAddr;

use anyhow::Context;
use loglens_console::{build_router, telemetry, AppConfig, AppState};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cfg = AppConfig::from_env();
    telemetry::init_tracing(&cfg);

    let state = AppState::new(&cfg).context("invalid backend configuration")?;
    let app = build_router(state);

    let addr: SocketAddr = cfg.bind_addr.parse()?;
    info!(
        backend = %cfg.backend_internal_url,
        environment = %cfg.app_env,
        "Starting LogLens console on {addr}"
    );
    axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        app.into_make_service(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("LogLens console stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
