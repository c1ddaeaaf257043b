pub mod config;
pub mod metrics;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod state;
pub mod telemetry;

pub use config::AppConfig;
pub use routes::build_router;
pub use state::AppState;
