use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod handlers;
mod metrics;
mod state;

use config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load();
    init_tracing(&config);

    let metrics_handle = metrics::install_recorder();
    let app_state = Arc::new(state::build(&config).await?);
    let auth_config = auth::AuthConfig { api_key: config.api_key.clone().map(Arc::new) };

    let protected_routes = axum::Router::new()
        .route("/chat", post(handlers::chat))
        .route("/stream", post(handlers::stream))
        .layer(middleware::from_fn_with_state(auth_config, auth::require_bearer_token))
        .with_state(app_state.clone());

    let health_routes = axum::Router::new().route("/health", get(handlers::health)).with_state(app_state);

    let metrics_routes = axum::Router::new().route("/metrics", get(handlers::metrics_endpoint)).with_state(metrics_handle);

    let app = axum::Router::new().merge(protected_routes).merge(health_routes).merge(metrics_routes);

    let bind = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    tracing::info!(bind = %bind, providers = ?config::Config::provider_names(), "llmgate listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(config.app_env != "production").init();
}
