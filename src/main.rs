mod app;
mod auth;
mod config;
mod db;
mod error;
mod state;

use anyhow::Context;

use crate::{config::AppConfig, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "neighborly=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = AppConfig::from_env().context("load configuration")?;
    tracing::info!(env = ?config.env, issuer = %config.jwt.issuer, "configuration loaded");

    let app_state = AppState::init(config)
        .await
        .context("initialize postgres pool")?;
    app_state
        .users
        .ensure_schema()
        .await
        .context("ensure users table")?;

    let (host, port) = (app_state.config.host.clone(), app_state.config.port);
    let pools = app_state.pools.clone();
    let result = app::serve(app::build_app(app_state), &host, port).await;
    pools.release().await;
    result
}
