mod activity;
mod config;
mod db;
mod error;
mod extract;
mod llm;
mod models;
mod password;
mod routes;
mod scheduling;
mod validation;

use std::{sync::Arc, time::Duration};

use crate::{config::Config, llm::OpenAiClient, models::AppState};

use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use axum::http::{header, HeaderValue};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cfg = Config::from_env()?;
    let pool = db::connect_mysql(&cfg).await?;
    db::init_schema(&pool).await?;
    if cfg.seed_default_data {
        db::seed_defaults(&pool, &cfg).await?;
    }

    if cfg.openai_api_key.is_none() {
        tracing::warn!("OPENAI_API_KEY not set; AI endpoints will answer 503");
    }
    let llm = OpenAiClient::new(
        cfg.openai_base_url.clone(),
        cfg.openai_api_key.clone(),
        cfg.openai_model.clone(),
        Duration::from_secs(cfg.openai_timeout_secs),
    )?;

    let state = AppState {
        db: pool,
        llm: Arc::new(llm),
    };

    let origin = match cfg.cors_allowed_origin.as_deref() {
        Some(o) => AllowOrigin::exact(HeaderValue::from_str(o)?),
        None => AllowOrigin::from(Any),
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let app = routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!("Listening on http://{}", cfg.bind_addr);
    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {e}");
    }
    tracing::info!("shutting down");
}
