use anyhow::{Context, Result};
use starface_core::ArtifactStore;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod http;

use config::Config;
use http::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load().context("loading configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starfaced starting");

    let artifacts_dir = config.pipeline.artifacts_dir.clone();
    let timeout = config.request_timeout();

    // A failed load keeps the server up in degraded mode so /health can report it.
    let state = match ArtifactStore::load(&config.pipeline) {
        Ok(artifacts) => {
            let engine = engine::spawn_engine(artifacts, config.workers)?;
            AppState::ready(engine, artifacts_dir, timeout)
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to load artifacts; classification disabled");
            AppState::degraded(err.to_string(), artifacts_dir, timeout)
        }
    };

    let app = http::router(state, config.max_request_bytes, &config.allowed_origins);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;

    tracing::info!(addr = %config.bind_addr, "starfaced ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("starfaced shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
