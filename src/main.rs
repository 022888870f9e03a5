mod analysis;
mod config;
mod credential;
mod gemini;
mod logo;
mod models;
mod orchestrator;
mod routes;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::analysis::BrandAnalyzer;
use crate::config::Config;
use crate::credential::{CredentialGate, KeyStore};
use crate::gemini::{GeminiClient, GenerativeModel};
use crate::logo::LogoPainter;
use crate::orchestrator::Orchestrator;
use crate::routes::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Init tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    tracing::info!(
        mode = ?config.key_mode,
        analysis_model = %config.analysis_model,
        image_model = %config.image_model,
        image_size = %config.image_size,
        "Starting {}", models::APP_NAME
    );

    let keys = Arc::new(KeyStore::with_key(config.api_key.clone()));
    let gate = Arc::new(CredentialGate::initialize(config.key_mode, keys.clone()));
    let model: Arc<dyn GenerativeModel> = Arc::new(GeminiClient::new(config.api_base.clone(), keys));
    let orchestrator = Orchestrator::new(
        BrandAnalyzer::new(model.clone(), config.analysis_model.clone()),
        LogoPainter::new(model, config.image_model.clone(), config.image_size.clone()),
    );

    let state = AppState {
        session: Arc::default(),
        gate,
        orchestrator: Arc::new(orchestrator),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(%addr, "Starting server");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("Shutting down");
        })
        .await
        .context("server error")?;
    Ok(())
}
