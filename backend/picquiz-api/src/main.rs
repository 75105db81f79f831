use std::sync::Arc;

use anyhow::Context;
use picquiz_api::{config::Config, create_router, services::AppState, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let telemetry = telemetry::init("picquiz-api")?;

    tracing::info!("Starting picquiz API");

    let config = Config::load().context("Failed to load configuration")?;
    tracing::info!(
        environment = %config.app_env,
        backend = ?config.storage_backend,
        "Configuration loaded"
    );
    if !config.workflow.api_key.as_deref().is_some_and(|key| !key.is_empty()) {
        tracing::warn!("COZE_API_KEY is not set; question generation is disabled");
    }

    let bind_addr = config.bind_addr.clone();
    let app_state = Arc::new(
        AppState::new(config)
            .await
            .context("Failed to initialize application state")?,
    );

    let app = create_router(app_state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    tracing::info!("Server listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    telemetry.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
