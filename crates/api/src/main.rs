use std::sync::Arc;

use anyhow::Context;

use tollgate_api::app::{build_app, build_services};
use tollgate_api::config::ApiConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ApiConfig::from_env().context("invalid configuration")?;

    tollgate_observability::init(config.log_format);
    for warning in config.warnings() {
        tracing::warn!("{warning}");
    }

    let services = Arc::new(build_services(&config).await?);

    let scheduler = config
        .scheduler()
        .spawn(services.ledger.clone(), services.clock.clone());

    let app = build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    scheduler.shutdown().await;
    tracing::info!("shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
