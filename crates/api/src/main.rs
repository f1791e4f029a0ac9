use anyhow::Context;

use wallet_infra::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    wallet_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = wallet_api::app::services::build_services(&config)
        .await
        .context("failed to initialise storage")?;
    let app = wallet_api::app::build_app(services);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
