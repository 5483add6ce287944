use std::sync::Arc;

use anyhow::Context;

use itemkeep_api::{app, config::AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    itemkeep_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        app::services::build_services(&config).context("failed to start worker pool")?,
    );
    let router = app::build_app(services.clone());

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for ctrl-c: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("server error")?;

    tracing::info!("shutting down worker pool");
    tokio::task::spawn_blocking(move || services.shutdown())
        .await
        .context("worker pool shutdown panicked")?;

    Ok(())
}
