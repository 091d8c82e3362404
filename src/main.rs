use anyhow::{Context, Result};
use flipbook_server::{config::AppConfig, create_app};
use std::io::ErrorKind;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config ---
    let cfg = AppConfig::from_env_and_args()?;

    tracing::info!("Starting flipbook-server with config: {:?}", cfg);

    // --- Ensure working directories exist ---
    for dir in [&cfg.output_dir, &cfg.upload_dir] {
        if !dir.exists() {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating {}", dir.display()))?;
            tracing::info!("Created directory at {}", dir.display());
        }
    }
    if !cfg.template_dir.is_dir() {
        tracing::warn!(
            "Template directory {} is missing; uploads will fail until it exists",
            cfg.template_dir.display()
        );
    }

    // --- Build router ---
    let addr = cfg.addr();
    let wildcard_host = matches!(cfg.host.as_str(), "0.0.0.0" | "::");
    let port = cfg.port;
    let app = create_app(cfg);

    // --- Start server ---
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) if err.kind() == ErrorKind::PermissionDenied && wildcard_host => {
            let fallback_addr = format!("127.0.0.1:{}", port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
