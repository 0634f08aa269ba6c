//! Upscale service entry point: HTTP server or standalone worker.

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

use upscale_server::services::{build_server, build_worker};

mod cli;
mod tracing_setup;

use cli::CliArgs;
use tracing_setup::install_tracing_from_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    if args.help_requested {
        CliArgs::print_help();
        return Ok(());
    }

    // Resolve config path: CLI > environment variable
    let config_path = args
        .config_path
        .or_else(|| std::env::var("UPSCALE_CONFIG_PATH").ok());

    let config = load_config(config_path.as_deref())?;
    install_tracing_from_config(&config.logging);
    tracing::info!(config_path = ?config_path, worker = args.worker, "configuration loaded");

    if args.worker {
        run_worker(&config).await
    } else {
        run_server(&config).await
    }
}

/// Load and validate configuration from file (if any) and environment.
fn load_config(path: Option<&str>) -> anyhow::Result<upscale_config::Config> {
    let config = upscale_config::load_config(path)
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))?;
    upscale_config::validate_config(&config)
        .map_err(|e| anyhow::anyhow!("invalid configuration: {e}"))?;
    Ok(config)
}

async fn run_server(config: &upscale_config::Config) -> anyhow::Result<()> {
    let services = build_server(config).await?;

    let (worker_stop, worker_task) = match services.embedded_worker {
        Some(pool) => {
            let (tx, rx) = oneshot::channel::<()>();
            let task = tokio::spawn(pool.run_until(async move {
                let _ = rx.await;
            }));
            (Some(tx), Some(task))
        }
        None => (None, None),
    };

    let app = upscale_server::build_router_with_limit(
        services.state,
        config.server.max_content_length,
    );
    let (host, port) = (config.server.host.as_str(), config.server.port);
    let listener = TcpListener::bind((host, port))
        .await
        .with_context(|| format!("failed to bind {host}:{port}"))?;
    tracing::info!(addr = %listener.local_addr()?, "server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let (Some(tx), Some(task)) = (worker_stop, worker_task) {
        let _ = tx.send(());
        if let Err(e) = task.await {
            tracing::error!(error = %e, "embedded worker pool panicked");
        }
    }
    for task in services.background {
        task.abort();
    }
    tracing::info!("server stopped");
    Ok(())
}

async fn run_worker(config: &upscale_config::Config) -> anyhow::Result<()> {
    let (pool, background) = build_worker(config).await?;
    pool.run_until(shutdown_signal()).await;
    for task in background {
        task.abort();
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}
