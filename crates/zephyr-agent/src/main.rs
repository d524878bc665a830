use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

mod config;
mod console_ws;
mod error;
mod gate;
mod history;
mod hub;
mod line_reader;
mod parser;
mod players;
mod roster;
mod server_info;
mod state;
mod supervisor;
mod support;

fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let default_level = if support::debug_enabled() {
        "debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_dir = std::env::var("ZEPHYR_LOG_DIR")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "zephyr-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _log_guard = init_tracing();

    let config_path = config::config_path_from_env();
    let store = config::ConfigStore::load(&config_path)?;
    let cfg = store.snapshot();
    let addr = cfg.listen_addr()?;

    let ctx = state::AppContext::from_config(Arc::new(store))
        .context("initialize console agent")?;
    let supervisor = ctx.supervisor.clone();

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(
        %addr,
        config = %config_path.display(),
        server_path = %cfg.server_path,
        "zephyr-agent websocket listening"
    );

    axum::serve(listener, console_ws::router(ctx))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve websocket")?;

    if let Err(err) = supervisor.stop().await {
        tracing::warn!(error = %err, "failed to stop server on shutdown");
    }
    Ok(())
}
