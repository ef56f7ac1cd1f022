mod args;

use std::{process::ExitCode, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use args::Args;
use clap::Parser as _;
use pm_monitor::{
    api::{AppState, build_router},
    db::new_pool,
    store::{MemoryStore, Store},
    waqi::WaqiClient,
};
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = run().await {
        eprintln!("{e:#}");
        return ExitCode::from(1);
    }

    ExitCode::from(0)
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let store = match &args.database_url {
        Some(url) => Store::Postgres(new_pool(url).await?),
        None => {
            tracing::warn!("DATABASE_URL not set; readings are kept in memory only");
            Store::Memory(MemoryStore::new())
        }
    };

    let waqi = match args.waqi_token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => Some(
            WaqiClient::new(
                &args.waqi_url,
                token,
                Duration::from_secs(args.waqi_timeout_secs),
            )
            .context("failed to initialize WAQI client")?,
        ),
        _ => {
            tracing::info!("WAQI_TOKEN not set; ranking covers devices only");
            None
        }
    };

    let state = Arc::new(AppState {
        store,
        waqi,
        timezone: args.timezone,
    });
    let app = build_router(state);

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;
    tracing::info!(timezone = %args.timezone, "pm-server listening on http://{}", args.listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("pm-server shutdown complete");
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        tracing::error!("failed to install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    tracing::info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install Ctrl+C handler: {e}");
        return std::future::pending().await;
    }
    tracing::info!("shutdown signal received");
}
