#![forbid(unsafe_code)]

//! HTTP API for browsing subscriptions and triggering syncs.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use subfeed::{
    api::{self, AppState},
    config::{CliArgs, resolve_settings},
    fetcher::HttpFetcher,
    logging,
    store::SubscriptionStore,
    sync::SyncEngine,
};
use tokio::signal;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(version, about = "Serve the subscription feed over HTTP")]
struct ServerArgs {
    #[command(flatten)]
    common: CliArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = ServerArgs::parse();
    let settings = resolve_settings(args.common.into())?;
    logging::init(&settings.log_level);

    let store = SubscriptionStore::open(&settings.db_path)
        .await
        .context("initializing subscription database")?;
    let fetcher = Arc::new(HttpFetcher::new(&settings.user_agent));
    let engine = SyncEngine::new(store, fetcher).with_concurrency(settings.sync_concurrency);
    let app = api::router(AppState::new(engine));

    let addr = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    info!(
        %addr,
        db = %settings.db_path.display(),
        "API server listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    info!("API server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        warn!(error = %err, "failed to install Ctrl+C handler");
    }
}
