#![forbid(unsafe_code)]

//! One-shot refresh of every subscribed channel, meant for cron or a
//! systemd timer. Exits non-zero when any channel failed to sync.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use subfeed::{
    config::{CliArgs, resolve_settings},
    fetcher::HttpFetcher,
    logging,
    store::SubscriptionStore,
    sync::SyncEngine,
};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(version, about = "Sync every subscribed channel once and exit")]
struct RefreshArgs {
    #[command(flatten)]
    common: CliArgs,

    /// Only sync these channel ids instead of every subscription
    #[arg(long = "channel", value_name = "ID")]
    channels: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = RefreshArgs::parse();
    let settings = resolve_settings(args.common.into())?;
    logging::init(&settings.log_level);

    let store = SubscriptionStore::open(&settings.db_path)
        .await
        .context("initializing subscription database")?;
    let fetcher = Arc::new(HttpFetcher::new(&settings.user_agent));
    let engine = SyncEngine::new(store, fetcher).with_concurrency(settings.sync_concurrency);

    let mut failed = 0usize;
    let mut imported = 0usize;
    if args.channels.is_empty() {
        for outcome in engine.sync_all().await? {
            match outcome.result {
                Ok(report) => imported += report.new_videos,
                Err(err) => {
                    error!(channel_id = %outcome.channel_id, error = %err, "channel sync failed");
                    failed += 1;
                }
            }
        }
    } else {
        for channel_id in &args.channels {
            match engine.sync_channel(channel_id).await {
                Ok(Some(report)) => imported += report.new_videos,
                Ok(None) => {
                    error!(channel_id = %channel_id, "not subscribed");
                    failed += 1;
                }
                Err(err) => {
                    error!(channel_id = %channel_id, error = %err, "channel sync failed");
                    failed += 1;
                }
            }
        }
    }

    info!(imported, failed, "refresh finished");
    if failed > 0 {
        bail!("{failed} channel(s) failed to sync");
    }
    Ok(())
}
