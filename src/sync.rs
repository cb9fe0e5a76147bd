//! The refresh pipeline and the subscription operations built around it.
//!
//! A channel sync reads the channel's Atom feed, keeps the entries published
//! strictly after the stored watermark, enriches them oldest-first with the
//! duration scraped from each watch page and commits the batch together with
//! the new watermark in one transaction. A failed feed fetch or an unusable
//! feed leaves the database untouched; a failed video scrape only costs that
//! video its duration.
//!
//! At most one sync runs per channel at a time. Different channels are
//! independent and [`SyncEngine::sync_all`] may run several of them at once.
//! Adding a video to watch later is serialized per video id the same way.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{FetchError, ScrapeError, SyncError};
use crate::feed::{FeedEntry, ParsedFeed, feed_url, parse_feed};
use crate::fetcher::PageFetcher;
use crate::models::{Category, Channel, NewVideo, UNKNOWN_LENGTH, Video, channel_url, watch_url};
use crate::scrape::{self, ChannelInfo, VideoMetadata};
use crate::store::SubscriptionStore;

/// What a successful single-channel sync did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub channel_id: String,
    pub new_videos: usize,
    pub watermark: i64,
}

/// Result of one channel inside [`SyncEngine::sync_all`].
#[derive(Debug)]
pub struct ChannelOutcome {
    pub channel_id: String,
    pub result: Result<SyncReport, SyncError>,
}

type GuardMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone)]
pub struct SyncEngine {
    store: SubscriptionStore,
    fetcher: Arc<dyn PageFetcher>,
    channel_guards: Arc<parking_lot::Mutex<GuardMap>>,
    video_guards: Arc<parking_lot::Mutex<GuardMap>>,
    concurrency: usize,
}

impl SyncEngine {
    pub fn new(store: SubscriptionStore, fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            store,
            fetcher,
            channel_guards: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            video_guards: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            concurrency: 1,
        }
    }

    /// Number of channels [`Self::sync_all`] refreshes at once. `1` keeps the
    /// plain one-after-another loop.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &SubscriptionStore {
        &self.store
    }

    /// Runs blocking fetcher work off the async runtime.
    async fn blocking<T, E, F>(&self, url: String, work: F) -> Result<T, E>
    where
        T: Send + 'static,
        E: From<FetchError> + Send + 'static,
        F: FnOnce(&dyn PageFetcher) -> Result<T, E> + Send + 'static,
    {
        let fetcher = Arc::clone(&self.fetcher);
        match tokio::task::spawn_blocking(move || work(fetcher.as_ref())).await {
            Ok(result) => result,
            Err(join_error) => Err(FetchError::Transport {
                url,
                message: format!("fetch task did not complete: {join_error}"),
            }
            .into()),
        }
    }

    pub async fn fetch_feed(&self, channel_id: &str) -> Result<ParsedFeed, SyncError> {
        let url = feed_url(channel_id);
        self.blocking(url.clone(), move |fetcher| {
            let xml = fetcher.fetch(&url)?;
            Ok(parse_feed(&xml)?)
        })
        .await
    }

    pub async fn scrape_video(&self, video_id: &str) -> Result<VideoMetadata, ScrapeError> {
        let video_id = video_id.to_owned();
        self.blocking(watch_url(&video_id), move |fetcher| {
            scrape::scrape_video(fetcher, &video_id)
        })
        .await
    }

    pub async fn scrape_channel(&self, channel_url: &str) -> Result<ChannelInfo, ScrapeError> {
        let url = channel_url.to_owned();
        self.blocking(url.clone(), move |fetcher| scrape::scrape_channel(fetcher, &url))
            .await
    }

    fn channel_guard(&self, channel_id: &str) -> Arc<AsyncMutex<()>> {
        keyed_guard(&self.channel_guards, channel_id)
    }

    fn video_guard(&self, video_id: &str) -> Arc<AsyncMutex<()>> {
        keyed_guard(&self.video_guards, video_id)
    }

    /// Refreshes one channel. Returns `Ok(None)` when the channel is not
    /// subscribed.
    pub async fn sync_channel(&self, channel_id: &str) -> Result<Option<SyncReport>, SyncError> {
        let guard = self.channel_guard(channel_id);
        let _running = guard.lock().await;

        // Read under the guard so the watermark reflects any sync that just
        // finished.
        let Some(channel) = self.store.get_channel(channel_id).await? else {
            debug!(channel_id, "sync requested for unknown channel");
            return Ok(None);
        };

        let feed = self.fetch_feed(channel_id).await.inspect_err(|err| {
            warn!(channel_id, error = %err, "feed unavailable, channel left unchanged");
        })?;

        let mut fresh: Vec<FeedEntry> = feed
            .entries
            .into_iter()
            .filter(|entry| entry.published_at > channel.last_modified)
            .collect();
        // The feed lists newest first.
        fresh.reverse();

        if fresh.is_empty() {
            debug!(channel_id, watermark = channel.last_modified, "no new uploads");
            return Ok(Some(SyncReport {
                channel_id: channel.channel_id,
                new_videos: 0,
                watermark: channel.last_modified,
            }));
        }

        let mut watermark = channel.last_modified;
        let mut batch = Vec::with_capacity(fresh.len());
        for entry in fresh {
            batch.push(self.enrich(&channel, &entry).await);
            if entry.published_at > watermark {
                watermark = entry.published_at;
            }
        }

        self.store
            .commit_sync_batch(&channel.channel_id, &batch, watermark)
            .await?;
        info!(
            channel_id,
            new_videos = batch.len(),
            watermark,
            "channel synced"
        );

        Ok(Some(SyncReport {
            channel_id: channel.channel_id,
            new_videos: batch.len(),
            watermark,
        }))
    }

    async fn enrich(&self, channel: &Channel, entry: &FeedEntry) -> NewVideo {
        let (title, length_seconds) = match self.scrape_video(&entry.video_id).await {
            Ok(metadata) => {
                let title = if entry.title.is_empty() {
                    metadata.title
                } else {
                    entry.title.clone()
                };
                (title, metadata.length_seconds)
            }
            Err(err) => {
                warn!(
                    channel_id = %channel.channel_id,
                    video_id = %entry.video_id,
                    error = %err,
                    "video page unusable, storing without duration"
                );
                (entry.title.clone(), UNKNOWN_LENGTH)
            }
        };

        NewVideo {
            video_id: entry.video_id.clone(),
            channel_id: channel.channel_id.clone(),
            uploader_name: channel.name.clone(),
            title,
            time_published: entry.published_at,
            time_added: Utc::now().timestamp(),
            category: Category::Subscription,
            length_seconds,
        }
    }

    /// Refreshes every stored channel. A failing channel is reported in its
    /// outcome and never stops the others. Outcomes follow the store's
    /// channel order.
    pub async fn sync_all(&self) -> Result<Vec<ChannelOutcome>, SyncError> {
        let channels = self.store.get_all_channels().await?;
        info!(
            channels = channels.len(),
            concurrency = self.concurrency,
            "syncing all channels"
        );

        let mut outcomes: Vec<Option<ChannelOutcome>> = Vec::with_capacity(channels.len());
        if self.concurrency <= 1 {
            for channel in channels {
                let result = self.sync_channel(&channel.channel_id).await;
                outcomes.push(into_outcome(channel.channel_id, result));
            }
        } else {
            outcomes.resize_with(channels.len(), || None);
            let permits = Arc::new(Semaphore::new(self.concurrency));
            let mut tasks = JoinSet::new();
            for (index, channel) in channels.into_iter().enumerate() {
                let engine = self.clone();
                let permits = Arc::clone(&permits);
                tasks.spawn(async move {
                    let _permit = permits.acquire_owned().await;
                    let result = engine.sync_channel(&channel.channel_id).await;
                    (index, channel.channel_id, result)
                });
            }
            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok((index, channel_id, result)) => {
                        outcomes[index] = into_outcome(channel_id, result);
                    }
                    Err(join_error) => error!(error = %join_error, "channel sync task failed"),
                }
            }
        }

        let outcomes: Vec<ChannelOutcome> = outcomes.into_iter().flatten().collect();
        let failed = outcomes.iter().filter(|outcome| outcome.result.is_err()).count();
        info!(synced = outcomes.len() - failed, failed, "sync of all channels finished");
        Ok(outcomes)
    }

    /// Follows the channel with this id. The channel page must resolve,
    /// otherwise nothing is stored.
    /// The channel is stored under the requested id even if the page names
    /// a different canonical one.
    pub async fn subscribe(&self, channel_id: &str) -> Result<Channel, SyncError> {
        if self.store.get_channel(channel_id).await?.is_some() {
            return Err(SyncError::AlreadySubscribed(channel_id.to_owned()));
        }
        let info = self
            .scrape_channel(&channel_url(channel_id))
            .await
            .map_err(|source| SyncError::ChannelUnavailable {
                target: channel_id.to_owned(),
                source,
            })?;
        if info.channel_id != channel_id {
            debug!(
                channel_id,
                canonical = %info.channel_id,
                "channel page names another id, keeping the requested one"
            );
        }
        self.register(ChannelInfo {
            channel_id: channel_id.to_owned(),
            ..info
        })
        .await
    }

    /// Follows the channel behind any channel URL, including `@handle` and
    /// custom URLs.
    pub async fn subscribe_by_url(&self, url: &str) -> Result<Channel, SyncError> {
        let info = self
            .scrape_channel(url)
            .await
            .map_err(|source| SyncError::ChannelUnavailable {
                target: url.to_owned(),
                source,
            })?;
        self.register(info).await
    }

    async fn register(&self, info: ChannelInfo) -> Result<Channel, SyncError> {
        let channel = Channel::new(info.channel_id, info.name);
        if !self.store.add_channel(&channel).await? {
            return Err(SyncError::AlreadySubscribed(channel.channel_id));
        }
        info!(
            channel_id = %channel.channel_id,
            name = %channel.name,
            handle = info.handle.as_deref().unwrap_or("-"),
            "subscribed"
        );
        Ok(channel)
    }

    /// Drops the channel and its subscription videos. Watch-later videos from
    /// the channel are kept. Returns `false` when it was not subscribed.
    pub async fn unsubscribe(&self, channel_id: &str) -> Result<bool, SyncError> {
        let guard = self.channel_guard(channel_id);
        let _running = guard.lock().await;
        let removed = self
            .store
            .remove_channel_cascade(channel_id, Category::Subscription)
            .await?;
        if removed {
            info!(channel_id, "unsubscribed");
        }
        Ok(removed)
    }

    /// Deletes every stored copy of the video. Returns `false` when none
    /// existed.
    pub async fn delete_video(&self, video_id: &str) -> Result<bool, SyncError> {
        let removed = self.store.remove_videos_by_external_id(video_id).await?;
        debug!(video_id, removed, "deleted video rows");
        Ok(removed > 0)
    }

    /// Scrapes the watch page and files the video under watch later,
    /// attributed to its uploader.
    pub async fn add_to_watch_later(&self, video_id: &str) -> Result<Video, SyncError> {
        // Held across check, scrape and insert so a concurrent request for
        // the same id sees the stored row.
        let guard = self.video_guard(video_id);
        let _adding = guard.lock().await;
        if self.store.has_video(video_id, Category::WatchLater).await? {
            return Err(SyncError::AlreadyInWatchLater(video_id.to_owned()));
        }
        let metadata = self
            .scrape_video(video_id)
            .await
            .map_err(|source| SyncError::VideoUnavailable {
                video_id: video_id.to_owned(),
                source,
            })?;

        let now = Utc::now().timestamp();
        let video = NewVideo {
            video_id: metadata.video_id,
            channel_id: metadata.channel_id,
            uploader_name: metadata.author,
            title: metadata.title,
            time_published: metadata.published_at.unwrap_or(now),
            time_added: now,
            category: Category::WatchLater,
            length_seconds: metadata.length_seconds,
        };
        let id = self.store.add_video(&video).await?;
        info!(video_id, channel_id = %video.channel_id, "added to watch later");

        Ok(Video {
            id,
            video_id: video.video_id,
            channel_id: video.channel_id,
            uploader_name: video.uploader_name,
            title: video.title,
            time_published: video.time_published,
            time_added: video.time_added,
            category: video.category,
            length_seconds: video.length_seconds,
        })
    }
}

fn keyed_guard(map: &parking_lot::Mutex<GuardMap>, key: &str) -> Arc<AsyncMutex<()>> {
    let mut guards = map.lock();
    // Entries nobody holds or waits on can go; the map stays bounded by the
    // number of in-flight operations.
    guards.retain(|_, guard| Arc::strong_count(guard) > 1);
    Arc::clone(guards.entry(key.to_owned()).or_default())
}

fn into_outcome(
    channel_id: String,
    result: Result<Option<SyncReport>, SyncError>,
) -> Option<ChannelOutcome> {
    match result {
        Ok(Some(report)) => Some(ChannelOutcome {
            channel_id,
            result: Ok(report),
        }),
        // Unsubscribed while the batch was running.
        Ok(None) => None,
        Err(err) => Some(ChannelOutcome {
            channel_id,
            result: Err(err),
        }),
    }
}
