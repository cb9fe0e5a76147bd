//! Records persisted by the store and shared with the API layer.

use serde::Serialize;

/// Partitions the single `videos` table into the two lists the app shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Category {
    Subscription,
    WatchLater,
}

impl Category {
    /// Value stored in the `category` column.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscription => "Subscription",
            Self::WatchLater => "WatchLater",
        }
    }

    pub fn from_column(value: &str) -> Option<Self> {
        match value {
            "Subscription" => Some(Self::Subscription),
            "WatchLater" => Some(Self::WatchLater),
            _ => None,
        }
    }

    /// Parses the category segment used in URLs (`subscriptions`, `watch-later`).
    pub fn from_path(value: &str) -> Option<Self> {
        match value {
            "subscriptions" => Some(Self::Subscription),
            "watch-later" => Some(Self::WatchLater),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortType {
    DateAscending,
    DateDescending,
    AddedAscending,
    AddedDescending,
    Channel,
}

impl SortType {
    pub fn from_path(value: &str) -> Option<Self> {
        match value {
            "date-ascending" => Some(Self::DateAscending),
            "date-descending" => Some(Self::DateDescending),
            "added-ascending" => Some(Self::AddedAscending),
            "added-descending" => Some(Self::AddedDescending),
            "channel" => Some(Self::Channel),
            _ => None,
        }
    }
}

/// A followed channel. `last_modified` is the sync watermark: the publish
/// time (Unix seconds) of the newest upload already stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    pub channel_id: String,
    pub name: String,
    pub last_modified: i64,
}

impl Channel {
    /// A freshly subscribed channel; watermark 0 pulls the whole feed on the
    /// first sync.
    pub fn new(channel_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            name: name.into(),
            last_modified: 0,
        }
    }
}

/// Duration recorded when the video page could not be scraped.
pub const UNKNOWN_LENGTH: i64 = -1;

/// A stored video row. `id` is the surrogate key assigned by the store; the
/// external `video_id` is not unique (premieres and re-edits can repeat it).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Video {
    pub id: i64,
    pub video_id: String,
    pub channel_id: String,
    pub uploader_name: String,
    pub title: String,
    pub time_published: i64,
    pub time_added: i64,
    pub category: Category,
    pub length_seconds: i64,
}

impl Video {
    pub fn url(&self) -> String {
        watch_url(&self.video_id)
    }

    pub fn thumbnail_url(&self) -> String {
        format!("https://i.ytimg.com/vi/{}/maxresdefault.jpg", self.video_id)
    }
}

/// A video that has not been written yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVideo {
    pub video_id: String,
    pub channel_id: String,
    pub uploader_name: String,
    pub title: String,
    pub time_published: i64,
    pub time_added: i64,
    pub category: Category,
    pub length_seconds: i64,
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

pub fn channel_url(channel_id: &str) -> String {
    format!("https://www.youtube.com/channel/{channel_id}")
}

/// Orders videos in place. Sorting is stable so ties keep store order.
pub fn sort_videos(videos: &mut [Video], sort: SortType) {
    match sort {
        SortType::DateAscending => videos.sort_by_key(|video| video.time_published),
        SortType::DateDescending => {
            videos.sort_by(|a, b| b.time_published.cmp(&a.time_published))
        }
        SortType::AddedAscending => videos.sort_by_key(|video| video.time_added),
        SortType::AddedDescending => videos.sort_by(|a, b| b.time_added.cmp(&a.time_added)),
        SortType::Channel => videos.sort_by(|a, b| a.channel_id.cmp(&b.channel_id)),
    }
}
