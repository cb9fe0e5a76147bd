//! Error taxonomy shared by the fetcher, parsers and the sync engine.

use thiserror::Error;

/// Failure to retrieve a page from upstream.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("reading body of {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: std::io::Error,
    },
}

/// A channel feed that cannot be trusted. Any of these aborts the sync of
/// the channel the feed belongs to.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("malformed feed XML: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("response is not an Atom feed")]
    NotAFeed,

    #[error("feed entry #{index} has no yt:videoId element")]
    MissingVideoId { index: usize },

    #[error("feed entry {video_id} has no publish time")]
    MissingPublished { video_id: String },

    #[error("feed entry {video_id} has an unreadable publish time {value:?}")]
    InvalidPublished { video_id: String, value: String },
}

/// Why a video or channel page could not be turned into metadata.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("{0} not present in page markup")]
    MarkerMissing(&'static str),

    #[error("embedded player response is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("field {0} missing or unreadable")]
    MissingField(&'static str),
}

/// Errors surfaced by [`crate::sync::SyncEngine`].
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("channel {0} is already subscribed")]
    AlreadySubscribed(String),

    #[error("channel {target} could not be resolved: {source}")]
    ChannelUnavailable {
        target: String,
        #[source]
        source: ScrapeError,
    },

    #[error("video {video_id} could not be resolved: {source}")]
    VideoUnavailable {
        video_id: String,
        #[source]
        source: ScrapeError,
    },

    #[error("video {0} is already in watch later")]
    AlreadyInWatchLater(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_status_display_includes_url_and_code() {
        let err = FetchError::Status {
            url: "https://example.test/feed".into(),
            status: 404,
        };
        assert_eq!(
            err.to_string(),
            "GET https://example.test/feed returned HTTP 404"
        );
    }

    #[test]
    fn feed_error_converts_into_sync_error() {
        let err: SyncError = FeedError::MissingVideoId { index: 2 }.into();
        assert!(matches!(
            err,
            SyncError::Feed(FeedError::MissingVideoId { index: 2 })
        ));
        assert_eq!(err.to_string(), "feed entry #2 has no yt:videoId element");
    }

    #[test]
    fn storage_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("disk full").context("committing batch");
        let err = SyncError::from(inner);
        assert_eq!(err.to_string(), "storage failure: committing batch: disk full");
    }
}
