//! Watch-page scraper.
//!
//! The watch page carries a `<script>` that assigns one large JSON object to
//! `ytInitialPlayerResponse`. We cut that object out with a regex and read
//! `videoDetails` from it; the rest of the markup is ignored.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;
use crate::fetcher::PageFetcher;
use crate::models::watch_url;

static PLAYER_RESPONSE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?s)<script[^>]*>\s*var ytInitialPlayerResponse\s*=\s*(\{.*?\})\s*;\s*(?:var\s|</script>)",
    )
    .expect("player response pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    pub video_id: String,
    pub channel_id: String,
    /// Uploader display name.
    pub author: String,
    pub title: String,
    pub short_description: String,
    pub length_seconds: i64,
    /// Unix seconds, when the page states a publish date.
    pub published_at: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerResponse {
    video_details: Option<VideoDetails>,
    microformat: Option<Microformat>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Microformat {
    player_microformat_renderer: Option<MicroformatRenderer>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MicroformatRenderer {
    publish_date: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoDetails {
    channel_id: Option<String>,
    title: Option<String>,
    author: Option<String>,
    short_description: Option<String>,
    // Upstream encodes the number as a string.
    length_seconds: Option<String>,
}

pub fn scrape_video(fetcher: &dyn PageFetcher, video_id: &str) -> Result<VideoMetadata, ScrapeError> {
    let html = fetcher.fetch(&watch_url(video_id))?;
    parse_video_page(video_id, &html)
}

pub fn parse_video_page(video_id: &str, html: &str) -> Result<VideoMetadata, ScrapeError> {
    let json = PLAYER_RESPONSE
        .captures(html)
        .and_then(|captures| captures.get(1))
        .ok_or(ScrapeError::MarkerMissing("ytInitialPlayerResponse"))?
        .as_str();

    let response: PlayerResponse = serde_json::from_str(json)?;
    let details = response
        .video_details
        .ok_or(ScrapeError::MissingField("videoDetails"))?;

    let channel_id = details
        .channel_id
        .filter(|value| !value.is_empty())
        .ok_or(ScrapeError::MissingField("videoDetails.channelId"))?;
    let title = details
        .title
        .ok_or(ScrapeError::MissingField("videoDetails.title"))?;
    let length_seconds = details
        .length_seconds
        .and_then(|value| value.trim().parse::<i64>().ok())
        .ok_or(ScrapeError::MissingField("videoDetails.lengthSeconds"))?;

    let published_at = response
        .microformat
        .and_then(|microformat| microformat.player_microformat_renderer)
        .and_then(|renderer| renderer.publish_date)
        .and_then(|value| parse_publish_date(&value));

    Ok(VideoMetadata {
        video_id: video_id.to_owned(),
        channel_id,
        author: details.author.unwrap_or_default(),
        title,
        short_description: details.short_description.unwrap_or_default(),
        length_seconds,
        published_at,
    })
}

/// Accepts both the full RFC 3339 form and the bare `YYYY-MM-DD` form the
/// microformat has used over time.
fn parse_publish_date(value: &str) -> Option<i64> {
    if let Ok(time) = DateTime::parse_from_rfc3339(value) {
        return Some(time.timestamp());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|time| time.and_utc().timestamp())
}


#[cfg(test)]
mod tests {
    use super::testing::watch_page;
    use super::*;
    use crate::fetcher::testing::ScriptedFetcher;

    #[test]
    fn extracts_details_from_player_response() {
        let html = watch_page("UCchan", "A video", 754);
        let metadata = parse_video_page("vid1", &html).unwrap();
        assert_eq!(
            metadata,
            VideoMetadata {
                video_id: "vid1".into(),
                channel_id: "UCchan".into(),
                author: "Uploader Name".into(),
                title: "A video".into(),
                short_description: "A short description".into(),
                length_seconds: 754,
                published_at: Some(1_709_316_000),
            }
        );
    }

    #[test]
    fn stops_at_the_first_statement_terminator() {
        let html = r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"channelId":"UC1","title":"t","lengthSeconds":"5"}};var meta = document.createElement('meta');</script>"#;
        let metadata = parse_video_page("v", html).unwrap();
        assert_eq!(metadata.length_seconds, 5);
        assert_eq!(metadata.short_description, "");
        assert_eq!(metadata.published_at, None);
    }

    #[test]
    fn publish_date_accepts_bare_dates() {
        assert_eq!(parse_publish_date("1970-01-02"), Some(86_400));
        assert_eq!(parse_publish_date("1970-01-01T01:00:00+01:00"), Some(0));
        assert_eq!(parse_publish_date("last week"), None);
    }

    #[test]
    fn missing_marker_is_reported() {
        let err = parse_video_page("v", "<html><body>consent wall</body></html>").unwrap_err();
        assert!(matches!(err, ScrapeError::MarkerMissing(_)), "{err:?}");
    }

    #[test]
    fn unreadable_length_is_reported() {
        let html = r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"channelId":"UC1","title":"t","lengthSeconds":"soon"}};</script>"#;
        let err = parse_video_page("v", html).unwrap_err();
        assert!(
            matches!(err, ScrapeError::MissingField("videoDetails.lengthSeconds")),
            "{err:?}"
        );
    }

    #[test]
    fn playability_error_without_details_is_reported() {
        let html = r#"<script>var ytInitialPlayerResponse = {"playabilityStatus":{"status":"ERROR"}};</script>"#;
        let err = parse_video_page("v", html).unwrap_err();
        assert!(matches!(err, ScrapeError::MissingField("videoDetails")), "{err:?}");
    }

    #[test]
    fn scrape_video_fetches_the_watch_page() {
        let fetcher = ScriptedFetcher::new();
        fetcher.page(watch_url("abc"), watch_page("UCx", "Title", 60));

        let metadata = scrape_video(&fetcher, "abc").unwrap();
        assert_eq!(metadata.channel_id, "UCx");
        assert_eq!(fetcher.requests(), [watch_url("abc")]);

        let err = scrape_video(&fetcher, "missing").unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch(_)));
    }
}
