//! Parser for the Atom feed YouTube publishes for every channel.
//!
//! Only three things are read per `<entry>`: the `yt:videoId` extension, the
//! entry title and the `<published>` timestamp. Entries are returned in feed
//! order, which upstream keeps newest-first; nothing here re-sorts them.
//!
//! A document whose root is not `<feed>`, including an empty body or a
//! consent page served with status 200, is rejected.
//!
//! An entry without a video id makes the whole feed unusable. Skipping it
//! would let a half-parsed feed advance the channel watermark past a video
//! that was never stored.

use chrono::DateTime;
use quick_xml::Reader;
use quick_xml::events::Event;
use serde::Serialize;

use crate::error::FeedError;

const FEED_BASE_URL: &str = "https://www.youtube.com/feeds/videos.xml?channel_id=";

pub fn feed_url(channel_id: &str) -> String {
    format!("{FEED_BASE_URL}{channel_id}")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedEntry {
    pub video_id: String,
    pub title: String,
    /// Unix seconds.
    pub published_at: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFeed {
    /// Channel display name as the feed states it.
    pub title: Option<String>,
    pub entries: Vec<FeedEntry>,
}

#[derive(Default)]
struct PendingEntry {
    video_id: String,
    title: String,
    published: String,
}

#[derive(Clone, Copy)]
enum Field {
    FeedTitle,
    VideoId,
    Title,
    Published,
}

/// Chooses where character data belongs based on the open element path.
fn field_for(path: &[Vec<u8>]) -> Option<Field> {
    match path {
        [feed, title] if feed == b"feed" && title == b"title" => Some(Field::FeedTitle),
        [feed, entry, leaf] if feed == b"feed" && entry == b"entry" => match leaf.as_slice() {
            b"videoId" => Some(Field::VideoId),
            b"title" => Some(Field::Title),
            b"published" => Some(Field::Published),
            _ => None,
        },
        _ => None,
    }
}

pub fn parse_feed(xml: &str) -> Result<ParsedFeed, FeedError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut feed = ParsedFeed::default();
    let mut feed_title = String::new();
    let mut path: Vec<Vec<u8>> = Vec::new();
    let mut pending: Option<PendingEntry> = None;
    let mut entry_index = 0usize;
    let mut root_is_feed = false;

    loop {
        match reader.read_event()? {
            Event::Start(element) => {
                if path.is_empty() {
                    root_is_feed = element.local_name().as_ref() == b"feed";
                }
                path.push(element.local_name().as_ref().to_vec());
                if path.len() == 2 && path[1] == b"entry" {
                    pending = Some(PendingEntry::default());
                }
            }
            Event::Text(text) => {
                let value = text.unescape()?;
                append_text(&path, &value, &mut feed_title, pending.as_mut());
            }
            Event::CData(data) => {
                let raw = data.into_inner();
                let value = String::from_utf8_lossy(&raw);
                append_text(&path, &value, &mut feed_title, pending.as_mut());
            }
            Event::End(_) => {
                if path.len() == 2
                    && path[1] == b"entry"
                    && let Some(entry) = pending.take()
                {
                    feed.entries.push(finish_entry(entry, entry_index)?);
                    entry_index += 1;
                }
                path.pop();
            }
            Event::Empty(element) if path.is_empty() => {
                root_is_feed = element.local_name().as_ref() == b"feed";
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !root_is_feed {
        return Err(FeedError::NotAFeed);
    }

    let feed_title = feed_title.trim();
    if !feed_title.is_empty() {
        feed.title = Some(feed_title.to_owned());
    }
    Ok(feed)
}

fn append_text(
    path: &[Vec<u8>],
    value: &str,
    feed_title: &mut String,
    pending: Option<&mut PendingEntry>,
) {
    match (field_for(path), pending) {
        (Some(Field::FeedTitle), _) => feed_title.push_str(value),
        (Some(Field::VideoId), Some(entry)) => entry.video_id.push_str(value),
        (Some(Field::Title), Some(entry)) => entry.title.push_str(value),
        (Some(Field::Published), Some(entry)) => entry.published.push_str(value),
        _ => {}
    }
}

fn finish_entry(entry: PendingEntry, index: usize) -> Result<FeedEntry, FeedError> {
    let video_id = entry.video_id.trim().to_owned();
    if video_id.is_empty() {
        return Err(FeedError::MissingVideoId { index });
    }

    let published = entry.published.trim();
    if published.is_empty() {
        return Err(FeedError::MissingPublished { video_id });
    }
    let published_at = DateTime::parse_from_rfc3339(published)
        .map_err(|_| FeedError::InvalidPublished {
            video_id: video_id.clone(),
            value: published.to_owned(),
        })?
        .timestamp();

    Ok(FeedEntry {
        video_id,
        title: entry.title.trim().to_owned(),
        published_at,
    })
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::{DateTime, SecondsFormat};

    /// Renders a feed in the shape YouTube serves, entries in the given order.
    pub fn feed_xml(channel_name: &str, entries: &[(&str, &str, i64)]) -> String {
        let mut xml = String::from(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns:yt="http://www.youtube.com/xml/schemas/2015" xmlns:media="http://search.yahoo.com/mrss/" xmlns="http://www.w3.org/2005/Atom">
 <link rel="self" href="http://www.youtube.com/feeds/videos.xml?channel_id=UCtest"/>
 <id>yt:channel:test</id>
 <yt:channelId>UCtest</yt:channelId>
"#,
        );
        xml.push_str(&format!(" <title>{channel_name}</title>\n"));
        for (video_id, title, published) in entries {
            let published = DateTime::from_timestamp(*published, 0)
                .map(|time| time.to_rfc3339_opts(SecondsFormat::Secs, false))
                .unwrap_or_default();
            xml.push_str(&format!(
                r#" <entry>
  <id>yt:video:{video_id}</id>
  <yt:videoId>{video_id}</yt:videoId>
  <yt:channelId>UCtest</yt:channelId>
  <title>{title}</title>
  <link rel="alternate" href="https://www.youtube.com/watch?v={video_id}"/>
  <published>{published}</published>
  <updated>{published}</updated>
  <media:group>
   <media:title>{title}</media:title>
   <media:description>description of {video_id}</media:description>
  </media:group>
 </entry>
"#
            ));
        }
        xml.push_str("</feed>\n");
        xml
    }
}
