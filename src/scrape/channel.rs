//! Channel-page scraper, used when subscribing.
//!
//! Channel pages embed a huge `ytInitialData` blob, but the three values we
//! need are also present as plain `<link>`/`<meta>` tags in the head, which
//! is far cheaper to match.

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::ScrapeError;
use crate::fetcher::PageFetcher;

static CANONICAL_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\s+rel="canonical"\s+href="https://www\.youtube\.com/channel/([^"/?]+)""#)
        .expect("canonical link pattern compiles")
});

static HANDLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<link\s+rel="alternate"\s+media="handheld"\s+href="https://m\.youtube\.com/(@[^"/?]+)""#)
        .expect("handle pattern compiles")
});

static ITEMPROP_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+itemprop="name"\s+content="([^"]*)""#).expect("name pattern compiles")
});

static OG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta\s+property="og:title"\s+content="([^"]*)""#)
        .expect("og:title pattern compiles")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelInfo {
    pub channel_id: String,
    pub handle: Option<String>,
    pub name: String,
}

/// Resolves any channel URL (canonical, custom or `@handle`) to its
/// canonical id and display name.
pub fn scrape_channel(fetcher: &dyn PageFetcher, channel_url: &str) -> Result<ChannelInfo, ScrapeError> {
    let html = fetcher.fetch(channel_url)?;
    parse_channel_page(&html)
}

pub fn parse_channel_page(html: &str) -> Result<ChannelInfo, ScrapeError> {
    let channel_id = first_capture(&CANONICAL_ID, html)
        .ok_or(ScrapeError::MarkerMissing("canonical channel link"))?;
    let name = first_capture(&ITEMPROP_NAME, html)
        .or_else(|| first_capture(&OG_TITLE, html))
        .map(|raw| html_escape::decode_html_entities(&raw).trim().to_owned())
        .filter(|name| !name.is_empty())
        .ok_or(ScrapeError::MarkerMissing("channel name"))?;
    let handle = first_capture(&HANDLE, html);

    Ok(ChannelInfo {
        channel_id,
        handle,
        name,
    })
}

fn first_capture(pattern: &Regex, html: &str) -> Option<String> {
    pattern
        .captures(html)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().to_owned())
}


#[cfg(test)]
mod tests {
    use super::testing::channel_page;
    use super::*;
    use crate::fetcher::testing::ScriptedFetcher;

    #[test]
    fn extracts_id_handle_and_name() {
        let info = parse_channel_page(&channel_page("UCabc", "@someone", "Some One")).unwrap();
        assert_eq!(
            info,
            ChannelInfo {
                channel_id: "UCabc".into(),
                handle: Some("@someone".into()),
                name: "Some One".into(),
            }
        );
    }

    #[test]
    fn decodes_entities_in_name() {
        let info = parse_channel_page(&channel_page("UCabc", "@x", "Rock &amp; Roll")).unwrap();
        assert_eq!(info.name, "Rock & Roll");
    }

    #[test]
    fn falls_back_to_open_graph_title() {
        let html = r#"<link rel="canonical" href="https://www.youtube.com/channel/UCog">
<meta property="og:title" content="Graph Name">"#;
        let info = parse_channel_page(html).unwrap();
        assert_eq!(info.name, "Graph Name");
        assert_eq!(info.handle, None);
    }

    #[test]
    fn page_without_canonical_link_is_not_a_channel() {
        let err = parse_channel_page("<html><head><title>404</title></head></html>").unwrap_err();
        assert!(matches!(err, ScrapeError::MarkerMissing("canonical channel link")));
    }

    #[test]
    fn scrape_channel_surfaces_fetch_failures() {
        let fetcher = ScriptedFetcher::new();
        fetcher.status("https://www.youtube.com/@gone", 404);
        let err = scrape_channel(&fetcher, "https://www.youtube.com/@gone").unwrap_err();
        assert!(matches!(err, ScrapeError::Fetch(_)));
    }
}
