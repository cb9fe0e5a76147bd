//! Blocking page retrieval. Everything that talks to YouTube goes through
//! [`PageFetcher`] so the sync engine can be driven by canned pages in tests.

use crate::error::FetchError;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Performs a single GET. No retries and no caching: callers decide what a
/// failure means for them.
pub trait PageFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<String, FetchError>;
}

/// [`PageFetcher`] backed by a shared `ureq` agent.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Self {
        let agent = ureq::AgentBuilder::new().user_agent(user_agent).build();
        Self { agent }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_USER_AGENT)
    }
}

impl PageFetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<String, FetchError> {
        // The consent interstitial served to some regions drops the embedded
        // player JSON; an explicit language keeps the regular watch page.
        let response = self
            .agent
            .get(url)
            .set("Accept-Language", "en-US,en;q=0.9")
            .call();

        match response {
            Ok(response) => response.into_string().map_err(|source| FetchError::Body {
                url: url.to_owned(),
                source,
            }),
            Err(ureq::Error::Status(status, _)) => Err(FetchError::Status {
                url: url.to_owned(),
                status,
            }),
            Err(ureq::Error::Transport(transport)) => Err(FetchError::Transport {
                url: url.to_owned(),
                message: transport.to_string(),
            }),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedFetcher;
    use super::*;

    #[test]
    fn scripted_fetcher_reports_unknown_urls_as_404() {
        let fetcher = ScriptedFetcher::new();
        fetcher.page("https://example.test/a", "body");
        fetcher.status("https://example.test/b", 500);

        assert_eq!(fetcher.fetch("https://example.test/a").unwrap(), "body");
        assert!(matches!(
            fetcher.fetch("https://example.test/b"),
            Err(FetchError::Status { status: 500, .. })
        ));
        assert!(matches!(
            fetcher.fetch("https://example.test/c"),
            Err(FetchError::Status { status: 404, .. })
        ));
        assert_eq!(fetcher.requests().len(), 3);
    }

    #[test]
    fn http_fetcher_reports_unreachable_hosts_as_transport_errors() {
        let fetcher = HttpFetcher::default();
        // Port 9 on loopback is the discard service; nothing listens there in CI.
        let err = fetcher.fetch("http://127.0.0.1:9/feed").unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }), "{err:?}");
    }
}
