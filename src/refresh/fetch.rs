//! Feed document retrieval and parsing.
//!
//! [`FeedFetcher`] is the seam the refresh cycle depends on; tests supply
//! canned documents, production uses [`HttpFeedFetcher`]. Documents are parsed
//! as RSS first and fall back to Atom.

use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::utils::html_to_text;
use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;

/// Feed-level metadata plus episodes, in document order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedFeed {
    /// Feed title
    pub title: String,
    /// Author or owner
    pub author: Option<String>,
    /// Plain-text description
    pub summary: Option<String>,
    /// Artwork URL
    pub image_url: Option<String>,
    /// Explicit flag
    pub explicit: bool,
    /// Episodes that carry a media enclosure
    pub items: Vec<ParsedItem>,
}

/// One episode from a feed document
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParsedItem {
    /// Feed-supplied identifier (guid, else link, else title)
    pub guid: String,
    /// Episode title
    pub title: String,
    /// Plain-text summary
    pub summary: String,
    /// Publish time (unix seconds)
    pub pub_date: i64,
    /// Media enclosure URL
    pub media_url: String,
    /// Duration in seconds (0 when unknown)
    pub duration_secs: i64,
    /// Episode artwork URL
    pub image_url: Option<String>,
    /// Enclosure length in bytes
    pub size: Option<i64>,
}

/// Source of parsed feed documents
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// Fetch and parse the document at `url`.
    ///
    /// Any retrieval or parse failure is reported as [`Error::Fetch`].
    async fn fetch(&self, url: &str) -> Result<ParsedFeed>;
}

/// Fetches feeds over HTTP
pub struct HttpFeedFetcher {
    http_client: reqwest::Client,
}

impl HttpFeedFetcher {
    /// Build a fetcher using the configured feed timeout and user agent
    pub fn new(config: &DownloadConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(config.feed_timeout)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl FeedFetcher for HttpFeedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        debug!(url, "fetching feed");

        let fetch_error = |reason: String| Error::Fetch {
            url: url.to_string(),
            reason,
        };

        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(|e| fetch_error(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(fetch_error(format!("HTTP {}", status.as_u16())));
        }

        let content = response
            .text()
            .await
            .map_err(|e| fetch_error(format!("failed to read body: {}", e)))?;

        parse_document(&content).map_err(fetch_error)
    }
}

/// Parse a feed document, trying RSS then Atom
pub fn parse_document(content: &str) -> std::result::Result<ParsedFeed, String> {
    match parse_as_rss(content) {
        Ok(feed) => {
            debug!(items = feed.items.len(), "parsed as RSS");
            Ok(feed)
        }
        Err(rss_err) => match parse_as_atom(content) {
            Ok(feed) => {
                debug!(items = feed.items.len(), "parsed as Atom");
                Ok(feed)
            }
            Err(atom_err) => Err(format!(
                "not RSS ({}) or Atom ({})",
                rss_err, atom_err
            )),
        },
    }
}

fn parse_as_rss(content: &str) -> std::result::Result<ParsedFeed, String> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| e.to_string())?;
    let fetched_at = Utc::now().timestamp();
    let itunes = channel.itunes_ext();

    let items = channel
        .items()
        .iter()
        .filter_map(|item| {
            let media_url = item.enclosure().map(|enc| enc.url().trim().to_string())?;
            if media_url.is_empty() {
                return None;
            }

            let title = item.title().unwrap_or("").to_string();
            let guid = item
                .guid()
                .map(|g| g.value().to_string())
                .filter(|g| !g.is_empty())
                .or_else(|| item.link().map(|l| l.to_string()))
                .unwrap_or_else(|| title.clone());

            let pub_date = item
                .pub_date()
                .and_then(|date| chrono::DateTime::parse_from_rfc2822(date.trim()).ok())
                .map(|dt| dt.timestamp())
                .unwrap_or(fetched_at);

            let summary = item
                .description()
                .or_else(|| item.itunes_ext().and_then(|ext| ext.summary()))
                .map(plain_text)
                .unwrap_or_default();

            let duration_secs = item
                .itunes_ext()
                .and_then(|ext| ext.duration())
                .and_then(parse_duration)
                .unwrap_or(0);

            let image_url = item
                .itunes_ext()
                .and_then(|ext| ext.image())
                .map(|s| s.to_string());

            let size = item
                .enclosure()
                .and_then(|enc| enc.length().trim().parse::<i64>().ok())
                .filter(|len| *len > 0);

            Some(ParsedItem {
                guid,
                title,
                summary,
                pub_date,
                media_url,
                duration_secs,
                image_url,
                size,
            })
        })
        .collect();

    Ok(ParsedFeed {
        title: channel.title().to_string(),
        author: itunes
            .and_then(|ext| ext.author())
            .map(|s| s.to_string())
            .or_else(|| channel.managing_editor().map(|s| s.to_string())),
        summary: Some(plain_text(channel.description())).filter(|s| !s.is_empty()),
        image_url: itunes
            .and_then(|ext| ext.image())
            .map(|s| s.to_string())
            .or_else(|| channel.image().map(|img| img.url().to_string())),
        explicit: itunes
            .and_then(|ext| ext.explicit())
            .is_some_and(is_explicit),
        items,
    })
}

fn parse_as_atom(content: &str) -> std::result::Result<ParsedFeed, String> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes()).map_err(|e| e.to_string())?;

    let items = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let enclosure = entry.links().iter().find(|link| link.rel() == "enclosure")?;

            let pub_date = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated())
                .timestamp();

            let summary = entry
                .summary()
                .map(|s| s.as_str().to_string())
                .or_else(|| entry.content().and_then(|c| c.value().map(|v| v.to_string())))
                .map(|s| plain_text(&s))
                .unwrap_or_default();

            Some(ParsedItem {
                guid: entry.id().to_string(),
                title: entry.title().as_str().to_string(),
                summary,
                pub_date,
                media_url: enclosure.href().to_string(),
                duration_secs: 0,
                image_url: None,
                size: enclosure
                    .length()
                    .and_then(|l| l.parse::<i64>().ok())
                    .filter(|len| *len > 0),
            })
        })
        .collect();

    Ok(ParsedFeed {
        title: feed.title().as_str().to_string(),
        author: feed.authors().first().map(|a| a.name().to_string()),
        summary: feed.subtitle().map(|s| plain_text(s.as_str())),
        image_url: feed.logo().or_else(|| feed.icon()).map(|s| s.to_string()),
        explicit: false,
        items,
    })
}

fn plain_text(html: &str) -> String {
    html_to_text(html).trim().to_string()
}

fn is_explicit(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "explicit"
    )
}

/// Parse an `itunes:duration` value: `SS`, `MM:SS` or `HH:MM:SS`
pub fn parse_duration(value: &str) -> Option<i64> {
    let parts: Vec<&str> = value.trim().split(':').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let mut total: i64 = 0;
    for part in parts {
        // Some feeds write fractional seconds ("1830.5")
        let whole = part.trim().split('.').next().unwrap_or("");
        let n: i64 = whole.parse().ok()?;
        if n < 0 {
            return None;
        }
        total = total.checked_mul(60)?.checked_add(n)?;
    }
    Some(total)
}
