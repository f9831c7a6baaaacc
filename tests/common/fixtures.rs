//! A mock podcast host: RSS documents plus media and artwork files

use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Body served for every episode
pub const EPISODE_AUDIO: &[u8] = b"ID3-not-really-audio";

/// Body served for every cover image
pub const COVER_ART: &[u8] = b"\x89PNG-not-really";

/// One episode in a served feed
#[derive(Clone, Debug)]
pub struct EpisodeFixture {
    /// GUID, also used for the media and artwork file names
    pub guid: String,
    /// Publish time (unix seconds)
    pub pub_date: i64,
    /// itunes:duration value
    pub duration: String,
    /// Whether the item carries an itunes:image
    pub with_art: bool,
}

impl EpisodeFixture {
    /// Episode with a one minute duration and no artwork
    pub fn new(guid: &str, pub_date: i64) -> Self {
        Self {
            guid: guid.to_string(),
            pub_date,
            duration: "1:00".to_string(),
            with_art: false,
        }
    }

    /// Attach an episode cover
    pub fn with_art(mut self) -> Self {
        self.with_art = true;
        self
    }
}

/// Mock host serving feeds under `/feeds/` and files under `/media/` and `/art/`
pub struct PodcastHost {
    /// Underlying mock server
    pub server: MockServer,
}

impl PodcastHost {
    /// Start a host that serves media and artwork for any name
    pub async fn start() -> Self {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path_regex(r"^/media/.+\.mp3$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(EPISODE_AUDIO.to_vec()))
            .mount(&server)
            .await;
        Mock::given(method("HEAD"))
            .and(path_regex(r"^/media/.+\.mp3$"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", EPISODE_AUDIO.len().to_string().as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/art/.+\.png$"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(COVER_ART.to_vec()))
            .mount(&server)
            .await;

        Self { server }
    }

    /// URL of the feed named `name`
    pub fn feed_url(&self, name: &str) -> String {
        format!("{}/feeds/{}.xml", self.server.uri(), name)
    }

    /// Serve the feed named `name`
    pub async fn serve_feed(&self, name: &str, title: &str, episodes: &[EpisodeFixture]) {
        let body = rss_document(&self.server.uri(), title, episodes);
        Mock::given(method("GET"))
            .and(path(format!("/feeds/{name}.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }

    /// Serve `first` for the next `times` fetches of `name`, then `then`
    pub async fn serve_growing_feed(
        &self,
        name: &str,
        title: &str,
        first: &[EpisodeFixture],
        times: u64,
        then: &[EpisodeFixture],
    ) {
        let uri = self.server.uri();
        Mock::given(method("GET"))
            .and(path(format!("/feeds/{name}.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_document(&uri, title, first)))
            .up_to_n_times(times)
            .with_priority(1)
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(format!("/feeds/{name}.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(rss_document(&uri, title, then)))
            .with_priority(2)
            .mount(&self.server)
            .await;
    }

    /// Number of GET requests received for one media file
    pub async fn media_requests(&self, guid: &str) -> usize {
        let wanted = format!("/media/{guid}.mp3");
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "GET" && r.url.path() == wanted)
            .count()
    }
}

/// Render an RSS 2.0 document with iTunes extensions
pub fn rss_document(base: &str, title: &str, episodes: &[EpisodeFixture]) -> String {
    let items: String = episodes
        .iter()
        .map(|ep| {
            let date = chrono::DateTime::from_timestamp(ep.pub_date, 0)
                .expect("valid timestamp")
                .to_rfc2822();
            let art = if ep.with_art {
                format!(r#"<itunes:image href="{base}/art/{}.png"/>"#, ep.guid)
            } else {
                String::new()
            };
            format!(
                r#"<item>
  <title>Episode {guid}</title>
  <guid isPermaLink="false">{guid}</guid>
  <description><![CDATA[<p>Notes for <b>{guid}</b></p>]]></description>
  <pubDate>{date}</pubDate>
  <itunes:duration>{duration}</itunes:duration>
  {art}
  <enclosure url="{base}/media/{guid}.mp3" length="0" type="audio/mpeg"/>
</item>
"#,
                guid = ep.guid,
                duration = ep.duration,
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0" xmlns:itunes="http://www.itunes.com/dtds/podcast-1.0.dtd">
<channel>
  <title>{title}</title>
  <link>{base}</link>
  <description>Integration test show</description>
  <itunes:author>Test Host</itunes:author>
  {items}
</channel>
</rss>"#
    )
}
