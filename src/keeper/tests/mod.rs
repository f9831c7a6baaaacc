use super::*;
use crate::test_helpers::test_config;
use tempfile::TempDir;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};


/// Size of every served media file
pub(super) const MEDIA_BYTES: usize = 10;

pub(super) struct Fixture {
    pub keeper: PodKeeper,
    pub server: MockServer,
    pub dir: TempDir,
}

impl Fixture {
    pub fn feed_url(&self, name: &str) -> String {
        format!("{}/{}.xml", self.server.uri(), name)
    }

    /// Serve an RSS document at `/<name>.xml` with one item per `(guid, pub_date)`
    pub async fn serve_feed(&self, name: &str, title: &str, episodes: &[(&str, i64)]) {
        let body = rss_document(&self.server.uri(), title, episodes);
        Mock::given(method("GET"))
            .and(path(format!("/{name}.xml")))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&self.server)
            .await;
    }
}

pub(super) async fn fixture() -> Fixture {
    fixture_with(|_| {}).await
}

pub(super) async fn fixture_with(adjust: impl FnOnce(&mut Config)) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    adjust(&mut config);

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/media/.+\.mp3$"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![9u8; MEDIA_BYTES]))
        .mount(&server)
        .await;

    let keeper = PodKeeper::new(config).await.unwrap();
    Fixture {
        keeper,
        server,
        dir,
    }
}

pub(super) fn rss_document(base: &str, title: &str, episodes: &[(&str, i64)]) -> String {
    let items: String = episodes
        .iter()
        .map(|(guid, pub_date)| {
            let date = chrono::DateTime::from_timestamp(*pub_date, 0)
                .unwrap()
                .to_rfc2822();
            format!(
                r#"<item>
  <title>Episode {guid}</title>
  <guid>{guid}</guid>
  <description>About {guid}</description>
  <pubDate>{date}</pubDate>
  <enclosure url="{base}/media/{guid}.mp3" length="{MEDIA_BYTES}" type="audio/mpeg"/>
</item>
"#
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
<channel>
  <title>{title}</title>
  <link>{base}</link>
  <description>A show</description>
  {items}
</channel>
</rss>"#
    )
}

pub(super) fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}
