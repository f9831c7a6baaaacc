use super::*;
use crate::status::DownloadStatus;
use crate::test_helpers::{create_test_db, insert_test_feed};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Serves canned documents by URL; unknown URLs fail to fetch
#[derive(Default)]
struct ScriptedFetcher {
    documents: Mutex<HashMap<String, ParsedFeed>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    async fn serve(&self, url: &str, feed: ParsedFeed) {
        self.documents.lock().await.insert(url.to_string(), feed);
    }
}

#[async_trait]
impl FeedFetcher for ScriptedFetcher {
    async fn fetch(&self, url: &str) -> Result<ParsedFeed> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.documents
            .lock()
            .await
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Fetch {
                url: url.to_string(),
                reason: "HTTP 404".to_string(),
            })
    }
}

fn episode(guid: &str, pub_date: i64) -> ParsedItem {
    ParsedItem {
        guid: guid.to_string(),
        title: format!("Episode {guid}"),
        summary: String::new(),
        pub_date,
        media_url: format!("https://cdn.example.com/{guid}.mp3"),
        duration_secs: 60,
        image_url: None,
        size: Some(1000),
    }
}

fn show(title: &str, items: Vec<ParsedItem>) -> ParsedFeed {
    ParsedFeed {
        title: title.to_string(),
        author: Some("Host".to_string()),
        items,
        ..Default::default()
    }
}

struct Harness {
    db: Arc<Database>,
    fetcher: Arc<ScriptedFetcher>,
    orchestrator: RefreshOrchestrator,
    events: broadcast::Receiver<Event>,
    _dir: tempfile::TempDir,
}

async fn harness(policy: RefreshPolicy) -> Harness {
    let (db, dir) = create_test_db().await;
    let fetcher = Arc::new(ScriptedFetcher::default());
    let (tx, rx) = broadcast::channel(256);
    let orchestrator = RefreshOrchestrator::new(
        db.clone(),
        fetcher.clone(),
        JobLock::new(db.clone(), Duration::from_secs(1800)),
        tx,
        policy,
    );
    Harness {
        db,
        fetcher,
        orchestrator,
        events: rx,
        _dir: dir,
    }
}

fn auto(initial: usize) -> RefreshPolicy {
    RefreshPolicy {
        auto_download: true,
        initial_download_count: initial,
    }
}

fn completed(outcome: RefreshOutcome) -> RefreshSummary {
    match outcome {
        RefreshOutcome::Completed(summary) => summary,
        RefreshOutcome::Skipped => panic!("cycle was skipped"),
    }
}

#[tokio::test]
async fn second_run_on_unchanged_document_inserts_nothing() {
    let h = harness(auto(10)).await;
    let feed = insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.fetcher
        .serve(
            "https://a.example/rss",
            show("A", vec![episode("1", 100), episode("2", 200)]),
        )
        .await;

    let first = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(first.items_discovered, 2);
    assert_eq!(first.feeds_refreshed, 1);

    let second = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(second.items_discovered, 0);
    assert!(second.queued.is_empty());
    assert_eq!(h.db.count_feed_items(feed).await.unwrap(), 2);
}

#[tokio::test]
async fn existing_items_are_left_untouched() {
    let h = harness(auto(10)).await;
    let feed = insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.fetcher
        .serve("https://a.example/rss", show("A", vec![episode("1", 100)]))
        .await;
    completed(h.orchestrator.run_cycle().await.unwrap());

    let mut changed = episode("1", 100);
    changed.title = "Retitled".to_string();
    h.fetcher
        .serve("https://a.example/rss", show("A", vec![changed]))
        .await;
    completed(h.orchestrator.run_cycle().await.unwrap());

    let items = h.db.list_feed_items(feed).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].title, "Episode 1");
    assert_eq!(items[0].status, DownloadStatus::NotDownloaded);
}

#[tokio::test]
async fn first_refresh_queues_only_the_newest_items() {
    let h = harness(auto(2)).await;
    insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.fetcher
        .serve(
            "https://a.example/rss",
            show(
                "A",
                vec![episode("old", 100), episode("newest", 400), episode("mid", 300), episode("older", 200)],
            ),
        )
        .await;

    let summary = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(summary.items_discovered, 4);
    assert_eq!(summary.queued.len(), 2);

    let mut queued_guids = Vec::new();
    for id in &summary.queued {
        queued_guids.push(h.db.get_item(*id).await.unwrap().unwrap().guid);
    }
    assert_eq!(queued_guids, vec!["newest", "mid"]);

    // Later refreshes queue every new episode
    h.fetcher
        .serve(
            "https://a.example/rss",
            show(
                "A",
                vec![episode("n1", 500), episode("n2", 600), episode("n3", 700), episode("old", 100)],
            ),
        )
        .await;
    let summary = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(summary.queued.len(), 3);
}

#[tokio::test]
async fn nothing_is_queued_without_auto_download() {
    let h = harness(RefreshPolicy {
        auto_download: false,
        initial_download_count: 5,
    })
    .await;
    insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.fetcher
        .serve("https://a.example/rss", show("A", vec![episode("1", 1)]))
        .await;

    let summary = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(summary.items_discovered, 1);
    assert!(summary.queued.is_empty());
}

#[tokio::test]
async fn failing_feed_does_not_stop_the_others() {
    let mut h = harness(auto(10)).await;
    let broken = insert_test_feed(&h.db, "https://broken.example/rss", "Broken").await;
    let good = insert_test_feed(&h.db, "https://good.example/rss", "Good").await;
    h.fetcher
        .serve("https://good.example/rss", show("Good", vec![episode("1", 1)]))
        .await;

    let summary = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(summary.feeds_failed, 1);
    assert_eq!(summary.feeds_refreshed, 1);
    assert_eq!(h.db.count_feed_items(good).await.unwrap(), 1);

    // Broken feed is untouched
    let feed = h.db.get_feed(broken).await.unwrap().unwrap();
    assert_eq!(feed.title, "Broken");
    assert_eq!(feed.last_episode_at, None);

    let mut saw_failure = false;
    while let Ok(event) = h.events.try_recv() {
        if let Event::FeedRefreshFailed { feed_id, .. } = event {
            assert_eq!(feed_id, broken);
            saw_failure = true;
        }
    }
    assert!(saw_failure);
}

#[tokio::test]
async fn metadata_and_last_episode_follow_the_document() {
    let h = harness(auto(10)).await;
    let feed = insert_test_feed(&h.db, "https://a.example/rss", "placeholder").await;
    let mut doc = show("Real Title", vec![episode("1", 100), episode("2", 250)]);
    doc.image_url = Some("https://a.example/art.jpg".to_string());
    h.fetcher.serve("https://a.example/rss", doc).await;

    completed(h.orchestrator.run_cycle().await.unwrap());

    let stored = h.db.get_feed(feed).await.unwrap().unwrap();
    assert_eq!(stored.title, "Real Title");
    assert_eq!(stored.author.as_deref(), Some("Host"));
    assert_eq!(stored.image_url.as_deref(), Some("https://a.example/art.jpg"));
    assert_eq!(stored.last_episode_at, Some(250));

    // An older document never moves the marker back
    h.fetcher
        .serve("https://a.example/rss", show("Real Title", vec![episode("0", 50)]))
        .await;
    completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(h.db.get_feed(feed).await.unwrap().unwrap().last_episode_at, Some(250));
}

#[tokio::test]
async fn paused_feeds_are_not_fetched() {
    let h = harness(auto(10)).await;
    let feed = insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.db.set_feed_paused(feed, true).await.unwrap();

    let summary = completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(summary.feeds_refreshed + summary.feeds_failed, 0);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);

    // An explicit single-feed refresh still works
    h.fetcher
        .serve("https://a.example/rss", show("A", vec![episode("1", 1)]))
        .await;
    let summary = completed(h.orchestrator.run_for_feed(feed).await.unwrap());
    assert_eq!(summary.items_discovered, 1);
}

#[tokio::test]
async fn held_lock_skips_the_cycle() {
    let h = harness(auto(10)).await;
    insert_test_feed(&h.db, "https://a.example/rss", "A").await;

    let other = JobLock::new(h.db.clone(), Duration::from_secs(1800));
    let token = other.acquire(JobKind::RefreshEpisodes).await.unwrap().unwrap();

    assert_eq!(h.orchestrator.run_cycle().await.unwrap(), RefreshOutcome::Skipped);
    assert_eq!(h.fetcher.calls.load(Ordering::SeqCst), 0);

    other.release(&token).await.unwrap();
    assert!(matches!(
        h.orchestrator.run_cycle().await.unwrap(),
        RefreshOutcome::Completed(_)
    ));
}

#[tokio::test]
async fn lock_is_released_after_the_cycle() {
    let h = harness(auto(10)).await;
    insert_test_feed(&h.db, "https://broken.example/rss", "Broken").await;

    completed(h.orchestrator.run_cycle().await.unwrap());
    assert!(h.db.get_job_lock("refresh-episodes").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_feed_id_is_not_found() {
    let h = harness(auto(10)).await;

    let result = h.orchestrator.run_for_feed(FeedId(77)).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert!(h.db.get_job_lock("refresh-episodes").await.unwrap().is_none());
}

#[tokio::test]
async fn phase_returns_to_idle() {
    let h = harness(auto(10)).await;
    let feed = insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.fetcher
        .serve("https://a.example/rss", show("A", vec![episode("1", 1)]))
        .await;

    assert_eq!(h.orchestrator.phase(feed).await, RefreshPhase::Idle);
    completed(h.orchestrator.run_cycle().await.unwrap());
    assert_eq!(h.orchestrator.phase(feed).await, RefreshPhase::Idle);
}

#[tokio::test]
async fn store_outage_aborts_the_cycle() {
    let h = harness(auto(10)).await;
    insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    h.db.close().await;

    let result = h.orchestrator.run_cycle().await;
    assert!(matches!(result, Err(Error::StoreUnavailable(_))));
}
