use super::*;
use crate::db::Database;
use crate::lifecycle::ItemLifecycle;
use crate::refresh::{HttpFeedFetcher, RefreshPolicy};
use crate::status::DownloadStatus;
use crate::test_helpers::{create_test_db, insert_test_feed, insert_test_item, test_config};
use std::collections::HashSet;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Harness {
    db: Arc<Database>,
    runner: JobRunner,
    locks: JobLock,
    events: broadcast::Receiver<Event>,
    _dir: tempfile::TempDir,
}

async fn harness() -> Harness {
    let (db, dir) = create_test_db().await;
    let config = test_config(&dir);
    let (tx, rx) = broadcast::channel(256);
    let lifecycle = ItemLifecycle::new(db.clone(), tx.clone());
    let worker =
        DownloadWorker::new(db.clone(), lifecycle.clone(), &config.download, config.retry.clone())
            .unwrap();
    let locks = JobLock::new(db.clone(), config.jobs.lock_stale_after);
    let refresh = RefreshOrchestrator::new(
        db.clone(),
        Arc::new(HttpFeedFetcher::new(&config.download).unwrap()),
        locks.clone(),
        tx.clone(),
        RefreshPolicy {
            auto_download: config.download.auto_download,
            initial_download_count: config.download.initial_download_count,
        },
    );
    let reconciler = Reconciler::new(db.clone(), lifecycle, worker.clone());

    Harness {
        runner: JobRunner::new(locks.clone(), refresh, reconciler, worker, tx),
        db,
        locks,
        events: rx,
        _dir: dir,
    }
}

fn drain(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[tokio::test]
async fn sweep_job_reports_removed_locks() {
    let mut h = harness().await;
    let long_ago = chrono::Utc::now().timestamp() - 2 * 60 * 60;
    h.locks
        .acquire_at(JobKind::CheckMissingFiles, long_ago)
        .await
        .unwrap()
        .unwrap();

    let run = h.runner.run_job(JobKind::SweepStaleLocks).await.unwrap();
    assert_eq!(run, JobRun::Completed { affected: 1 });
    assert!(h.db.get_job_lock("check-missing-files").await.unwrap().is_none());
    assert!(h.db.get_job_lock("sweep-stale-locks").await.unwrap().is_none());

    assert!(drain(&mut h.events).contains(&Event::JobCompleted {
        job: "sweep-stale-locks".to_string(),
        affected: 1
    }));
}

#[tokio::test]
async fn held_lock_skips_the_tick() {
    let mut h = harness().await;
    let token = h
        .locks
        .acquire(JobKind::BackfillFileSizes)
        .await
        .unwrap()
        .unwrap();

    let run = h.runner.run_job(JobKind::BackfillFileSizes).await.unwrap();
    assert_eq!(run, JobRun::Skipped);
    assert!(drain(&mut h.events).contains(&Event::JobSkipped {
        job: "backfill-file-sizes".to_string(),
        reason: LOCK_HELD_REASON.to_string()
    }));

    // Other kinds are unaffected by that lock
    assert_eq!(
        h.runner.run_job(JobKind::DownloadMissingImages).await.unwrap(),
        JobRun::Completed { affected: 0 }
    );

    h.locks.release(&token).await.unwrap();
    assert!(matches!(
        h.runner.run_job(JobKind::BackfillFileSizes).await.unwrap(),
        JobRun::Completed { .. }
    ));
}

#[tokio::test]
async fn refresh_job_downloads_new_episodes() {
    let h = harness().await;
    let server = MockServer::start().await;
    let rss = format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Jobs Show</title><link>https://jobs.example</link><description>d</description>
  <item>
    <title>First</title><guid>first</guid>
    <pubDate>Mon, 02 Jan 2023 10:00:00 +0000</pubDate>
    <enclosure url="{uri}/first.mp3" length="3" type="audio/mpeg"/>
  </item>
</channel></rss>"#,
        uri = server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/first.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"abc".to_vec()))
        .expect(1)
        .mount(&server)
        .await;

    let feed = insert_test_feed(&h.db, &format!("{}/feed.xml", server.uri()), "Jobs Show").await;

    let run = h.runner.run_job(JobKind::RefreshEpisodes).await.unwrap();
    assert_eq!(run, JobRun::Completed { affected: 1 });

    let items = h.db.list_feed_items(feed).await.unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, DownloadStatus::Downloaded);
    assert_eq!(items[0].file_size, 3);

    // Nothing new the second time
    assert_eq!(
        h.runner.run_job(JobKind::RefreshEpisodes).await.unwrap(),
        JobRun::Completed { affected: 0 }
    );
}

#[tokio::test]
async fn failed_download_is_retried_on_the_next_refresh() {
    let h = harness().await;
    let server = MockServer::start().await;
    let rss = format!(
        r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Flaky Show</title><link>https://flaky.example</link><description>d</description>
  <item>
    <title>Flaky</title><guid>flaky</guid>
    <pubDate>Mon, 02 Jan 2023 10:00:00 +0000</pubDate>
    <enclosure url="{uri}/flaky.mp3" length="4" type="audio/mpeg"/>
  </item>
</channel></rss>"#,
        uri = server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/feed.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(rss))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.mp3"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/flaky.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"good".to_vec()))
        .mount(&server)
        .await;

    let feed = insert_test_feed(&h.db, &format!("{}/feed.xml", server.uri()), "Flaky Show").await;

    assert_eq!(
        h.runner.run_job(JobKind::RefreshEpisodes).await.unwrap(),
        JobRun::Completed { affected: 1 }
    );
    let item = h.db.list_feed_items(feed).await.unwrap().remove(0);
    assert_eq!(item.status, DownloadStatus::NotDownloaded);
    assert_eq!(item.last_error.as_deref(), Some("HTTP 404"));

    // No new episodes, but the earlier failure is picked up again
    assert_eq!(
        h.runner.run_job(JobKind::RefreshEpisodes).await.unwrap(),
        JobRun::Completed { affected: 0 }
    );
    let item = h.db.get_item(item.id).await.unwrap().unwrap();
    assert_eq!(item.status, DownloadStatus::Downloaded);
    assert_eq!(item.file_size, 4);
    assert_eq!(item.last_error, None);
}

#[tokio::test]
async fn episodes_never_queued_are_not_swept_up() {
    let h = harness().await;
    let feed = insert_test_feed(&h.db, "https://quiet.example/rss", "Quiet").await;
    let id = insert_test_item(&h.db, feed, "old", "Old", 1, 1).await;

    assert!(h.runner.worker.pending().await.unwrap().is_empty());

    h.db.mark_items_for_download(&[id]).await.unwrap();
    assert_eq!(h.runner.worker.pending().await.unwrap(), vec![id]);

    h.db.unmark_item_for_download(id).await.unwrap();
    assert!(h.runner.worker.pending().await.unwrap().is_empty());
}

#[tokio::test]
async fn sweep_job_reclaims_abandoned_downloads_only() {
    let h = harness().await;
    let feed = insert_test_feed(&h.db, "https://a.example/rss", "A").await;
    let live = insert_test_item(&h.db, feed, "live", "Live", 1, 1).await;
    let dead = insert_test_item(&h.db, feed, "dead", "Dead", 2, 1).await;
    for id in [live, dead] {
        h.db.transition_item_status(id, DownloadStatus::NotDownloaded, DownloadStatus::Downloading)
            .await
            .unwrap();
    }
    let long_ago = chrono::Utc::now().timestamp() - 2 * 60 * 60;
    h.db.touch_item_download_at(dead, long_ago).await.unwrap();

    assert_eq!(
        h.runner.run_job(JobKind::SweepStaleLocks).await.unwrap(),
        JobRun::Completed { affected: 1 }
    );
    assert_eq!(
        h.db.get_item(live).await.unwrap().unwrap().status,
        DownloadStatus::Downloading
    );
    assert_eq!(
        h.db.get_item(dead).await.unwrap().unwrap().status,
        DownloadStatus::NotDownloaded
    );
}

#[tokio::test]
async fn store_outage_is_reported_as_skipped() {
    let mut h = harness().await;
    h.db.close().await;

    let result = h.runner.run_job(JobKind::CheckMissingFiles).await;
    assert!(result.unwrap_err().is_store_outage());

    let skipped = drain(&mut h.events).into_iter().any(|e| {
        matches!(e, Event::JobSkipped { ref job, ref reason }
            if job == "check-missing-files" && reason.contains("store unavailable"))
    });
    assert!(skipped);
}

#[tokio::test]
async fn scheduler_runs_every_kind_and_stops() {
    let mut h = harness().await;
    let config = JobsConfig {
        refresh_interval: Duration::from_secs(3600),
        missing_file_interval: Duration::from_secs(3600),
        image_backfill_interval: Duration::from_secs(3600),
        size_backfill_interval: Duration::from_secs(3600),
        lock_sweep_interval: Duration::from_secs(3600),
        lock_stale_after: Duration::from_secs(1800),
        run_on_start: true,
    };

    let scheduler = Scheduler::start(h.runner.clone(), &config);

    let mut finished = HashSet::new();
    let wait = tokio::time::timeout(Duration::from_secs(10), async {
        while finished.len() < JobKind::ALL.len() {
            match h.events.recv().await {
                Ok(Event::JobCompleted { job, .. }) => {
                    finished.insert(job);
                }
                Ok(_) => {}
                Err(e) => panic!("event channel failed: {e}"),
            }
        }
    })
    .await;
    assert!(wait.is_ok(), "every job ran once on start");

    assert!(!scheduler.is_cancelled());
    tokio::time::timeout(Duration::from_secs(5), scheduler.shutdown(Duration::from_secs(2)))
        .await
        .expect("shutdown completes");
}

#[tokio::test]
async fn without_run_on_start_nothing_runs_before_the_first_interval() {
    let mut h = harness().await;
    let config = JobsConfig {
        run_on_start: false,
        ..JobsConfig::default()
    };

    let scheduler = Scheduler::start(h.runner.clone(), &config);
    tokio::time::sleep(Duration::from_millis(200)).await;
    scheduler.shutdown(Duration::from_secs(2)).await;

    assert!(drain(&mut h.events).is_empty());
}

#[test]
fn intervals_come_from_the_matching_setting() {
    let config = JobsConfig::default();
    assert_eq!(
        interval_for(&config, JobKind::RefreshEpisodes),
        config.refresh_interval
    );
    assert_eq!(
        interval_for(&config, JobKind::SweepStaleLocks),
        config.lock_sweep_interval
    );
    assert_eq!(
        interval_for(&config, JobKind::BackfillFileSizes),
        config.size_backfill_interval
    );
}
