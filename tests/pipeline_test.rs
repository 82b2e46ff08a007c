//! End-to-end pipeline tests: ingestion through publish and announcement,
//! driven by the coordinator against scripted collaborators.

mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use common::{episode, episode_identity, TestHarness};
use releaseforge::feed::StaticFeed;
use releaseforge::ingest::AcceptOutcome;
use releaseforge::pipeline::ItemOutcome;
use releaseforge::queue::CancelOutcome;
use releaseforge_common::{ArtifactHandle, QualityLabel, QualityStatus};
use releaseforge_db::pool::get_conn;
use releaseforge_db::queries::ongoing;

fn labels(labels: &[&str]) -> Vec<QualityLabel> {
    labels.iter().map(|l| QualityLabel::new(*l)).collect()
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_item_uploads_every_quality_under_one_post() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();
    let id = episode_identity(5);

    let outcome = coordinator.submit(&episode(5), false).unwrap();
    assert_matches!(outcome, AcceptOutcome::Accepted(item) if item.identity == id);

    let dispatcher = coordinator.start_dispatcher();
    let outcomes = coordinator.wait_idle().await;
    assert_eq!(
        outcomes,
        vec![ItemOutcome::Completed {
            uploaded: labels(&["720", "1080"])
        }]
    );

    // Downloaded once, encoded once per quality.
    assert_eq!(h.downloader.calls(), 1);
    assert_eq!(h.transcoder.calls(), 2);
    assert_eq!(h.publisher.published().len(), 2);

    let record = h.store().get_release(&id).await.unwrap().unwrap();
    assert!(record.is_uploaded(&QualityLabel::new("720")));
    assert!(record.is_uploaded(&QualityLabel::new("1080")));
    assert_eq!(
        record.qualities[&QualityLabel::new("1080")].artifact_handle,
        Some(ArtifactHandle::new("https://cdn.test/series-a-5-1080p.mkv"))
    );

    // Both qualities attach to the single post created for the first one.
    assert_eq!(h.channel.posts_created(), 1);
    let announcements = h.channel.announcements();
    assert_eq!(announcements.len(), 2);
    assert_eq!(announcements[0].0, announcements[1].0);
    assert_eq!(Some(&announcements[1].0), record.publish_post_handle.as_ref());
    let (_, last) = &announcements[1];
    assert_eq!(
        last.qualities.iter().map(|(q, _)| q.clone()).collect::<Vec<_>>(),
        labels(&["720", "1080"])
    );
    assert!(h.channel.statuses() > 0);

    let conn = get_conn(&h.db).unwrap();
    assert!(!ongoing::is_ongoing(&conn, &id).unwrap());
    drop(conn);

    // The downloaded source is removed once every quality is done.
    assert!(!h.dir.path().join("downloads").join("series-a-5.mkv").exists());

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_released_episode_is_not_processed_again() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();

    coordinator.submit(&episode(1), false).unwrap();
    coordinator.wait_idle().await;

    assert_matches!(
        coordinator.submit(&episode(1), false).unwrap(),
        AcceptOutcome::DuplicateCompleted
    );
    assert_matches!(
        coordinator.submit(&episode(1), true).unwrap(),
        AcceptOutcome::DuplicateCompleted
    );
    assert_eq!(h.transcoder.calls(), 2);

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rerun_skips_uploaded_qualities() {
    let h = TestHarness::new();
    let id = episode_identity(3);
    let store = h.store();
    store
        .mark_pending(&id, "Series A - 03", &QualityLabel::new("720"))
        .await
        .unwrap();
    store
        .upsert_quality(
            &id,
            &QualityLabel::new("720"),
            &ArtifactHandle::new("https://cdn.test/old-720.mkv"),
            None,
            false,
        )
        .await
        .unwrap();

    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();
    coordinator.submit(&episode(3), false).unwrap();
    let outcomes = coordinator.wait_idle().await;

    assert_eq!(
        outcomes,
        vec![ItemOutcome::Completed {
            uploaded: labels(&["720", "1080"])
        }]
    );
    assert_eq!(h.transcoder.calls(), 1);

    // The earlier upload is never overwritten.
    let record = store.get_release(&id).await.unwrap().unwrap();
    assert_eq!(
        record.qualities[&QualityLabel::new("720")].artifact_handle,
        Some(ArtifactHandle::new("https://cdn.test/old-720.mkv"))
    );

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_exhausting_retries_fails_item_without_record() {
    let h = TestHarness::new();
    h.downloader.fail_times(3);
    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();
    let id = episode_identity(7);

    coordinator.submit(&episode(7), false).unwrap();
    let outcomes = coordinator.wait_idle().await;

    assert_eq!(outcomes.len(), 1);
    assert_matches!(
        &outcomes[0],
        ItemOutcome::Failed { uploaded, failed, .. }
            if uploaded.is_empty() && *failed == labels(&["720", "1080"])
    );
    assert_eq!(h.downloader.calls(), 3);
    assert_eq!(h.transcoder.calls(), 0);
    assert!(h.store().get_release(&id).await.unwrap().is_none());
    assert!(!h.channel.alerts().is_empty());

    let conn = get_conn(&h.db).unwrap();
    assert!(!ongoing::is_ongoing(&conn, &id).unwrap());
    assert_eq!(ongoing::list_failures(&conn, &id).unwrap().len(), 2);
    drop(conn);

    // Partial downloads are cleaned up.
    assert!(!h.dir.path().join("downloads").join("series-a-7.mkv").exists());

    // A failed episode needs a forced run.
    assert_matches!(
        coordinator.submit(&episode(7), false).unwrap(),
        AcceptOutcome::DuplicateFailed
    );
    assert_matches!(
        coordinator.submit(&episode(7), true).unwrap(),
        AcceptOutcome::Accepted(_)
    );
    let outcomes = coordinator.wait_idle().await;
    assert_matches!(outcomes[..], [ItemOutcome::Completed { .. }]);

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_download_recovers_within_retry_budget() {
    let h = TestHarness::new();
    h.downloader.fail_times(2);
    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();

    coordinator.submit(&episode(8), false).unwrap();
    let outcomes = coordinator.wait_idle().await;

    assert_matches!(outcomes[..], [ItemOutcome::Completed { .. }]);
    assert_eq!(h.downloader.calls(), 3);

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transcode_failure_fails_only_that_quality() {
    let h = TestHarness::new();
    h.transcoder.fail_quality("1080");
    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();
    let id = episode_identity(9);

    coordinator.submit(&episode(9), false).unwrap();
    let outcomes = coordinator.wait_idle().await;

    assert_matches!(
        &outcomes[..],
        [ItemOutcome::Failed { uploaded, failed, error }]
            if *uploaded == labels(&["720"])
                && *failed == labels(&["1080"])
                && error.contains("status 1")
    );

    let record = h.store().get_release(&id).await.unwrap().unwrap();
    assert_eq!(
        record.qualities[&QualityLabel::new("720")].status,
        QualityStatus::Uploaded
    );
    assert!(!record.is_uploaded(&QualityLabel::new("1080")));

    // The slot was released after the failure.
    assert_eq!(coordinator.queue().slot().holders(), 0);

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

// ---------------------------------------------------------------------------
// Admission and the transcode slot
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_transcode_slot_is_exclusive_across_items() {
    let mut h = TestHarness::new();
    h.config.dispatcher.cadence_secs = 0;
    h.transcoder.set_delay(Duration::from_millis(50));
    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();

    for ep in 1..=3 {
        assert_matches!(
            coordinator.submit(&episode(ep), false).unwrap(),
            AcceptOutcome::Accepted(_)
        );
    }
    let outcomes = coordinator.wait_idle().await;

    assert_eq!(outcomes.len(), 3);
    assert!(outcomes
        .iter()
        .all(|o| matches!(o, ItemOutcome::Completed { .. })));
    assert_eq!(h.transcoder.calls(), 6);
    assert_eq!(h.transcoder.peak(), 1);
    assert_eq!(coordinator.queue().slot().peak_holders(), 1);
    assert_eq!(coordinator.queue().slot().acquisitions(), 6);

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_submission_while_active() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();

    assert_matches!(
        coordinator.submit(&episode(2), false).unwrap(),
        AcceptOutcome::Accepted(_)
    );
    assert_matches!(
        coordinator.submit(&episode(2), false).unwrap(),
        AcceptOutcome::DuplicateActive
    );
    assert_eq!(coordinator.snapshot().waiting, vec![episode_identity(2)]);

    coordinator.shutdown();
    let outcomes = coordinator.wait_idle().await;
    assert_eq!(outcomes, vec![ItemOutcome::Interrupted]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_submission_while_active_runs_once() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();
    let id = episode_identity(2);

    assert_matches!(
        coordinator.submit(&episode(2), false).unwrap(),
        AcceptOutcome::Accepted(_)
    );
    let ingested = {
        let conn = get_conn(&h.db).unwrap();
        ongoing::get_ongoing(&conn, &id).unwrap().unwrap().ingested_at
    };

    assert_matches!(
        coordinator.submit(&episode(2), true).unwrap(),
        AcceptOutcome::DuplicateActive
    );
    assert_eq!(coordinator.snapshot().waiting, vec![id.clone()]);
    {
        let conn = get_conn(&h.db).unwrap();
        let entry = ongoing::get_ongoing(&conn, &id).unwrap().unwrap();
        assert_eq!(entry.ingested_at, ingested);
    }

    let dispatcher = coordinator.start_dispatcher();
    let outcomes = coordinator.wait_idle().await;
    assert_matches!(outcomes[..], [ItemOutcome::Completed { .. }]);
    assert_eq!(h.transcoder.calls(), 2);

    let conn = get_conn(&h.db).unwrap();
    assert!(!ongoing::is_ongoing(&conn, &id).unwrap());
    drop(conn);

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_forced_submission_readmits_orphaned_entry() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();
    let id = episode_identity(4);

    // Ongoing in the database with no pipeline behind it.
    assert_matches!(
        coordinator.submit(&episode(4), false).unwrap(),
        AcceptOutcome::Accepted(_)
    );
    coordinator.shutdown();
    assert_eq!(coordinator.wait_idle().await, vec![ItemOutcome::Interrupted]);

    let restarted = h.coordinator();
    assert_matches!(
        restarted.submit(&episode(4), false).unwrap(),
        AcceptOutcome::DuplicateActive
    );
    assert_matches!(
        restarted.submit(&episode(4), true).unwrap(),
        AcceptOutcome::Accepted(item) if item.identity == id
    );

    let dispatcher = restarted.start_dispatcher();
    let outcomes = restarted.wait_idle().await;
    assert_matches!(outcomes[..], [ItemOutcome::Completed { .. }]);
    restarted.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_items_are_admitted_at_the_dispatcher_cadence() {
    let h = TestHarness::with_cadence(10);
    let coordinator = h.coordinator();

    for ep in 1..=3 {
        coordinator.submit(&episode(ep), false).unwrap();
    }
    let dispatcher = coordinator.start_dispatcher();
    coordinator.wait_idle().await;

    let log = coordinator.queue().slot().acquisition_log();
    let first_per_item: Vec<_> = (1..=3)
        .filter_map(|ep| {
            let id = episode_identity(ep);
            log.iter().find(|(holder, _)| *holder == id).map(|(_, at)| *at)
        })
        .collect();
    assert_eq!(first_per_item.len(), 3);
    for pair in first_per_item.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(10));
    }

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

// ---------------------------------------------------------------------------
// Cancellation and shutdown
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_waiting_item_abandons_it() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();
    let id = episode_identity(4);

    coordinator.submit(&episode(4), false).unwrap();
    assert_eq!(coordinator.cancel(&id), CancelOutcome::Dequeued);

    let outcomes = coordinator.wait_idle().await;
    assert_eq!(outcomes, vec![ItemOutcome::Cancelled]);
    assert_eq!(h.downloader.calls(), 0);

    let conn = get_conn(&h.db).unwrap();
    assert!(!ongoing::is_ongoing(&conn, &id).unwrap());
    drop(conn);

    // Cancelling leaves no failure marks behind.
    assert_matches!(
        coordinator.submit(&episode(4), false).unwrap(),
        AcceptOutcome::Accepted(_)
    );
    coordinator.shutdown();
    coordinator.wait_idle().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancel_running_item_stops_transcode() {
    let h = TestHarness::new();
    h.transcoder.block_until_cancelled(true);
    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();
    let id = episode_identity(6);

    coordinator.submit(&episode(6), false).unwrap();
    tokio::time::timeout(Duration::from_secs(10), h.transcoder.started.notified())
        .await
        .expect("transcode never started");

    assert_eq!(coordinator.cancel(&id), CancelOutcome::Signalled);
    let outcomes = coordinator.wait_idle().await;
    assert_eq!(outcomes, vec![ItemOutcome::Cancelled]);
    assert_eq!(coordinator.queue().slot().holders(), 0);
    assert!(h.store().get_release(&id).await.unwrap().is_none());

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shutdown_leaves_item_ongoing_for_restart() {
    let h = TestHarness::new();
    h.transcoder.block_until_cancelled(true);
    let id = episode_identity(10);

    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();
    coordinator.submit(&episode(10), false).unwrap();
    tokio::time::timeout(Duration::from_secs(10), h.transcoder.started.notified())
        .await
        .expect("transcode never started");

    coordinator.shutdown();
    let outcomes = coordinator.wait_idle().await;
    dispatcher.await.unwrap();
    assert_eq!(outcomes, vec![ItemOutcome::Interrupted]);

    {
        let conn = get_conn(&h.db).unwrap();
        assert!(ongoing::is_ongoing(&conn, &id).unwrap());
        assert!(ongoing::list_failures(&conn, &id).unwrap().is_empty());
    }

    // A fresh coordinator readmits the item and finishes it.
    h.transcoder.block_until_cancelled(false);
    let restarted = h.coordinator();
    assert_eq!(restarted.recover().unwrap(), 1);
    let dispatcher = restarted.start_dispatcher();
    let outcomes = restarted.wait_idle().await;
    assert_eq!(
        outcomes,
        vec![ItemOutcome::Completed {
            uploaded: labels(&["720", "1080"])
        }]
    );

    restarted.shutdown();
    dispatcher.await.unwrap();
}

// ---------------------------------------------------------------------------
// Persistence failures
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_record_failure_is_retried_then_alerted() {
    let h = TestHarness::new();
    {
        let conn = get_conn(&h.db).unwrap();
        conn.execute_batch(
            "CREATE TRIGGER reject_uploaded_insert BEFORE INSERT ON release_qualities
             WHEN NEW.status = 'uploaded'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;
             CREATE TRIGGER reject_uploaded_update BEFORE UPDATE ON release_qualities
             WHEN NEW.status = 'uploaded'
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;",
        )
        .unwrap();
    }

    let coordinator = h.coordinator();
    let dispatcher = coordinator.start_dispatcher();
    let id = episode_identity(8);

    coordinator.submit(&episode(8), false).unwrap();
    let outcomes = coordinator.wait_idle().await;
    assert_matches!(
        &outcomes[..],
        [ItemOutcome::Failed { uploaded, failed, .. }]
            if uploaded.is_empty() && *failed == labels(&["720", "1080"])
    );

    let alerts = h.channel.alerts();
    let escalations: Vec<_> = alerts
        .iter()
        .filter(|a| a.contains("record quality after 3 attempt(s)"))
        .collect();
    assert_eq!(escalations.len(), 2, "alerts: {:?}", alerts);

    let record = h.store().get_release(&id).await.unwrap().unwrap();
    for quality in ["720", "1080"] {
        let quality = QualityLabel::new(quality);
        assert!(!record.is_uploaded(&quality));
        assert_eq!(record.qualities[&quality].status, QualityStatus::Pending);
    }
    assert!(h.channel.announcements().is_empty());

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ongoing_release_failure_is_alerted() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();

    coordinator.submit(&episode(6), false).unwrap();
    {
        let conn = get_conn(&h.db).unwrap();
        conn.execute_batch("DROP TABLE ongoing_items;").unwrap();
    }

    let dispatcher = coordinator.start_dispatcher();
    let outcomes = coordinator.wait_idle().await;
    assert_matches!(outcomes[..], [ItemOutcome::Completed { .. }]);

    let alerts = h.channel.alerts();
    assert!(
        alerts
            .iter()
            .any(|a| a.contains("release ongoing entry after 3 attempt(s)")),
        "alerts: {:?}",
        alerts
    );

    coordinator.shutdown();
    dispatcher.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_poll_accept_failure_is_alerted() {
    let h = TestHarness::new();
    let coordinator = h.coordinator();
    {
        let conn = get_conn(&h.db).unwrap();
        conn.execute_batch("DROP TABLE ongoing_items;").unwrap();
    }

    let feed = StaticFeed::new(vec![episode(3)]);
    assert_eq!(coordinator.poll_once(&feed).await.unwrap(), 0);

    let alerts = h.channel.alerts();
    assert_eq!(alerts.len(), 1, "alerts: {:?}", alerts);
    assert!(alerts[0].contains("accepting"));
    assert!(coordinator.snapshot().waiting.is_empty());
    assert!(coordinator.wait_idle().await.is_empty());
}
