//! Integration tests for the watch feed and reconciliation sweep

mod common;

use chrono::{TimeZone, Utc};
use common::{eventually, harness, pod, with_job_id, FakeBatch, FakeControlPlane, FakeStatus, FakeStream};
use scheduler_lib::health::components;
use scheduler_lib::source::SweepResults;
use scheduler_lib::{ComponentStatus, RetryPolicy, SweepLoop, WatchFeed};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::sync::broadcast;

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_delay: Duration::from_millis(10),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_sweep_runs_every_listed_pod() {
    let mut old = with_job_id(pod("old", "100m", "64Mi"), "1.pbs");
    old.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    let mut new = with_job_id(pod("new", "100m", "64Mi"), "2.pbs");
    new.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    let mut leaving = pod("leaving", "100m", "64Mi");
    leaving.terminating = true;

    let h = harness(
        FakeControlPlane::with_pods(vec![new, leaving, old]),
        FakeBatch::always(FakeStatus::Placed("nodeA/0".to_string())),
    );
    let sweep = SweepLoop::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        Duration::from_secs(20),
        h.health.clone(),
    );

    let results = sweep.sweep_once().await;

    assert_eq!(
        results,
        SweepResults {
            listed: 3,
            bound: 2,
            pending: 0,
            failed: 0,
            skipped: 1,
            errors: 0,
        }
    );
    let mut bound: Vec<_> = h.control_plane.bindings().into_iter().map(|(name, _)| name).collect();
    bound.sort();
    assert_eq!(bound, vec!["new", "old"]);
    assert!(h.batch.submits().is_empty());
}

#[tokio::test]
async fn test_sweep_counts_pending_and_failed() {
    let h = harness(
        FakeControlPlane::with_pods(vec![
            with_job_id(pod("waiting", "100m", "64Mi"), "1.pbs"),
            pod("broken", "lots", "64Mi"),
        ]),
        FakeBatch::always(FakeStatus::Queued),
    );
    let sweep = SweepLoop::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        Duration::from_secs(20),
        h.health.clone(),
    );

    let results = sweep.sweep_once().await;

    assert_eq!(results.listed, 2);
    assert_eq!(results.pending, 1);
    assert_eq!(results.failed, 1);
}

#[tokio::test]
async fn test_sweep_list_failure_degrades_health() {
    let h = harness(FakeControlPlane::default(), FakeBatch::always(FakeStatus::Queued));
    h.control_plane.fail_list.store(true, Ordering::SeqCst);
    let sweep = SweepLoop::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        Duration::from_secs(20),
        h.health.clone(),
    );

    let results = sweep.sweep_once().await;

    assert_eq!(results.errors, 1);
    assert_eq!(results.listed, 0);
    let health = h.health.health().await;
    assert_eq!(health.components[components::SWEEP].status, ComponentStatus::Degraded);
}

#[tokio::test]
async fn test_sweep_drops_memo_of_unlisted_pod() {
    let p1 = pod("p1", "100m", "64Mi");
    let h = harness(
        FakeControlPlane::with_pods(vec![p1.clone()]),
        FakeBatch::always(FakeStatus::Queued),
    );
    h.control_plane.fail_patch.store(true, Ordering::SeqCst);
    let sweep = SweepLoop::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        Duration::from_secs(20),
        h.health.clone(),
    );

    let results = sweep.sweep_once().await;
    assert_eq!(results.failed, 1);
    assert_eq!(h.resolver.submitted_job(&p1).as_deref(), Some("1.pbs"));

    // Still listed: the memo survives the next sweep
    sweep.sweep_once().await;
    assert_eq!(h.resolver.submitted_job(&p1).as_deref(), Some("1.pbs"));
    assert_eq!(h.batch.submits().len(), 1);

    h.control_plane.pods.lock().unwrap().clear();
    let results = sweep.sweep_once().await;

    assert_eq!(results.listed, 0);
    assert_eq!(h.resolver.submitted_job(&p1), None);
}

#[tokio::test]
async fn test_sweep_loop_waits_one_interval_and_stops_on_shutdown() {
    let h = harness(
        FakeControlPlane::with_pods(vec![with_job_id(pod("p1", "100m", "64Mi"), "1.pbs")]),
        FakeBatch::always(FakeStatus::Placed("nodeA/0".to_string())),
    );
    let sweep = SweepLoop::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        Duration::from_millis(100),
        h.health.clone(),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(sweep.run(shutdown_rx));

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(h.control_plane.bindings().is_empty());

    let control_plane = h.control_plane.clone();
    assert!(eventually(|| control_plane.bindings().len() == 1).await);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("sweep loop did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_watch_reconnects_after_failures() {
    let p1 = with_job_id(pod("p1", "100m", "64Mi"), "1.pbs");
    let p2 = with_job_id(pod("p2", "100m", "64Mi"), "2.pbs");
    let h = harness(
        FakeControlPlane::with_streams(vec![
            FakeStream::OpenFails("connection refused".to_string()),
            FakeStream::PodsThenError(vec![p1], "unexpected EOF".to_string()),
            FakeStream::Pods(vec![p2]),
        ]),
        FakeBatch::always(FakeStatus::Placed("nodeB/0".to_string())),
    );
    let feed = WatchFeed::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        fast_retry(),
        h.health.clone(),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(feed.run(shutdown_rx));

    let control_plane = h.control_plane.clone();
    assert!(eventually(|| control_plane.bindings().len() == 2).await);
    // Failed open, broken stream, closed stream, then the idle stream
    assert!(eventually(|| control_plane.watch_opens.load(Ordering::SeqCst) == 4).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let health = h.health.health().await;
    assert_eq!(
        health.components[components::WATCH_FEED].status,
        ComponentStatus::Healthy
    );

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("watch feed did not stop")
        .unwrap();
}

#[tokio::test]
async fn test_watch_stops_when_retries_exhausted() {
    let h = harness(
        FakeControlPlane::with_streams(vec![
            FakeStream::OpenFails("forbidden".to_string()),
            FakeStream::OpenFails("forbidden".to_string()),
            FakeStream::OpenFails("forbidden".to_string()),
        ]),
        FakeBatch::always(FakeStatus::Queued),
    );
    let feed = WatchFeed::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        RetryPolicy {
            max_attempts: Some(2),
            ..fast_retry()
        },
        h.health.clone(),
    );
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

    tokio::time::timeout(Duration::from_secs(2), feed.run(shutdown_rx))
        .await
        .expect("watch feed kept retrying");

    assert_eq!(h.control_plane.watch_opens.load(Ordering::SeqCst), 2);
    let health = h.health.health().await;
    assert_eq!(
        health.components[components::WATCH_FEED].status,
        ComponentStatus::Unhealthy
    );
}

#[tokio::test]
async fn test_watch_shutdown_drains_dispatched_attempts() {
    let p1 = with_job_id(pod("p1", "100m", "64Mi"), "1.pbs");
    let h = harness(
        FakeControlPlane::with_streams(vec![FakeStream::Pods(vec![p1])]),
        FakeBatch::always(FakeStatus::Placed("nodeC/0".to_string()))
            .with_status_delay(Duration::from_millis(300)),
    );
    let feed = WatchFeed::new(
        h.control_plane.clone(),
        h.coordinator.clone(),
        fast_retry(),
        h.health.clone(),
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(feed.run(shutdown_rx));

    let batch = h.batch.clone();
    assert!(eventually(|| batch.status_queries().len() == 1).await);

    h.coordinator.close();
    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("watch feed did not stop")
        .unwrap();

    assert_eq!(
        h.control_plane.bindings(),
        vec![("p1".to_string(), "nodeC".to_string())]
    );
}
