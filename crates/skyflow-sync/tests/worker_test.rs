mod common;

use common::{BrokenBus, FakeProvider, Harness, KIND, config, directory};
use skyflow_cloud::{Credential, LifecycleState, Resource};
use skyflow_sync::{
    MemoryCache, SnapshotCache, SubscriptionTracker, SyncError, SyncPriority, SyncWorker,
    snapshot_key,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn aws_credential(id: &str) -> Credential {
    Credential::new(id, format!("ws-{id}"), "aws")
}

#[tokio::test]
async fn test_first_cycle_publishes_lists_and_fills_cache() {
    let mut h = Harness::new(config(), directory(&[aws_credential("cred-a")]), false);
    h.provider
        .set("cred-a", "us-east-1", vec![Resource::new("c1", "ACTIVE")]);

    let report = h.worker.sync_all().await;
    assert_eq!(report.credentials, 1);
    assert_eq!(report.regions_synced, 2);
    assert_eq!(report.failures, 0);
    assert_eq!(report.events_published, 2);

    let events = h.drain();
    assert_eq!(events.len(), 2);
    assert!(
        events
            .iter()
            .all(|e| e.event_type == "aws.kubernetes-cluster.list")
    );

    let key = snapshot_key(KIND, "aws", "cred-a", "us-east-1");
    let cached = h.cache.get(&key).await.unwrap().unwrap();
    assert_eq!(cached.resources[0].id, "c1");

    let empty = h
        .cache
        .get(&snapshot_key(KIND, "aws", "cred-a", "eu-west-1"))
        .await
        .unwrap()
        .unwrap();
    assert!(empty.is_empty());
}

#[tokio::test]
async fn test_second_cycle_publishes_diff_then_list() {
    let mut h = Harness::new(config(), directory(&[aws_credential("cred-a")]), false);
    h.provider
        .set("cred-a", "us-east-1", vec![Resource::new("c1", "ACTIVE")]);
    h.worker.sync_all().await;
    h.drain();

    h.provider.set(
        "cred-a",
        "us-east-1",
        vec![Resource::new("c1", "UPDATING"), Resource::new("c2", "ACTIVE")],
    );
    let report = h.worker.sync_all().await;
    assert_eq!(report.events_published, 4);

    let events: Vec<_> = h
        .drain()
        .into_iter()
        .filter(|e| e.scope.region == "us-east-1")
        .collect();
    let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec![
            "aws.kubernetes-cluster.updated",
            "aws.kubernetes-cluster.created",
            "aws.kubernetes-cluster.list",
        ]
    );

    let updated = &events[0];
    assert_eq!(updated.scope.credential_id, "cred-a");
    assert_eq!(updated.data["id"], "c1");
    assert_eq!(updated.data["old_status"], "ACTIVE");
    assert_eq!(updated.data["new_status"], "UPDATING");
    assert_eq!(events[2].data["clusters"].as_array().unwrap().len(), 2);

    // cache replaced wholesale
    let cached = h
        .cache
        .get(&snapshot_key(KIND, "aws", "cred-a", "us-east-1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached.get("c1").unwrap().status, "UPDATING");
}

#[tokio::test]
async fn test_failing_credential_does_not_block_others() {
    let mut h = Harness::new(
        config(),
        directory(&[aws_credential("cred-a"), aws_credential("cred-b")]),
        false,
    );
    h.provider.fail("cred-a");
    h.provider
        .set("cred-b", "us-east-1", vec![Resource::new("c9", "ACTIVE")]);

    let report = h.worker.sync_all().await;
    assert_eq!(report.credentials, 2);
    assert_eq!(report.failures, 2);
    assert_eq!(report.regions_synced, 2);

    let events = h.drain();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.scope.credential_id == "cred-b"));

    assert!(
        h.cache
            .get(&snapshot_key(KIND, "aws", "cred-b", "us-east-1"))
            .await
            .unwrap()
            .is_some()
    );
    assert!(
        h.cache
            .get(&snapshot_key(KIND, "aws", "cred-a", "us-east-1"))
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn test_panicking_credential_task_is_contained() {
    let h = Harness::new(
        config(),
        directory(&[aws_credential("cred-a"), aws_credential("cred-p")]),
        false,
    );
    h.provider.panic_on("cred-p");

    let report = h.worker.sync_all().await;
    assert_eq!(report.failures, 1);
    assert_eq!(report.credentials, 1);
    assert_eq!(report.regions_synced, 2);
}

#[tokio::test]
async fn test_inactive_and_unsupported_credentials_skipped() {
    let h = Harness::new(
        config(),
        directory(&[
            aws_credential("cred-off").inactive(),
            Credential::new("cred-oci", "ws-oci", "oracle"),
            Credential::new("cred-g", "ws-g", "gcp"),
        ]),
        false,
    );

    let report = h.worker.sync_all().await;
    assert_eq!(report.credentials, 1);
    assert_eq!(
        h.provider.calls(),
        vec![("cred-g".to_string(), "us-central1".to_string())]
    );
}

#[tokio::test]
async fn test_workspaces_listed_in_pages() {
    let credentials: Vec<Credential> = (0..5).map(|i| aws_credential(&format!("c{i}"))).collect();
    let mut config = config();
    config.batch_size = 2;

    let h = Harness::new(config, directory(&credentials), false);
    let report = h.worker.sync_all().await;
    assert_eq!(report.credentials, 5);
    assert_eq!(report.regions_synced, 10);
}

#[tokio::test]
async fn test_subscribed_regions_replace_defaults() {
    let h = Harness::new(config(), directory(&[aws_credential("cred-a")]), true);
    h.subscriptions
        .subscribe(KIND, "cred-a", "ap-southeast-1", "conn-1")
        .await;

    h.worker.sync_all().await;
    assert_eq!(
        h.provider.calls(),
        vec![("cred-a".to_string(), "ap-southeast-1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_fetch_timeout_counts_as_failure() {
    let h = Harness::new(config(), directory(&[aws_credential("cred-a")]), false);
    h.provider.set_delay(Duration::from_secs(120));

    let report = h.worker.sync_all().await;
    assert_eq!(report.regions_synced, 0);
    assert_eq!(report.failures, 2);
    assert!(h.cache.is_empty().await);
}

#[tokio::test]
async fn test_publish_failures_still_cache() {
    let provider = Arc::new(FakeProvider::default());
    provider.set("cred-a", "us-east-1", vec![Resource::new("c1", "ACTIVE")]);
    let cache = Arc::new(MemoryCache::new());

    let worker = SyncWorker::new(
        config(),
        provider,
        Arc::new(directory(&[aws_credential("cred-a")])),
        cache.clone(),
        Arc::new(BrokenBus),
        SubscriptionTracker::disabled(KIND),
    );

    let report = worker.sync_all().await;
    assert_eq!(report.events_published, 0);
    assert_eq!(report.failures, 2);
    assert_eq!(report.regions_synced, 2);
    assert_eq!(cache.len().await, 2);
}

#[tokio::test(start_paused = true)]
async fn test_lifecycle_and_fallback_schedule() {
    let h = Harness::new(config(), directory(&[aws_credential("cred-a")]), false);

    h.worker.start().unwrap();
    assert!(matches!(h.worker.start(), Err(SyncError::AlreadyRunning(_))));
    assert_eq!(h.worker.state(), LifecycleState::Running);

    // immediate full sync
    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.provider.calls().len(), 2);

    sleep(Duration::from_secs(298)).await;
    assert_eq!(h.provider.calls().len(), 2);

    // base interval elapsed
    sleep(Duration::from_secs(2)).await;
    assert_eq!(h.provider.calls().len(), 4);

    h.worker.stop().await;
    h.worker.stop().await;
    assert_eq!(h.worker.state(), LifecycleState::Stopped);

    sleep(Duration::from_secs(900)).await;
    assert_eq!(h.provider.calls().len(), 4);

    // restart after stop is allowed
    h.worker.start().unwrap();
    h.worker.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_priority_tickers_follow_demand() {
    let h = Harness::new(config(), directory(&[aws_credential("cred-a")]), true);
    for i in 0..6 {
        h.subscriptions
            .subscribe(KIND, "cred-a", "us-east-1", &format!("conn-{i}"))
            .await;
    }

    h.worker.start().unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(h.provider.calls_for_region("us-east-1"), 1);

    // first high-priority tick
    sleep(Duration::from_secs(64)).await;
    assert_eq!(h.provider.calls_for_region("us-east-1"), 2);
    assert_eq!(h.provider.calls_for_region("eu-west-1"), 0);

    // high ticks every minute; the low tick at 10m covers default regions
    sleep(Duration::from_secs(540)).await;
    h.worker.stop().await;
    assert_eq!(h.provider.calls_for_region("us-east-1"), 12);
    assert_eq!(h.provider.calls_for_region("eu-west-1"), 1);
}

#[tokio::test]
async fn test_priority_cycle_selects_matching_pairs() {
    let h = Harness::new(
        config(),
        directory(&[aws_credential("cred-a"), aws_credential("cred-b")]),
        true,
    );
    h.subscriptions
        .subscribe(KIND, "cred-a", "us-east-1", "conn-1")
        .await;
    for i in 0..5 {
        h.subscriptions
            .subscribe(KIND, "cred-b", "eu-west-1", &format!("conn-{i}"))
            .await;
    }

    let report = h.worker.sync_priority(SyncPriority::Medium).await;
    assert_eq!(report.credentials, 1);
    assert_eq!(
        h.provider.calls(),
        vec![("cred-a".to_string(), "us-east-1".to_string())]
    );

    // synced moments ago at the same priority
    let report = h.worker.sync_priority(SyncPriority::Medium).await;
    assert_eq!(report.regions_synced, 0);

    let report = h.worker.sync_priority(SyncPriority::High).await;
    assert_eq!(report.regions_synced, 1);
    assert_eq!(
        h.provider.calls().last().unwrap(),
        &("cred-b".to_string(), "eu-west-1".to_string())
    );
}
