//! Redis job store integration tests.

use std::sync::Arc;
use std::time::Duration;

use vgen_models::{
    CancelEffect, GenerationRequest, JobErrorKind, JobRecord, JobResult, JobState, JobUpdate,
    StaleReason,
};
use vgen_queue::{JobStore, RedisJobStore, UpdateOutcome};

fn store() -> RedisJobStore {
    dotenvy::dotenv().ok();
    let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
    // Fresh namespace per test so runs never see each other's keys.
    let prefix = format!("vgen-test:{}", uuid::Uuid::new_v4());
    RedisJobStore::new(&url, prefix).expect("Failed to create store")
}

fn job(topic: &str) -> JobRecord {
    JobRecord::new(GenerationRequest::new(topic))
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_redis_connection() {
    let store = store();
    store.ping().await.expect("Failed to ping Redis");
    assert_eq!(store.queue_depth().await.unwrap(), 0);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_create_claim_complete() {
    let store = store();
    let record = job("How ABS brakes work");
    store.create(record.clone()).await.expect("Failed to create");

    let claimed = store.claim_next("w1").await.unwrap().expect("Expected a job");
    assert_eq!(claimed.id, record.id);
    assert_eq!(claimed.state, JobState::Running);
    assert!(store.claim_next("w2").await.unwrap().is_none());

    let result = JobResult {
        artifact_uri: "https://cdn.example.com/a.mp4".to_string(),
        duration_seconds: Some(60.0),
        size_bytes: Some(2048),
    };
    let outcome = store
        .update(&record.id, JobUpdate::complete("w1", result))
        .await
        .unwrap();
    assert!(outcome.is_applied());

    let outcome = store
        .update(&record.id, JobUpdate::guarded("w1").progress(5))
        .await
        .unwrap();
    assert_eq!(outcome, UpdateOutcome::Stale(StaleReason::Terminal));

    let stored = store.get(&record.id).await.unwrap().unwrap();
    assert_eq!(stored.progress, 100);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_concurrent_claims_are_exclusive() {
    let store = Arc::new(store());
    for i in 0..10 {
        store.create(job(&format!("topic {}", i))).await.unwrap();
    }

    let mut handles = Vec::new();
    for w in 0..4 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            while let Some(job) = store.claim_next(&format!("w{}", w)).await.unwrap() {
                ids.push(job.id);
            }
            ids
        }));
    }

    let mut all = Vec::new();
    for handle in handles {
        all.extend(handle.await.unwrap());
    }
    let total = all.len();
    all.sort();
    all.dedup();
    assert_eq!(total, 10);
    assert_eq!(all.len(), 10);
}

#[tokio::test]
#[ignore = "requires Redis"]
async fn test_cancel_and_recover() {
    let store = store();
    let queued = job("queued");
    let running = job("running");
    store.create(running.clone()).await.unwrap();
    store.create(queued.clone()).await.unwrap();
    store.claim_next("w1").await.unwrap();

    assert_eq!(
        store.request_cancel(&queued.id).await.unwrap(),
        Some(CancelEffect::Cancelled)
    );
    assert_eq!(store.queue_depth().await.unwrap(), 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let report = store
        .recover_stale(Duration::from_millis(10), 0)
        .await
        .unwrap();
    assert_eq!(report.failed, vec![running.id.clone()]);

    let stored = store.get(&running.id).await.unwrap().unwrap();
    assert_eq!(stored.error.unwrap().kind, JobErrorKind::WorkerLost);

    let evicted = store.evict_older_than(Duration::ZERO).await.unwrap();
    assert_eq!(evicted, 2);
    assert!(store.list_recent(10).await.unwrap().is_empty());
}
