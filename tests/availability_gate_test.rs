//! Availability Gate Tests
//!
//! End-to-end tests for batches arriving while the cluster blocks writes:
//! - A retryable block holds the batch until the cluster recovers
//! - Timing out surfaces the original block cause
//! - Node shutdown fails waiting batches terminally

mod common;

use std::time::Duration;

use bulkgate::cluster::{ClusterBlock, ClusterMetadata, ClusterState, IndexState};
use bulkgate::types::BatchRequest;
use bulkgate::Error;

fn metadata() -> ClusterMetadata {
    ClusterMetadata::new().with_index(IndexState::new("logs"))
}

fn blocked_state() -> ClusterState {
    ClusterState::new(metadata()).with_block(ClusterBlock::new("electing master", true))
}

#[tokio::test]
async fn batch_waits_out_a_retryable_block() {
    let setup = common::setup(blocked_state());
    let coordinator = setup.coordinator.clone();

    let batch = BatchRequest::new(vec![common::doc("logs", "d1")]);
    let execution = tokio::spawn(async move { coordinator.execute(batch).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    setup.cluster.publish(ClusterState::new(metadata()));

    let response = execution.await.unwrap().unwrap();
    assert!(!response.has_failures());
    assert_eq!(setup.replication.seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn timeout_surfaces_the_original_block_cause() {
    let setup = common::setup(blocked_state());

    let batch =
        BatchRequest::new(vec![common::doc("logs", "d1")]).with_timeout(Duration::from_millis(30));
    let err = setup.coordinator.execute(batch).await.unwrap_err();

    assert!(
        matches!(err, Error::ClusterBlocked { reason } if reason == "electing master"),
        "the client learns why it was blocked, not that a timer fired"
    );
    assert!(setup.replication.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn non_retryable_block_fails_without_waiting() {
    let state =
        ClusterState::new(metadata()).with_block(ClusterBlock::new("cluster read-only", false));
    let setup = common::setup(state);

    // A generous timeout that must not be consumed.
    let batch =
        BatchRequest::new(vec![common::doc("logs", "d1")]).with_timeout(Duration::from_secs(60));
    let start = std::time::Instant::now();
    let err = setup.coordinator.execute(batch).await.unwrap_err();

    assert!(matches!(err, Error::ClusterBlocked { reason } if reason == "cluster read-only"));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn shutdown_fails_waiting_batches_with_node_closed() {
    let setup = common::setup(blocked_state());
    let coordinator = setup.coordinator.clone();

    let batch = BatchRequest::new(vec![common::doc("logs", "d1")]);
    let execution = tokio::spawn(async move { coordinator.execute(batch).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    setup.cluster.close();

    let err = execution.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::NodeClosed));
}

#[tokio::test]
async fn budget_is_released_after_a_blocked_failure() {
    let setup = common::setup(blocked_state());

    let batch =
        BatchRequest::new(vec![common::doc("logs", "d1")]).with_timeout(Duration::from_millis(30));
    let _ = setup.coordinator.execute(batch).await.unwrap_err();

    let admission = setup.coordinator.admission();
    assert_eq!(admission.outstanding_operations(), 0);
    assert_eq!(admission.outstanding_bytes(), 0);
}
