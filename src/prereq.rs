//! # Prerequisite Orchestration
//!
//! Executes a [`TargetPlan`](crate::resolve::TargetPlan): creates missing
//! targets and rolls over marked data streams, concurrently, then hands the
//! batch onward exactly once.
//!
//! ## The Latch
//!
//! Every prerequisite action runs as its own task; the orchestrator joins
//! them all before returning. That join is the single fan-in point — there is
//! no path on which the batch proceeds while a creation is still in flight,
//! and no path on which it proceeds twice.
//!
//! ## Failure Isolation
//!
//! A failed prerequisite never aborts the batch. It fails exactly the items
//! addressing that target (their slots are claimed, the items terminated)
//! and every other target's items continue untouched. A creation that loses
//! the race to another writer (`AlreadyExists`) is a success: the target is
//! there, which is all the batch needs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::resolve::{CreateTargetRequest, RolloverTarget, TargetPlan};
use crate::results::ResponseSlots;
use crate::types::{BatchRequest, ItemResult};

// =============================================================================
// Collaborator Seams
// =============================================================================

/// Outcome of creating one target.
#[derive(Debug, Clone)]
pub enum CreateResult {
    /// The target was created.
    Created,
    /// Another writer created it first. Success from this batch's view.
    AlreadyExists,
    /// The target can never be created as asked (e.g. the name is invalid or
    /// matches no allowed pattern). Recorded in the uncreatable map; its
    /// items stay in the batch for the replication layer to fast-fail
    /// against that map, never to actually write.
    NotFound(String),
    /// The creation failed for any other reason.
    Failed(String),
}

/// Outcome of rolling over one data stream.
#[derive(Debug, Clone)]
pub enum RolloverResult {
    /// The write index rolled over.
    RolledOver {
        /// The newly created write index.
        new_index: String,
    },
    /// Another writer rolled it over first, or the condition cleared.
    Skipped,
    /// The rollover failed.
    Failed(String),
}

/// Creates missing targets on the cluster.
#[async_trait]
pub trait TargetCreator: Send + Sync {
    async fn create(&self, request: CreateTargetRequest) -> CreateResult;
}

/// Rolls over data stream write indices (backing or failure store).
#[async_trait]
pub trait RolloverExecutor: Send + Sync {
    async fn rollover(&self, target: RolloverTarget, master_timeout: Duration) -> RolloverResult;
}

// =============================================================================
// Orchestration
// =============================================================================

/// What the orchestrator learned while executing the plan.
#[derive(Debug, Default)]
pub struct PrerequisiteReport {
    /// Targets that can never be created, by name, with the cause. Their
    /// items stay live; the replication layer consults this map to
    /// fast-fail exactly those items instead of attempting the write.
    pub uncreatable: HashMap<String, String>,
}

enum ActionOutcome {
    Create(String, CreateResult),
    Rollover(RolloverTarget, RolloverResult),
}

/// Executes `plan` and folds the outcomes into the batch. Returns only after
/// every action has completed; items for failed targets are terminated with
/// their slots claimed, all other items stay live.
pub async fn execute_prerequisites(
    batch: &mut BatchRequest,
    plan: TargetPlan,
    creator: &Arc<dyn TargetCreator>,
    rollover: &Arc<dyn RolloverExecutor>,
    master_timeout: Duration,
    slots: &ResponseSlots,
) -> PrerequisiteReport {
    let mut actions = Vec::with_capacity(plan.auto_create.len() + plan.rollovers.len());

    for (name, request) in plan.auto_create {
        let creator = Arc::clone(creator);
        actions.push(tokio::spawn(async move {
            let result = creator.create(request).await;
            ActionOutcome::Create(name, result)
        }));
    }
    for target in plan.rollovers {
        let rollover = Arc::clone(rollover);
        actions.push(tokio::spawn(async move {
            let result = rollover.rollover(target.clone(), master_timeout).await;
            ActionOutcome::Rollover(target, result)
        }));
    }

    let mut report = PrerequisiteReport::default();
    for joined in join_all(actions).await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            // A panicked action task; treat it like any other infrastructure
            // failure, without knowing which target it served.
            Err(err) => {
                warn!(error = %err, "prerequisite action task failed to complete");
                continue;
            }
        };
        match outcome {
            ActionOutcome::Create(name, CreateResult::Created) => {
                debug!(target_name = %name, "auto-created missing target");
            }
            ActionOutcome::Create(_, CreateResult::AlreadyExists) => {}
            ActionOutcome::Create(name, CreateResult::NotFound(reason)) => {
                report.uncreatable.insert(name, reason);
            }
            ActionOutcome::Create(name, CreateResult::Failed(reason)) => {
                fail_items_for_target(batch, slots, &name, &reason, None);
            }
            ActionOutcome::Rollover(target, RolloverResult::RolledOver { new_index }) => {
                debug!(
                    target_name = %target.name,
                    failure_store = target.failure_store,
                    new_index,
                    "rolled over data stream write index"
                );
            }
            ActionOutcome::Rollover(_, RolloverResult::Skipped) => {}
            ActionOutcome::Rollover(target, RolloverResult::Failed(reason)) => {
                fail_items_for_target(
                    batch,
                    slots,
                    target.name.as_str(),
                    &reason,
                    Some(target.failure_store),
                );
            }
        }
    }

    report
}

/// Terminates every live item addressing `target`, claiming each item's slot
/// with the failure. `failure_store` narrows the match to items writing to
/// (or not writing to) the failure store, for rollover failures that only
/// affect one side.
fn fail_items_for_target(
    batch: &mut BatchRequest,
    slots: &ResponseSlots,
    target: &str,
    reason: &str,
    failure_store: Option<bool>,
) {
    let affected: Vec<usize> = batch
        .live()
        .filter(|(_, item)| {
            item.target.as_str() == target
                && failure_store.is_none_or(|fs| item.write_to_failure_store == fs)
        })
        .map(|(slot, _)| slot)
        .collect();

    for slot in affected {
        if let Some(item) = batch.item(slot) {
            slots.claim(slot, ItemResult::failed(item, reason));
        }
        batch.clear_item(slot);
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::AUTO_CREATE_CAUSE;
    use crate::types::{TargetName, WriteItem};
    use std::sync::Mutex;

    struct ScriptedCreator {
        results: Mutex<HashMap<String, CreateResult>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedCreator {
        fn new(results: Vec<(&str, CreateResult)>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(
                    results
                        .into_iter()
                        .map(|(name, result)| (name.to_string(), result))
                        .collect(),
                ),
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl TargetCreator for ScriptedCreator {
        async fn create(&self, request: CreateTargetRequest) -> CreateResult {
            self.calls
                .lock()
                .unwrap()
                .push(request.name.as_str().to_string());
            self.results
                .lock()
                .unwrap()
                .remove(request.name.as_str())
                .unwrap_or(CreateResult::Created)
        }
    }

    struct ScriptedRollover {
        result: RolloverResult,
    }

    #[async_trait]
    impl RolloverExecutor for ScriptedRollover {
        async fn rollover(&self, _: RolloverTarget, _: Duration) -> RolloverResult {
            self.result.clone()
        }
    }

    fn create_request(name: &str) -> CreateTargetRequest {
        CreateTargetRequest {
            name: TargetName::new(name),
            require_data_stream: false,
            initialize_failure_store: false,
            cause: AUTO_CREATE_CAUSE,
            master_timeout: Duration::from_secs(60),
        }
    }

    fn plan_with_creates(names: &[&str]) -> TargetPlan {
        let mut plan = TargetPlan::default();
        for name in names {
            plan.auto_create
                .insert(name.to_string(), create_request(name));
        }
        plan
    }

    fn no_rollover() -> Arc<dyn RolloverExecutor> {
        Arc::new(ScriptedRollover {
            result: RolloverResult::Skipped,
        })
    }

    #[tokio::test]
    async fn test_failed_create_only_fails_its_own_items() {
        let mut batch = BatchRequest::new(vec![
            WriteItem::index("good", b"{}".to_vec()),
            WriteItem::index("bad", b"{}".to_vec()),
            WriteItem::index("good", b"{}".to_vec()),
        ]);
        let slots = ResponseSlots::new(batch.len());
        let creator: Arc<dyn TargetCreator> = ScriptedCreator::new(vec![
            ("good", CreateResult::Created),
            ("bad", CreateResult::Failed("disk full".to_string())),
        ]);

        execute_prerequisites(
            &mut batch,
            plan_with_creates(&["good", "bad"]),
            &creator,
            &no_rollover(),
            Duration::from_secs(60),
            &slots,
        )
        .await;

        assert!(batch.item(0).is_some());
        assert!(batch.item(1).is_none(), "bad target's item terminated");
        assert!(batch.item(2).is_some());
        assert!(slots.is_claimed(1));
        assert!(!slots.is_claimed(0));
    }

    #[tokio::test]
    async fn test_already_exists_is_a_success() {
        let mut batch = BatchRequest::new(vec![WriteItem::index("racy", b"{}".to_vec())]);
        let slots = ResponseSlots::new(batch.len());
        let creator: Arc<dyn TargetCreator> =
            ScriptedCreator::new(vec![("racy", CreateResult::AlreadyExists)]);

        let report = execute_prerequisites(
            &mut batch,
            plan_with_creates(&["racy"]),
            &creator,
            &no_rollover(),
            Duration::from_secs(60),
            &slots,
        )
        .await;

        assert!(batch.item(0).is_some(), "item continues to replication");
        assert!(report.uncreatable.is_empty());
    }

    #[tokio::test]
    async fn test_uncreatable_target_is_reported_but_items_stay_live() {
        let mut batch = BatchRequest::new(vec![WriteItem::index("no-such", b"{}".to_vec())]);
        let slots = ResponseSlots::new(batch.len());
        let creator: Arc<dyn TargetCreator> = ScriptedCreator::new(vec![(
            "no-such",
            CreateResult::NotFound("no matching pattern".to_string()),
        )]);

        let report = execute_prerequisites(
            &mut batch,
            plan_with_creates(&["no-such"]),
            &creator,
            &no_rollover(),
            Duration::from_secs(60),
            &slots,
        )
        .await;

        assert_eq!(
            report.uncreatable.get("no-such").map(String::as_str),
            Some("no matching pattern")
        );
        // Replication fast-fails these against the map; the orchestrator
        // does not terminate them itself.
        assert!(batch.item(0).is_some());
        assert!(!slots.is_claimed(0));
    }

    #[tokio::test]
    async fn test_each_target_created_exactly_once() {
        let mut batch = BatchRequest::new(vec![
            WriteItem::index("one", b"{}".to_vec()),
            WriteItem::index("two", b"{}".to_vec()),
        ]);
        let slots = ResponseSlots::new(batch.len());
        let creator = ScriptedCreator::new(vec![]);
        let creator_dyn: Arc<dyn TargetCreator> = Arc::clone(&creator) as _;

        execute_prerequisites(
            &mut batch,
            plan_with_creates(&["one", "two"]),
            &creator_dyn,
            &no_rollover(),
            Duration::from_secs(60),
            &slots,
        )
        .await;

        let mut calls = creator.calls.lock().unwrap().clone();
        calls.sort();
        assert_eq!(calls, vec!["one".to_string(), "two".to_string()]);
    }

    #[tokio::test]
    async fn test_rollover_failure_only_hits_the_matching_side() {
        let mut batch = BatchRequest::new(vec![
            WriteItem::create("logs", b"{}".to_vec()),
            WriteItem::create("logs", b"{}".to_vec()).with_write_to_failure_store(),
        ]);
        let slots = ResponseSlots::new(batch.len());
        let creator: Arc<dyn TargetCreator> = ScriptedCreator::new(vec![]);
        let rollover: Arc<dyn RolloverExecutor> = Arc::new(ScriptedRollover {
            result: RolloverResult::Failed("shard limit".to_string()),
        });

        let mut plan = TargetPlan::default();
        plan.rollovers.insert(RolloverTarget {
            name: TargetName::new("logs"),
            failure_store: true,
        });

        execute_prerequisites(
            &mut batch,
            plan,
            &creator,
            &rollover,
            Duration::from_secs(60),
            &slots,
        )
        .await;

        assert!(batch.item(0).is_some(), "backing-side item unaffected");
        assert!(batch.item(1).is_none(), "failure-store item terminated");
    }

    #[tokio::test]
    async fn test_empty_plan_changes_nothing() {
        let mut batch = BatchRequest::new(vec![WriteItem::index("logs", b"{}".to_vec())]);
        let slots = ResponseSlots::new(batch.len());
        let creator: Arc<dyn TargetCreator> = ScriptedCreator::new(vec![]);

        execute_prerequisites(
            &mut batch,
            TargetPlan::default(),
            &creator,
            &no_rollover(),
            Duration::from_secs(60),
            &slots,
        )
        .await;

        assert_eq!(batch.live_count(), 1);
    }
}
