//! # Target Resolution
//!
//! Before a batch can replicate, every target it names must exist and be
//! current. This module inspects a batch against a metadata snapshot and
//! produces a [`TargetPlan`]: the set of targets to auto-create and the set
//! of data streams whose write index must roll over first.
//!
//! Planning is pure — it reads the snapshot and the batch and touches
//! nothing. Execution of the plan lives in [`crate::prereq`].

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::cluster::ClusterState;
use crate::types::{BatchRequest, OpType, TargetName};

/// Cause tag recorded on auto-create requests, so index audit trails show
/// the creation was implicit.
pub const AUTO_CREATE_CAUSE: &str = "auto(batch write api)";

/// A request to create one missing target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateTargetRequest {
    /// The target to create.
    pub name: TargetName,

    /// At least one item insists the target be created as a data stream.
    pub require_data_stream: bool,

    /// The target's failure store should be initialized at creation,
    /// resolved from the matching data stream template.
    pub initialize_failure_store: bool,

    /// Why the creation happens; always [`AUTO_CREATE_CAUSE`] here.
    pub cause: &'static str,

    /// Master-operation timeout, inherited from the batch timeout.
    pub master_timeout: Duration,
}

/// A data stream whose write index must roll over before the batch lands.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RolloverTarget {
    /// The data stream name.
    pub name: TargetName,

    /// Rolls the failure store rather than the backing indices.
    pub failure_store: bool,
}

/// Everything that must happen before replication: creations and rollovers.
#[derive(Debug, Default)]
pub struct TargetPlan {
    /// Missing targets to create, keyed by name. Flags are OR-merged across
    /// all items addressing the same target.
    pub auto_create: HashMap<String, CreateTargetRequest>,

    /// Data streams marked for rollover on the next write.
    pub rollovers: HashSet<RolloverTarget>,
}

impl TargetPlan {
    /// Whether there is nothing to do and replication can proceed directly.
    pub fn is_empty(&self) -> bool {
        self.auto_create.is_empty() && self.rollovers.is_empty()
    }
}

/// Plans prerequisite actions for `batch` against the `state` snapshot.
///
/// For each live item:
///
/// - A missing target is added to the auto-create map, unless the item is a
///   DELETE with cluster-assigned versioning (deleting from a nonexistent
///   target is reported downstream, not fixed by creating it; an externally
///   versioned DELETE does create, to record the tombstone at that version).
/// - An item requiring an alias excludes its target from auto-creation
///   entirely, withdrawing any directive other items already contributed:
///   creating a concrete index could never satisfy the alias requirement,
///   so those items are left to fail downstream instead.
/// - An existing data stream marked rollover-on-write joins the rollover set,
///   on the failure-store side when the item writes there.
///
/// Existence checks are memoized per distinct name; a batch with ten thousand
/// items over three targets does three lookups.
pub fn plan_missing_targets(batch: &BatchRequest, state: &ClusterState) -> TargetPlan {
    let metadata = &state.metadata;
    let mut plan = TargetPlan::default();
    let mut existence: HashMap<&str, bool> = HashMap::new();
    let mut alias_required: HashSet<&str> = HashSet::new();

    for (_, item) in batch.live() {
        let name = item.target.as_str();
        let exists = *existence
            .entry(name)
            .or_insert_with(|| metadata.has_target(name));

        if !exists {
            if item.op_type == OpType::Delete && !item.version_type.is_external() {
                continue;
            }
            if item.require_alias {
                alias_required.insert(name);
                plan.auto_create.remove(name);
                continue;
            }
            if alias_required.contains(name) {
                continue;
            }
            let initialize_failure_store = metadata.should_store_failure(name);
            plan.auto_create
                .entry(name.to_string())
                .and_modify(|create| {
                    create.require_data_stream |= item.require_data_stream;
                    create.initialize_failure_store |= initialize_failure_store;
                })
                .or_insert_with(|| CreateTargetRequest {
                    name: item.target.clone(),
                    require_data_stream: item.require_data_stream,
                    initialize_failure_store,
                    cause: AUTO_CREATE_CAUSE,
                    master_timeout: batch.timeout,
                });
            continue;
        }

        if let Some(data_stream) = metadata.data_stream(name) {
            if item.write_to_failure_store {
                if data_stream.failure_rollover_on_write
                    && state.features.lazy_rollover_failure_store
                {
                    plan.rollovers.insert(RolloverTarget {
                        name: item.target.clone(),
                        failure_store: true,
                    });
                }
            } else if data_stream.rollover_on_write && state.features.lazy_rollover {
                plan.rollovers.insert(RolloverTarget {
                    name: item.target.clone(),
                    failure_store: false,
                });
            }
        }
    }

    plan
}

// =============================================================================
// Tests
// =============================================================================
