//! # Ingest Preprocessing
//!
//! Items carrying an index-able payload may name an ingest pipeline, either
//! explicitly or through their target's default. This module resolves which
//! pipeline (if any) applies to each item, and folds the preprocessing
//! outcomes back into the batch.
//!
//! ## Outcome Folding
//!
//! The engine reports one outcome per processed item; each folds back into
//! the batch's positional slots:
//!
//! ```text
//! Transformed ──▶ item replaced in place, continues to replication
//! Dropped ──────▶ slot gets a NoOp result, item terminated
//! Failed ───┬──▶ target has a failure store: item redirected there,
//!           │    continues to replication
//!           └──▶ otherwise: slot gets a Failed result, item terminated
//! ```
//!
//! Resolution marks each item, so a batch re-entering the coordinator after
//! preprocessing never takes the ingest branch twice.

use async_trait::async_trait;

use crate::cluster::ClusterMetadata;
use crate::error::Result;
use crate::results::ResponseSlots;
use crate::types::{BatchRequest, BatchResponse, ItemResult, WriteItem};
use tracing::debug;

/// Reserved pipeline name meaning "explicitly no preprocessing". An item
/// resolved to this pipeline skips the ingest branch even when its target
/// has a default pipeline.
pub const NOOP_PIPELINE: &str = "_none";

/// Per-item result of running its pipeline.
#[derive(Debug)]
pub enum IngestOutcome {
    /// The document was transformed; the replacement continues through the
    /// rest of the coordinator.
    Transformed(WriteItem),

    /// A processor dropped the document. Not an error: the slot reports a
    /// no-op result.
    Dropped,

    /// The pipeline failed on this document.
    Failed {
        /// The processor failure cause.
        reason: String,
    },
}

/// Runs ingest pipelines over documents. Implemented by the local ingest
/// runtime on nodes that have one.
#[async_trait]
pub trait IngestEngine: Send + Sync {
    /// Processes the given `(slot, item)` pairs, returning one outcome per
    /// pair. Pair order is preserved; slots absent from the input must be
    /// absent from the output.
    async fn process(
        &self,
        items: Vec<(usize, WriteItem)>,
    ) -> Result<Vec<(usize, IngestOutcome)>>;
}

/// Hands a whole batch to a remote ingest-capable node, which runs the full
/// coordinator there and returns the final response. Used when the local
/// node cannot run pipelines itself.
#[async_trait]
pub trait IngestForwarder: Send + Sync {
    async fn forward(&self, batch: BatchRequest) -> Result<BatchResponse>;
}

/// Resolves the effective pipeline for every live item that is eligible and
/// not yet resolved: an explicit pipeline wins, otherwise the target's
/// default (index setting first, then template) applies. Marks each visited
/// item resolved.
///
/// Returns `true` when at least one live item ends up with a real pipeline
/// to run, i.e. the batch must take the ingest branch.
pub fn resolve_pipelines(batch: &mut BatchRequest, metadata: &ClusterMetadata) -> bool {
    for (_, item) in batch.live_mut() {
        if item.pipeline_resolved || !item.op_type.has_index_payload() {
            continue;
        }
        if item.pipeline.is_none() {
            item.pipeline = metadata
                .default_pipeline(item.target.as_str())
                .map(String::from);
        }
        item.pipeline_resolved = true;
    }

    batch.live().any(|(_, item)| {
        item.op_type.has_index_payload()
            && item
                .pipeline
                .as_deref()
                .is_some_and(|p| p != NOOP_PIPELINE)
    })
}

/// The `(slot, item)` pairs the engine should process: live, payload-bearing
/// items with a real pipeline.
pub fn items_for_ingest(batch: &BatchRequest) -> Vec<(usize, WriteItem)> {
    batch
        .live()
        .filter(|(_, item)| {
            item.op_type.has_index_payload()
                && item
                    .pipeline
                    .as_deref()
                    .is_some_and(|p| p != NOOP_PIPELINE)
        })
        .map(|(slot, item)| (slot, item.clone()))
        .collect()
}

/// Folds engine outcomes back into the batch. Dropped and terminally failed
/// items are cleared and their slots claimed; failures whose target has a
/// failure store are redirected there instead and stay live.
pub fn apply_outcomes(
    batch: &mut BatchRequest,
    outcomes: Vec<(usize, IngestOutcome)>,
    metadata: &ClusterMetadata,
    slots: &ResponseSlots,
) {
    for (slot, outcome) in outcomes {
        let Some(original) = batch.item(slot) else {
            continue;
        };
        match outcome {
            IngestOutcome::Transformed(mut item) => {
                item.pipeline_resolved = true;
                batch.replace_item(slot, item);
            }
            IngestOutcome::Dropped => {
                slots.claim(slot, ItemResult::noop(original));
                batch.clear_item(slot);
            }
            IngestOutcome::Failed { reason } => {
                let redirect = !original.write_to_failure_store
                    && metadata.should_store_failure(original.target.as_str());
                if redirect {
                    debug!(
                        target_name = %original.target,
                        reason,
                        "pipeline failed, redirecting document to the failure store"
                    );
                    let mut item = original.clone().with_write_to_failure_store();
                    item.pipeline_resolved = true;
                    batch.replace_item(slot, item);
                } else {
                    debug!(
                        target_name = %original.target,
                        reason,
                        "pipeline failed for a batch item"
                    );
                    slots.claim(slot, ItemResult::failed(original, reason));
                    batch.clear_item(slot);
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
