//! # The Batch Write Coordinator
//!
//! [`BulkCoordinator`] ties the stages together. One batch flows through:
//!
//! ```text
//!  execute()
//!     │ 1. empty?  ──────────────────────────▶ empty response, no permit
//!     │ 2. admission permit (ops + bytes)
//!     │ 3. route to a lane (system / general)
//!     ▼
//!  lane worker ── run_pipeline ──────────────────────────────┐
//!     │ 4. availability gate (block wait, bounded)           │
//!     │ 5. ingest branch (first pass only)                   │
//!     │      local engine ──▶ re-enter pipeline, forced ─────┘
//!     │      no local engine ──▶ forward whole batch, done
//!     │ 6. whole-batch guards
//!     │ 7. target plan ──▶ prerequisites (create / rollover)
//!     │ 8. replication of surviving items
//!     ▼
//!  assemble: drain slots, release permit, answer the caller
//! ```
//!
//! The admission permit is owned by the pipeline future from step 3 onward;
//! whatever path the batch takes out — success, batch-level error, or the
//! future being dropped mid-flight — the permit's destructor releases the
//! budget exactly once.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::admission::{AdmissionConfig, AdmissionController, AdmissionPermit};
use crate::cluster::ClusterService;
use crate::error::{Error, Result};
use crate::executor::{ExecutorConfig, Lanes};
use crate::ingest::{self, IngestEngine, IngestForwarder};
use crate::prereq::{self, RolloverExecutor, TargetCreator};
use crate::resolve;
use crate::results::ResponseSlots;
use crate::types::{BatchRequest, BatchResponse, ItemResult, WriteItem};
use crate::validate;

// =============================================================================
// Configuration & Collaborators
// =============================================================================

/// Sizing for the coordinator's own resources.
#[derive(Debug, Clone, Default)]
pub struct CoordinatorConfig {
    /// Admission budgets.
    pub admission: AdmissionConfig,

    /// Executor lane sizing.
    pub executor: ExecutorConfig,
}

/// Executes the surviving items of a batch against their shards, claiming a
/// slot for every live item it is handed. Items whose target appears in
/// `uncreatable` must be fast-failed with the recorded cause, never
/// attempted: their target is known to be impossible to create.
#[async_trait]
pub trait ReplicationExecutor: Send + Sync {
    async fn replicate(
        &self,
        batch: &BatchRequest,
        uncreatable: &HashMap<String, String>,
        slots: &ResponseSlots,
    ) -> Result<()>;
}

/// The downstream services a coordinator drives.
pub struct Collaborators {
    /// The local ingest runtime, present on ingest-capable nodes.
    pub ingest: Option<Arc<dyn IngestEngine>>,

    /// Forwards batches needing ingest when no local engine exists.
    pub forwarder: Option<Arc<dyn IngestForwarder>>,

    /// Creates missing targets.
    pub creator: Arc<dyn TargetCreator>,

    /// Rolls over data stream write indices.
    pub rollover: Arc<dyn RolloverExecutor>,

    /// The shard-level write layer.
    pub replication: Arc<dyn ReplicationExecutor>,
}

// =============================================================================
// Coordinator
// =============================================================================

/// The coordinating-node entry point for batched writes.
pub struct BulkCoordinator {
    admission: Arc<AdmissionController>,
    lanes: Lanes,
    cluster: Arc<ClusterService>,
    collaborators: Collaborators,
}

impl BulkCoordinator {
    /// Creates a coordinator; lane workers are spawned on the current
    /// runtime.
    pub fn new(
        config: CoordinatorConfig,
        cluster: Arc<ClusterService>,
        collaborators: Collaborators,
    ) -> Arc<Self> {
        Arc::new(Self {
            admission: Arc::new(AdmissionController::new(config.admission)),
            lanes: Lanes::new(&config.executor),
            cluster,
            collaborators,
        })
    }

    /// The admission controller, exposed for stats reporting.
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Executes a batch to completion and returns its positional response.
    ///
    /// Fails as a whole only for batch-level conditions (admission, lane
    /// saturation, availability, malformed request, node shutdown). Per-item
    /// problems come back inside the response instead.
    pub async fn execute(self: &Arc<Self>, batch: BatchRequest) -> Result<BatchResponse> {
        if batch.is_empty() {
            return Ok(BatchResponse::empty());
        }

        let metadata = self.cluster.state().metadata.clone();
        let system_only = batch
            .live()
            .all(|(_, item)| metadata.is_system(item.target.as_str()));

        let permit = self
            .admission
            .acquire(batch.live_count(), batch.ram_bytes(), system_only)?;

        debug!(
            items = batch.len(),
            system_only, "accepted batch for coordination"
        );

        let slots = Arc::new(ResponseSlots::new(batch.len()));
        let (done_tx, done_rx) = oneshot::channel();
        let job = Arc::clone(self).run_pipeline(PipelineRun {
            batch,
            permit,
            slots,
            system_only,
            started: Instant::now(),
            ingest_took: None,
            preprocessed: false,
            done: done_tx,
        });
        self.lanes.route(system_only).submit(job)?;

        // The sender is dropped without a value only if the pipeline future
        // was discarded mid-flight, which only happens at shutdown.
        done_rx.await.map_err(|_| Error::NodeClosed)?
    }

    /// Executes a single item and unwraps its result, turning a per-item
    /// failure into a batch-level [`Error::ItemFailed`].
    pub async fn execute_one(self: &Arc<Self>, item: WriteItem) -> Result<ItemResult> {
        let response = self.execute(BatchRequest::new(vec![item])).await?;
        let result = response
            .items
            .into_iter()
            .next()
            .ok_or_else(|| Error::internal("single-item batch produced no result"))?;
        match &result.outcome {
            crate::types::ItemOutcome::Failed { reason } => Err(Error::ItemFailed {
                target: result.target.to_string(),
                reason: reason.clone(),
            }),
            _ => Ok(result),
        }
    }

    /// The pipeline body, boxed so the post-ingest continuation can re-enter
    /// it. Owns the batch, the permit, and the completion sender.
    fn run_pipeline(self: Arc<Self>, run: PipelineRun) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let PipelineRun {
                mut batch,
                permit,
                slots,
                system_only,
                started,
                mut ingest_took,
                preprocessed,
                done,
            } = run;

            // Availability gate. A batch re-entering after ingest passes
            // through again: preprocessing may have taken long enough for
            // the cluster to have become blocked meanwhile.
            let state = match self.cluster.await_writable(batch.timeout).await {
                Ok(state) => state,
                Err(err) => {
                    let _ = done.send(Err(err));
                    return;
                }
            };
            let metadata = state.metadata.clone();

            // Ingest branch, first pass only.
            if !preprocessed && ingest::resolve_pipelines(&mut batch, &metadata) {
                match (
                    self.cluster.local_node_is_ingest(),
                    &self.collaborators.ingest,
                ) {
                    (true, Some(engine)) => {
                        let eligible = ingest::items_for_ingest(&batch);
                        let ingest_started = Instant::now();
                        let outcomes = match engine.process(eligible).await {
                            Ok(outcomes) => outcomes,
                            Err(err) => {
                                let _ = done.send(Err(Error::IngestFailed {
                                    reason: err.to_string(),
                                }));
                                return;
                            }
                        };
                        ingest_took = Some(ingest_started.elapsed());
                        ingest::apply_outcomes(&mut batch, outcomes, &metadata, &slots);

                        // Re-enter on the same lane. Forced: this batch
                        // already holds its permit and partial results, so
                        // the queue may not refuse it.
                        let coordinator = Arc::clone(&self);
                        let continuation = coordinator.run_pipeline(PipelineRun {
                            batch,
                            permit,
                            slots,
                            system_only,
                            started,
                            ingest_took,
                            preprocessed: true,
                            done,
                        });
                        self.lanes.route(system_only).submit_forced(continuation);
                        return;
                    }
                    _ => {
                        let Some(forwarder) = &self.collaborators.forwarder else {
                            let _ = done.send(Err(Error::IngestFailed {
                                reason: "no ingest-capable node available".to_string(),
                            }));
                            return;
                        };
                        // The remote node already timed and assembled the
                        // response; it is handed back untouched.
                        debug!("forwarding batch to an ingest-capable node");
                        let result = forwarder.forward(batch).await;
                        drop(permit);
                        let _ = done.send(result);
                        return;
                    }
                }
            }

            // Ingest may have terminated every item already.
            if batch.live_count() == 0 {
                Self::finish(&slots, started, ingest_took, permit, done);
                return;
            }

            if let Err(err) = validate::validate_batch(&batch, &metadata) {
                let _ = done.send(Err(err));
                return;
            }

            let plan = resolve::plan_missing_targets(&batch, &state);
            let report = if plan.is_empty() {
                prereq::PrerequisiteReport::default()
            } else {
                let timeout = batch.timeout;
                prereq::execute_prerequisites(
                    &mut batch,
                    plan,
                    &self.collaborators.creator,
                    &self.collaborators.rollover,
                    timeout,
                    &slots,
                )
                .await
            };

            if batch.live_count() > 0 {
                if let Err(err) = self
                    .collaborators
                    .replication
                    .replicate(&batch, &report.uncreatable, &slots)
                    .await
                {
                    warn!(error = %err, "replication failed, failing surviving items");
                    for (slot, item) in batch.live() {
                        slots.claim(slot, ItemResult::failed(item, err.to_string()));
                    }
                }
            }

            Self::finish(&slots, started, ingest_took, permit, done);
        })
    }

    /// Drains the slots into the response. The permit is released before the
    /// caller is answered, so a client retrying immediately on the response
    /// does not race its own budget.
    fn finish(
        slots: &ResponseSlots,
        started: Instant,
        ingest_took: Option<Duration>,
        permit: AdmissionPermit,
        done: oneshot::Sender<Result<BatchResponse>>,
    ) {
        let result = slots.finish().map(|items| BatchResponse {
            items,
            took: started.elapsed(),
            ingest_took,
        });
        drop(permit);
        let _ = done.send(result);
    }
}

/// Everything one in-flight batch carries between pipeline entries.
struct PipelineRun {
    batch: BatchRequest,
    permit: AdmissionPermit,
    slots: Arc<ResponseSlots>,
    system_only: bool,
    started: Instant,
    ingest_took: Option<Duration>,
    /// Set on the post-ingest re-entry; the ingest branch runs at most once.
    preprocessed: bool,
    done: oneshot::Sender<Result<BatchResponse>>,
}
