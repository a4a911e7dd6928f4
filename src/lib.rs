//! # BulkGate - Batch Write Coordinator
//!
//! BulkGate is the coordinating-node pipeline for batched multi-document
//! writes. It provides:
//!
//! - **Admission control**: memory-pressure permits over operation and byte
//!   budgets, with separate budgets for system writes
//! - **Availability gating**: bounded waits on cluster write blocks that
//!   surface the original block cause
//! - **Ingest preprocessing**: pipeline resolution, local execution or
//!   forwarding, with drop / fail / failure-store-redirect outcomes
//! - **Target preparation**: auto-creation of missing indices and data
//!   streams, and lazy rollover of marked write indices
//! - **Positional responses**: one result per request slot, in order, no
//!   matter which stage decided it
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      BulkCoordinator::execute                   │
//! │            (admission permit, lane routing, response)           │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Executor Lane Worker                      │
//! │                                                                 │
//! │  ┌──────────────┐  ┌──────────────┐  ┌───────────────────────┐  │
//! │  │ Availability │  │    Ingest    │  │ Targets: validate,    │  │
//! │  │     Gate     │─▶│ (≤1 re-entry)│─▶│ auto-create, rollover │  │
//! │  └──────────────┘  └──────────────┘  └───────────┬───────────┘  │
//! └──────────────────────────────────────────────────┼──────────────┘
//!                                                    │
//!                                                    ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Replication Executor                        │
//! │                   (shard-level write layer)                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! These invariants are enforced throughout the codebase and must never be
//! violated:
//!
//! 1. **Positional identity**: the response has exactly one result per
//!    request slot, in request order
//! 2. **Permit lifecycle**: each admitted batch releases its admission
//!    budget exactly once, on every exit path
//! 3. **Single ingest pass**: the ingest branch runs at most once per batch
//! 4. **Exactly-once dispatch**: the batch proceeds past prerequisites only
//!    after all of them complete, and only once
//! 5. **Failure isolation**: a per-target failure never aborts other
//!    targets' items
//!
//! ## Module Organization
//!
//! - [`error`]: Batch-level error types for all failure modes
//! - [`types`]: Domain types (WriteItem, BatchRequest, ItemResult, etc.)
//! - [`admission`]: Permit-based admission control
//! - [`cluster`]: Cluster metadata snapshots and the availability gate
//! - [`executor`]: The general and system executor lanes
//! - [`ingest`]: Pipeline resolution and preprocessing outcomes
//! - [`validate`]: Whole-batch structural guards
//! - [`resolve`]: Target planning (auto-create and rollover sets)
//! - [`prereq`]: Concurrent prerequisite execution
//! - [`results`]: Positional write-once response slots
//! - [`coordinator`]: The pipeline tying the stages together (main entry
//!   point)

// =============================================================================
// Module Declarations
// =============================================================================

/// Batch-level error types.
///
/// This module defines all error variants that can fail a batch as a whole.
/// Per-item failures never travel through these; they become response slots.
pub mod error;

/// Domain types for batched writes.
///
/// This module defines the core types: write items, batches, per-item
/// results, and responses. Uses the newtype pattern for target names.
pub mod types;

/// Permit-based admission control.
///
/// This module accounts outstanding coordinating work against operation and
/// byte budgets. Permits release their accounting on drop, making
/// exactly-once release structural.
pub mod admission;

/// Cluster metadata and the availability gate.
///
/// This module provides immutable metadata snapshots published over a watch
/// channel, and the bounded wait that holds batches while writes are
/// blocked cluster-wide.
pub mod cluster;

/// Executor lanes.
///
/// This module implements the two bounded job queues (general and system)
/// that coordination work runs on, including the forced-submission path for
/// continuations of already-admitted batches.
pub mod executor;

/// Ingest preprocessing.
///
/// This module resolves which pipeline applies to each item and folds
/// engine outcomes (transformed, dropped, failed) back into the batch's
/// positional slots.
pub mod ingest;

/// Whole-batch validation guards.
///
/// This module checks structural rules — no append writes to backing
/// indices, no custom routing on data streams that forbid it — and rejects
/// the entire batch on violation.
pub mod validate;

/// Target planning.
///
/// This module inspects a batch against a metadata snapshot and produces
/// the prerequisite plan: which targets to auto-create (with OR-merged
/// flags) and which data streams to roll over.
pub mod resolve;

/// Prerequisite orchestration.
///
/// This module executes a target plan concurrently, joins all actions
/// before the batch proceeds, and isolates each target's failures to its
/// own items.
pub mod prereq;

/// Positional response slots.
///
/// This module provides the write-once result array that all pipeline
/// stages claim into and the final response is drained from.
pub mod results;

/// The batch write coordinator.
///
/// This module ties admission, gating, ingest, prerequisites and
/// replication into one pipeline.
///
/// The main entry point is [`BulkCoordinator`](coordinator::BulkCoordinator).
pub mod coordinator;

// =============================================================================
// Re-exports
// =============================================================================
// Re-export commonly used types at the crate root for convenience. Users can
// write `use bulkgate::Error` instead of `use bulkgate::error::Error`.

pub use coordinator::{BulkCoordinator, Collaborators, CoordinatorConfig, ReplicationExecutor};
pub use error::{Error, Result};

// Re-export commonly used types from the types module
pub use types::{
    BatchRequest, BatchResponse, ItemOutcome, ItemResult, OpType, TargetName, VersionType,
    WriteItem,
};

// Re-export the collaborator seams and their outcome types
pub use ingest::{IngestEngine, IngestForwarder, IngestOutcome};
pub use prereq::{CreateResult, RolloverExecutor, RolloverResult, TargetCreator};
