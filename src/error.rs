//! # Error Handling for BulkGate
//!
//! This module defines the error types used throughout BulkGate. We use a
//! single error enum ([`Error`]) for all batch-level failure modes, which
//! keeps the coordinator's signatures simple.
//!
//! ## Batch-Level vs Per-Item Failures
//!
//! Only *batch-level* failures travel through this enum. A failure scoped to
//! one item — an ingest processor rejecting a document, a prerequisite action
//! failing for one target — is converted into that item's response slot and
//! never surfaces as an `Error`. The distinction matters: a batch-level error
//! aborts the whole in-flight batch, a per-item failure leaves every other
//! item untouched.
//!
//! ## Error Categories
//!
//! | Category | Variants | Typical Response |
//! |----------|----------|------------------|
//! | Malformed request | `InvalidRequest` | Fix the client call |
//! | Backpressure | `AdmissionRejected`, `LaneSaturated` | Back off and retry |
//! | Availability | `ClusterBlocked` | Retry after recovery |
//! | Ingest | `IngestFailed` | Inspect pipeline config |
//! | Terminal | `NodeClosed` | Route to another node |

use thiserror::Error;

use crate::executor::LaneKind;

/// All batch-level errors that can occur in the write coordinator.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Malformed Requests (Client must fix the call; nothing was attempted)
    // =========================================================================

    /// The batch violates a usage rule, e.g. an append write targeting a
    /// data stream's backing index directly, or custom routing on a data
    /// stream that forbids it. Rejects the whole batch: these indicate a
    /// malformed client request, not a per-item condition.
    #[error("invalid request: {reason}")]
    InvalidRequest {
        /// What rule was violated.
        reason: String,
    },

    // =========================================================================
    // Backpressure (Caller should back off and retry)
    // =========================================================================

    /// The batch was rejected before any work was done because admitting it
    /// would push outstanding coordinating work past the configured limit.
    #[error(
        "admission rejected: {outstanding} + {attempted} {unit} would exceed the limit of {limit}"
    )]
    AdmissionRejected {
        /// Which budget was exhausted ("operations" or "bytes").
        unit: &'static str,
        /// Outstanding amount at the time of the attempt.
        outstanding: usize,
        /// Amount this batch asked for.
        attempted: usize,
        /// The configured limit.
        limit: usize,
    },

    /// The selected executor lane's queue was full. Admission throttling
    /// normally prevents this; it indicates the node is saturated.
    #[error("executor lane {lane} is saturated")]
    LaneSaturated {
        /// The lane that refused the submission.
        lane: LaneKind,
    },

    // =========================================================================
    // Availability (Retried internally up to the batch timeout first)
    // =========================================================================

    /// Writes are blocked cluster-wide. For a retryable block this is only
    /// surfaced after waiting out the batch timeout; the reason is always the
    /// original block's cause, never a generic timeout.
    #[error("cluster blocked: {reason}")]
    ClusterBlocked {
        /// The blocking condition's description.
        reason: String,
    },

    /// The owning node is shutting down. Terminal and non-retryable here;
    /// the client should route to another coordinating node.
    #[error("node closed")]
    NodeClosed,

    // =========================================================================
    // Ingest
    // =========================================================================

    /// The ingest engine failed as a whole (as opposed to failing individual
    /// documents, which become per-item results instead).
    #[error("ingest failed: {reason}")]
    IngestFailed {
        /// Why preprocessing could not run.
        reason: String,
    },

    // =========================================================================
    // Single-Item Unwrapping
    // =========================================================================

    /// Produced when unwrapping a single-item batch response whose only item
    /// failed, carrying the item failure as the batch outcome.
    #[error("item for target '{target}' failed: {reason}")]
    ItemFailed {
        /// The failing item's target.
        target: String,
        /// The per-item failure cause.
        reason: String,
    },

    // =========================================================================
    // Internal (Invariant violations; indicates a bug)
    // =========================================================================

    /// An internal invariant did not hold, e.g. a response slot left
    /// unfilled at assembly time.
    #[error("internal error: {reason}")]
    Internal {
        /// The violated invariant.
        reason: String,
    },
}

impl Error {
    /// Shorthand for [`Error::InvalidRequest`].
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Internal`].
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }
}

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
