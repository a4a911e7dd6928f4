//! # Domain Types for BulkGate
//!
//! This module defines the core types used throughout BulkGate: write items,
//! batches, and per-item results. These model the coordinator's domain — a
//! batch is an ordered sequence of independent write operations whose results
//! must be correlated back to their original positions.
//!
//! ## Positional Identity
//!
//! An item's position in the batch is its identity. Preprocessing may replace
//! or remove items, and prerequisite failures may null them out, but the slot
//! count never changes once the batch is built:
//!
//! ```text
//! request:   [ item0,  item1,  item2,  item3 ]
//! after      [ item0,  None,   item2', None  ]   (1 dropped, 2 redirected,
//! pipeline:                                       3 failed)
//! response:  [ res0,   noop1,  res2,   fail3 ]   (always length 4)
//! ```
//!
//! ## Invariants
//!
//! - A [`BatchRequest`]'s slot count is fixed at construction
//! - Every slot produces exactly one terminal [`ItemResult`]
//! - A nulled slot is terminal: it already has a result recorded elsewhere

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

// =============================================================================
// Target Identification
// =============================================================================

/// Per-item fixed memory overhead used for admission accounting, covering the
/// item struct itself and its bookkeeping, on top of the document payload.
pub const ITEM_OVERHEAD_BYTES: usize = 64;

/// The name of a write target: a concrete index, an alias, or a data stream.
///
/// The name is kept raw as supplied by the client (it may contain date-math);
/// resolution happens at the metadata lookup seam.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetName(String);

impl TargetName {
    /// Creates a new target name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the string representation of this target name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TargetName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for TargetName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Operation Kinds
// =============================================================================

/// The kind of write operation an item performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Create a document; fails if the id already exists. Append-only.
    Create,
    /// Index (create or overwrite) a document.
    Index,
    /// Partially update an existing document, optionally upserting.
    Update,
    /// Delete a document by id.
    Delete,
}

impl OpType {
    /// Returns true for operations that carry an index-able document payload
    /// (directly, or as the update's upsert document). Only these operations
    /// are eligible for ingest preprocessing.
    pub fn has_index_payload(&self) -> bool {
        matches!(self, OpType::Create | OpType::Index | OpType::Update)
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpType::Create => "create",
            OpType::Index => "index",
            OpType::Update => "update",
            OpType::Delete => "delete",
        };
        write!(f, "{}", s)
    }
}

/// How a document version supplied by the client is interpreted.
///
/// External versioning matters to the coordinator in one place: a DELETE with
/// external versioning may legitimately create its target (to record a
/// tombstone at the given version), so it participates in target planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VersionType {
    /// Versions are assigned by the cluster.
    #[default]
    Internal,
    /// The client supplies the version; writes require a strictly higher one.
    External,
    /// The client supplies the version; writes require an equal or higher one.
    ExternalGte,
}

impl VersionType {
    /// Returns true if the version is supplied by the client.
    pub fn is_external(&self) -> bool {
        matches!(self, VersionType::External | VersionType::ExternalGte)
    }
}

// =============================================================================
// Write Items
// =============================================================================

/// One logical write operation within a batch.
///
/// Built with the constructor for its op kind plus builder-style setters:
///
/// ```rust
/// use bulkgate::types::WriteItem;
///
/// let item = WriteItem::index("logs", br#"{"msg":"hi"}"#.to_vec())
///     .with_id("doc-1")
///     .with_routing("tenant-a");
/// ```
///
/// Items are immutable once validated. The pipeline may replace an item with
/// a transformed copy at the same position (ingest), or null its slot out
/// entirely (prerequisite failure); it never mutates a validated item.
#[derive(Debug, Clone)]
pub struct WriteItem {
    /// The raw target name (index, alias, or data stream).
    pub target: TargetName,

    /// The operation kind.
    pub op_type: OpType,

    /// Optional document id. Generated downstream when absent.
    pub id: Option<String>,

    /// Optional custom routing key.
    pub routing: Option<String>,

    /// How the document version is interpreted.
    pub version_type: VersionType,

    /// Compare-and-set precondition: expected sequence number.
    pub if_seq_no: Option<u64>,

    /// Compare-and-set precondition: expected primary term.
    pub if_primary_term: Option<u64>,

    /// The target must resolve to an alias; never auto-create it.
    pub require_alias: bool,

    /// If the target is auto-created, it must be created as a data stream.
    pub require_data_stream: bool,

    /// This write is directed at the target data stream's failure store.
    pub write_to_failure_store: bool,

    /// The ingest pipeline to apply, if any. `None` after resolution means
    /// no preprocessing is needed.
    pub pipeline: Option<String>,

    /// Set once pipeline resolution has run for this item, so the ingest
    /// branch is never taken twice for the same batch.
    pub pipeline_resolved: bool,

    /// The document payload. For UPDATE this is the upsert/partial document;
    /// empty for DELETE.
    pub source: Vec<u8>,
}

impl WriteItem {
    fn new(target: impl Into<TargetName>, op_type: OpType, source: Vec<u8>) -> Self {
        Self {
            target: target.into(),
            op_type,
            id: None,
            routing: None,
            version_type: VersionType::Internal,
            if_seq_no: None,
            if_primary_term: None,
            require_alias: false,
            require_data_stream: false,
            write_to_failure_store: false,
            pipeline: None,
            pipeline_resolved: false,
            source,
        }
    }

    /// Creates an append-only CREATE item.
    pub fn create(target: impl Into<TargetName>, source: Vec<u8>) -> Self {
        Self::new(target, OpType::Create, source)
    }

    /// Creates an INDEX item.
    pub fn index(target: impl Into<TargetName>, source: Vec<u8>) -> Self {
        Self::new(target, OpType::Index, source)
    }

    /// Creates an UPDATE item; `source` is the upsert/partial document.
    pub fn update(target: impl Into<TargetName>, source: Vec<u8>) -> Self {
        Self::new(target, OpType::Update, source)
    }

    /// Creates a DELETE item.
    pub fn delete(target: impl Into<TargetName>) -> Self {
        Self::new(target, OpType::Delete, Vec::new())
    }

    /// Sets the document id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets a custom routing key.
    pub fn with_routing(mut self, routing: impl Into<String>) -> Self {
        self.routing = Some(routing.into());
        self
    }

    /// Sets the version type.
    pub fn with_version_type(mut self, version_type: VersionType) -> Self {
        self.version_type = version_type;
        self
    }

    /// Sets a compare-and-set precondition (sequence number + primary term).
    pub fn with_cas(mut self, seq_no: u64, primary_term: u64) -> Self {
        self.if_seq_no = Some(seq_no);
        self.if_primary_term = Some(primary_term);
        self
    }

    /// Requires the target to be an alias.
    pub fn with_require_alias(mut self) -> Self {
        self.require_alias = true;
        self
    }

    /// Requires an auto-created target to be a data stream.
    pub fn with_require_data_stream(mut self) -> Self {
        self.require_data_stream = true;
        self
    }

    /// Directs this write at the target's failure store.
    pub fn with_write_to_failure_store(mut self) -> Self {
        self.write_to_failure_store = true;
        self
    }

    /// Sets an explicit ingest pipeline.
    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    /// Returns true if both halves of the compare-and-set precondition are
    /// present.
    pub fn has_cas_precondition(&self) -> bool {
        self.if_seq_no.is_some() && self.if_primary_term.is_some()
    }

    /// Approximate memory footprint for admission accounting.
    pub fn ram_bytes(&self) -> usize {
        ITEM_OVERHEAD_BYTES
            + self.source.len()
            + self.target.as_str().len()
            + self.id.as_deref().map_or(0, str::len)
            + self.routing.as_deref().map_or(0, str::len)
    }
}

// =============================================================================
// Batch Requests
// =============================================================================

/// Default batch timeout, matching the usual coordinator default of one
/// minute for write operations.
pub const DEFAULT_BATCH_TIMEOUT: Duration = Duration::from_secs(60);

/// An ordered batch of write items plus batch-level settings.
///
/// Internally each item lives in a slot (`Option<WriteItem>`). A `None` slot
/// means the item was terminated early — dropped by preprocessing or failed
/// by a prerequisite action — and its result already sits in the response
/// slots. The slot count never changes after construction; this is what makes
/// positional result correlation possible.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    items: Vec<Option<WriteItem>>,

    /// Batch-level timeout: bounds the cluster availability wait and is
    /// carried onto prerequisite actions as their master-operation timeout.
    pub timeout: Duration,
}

impl BatchRequest {
    /// Creates a new batch from items, with the default timeout.
    pub fn new(items: Vec<WriteItem>) -> Self {
        Self {
            items: items.into_iter().map(Some).collect(),
            timeout: DEFAULT_BATCH_TIMEOUT,
        }
    }

    /// Sets the batch timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Total slot count (live and terminated items alike).
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the batch has no slots at all.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of live (non-terminated) items.
    pub fn live_count(&self) -> usize {
        self.items.iter().filter(|i| i.is_some()).count()
    }

    /// The item at `slot`, if still live.
    pub fn item(&self, slot: usize) -> Option<&WriteItem> {
        self.items.get(slot).and_then(Option::as_ref)
    }

    /// Mutable access to the item at `slot`, if still live.
    pub fn item_mut(&mut self, slot: usize) -> Option<&mut WriteItem> {
        self.items.get_mut(slot).and_then(Option::as_mut)
    }

    /// Terminates the item at `slot`. The caller must have recorded a result
    /// for the slot already (or be about to).
    pub fn clear_item(&mut self, slot: usize) {
        if let Some(entry) = self.items.get_mut(slot) {
            *entry = None;
        }
    }

    /// Replaces the item at `slot` with a transformed copy.
    pub fn replace_item(&mut self, slot: usize, item: WriteItem) {
        if let Some(entry) = self.items.get_mut(slot) {
            *entry = Some(item);
        }
    }

    /// Iterates live items with their slot numbers.
    pub fn live(&self) -> impl Iterator<Item = (usize, &WriteItem)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(slot, item)| item.as_ref().map(|i| (slot, i)))
    }

    /// Iterates live items mutably with their slot numbers.
    pub fn live_mut(&mut self) -> impl Iterator<Item = (usize, &mut WriteItem)> {
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(|(slot, item)| item.as_mut().map(|i| (slot, i)))
    }

    /// The set of distinct target names across live items.
    pub fn target_names(&self) -> HashSet<&str> {
        self.live().map(|(_, item)| item.target.as_str()).collect()
    }

    /// Approximate memory footprint of the batch for admission accounting.
    pub fn ram_bytes(&self) -> usize {
        self.live().map(|(_, item)| item.ram_bytes()).sum()
    }
}

// =============================================================================
// Per-Item Results
// =============================================================================

/// The terminal outcome of a single item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    /// The write was executed by the replication layer.
    Written,
    /// The item was deliberately not written (e.g. dropped by an ingest
    /// pipeline). Occupies its slot to preserve positional correspondence.
    NoOp,
    /// The item failed terminally.
    Failed {
        /// Human-readable failure cause.
        reason: String,
    },
}

/// The result of one item, positioned at the item's original slot.
#[derive(Debug, Clone)]
pub struct ItemResult {
    /// The operation kind of the originating item.
    pub op_type: OpType,

    /// The item's final target.
    pub target: TargetName,

    /// The document id, if known.
    pub id: Option<String>,

    /// The terminal outcome.
    pub outcome: ItemOutcome,
}

impl ItemResult {
    /// A successful write result for `item`.
    pub fn written(item: &WriteItem) -> Self {
        Self {
            op_type: item.op_type,
            target: item.target.clone(),
            id: item.id.clone(),
            outcome: ItemOutcome::Written,
        }
    }

    /// A synthetic no-op result for `item` (dropped by preprocessing).
    pub fn noop(item: &WriteItem) -> Self {
        Self {
            op_type: item.op_type,
            target: item.target.clone(),
            id: item.id.clone(),
            outcome: ItemOutcome::NoOp,
        }
    }

    /// A terminal failure for `item`.
    pub fn failed(item: &WriteItem, reason: impl Into<String>) -> Self {
        Self {
            op_type: item.op_type,
            target: item.target.clone(),
            id: item.id.clone(),
            outcome: ItemOutcome::Failed {
                reason: reason.into(),
            },
        }
    }

    /// Returns true if this item failed.
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ItemOutcome::Failed { .. })
    }
}

// =============================================================================
// Batch Responses
// =============================================================================

/// The final response for a batch: one result per original slot, in order,
/// plus elapsed-time accounting.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    /// Per-item results; `items[i]` corresponds to slot `i` of the request.
    pub items: Vec<ItemResult>,

    /// Wall-clock time spent in the coordinator pipeline.
    pub took: Duration,

    /// Time spent in ingest preprocessing, when the ingest branch ran.
    pub ingest_took: Option<Duration>,
}

impl BatchResponse {
    /// A response with no items, for requests that arrive empty.
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            took: Duration::ZERO,
            ingest_took: None,
        }
    }

    /// Returns true if any item failed.
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(ItemResult::is_failed)
    }
}

// =============================================================================
// Tests
// =============================================================================
