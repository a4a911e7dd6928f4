//! # Cluster State & the Availability Gate
//!
//! This module provides the coordinator's read-only view of cluster metadata
//! and the gate that holds batches while writes are blocked cluster-wide.
//!
//! ## Snapshot + Watch
//!
//! State is published as immutable snapshots over a `tokio::sync::watch`
//! channel. Readers grab the current [`ClusterState`] cheaply (an `Arc`
//! clone); waiters subscribe and are woken on every transition. Watch rather
//! than broadcast because only the *latest* state matters — a waiter that
//! missed three intermediate states only cares whether the newest one is
//! writable.
//!
//! ## The Gate
//!
//! [`ClusterService::await_writable`] implements the availability wait:
//!
//! ```text
//!                 ┌── no block ──────────────▶ proceed
//! current state ──┤
//!                 ├── non-retryable block ───▶ fail now (block cause)
//!                 │
//!                 └── retryable block ──┬─ unblocked state arrives ─▶ proceed
//!                                       ├─ service closes ──────────▶ NodeClosed
//!                                       └─ timeout elapses ─────────▶ fail with
//!                                                                    the block
//!                                                                    cause
//! ```
//!
//! A timeout surfaces the *original* block cause, never a generic timeout
//! error: the client asked why its write did not go through, and the answer
//! is the block.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tracing::trace;

use crate::error::{Error, Result};

// =============================================================================
// Blocks
// =============================================================================

/// A cluster-wide condition that blocks writes.
#[derive(Debug, Clone)]
pub struct ClusterBlock {
    /// Human-readable cause, surfaced to clients when the block wins.
    pub description: String,

    /// Whether the block is expected to clear on its own (e.g. a master
    /// election in progress) as opposed to requiring operator action
    /// (e.g. a read-only cluster setting).
    pub retryable: bool,
}

impl ClusterBlock {
    /// Creates a new write block.
    pub fn new(description: impl Into<String>, retryable: bool) -> Self {
        Self {
            description: description.into(),
            retryable,
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Metadata for one concrete index.
#[derive(Debug, Clone)]
pub struct IndexState {
    /// The index name.
    pub name: String,

    /// Whether this is a system index.
    pub system: bool,

    /// Default ingest pipeline configured on the index, if any.
    pub default_pipeline: Option<String>,

    /// Set when this index is a backing (or failure) index of a data stream.
    pub parent_data_stream: Option<String>,
}

impl IndexState {
    /// Creates a plain index entry.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system: false,
            default_pipeline: None,
            parent_data_stream: None,
        }
    }

    /// Marks the index as a system index.
    pub fn with_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// Sets the index's default ingest pipeline.
    pub fn with_default_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.default_pipeline = Some(pipeline.into());
        self
    }
}

/// Metadata for one data stream.
#[derive(Debug, Clone)]
pub struct DataStreamState {
    /// The data stream name.
    pub name: String,

    /// Whether this is a system data stream.
    pub system: bool,

    /// The backing indices, oldest first; the last is the write index.
    pub backing_indices: Vec<String>,

    /// The backing indices are marked for rollover on the next write.
    pub rollover_on_write: bool,

    /// Whether the failure store is enabled for this data stream.
    pub failure_store_enabled: bool,

    /// The failure-store indices, oldest first.
    pub failure_indices: Vec<String>,

    /// The failure store is marked for rollover on the next write to it.
    pub failure_rollover_on_write: bool,

    /// Whether items may carry a custom routing key.
    pub allow_custom_routing: bool,
}

impl DataStreamState {
    /// Creates a data stream with a single first-generation backing index.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let write_index = format!(".ds-{name}-000001");
        Self {
            name,
            system: false,
            backing_indices: vec![write_index],
            rollover_on_write: false,
            failure_store_enabled: false,
            failure_indices: Vec::new(),
            failure_rollover_on_write: false,
            allow_custom_routing: false,
        }
    }

    /// Marks the backing indices for lazy rollover.
    pub fn with_rollover_on_write(mut self) -> Self {
        self.rollover_on_write = true;
        self
    }

    /// Enables the failure store, with a first-generation failure index.
    pub fn with_failure_store(mut self) -> Self {
        self.failure_store_enabled = true;
        if self.failure_indices.is_empty() {
            self.failure_indices = vec![format!(".fs-{}-000001", self.name)];
        }
        self
    }

    /// Marks the failure store for lazy rollover. Implies the failure store
    /// is enabled.
    pub fn with_failure_rollover_on_write(mut self) -> Self {
        self = self.with_failure_store();
        self.failure_rollover_on_write = true;
        self
    }

    /// Allows custom routing keys on items targeting this data stream.
    pub fn with_allow_custom_routing(mut self) -> Self {
        self.allow_custom_routing = true;
        self
    }

    /// Marks the data stream as a system data stream.
    pub fn with_system(mut self) -> Self {
        self.system = true;
        self
    }

    /// The current write index.
    pub fn write_index(&self) -> &str {
        self.backing_indices
            .last()
            .map(String::as_str)
            .unwrap_or(&self.name)
    }
}

/// A (composable) index template, matched by name pattern.
#[derive(Debug, Clone)]
pub struct TemplateState {
    /// Match pattern: either an exact name or a prefix ending in `*`.
    pub pattern: String,

    /// Whether indices created from this template form a data stream.
    pub data_stream: bool,

    /// Whether the template's data stream has a failure store enabled.
    pub failure_store: bool,

    /// Default ingest pipeline from the template's settings, if any.
    pub default_pipeline: Option<String>,
}

impl TemplateState {
    /// Creates a template matching `pattern`.
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            data_stream: false,
            failure_store: false,
            default_pipeline: None,
        }
    }

    /// Marks this as a data stream template.
    pub fn with_data_stream(mut self) -> Self {
        self.data_stream = true;
        self
    }

    /// Enables the failure store on the template's data stream.
    pub fn with_failure_store(mut self) -> Self {
        self.failure_store = true;
        self
    }

    /// Sets the template's default ingest pipeline.
    pub fn with_default_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.default_pipeline = Some(pipeline.into());
        self
    }

    /// Whether `name` matches this template's pattern.
    pub fn matches(&self, name: &str) -> bool {
        match self.pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => name == self.pattern,
        }
    }
}

/// Cluster capabilities relevant to the coordinator.
#[derive(Debug, Clone)]
pub struct ClusterFeatures {
    /// All nodes support lazy (deferred-to-write) rollover.
    pub lazy_rollover: bool,

    /// Failure-store rollover is supported in addition to backing rollover.
    pub lazy_rollover_failure_store: bool,
}

impl Default for ClusterFeatures {
    fn default() -> Self {
        Self {
            lazy_rollover: true,
            lazy_rollover_failure_store: true,
        }
    }
}

/// An immutable, point-in-time view of the metadata the coordinator reads:
/// target existence, data stream state, templates, and system classification.
#[derive(Debug, Clone, Default)]
pub struct ClusterMetadata {
    indices: HashMap<String, IndexState>,
    data_streams: HashMap<String, DataStreamState>,
    aliases: HashMap<String, Vec<String>>,
    templates: Vec<TemplateState>,
    system_patterns: Vec<String>,
}

impl ClusterMetadata {
    /// Creates empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a concrete index.
    pub fn with_index(mut self, index: IndexState) -> Self {
        self.indices.insert(index.name.clone(), index);
        self
    }

    /// Adds a data stream, registering its backing and failure indices as
    /// concrete indices with the parent link set.
    pub fn with_data_stream(mut self, data_stream: DataStreamState) -> Self {
        for backing in data_stream
            .backing_indices
            .iter()
            .chain(data_stream.failure_indices.iter())
        {
            let mut index = IndexState::new(backing.clone());
            index.system = data_stream.system;
            index.parent_data_stream = Some(data_stream.name.clone());
            self.indices.insert(backing.clone(), index);
        }
        self.data_streams
            .insert(data_stream.name.clone(), data_stream);
        self
    }

    /// Adds an alias over the given concrete indices.
    pub fn with_alias(mut self, alias: impl Into<String>, indices: Vec<String>) -> Self {
        self.aliases.insert(alias.into(), indices);
        self
    }

    /// Adds a template.
    pub fn with_template(mut self, template: TemplateState) -> Self {
        self.templates.push(template);
        self
    }

    /// Registers a system-index name pattern (exact, or prefix ending in
    /// `*`), used to classify targets that do not exist yet.
    pub fn with_system_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.system_patterns.push(pattern.into());
        self
    }

    /// Whether `name` resolves to any existing target: a concrete index, an
    /// alias, or a data stream.
    pub fn has_target(&self, name: &str) -> bool {
        self.indices.contains_key(name)
            || self.aliases.contains_key(name)
            || self.data_streams.contains_key(name)
    }

    /// Whether `name` is an alias.
    pub fn is_alias(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// The concrete index named `name`, if any.
    pub fn index(&self, name: &str) -> Option<&IndexState> {
        self.indices.get(name)
    }

    /// The data stream named `name`, if any.
    pub fn data_stream(&self, name: &str) -> Option<&DataStreamState> {
        self.data_streams.get(name)
    }

    /// Classifies `name` as system or not. Existing targets carry the flag in
    /// their metadata; targets that do not exist yet fall back to the system
    /// name-pattern registry.
    pub fn is_system(&self, name: &str) -> bool {
        if let Some(index) = self.indices.get(name) {
            return index.system;
        }
        if let Some(data_stream) = self.data_streams.get(name) {
            return data_stream.system;
        }
        self.system_patterns.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => name.starts_with(prefix),
                None => name == pattern,
            }
        })
    }

    /// The first template matching `name`, if any.
    pub fn matching_template(&self, name: &str) -> Option<&TemplateState> {
        self.templates.iter().find(|t| t.matches(name))
    }

    /// Resolves the default ingest pipeline for writes to `name`: the index's
    /// own setting first, then the matching template's.
    pub fn default_pipeline(&self, name: &str) -> Option<&str> {
        if let Some(index) = self.indices.get(name) {
            if let Some(pipeline) = index.default_pipeline.as_deref() {
                return Some(pipeline);
            }
        }
        self.matching_template(name)
            .and_then(|t| t.default_pipeline.as_deref())
    }

    /// Whether a document that fails preprocessing for `name` should be
    /// redirected to a failure store: true when `name` is an existing data
    /// stream with a failure store enabled, or matches a data stream template
    /// that has one. Writes addressed directly at backing or failure indices
    /// are never redirected.
    pub fn should_store_failure(&self, name: &str) -> bool {
        if let Some(data_stream) = self.data_streams.get(name) {
            return data_stream.failure_store_enabled;
        }
        if self.indices.contains_key(name) {
            return false;
        }
        self.matching_template(name)
            .map(|t| t.data_stream && t.failure_store)
            .unwrap_or(false)
    }
}

// =============================================================================
// Cluster State
// =============================================================================

/// One published snapshot: metadata plus blocks plus feature flags.
#[derive(Debug, Clone)]
pub struct ClusterState {
    /// The metadata view.
    pub metadata: Arc<ClusterMetadata>,

    /// Active cluster-wide write blocks.
    pub blocks: Vec<ClusterBlock>,

    /// Cluster capability flags.
    pub features: ClusterFeatures,
}

impl ClusterState {
    /// Creates an unblocked state over `metadata` with default features.
    pub fn new(metadata: ClusterMetadata) -> Self {
        Self {
            metadata: Arc::new(metadata),
            blocks: Vec::new(),
            features: ClusterFeatures::default(),
        }
    }

    /// Adds a write block.
    pub fn with_block(mut self, block: ClusterBlock) -> Self {
        self.blocks.push(block);
        self
    }

    /// Overrides the feature flags.
    pub fn with_features(mut self, features: ClusterFeatures) -> Self {
        self.features = features;
        self
    }

    /// The active write block, if any. When multiple blocks are present the
    /// first is reported; a non-retryable block anywhere wins over retryable
    /// ones since waiting cannot clear it.
    pub fn write_block(&self) -> Option<&ClusterBlock> {
        self.blocks
            .iter()
            .find(|b| !b.retryable)
            .or_else(|| self.blocks.first())
    }
}

// =============================================================================
// Cluster Service
// =============================================================================

/// Publishes cluster-state snapshots and gates writes on availability.
#[derive(Debug)]
pub struct ClusterService {
    state_tx: watch::Sender<Arc<ClusterState>>,
    closed_tx: watch::Sender<bool>,
    ingest_node: bool,
}

impl ClusterService {
    /// Creates a service with an initial state. `ingest_node` declares
    /// whether the local node can run ingest pipelines itself.
    pub fn new(initial: ClusterState, ingest_node: bool) -> Self {
        let (state_tx, _) = watch::channel(Arc::new(initial));
        let (closed_tx, _) = watch::channel(false);
        Self {
            state_tx,
            closed_tx,
            ingest_node,
        }
    }

    /// The current snapshot.
    pub fn state(&self) -> Arc<ClusterState> {
        self.state_tx.borrow().clone()
    }

    /// Publishes a new snapshot, waking all gate waiters.
    pub fn publish(&self, state: ClusterState) {
        self.state_tx.send_replace(Arc::new(state));
    }

    /// Marks the service as shutting down; all current and future gate
    /// waiters fail with [`Error::NodeClosed`].
    pub fn close(&self) {
        self.closed_tx.send_replace(true);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        *self.closed_tx.borrow()
    }

    /// Whether the local node can run ingest pipelines.
    pub fn local_node_is_ingest(&self) -> bool {
        self.ingest_node
    }

    /// Waits until the cluster accepts writes, bounded by `timeout`.
    ///
    /// Returns the first writable snapshot observed. Fails fast with the
    /// block cause for non-retryable blocks; for retryable blocks, waits for
    /// a state transition to an unblocked state. On timeout the *original*
    /// block cause is surfaced, not a timeout error.
    pub async fn await_writable(&self, timeout: Duration) -> Result<Arc<ClusterState>> {
        let mut state_rx = self.state_tx.subscribe();
        let mut closed_rx = self.closed_tx.subscribe();
        if *closed_rx.borrow_and_update() {
            return Err(Error::NodeClosed);
        }

        let state = state_rx.borrow_and_update().clone();
        let block = match state.write_block() {
            None => return Ok(state),
            Some(block) => block.clone(),
        };
        if !block.retryable {
            return Err(Error::ClusterBlocked {
                reason: block.description,
            });
        }

        trace!(block = %block.description, "cluster is blocked, waiting for it to recover");
        let wait = async {
            loop {
                tokio::select! {
                    changed = state_rx.changed() => {
                        if changed.is_err() {
                            return Err(Error::NodeClosed);
                        }
                        let state = state_rx.borrow_and_update().clone();
                        if state.write_block().is_none() {
                            return Ok(state);
                        }
                    }
                    changed = closed_rx.changed() => {
                        if changed.is_err() || *closed_rx.borrow_and_update() {
                            return Err(Error::NodeClosed);
                        }
                    }
                }
            }
        };

        match time::timeout(timeout, wait).await {
            Ok(result) => result,
            Err(_) => Err(Error::ClusterBlocked {
                reason: block.description,
            }),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
