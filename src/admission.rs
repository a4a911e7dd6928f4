//! # Admission Control
//!
//! This module implements memory-pressure admission for the coordinator. Every
//! batch must obtain an [`AdmissionPermit`] before any work is forked off the
//! inbound thread; the permit accounts for the batch's operation count and
//! approximate byte size against configurable budgets.
//!
//! ## Scoped Release
//!
//! The permit is a scoped guard: its accounting is returned to the budget in
//! `Drop`. That makes "released exactly once on every exit path" a structural
//! property rather than a discipline — success, batch-level failure, and
//! abandonment (the pipeline future being dropped during shutdown) all run
//! the same destructor, and it cannot run twice.
//!
//! ## System-Only Batches
//!
//! Batches whose targets are all system indices are accounted against their
//! own budgets, normally set higher than the general ones, so internal
//! housekeeping writes are not starved by client load. This is a configurable
//! threshold, not an exemption.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Default limit on outstanding coordinating operations.
pub const DEFAULT_MAX_OPERATIONS: usize = 10_000;

/// Default limit on outstanding coordinating bytes (64 MiB).
pub const DEFAULT_MAX_BYTES: usize = 64 * 1024 * 1024;

/// Default limit on outstanding system-write operations.
pub const DEFAULT_SYSTEM_MAX_OPERATIONS: usize = 16_000;

/// Default limit on outstanding system-write bytes (96 MiB).
pub const DEFAULT_SYSTEM_MAX_BYTES: usize = 96 * 1024 * 1024;

/// Budgets for admission control.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Maximum outstanding operations for general batches.
    pub max_operations: usize,

    /// Maximum outstanding bytes for general batches.
    pub max_bytes: usize,

    /// Maximum outstanding operations for system-only batches.
    pub system_max_operations: usize,

    /// Maximum outstanding bytes for system-only batches.
    pub system_max_bytes: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_operations: DEFAULT_MAX_OPERATIONS,
            max_bytes: DEFAULT_MAX_BYTES,
            system_max_operations: DEFAULT_SYSTEM_MAX_OPERATIONS,
            system_max_bytes: DEFAULT_SYSTEM_MAX_BYTES,
        }
    }
}

// =============================================================================
// Controller
// =============================================================================

/// One budget: an outstanding counter checked against a limit.
#[derive(Debug)]
struct Budget {
    outstanding: AtomicUsize,
    limit: usize,
    unit: &'static str,
}

impl Budget {
    fn new(limit: usize, unit: &'static str) -> Self {
        Self {
            outstanding: AtomicUsize::new(0),
            limit,
            unit,
        }
    }

    /// Reserves `amount` against this budget, or reports the overflow.
    /// Optimistic add-then-check: concurrent acquirers may transiently
    /// observe each other's reservations, which only makes rejection
    /// slightly more conservative, never an over-admission leak.
    fn reserve(&self, amount: usize) -> Result<()> {
        let before = self.outstanding.fetch_add(amount, Ordering::AcqRel);
        if before + amount > self.limit {
            self.outstanding.fetch_sub(amount, Ordering::AcqRel);
            return Err(Error::AdmissionRejected {
                unit: self.unit,
                outstanding: before,
                attempted: amount,
                limit: self.limit,
            });
        }
        Ok(())
    }

    fn release(&self, amount: usize) {
        self.outstanding.fetch_sub(amount, Ordering::AcqRel);
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

/// Tracks outstanding coordinating work and grants admission permits.
#[derive(Debug)]
pub struct AdmissionController {
    operations: Budget,
    bytes: Budget,
    system_operations: Budget,
    system_bytes: Budget,
}

impl AdmissionController {
    /// Creates a controller with the given budgets.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            operations: Budget::new(config.max_operations, "operations"),
            bytes: Budget::new(config.max_bytes, "bytes"),
            system_operations: Budget::new(config.system_max_operations, "operations"),
            system_bytes: Budget::new(config.system_max_bytes, "bytes"),
        }
    }

    /// Admits a batch of `op_count` operations totalling `byte_size` bytes,
    /// or rejects it with no side effects. `system_only` selects the system
    /// budgets. Must be called before the batch forks off the inbound thread.
    pub fn acquire(
        self: &Arc<Self>,
        op_count: usize,
        byte_size: usize,
        system_only: bool,
    ) -> Result<AdmissionPermit> {
        let (ops, bytes) = self.budgets(system_only);

        ops.reserve(op_count).inspect_err(|_| {
            warn!(
                op_count,
                system_only, "rejecting batch: operation budget exhausted"
            );
        })?;
        if let Err(err) = bytes.reserve(byte_size) {
            // Undo the operation reservation so a rejection is side-effect free.
            ops.release(op_count);
            warn!(byte_size, system_only, "rejecting batch: byte budget exhausted");
            return Err(err);
        }

        Ok(AdmissionPermit {
            controller: Arc::clone(self),
            op_count,
            byte_size,
            system_only,
        })
    }

    /// Outstanding operations on the general budget.
    pub fn outstanding_operations(&self) -> usize {
        self.operations.outstanding()
    }

    /// Outstanding bytes on the general budget.
    pub fn outstanding_bytes(&self) -> usize {
        self.bytes.outstanding()
    }

    /// Outstanding operations on the system budget.
    pub fn outstanding_system_operations(&self) -> usize {
        self.system_operations.outstanding()
    }

    /// Outstanding bytes on the system budget.
    pub fn outstanding_system_bytes(&self) -> usize {
        self.system_bytes.outstanding()
    }

    fn budgets(&self, system_only: bool) -> (&Budget, &Budget) {
        if system_only {
            (&self.system_operations, &self.system_bytes)
        } else {
            (&self.operations, &self.bytes)
        }
    }
}

// =============================================================================
// Permit
// =============================================================================

/// An exclusively-owned grant of admission budget, spanning the whole
/// coordinator invocation. Releases its accounting exactly once, on `Drop`.
#[derive(Debug)]
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    op_count: usize,
    byte_size: usize,
    system_only: bool,
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        let (ops, bytes) = self.controller.budgets(self.system_only);
        ops.release(self.op_count);
        bytes.release(self.byte_size);
    }
}

// =============================================================================
// Tests
// =============================================================================
