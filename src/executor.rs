//! # Executor Lanes
//!
//! Batch coordination runs on dedicated executor lanes rather than on the
//! caller's task: accepting a batch returns immediately, and all resolution,
//! preprocessing and dispatch happen on a lane worker.
//!
//! ## Two Lanes
//!
//! ```text
//!             ┌────────────────────────────────────────┐
//!   batch ───▶│ route: all targets system?             │
//!             └──────┬──────────────────────┬──────────┘
//!                    │ yes                  │ no
//!                    ▼                      ▼
//!             [ system lane ]        [ general lane ]
//! ```
//!
//! System-index housekeeping must keep flowing while client writes saturate
//! the node, so system-only batches get their own queue and workers. Routing
//! is all-or-nothing: a mixed batch runs on the general lane.
//!
//! ## Saturation and Forced Submission
//!
//! Each lane has a bounded queue; when it is full, [`Lane::submit`] fails
//! with [`Error::LaneSaturated`] instead of blocking the caller. Continuation
//! work for a batch that already holds resources (its admission permit, its
//! partially-built results) goes through [`Lane::submit_forced`], which is
//! never refused — dropping such a batch at the queue would leak the work
//! already done on it.

use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{Error, Result};

/// A unit of work scheduled onto a lane.
pub type Job = BoxFuture<'static, ()>;

// =============================================================================
// Configuration
// =============================================================================

/// Default queue depth for the general lane.
pub const DEFAULT_QUEUE_DEPTH: usize = 10_000;

/// Default worker count per lane.
pub const DEFAULT_WORKERS: usize = 4;

/// Sizing for one lane.
#[derive(Debug, Clone)]
pub struct LaneConfig {
    /// Bounded queue depth for normal submissions.
    pub queue_depth: usize,

    /// Number of concurrent workers.
    pub workers: usize,
}

impl Default for LaneConfig {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            workers: DEFAULT_WORKERS,
        }
    }
}

/// Sizing for both lanes.
#[derive(Debug, Clone, Default)]
pub struct ExecutorConfig {
    /// The general write lane.
    pub general: LaneConfig,

    /// The system write lane.
    pub system: LaneConfig,
}

// =============================================================================
// Lanes
// =============================================================================

/// Which lane a batch was routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneKind {
    /// Client writes.
    General,
    /// System-index writes.
    System,
}

impl fmt::Display for LaneKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKind::General => write!(f, "general"),
            LaneKind::System => write!(f, "system"),
        }
    }
}

/// One executor lane: a bounded queue, an unbounded forced queue, and a pool
/// of workers draining both (forced first).
#[derive(Debug)]
pub struct Lane {
    kind: LaneKind,
    tx: mpsc::Sender<Job>,
    forced_tx: mpsc::UnboundedSender<Job>,
    workers: Vec<JoinHandle<()>>,
}

impl Lane {
    /// Spawns the lane's workers on the current runtime.
    pub fn new(kind: LaneKind, config: &LaneConfig) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_depth.max(1));
        let (forced_tx, forced_rx) = mpsc::unbounded_channel();

        // Workers share the receivers; a worker holds the locks only while
        // idle and releases them for the duration of each job.
        let rx = Arc::new(Mutex::new(rx));
        let forced_rx = Arc::new(Mutex::new(forced_rx));

        let workers = (0..config.workers.max(1))
            .map(|_| {
                let rx = Arc::clone(&rx);
                let forced_rx = Arc::clone(&forced_rx);
                tokio::spawn(worker_loop(kind, rx, forced_rx))
            })
            .collect();

        Self {
            kind,
            tx,
            forced_tx,
            workers,
        }
    }

    /// This lane's kind.
    pub fn kind(&self) -> LaneKind {
        self.kind
    }

    /// Queues a job, failing immediately when the lane is saturated.
    pub fn submit(&self, job: Job) -> Result<()> {
        self.tx
            .try_send(job)
            .map_err(|_| Error::LaneSaturated { lane: self.kind })
    }

    /// Queues continuation work for an already-admitted batch. Never refused:
    /// the batch holds resources that must be driven to release.
    pub fn submit_forced(&self, job: Job) {
        // The receiver outlives all senders (workers only exit once every
        // sender is dropped), so this send cannot fail while `self` exists.
        let _ = self.forced_tx.send(job);
    }
}

impl Drop for Lane {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    kind: LaneKind,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
    forced_rx: Arc<Mutex<mpsc::UnboundedReceiver<Job>>>,
) {
    loop {
        let job = tokio::select! {
            biased;
            job = async { forced_rx.lock().await.recv().await } => job,
            job = async { rx.lock().await.recv().await } => job,
        };
        match job {
            Some(job) => job.await,
            None => {
                debug!(lane = %kind, "executor lane closed, worker exiting");
                return;
            }
        }
    }
}

/// The executor: one general lane and one system lane.
#[derive(Debug)]
pub struct Lanes {
    general: Lane,
    system: Lane,
}

impl Lanes {
    /// Spawns both lanes on the current runtime.
    pub fn new(config: &ExecutorConfig) -> Self {
        Self {
            general: Lane::new(LaneKind::General, &config.general),
            system: Lane::new(LaneKind::System, &config.system),
        }
    }

    /// Routes a batch: the system lane only when every live item targets a
    /// system index.
    pub fn route(&self, system_only: bool) -> &Lane {
        if system_only {
            &self.system
        } else {
            &self.general
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
