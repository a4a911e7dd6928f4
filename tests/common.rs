#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use bulkgate::cluster::{ClusterService, ClusterState};
use bulkgate::coordinator::{
    BulkCoordinator, Collaborators, CoordinatorConfig, ReplicationExecutor,
};
use bulkgate::ingest::{IngestEngine, IngestForwarder, IngestOutcome};
use bulkgate::prereq::{CreateResult, RolloverExecutor, RolloverResult, TargetCreator};
use bulkgate::resolve::{CreateTargetRequest, RolloverTarget};
use bulkgate::results::ResponseSlots;
use bulkgate::types::{BatchRequest, BatchResponse, ItemResult, WriteItem};
use bulkgate::{Error, Result};

static TRACING: Once = Once::new();

/// Installs a fmt subscriber once per test binary. Verbosity is opt-in
/// through `RUST_LOG`; without it the subscriber stays silent.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Replication mock: records what it was handed, writes every surviving item
/// unless its target is scripted to fail.
pub struct RecordingReplication {
    /// `(slot, target, write_to_failure_store)` per replicated item.
    pub seen: Mutex<Vec<(usize, String, bool)>>,
    /// Targets whose items should come back failed, with the reason.
    pub fail_targets: Mutex<HashMap<String, String>>,
    /// When set, the whole replication call errors instead.
    pub fail_whole: Mutex<Option<String>>,
    /// The uncreatable-targets map from the last call.
    pub uncreatable_seen: Mutex<HashMap<String, String>>,
}

impl RecordingReplication {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            seen: Mutex::new(Vec::new()),
            fail_targets: Mutex::new(HashMap::new()),
            fail_whole: Mutex::new(None),
            uncreatable_seen: Mutex::new(HashMap::new()),
        })
    }

    pub fn fail_target(&self, target: &str, reason: &str) {
        self.fail_targets
            .lock()
            .unwrap()
            .insert(target.to_string(), reason.to_string());
    }

    pub fn replicated_targets(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|(_, target, _)| target.clone())
            .collect()
    }
}

#[async_trait]
impl ReplicationExecutor for RecordingReplication {
    async fn replicate(
        &self,
        batch: &BatchRequest,
        uncreatable: &HashMap<String, String>,
        slots: &ResponseSlots,
    ) -> Result<()> {
        *self.uncreatable_seen.lock().unwrap() = uncreatable.clone();
        if let Some(reason) = self.fail_whole.lock().unwrap().clone() {
            return Err(Error::internal(reason));
        }
        for (slot, item) in batch.live() {
            if let Some(reason) = uncreatable.get(item.target.as_str()) {
                slots.claim(slot, ItemResult::failed(item, reason));
                continue;
            }
            self.seen.lock().unwrap().push((
                slot,
                item.target.as_str().to_string(),
                item.write_to_failure_store,
            ));
            let scripted = self
                .fail_targets
                .lock()
                .unwrap()
                .get(item.target.as_str())
                .cloned();
            match scripted {
                Some(reason) => slots.claim(slot, ItemResult::failed(item, reason)),
                None => slots.claim(slot, ItemResult::written(item)),
            };
        }
        Ok(())
    }
}

/// Creator mock: records calls, answers from a script, defaults to Created.
pub struct RecordingCreator {
    pub results: Mutex<HashMap<String, CreateResult>>,
    pub calls: Mutex<Vec<String>>,
    pub last_request: Mutex<Option<CreateTargetRequest>>,
}

impl RecordingCreator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            last_request: Mutex::new(None),
        })
    }

    pub fn script(&self, name: &str, result: CreateResult) {
        self.results
            .lock()
            .unwrap()
            .insert(name.to_string(), result);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TargetCreator for RecordingCreator {
    async fn create(&self, request: CreateTargetRequest) -> CreateResult {
        self.calls
            .lock()
            .unwrap()
            .push(request.name.as_str().to_string());
        let result = self
            .results
            .lock()
            .unwrap()
            .get(request.name.as_str())
            .cloned()
            .unwrap_or(CreateResult::Created);
        *self.last_request.lock().unwrap() = Some(request);
        result
    }
}

/// Rollover mock: records calls, answers from a script, defaults to rolling
/// over to a synthetic next-generation index.
pub struct RecordingRollover {
    pub results: Mutex<HashMap<String, RolloverResult>>,
    pub calls: Mutex<Vec<RolloverTarget>>,
}

impl RecordingRollover {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            results: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    pub fn script(&self, name: &str, result: RolloverResult) {
        self.results
            .lock()
            .unwrap()
            .insert(name.to_string(), result);
    }

    pub fn calls(&self) -> Vec<RolloverTarget> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RolloverExecutor for RecordingRollover {
    async fn rollover(
        &self,
        target: RolloverTarget,
        _master_timeout: std::time::Duration,
    ) -> RolloverResult {
        self.calls.lock().unwrap().push(target.clone());
        self.results
            .lock()
            .unwrap()
            .get(target.name.as_str())
            .cloned()
            .unwrap_or(RolloverResult::RolledOver {
                new_index: format!(".ds-{}-000002", target.name),
            })
    }
}

/// Per-document script for the ingest engine mock, keyed by document id
/// (falling back to the target name for id-less items).
pub enum DocScript {
    Drop,
    Fail(String),
    Enrich(Vec<u8>),
}

/// Ingest engine mock: applies per-document scripts, passes everything else
/// through unchanged with its pipeline consumed.
pub struct ScriptedIngest {
    pub scripts: Mutex<HashMap<String, DocScript>>,
    pub calls: Mutex<usize>,
}

impl ScriptedIngest {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(0),
        })
    }

    pub fn script(&self, key: &str, script: DocScript) {
        self.scripts.lock().unwrap().insert(key.to_string(), script);
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl IngestEngine for ScriptedIngest {
    async fn process(
        &self,
        items: Vec<(usize, WriteItem)>,
    ) -> Result<Vec<(usize, IngestOutcome)>> {
        *self.calls.lock().unwrap() += 1;
        let scripts = self.scripts.lock().unwrap();
        Ok(items
            .into_iter()
            .map(|(slot, mut item)| {
                let key = item
                    .id
                    .clone()
                    .unwrap_or_else(|| item.target.as_str().to_string());
                let outcome = match scripts.get(&key) {
                    Some(DocScript::Drop) => IngestOutcome::Dropped,
                    Some(DocScript::Fail(reason)) => IngestOutcome::Failed {
                        reason: reason.clone(),
                    },
                    Some(DocScript::Enrich(source)) => {
                        item.source = source.clone();
                        item.pipeline = None;
                        IngestOutcome::Transformed(item)
                    }
                    None => {
                        item.pipeline = None;
                        IngestOutcome::Transformed(item)
                    }
                };
                (slot, outcome)
            })
            .collect())
    }
}

/// The `took` the forwarder mock stamps on its responses, distinguishable
/// from anything measured locally.
pub const FORWARDED_TOOK: std::time::Duration = std::time::Duration::from_millis(1234);

/// Forwarder mock: counts calls and answers every slot as written.
pub struct CountingForwarder {
    pub calls: Mutex<usize>,
}

impl CountingForwarder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl IngestForwarder for CountingForwarder {
    async fn forward(&self, batch: BatchRequest) -> Result<BatchResponse> {
        *self.calls.lock().unwrap() += 1;
        let items = (0..batch.len())
            .map(|slot| {
                let item = batch.item(slot).expect("forwarded batches arrive whole");
                ItemResult::written(item)
            })
            .collect();
        Ok(BatchResponse {
            items,
            took: FORWARDED_TOOK,
            ingest_took: None,
        })
    }
}

/// A fully wired coordinator plus handles to all its mocks.
pub struct Setup {
    pub cluster: Arc<ClusterService>,
    pub creator: Arc<RecordingCreator>,
    pub rollover: Arc<RecordingRollover>,
    pub replication: Arc<RecordingReplication>,
    pub ingest: Arc<ScriptedIngest>,
    pub forwarder: Arc<CountingForwarder>,
    pub coordinator: Arc<BulkCoordinator>,
}

/// Wires a coordinator on an ingest-capable node with all mocks attached.
pub fn setup(state: ClusterState) -> Setup {
    setup_opts(state, true, true, true)
}

pub fn setup_opts(
    state: ClusterState,
    ingest_node: bool,
    with_engine: bool,
    with_forwarder: bool,
) -> Setup {
    init_tracing();
    let cluster = Arc::new(ClusterService::new(state, ingest_node));
    let creator = RecordingCreator::new();
    let rollover = RecordingRollover::new();
    let replication = RecordingReplication::new();
    let ingest = ScriptedIngest::new();
    let forwarder = CountingForwarder::new();

    let coordinator = BulkCoordinator::new(
        CoordinatorConfig::default(),
        Arc::clone(&cluster),
        Collaborators {
            ingest: with_engine.then(|| Arc::clone(&ingest) as _),
            forwarder: with_forwarder.then(|| Arc::clone(&forwarder) as _),
            creator: Arc::clone(&creator) as _,
            rollover: Arc::clone(&rollover) as _,
            replication: Arc::clone(&replication) as _,
        },
    );

    Setup {
        cluster,
        creator,
        rollover,
        replication,
        ingest,
        forwarder,
        coordinator,
    }
}

/// A plain index item with an id.
pub fn doc(target: &str, id: &str) -> WriteItem {
    WriteItem::index(target, br#"{"field":"value"}"#.to_vec()).with_id(id)
}
