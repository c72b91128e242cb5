//! Shared fixtures: entity types, a seeded host and transports.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use tasksync_client::{ClientConfig, SyncClient, SyncTransport, TransportError};
use tasksync_host::{DatabaseHub, HostConfig, TaskExecutor};
use tasksync_model::{Entity, Filter, Ref, RefField};
use tasksync_protocol::{DeleteTarget, EntityPatch, EntityValue, SyncRequest, SyncResponse};
use tasksync_storage::{
    EntityContainer, EntityErrors, KeyedEntity, MemoryContainer, StorageError, StorageResult,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Routes logs to the test harness; filter with `RUST_LOG`.
pub fn init_logging() {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

// ── Entities ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Country {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Entity for Country {
    const CONTAINER: &'static str = "countries";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Producer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub country: Ref<Country>,
}

impl Entity for Producer {
    const CONTAINER: &'static str = "producers";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }

    fn visit_refs<'a>(&'a self, visitor: &mut dyn FnMut(&'a dyn RefField)) {
        visitor(&self.country);
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefField)) {
        visitor(&mut self.country);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Article {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub price: i64,
    pub producer: Ref<Producer>,
}

impl Entity for Article {
    const CONTAINER: &'static str = "articles";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }

    fn visit_refs<'a>(&'a self, visitor: &mut dyn FnMut(&'a dyn RefField)) {
        visitor(&self.producer);
    }

    fn visit_refs_mut(&mut self, visitor: &mut dyn FnMut(&mut dyn RefField)) {
        visitor(&mut self.producer);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub articles: Vec<String>,
}

impl Entity for Order {
    const CONTAINER: &'static str = "orders";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }
}

/// Lives in a container the host does not have.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ghost {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Entity for Ghost {
    const CONTAINER: &'static str = "ghosts";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }
}

/// Backed by a container that fails every call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Archived {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Entity for Archived {
    const CONTAINER: &'static str = "archive";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }
}

/// Fails to serialize once `totals` is non-empty: JSON map keys must be
/// strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Ledger {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub totals: BTreeMap<(i32, i32), i64>,
}

impl Entity for Ledger {
    const CONTAINER: &'static str = "ledgers";

    fn key(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn set_key(&mut self, key: &str) {
        self.id = Some(key.to_string());
    }
}

pub fn ledger(id: &str) -> Ledger {
    Ledger {
        id: Some(id.to_string()),
        totals: BTreeMap::new(),
    }
}

pub fn producer(id: &str, name: &str) -> Producer {
    Producer {
        id: Some(id.to_string()),
        name: name.to_string(),
        country: Ref::Unset,
    }
}

pub fn article(id: &str, name: &str, price: i64) -> Article {
    Article {
        id: Some(id.to_string()),
        name: name.to_string(),
        price,
        producer: Ref::Unset,
    }
}

// ── Host ─────────────────────────────────────────────────────────

struct ArchiveContainer;

#[async_trait]
impl EntityContainer for ArchiveContainer {
    fn name(&self) -> &str {
        "archive"
    }
    async fn create_entities(&self, _: Vec<KeyedEntity>) -> StorageResult<EntityErrors> {
        Err(StorageError::Unavailable("archive offline".into()))
    }
    async fn upsert_entities(&self, _: Vec<KeyedEntity>) -> StorageResult<EntityErrors> {
        Err(StorageError::Unavailable("archive offline".into()))
    }
    async fn read_entities(&self, _: &[String]) -> StorageResult<BTreeMap<String, EntityValue>> {
        Err(StorageError::Unavailable("archive offline".into()))
    }
    async fn query_entities(&self, _: &Filter) -> StorageResult<Vec<KeyedEntity>> {
        Err(StorageError::Unavailable("archive offline".into()))
    }
    async fn patch_entities(&self, _: &[EntityPatch]) -> StorageResult<EntityErrors> {
        Err(StorageError::Unavailable("archive offline".into()))
    }
    async fn delete_entities(&self, _: &DeleteTarget) -> StorageResult<EntityErrors> {
        Err(StorageError::Unavailable("archive offline".into()))
    }
}

/// A host with articles a1..a3, producers p1 and p2, country c1,
/// order o1 and no ledgers.
pub async fn seeded_executor() -> Arc<TaskExecutor> {
    let hub = Arc::new(DatabaseHub::new("main"));
    let containers = vec![
        MemoryContainer::with_entities(
            "articles",
            vec![
                json!({"id": "a1", "name": "Apple", "price": 3, "producer": "p1"}),
                json!({"id": "a2", "name": "Pear", "price": 5, "producer": "p2"}),
                json!({"id": "a3", "name": "Plum", "price": 2, "producer": null}),
            ],
        ),
        MemoryContainer::with_entities(
            "producers",
            vec![
                json!({"id": "p1", "name": "Orchard", "country": "c1"}),
                json!({"id": "p2", "name": "Grove", "country": "c1"}),
            ],
        ),
        MemoryContainer::with_entities("countries", vec![json!({"id": "c1", "name": "Freedonia"})]),
        MemoryContainer::with_entities(
            "orders",
            vec![json!({"id": "o1", "articles": ["a1", "a2", "a1", "a9"]})],
        ),
        MemoryContainer::new("ledgers"),
    ];
    for container in containers {
        hub.add_container(Arc::new(container)).await.unwrap();
    }
    hub.add_container(Arc::new(ArchiveContainer)).await.unwrap();
    Arc::new(TaskExecutor::new(hub, HostConfig::default()))
}

// ── Transports ───────────────────────────────────────────────────

/// Runs requests against an in-process executor through the JSON wire
/// form and records them.
pub struct Loopback {
    executor: Arc<TaskExecutor>,
    requests: Mutex<Vec<SyncRequest>>,
}

impl Loopback {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Self {
            executor,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<SyncRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> SyncRequest {
        self.requests.lock().last().cloned().expect("no request sent")
    }
}

#[async_trait]
impl SyncTransport for Loopback {
    async fn execute(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        let wire = serde_json::to_string(&request)?;
        let request: SyncRequest = serde_json::from_str(&wire)?;
        self.requests.lock().push(request.clone());
        let response = self.executor.execute_sync(request).await;
        let wire = serde_json::to_string(&response)?;
        Ok(serde_json::from_str(&wire)?)
    }
}

/// Never reaches a host.
pub struct Unreachable;

#[async_trait]
impl SyncTransport for Unreachable {
    async fn execute(&self, _request: SyncRequest) -> Result<SyncResponse, TransportError> {
        Err(TransportError::Unavailable("connection refused".into()))
    }
}

/// Never answers.
pub struct Hanging;

#[async_trait]
impl SyncTransport for Hanging {
    async fn execute(&self, _request: SyncRequest) -> Result<SyncResponse, TransportError> {
        std::future::pending().await
    }
}

/// Answers with one task result too few.
pub struct Truncating(pub Arc<TaskExecutor>);

#[async_trait]
impl SyncTransport for Truncating {
    async fn execute(&self, request: SyncRequest) -> Result<SyncResponse, TransportError> {
        let mut response = self.0.execute_sync(request).await;
        response.tasks.pop();
        Ok(response)
    }
}

pub async fn loopback_client() -> (SyncClient, Arc<Loopback>) {
    init_logging();
    let transport = Arc::new(Loopback::new(seeded_executor().await));
    let client = SyncClient::new(transport.clone(), ClientConfig::default());
    (client, transport)
}

/// A second client on the same host, to observe what the first wrote.
pub fn observer(transport: &Loopback) -> SyncClient {
    let fresh = Loopback::new(Arc::clone(&transport.executor));
    SyncClient::new(Arc::new(fresh), ClientConfig::default())
}
