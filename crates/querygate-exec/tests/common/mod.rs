//! In-memory store and registry fakes shared by the integration tests.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bson::{doc, Bson, Document};

use querygate::{CollectionOp, Operation, OperationKind};
use querygate_exec::{
    ExecutorConfig, FileTargetRegistry, QueryExecutor, StoreConnector, StoreError, StoreHandle,
    TargetDescriptor,
};

/// Shared state behind a [`FakeConnector`] and every handle it opens.
#[derive(Default)]
pub struct FakeStore {
    pub connects: AtomicUsize,
    pub closes: AtomicUsize,
    pub fail_connect: AtomicBool,
    pub connect_delay: Mutex<Duration>,
    pub run_delay: Mutex<Duration>,
    pub collections: Mutex<BTreeMap<String, Vec<Document>>>,
    pub ops: Mutex<Vec<OperationKind>>,
    pub current_op_filters: Mutex<Vec<Document>>,
    handles: Mutex<Vec<Arc<AtomicBool>>>,
}

impl FakeStore {
    #[allow(dead_code)]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[allow(dead_code)]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    #[allow(dead_code)]
    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock().unwrap() = delay;
    }

    #[allow(dead_code)]
    pub fn set_run_delay(&self, delay: Duration) {
        *self.run_delay.lock().unwrap() = delay;
    }

    /// Make every handle opened so far fail its liveness probe.
    #[allow(dead_code)]
    pub fn break_handles(&self) {
        for alive in self.handles.lock().unwrap().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Seed `name` with documents `{_id: 1..=n, n: i, group: "even"|"odd"}`.
    #[allow(dead_code)]
    pub fn seed(&self, name: &str, n: i32) {
        let docs = (1..=n)
            .map(|i| {
                doc! {
                    "_id": i,
                    "n": i,
                    "group": (if i % 2 == 0 { "even" } else { "odd" }),
                }
            })
            .collect();
        self.collections
            .lock()
            .unwrap()
            .insert(name.to_string(), docs);
    }

    #[allow(dead_code)]
    pub fn ops(&self) -> Vec<OperationKind> {
        self.ops.lock().unwrap().clone()
    }

    #[allow(dead_code)]
    pub fn current_op_filters(&self) -> Vec<Document> {
        self.current_op_filters.lock().unwrap().clone()
    }
}

pub struct FakeConnector {
    pub store: Arc<FakeStore>,
}

#[async_trait]
impl StoreConnector for FakeConnector {
    async fn connect(
        &self,
        _target: &TargetDescriptor,
        _timeout: Duration,
    ) -> Result<Arc<dyn StoreHandle>, StoreError> {
        self.store.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.store.connect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.store.fail_connect.load(Ordering::SeqCst) {
            return Err(StoreError::new("connection refused"));
        }
        let alive = Arc::new(AtomicBool::new(true));
        self.store.handles.lock().unwrap().push(alive.clone());
        Ok(Arc::new(FakeHandle {
            store: self.store.clone(),
            alive,
        }))
    }
}

pub struct FakeHandle {
    store: Arc<FakeStore>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl StoreHandle for FakeHandle {
    async fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn run(&self, operation: &Operation) -> Result<Bson, StoreError> {
        self.store.ops.lock().unwrap().push(operation.kind());

        if operation.collection() == Some("slow") {
            let delay = *self.store.run_delay.lock().unwrap();
            tokio::time::sleep(delay).await;
        }
        if operation.collection() == Some("explode") {
            return Err(StoreError::new(
                "E11000 duplicate key error collection: shop.explode index: _id_",
            ));
        }

        match operation {
            Operation::Collection { collection, op } => self.run_collection(collection, op),
            Operation::RunCommand(command) => Ok(Bson::Document(doc! {
                "ok": 1.0,
                "command": command.clone(),
            })),
            Operation::AdminCommand(command) if command.contains_key("listDatabases") => {
                Ok(Bson::Document(doc! {
                    "databases": [ { "name": "admin" }, { "name": "shop" } ],
                    "ok": 1.0,
                }))
            }
            Operation::AdminCommand(_) => Ok(Bson::Document(doc! { "ok": 1.0 })),
            Operation::CurrentOp(filter) => {
                self.store
                    .current_op_filters
                    .lock()
                    .unwrap()
                    .push(filter.clone());
                Ok(Bson::Document(doc! {
                    "inprog": [
                        { "opid": 1, "active": true },
                        { "opid": 2, "active": true },
                        { "opid": 3, "active": false },
                    ],
                }))
            }
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.store.collections.lock().unwrap().keys().cloned().collect())
    }

    async fn close(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.store.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeHandle {
    fn run_collection(&self, name: &str, op: &CollectionOp) -> Result<Bson, StoreError> {
        let mut collections = self.store.collections.lock().unwrap();
        let docs = collections.entry(name.to_string()).or_default();

        let result = match op {
            CollectionOp::Find(spec) => {
                let mut found: Vec<Document> = docs
                    .iter()
                    .filter(|d| matches_filter(d, &spec.filter))
                    .cloned()
                    .collect();
                if let Some(sort) = &spec.sort {
                    sort_docs(&mut found, sort);
                }
                let skip = spec.skip.unwrap_or(0) as usize;
                let limit = match spec.limit {
                    0 => usize::MAX,
                    n => n.unsigned_abs() as usize,
                };
                Bson::Array(
                    found
                        .into_iter()
                        .skip(skip)
                        .take(limit)
                        .map(Bson::Document)
                        .collect(),
                )
            }
            CollectionOp::FindOne { filter, .. } => docs
                .iter()
                .find(|d| matches_filter(d, filter))
                .cloned()
                .map(Bson::Document)
                .unwrap_or(Bson::Null),
            CollectionOp::CountDocuments { filter, .. } => {
                Bson::Int64(docs.iter().filter(|d| matches_filter(d, filter)).count() as i64)
            }
            CollectionOp::EstimatedDocumentCount => Bson::Int64(docs.len() as i64),
            CollectionOp::InsertOne(document) => {
                docs.push(document.clone());
                Bson::Document(doc! {
                    "acknowledged": true,
                    "insertedId": document.get("_id").cloned().unwrap_or(Bson::Null),
                })
            }
            CollectionOp::InsertMany(many) => {
                docs.extend(many.iter().cloned());
                Bson::Document(doc! { "acknowledged": true, "insertedCount": many.len() as i64 })
            }
            CollectionOp::DeleteMany { filter, .. } => {
                let before = docs.len();
                docs.retain(|d| !matches_filter(d, filter));
                Bson::Document(doc! {
                    "acknowledged": true,
                    "deletedCount": (before - docs.len()) as i64,
                })
            }
            _ => Bson::Document(doc! { "ok": 1.0 }),
        };
        Ok(result)
    }
}

fn number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(f) => Some(*f),
        _ => None,
    }
}

fn same(a: &Bson, b: &Bson) -> bool {
    match (number(a), number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

/// Top-level equality match; enough for the tests.
fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(key, expected)| doc.get(key).is_some_and(|actual| same(actual, expected)))
}

fn compare(a: Option<&Bson>, b: Option<&Bson>) -> CmpOrdering {
    match (a, b) {
        (Some(Bson::String(x)), Some(Bson::String(y))) => x.cmp(y),
        (Some(x), Some(y)) => match (number(x), number(y)) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(CmpOrdering::Equal),
            _ => CmpOrdering::Equal,
        },
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (None, None) => CmpOrdering::Equal,
    }
}

fn sort_docs(docs: &mut [Document], sort: &Document) {
    docs.sort_by(|a, b| {
        for (key, direction) in sort {
            let ordering = compare(a.get(key), b.get(key));
            let ordering = if number(direction).unwrap_or(1.0) < 0.0 {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != CmpOrdering::Equal {
                return ordering;
            }
        }
        CmpOrdering::Equal
    });
}

/// Targets: `shop` and `archive` active, `legacy` inactive.
#[allow(dead_code)]
pub fn registry() -> FileTargetRegistry {
    let mut legacy = TargetDescriptor::new("mongodb://legacy.internal:27017", "legacy");
    legacy.active = false;
    FileTargetRegistry::new()
        .with_target("shop", TargetDescriptor::new("mongodb://shop.internal:27017", "shop"))
        .with_target(
            "archive",
            TargetDescriptor::new("mongodb://archive.internal:27017", "archive"),
        )
        .with_target("legacy", legacy)
}

#[allow(dead_code)]
pub fn executor_with(store: &Arc<FakeStore>, config: ExecutorConfig) -> QueryExecutor {
    QueryExecutor::new(
        Arc::new(registry()),
        Arc::new(FakeConnector {
            store: store.clone(),
        }),
        config,
    )
}

#[allow(dead_code)]
pub fn executor(store: &Arc<FakeStore>) -> QueryExecutor {
    executor_with(store, ExecutorConfig::default())
}
