//! In-memory stand-ins for the catalog, executor and listener seams.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use pgmcp_catalog::{
    CatalogError, CatalogSource, ColumnDescriptor, ObjectKind, ParamMode, ParameterDescriptor,
    RoutineReturn, SchemaObject,
};
use pgmcp_core::{BridgeConfig, QualifiedName};
use pgmcp_mcp::{
    Bridge, BoundValue, CallTemplate, ChannelListener, ExecError, ListenerConnector, NotifyError,
    QueryExecutor, QueryTemplate, RawNotification,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

pub fn table(schema: &str, name: &str, columns: &[(&str, &str, bool)]) -> SchemaObject {
    relation(schema, name, ObjectKind::Table, columns)
}

pub fn view(schema: &str, name: &str, columns: &[(&str, &str, bool)]) -> SchemaObject {
    relation(schema, name, ObjectKind::View, columns)
}

fn relation(
    schema: &str,
    name: &str,
    kind: ObjectKind,
    columns: &[(&str, &str, bool)],
) -> SchemaObject {
    SchemaObject {
        name: QualifiedName::new(schema, name),
        kind,
        columns: columns
            .iter()
            .enumerate()
            .map(|(i, (col, native, nullable))| ColumnDescriptor {
                name: col.to_string(),
                native_type: native.to_string(),
                nullable: *nullable,
                ordinal: i as i32 + 1,
                description: None,
            })
            .collect(),
        parameters: Vec::new(),
        returns: None,
        result_type: None,
        description: None,
    }
}

/// `(name, native type, has_default)` input parameters.
pub fn routine(
    schema: &str,
    name: &str,
    params: &[(&str, &str, bool)],
    returns: RoutineReturn,
) -> SchemaObject {
    SchemaObject {
        name: QualifiedName::new(schema, name),
        kind: ObjectKind::Routine,
        columns: Vec::new(),
        parameters: params
            .iter()
            .enumerate()
            .map(|(i, (param, native, has_default))| ParameterDescriptor {
                name: param.to_string(),
                named: true,
                native_type: native.to_string(),
                mode: ParamMode::In,
                has_default: *has_default,
                ordinal: i as i32 + 1,
            })
            .collect(),
        returns: Some(returns),
        result_type: None,
        description: None,
    }
}

/// Catalog held in memory, counting loads.
#[derive(Default)]
pub struct MemorySource {
    objects: Mutex<HashMap<(String, ObjectKind), Vec<SchemaObject>>>,
    pub loads: AtomicUsize,
    pub fail: AtomicBool,
}

impl MemorySource {
    pub fn with(objects: Vec<SchemaObject>) -> Arc<Self> {
        let source = Self::default();
        for object in objects {
            source.add(object);
        }
        Arc::new(source)
    }

    pub fn add(&self, object: SchemaObject) {
        self.objects
            .lock()
            .entry((object.name.schema.clone(), object.kind))
            .or_default()
            .push(object);
    }
}

#[async_trait]
impl CatalogSource for MemorySource {
    async fn load_schemas(&self) -> Result<Vec<String>, CatalogError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        let mut schemas: Vec<String> = self
            .objects
            .lock()
            .keys()
            .map(|(schema, _)| schema.clone())
            .collect();
        schemas.sort();
        schemas.dedup();
        Ok(schemas)
    }

    async fn load_objects(
        &self,
        schema: &str,
        kind: ObjectKind,
    ) -> Result<Vec<SchemaObject>, CatalogError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(CatalogError::Unavailable("catalog offline".into()));
        }
        let mut objects = self
            .objects
            .lock()
            .get(&(schema.to_string(), kind))
            .cloned()
            .unwrap_or_default();
        objects.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(objects)
    }
}

/// Counts "connections" held by in-flight operations.
pub struct ConnectionGuard(Arc<AtomicUsize>);

impl ConnectionGuard {
    fn acquire(in_use: &Arc<AtomicUsize>) -> Self {
        in_use.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(in_use))
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Executor that records templates and serves canned rows.
#[derive(Default)]
pub struct FakeExecutor {
    pub table_rows: Mutex<Vec<Value>>,
    pub call_result: Mutex<Value>,
    pub fail_with: Mutex<Option<ExecError>>,
    pub delay: Mutex<Option<Duration>>,
    pub executed: Mutex<Vec<QueryTemplate>>,
    pub in_use: Arc<AtomicUsize>,
}

impl FakeExecutor {
    pub fn with_rows(count: usize) -> Arc<Self> {
        let executor = Self::default();
        *executor.table_rows.lock() = (0..count).map(|i| json!({ "id": i })).collect();
        Arc::new(executor)
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }

    async fn hold(&self) -> ConnectionGuard {
        let guard = ConnectionGuard::acquire(&self.in_use);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        guard
    }
}

#[async_trait]
impl QueryExecutor for FakeExecutor {
    async fn fetch_page(
        &self,
        rows: &QueryTemplate,
        count: &QueryTemplate,
    ) -> Result<(Vec<Value>, i64), ExecError> {
        self.executed.lock().push(rows.clone());
        self.executed.lock().push(count.clone());
        let _conn = self.hold().await;
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }

        // mimic LIMIT/OFFSET: the last two bound values
        let bound = |i: usize| match rows.params.get(i) {
            Some(BoundValue::Int(n)) => *n as usize,
            _ => 0,
        };
        let n = rows.params.len();
        let (limit, offset) = (bound(n - 2), bound(n - 1));
        let all = self.table_rows.lock().clone();
        let total = all.len() as i64;
        Ok((all.into_iter().skip(offset).take(limit).collect(), total))
    }

    async fn call(&self, call: &CallTemplate) -> Result<Value, ExecError> {
        self.executed.lock().push(call.query.clone());
        let _conn = self.hold().await;
        if let Some(err) = self.fail_with.lock().clone() {
            return Err(err);
        }
        Ok(self.call_result.lock().clone())
    }
}

type Feed = tokio::sync::mpsc::UnboundedSender<Result<RawNotification, NotifyError>>;

/// Connector whose listeners are fed by the test.
#[derive(Default)]
pub struct FakeConnector {
    pub connects: AtomicUsize,
    feeds: Mutex<HashMap<String, Feed>>,
}

struct FakeListener {
    rx: tokio::sync::mpsc::UnboundedReceiver<Result<RawNotification, NotifyError>>,
}

#[async_trait]
impl ChannelListener for FakeListener {
    async fn recv(&mut self) -> Result<RawNotification, NotifyError> {
        match self.rx.recv().await {
            Some(item) => item,
            None => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ListenerConnector for FakeConnector {
    async fn connect(&self, channel: &str) -> Result<Box<dyn ChannelListener>, NotifyError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        self.feeds.lock().insert(channel.to_string(), tx);
        Ok(Box::new(FakeListener { rx }))
    }
}

impl FakeConnector {
    pub fn notify(&self, channel: &str, payload: &str) {
        if let Some(feed) = self.feeds.lock().get(channel) {
            let _ = feed.send(Ok(RawNotification {
                channel: channel.to_string(),
                payload: payload.to_string(),
                process_id: 7,
            }));
        }
    }
}

pub struct Harness {
    pub bridge: Bridge,
    pub source: Arc<MemorySource>,
    pub executor: Arc<FakeExecutor>,
    pub connector: Arc<FakeConnector>,
}

pub fn harness(yaml: &str, objects: Vec<SchemaObject>, executor: Arc<FakeExecutor>) -> Harness {
    let config = BridgeConfig::from_yaml(yaml).expect("valid test config");
    let source = MemorySource::with(objects);
    let connector = Arc::new(FakeConnector::default());
    let bridge = Bridge::from_parts(
        config,
        source.clone(),
        executor.clone(),
        connector.clone(),
    );
    Harness {
        bridge,
        source,
        executor,
        connector,
    }
}

pub fn shop_catalog() -> Vec<SchemaObject> {
    vec![
        table(
            "public",
            "users",
            &[
                ("id", "integer", false),
                ("email", "text", false),
                ("password_hash", "text", true),
            ],
        ),
        table("public", "tmp_cache", &[("key", "text", false)]),
        table(
            "sales",
            "orders",
            &[
                ("id", "bigint", false),
                ("status", "text", false),
                ("total", "numeric(10,2)", true),
            ],
        ),
        view("sales", "open_orders", &[("id", "bigint", true)]),
        routine(
            "api",
            "refresh_stats",
            &[("customer_id", "integer", false), ("since", "date", true)],
            RoutineReturn::Scalar("integer".into()),
        ),
        routine("api", "purge_cache", &[], RoutineReturn::Void),
    ]
}
