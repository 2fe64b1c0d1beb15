//! TTL cache in front of a [`CatalogSource`].
//!
//! Entries are keyed by `(schema, kind)`. A miss or an expired entry triggers a
//! refresh; concurrent callers for the same key share that single in-flight
//! refresh instead of issuing their own catalog queries. A completed refresh
//! swaps the whole entry in one step, so readers see either the old snapshot or
//! the new one.
//!
//! When a refresh fails the previous entry is kept and served (stale-while-
//! revalidate) unless the caller asked for [`Freshness::Hard`].

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use pgmcp_core::QualifiedName;
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CatalogError;
use crate::model::{ObjectKind, SchemaObject};
use crate::source::CatalogSource;

/// How stale a cached answer may be.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve a fresh entry from cache; refresh an expired one, falling back to it on failure.
    #[default]
    Cached,
    /// Always go to the catalog and surface any failure.
    Hard,
}

type Refresh<V> = Shared<BoxFuture<'static, Result<V, CatalogError>>>;

struct Entry<V> {
    value: V,
    created_at: Instant,
}

struct Slot<V> {
    entry: Option<Entry<V>>,
    inflight: Option<Refresh<V>>,
    /// Bumped on invalidation so a refresh started earlier cannot install its result.
    epoch: u64,
}

impl<V> Default for Slot<V> {
    fn default() -> Self {
        Self {
            entry: None,
            inflight: None,
            epoch: 0,
        }
    }
}

/// A keyed TTL cache with one in-flight refresh per key.
struct KeyedCache<K, V> {
    ttl: Duration,
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> KeyedCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn get<F, Fut>(
        self: &Arc<Self>,
        key: K,
        freshness: Freshness,
        load: F,
    ) -> Result<V, CatalogError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, CatalogError>> + Send + 'static,
    {
        let refresh = {
            let mut slots = self.slots.lock();
            let slot = slots.entry(key.clone()).or_default();

            if freshness == Freshness::Cached
                && let Some(entry) = &slot.entry
                && entry.created_at.elapsed() < self.ttl
            {
                return Ok(entry.value.clone());
            }

            match &slot.inflight {
                Some(inflight) => inflight.clone(),
                None => {
                    let cache = Arc::clone(self);
                    let epoch = slot.epoch;
                    let refresh_key = key.clone();
                    let fut = load();
                    let refresh = async move {
                        tracing::debug!(key = ?refresh_key, "refreshing catalog entry");
                        let result = fut.await;
                        cache.complete(&refresh_key, epoch, &result);
                        result
                    }
                    .boxed()
                    .shared();
                    slot.inflight = Some(refresh.clone());
                    refresh
                }
            }
        };

        match refresh.await {
            Ok(value) => Ok(value),
            Err(err) if freshness == Freshness::Hard => Err(err),
            Err(err) => {
                let slots = self.slots.lock();
                match slots.get(&key).and_then(|s| s.entry.as_ref()) {
                    Some(stale) => {
                        tracing::warn!(key = ?key, error = %err, "catalog refresh failed, serving stale entry");
                        Ok(stale.value.clone())
                    }
                    None => Err(err),
                }
            }
        }
    }

    fn complete(&self, key: &K, epoch: u64, result: &Result<V, CatalogError>) {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get_mut(key) else {
            return;
        };
        if slot.epoch != epoch {
            return;
        }
        slot.inflight = None;
        if let Ok(value) = result {
            slot.entry = Some(Entry {
                value: value.clone(),
                created_at: Instant::now(),
            });
        }
    }

    fn invalidate_where(&self, pred: impl Fn(&K) -> bool) {
        let mut slots = self.slots.lock();
        for (_, slot) in slots.iter_mut().filter(|(k, _)| pred(k)) {
            slot.entry = None;
            slot.inflight = None;
            slot.epoch += 1;
        }
    }
}

type ObjectKey = (String, ObjectKind);

/// Cached view of the database catalog.
///
/// Cheap to clone; clones share the cache.
#[derive(Clone)]
pub struct Catalog {
    source: Arc<dyn CatalogSource>,
    objects: Arc<KeyedCache<ObjectKey, Arc<Vec<SchemaObject>>>>,
    schemas: Arc<KeyedCache<(), Arc<Vec<String>>>>,
}

impl Catalog {
    pub fn new(source: Arc<dyn CatalogSource>, ttl: Duration) -> Self {
        Self {
            source,
            objects: Arc::new(KeyedCache::new(ttl)),
            schemas: Arc::new(KeyedCache::new(ttl)),
        }
    }

    /// Schemas that may hold exposed objects.
    pub async fn schemas(&self) -> Result<Arc<Vec<String>>, CatalogError> {
        let source = Arc::clone(&self.source);
        self.schemas
            .get((), Freshness::Cached, move || async move {
                source.load_schemas().await.map(Arc::new)
            })
            .await
    }

    /// Objects of `kind` in `schema`.
    pub async fn list_objects(
        &self,
        schema: &str,
        kind: ObjectKind,
    ) -> Result<Arc<Vec<SchemaObject>>, CatalogError> {
        self.list_objects_with(schema, kind, Freshness::Cached).await
    }

    pub async fn list_objects_with(
        &self,
        schema: &str,
        kind: ObjectKind,
        freshness: Freshness,
    ) -> Result<Arc<Vec<SchemaObject>>, CatalogError> {
        let source = Arc::clone(&self.source);
        let owned = schema.to_string();
        self.objects
            .get((schema.to_string(), kind), freshness, move || async move {
                let objects = source.load_objects(&owned, kind).await?;
                tracing::debug!(schema = %owned, kind = %kind, count = objects.len(), "catalog loaded");
                Ok(Arc::new(objects))
            })
            .await
    }

    /// Look up one object by qualified name, trying tables, views, then routines.
    pub async fn describe(&self, name: &QualifiedName) -> Result<SchemaObject, CatalogError> {
        for kind in [ObjectKind::Table, ObjectKind::View, ObjectKind::Routine] {
            let objects = self.list_objects(&name.schema, kind).await?;
            if let Some(found) = objects.iter().find(|o| o.name == *name) {
                return Ok(found.clone());
            }
        }
        Err(CatalogError::NotFound(name.to_string()))
    }

    /// Drop every cached entry for `schema`.
    pub fn invalidate(&self, schema: &str) {
        tracing::debug!(schema, "invalidating catalog cache");
        self.objects.invalidate_where(|(s, _)| s == schema);
    }

    /// Drop everything, including the schema list.
    pub fn invalidate_all(&self) {
        self.objects.invalidate_where(|_| true);
        self.schemas.invalidate_where(|_| true);
    }
}
