//! The bridge: pool, catalog, binder, dispatcher and notification hub wired
//! together from one [`BridgeConfig`].

use arc_swap::ArcSwap;
use pgmcp_catalog::{Catalog, CatalogSource, PgCatalogSource};
use pgmcp_core::{BridgeConfig, ConfigError, TypeMapper, quote_ident};
use sqlx::Executor;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::binding::{Binder, BindingSet, EndpointKind, RuleFailure};
use crate::dispatch::Dispatcher;
use crate::executor::{PgExecutor, QueryExecutor};
use crate::notify::{ListenerConnector, NotificationHub, PgListenerConnector};
use crate::registry::{EndpointDescriptor, EndpointRegistrar, StreamDescriptor};

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to connect to database: {0}")]
    Database(#[from] sqlx::Error),
}

/// Summary of one bind pass.
#[derive(Debug, Clone, Default)]
pub struct BindReport {
    pub resources: usize,
    pub tools: usize,
    pub streams: usize,
    pub failures: Vec<(EndpointKind, RuleFailure)>,
}

impl BindReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Bridge {
    config: BridgeConfig,
    catalog: Catalog,
    binder: Binder,
    bindings: Arc<ArcSwap<BindingSet>>,
    hub: Arc<NotificationHub>,
    executor: Arc<dyn QueryExecutor>,
    dispatcher: Dispatcher,
}

impl Bridge {
    /// Open the pool and build every component on top of it.
    pub async fn connect(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        let db = &config.database;

        let set_search_path = db.search_path.as_deref().map(|path| {
            let schemas: Vec<String> = path
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(quote_ident)
                .collect();
            format!("SET search_path TO {}", schemas.join(", "))
        });

        let pool = PgPoolOptions::new()
            .min_connections(db.pool.min_connections)
            .max_connections(db.pool.max_connections)
            .acquire_timeout(Duration::from_secs(db.pool.acquire_timeout_seconds))
            .idle_timeout(Some(Duration::from_secs(db.pool.idle_timeout_seconds)))
            .after_connect(move |conn, _meta| {
                let statement = set_search_path.clone();
                Box::pin(async move {
                    if let Some(statement) = statement {
                        conn.execute(statement.as_str()).await?;
                    }
                    Ok(())
                })
            })
            .connect(&db.connection_string())
            .await?;

        tracing::info!(
            host = %db.host,
            database = %db.database,
            max_connections = db.pool.max_connections,
            "connected to database"
        );

        let source = Arc::new(PgCatalogSource::new(
            pool.clone(),
            config.catalog.exclude_schemas.clone(),
        ));
        let executor = Arc::new(PgExecutor::new(pool.clone()));
        let connector = Arc::new(PgListenerConnector::new(pool));
        Ok(Self::from_parts(config, source, executor, connector))
    }

    /// Build from injected seams. No I/O happens until [`bind`](Self::bind).
    pub fn from_parts(
        config: BridgeConfig,
        source: Arc<dyn CatalogSource>,
        executor: Arc<dyn QueryExecutor>,
        connector: Arc<dyn ListenerConnector>,
    ) -> Self {
        let catalog = Catalog::new(source, Duration::from_secs(config.catalog.ttl_seconds));
        let binder = Binder::new(
            catalog.clone(),
            TypeMapper::with_overrides(&config.type_overrides),
            config.pagination.clone(),
        );

        let formats: HashMap<_, _> = config
            .expose
            .notifications
            .iter()
            .map(|n| (n.channel.clone(), n.format))
            .collect();
        let hub = Arc::new(NotificationHub::new(
            connector,
            config.notifications.clone(),
            formats,
        ));

        let bindings = Arc::new(ArcSwap::from_pointee(BindingSet::default()));
        let dispatcher = Dispatcher::new(
            Arc::clone(&bindings),
            Arc::clone(&executor),
            Arc::clone(&hub),
        );

        Self {
            config,
            catalog,
            binder,
            bindings,
            hub,
            executor,
            dispatcher,
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn hub(&self) -> Arc<NotificationHub> {
        Arc::clone(&self.hub)
    }

    pub fn bindings(&self) -> Arc<BindingSet> {
        self.bindings.load_full()
    }

    /// Bind every configured rule and swap in the resulting set.
    pub async fn bind(&self) -> BindReport {
        let resources = self.binder.bind_resources(&self.config.expose.resources).await;
        let tools = self.binder.bind_tools(&self.config.expose.tools).await;

        let mut report = BindReport {
            resources: resources.bindings.len(),
            tools: tools.bindings.len(),
            streams: self.config.expose.notifications.len(),
            failures: Vec::new(),
        };
        report.failures.extend(
            resources
                .failures
                .into_iter()
                .map(|f| (EndpointKind::Resource, f)),
        );
        report
            .failures
            .extend(tools.failures.into_iter().map(|f| (EndpointKind::Tool, f)));

        self.bindings
            .store(Arc::new(BindingSet::new(resources.bindings, tools.bindings)));
        tracing::info!(
            resources = report.resources,
            tools = report.tools,
            streams = report.streams,
            failures = report.failures.len(),
            "bindings installed"
        );
        report
    }

    /// Drop cached catalog data (one schema, or all) and bind again.
    pub async fn rebind(&self, schema: Option<&str>) -> BindReport {
        match schema {
            Some(schema) => self.catalog.invalidate(schema),
            None => self.catalog.invalidate_all(),
        }
        self.bind().await
    }

    /// Hand every endpoint and stream to the transport, replacing earlier registrations.
    pub fn register(&self, registrar: &mut dyn EndpointRegistrar) {
        registrar.clear();
        let bindings = self.bindings.load();
        for binding in bindings.resources() {
            registrar.register_resource(EndpointDescriptor::from_binding(binding));
        }
        for binding in bindings.tools() {
            registrar.register_tool(EndpointDescriptor::from_binding(binding));
        }
        for rule in &self.config.expose.notifications {
            registrar.register_stream(StreamDescriptor::from(rule));
        }
    }

    /// Close every listener, then the pool.
    pub async fn shutdown(&self) {
        self.hub.shutdown().await;
        self.executor.close().await;
        tracing::info!("bridge shut down");
    }
}
