//! The single handler behind every registered endpoint.
//!
//! Each read or call loads the current [`BindingSet`] snapshot once, so a
//! concurrent re-bind never hands a request a half-updated binding.

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::binding::{BindingSet, CONFIRM_ARG, EndpointBinding};
use crate::error::McpError;
use crate::executor::{ExecError, QueryExecutor};
use crate::notify::{NotificationHub, Subscription};
use crate::query::{ReadRequest, build_call, build_read};

/// Page bounds returned with every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub limit: u32,
    pub offset: i64,
    pub total: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadResponse {
    pub schema: Map<String, Value>,
    pub data: Vec<Value>,
    pub pagination: PageInfo,
}

#[derive(Clone)]
pub struct Dispatcher {
    bindings: Arc<ArcSwap<BindingSet>>,
    executor: Arc<dyn QueryExecutor>,
    hub: Arc<NotificationHub>,
}

impl Dispatcher {
    pub fn new(
        bindings: Arc<ArcSwap<BindingSet>>,
        executor: Arc<dyn QueryExecutor>,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            bindings,
            executor,
            hub,
        }
    }

    /// The binding snapshot requests are currently served from.
    pub fn bindings(&self) -> Arc<BindingSet> {
        self.bindings.load_full()
    }

    /// Read one page from a resource.
    pub async fn read(&self, id: &str, request: &ReadRequest) -> Result<ReadResponse, McpError> {
        let binding = self
            .bindings
            .load()
            .resource(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;

        let templates = build_read(&binding, request)?;
        let (mut data, total) = self
            .executor
            .fetch_page(&templates.rows, &templates.count)
            .await
            .map_err(|e| exec_error(&binding, e))?;
        data.truncate(templates.limit as usize);

        let returned = data.len() as i64;
        tracing::debug!(endpoint = %binding.id, returned, total, "read served");
        Ok(ReadResponse {
            schema: binding.column_schema(),
            data,
            pagination: PageInfo {
                limit: templates.limit,
                offset: templates.offset,
                total,
                has_more: templates.offset + returned < total,
            },
        })
    }

    /// Invoke a tool with named arguments (a JSON object, or null for none).
    pub async fn call(&self, id: &str, arguments: Value) -> Result<Value, McpError> {
        let binding = self
            .bindings
            .load()
            .tool(id)
            .ok_or_else(|| McpError::NotFound(id.to_string()))?;

        let mut args = match arguments {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(McpError::InvalidArgument {
                    endpoint: binding.id.clone(),
                    reason: "arguments must be a JSON object".into(),
                });
            }
        };

        let confirmed = args.remove(CONFIRM_ARG) == Some(Value::Bool(true));
        if binding.dangerous && !confirmed {
            return Err(McpError::ConfirmationRequired {
                endpoint: binding.id.clone(),
            });
        }

        let template = build_call(&binding, &args)?;
        let result = self
            .executor
            .call(&template)
            .await
            .map_err(|e| exec_error(&binding, e))?;
        tracing::debug!(endpoint = %binding.id, "call served");
        Ok(result)
    }

    /// Subscribe to a configured notification channel.
    pub async fn subscribe(&self, channel: &str) -> Result<Subscription, McpError> {
        if self.hub.format(channel).is_none() {
            return Err(McpError::NotFound(channel.to_string()));
        }
        Ok(self.hub.subscribe(channel).await?)
    }
}

fn exec_error(binding: &EndpointBinding, err: ExecError) -> McpError {
    match err {
        ExecError::PoolExhausted => {
            tracing::warn!(endpoint = %binding.id, "connection pool exhausted");
            McpError::PoolExhausted
        }
        ExecError::Query { sqlstate } => {
            tracing::warn!(endpoint = %binding.id, sqlstate = ?sqlstate, "query failed");
            McpError::QueryFailed {
                endpoint: binding.id.clone(),
                sqlstate,
            }
        }
    }
}
