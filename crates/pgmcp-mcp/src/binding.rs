//! Endpoint bindings: catalog objects resolved against configuration rules.
//!
//! A binding is built once per (object, rule) pair and never mutated. A re-bind
//! produces a fresh [`BindingSet`] that replaces the old one wholesale.
//!
//! Precedence: the first rule that resolves an object wins. Later rules that
//! resolve the same object are dropped with a warning.

use pgmcp_catalog::{
    Catalog, ColumnDescriptor, ObjectKind, ParamMode, RoutineReturn, SchemaObject,
};
use pgmcp_core::{
    PaginationConfig, Pattern, QualifiedName, ResourceRule, RuleSelector, SchemaType, Selector,
    ToolRule, TypeMapper,
};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::BindError;
use crate::filter::{Filter, FilterError, resolver};

/// Reserved argument carrying the confirmation for dangerous tools.
pub const CONFIRM_ARG: &str = "_confirm";

/// Whether a binding is read or invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EndpointKind {
    Resource,
    Tool,
}

/// A column exposed by a resource.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundColumn {
    pub name: String,
    pub native_type: String,
    pub schema_type: SchemaType,
    pub nullable: bool,
    pub description: Option<String>,
}

/// An input parameter accepted by a tool, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundParameter {
    pub name: String,
    /// Declared by name in the routine; unnamed parameters can only be passed positionally.
    pub named: bool,
    pub native_type: String,
    pub schema_type: SchemaType,
    pub mode: ParamMode,
    pub has_default: bool,
    /// May be omitted even without a default; NULL is passed.
    pub optional: bool,
    pub description: Option<String>,
}

impl BoundParameter {
    pub fn is_required(&self) -> bool {
        !self.has_default && !self.optional
    }
}

/// Page size policy for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaginationPolicy {
    pub default_limit: u32,
    pub max_limit: u32,
}

impl PaginationPolicy {
    /// The requested limit (or the default) clamped to `[1, max_limit]`.
    pub fn effective_limit(&self, requested: Option<u32>) -> u32 {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

/// One catalog object bound to one rule.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointBinding {
    pub id: String,
    pub kind: EndpointKind,
    pub object: QualifiedName,
    pub object_kind: ObjectKind,
    pub rule_index: usize,
    pub description: String,
    pub columns: Vec<BoundColumn>,
    pub parameters: Vec<BoundParameter>,
    pub returns: Option<RoutineReturn>,
    pub result_schema: Option<SchemaType>,
    pub default_filter: Option<Filter>,
    pub pagination: PaginationPolicy,
    pub dangerous: bool,
}

impl EndpointBinding {
    /// `table://schema/object` for resources.
    pub fn uri(&self) -> Option<String> {
        match self.kind {
            EndpointKind::Resource => Some(format!(
                "table://{}/{}",
                self.object.schema, self.object.name
            )),
            EndpointKind::Tool => None,
        }
    }

    pub fn column(&self, name: &str) -> Option<&BoundColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&BoundParameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// `(name, native type)` pairs of the exposed columns.
    pub fn column_types(&self) -> Vec<(String, String)> {
        self.columns
            .iter()
            .map(|c| (c.name.clone(), c.native_type.clone()))
            .collect()
    }

    /// Input schema presented to the transport.
    pub fn input_schema(&self) -> Value {
        match self.kind {
            EndpointKind::Resource => self.read_input_schema(),
            EndpointKind::Tool => self.call_input_schema(),
        }
    }

    fn read_input_schema(&self) -> Value {
        let columns: Vec<&str> = self.columns.iter().map(|c| c.name.as_str()).collect();
        json!({
            "type": "object",
            "properties": {
                "filter": {
                    "type": "string",
                    "description": "JSON object of column conditions, e.g. {\"status\": \"open\", \"total\": {\"gte\": 10}}"
                },
                "orderBy": {
                    "type": "string",
                    "description": format!("Comma-separated 'column [asc|desc]' terms over: {}", columns.join(", "))
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": format!("Rows per page (default {}, at most {})", self.pagination.default_limit, self.pagination.max_limit)
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0
                }
            },
            "additionalProperties": false
        })
    }

    fn call_input_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for param in &self.parameters {
            let mut schema = param.schema_type.to_json();
            if let (Some(desc), Some(obj)) = (&param.description, schema.as_object_mut()) {
                obj.insert("description".into(), json!(desc));
            }
            if param.is_required() {
                required.push(json!(param.name));
            }
            properties.insert(param.name.clone(), schema);
        }
        if self.dangerous {
            properties.insert(
                CONFIRM_ARG.into(),
                json!({
                    "type": "boolean",
                    "const": true,
                    "description": "Must be true to acknowledge this call has side effects"
                }),
            );
            required.push(json!(CONFIRM_ARG));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }

    /// Row schema for resources, result schema for tools.
    pub fn output_schema(&self) -> Value {
        match self.kind {
            EndpointKind::Resource => {
                let mut properties = Map::new();
                let mut required = Vec::new();
                for col in &self.columns {
                    let schema = if col.nullable {
                        col.schema_type.to_json_nullable()
                    } else {
                        required.push(json!(col.name));
                        col.schema_type.to_json()
                    };
                    properties.insert(col.name.clone(), schema);
                }
                json!({ "type": "object", "properties": properties, "required": required })
            }
            EndpointKind::Tool => self
                .result_schema
                .as_ref()
                .map(SchemaType::to_json)
                .unwrap_or_else(|| json!({})),
        }
    }

    /// Per-column `{type, nullable, description}` map returned with every read.
    pub fn column_schema(&self) -> Map<String, Value> {
        self.columns
            .iter()
            .map(|c| {
                (
                    c.name.clone(),
                    json!({
                        "type": c.schema_type.to_json(),
                        "nullable": c.nullable,
                        "description": c.description,
                    }),
                )
            })
            .collect()
    }
}

/// An immutable set of bindings, looked up by identifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSet {
    resources: BTreeMap<String, Arc<EndpointBinding>>,
    tools: BTreeMap<String, Arc<EndpointBinding>>,
}

impl BindingSet {
    pub fn new(resources: Vec<EndpointBinding>, tools: Vec<EndpointBinding>) -> Self {
        Self {
            resources: resources
                .into_iter()
                .map(|b| (b.id.clone(), Arc::new(b)))
                .collect(),
            tools: tools
                .into_iter()
                .map(|b| (b.id.clone(), Arc::new(b)))
                .collect(),
        }
    }

    pub fn resource(&self, id: &str) -> Option<Arc<EndpointBinding>> {
        self.resources.get(id).cloned()
    }

    pub fn tool(&self, id: &str) -> Option<Arc<EndpointBinding>> {
        self.tools.get(id).cloned()
    }

    pub fn resources(&self) -> impl Iterator<Item = &Arc<EndpointBinding>> {
        self.resources.values()
    }

    pub fn tools(&self) -> impl Iterator<Item = &Arc<EndpointBinding>> {
        self.tools.values()
    }

    pub fn len(&self) -> usize {
        self.resources.len() + self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.tools.is_empty()
    }
}

/// A rule that failed to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleFailure {
    pub rule_index: usize,
    pub error: BindError,
}

/// Result of binding one list of rules.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindOutcome {
    pub bindings: Vec<EndpointBinding>,
    pub failures: Vec<RuleFailure>,
}

/// Tracks ids and objects already bound within one bind pass.
#[derive(Default)]
struct Claims {
    objects: HashMap<QualifiedName, usize>,
    ids: HashMap<String, QualifiedName>,
}

impl Claims {
    /// Reserve an id for `object` on behalf of `rule_index`, or explain why not.
    fn claim(&mut self, object: &QualifiedName, rule_index: usize) -> Option<String> {
        if let Some(first) = self.objects.get(object) {
            tracing::warn!(
                object = %object,
                rule = rule_index,
                first_rule = *first,
                "object already bound by an earlier rule, dropping duplicate"
            );
            return None;
        }

        let base = object.underscored();
        let id = match self.ids.get(&base) {
            None => base,
            Some(_) => {
                let suffixed = format!("{base}_{rule_index}");
                if self.ids.contains_key(&suffixed) {
                    tracing::warn!(object = %object, id = %suffixed, "binding id collides, dropping");
                    return None;
                }
                suffixed
            }
        };
        self.objects.insert(object.clone(), rule_index);
        self.ids.insert(id.clone(), object.clone());
        Some(id)
    }
}

/// Binds configuration rules to catalog objects.
#[derive(Clone)]
pub struct Binder {
    catalog: Catalog,
    mapper: TypeMapper,
    pagination: PaginationConfig,
}

impl Binder {
    pub fn new(catalog: Catalog, mapper: TypeMapper, pagination: PaginationConfig) -> Self {
        Self {
            catalog,
            mapper,
            pagination,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Bind resource rules in order.
    pub async fn bind_resources(&self, rules: &[ResourceRule]) -> BindOutcome {
        let mut outcome = BindOutcome::default();
        let mut claims = Claims::default();

        for (index, rule) in rules.iter().enumerate() {
            match self.bind_resource_rule(index, rule, &mut claims).await {
                Ok(bindings) => {
                    if bindings.is_empty() {
                        tracing::warn!(rule = index, "resource rule matched no objects");
                    }
                    tracing::info!(rule = index, count = bindings.len(), "resource rule bound");
                    outcome.bindings.extend(bindings);
                }
                Err(error) => {
                    tracing::warn!(rule = index, error = %error, "resource rule failed");
                    outcome.failures.push(RuleFailure {
                        rule_index: index,
                        error,
                    });
                }
            }
        }
        outcome
    }

    /// Bind tool rules in order.
    pub async fn bind_tools(&self, rules: &[ToolRule]) -> BindOutcome {
        let mut outcome = BindOutcome::default();
        let mut claims = Claims::default();

        for (index, rule) in rules.iter().enumerate() {
            match self.bind_tool_rule(index, rule, &mut claims).await {
                Ok(bindings) => {
                    if bindings.is_empty() {
                        tracing::warn!(rule = index, "tool rule matched no routines");
                    }
                    tracing::info!(rule = index, count = bindings.len(), "tool rule bound");
                    outcome.bindings.extend(bindings);
                }
                Err(error) => {
                    tracing::warn!(rule = index, error = %error, "tool rule failed");
                    outcome.failures.push(RuleFailure {
                        rule_index: index,
                        error,
                    });
                }
            }
        }
        outcome
    }

    async fn bind_resource_rule(
        &self,
        index: usize,
        rule: &ResourceRule,
        claims: &mut Claims,
    ) -> Result<Vec<EndpointBinding>, BindError> {
        let selector = rule.selector().map_err(|e| BindError::Rule(e.to_string()))?;
        let (selector, kinds) = match selector {
            RuleSelector::Pattern { pattern, exclude } => (
                Selector::from_globs(&pattern, &exclude).map_err(|e| BindError::Rule(e.to_string()))?,
                vec![ObjectKind::Table, ObjectKind::View],
            ),
            RuleSelector::Table(name) => (exact(&name, &rule.exclude)?, vec![ObjectKind::Table]),
            RuleSelector::View(name) => (exact(&name, &rule.exclude)?, vec![ObjectKind::View]),
            RuleSelector::Function(_) => {
                return Err(BindError::Rule("resource rule cannot select a function".into()));
            }
        };

        let matched = self.resolve(&selector, &kinds).await?;

        // build everything first so a failing object aborts the whole rule
        let mut built = Vec::with_capacity(matched.len());
        for object in &matched {
            built.push(self.build_resource(index, rule, object)?);
        }

        let mut bindings = Vec::with_capacity(built.len());
        for mut binding in built {
            if let Some(id) = claims.claim(&binding.object, index) {
                binding.id = id;
                bindings.push(binding);
            }
        }
        Ok(bindings)
    }

    async fn bind_tool_rule(
        &self,
        index: usize,
        rule: &ToolRule,
        claims: &mut Claims,
    ) -> Result<Vec<EndpointBinding>, BindError> {
        let selector = match rule.selector().map_err(|e| BindError::Rule(e.to_string()))? {
            RuleSelector::Pattern { pattern, exclude } => Selector::from_globs(&pattern, &exclude)
                .map_err(|e| BindError::Rule(e.to_string()))?,
            RuleSelector::Function(name) => exact(&name, &rule.exclude)?,
            _ => return Err(BindError::Rule("tool rule must select functions".into())),
        };

        let matched = self.resolve(&selector, &[ObjectKind::Routine]).await?;

        let mut built = Vec::with_capacity(matched.len());
        for object in &matched {
            built.push(self.build_tool(index, rule, object)?);
        }

        let mut bindings = Vec::with_capacity(built.len());
        for mut binding in built {
            if let Some(id) = claims.claim(&binding.object, index) {
                binding.id = id;
                bindings.push(binding);
            }
        }
        Ok(bindings)
    }

    /// Objects of `kinds` selected by `selector`, ordered by schema, kind, then name.
    async fn resolve(
        &self,
        selector: &Selector,
        kinds: &[ObjectKind],
    ) -> Result<Vec<SchemaObject>, BindError> {
        let schemas: Vec<String> = match selector.include.literal_schema() {
            Some(schema) => vec![schema.to_string()],
            None => (*self.catalog.schemas().await?).clone(),
        };

        let mut matched = Vec::new();
        for schema in &schemas {
            for kind in kinds {
                let objects = self.catalog.list_objects(schema, *kind).await?;
                matched.extend(selector.select(objects.as_slice(), |o| &o.name).into_iter().cloned());
            }
        }
        Ok(matched)
    }

    fn build_resource(
        &self,
        index: usize,
        rule: &ResourceRule,
        object: &SchemaObject,
    ) -> Result<EndpointBinding, BindError> {
        let columns: Vec<&ColumnDescriptor> = match &rule.columns {
            Some(allow) => allow
                .iter()
                .map(|name| {
                    object.column(name).ok_or_else(|| BindError::UnknownColumn {
                        object: object.name.to_string(),
                        column: name.clone(),
                    })
                })
                .collect::<Result<_, _>>()?,
            None => object.columns.iter().collect(),
        };

        // default filters are trusted configuration and may use any column of the object
        let all_columns: Vec<(String, String)> = object
            .columns
            .iter()
            .map(|c| (c.name.clone(), c.native_type.clone()))
            .collect();
        let default_filter = rule
            .filter
            .as_ref()
            .map(|value| {
                Filter::from_value(value, resolver(&all_columns)).map_err(|e| match e {
                    FilterError::UnknownColumn(column) => BindError::UnknownColumn {
                        object: object.name.to_string(),
                        column,
                    },
                    other => BindError::InvalidFilter {
                        object: object.name.to_string(),
                        reason: other.to_string(),
                    },
                })
            })
            .transpose()?;

        let max_limit = rule
            .max_limit
            .unwrap_or(self.pagination.max_limit)
            .min(self.pagination.max_limit);
        let default_limit = rule
            .limit
            .unwrap_or(self.pagination.default_limit)
            .min(max_limit);

        let description = rule
            .description
            .clone()
            .or_else(|| object.description.clone())
            .unwrap_or_else(|| format!("PostgreSQL {} {}", object.kind, object.name));

        Ok(EndpointBinding {
            id: object.name.underscored(),
            kind: EndpointKind::Resource,
            object: object.name.clone(),
            object_kind: object.kind,
            rule_index: index,
            description,
            columns: columns
                .into_iter()
                .map(|c| BoundColumn {
                    name: c.name.clone(),
                    native_type: c.native_type.clone(),
                    schema_type: self.mapper.to_schema_type(&c.native_type),
                    nullable: c.nullable,
                    description: c.description.clone(),
                })
                .collect(),
            parameters: Vec::new(),
            returns: None,
            result_schema: None,
            default_filter,
            pagination: PaginationPolicy {
                default_limit,
                max_limit,
            },
            dangerous: false,
        })
    }

    fn build_tool(
        &self,
        index: usize,
        rule: &ToolRule,
        object: &SchemaObject,
    ) -> Result<EndpointBinding, BindError> {
        for name in rule.params.keys() {
            if !object.input_parameters().any(|p| &p.name == name) {
                return Err(BindError::UnknownParameter {
                    object: object.name.to_string(),
                    parameter: name.clone(),
                });
            }
        }

        let parameters = object
            .input_parameters()
            .map(|p| {
                let meta = rule.params.get(&p.name);
                BoundParameter {
                    name: p.name.clone(),
                    named: p.named,
                    native_type: p.native_type.clone(),
                    schema_type: self.mapper.to_schema_type(&p.native_type),
                    mode: p.mode,
                    has_default: p.has_default,
                    optional: meta.is_some_and(|m| m.optional),
                    description: meta.and_then(|m| m.description.clone()),
                }
            })
            .collect();

        let returns = object.returns.clone().unwrap_or(RoutineReturn::Void);
        let result_schema = self.result_schema(object, &returns);

        let base = rule
            .description
            .clone()
            .or_else(|| object.description.clone())
            .unwrap_or_else(|| format!("Execute PostgreSQL function {}", object.name));
        let description = if rule.dangerous {
            format!("DANGEROUS: {base}")
        } else {
            base
        };

        Ok(EndpointBinding {
            id: object.name.underscored(),
            kind: EndpointKind::Tool,
            object: object.name.clone(),
            object_kind: object.kind,
            rule_index: index,
            description,
            columns: Vec::new(),
            parameters,
            returns: Some(returns),
            result_schema: Some(result_schema),
            default_filter: None,
            pagination: PaginationPolicy {
                default_limit: self.pagination.default_limit,
                max_limit: self.pagination.max_limit,
            },
            dangerous: rule.dangerous,
        })
    }

    fn result_schema(&self, object: &SchemaObject, returns: &RoutineReturn) -> SchemaType {
        let row = || {
            object
                .output_parameters()
                .fold(SchemaType::object(), |schema, p| {
                    schema.with_property(&p.name, self.mapper.to_schema_type(&p.native_type))
                })
        };
        match returns {
            RoutineReturn::Void => SchemaType::null(),
            RoutineReturn::Scalar(native) => self.mapper.to_schema_type(native),
            RoutineReturn::Row => row(),
            RoutineReturn::Set => {
                if object.output_parameters().next().is_some() {
                    SchemaType::array_of(row())
                } else {
                    let element = object
                        .result_type
                        .as_deref()
                        .and_then(|r| r.strip_prefix("SETOF "))
                        .unwrap_or("record");
                    SchemaType::array_of(self.mapper.to_schema_type(element))
                }
            }
        }
    }
}

fn exact(name: &str, exclude: &[String]) -> Result<Selector, BindError> {
    let include = Pattern::exact(name).map_err(|e| BindError::Rule(e.to_string()))?;
    let excludes = exclude
        .iter()
        .map(|e| Pattern::glob(e))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| BindError::Rule(e.to_string()))?;
    Ok(Selector::new(include, excludes))
}
