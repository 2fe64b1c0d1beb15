//! Parameterized SQL for reads, counts and routine calls.
//!
//! Caller-supplied values only ever travel as bound parameters. The only text
//! spliced into SQL is identifiers taken from the catalog (quoted) and native
//! type names used as placeholder casts.

use pgmcp_catalog::{ParamMode, RoutineReturn};
use pgmcp_core::quote_ident;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::binding::{CONFIRM_ARG, EndpointBinding};
use crate::error::McpError;
use crate::filter::{Condition, Direction, Filter, FilterError, FilterOp, parse_order_by, resolver};

/// A value bound to a positional placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(Value),
}

/// SQL text plus its bound values, in placeholder order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryTemplate {
    pub sql: String,
    pub params: Vec<BoundValue>,
}

/// Arguments of a read, as received from the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i64>,
}

/// The row and count queries of one read, with the effective page bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadTemplates {
    pub rows: QueryTemplate,
    pub count: QueryTemplate,
    pub limit: u32,
    pub offset: i64,
}

/// How a call's result rows are folded into one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallShape {
    /// Every row, as an array.
    Rows,
    /// The first row, or null.
    Row,
    /// The single scalar value.
    Value,
    /// Nothing; the result is null.
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallTemplate {
    pub query: QueryTemplate,
    pub shape: CallShape,
}

/// Accumulates bound values and hands out cast placeholders.
#[derive(Default)]
struct Params {
    values: Vec<BoundValue>,
}

impl Params {
    fn push(&mut self, value: BoundValue, native: &str) -> String {
        self.values.push(value);
        format!("${}::{}", self.values.len(), cast_type(native))
    }
}

/// The placeholder cast for a column or parameter type.
///
/// Modifiers are dropped, since an explicit cast to `varchar(4)` truncates and
/// one to `numeric(10,2)` rounds. Bare `character` and `bit` mean length 1, so
/// they widen to `bpchar` and `varbit`.
fn cast_type(native: &str) -> String {
    let mut stripped = String::with_capacity(native.len());
    let mut depth = 0usize;
    let mut quoted = false;
    for ch in native.chars() {
        match ch {
            '"' if depth == 0 => {
                quoted = !quoted;
                stripped.push(ch);
            }
            '(' if !quoted => depth += 1,
            ')' if !quoted && depth > 0 => depth -= 1,
            _ if depth == 0 => stripped.push(ch),
            _ => {}
        }
    }
    let stripped = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

    let element = stripped.trim_end_matches("[]");
    let dims = &stripped[element.len()..];
    let base = match element {
        "character" | "char" => "bpchar",
        "bit" => "varbit",
        other => other,
    };
    format!("{base}{dims}")
}

/// Build the row and count queries for a read.
pub fn build_read(
    binding: &EndpointBinding,
    request: &ReadRequest,
) -> Result<ReadTemplates, McpError> {
    let invalid = |reason: String| McpError::InvalidArgument {
        endpoint: binding.id.clone(),
        reason,
    };

    let offset = request.offset.unwrap_or(0);
    if offset < 0 {
        return Err(invalid("offset must not be negative".into()));
    }
    if let Some(limit) = request.limit
        && limit < 0
    {
        return Err(invalid("limit must not be negative".into()));
    }
    let limit = binding
        .pagination
        .effective_limit(request.limit.map(|l| u32::try_from(l).unwrap_or(u32::MAX)));

    let exposed = binding.column_types();
    let caller = match request.filter.as_deref() {
        Some(text) => Filter::parse_str(text, resolver(&exposed))
            .map_err(|e| filter_error(binding, e))?,
        None => Filter::default(),
    };
    let filter = match &binding.default_filter {
        Some(default) => default.and(&caller),
        None => caller,
    };

    let order = match request.order_by.as_deref() {
        Some(text) => parse_order_by(text, |c| binding.column(c).is_some())
            .map_err(|e| filter_error(binding, e))?,
        None => Vec::new(),
    };

    let mut params = Params::default();
    let projection = binding
        .columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let mut inner = format!("SELECT {projection} FROM {}", binding.object.quoted());
    push_where(&mut inner, &filter, &mut params).map_err(invalid)?;
    if !order.is_empty() {
        let terms = order
            .iter()
            .map(|t| {
                let dir = match t.direction {
                    Direction::Asc => "ASC",
                    Direction::Desc => "DESC",
                };
                format!("{} {dir}", quote_ident(&t.column))
            })
            .collect::<Vec<_>>()
            .join(", ");
        inner.push_str(&format!(" ORDER BY {terms}"));
    }
    let limit_ph = params.push(BoundValue::Int(i64::from(limit)), "bigint");
    let offset_ph = params.push(BoundValue::Int(offset), "bigint");
    inner.push_str(&format!(" LIMIT {limit_ph} OFFSET {offset_ph}"));

    let rows = QueryTemplate {
        sql: format!("SELECT to_jsonb(r) AS row FROM ({inner}) AS r"),
        params: params.values,
    };
    let count = build_count(binding, &filter)?;

    Ok(ReadTemplates {
        rows,
        count,
        limit,
        offset,
    })
}

/// Build `SELECT count(*)` over the object under `filter`.
///
/// `filter` is expected to already include the binding's default filter.
pub fn build_count(binding: &EndpointBinding, filter: &Filter) -> Result<QueryTemplate, McpError> {
    let mut params = Params::default();
    let mut sql = format!("SELECT count(*) AS total FROM {}", binding.object.quoted());
    push_where(&mut sql, filter, &mut params).map_err(|reason| McpError::InvalidArgument {
        endpoint: binding.id.clone(),
        reason,
    })?;
    Ok(QueryTemplate {
        sql,
        params: params.values,
    })
}

/// Build the call of a routine from named arguments.
pub fn build_call(
    binding: &EndpointBinding,
    args: &Map<String, Value>,
) -> Result<CallTemplate, McpError> {
    for name in args.keys() {
        if name != CONFIRM_ARG && binding.parameter(name).is_none() {
            return Err(McpError::UnknownParameter {
                endpoint: binding.id.clone(),
                parameter: name.clone(),
            });
        }
    }

    let mut params = Params::default();
    let mut rendered = Vec::new();
    let mut positional = true;

    for param in &binding.parameters {
        let value = match args.get(&param.name) {
            Some(value) => value,
            None if param.has_default => {
                positional = false;
                continue;
            }
            None if param.optional => &Value::Null,
            None => {
                return Err(McpError::MissingArgument {
                    endpoint: binding.id.clone(),
                    parameter: param.name.clone(),
                });
            }
        };

        let bound = bound_value(&param.native_type, value).map_err(|reason| {
            McpError::InvalidArgument {
                endpoint: binding.id.clone(),
                reason: format!("{}: {reason}", param.name),
            }
        })?;
        let placeholder = params.push(bound, &param.native_type);

        let mut arg = if positional {
            placeholder
        } else if param.named {
            format!("{} => {placeholder}", quote_ident(&param.name))
        } else {
            return Err(McpError::InvalidArgument {
                endpoint: binding.id.clone(),
                reason: format!(
                    "{} has no name and cannot follow an omitted argument",
                    param.name
                ),
            });
        };
        if param.mode == ParamMode::Variadic {
            arg = format!("VARIADIC {arg}");
        }
        rendered.push(arg);
    }

    let invocation = format!("{}({})", binding.object.quoted(), rendered.join(", "));
    let (sql, shape) = match binding.returns.as_ref().unwrap_or(&RoutineReturn::Void) {
        RoutineReturn::Set => (
            format!("SELECT to_jsonb(r) AS result FROM {invocation} AS r"),
            CallShape::Rows,
        ),
        RoutineReturn::Row => (
            format!("SELECT to_jsonb(r) AS result FROM {invocation} AS r"),
            CallShape::Row,
        ),
        RoutineReturn::Scalar(_) => (
            format!("SELECT to_jsonb({invocation}) AS result"),
            CallShape::Value,
        ),
        RoutineReturn::Void => (format!("SELECT {invocation}"), CallShape::Void),
    };

    Ok(CallTemplate {
        query: QueryTemplate {
            sql,
            params: params.values,
        },
        shape,
    })
}

fn filter_error(binding: &EndpointBinding, err: FilterError) -> McpError {
    match err {
        FilterError::UnknownColumn(column) => McpError::InvalidColumn {
            endpoint: binding.id.clone(),
            column,
        },
        other => McpError::InvalidArgument {
            endpoint: binding.id.clone(),
            reason: other.to_string(),
        },
    }
}

fn push_where(sql: &mut String, filter: &Filter, params: &mut Params) -> Result<(), String> {
    if filter.is_empty() {
        return Ok(());
    }
    let clauses = filter
        .conditions()
        .iter()
        .map(|c| condition_sql(c, params))
        .collect::<Result<Vec<_>, _>>()?;
    sql.push_str(" WHERE ");
    sql.push_str(&clauses.join(" AND "));
    Ok(())
}

fn condition_sql(cond: &Condition, params: &mut Params) -> Result<String, String> {
    let column = quote_ident(&cond.column);
    let wrap = |e: String| format!("{}: {e}", cond.column);
    Ok(match cond.op {
        FilterOp::IsNull => {
            if cond.value.as_bool().unwrap_or(true) {
                format!("{column} IS NULL")
            } else {
                format!("{column} IS NOT NULL")
            }
        }
        FilterOp::Like | FilterOp::ILike => {
            let pattern = bound_value("text", &cond.value).map_err(wrap)?;
            let ph = params.push(pattern, "text");
            format!("{column}::text {} {ph}", cond.op.sql())
        }
        FilterOp::In => {
            let items = cond.value.as_array().map(Vec::as_slice).unwrap_or_default();
            if items.is_empty() {
                return Ok("FALSE".into());
            }
            let placeholders = items
                .iter()
                .map(|v| {
                    bound_value(&cond.native_type, v)
                        .map(|b| params.push(b, &cond.native_type))
                        .map_err(wrap)
                })
                .collect::<Result<Vec<_>, _>>()?;
            format!("{column} IN ({})", placeholders.join(", "))
        }
        op => {
            let value = bound_value(&cond.native_type, &cond.value).map_err(wrap)?;
            let ph = params.push(value, &cond.native_type);
            format!("{column} {} {ph}", op.sql())
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TypeFamily {
    Bool,
    Int,
    Float,
    Json,
    Array,
    Other,
}

fn family(native: &str) -> TypeFamily {
    let lower = native.trim().to_ascii_lowercase();
    if lower.ends_with("[]") {
        return TypeFamily::Array;
    }
    let base = lower.split('(').next().unwrap_or("").trim();
    match base {
        "boolean" | "bool" => TypeFamily::Bool,
        "smallint" | "integer" | "bigint" | "int" | "int2" | "int4" | "int8" => TypeFamily::Int,
        "real" | "double precision" | "float4" | "float8" => TypeFamily::Float,
        "json" | "jsonb" => TypeFamily::Json,
        _ => TypeFamily::Other,
    }
}

/// Convert a JSON argument into a value bound for a placeholder cast to `native`.
pub(crate) fn bound_value(native: &str, value: &Value) -> Result<BoundValue, String> {
    let family = family(native);
    Ok(match (family, value) {
        (_, Value::Null) => BoundValue::Null,
        (TypeFamily::Json, v) => BoundValue::Json(v.clone()),
        (TypeFamily::Array, Value::Array(items)) => BoundValue::Text(array_literal(items)),
        (_, Value::Array(_)) => return Err(format!("an array cannot be passed as {native}")),
        (_, Value::Object(_)) => return Err(format!("an object cannot be passed as {native}")),
        (TypeFamily::Bool, Value::Bool(b)) => BoundValue::Bool(*b),
        (TypeFamily::Int, Value::Number(n)) if n.is_i64() => match n.as_i64() {
            Some(i) => BoundValue::Int(i),
            None => BoundValue::Text(n.to_string()),
        },
        (TypeFamily::Float, Value::Number(n)) => match n.as_f64() {
            Some(f) => BoundValue::Float(f),
            None => BoundValue::Text(n.to_string()),
        },
        (_, Value::Number(n)) => BoundValue::Text(n.to_string()),
        (_, Value::Bool(b)) => BoundValue::Text(b.to_string()),
        (_, Value::String(s)) => BoundValue::Text(s.clone()),
    })
}

/// Render a JSON array as a Postgres array literal, e.g. `{1,"a b",NULL}`.
fn array_literal(items: &[Value]) -> String {
    let elements: Vec<String> = items
        .iter()
        .map(|item| match item {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(inner) => array_literal(inner),
            Value::String(s) => quote_element(s),
            Value::Object(_) => quote_element(&item.to_string()),
        })
        .collect();
    format!("{{{}}}", elements.join(","))
}

fn quote_element(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
