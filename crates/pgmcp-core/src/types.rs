//! Native Postgres type names to JSON Schema.
//!
//! Lookup order for [`TypeMapper::to_schema_type`]:
//! 1. the user-supplied override table (exact match on the normalized name)
//! 2. the built-in table, including length-bearing forms such as `varchar(64)`
//! 3. a trailing `[]` is stripped and the element type is wrapped in an array
//! 4. anything else becomes a plain string
//!
//! The mapper never fails and is a pure function of its input and override table.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};

/// JSON Schema primitive kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JsonKind {
    String,
    Integer,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

impl JsonKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JsonKind::String => "string",
            JsonKind::Integer => "integer",
            JsonKind::Number => "number",
            JsonKind::Boolean => "boolean",
            JsonKind::Object => "object",
            JsonKind::Array => "array",
            JsonKind::Null => "null",
        }
    }
}

/// A JSON Schema fragment describing one column, parameter or result.
///
/// Also the shape of entries in the `type_overrides` configuration table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaType {
    #[serde(rename = "type")]
    pub kind: JsonKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<SchemaType>>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, SchemaType>,
}

impl SchemaType {
    pub fn of(kind: JsonKind) -> Self {
        Self {
            kind,
            format: None,
            pattern: None,
            minimum: None,
            maximum: None,
            min_length: None,
            max_length: None,
            content_encoding: None,
            items: None,
            properties: BTreeMap::new(),
        }
    }

    pub fn string() -> Self {
        Self::of(JsonKind::String)
    }

    pub fn integer() -> Self {
        Self::of(JsonKind::Integer)
    }

    pub fn number() -> Self {
        Self::of(JsonKind::Number)
    }

    pub fn boolean() -> Self {
        Self::of(JsonKind::Boolean)
    }

    pub fn object() -> Self {
        Self::of(JsonKind::Object)
    }

    pub fn null() -> Self {
        Self::of(JsonKind::Null)
    }

    pub fn array_of(items: SchemaType) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(JsonKind::Array)
        }
    }

    pub fn with_format(mut self, format: &str) -> Self {
        self.format = Some(format.to_string());
        self
    }

    pub fn with_pattern(mut self, pattern: &str) -> Self {
        self.pattern = Some(pattern.to_string());
        self
    }

    pub fn with_range(mut self, minimum: Option<i64>, maximum: Option<i64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn with_length(mut self, min_length: Option<u32>, max_length: Option<u32>) -> Self {
        self.min_length = min_length;
        self.max_length = max_length;
        self
    }

    pub fn with_property(mut self, name: &str, schema: SchemaType) -> Self {
        self.properties.insert(name.to_string(), schema);
        self
    }

    /// Render as a JSON Schema object.
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), json!(self.kind.as_str()));
        if let Some(format) = &self.format {
            out.insert("format".into(), json!(format));
        }
        if let Some(pattern) = &self.pattern {
            out.insert("pattern".into(), json!(pattern));
        }
        if let Some(min) = self.minimum {
            out.insert("minimum".into(), json!(min));
        }
        if let Some(max) = self.maximum {
            out.insert("maximum".into(), json!(max));
        }
        if let Some(min) = self.min_length {
            out.insert("minLength".into(), json!(min));
        }
        if let Some(max) = self.max_length {
            out.insert("maxLength".into(), json!(max));
        }
        if let Some(enc) = &self.content_encoding {
            out.insert("contentEncoding".into(), json!(enc));
        }
        if let Some(items) = &self.items {
            out.insert("items".into(), items.to_json());
        }
        if !self.properties.is_empty() {
            let props: Map<String, Value> = self
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            out.insert("properties".into(), Value::Object(props));
        }
        Value::Object(out)
    }

    /// Render as a JSON Schema that also admits `null`.
    pub fn to_json_nullable(&self) -> Value {
        json!({ "oneOf": [self.to_json(), { "type": "null" }] })
    }

    pub fn is_array(&self) -> bool {
        self.kind == JsonKind::Array
    }
}

/// Maps native type names to [`SchemaType`] using overrides and a built-in table.
#[derive(Debug, Clone, Default)]
pub struct TypeMapper {
    overrides: HashMap<String, SchemaType>,
}

impl TypeMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapper with a user override table. Keys are normalized like lookups are.
    pub fn with_overrides(overrides: &HashMap<String, SchemaType>) -> Self {
        Self {
            overrides: overrides
                .iter()
                .map(|(k, v)| (normalize(k), v.clone()))
                .collect(),
        }
    }

    pub fn to_schema_type(&self, native: &str) -> SchemaType {
        let name = normalize(native);
        if let Some(schema) = self.overrides.get(&name) {
            return schema.clone();
        }
        if let Some(schema) = builtin(&name) {
            return schema;
        }
        if let Some(element) = name.strip_suffix("[]") {
            return SchemaType::array_of(self.to_schema_type(element));
        }
        SchemaType::string()
    }
}

/// Lower-case, trim and collapse internal whitespace.
fn normalize(native: &str) -> String {
    native
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

const MONEY_PATTERN: &str = r"^-?\$?\d+(\.\d{2})?$";
const MACADDR_PATTERN: &str = r"^([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})$";
const MACADDR8_PATTERN: &str = r"^([0-9A-Fa-f]{2}[:-]){7}([0-9A-Fa-f]{2})$";

fn builtin(name: &str) -> Option<SchemaType> {
    if name.contains('(') {
        return parameterized(name);
    }

    let schema = match name {
        "smallint" | "int2" => SchemaType::integer().with_range(Some(-32768), Some(32767)),
        "integer" | "int" | "int4" | "bigint" | "int8" | "oid" => SchemaType::integer(),
        "smallserial" | "serial2" => SchemaType::integer().with_range(Some(1), Some(32767)),
        "serial" | "serial4" | "bigserial" | "serial8" => {
            SchemaType::integer().with_range(Some(1), None)
        }
        "numeric" | "decimal" | "real" | "float4" | "double precision" | "float8" => {
            SchemaType::number()
        }
        "money" => SchemaType::string().with_pattern(MONEY_PATTERN),

        "text" | "character varying" | "varchar" | "character" | "char" | "bpchar" | "name"
        | "citext" | "xml" | "interval" | "pg_lsn" | "tsquery" | "tsvector" | "line"
        | "lseg" | "box" | "path" | "polygon" | "circle" | "bit" | "bit varying" => {
            SchemaType::string()
        }

        "bytea" => SchemaType {
            content_encoding: Some("base64".to_string()),
            ..SchemaType::string()
        },

        "timestamp"
        | "timestamp without time zone"
        | "timestamp with time zone"
        | "timestamptz" => SchemaType::string().with_format("date-time"),
        "date" => SchemaType::string().with_format("date"),
        "time" | "time without time zone" | "time with time zone" | "timetz" => {
            SchemaType::string().with_format("time")
        }

        "boolean" | "bool" => SchemaType::boolean(),

        "point" => SchemaType::object()
            .with_property("x", SchemaType::number())
            .with_property("y", SchemaType::number()),

        // v4 or v6, with an optional prefix length
        "inet" | "cidr" => SchemaType::string(),
        "macaddr" => SchemaType::string().with_pattern(MACADDR_PATTERN),
        "macaddr8" => SchemaType::string().with_pattern(MACADDR8_PATTERN),

        "uuid" => SchemaType::string().with_format("uuid"),

        "json" | "jsonb" => SchemaType::object(),

        // information_schema reports arrays without an element type
        "array" => SchemaType::array_of(SchemaType::string()),

        "void" => SchemaType::null(),

        _ => return None,
    };
    Some(schema)
}

/// Handles names carrying a modifier: `varchar(64)`, `numeric(10,2)`, `timestamp(3) with time zone`.
fn parameterized(name: &str) -> Option<SchemaType> {
    let open = name.find('(')?;
    let close = open + name[open..].find(')')?;
    let base = name[..open].trim();
    let args = &name[open + 1..close];
    let rest = name[close + 1..].trim();

    // `varchar(10)[]` is an array; leave it for the suffix rule
    if rest.ends_with("[]") {
        return None;
    }

    match base {
        "character varying" | "varchar" => {
            let len = args.trim().parse::<u32>().ok();
            Some(SchemaType::string().with_length(None, len))
        }
        "character" | "char" | "bpchar" => {
            let len = args.trim().parse::<u32>().ok();
            Some(SchemaType::string().with_length(len, len))
        }
        _ => {
            let stripped = if rest.is_empty() {
                base.to_string()
            } else {
                format!("{} {}", base, rest)
            };
            if stripped.contains('(') {
                return None;
            }
            builtin(&stripped)
        }
    }
}
