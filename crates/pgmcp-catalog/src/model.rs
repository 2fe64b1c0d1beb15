//! Immutable snapshots of catalog objects.

use pgmcp_core::QualifiedName;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a catalog object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Table,
    View,
    Routine,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Table => "table",
            ObjectKind::View => "view",
            ObjectKind::Routine => "routine",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One column of a table or view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescriptor {
    pub name: String,
    /// Native type as rendered by `format_type`, e.g. `character varying(64)` or `integer[]`.
    pub native_type: String,
    pub nullable: bool,
    pub ordinal: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Argument mode of a routine parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ParamMode {
    In,
    Out,
    InOut,
    Variadic,
    Table,
}

impl ParamMode {
    /// Decode a `pg_proc.proargmodes` letter.
    pub fn from_code(code: &str) -> Self {
        match code {
            "o" => ParamMode::Out,
            "b" => ParamMode::InOut,
            "v" => ParamMode::Variadic,
            "t" => ParamMode::Table,
            _ => ParamMode::In,
        }
    }

    /// Supplied by the caller.
    pub fn is_input(&self) -> bool {
        matches!(self, ParamMode::In | ParamMode::InOut | ParamMode::Variadic)
    }

    /// Part of the result row.
    pub fn is_output(&self) -> bool {
        matches!(self, ParamMode::Out | ParamMode::InOut | ParamMode::Table)
    }
}

/// One routine parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Declared name, or `param_<position>` when unnamed.
    pub name: String,
    /// True when the routine declared a name for this parameter.
    pub named: bool,
    pub native_type: String,
    pub mode: ParamMode,
    pub has_default: bool,
    /// 1-based position among all declared arguments.
    pub ordinal: i32,
}

/// Shape of a routine's result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "type", rename_all = "lowercase")]
pub enum RoutineReturn {
    Void,
    /// A single value of the given native type.
    Scalar(String),
    /// A single composite row (OUT parameters, composite or `record` result).
    Row,
    /// `SETOF` or `RETURNS TABLE`.
    Set,
}

/// A table, view or routine as found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaObject {
    pub name: QualifiedName,
    pub kind: ObjectKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<ParameterDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returns: Option<RoutineReturn>,
    /// Result type as rendered by `pg_get_function_result`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchemaObject {
    pub fn column(&self, name: &str) -> Option<&ColumnDescriptor> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterDescriptor> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn input_parameters(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters.iter().filter(|p| p.mode.is_input())
    }

    pub fn output_parameters(&self) -> impl Iterator<Item = &ParameterDescriptor> {
        self.parameters.iter().filter(|p| p.mode.is_output())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_modes() {
        assert_eq!(ParamMode::from_code("i"), ParamMode::In);
        assert_eq!(ParamMode::from_code("b"), ParamMode::InOut);
        assert!(ParamMode::InOut.is_input() && ParamMode::InOut.is_output());
        assert!(!ParamMode::Table.is_input());
        assert!(ParamMode::Variadic.is_input());
    }

    #[test]
    fn test_routine_return_serialization() {
        let v = serde_json::to_value(RoutineReturn::Scalar("integer".into())).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "scalar", "type": "integer"}));
        let v = serde_json::to_value(RoutineReturn::Set).unwrap();
        assert_eq!(v, serde_json::json!({"kind": "set"}));
    }
}
