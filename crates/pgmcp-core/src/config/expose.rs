//! Binding rules: which catalog objects and channels are exposed, and how.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::ConfigError;

/// The `expose` section of the configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExposeConfig {
    #[serde(default)]
    pub resources: Vec<ResourceRule>,

    #[serde(default)]
    pub tools: Vec<ToolRule>,

    #[serde(default)]
    pub notifications: Vec<NotificationRule>,
}

/// How a rule selects catalog objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleSelector {
    /// Glob pattern plus excludes, across tables and views (or routines for tools).
    Pattern { pattern: String, exclude: Vec<String> },
    /// Exact table name, `name` or `schema.name`.
    Table(String),
    /// Exact view name.
    View(String),
    /// Exact function name.
    Function(String),
}

/// A rule exposing tables and views as readable resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,

    /// Glob patterns removed from the match before the include is applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Column allow-list. Every name must exist on each matched object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,

    /// Default filter AND-ed with any caller filter.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Value>,

    /// Default page size when the caller gives none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Per-rule ceiling; never above the global one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_limit: Option<u32>,
}

impl ResourceRule {
    pub fn selector(&self) -> Result<RuleSelector, ConfigError> {
        match (&self.pattern, &self.table, &self.view) {
            (Some(p), None, None) => Ok(RuleSelector::Pattern {
                pattern: p.clone(),
                exclude: self.exclude.clone(),
            }),
            (None, Some(t), None) => Ok(RuleSelector::Table(t.clone())),
            (None, None, Some(v)) => Ok(RuleSelector::View(v.clone())),
            (None, None, None) => Err(ConfigError::Config(
                "resource rule needs one of 'pattern', 'table' or 'view'".into(),
            )),
            _ => Err(ConfigError::Config(
                "resource rule may set only one of 'pattern', 'table' or 'view'".into(),
            )),
        }
    }
}

/// Metadata attached to one routine parameter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Allow the caller to omit a parameter that has no default; NULL is passed instead.
    #[serde(default)]
    pub optional: bool,
}

/// A rule exposing routines as invocable tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Calls must carry an explicit confirmation.
    #[serde(default)]
    pub dangerous: bool,

    /// Per-parameter metadata, keyed by parameter name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, ParamOverride>,
}

impl ToolRule {
    pub fn selector(&self) -> Result<RuleSelector, ConfigError> {
        match (&self.pattern, &self.function) {
            (Some(p), None) => Ok(RuleSelector::Pattern {
                pattern: p.clone(),
                exclude: self.exclude.clone(),
            }),
            (None, Some(f)) => Ok(RuleSelector::Function(f.clone())),
            (None, None) => Err(ConfigError::Config(
                "tool rule needs one of 'pattern' or 'function'".into(),
            )),
            (Some(_), Some(_)) => Err(ConfigError::Config(
                "tool rule may set only one of 'pattern' or 'function'".into(),
            )),
        }
    }
}

/// How a channel's payloads are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// Delivered as received.
    #[default]
    Text,
    /// Parsed as JSON; failures are annotated on the event.
    Json,
}

/// A LISTEN/NOTIFY channel exposed as an event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub channel: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub format: PayloadFormat,
}
