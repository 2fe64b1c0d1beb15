//! Configuration types for pgmcp.
//!
//! A single YAML file describes the database connection, server metadata, which
//! catalog objects and channels to expose, type overrides and pagination limits.
//!
//! ```yaml
//! database:
//!   database_url_env: DATABASE_URL
//! expose:
//!   resources:
//!     - pattern: "public.*"
//!       exclude: ["tmp_*"]
//!   tools:
//!     - function: api.refresh_stats
//!       dangerous: true
//!   notifications:
//!     - channel: orders
//!       format: json
//! ```

pub mod database;
pub mod expose;

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::types::SchemaType;

pub use database::{DatabaseConfig, PoolConfig, SslMode};
pub use expose::{
    ExposeConfig, NotificationRule, ParamOverride, PayloadFormat, ResourceRule, RuleSelector,
    ToolRule,
};

/// Complete pgmcp configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,

    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Native type name to schema fragment, consulted before the built-in table.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub type_overrides: HashMap<String, SchemaType>,

    #[serde(default)]
    pub expose: ExposeConfig,

    #[serde(default)]
    pub notifications: NotificationSettings,
}

/// Metadata handed to the transport when endpoints are registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,

    #[serde(default = "default_server_description")]
    pub description: String,

    #[serde(default = "default_server_version")]
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            description: default_server_description(),
            version: default_server_version(),
        }
    }
}

/// Catalog cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Freshness window for cached catalog entries.
    #[serde(default = "default_ttl_seconds")]
    pub ttl_seconds: u64,

    /// Schemas never listed or matched.
    #[serde(default = "default_exclude_schemas")]
    pub exclude_schemas: Vec<String>,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_ttl_seconds(),
            exclude_schemas: default_exclude_schemas(),
        }
    }
}

/// Global page size defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationConfig {
    #[serde(default = "default_limit")]
    pub default_limit: u32,

    /// Hard ceiling on rows returned by one read.
    #[serde(default = "default_max_limit")]
    pub max_limit: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_limit: default_limit(),
            max_limit: default_max_limit(),
        }
    }
}

/// What happens to a channel listener when its last subscriber leaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdlePolicy {
    /// Release the listening connection.
    #[default]
    Close,
    /// Keep listening; events with no subscriber are discarded.
    KeepWarm,
}

/// Notification pipeline tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Per-subscriber queue size; the oldest event is dropped when full.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default)]
    pub on_idle: IdlePolicy,

    #[serde(default = "default_reconnect_initial_ms")]
    pub reconnect_initial_ms: u64,

    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            on_idle: IdlePolicy::default(),
            reconnect_initial_ms: default_reconnect_initial_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
        }
    }
}

fn default_server_name() -> String {
    "pgmcp".to_string()
}

fn default_server_description() -> String {
    "PostgreSQL objects exposed over MCP".to_string()
}

fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_ttl_seconds() -> u64 {
    300
}

fn default_exclude_schemas() -> Vec<String> {
    vec![
        "pg_catalog".to_string(),
        "information_schema".to_string(),
        "pg_toast".to_string(),
    ]
}

fn default_limit() -> u32 {
    100
}

fn default_max_limit() -> u32 {
    1000
}

fn default_queue_capacity() -> usize {
    256
}

fn default_reconnect_initial_ms() -> u64 {
    100
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BridgeConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pagination;
        if p.default_limit == 0 || p.max_limit == 0 {
            return Err(ConfigError::Config(
                "pagination limits must be greater than zero".into(),
            ));
        }
        if p.default_limit > p.max_limit {
            return Err(ConfigError::Config(format!(
                "pagination.default_limit ({}) exceeds pagination.max_limit ({})",
                p.default_limit, p.max_limit
            )));
        }

        for (index, rule) in self.expose.resources.iter().enumerate() {
            rule.selector()
                .map_err(|e| ConfigError::Config(format!("expose.resources[{index}]: {e}")))?;
            let ceiling = rule.max_limit.unwrap_or(p.max_limit);
            if rule.limit == Some(0) || rule.max_limit == Some(0) {
                return Err(ConfigError::Config(format!(
                    "expose.resources[{index}]: limits must be greater than zero"
                )));
            }
            if ceiling > p.max_limit {
                return Err(ConfigError::Config(format!(
                    "expose.resources[{index}]: max_limit {ceiling} exceeds global max_limit {}",
                    p.max_limit
                )));
            }
            if let Some(limit) = rule.limit
                && limit > ceiling
            {
                return Err(ConfigError::Config(format!(
                    "expose.resources[{index}]: limit {limit} exceeds max_limit {ceiling}"
                )));
            }
        }

        for (index, rule) in self.expose.tools.iter().enumerate() {
            rule.selector()
                .map_err(|e| ConfigError::Config(format!("expose.tools[{index}]: {e}")))?;
        }

        let mut channels = HashSet::new();
        for (index, rule) in self.expose.notifications.iter().enumerate() {
            if rule.channel.trim().is_empty() {
                return Err(ConfigError::Config(format!(
                    "expose.notifications[{index}]: channel must not be empty"
                )));
            }
            if !channels.insert(rule.channel.as_str()) {
                return Err(ConfigError::Config(format!(
                    "expose.notifications[{index}]: duplicate channel '{}'",
                    rule.channel
                )));
            }
        }

        if self.notifications.queue_capacity == 0 {
            return Err(ConfigError::Config(
                "notifications.queue_capacity must be greater than zero".into(),
            ));
        }

        Ok(())
    }

    /// The configured channel rule, if any.
    pub fn channel(&self, name: &str) -> Option<&NotificationRule> {
        self.expose.notifications.iter().find(|n| n.channel == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"
database:
  host: db
  database: shop
  username: reader
server:
  name: shop-bridge
pagination:
  default_limit: 50
  max_limit: 500
type_overrides:
  citext:
    type: string
    format: email
expose:
  resources:
    - pattern: "public.*"
      exclude: ["tmp_*"]
      columns: [id, email]
      filter:
        active: true
      limit: 25
    - view: sales.order_totals
  tools:
    - function: api.purge_sessions
      dangerous: true
      params:
        older_than:
          description: Age cutoff
          optional: true
  notifications:
    - channel: orders
      format: json
notifications:
  queue_capacity: 8
  on_idle: keep_warm
"#;

    #[test]
    fn test_parse_sample() {
        let config = BridgeConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.server.name, "shop-bridge");
        assert_eq!(config.pagination.default_limit, 50);
        assert_eq!(config.expose.resources.len(), 2);
        assert_eq!(config.expose.resources[0].limit, Some(25));
        assert_eq!(
            config.expose.resources[0].filter,
            Some(serde_json::json!({"active": true}))
        );
        assert!(config.expose.tools[0].dangerous);
        assert!(config.expose.tools[0].params["older_than"].optional);
        assert_eq!(config.channel("orders").map(|c| c.format), Some(PayloadFormat::Json));
        assert_eq!(config.notifications.on_idle, IdlePolicy::KeepWarm);
        assert_eq!(config.notifications.queue_capacity, 8);
        assert!(config.type_overrides.contains_key("citext"));
    }

    #[test]
    fn test_defaults() {
        let config = BridgeConfig::from_yaml("{}").unwrap();
        assert_eq!(config.pagination.default_limit, 100);
        assert_eq!(config.pagination.max_limit, 1000);
        assert_eq!(config.catalog.ttl_seconds, 300);
        assert_eq!(config.notifications.on_idle, IdlePolicy::Close);
        assert!(config.catalog.exclude_schemas.iter().any(|s| s == "pg_catalog"));
    }

    #[test]
    fn test_rule_limit_above_ceiling_rejected() {
        let yaml = r#"
pagination:
  max_limit: 100
expose:
  resources:
    - table: users
      limit: 500
"#;
        let err = BridgeConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("exceeds"), "{err}");
    }

    #[test]
    fn test_ambiguous_rule_rejected() {
        let yaml = r#"
expose:
  resources:
    - pattern: "*"
      table: users
"#;
        assert!(matches!(
            BridgeConfig::from_yaml(yaml),
            Err(ConfigError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_channel_rejected() {
        let yaml = r#"
expose:
  notifications:
    - channel: a
    - channel: a
"#;
        assert!(BridgeConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        let config = BridgeConfig::from_file(file.path()).unwrap();
        assert_eq!(config.database.database, "shop");
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            BridgeConfig::from_file("/nonexistent/pgmcp.yaml"),
            Err(ConfigError::Io(_))
        ));
    }
}
