//! Core types for pgmcp.
//!
//! This crate holds the pieces that do not talk to a database:
//! - [`config`]: the YAML configuration model and loader
//! - [`types`]: mapping of native Postgres type names to JSON Schema fragments
//! - [`pattern`]: glob matching over `schema.object` names
//! - [`ident`]: qualified names and identifier quoting

pub mod config;
pub mod ident;
pub mod pattern;
pub mod types;

pub use config::{
    BridgeConfig, CatalogConfig, ConfigError, DatabaseConfig, ExposeConfig, IdlePolicy,
    NotificationRule, NotificationSettings, PaginationConfig, ParamOverride, PayloadFormat,
    PoolConfig, ResourceRule, RuleSelector, ServerConfig, SslMode, ToolRule,
};
pub use ident::{QualifiedName, quote_ident};
pub use pattern::{Pattern, PatternError, Selector, match_names};
pub use types::{JsonKind, SchemaType, TypeMapper};
