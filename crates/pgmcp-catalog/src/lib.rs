//! Catalog introspection for pgmcp.
//!
//! [`Catalog`] answers `list_objects`, `describe` and `schemas` from a per-key
//! TTL cache in front of a [`CatalogSource`]. [`PgCatalogSource`] is the live
//! source backed by a `sqlx` pool.

pub mod cache;
pub mod error;
pub mod model;
pub mod postgres;
pub mod source;

pub use cache::{Catalog, Freshness};
pub use error::CatalogError;
pub use model::{
    ColumnDescriptor, ObjectKind, ParamMode, ParameterDescriptor, RoutineReturn, SchemaObject,
};
pub use postgres::PgCatalogSource;
pub use source::CatalogSource;
