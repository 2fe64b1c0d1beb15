//! The seam between the cache and whatever actually reads the catalog.

use async_trait::async_trait;

use crate::error::CatalogError;
use crate::model::{ObjectKind, SchemaObject};

/// A source of catalog metadata.
///
/// Each call is one logical operation: implementations acquire at most one
/// pooled connection and release it before returning.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    /// Names of the schemas that may hold exposed objects.
    async fn load_schemas(&self) -> Result<Vec<String>, CatalogError>;

    /// All objects of `kind` in `schema`, ordered by name.
    async fn load_objects(
        &self,
        schema: &str,
        kind: ObjectKind,
    ) -> Result<Vec<SchemaObject>, CatalogError>;
}
