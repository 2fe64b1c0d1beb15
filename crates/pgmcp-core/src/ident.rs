//! Qualified names and identifier quoting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `schema.object` name exactly as stored in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QualifiedName {
    pub schema: String,
    pub name: String,
}

impl QualifiedName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Split `schema.name` at the first dot. Returns `None` when there is no schema part.
    pub fn parse(qualified: &str) -> Option<Self> {
        let (schema, name) = qualified.split_once('.')?;
        if schema.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(schema, name))
    }

    /// Quoted form suitable for embedding in SQL: `"schema"."name"`.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Identifier-safe form: `schema_name`.
    pub fn underscored(&self) -> String {
        format!("{}_{}", self.schema, self.name)
    }
}

impl fmt::Display for QualifiedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Quote an identifier with Postgres rules: wrap in double quotes, double any embedded quote.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("users"), "\"users\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_qualified_name_forms() {
        let q = QualifiedName::new("public", "Users");
        assert_eq!(q.to_string(), "public.Users");
        assert_eq!(q.quoted(), "\"public\".\"Users\"");
        assert_eq!(q.underscored(), "public_Users");
    }

    #[test]
    fn test_parse() {
        assert_eq!(
            QualifiedName::parse("sales.orders"),
            Some(QualifiedName::new("sales", "orders"))
        );
        assert_eq!(QualifiedName::parse("orders"), None);
        assert_eq!(QualifiedName::parse(".orders"), None);
    }
}
