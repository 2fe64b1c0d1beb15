//! Error types for the MCP crate.

use pgmcp_catalog::CatalogError;
use serde::Serialize;
use thiserror::Error;

/// Errors raised while binding configuration rules to catalog objects.
///
/// A rule that fails produces no bindings; other rules are still processed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BindError {
    /// The rule itself is malformed (bad selector or pattern).
    #[error("invalid rule: {0}")]
    Rule(String),

    /// An allow-listed column does not exist on a matched object.
    #[error("column {column:?} does not exist on {object}")]
    UnknownColumn { object: String, column: String },

    /// A parameter named in the rule does not exist on a matched routine.
    #[error("parameter {parameter:?} does not exist on {object}")]
    UnknownParameter { object: String, parameter: String },

    /// The rule's default filter does not parse.
    #[error("default filter for {object} is invalid: {reason}")]
    InvalidFilter { object: String, reason: String },

    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Errors returned to callers of read, call and subscribe.
///
/// Messages never contain query text or bound values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum McpError {
    /// No endpoint or channel with this identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// Filter or sort referenced a column outside the endpoint's column set.
    #[error("invalid column {column:?} for {endpoint}")]
    InvalidColumn { endpoint: String, column: String },

    /// An argument was supplied that the routine does not declare.
    #[error("unknown parameter {parameter:?} for {endpoint}")]
    UnknownParameter { endpoint: String, parameter: String },

    /// A required argument was not supplied.
    #[error("missing required argument {parameter:?} for {endpoint}")]
    MissingArgument { endpoint: String, parameter: String },

    /// An argument had the wrong shape (negative limit, malformed filter, ...).
    #[error("invalid argument for {endpoint}: {reason}")]
    InvalidArgument { endpoint: String, reason: String },

    /// A dangerous endpoint was invoked without `"_confirm": true`.
    #[error("{endpoint} is marked dangerous and requires \"_confirm\": true")]
    ConfirmationRequired { endpoint: String },

    /// The catalog could not be read. Retryable.
    #[error("catalog unavailable")]
    CatalogUnavailable,

    /// No pooled connection became free in time. Retryable.
    #[error("connection pool exhausted")]
    PoolExhausted,

    /// The listening connection for a channel could not be opened. Retryable.
    #[error("channel {0} unavailable")]
    ChannelUnavailable(String),

    /// The database rejected the query.
    #[error("query failed for {endpoint}")]
    QueryFailed {
        endpoint: String,
        sqlstate: Option<String>,
    },
}

/// Structured failure returned to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sqlstate: Option<String>,
}

impl McpError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            McpError::NotFound(_) => "not_found",
            McpError::InvalidColumn { .. } => "invalid_column",
            McpError::UnknownParameter { .. } => "unknown_parameter",
            McpError::MissingArgument { .. } => "missing_argument",
            McpError::InvalidArgument { .. } => "invalid_argument",
            McpError::ConfirmationRequired { .. } => "confirmation_required",
            McpError::CatalogUnavailable => "catalog_unavailable",
            McpError::PoolExhausted => "pool_exhausted",
            McpError::ChannelUnavailable(_) => "channel_unavailable",
            McpError::QueryFailed { .. } => "query_failed",
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            McpError::CatalogUnavailable | McpError::PoolExhausted | McpError::ChannelUnavailable(_)
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code(),
            message: self.to_string(),
            retryable: self.is_retryable(),
            sqlstate: match self {
                McpError::QueryFailed { sqlstate, .. } => sqlstate.clone(),
                _ => None,
            },
        }
    }
}

impl From<CatalogError> for McpError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound(name) => McpError::NotFound(name),
            CatalogError::PoolExhausted => McpError::PoolExhausted,
            CatalogError::Unavailable(_) => McpError::CatalogUnavailable,
        }
    }
}

/// Errors from the notification pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum NotifyError {
    #[error("failed to open listener for {channel}: {reason}")]
    Connect { channel: String, reason: String },

    #[error("listener for {channel} failed: {reason}")]
    Receive { channel: String, reason: String },

    #[error("notification hub is shut down")]
    Closed,
}

impl From<NotifyError> for McpError {
    fn from(err: NotifyError) -> Self {
        match err {
            NotifyError::Connect { channel, .. } | NotifyError::Receive { channel, .. } => {
                McpError::ChannelUnavailable(channel)
            }
            NotifyError::Closed => McpError::ChannelUnavailable("*".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_body() {
        let err = McpError::MissingArgument {
            endpoint: "api_refresh".into(),
            parameter: "since".into(),
        };
        let body = err.to_body();
        assert_eq!(body.code, "missing_argument");
        assert!(!body.retryable);
        assert!(body.message.contains("since"));

        let json = serde_json::to_value(McpError::PoolExhausted.to_body()).unwrap();
        assert_eq!(json["code"], "pool_exhausted");
        assert_eq!(json["retryable"], true);
        assert!(json.get("sqlstate").is_none());
    }

    #[test]
    fn test_query_failure_hides_details() {
        let err = McpError::QueryFailed {
            endpoint: "public_users".into(),
            sqlstate: Some("22P02".into()),
        };
        assert_eq!(err.to_string(), "query failed for public_users");
        assert_eq!(err.to_body().sqlstate.as_deref(), Some("22P02"));
    }

    #[test]
    fn test_catalog_error_mapping() {
        assert_eq!(
            McpError::from(CatalogError::PoolExhausted),
            McpError::PoolExhausted
        );
        assert_eq!(
            McpError::from(CatalogError::Unavailable("boom".into())),
            McpError::CatalogUnavailable
        );
    }
}
