//! Running query templates against the pool.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, PgPool};
use thiserror::Error;

use crate::query::{BoundValue, CallShape, CallTemplate, QueryTemplate};

/// Failure while executing a template. Never carries SQL text or values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("connection pool exhausted")]
    PoolExhausted,

    #[error("query failed")]
    Query { sqlstate: Option<String> },
}

impl From<sqlx::Error> for ExecError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => ExecError::PoolExhausted,
            sqlx::Error::Database(db) => ExecError::Query {
                sqlstate: db.code().map(|c| c.into_owned()),
            },
            _ => ExecError::Query { sqlstate: None },
        }
    }
}

/// Executes templates. Each method is one logical operation on one connection.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Fetch one page of rows (one JSON object per row) and the total count.
    async fn fetch_page(
        &self,
        rows: &QueryTemplate,
        count: &QueryTemplate,
    ) -> Result<(Vec<Value>, i64), ExecError>;

    /// Invoke a routine and fold its result according to the template's shape.
    async fn call(&self, call: &CallTemplate) -> Result<Value, ExecError>;

    /// Release underlying resources.
    async fn close(&self) {}
}

/// Executor backed by a `sqlx` Postgres pool.
#[derive(Clone)]
pub struct PgExecutor {
    pool: PgPool,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn args_add<T>(args: &mut PgArguments, v: T) -> Result<(), ExecError>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(|e| {
        tracing::warn!(error = %e, "failed to encode bound value");
        ExecError::Query { sqlstate: None }
    })
}

fn arguments(params: &[BoundValue]) -> Result<PgArguments, ExecError> {
    let mut args = PgArguments::default();
    for value in params {
        match value {
            BoundValue::Null => args_add(&mut args, Option::<String>::None)?,
            BoundValue::Bool(b) => args_add(&mut args, *b)?,
            BoundValue::Int(i) => args_add(&mut args, *i)?,
            BoundValue::Float(f) => args_add(&mut args, *f)?,
            BoundValue::Text(s) => args_add(&mut args, s.clone())?,
            BoundValue::Json(v) => args_add(&mut args, sqlx::types::Json(v.clone()))?,
        }
    }
    Ok(args)
}

#[async_trait]
impl QueryExecutor for PgExecutor {
    async fn fetch_page(
        &self,
        rows: &QueryTemplate,
        count: &QueryTemplate,
    ) -> Result<(Vec<Value>, i64), ExecError> {
        let row_args = arguments(&rows.params)?;
        let count_args = arguments(&count.params)?;

        // dropping this future returns the connection to the pool
        let mut conn = self.pool.acquire().await?;
        let data: Vec<Option<Value>> = sqlx::query_scalar_with(&rows.sql, row_args)
            .fetch_all(&mut *conn)
            .await?;
        let total: i64 = sqlx::query_scalar_with(&count.sql, count_args)
            .fetch_one(&mut *conn)
            .await?;

        Ok((
            data.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
            total,
        ))
    }

    async fn call(&self, call: &CallTemplate) -> Result<Value, ExecError> {
        let args = arguments(&call.query.params)?;
        let mut conn = self.pool.acquire().await?;

        match call.shape {
            CallShape::Void => {
                sqlx::query_with(&call.query.sql, args)
                    .execute(&mut *conn)
                    .await?;
                Ok(Value::Null)
            }
            CallShape::Rows => {
                let rows: Vec<Option<Value>> = sqlx::query_scalar_with(&call.query.sql, args)
                    .fetch_all(&mut *conn)
                    .await?;
                Ok(Value::Array(
                    rows.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
                ))
            }
            CallShape::Row | CallShape::Value => {
                let row: Option<Option<Value>> = sqlx::query_scalar_with(&call.query.sql, args)
                    .fetch_optional(&mut *conn)
                    .await?;
                Ok(row.flatten().unwrap_or(Value::Null))
            }
        }
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
