//! Query execution on the `PostgreSQL` pool.
//!
//! The gateway binds [`Query`] parameters and runs them, translating every
//! failure into [`StorageError::Query`] carrying the offending SQL so the
//! scheduler's task log shows exactly what failed. A thin transaction scope
//! covers the flush path; inserts inside one flush are awaited sequentially,
//! which preserves submission order for `RETURNING id` adoption.

use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, Row, Transaction};
use tracing::error;

use super::query::{Query, SqlParam};

/// Storage-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("connect to database failed: {0}")]
    Connect(#[source] sqlx::Error),
    #[error("query failed: {sql}: {source}")]
    Query {
        sql: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("row decode failed: {column}: {source}")]
    Decode {
        column: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl StorageError {
    fn query(query: &Query, source: sqlx::Error) -> Self {
        error!(sql = %query.sql, error = %source, "query failed");
        Self::Query {
            sql: query.sql.clone(),
            source,
        }
    }
}

fn bind<'q>(
    query: &'q Query,
) -> sqlx::query::Query<'q, Postgres, sqlx::postgres::PgArguments> {
    let mut bound = sqlx::query(&query.sql);
    for param in &query.params {
        bound = match param {
            SqlParam::I64(v) => bound.bind(*v),
            SqlParam::I32(v) => bound.bind(*v),
            SqlParam::F64(v) => bound.bind(*v),
            SqlParam::Bool(v) => bound.bind(*v),
            SqlParam::Str(v) => bound.bind(v.as_str()),
            SqlParam::Null => bound.bind(Option::<i64>::None),
        };
    }
    bound
}

/// Connection pool plus execution helpers.
#[derive(Debug, Clone)]
pub struct Gateway {
    pool: PgPool,
}

impl Gateway {
    /// Connects to the store.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connect`] when the pool cannot be
    /// established.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(StorageError::Connect)?;
        Ok(Self { pool })
    }

    /// Wraps an existing pool (tests, shared pools).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs a select, returning all rows.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] with the offending SQL on failure.
    pub async fn fetch_all(&self, query: &Query) -> Result<Vec<PgRow>, StorageError> {
        bind(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))
    }

    /// Runs a select expected to match at most one row.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] with the offending SQL on failure.
    pub async fn fetch_optional(&self, query: &Query) -> Result<Option<PgRow>, StorageError> {
        bind(query)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))
    }

    /// Runs an insert/update/delete, returning the affected-row count.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] with the offending SQL on failure.
    pub async fn execute(&self, query: &Query) -> Result<u64, StorageError> {
        bind(query)
            .execute(&self.pool)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| StorageError::query(query, e))
    }

    /// Runs an `INSERT … RETURNING id` and returns the adopted key.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on execution failure and
    /// [`StorageError::Decode`] when the returned row has no `id`.
    pub async fn insert_returning_id(&self, query: &Query) -> Result<i64, StorageError> {
        let row = bind(query)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StorageError::query(query, e))?;
        row.try_get::<i64, _>("id")
            .map_err(|source| StorageError::Decode { column: "id", source })
    }

    /// Opens a transaction scope.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Connect`] when no connection is available.
    pub async fn begin(&self) -> Result<Transaction<'static, Postgres>, StorageError> {
        self.pool.begin().await.map_err(StorageError::Connect)
    }

    /// Runs a statement inside a transaction scope.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] with the offending SQL on failure.
    pub async fn execute_in(
        tx: &mut Transaction<'static, Postgres>,
        query: &Query,
    ) -> Result<u64, StorageError> {
        bind(query)
            .execute(&mut **tx)
            .await
            .map(|done| done.rows_affected())
            .map_err(|e| StorageError::query(query, e))
    }

    /// Runs an `INSERT … RETURNING id` inside a transaction scope.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Query`] on execution failure and
    /// [`StorageError::Decode`] when the returned row has no `id`.
    pub async fn insert_returning_id_in(
        tx: &mut Transaction<'static, Postgres>,
        query: &Query,
    ) -> Result<i64, StorageError> {
        let row = bind(query)
            .fetch_one(&mut **tx)
            .await
            .map_err(|e| StorageError::query(query, e))?;
        row.try_get::<i64, _>("id")
            .map_err(|source| StorageError::Decode { column: "id", source })
    }
}
