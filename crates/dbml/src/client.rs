//! Driver boundary.
//!
//! [`Connection`] is the only thing dbml needs from a database driver: prepare,
//! run with [`Value`] parameters, and fire plain statements for transaction
//! control. SQL reaching a connection already uses `$n` placeholders.
//!
//! `tokio_postgres::Client` implements it out of the box; tests plug in a
//! recording implementation.

use crate::error::{DbmlError, DbmlResult};
use crate::value::{Row, Value};
use std::future::Future;
use tokio_postgres::types::ToSql;

/// A database connection able to prepare and run statements.
pub trait Connection: Send + Sync {
    /// Prepared statement handle. Handles belong to the connection that produced them.
    type Prepared: Clone + Send + Sync;

    /// Prepare a statement on this connection.
    fn prepare(&self, sql: &str) -> impl Future<Output = DbmlResult<Self::Prepared>> + Send;

    /// Run a prepared statement and return all rows.
    fn query(
        &self,
        stmt: &Self::Prepared,
        params: &[Value],
    ) -> impl Future<Output = DbmlResult<Vec<Row>>> + Send;

    /// Run a prepared statement and return the number of affected rows.
    fn execute(
        &self,
        stmt: &Self::Prepared,
        params: &[Value],
    ) -> impl Future<Output = DbmlResult<u64>> + Send;

    /// Run parameterless statements (`BEGIN`, `COMMIT`, `ROLLBACK`).
    fn batch_execute(&self, sql: &str) -> impl Future<Output = DbmlResult<()>> + Send;

    /// Prepare and run in one go.
    fn query_sql(
        &self,
        sql: &str,
        params: &[Value],
    ) -> impl Future<Output = DbmlResult<Vec<Row>>> + Send {
        async move {
            let stmt = self.prepare(sql).await?;
            self.query(&stmt, params).await
        }
    }
}

fn param_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

impl Connection for tokio_postgres::Client {
    type Prepared = tokio_postgres::Statement;

    async fn prepare(&self, sql: &str) -> DbmlResult<Self::Prepared> {
        tokio_postgres::Client::prepare(self, sql)
            .await
            .map_err(DbmlError::from_db_error)
    }

    async fn query(&self, stmt: &Self::Prepared, params: &[Value]) -> DbmlResult<Vec<Row>> {
        let refs = param_refs(params);
        let rows = tokio_postgres::Client::query(self, stmt, &refs)
            .await
            .map_err(DbmlError::from_db_error)?;
        rows.iter().map(Row::from_pg).collect()
    }

    async fn execute(&self, stmt: &Self::Prepared, params: &[Value]) -> DbmlResult<u64> {
        let refs = param_refs(params);
        tokio_postgres::Client::execute(self, stmt, &refs)
            .await
            .map_err(DbmlError::from_db_error)
    }

    async fn batch_execute(&self, sql: &str) -> DbmlResult<()> {
        tokio_postgres::Client::batch_execute(self, sql)
            .await
            .map_err(DbmlError::from_db_error)
    }
}
