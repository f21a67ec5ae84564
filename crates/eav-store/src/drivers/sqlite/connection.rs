//! SQLite connections over a `sqlx` pool.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{Column, Row as _};
use tracing::debug;

use crate::core::traits::{column_index, DbConnection};
use crate::core::value::SqlValue;
use crate::error::{Result, StoreError};

type SqliteQuery<'q> = Query<'q, Sqlite, SqliteArguments<'q>>;

/// Build a lazily-connecting SQLite pool.
///
/// Entries of the property bag are applied as `PRAGMA`s on every new
/// connection (e.g. `foreign_keys = true`, `journal_mode = WAL`).
pub fn build_pool(
    url: &str,
    properties: &BTreeMap<String, String>,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(url)
        .map_err(|e| StoreError::Config(format!("invalid SQLite url '{}': {}", url, e)))?
        .create_if_missing(true);

    for (key, value) in properties {
        debug!("SQLite pragma {} = {}", key, value);
        options = options.pragma(key.clone(), value.clone());
    }

    Ok(SqlitePoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_lazy_with(options))
}

/// One pooled SQLite connection.
pub struct SqliteConnection {
    conn: PoolConnection<Sqlite>,
    in_transaction: bool,
}

impl SqliteConnection {
    pub async fn acquire(pool: &SqlitePool) -> Result<Self> {
        let conn = pool
            .acquire()
            .await
            .map_err(|e| StoreError::connectivity(e.to_string(), "acquiring SQLite connection"))?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    async fn raw(&mut self, sql: &str) -> Result<()> {
        let conn: &mut sqlx::SqliteConnection = &mut *self.conn;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}

fn bind_value<'q>(query: SqliteQuery<'q>, value: &SqlValue<'_>) -> SqliteQuery<'q> {
    match value {
        SqlValue::Null(_) => query.bind(None::<String>),
        SqlValue::Bool(v) => query.bind(*v),
        SqlValue::I32(v) => query.bind(*v),
        SqlValue::I64(v) => query.bind(*v),
        SqlValue::F32(v) => query.bind(*v),
        SqlValue::F64(v) => query.bind(*v),
        SqlValue::Text(v) => query.bind(v.to_string()),
        SqlValue::Bytes(v) => query.bind(v.to_vec()),
        SqlValue::DateTime(v) => query.bind(*v),
    }
}

fn build_query<'q>(sql: &'q str, params: &[SqlValue<'_>]) -> SqliteQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

#[async_trait]
impl DbConnection for SqliteConnection {
    fn dialect_name(&self) -> &'static str {
        "sqlite"
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let result = build_query(sql, params).execute(&mut *self.conn).await?;
        Ok(result.rows_affected())
    }

    async fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.raw(sql).await
    }

    async fn query_i64(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<Option<i64>> {
        let row = build_query(sql, params).fetch_optional(&mut *self.conn).await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<i64, _>(0)?)),
            None => Ok(None),
        }
    }

    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
        column: &str,
    ) -> Result<Vec<String>> {
        let rows = build_query(sql, params).fetch_all(&mut *self.conn).await?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let idx = column_index(first.columns().iter().map(|c| c.name()), column)
            .ok_or_else(|| StoreError::Query(format!("column {} not in result", column)))?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            values.push(row.try_get::<String, _>(idx)?);
        }
        Ok(values)
    }

    async fn begin(&mut self) -> Result<()> {
        self.raw("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.raw("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.raw("ROLLBACK").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
