//! MySQL connections over a `sqlx` pool.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::{Column, Row as _};
use tracing::warn;

use crate::core::traits::{column_index, DbConnection};
use crate::core::value::SqlValue;
use crate::error::{Result, StoreError};

type MySqlQuery<'q> = Query<'q, MySql, MySqlArguments>;

/// Build a lazily-connecting MySQL pool.
///
/// Recognised properties: `ssl_mode` (`disabled`, `preferred`, `required`),
/// `charset`.
pub fn build_pool(
    url: &str,
    user: Option<&str>,
    password: Option<&str>,
    properties: &BTreeMap<String, String>,
    max_connections: u32,
    acquire_timeout: Duration,
) -> Result<MySqlPool> {
    let mut options = MySqlConnectOptions::from_str(url)
        .map_err(|e| StoreError::Config(format!("invalid MySQL url: {}", e)))?;
    if let Some(user) = user {
        options = options.username(user);
    }
    if let Some(password) = password {
        options = options.password(password);
    }

    for (key, value) in properties {
        match key.as_str() {
            "ssl_mode" => {
                let mode = match value.to_lowercase().as_str() {
                    "disable" | "disabled" => MySqlSslMode::Disabled,
                    "require" | "required" => MySqlSslMode::Required,
                    _ => MySqlSslMode::Preferred,
                };
                options = options.ssl_mode(mode);
            }
            "charset" => options = options.charset(value),
            other => warn!("Ignoring unknown MySQL property '{}'", other),
        }
    }

    Ok(MySqlPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(acquire_timeout)
        .connect_lazy_with(options))
}

/// One pooled MySQL connection.
pub struct MysqlConnection {
    conn: PoolConnection<MySql>,
    in_transaction: bool,
}

impl MysqlConnection {
    pub async fn acquire(pool: &MySqlPool) -> Result<Self> {
        let conn = pool
            .acquire()
            .await
            .map_err(|e| StoreError::connectivity(e.to_string(), "acquiring MySQL connection"))?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    /// Text-protocol execution; `CREATE PROCEDURE` is not preparable.
    async fn raw(&mut self, sql: &str) -> Result<()> {
        let conn: &mut sqlx::MySqlConnection = &mut *self.conn;
        sqlx::Executor::execute(conn, sqlx::raw_sql(sql)).await?;
        Ok(())
    }
}

fn bind_value<'q>(query: MySqlQuery<'q>, value: &SqlValue<'_>) -> MySqlQuery<'q> {
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

fn build_query<'q>(sql: &'q str, params: &[SqlValue<'_>]) -> MySqlQuery<'q> {
    params
        .iter()
        .fold(sqlx::query(sql), |query, value| bind_value(query, value))
}

#[async_trait]
impl DbConnection for MysqlConnection {
    fn dialect_name(&self) -> &'static str {
        "mysql"
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
        self.raw("START TRANSACTION").await?;
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
