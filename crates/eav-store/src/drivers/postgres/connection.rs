//! PostgreSQL connections over a `deadpool-postgres` pool.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use deadpool_postgres::{Manager, ManagerConfig, Object, Pool, RecyclingMethod};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Config as PgConfig, NoTls};
use tracing::warn;

use crate::core::traits::{column_index, DbConnection};
use crate::core::value::{Row, SqlNullType, SqlValue};
use crate::error::{Result, StoreError};

/// Build a PostgreSQL pool. No connection is opened until first use.
///
/// `url` is anything `tokio_postgres::Config` parses (a `postgres://` URL or
/// a `key=value` string). Recognised properties: `application_name`,
/// `options`, `connect_timeout` (seconds).
pub fn build_pool(
    url: &str,
    user: Option<&str>,
    password: Option<&str>,
    properties: &BTreeMap<String, String>,
    max_connections: usize,
) -> Result<Pool> {
    let mut pg_config = PgConfig::from_str(url)
        .map_err(|e| StoreError::Config(format!("invalid PostgreSQL url: {}", e)))?;
    if let Some(user) = user {
        pg_config.user(user);
    }
    if let Some(password) = password {
        pg_config.password(password);
    }

    for (key, value) in properties {
        match key.as_str() {
            "application_name" => {
                pg_config.application_name(value);
            }
            "options" => {
                pg_config.options(value);
            }
            "connect_timeout" => {
                let secs: u64 = value.parse().map_err(|_| {
                    StoreError::Config(format!("connect_timeout must be seconds, got '{}'", value))
                })?;
                pg_config.connect_timeout(Duration::from_secs(secs));
            }
            other => warn!("Ignoring unknown PostgreSQL property '{}'", other),
        }
    }

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    Pool::builder(mgr)
        .max_size(max_connections)
        .build()
        .map_err(|e| StoreError::Config(format!("Failed to create PostgreSQL pool: {}", e)))
}

/// One pooled PostgreSQL connection.
pub struct PostgresConnection {
    client: Object,
    in_transaction: bool,
}

impl PostgresConnection {
    pub async fn acquire(pool: &Pool) -> Result<Self> {
        let client = pool
            .get()
            .await
            .map_err(|e| StoreError::connectivity(e.to_string(), "acquiring PostgreSQL connection"))?;
        Ok(Self {
            client,
            in_transaction: false,
        })
    }
}

/// Convert SqlValue to a boxed ToSql parameter.
///
/// NULLs keep their type so the server-inferred parameter type accepts them.
fn sql_value_to_param(value: &SqlValue<'_>) -> Box<dyn ToSql + Sync + Send> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(None::<bool>),
            SqlNullType::I32 => Box::new(None::<i32>),
            SqlNullType::I64 => Box::new(None::<i64>),
            SqlNullType::F32 => Box::new(None::<f32>),
            SqlNullType::F64 => Box::new(None::<f64>),
            SqlNullType::String => Box::new(None::<String>),
            SqlNullType::Bytes => Box::new(None::<Vec<u8>>),
            SqlNullType::DateTime => Box::new(None::<NaiveDateTime>),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I32(n) => Box::new(*n),
        SqlValue::I64(n) => Box::new(*n),
        SqlValue::F32(n) => Box::new(*n),
        SqlValue::F64(n) => Box::new(*n),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::DateTime(dt) => Box::new(*dt),
    }
}

fn to_params(values: &[SqlValue<'_>]) -> Vec<Box<dyn ToSql + Sync + Send>> {
    values.iter().map(sql_value_to_param).collect()
}

fn as_refs(params: &[Box<dyn ToSql + Sync + Send>]) -> Vec<&(dyn ToSql + Sync)> {
    params
        .iter()
        .map(|p| p.as_ref() as &(dyn ToSql + Sync))
        .collect()
}

#[async_trait]
impl DbConnection for PostgresConnection {
    fn dialect_name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let params = to_params(params);
        Ok(self.client.execute(sql, &as_refs(&params)).await?)
    }

    async fn execute_batch(&mut self, sql: &str, rows: &[Row<'_>]) -> Result<u64> {
        let stmt = self.client.prepare_cached(sql).await?;
        let mut affected = 0;
        for row in rows {
            let params = to_params(row);
            affected += self.client.execute(&stmt, &as_refs(&params)).await?;
        }
        Ok(affected)
    }

    async fn execute_script(&mut self, sql: &str) -> Result<()> {
        Ok(self.client.batch_execute(sql).await?)
    }

    async fn query_i64(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<Option<i64>> {
        let params = to_params(params);
        let row = self.client.query_opt(sql, &as_refs(&params)).await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<_, i64>(0)?)),
            None => Ok(None),
        }
    }

    async fn query_strings(
        &mut self,
        sql: &str,
        params: &[SqlValue<'_>],
        column: &str,
    ) -> Result<Vec<String>> {
        let params = to_params(params);
        let rows = self.client.query(sql, &as_refs(&params)).await?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let idx = column_index(first.columns().iter().map(|c| c.name()), column)
            .ok_or_else(|| StoreError::Query(format!("column {} not in result", column)))?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            values.push(row.try_get::<_, String>(idx)?);
        }
        Ok(values)
    }

    async fn begin(&mut self) -> Result<()> {
        self.client.batch_execute("BEGIN").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.client.batch_execute("COMMIT").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        Ok(self.client.batch_execute("ROLLBACK").await?)
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
