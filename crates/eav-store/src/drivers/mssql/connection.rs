//! SQL Server connections over a `bb8` pool of `tiberius` clients.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{Pool, PooledConnection};
use chrono::NaiveDateTime;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::warn;

use crate::core::traits::{column_index, DbConnection};
use crate::core::value::{SqlNullType, SqlValue};
use crate::error::{Result, StoreError};

/// Connection manager for bb8 pool with tiberius.
#[derive(Clone)]
pub struct TiberiusConnectionManager {
    config: Config,
}

impl TiberiusConnectionManager {
    /// Build from an ADO.NET connection string plus optional credentials.
    ///
    /// Recognised properties: `trust_server_certificate` (`true`/`false`),
    /// `encrypt` (`true`/`false`), `application_name`.
    pub fn new(
        url: &str,
        user: Option<&str>,
        password: Option<&str>,
        properties: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut config = Config::from_ado_string(url)
            .map_err(|e| StoreError::Config(format!("invalid SQL Server connection string: {}", e)))?;

        if let Some(user) = user {
            config.authentication(AuthMethod::sql_server(user, password.unwrap_or_default()));
        }

        for (key, value) in properties {
            let enabled = matches!(value.to_lowercase().as_str(), "true" | "yes" | "1");
            match key.as_str() {
                "trust_server_certificate" => {
                    if enabled {
                        config.trust_cert();
                    }
                }
                "encrypt" => {
                    if enabled {
                        config.encryption(EncryptionLevel::Required);
                    } else {
                        config.encryption(EncryptionLevel::NotSupported);
                    }
                }
                "application_name" => config.application_name(value),
                other => warn!("Ignoring unknown SQL Server property '{}'", other),
            }
        }

        Ok(Self { config })
    }
}

#[async_trait]
impl bb8::ManageConnection for TiberiusConnectionManager {
    type Connection = Client<Compat<TcpStream>>;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> std::result::Result<Self::Connection, Self::Error> {
        let tcp = TcpStream::connect(self.config.get_addr())
            .await
            .map_err(|e| tiberius::error::Error::Io {
                kind: e.kind(),
                message: e.to_string(),
            })?;
        tcp.set_nodelay(true).ok();
        Client::connect(self.config.clone(), tcp.compat_write()).await
    }

    async fn is_valid(&self, conn: &mut Self::Connection) -> std::result::Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Build a bb8 pool without opening a connection.
pub fn build_pool(
    manager: TiberiusConnectionManager,
    max_connections: u32,
    connection_timeout: Duration,
) -> Pool<TiberiusConnectionManager> {
    Pool::builder()
        .max_size(max_connections)
        .connection_timeout(connection_timeout)
        .test_on_check_out(true)
        .build_unchecked(manager)
}

/// One pooled SQL Server connection.
pub struct MssqlConnection {
    conn: PooledConnection<'static, TiberiusConnectionManager>,
    in_transaction: bool,
}

impl MssqlConnection {
    pub async fn acquire(pool: &Pool<TiberiusConnectionManager>) -> Result<Self> {
        let conn = pool
            .get_owned()
            .await
            .map_err(|e| StoreError::connectivity(e.to_string(), "acquiring SQL Server connection"))?;
        Ok(Self {
            conn,
            in_transaction: false,
        })
    }

    /// Run a statement as a plain SQL batch.
    ///
    /// Transaction control goes through here rather than `execute`: a
    /// BEGIN/COMMIT inside `sp_executesql` trips "Transaction count mismatch"
    /// (error 266).
    async fn batch(&mut self, sql: &str) -> Result<()> {
        self.conn.simple_query(sql).await?.into_results().await?;
        Ok(())
    }
}

/// Convert SqlValue to a boxed ToSql trait object for parameterized queries.
fn sql_value_to_sql_param(value: &SqlValue<'_>) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null(null_type) => match null_type {
            SqlNullType::Bool => Box::new(Option::<bool>::None),
            SqlNullType::I32 => Box::new(Option::<i32>::None),
            SqlNullType::I64 => Box::new(Option::<i64>::None),
            SqlNullType::F32 => Box::new(Option::<f32>::None),
            SqlNullType::F64 => Box::new(Option::<f64>::None),
            SqlNullType::String => Box::new(Option::<String>::None),
            SqlNullType::Bytes => Box::new(Option::<Vec<u8>>::None),
            SqlNullType::DateTime => Box::new(Option::<NaiveDateTime>::None),
        },
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::F32(f) => Box::new(*f),
        SqlValue::F64(f) => Box::new(*f),
        SqlValue::Text(s) => Box::new(s.to_string()),
        SqlValue::Bytes(b) => Box::new(b.to_vec()),
        SqlValue::DateTime(dt) => Box::new(*dt),
    }
}

fn to_params(values: &[SqlValue<'_>]) -> Vec<Box<dyn ToSql>> {
    values.iter().map(sql_value_to_sql_param).collect()
}

#[async_trait]
impl DbConnection for MssqlConnection {
    fn dialect_name(&self) -> &'static str {
        "mssql"
    }

    async fn execute(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<u64> {
        let params = to_params(params);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let result = self.conn.execute(sql, &param_refs).await?;
        Ok(result.total())
    }

    async fn execute_script(&mut self, sql: &str) -> Result<()> {
        self.batch(sql).await
    }

    async fn query_i64(&mut self, sql: &str, params: &[SqlValue<'_>]) -> Result<Option<i64>> {
        let params = to_params(params);
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let row = self.conn.query(sql, &param_refs).await?.into_row().await?;
        match row {
            Some(row) => Ok(row.try_get::<i64, _>(0)?),
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
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = self
            .conn
            .query(sql, &param_refs)
            .await?
            .into_first_result()
            .await?;
        let Some(first) = rows.first() else {
            return Ok(Vec::new());
        };
        let idx = column_index(first.columns().iter().map(|c| c.name()), column)
            .ok_or_else(|| StoreError::Query(format!("column {} not in result", column)))?;

        let mut values = Vec::with_capacity(rows.len());
        for row in &rows {
            if let Some(value) = row.try_get::<&str, _>(idx)? {
                values.push(value.to_string());
            }
        }
        Ok(values)
    }

    async fn begin(&mut self) -> Result<()> {
        self.batch("BEGIN TRANSACTION").await?;
        self.in_transaction = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.batch("COMMIT TRANSACTION").await?;
        self.in_transaction = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        self.in_transaction = false;
        self.batch("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }

    fn in_transaction(&self) -> bool {
        self.in_transaction
    }
}
