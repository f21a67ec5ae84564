//! Database handle: the dialect backend for one configured engine.
//!
//! A [`Database`] owns the validated configuration, the dialect of the
//! configured engine, a lazily-connecting pool and the field catalog. It is
//! the entry point for bootstrapping, registration, saving and filtering.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{Config, EngineConfig};
use crate::core::field::FieldCatalog;
use crate::core::schema::{bootstrap_order, Component, ComponentKind, Upsert};
use crate::core::traits::{DbConnection, Dialect};
use crate::drivers::{ConnectionPool, DialectImpl, Engine};
use crate::error::{Result, StoreError};

/// Result of [`Database::health_check`].
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub engine: Engine,
    pub connected: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
    pub healthy: bool,
}

/// Existence of one schema component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub kind: ComponentKind,
    pub exists: bool,
    /// False for components the engine cannot have (procedures on SQLite,
    /// or when stored procedures are disabled).
    pub applicable: bool,
}

/// Persistence engine bound to one database.
pub struct Database {
    config: Config,
    engine: Engine,
    dialect: DialectImpl,
    pool: ConnectionPool,
    catalog: Arc<FieldCatalog>,
}

impl Database {
    /// Validate `config` and build a lazily-connecting pool.
    ///
    /// No connection is opened until the first operation. Must be called
    /// from within a tokio runtime.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let engine = config.engine()?;
        let pool = ConnectionPool::build(&config)?;

        Ok(Self {
            dialect: engine.dialect(),
            engine,
            pool,
            catalog: Arc::new(FieldCatalog::new()),
            config,
        })
    }

    /// Attach the field catalog used to resolve enums and filter fields.
    pub fn with_catalog(mut self, catalog: FieldCatalog) -> Self {
        self.catalog = Arc::new(catalog);
        self
    }

    pub fn catalog(&self) -> &FieldCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn settings(&self) -> &EngineConfig {
        &self.config.engine
    }

    pub fn engine(&self) -> Engine {
        self.engine
    }

    pub fn dialect(&self) -> &DialectImpl {
        &self.dialect
    }

    /// Toggle the audit log.
    pub fn set_log_edits(&mut self, enabled: bool) {
        self.config.engine.log_edits = enabled;
    }

    /// Toggle verbose progress logging.
    pub fn set_verbose(&mut self, enabled: bool) {
        self.config.engine.verbose = enabled;
    }

    /// Check out a connection from the pool.
    pub async fn connect(&self) -> Result<Box<dyn DbConnection>> {
        self.pool.acquire().await
    }

    /// Whether the engine can route upserts through stored procedures.
    pub fn supports_callable_statements(&self) -> bool {
        self.dialect.supports_callable_statements()
    }

    /// Whether upserts are actually routed through stored procedures.
    pub fn uses_stored_procedures(&self) -> bool {
        self.supports_callable_statements() && self.config.engine.use_stored_procedures
    }

    /// Parameterized statement for `upsert`: a procedure call when stored
    /// procedures are in use, the literal upsert otherwise.
    pub fn upsert_statement_for(&self, upsert: Upsert) -> String {
        if self.uses_stored_procedures() {
            if let Some(call) = self.dialect.build_call(upsert) {
                return call;
            }
        }
        self.dialect.build_upsert(upsert)
    }

    /// Whether the bootstrapper should provision `component` on this engine.
    pub fn is_applicable(&self, component: &Component) -> bool {
        match component {
            Component::Procedure(_) => self.uses_stored_procedures(),
            _ => true,
        }
    }

    /// DDL text for `component`, `None` when the engine has no such component.
    ///
    /// With `engine.sql_dir` set, `<sql_dir>/<dialect>/<ComponentName>.sql`
    /// is used verbatim when present.
    pub fn ddl_for(&self, component: &Component) -> Result<Option<String>> {
        if let Some(path) = self.override_path(component) {
            if path.is_file() {
                debug!("Using DDL override {}", path.display());
                return Ok(Some(std::fs::read_to_string(path)?));
            }
        }

        let ddl = match component {
            Component::Table(table) => Some(self.dialect.create_table(table)),
            Component::Index(index) => Some(self.dialect.create_index(index)),
            Component::Procedure(upsert) => self.dialect.create_procedure(*upsert),
            Component::CascadeTrigger => Some(self.dialect.create_cascade_trigger()),
        };
        Ok(ddl)
    }

    fn override_path(&self, component: &Component) -> Option<PathBuf> {
        self.config.engine.sql_dir.as_ref().map(|dir| {
            dir.join(self.dialect.name())
                .join(format!("{}.sql", component.name()))
        })
    }

    /// Check whether a component exists, on a fresh connection.
    pub async fn component_exists(&self, kind: ComponentKind, name: &str) -> Result<bool> {
        let mut conn = self.connect().await?;
        let result = self.component_exists_on(conn.as_mut(), kind, name).await;
        conn.release().await;
        result
    }

    pub(crate) async fn component_exists_on(
        &self,
        conn: &mut dyn DbConnection,
        kind: ComponentKind,
        name: &str,
    ) -> Result<bool> {
        let Some(query) = self.dialect.exists_query(kind, name) else {
            return Ok(false);
        };
        let count = conn.query_i64(&query.sql, &query.params).await?;
        Ok(count.unwrap_or(0) > 0)
    }

    /// Existence of every component in bootstrap order.
    pub async fn schema_status(&self) -> Result<Vec<ComponentStatus>> {
        let mut conn = self.connect().await?;
        let mut status = Vec::new();
        let mut failure = None;

        for component in bootstrap_order() {
            let applicable = self.is_applicable(&component);
            let exists = if applicable {
                match self
                    .component_exists_on(conn.as_mut(), component.kind(), component.name())
                    .await
                {
                    Ok(exists) => exists,
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            } else {
                false
            };
            status.push(ComponentStatus {
                name: component.name().to_string(),
                kind: component.kind(),
                exists,
                applicable,
            });
        }

        conn.release().await;
        match failure {
            Some(e) => Err(e),
            None => Ok(status),
        }
    }

    /// Acquire a connection and run the dialect's liveness query.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        let start = Instant::now();
        let outcome = match self.connect().await {
            Ok(mut conn) => {
                let alive = conn.query_i64(self.dialect.liveness_query(), &[]).await;
                conn.release().await;
                alive.map(|_| ())
            }
            Err(e) => Err(e),
        };
        let latency_ms = start.elapsed().as_millis() as u64;

        let error = match outcome {
            Ok(()) => None,
            Err(e) => {
                warn!("Health check against {} failed: {}", self.engine, e);
                Some(e.to_string())
            }
        };

        Ok(HealthCheckResult {
            engine: self.engine,
            connected: error.is_none(),
            latency_ms,
            healthy: error.is_none(),
            error,
        })
    }

    /// Look up the enum declared for `field_id`.
    pub(crate) fn ordinal_of(&self, field_id: i64, value: &str) -> Result<i32> {
        let field_enum = self
            .catalog
            .enum_for(field_id)
            .ok_or(StoreError::UnknownField(field_id))?;
        field_enum
            .ordinal_of(value)
            .map(|o| o as i32)
            .ok_or_else(|| StoreError::UnknownEnumValue {
                field_id,
                value: value.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionProperties;
    use crate::core::schema::STORE_TEXT;
    use std::collections::BTreeMap;

    fn sqlite_config(dir: &std::path::Path) -> Config {
        let url = format!("sqlite://{}", dir.join("eav.db").display());
        Config::new(ConnectionProperties::properties(url, BTreeMap::new()))
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let config = Config::new(ConnectionProperties::credentials(
            "postgres",
            "postgres://localhost/eav",
            "",
            "",
        ));
        assert!(matches!(Database::open(config), Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_sqlite_upserts_are_literal() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(sqlite_config(dir.path())).unwrap();
        assert!(!db.uses_stored_procedures());
        let sql = db.upsert_statement_for(Upsert::Text);
        assert!(sql.starts_with("INSERT INTO StoreText"));
        assert!(sql.contains("ON CONFLICT (EntityGuid, FieldId)"));
    }

    #[tokio::test]
    async fn test_postgres_upserts_use_procedures() {
        let config = Config::new(ConnectionProperties::credentials(
            "postgres",
            "postgres://localhost/eav",
            "app",
            "secret",
        ));
        let mut db = Database::open(config).unwrap();
        assert_eq!(
            db.upsert_statement_for(Upsert::Long),
            "CALL procStoreLong($1, $2, $3)"
        );

        db.config.engine.use_stored_procedures = false;
        assert!(db
            .upsert_statement_for(Upsert::Long)
            .starts_with("INSERT INTO StoreLong"));
    }

    #[tokio::test]
    async fn test_ddl_override_is_pass_through() {
        let dir = tempfile::tempdir().unwrap();
        let sql_dir = dir.path().join("sql");
        std::fs::create_dir_all(sql_dir.join("sqlite")).unwrap();
        std::fs::write(
            sql_dir.join("sqlite").join("StoreText.sql"),
            "CREATE TABLE StoreText (custom TEXT)",
        )
        .unwrap();

        let mut config = sqlite_config(dir.path());
        config.engine.sql_dir = Some(sql_dir);
        let db = Database::open(config).unwrap();

        let ddl = db.ddl_for(&Component::Table(&STORE_TEXT)).unwrap();
        assert_eq!(ddl.as_deref(), Some("CREATE TABLE StoreText (custom TEXT)"));

        let builtin = db.ddl_for(&Component::Table(&crate::core::schema::STORE_LONG));
        assert!(builtin.unwrap().unwrap().starts_with("CREATE TABLE StoreLong"));
    }

    #[tokio::test]
    async fn test_sqlite_has_no_procedures() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(sqlite_config(dir.path())).unwrap();
        let component = Component::Procedure(Upsert::Text);
        assert!(!db.is_applicable(&component));
        assert_eq!(db.ddl_for(&component).unwrap(), None);
    }

    #[tokio::test]
    async fn test_health_check_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(sqlite_config(dir.path())).unwrap();
        let result = db.health_check().await.unwrap();
        assert!(result.healthy);
        assert_eq!(result.engine, Engine::Sqlite);
        assert!(result.error.is_none());
    }
}
