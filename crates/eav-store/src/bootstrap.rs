//! Schema bootstrapper.
//!
//! Walks the catalog in dependency order and creates whatever is missing.
//! A failing component is logged and recorded; the remaining components are
//! still attempted, so partially provisioned schemas converge on re-run.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::core::schema::{bootstrap_order, Component};
use crate::core::traits::DbConnection;
use crate::database::Database;
use crate::error::{Result, StoreError};

/// Component whose DDL failed.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapFailure {
    pub component: String,
    pub message: String,
}

/// Outcome of [`Database::initialize`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BootstrapReport {
    /// Components created by this run.
    pub created: Vec<String>,
    /// Components that were already present.
    pub existing: Vec<String>,
    /// Components the engine does not have (e.g. procedures on SQLite).
    pub skipped: Vec<String>,
    pub failed: Vec<BootstrapFailure>,
}

impl BootstrapReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

impl Database {
    /// Create every missing schema component.
    ///
    /// Only connectivity failures abort; DDL failures are collected in the
    /// returned report.
    pub async fn initialize(&self) -> Result<BootstrapReport> {
        let mut conn = self.connect().await?;
        let mut report = BootstrapReport::default();

        for component in bootstrap_order() {
            if !self.is_applicable(&component) {
                report.skipped.push(component.name().to_string());
                continue;
            }
            match self.prepare_component(conn.as_mut(), &component).await {
                Ok(true) => {
                    info!("Created {}", component);
                    report.created.push(component.name().to_string());
                }
                Ok(false) => {
                    debug!("{} already exists", component);
                    report.existing.push(component.name().to_string());
                }
                Err(e) => {
                    error!("Failed to create {}: {}", component, e);
                    report.failed.push(BootstrapFailure {
                        component: component.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.sync_report_tables_on(conn.as_mut(), &mut report).await;
        conn.release().await;

        info!(
            "Bootstrap finished: {} created, {} existing, {} skipped, {} failed",
            report.created.len(),
            report.existing.len(),
            report.skipped.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Create `component` when absent. Returns whether it was created.
    async fn prepare_component(
        &self,
        conn: &mut dyn DbConnection,
        component: &Component,
    ) -> Result<bool> {
        if self
            .component_exists_on(conn, component.kind(), component.name())
            .await?
        {
            return Ok(false);
        }

        let Some(ddl) = self.ddl_for(component)? else {
            return Ok(false);
        };
        conn.execute_script(&ddl)
            .await
            .map_err(|e| StoreError::bootstrap(component.name(), e.to_string()))?;
        Ok(true)
    }
}
