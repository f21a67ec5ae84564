//! Batched save pipeline.
//!
//! A save partitions its entities into batches and, per batch:
//!
//! 1. stamps each entity's last-modified time and stages its property maps
//! 2. commits the overview and every scalar category
//! 3. replaces array and enum rows (delete touched pairs, insert current)
//! 4. writes rows to the configured report tables
//! 5. recursively saves referenced children on the same connection, then
//!    clears and rebinds parent/child bindings
//!
//! In [`WriteMode::Fast`] each category is its own transaction and a failing
//! category is logged and recorded in the [`SaveReport`] while the rest
//! continue. In [`WriteMode::Strict`] the whole save is one transaction and
//! the first failure rolls everything back.

mod batch;
mod container;
mod context;
mod plan;
mod report;

pub use batch::partition;
pub use report::{Category, CategoryFailure, CategoryOutcome, SaveReport};

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, info};

use crate::config::WriteMode;
use crate::core::entity::{Entity, SaveEvent};
use crate::database::Database;
use crate::error::{Result, StoreError};
use container::SaveContainer;
use context::SaveContext;
use plan::{binding_groups, row_count, Plan, Planner};

macro_rules! progress {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

impl Database {
    /// Save `entities` in batches of `batch_size` (`<= 0` for one batch).
    ///
    /// Entities have their last-modified time stamped in place.
    pub async fn save(&self, entities: &mut [Entity], batch_size: i64) -> Result<SaveReport> {
        let strict = self.settings().write_mode == WriteMode::Strict;
        let mut report = SaveReport::default();
        if entities.is_empty() {
            return Ok(report);
        }

        let total = entities.len();
        let mut conn = self.connect().await?;

        let result = async {
            if strict {
                conn.begin().await?;
            }
            let mut ctx = SaveContext::outermost(conn.as_mut(), strict);
            let entities: Vec<&mut Entity> = entities.iter_mut().collect();
            self.save_entities(&mut ctx, entities, batch_size, &mut report)
                .await?;
            if strict {
                conn.commit().await?;
            }
            Ok::<(), StoreError>(())
        }
        .await;

        // The outermost save owns the connection; release it on every path.
        conn.release().await;
        result?;

        if report.is_complete() {
            progress!(
                self.settings().verbose,
                "Saved {} entities in {} batches ({} rows)",
                total,
                report.batches,
                report.rows_written()
            );
        } else {
            error!(
                "Save finished with {} failed categories",
                report.failed.len()
            );
        }
        Ok(report)
    }

    fn save_entities<'a>(
        &'a self,
        ctx: &'a mut SaveContext<'_>,
        mut entities: Vec<&'a mut Entity>,
        batch_size: i64,
        report: &'a mut SaveReport,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            let batches = partition(entities.len(), batch_size);
            if ctx.depth() == 0 {
                report.batches = batches.len();
            }
            for (batch_no, range) in batches.into_iter().enumerate() {
                progress!(
                    self.settings().verbose,
                    "Saving batch {} ({} entities, depth {})",
                    batch_no + 1,
                    range.len(),
                    ctx.depth()
                );
                self.save_batch(ctx, &mut entities[range], batch_no, report)
                    .await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn save_batch(
        &self,
        ctx: &mut SaveContext<'_>,
        batch: &mut [&mut Entity],
        batch_no: usize,
        report: &mut SaveReport,
    ) -> Result<()> {
        let batch_size = batch.len();
        let now = Utc::now().naive_utc();
        for (index, entity) in batch.iter_mut().enumerate() {
            if let Some(listener) = entity.listener() {
                listener.on_pre_save(&save_event(entity, batch_no, index, batch_size));
            }
            entity.overview.date_modified = now;
        }

        let planner = Planner::new(self);
        let groups = {
            let entities: Vec<&Entity> = batch.iter().map(|e| &**e).collect();
            let container = SaveContainer::stage(entities.iter().copied());
            for (category, plan) in planner.value_categories(&container) {
                self.commit_category(ctx, category, batch_no, plan, report)
                    .await?;
            }
            let rows = planner.reports(&entities, ctx.parents());
            self.commit_category(ctx, Category::Reports, batch_no, Ok(rows), report)
                .await?;
            binding_groups(&container)
        };

        if !groups.is_empty() {
            let children: Vec<&mut Entity> =
                batch.iter_mut().flat_map(|e| e.children_mut()).collect();
            if !children.is_empty() {
                let parents = groups
                    .iter()
                    .flat_map(|g| g.children.iter().map(move |c| (c.clone(), g.parent.clone())))
                    .collect();
                let mut nested = ctx.nested(parents);
                self.save_entities(&mut nested, children, 0, report).await?;
            }
            let plan = planner.bindings(&groups, self.settings().rebind_policy);
            self.commit_category(ctx, Category::Objects, batch_no, Ok(plan), report)
                .await?;
        }

        for (index, entity) in batch.iter().enumerate() {
            if let Some(listener) = entity.listener() {
                listener.on_post_save(&save_event(entity, batch_no, index, batch_size));
            }
        }
        Ok(())
    }

    /// Run one category's plan and record the outcome.
    ///
    /// Errors are only returned in strict mode.
    async fn commit_category(
        &self,
        ctx: &mut SaveContext<'_>,
        category: Category,
        batch: usize,
        plan: Result<Plan<'_>>,
        report: &mut SaveReport,
    ) -> Result<()> {
        let result = match plan {
            Ok(plan) if row_count(&plan) == 0 => return Ok(()),
            Ok(plan) => self.execute_plan(ctx, &plan).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(rows) => {
                progress!(
                    self.settings().verbose,
                    "Committed {} ({} rows, batch {}, depth {})",
                    category,
                    rows,
                    batch + 1,
                    ctx.depth()
                );
                report.succeeded.push(CategoryOutcome {
                    category,
                    depth: ctx.depth(),
                    batch,
                    rows,
                });
                Ok(())
            }
            Err(e) if ctx.strict() => Err(StoreError::batch_write(category.name(), e.to_string())),
            Err(e) => {
                error!(
                    "Failed to save {} (batch {}, depth {}): {}",
                    category,
                    batch + 1,
                    ctx.depth(),
                    e
                );
                report.failed.push(CategoryFailure {
                    category,
                    depth: ctx.depth(),
                    batch,
                    message: e.to_string(),
                });
                Ok(())
            }
        }
    }

    async fn execute_plan(&self, ctx: &mut SaveContext<'_>, plan: &Plan<'_>) -> Result<u64> {
        let own_transaction = !ctx.strict();
        let conn = ctx.conn();
        if own_transaction {
            conn.begin().await?;
        }

        let mut written = 0;
        for statement in plan.iter().filter(|s| !s.rows.is_empty()) {
            match conn.execute_batch(&statement.sql, &statement.rows).await {
                Ok(_) => written += statement.rows.len() as u64,
                Err(e) => {
                    if own_transaction {
                        conn.rollback().await.ok();
                    }
                    return Err(e);
                }
            }
        }

        if own_transaction {
            if let Err(e) = conn.commit().await {
                // A failed COMMIT can leave the transaction open; close it so
                // the next category can begin its own.
                conn.rollback().await.ok();
                return Err(e);
            }
        }
        Ok(written)
    }
}

fn save_event(entity: &Entity, batch: usize, index: usize, batch_size: usize) -> SaveEvent {
    SaveEvent {
        batch,
        index,
        batch_size,
        entity_guid: entity.guid().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, ConnectionProperties};
    use crate::core::traits::DbConnection;
    use crate::core::value::SqlValue;
    use async_trait::async_trait;
    use plan::Statement;

    /// Connection that records transaction calls and fails the first COMMIT.
    #[derive(Default)]
    struct ScriptedConnection {
        calls: Vec<&'static str>,
        commits_to_fail: usize,
        open: bool,
    }

    #[async_trait]
    impl DbConnection for ScriptedConnection {
        fn dialect_name(&self) -> &'static str {
            "sqlite"
        }

        async fn execute(&mut self, _sql: &str, _params: &[SqlValue<'_>]) -> Result<u64> {
            self.calls.push("execute");
            Ok(1)
        }

        async fn execute_script(&mut self, _sql: &str) -> Result<()> {
            Ok(())
        }

        async fn query_i64(&mut self, _sql: &str, _params: &[SqlValue<'_>]) -> Result<Option<i64>> {
            Ok(None)
        }

        async fn query_strings(
            &mut self,
            _sql: &str,
            _params: &[SqlValue<'_>],
            _column: &str,
        ) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        async fn begin(&mut self) -> Result<()> {
            if self.open {
                return Err(StoreError::Query(
                    "cannot start a transaction within a transaction".into(),
                ));
            }
            self.calls.push("begin");
            self.open = true;
            Ok(())
        }

        async fn commit(&mut self) -> Result<()> {
            if self.commits_to_fail > 0 {
                self.commits_to_fail -= 1;
                self.calls.push("commit failed");
                return Err(StoreError::Query("database is locked".into()));
            }
            self.calls.push("commit");
            self.open = false;
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.calls.push("rollback");
            self.open = false;
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            self.open
        }
    }

    fn database() -> Database {
        Database::open(Config::new(ConnectionProperties::credentials(
            "sqlite",
            "sqlite::memory:",
            "",
            "",
        )))
        .unwrap()
    }

    fn one_row_plan() -> Plan<'static> {
        vec![Statement {
            sql: "INSERT INTO StoreText (EntityGuid, FieldId, Value) VALUES (?, ?, ?)".into(),
            rows: vec![vec![
                SqlValue::from("g"),
                SqlValue::I64(1),
                SqlValue::from("v"),
            ]],
        }]
    }

    #[tokio::test]
    async fn test_failed_commit_does_not_poison_later_categories() {
        let db = database();
        let mut conn = ScriptedConnection {
            commits_to_fail: 1,
            ..Default::default()
        };
        let mut report = SaveReport::default();
        {
            let mut ctx = SaveContext::outermost(&mut conn, false);
            db.commit_category(&mut ctx, Category::Strings, 0, Ok(one_row_plan()), &mut report)
                .await
                .unwrap();
            db.commit_category(&mut ctx, Category::Longs, 0, Ok(one_row_plan()), &mut report)
                .await
                .unwrap();
        }

        assert_eq!(report.failed_categories().collect::<Vec<_>>(), vec![Category::Strings]);
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(report.succeeded[0].category, Category::Longs);
        assert_eq!(
            conn.calls,
            vec!["begin", "execute", "commit failed", "rollback", "begin", "execute", "commit"]
        );
        assert!(!conn.in_transaction());
    }

    #[tokio::test]
    async fn test_empty_plan_is_not_recorded() {
        let db = database();
        let mut conn = ScriptedConnection::default();
        let mut report = SaveReport::default();
        {
            let mut ctx = SaveContext::outermost(&mut conn, false);
            db.commit_category(&mut ctx, Category::Blobs, 0, Ok(Vec::new()), &mut report)
                .await
                .unwrap();
        }
        assert!(report.succeeded.is_empty());
        assert!(conn.calls.is_empty());
    }
}
