//! The database handle.
//!
//! [`Database`] owns a master link and an optional slave link. Writes always go
//! to the master; reads go to the slave unless master mode is active or a
//! transaction is open. Each link keeps its own prepared statement cache, so the
//! same SQL text prepared on both links yields two independent handles.
//!
//! # Example
//!
//! ```ignore
//! use dbml::{cond, Database, DbmlConfig, Row};
//!
//! let db = Database::from_introspection(client, &["public".into()], DbmlConfig::new()).await?;
//!
//! let rows = db
//!     .fetch_all(&db.select().table("t_article A+t_user U").where_("A.id:IN", [1, 2]))
//!     .await?;
//!
//! db.transact(|db| async move {
//!     db.insert("t_user", &[Row::new().with("name", "a")]).await?;
//!     db.update_or_throw("t_user", &Row::new().with("name", "b"), &cond!["id" => 1]).await
//! })
//! .await?;
//!
//! // Render without executing.
//! let queries = db.dry_run().destroy("t_user", &cond!["id" => 1])?;
//! ```

use crate::client::Connection;
use crate::condition::Conditions;
use crate::config::DbmlConfig;
use crate::crud;
use crate::error::{DbmlError, DbmlResult};
use crate::expr::Query;
use crate::schema::{Schema, introspect};
use crate::scope::ScopeRegistry;
use crate::select::SelectBuilder;
use crate::statement_cache::StatementCache;
use crate::value::{Row, Value};
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// One connection plus its statement cache.
struct Link<C: Connection> {
    name: &'static str,
    conn: C,
    cache: Option<StatementCache<C::Prepared>>,
}

impl<C: Connection> Link<C> {
    fn new(name: &'static str, conn: C, config: &DbmlConfig) -> Self {
        let cache = (config.statement_cache.enabled && config.statement_cache.capacity > 0)
            .then(|| StatementCache::new(config.statement_cache.capacity));
        Self { name, conn, cache }
    }

    async fn prepare(&self, sql: &str) -> DbmlResult<C::Prepared> {
        let Some(cache) = &self.cache else {
            return self.conn.prepare(sql).await;
        };
        if let Some(stmt) = cache.get(sql) {
            return Ok(stmt);
        }
        let stmt = self.conn.prepare(sql).await?;
        Ok(cache.insert_if_absent(sql.to_string(), stmt))
    }

    async fn query(&self, query: &Query) -> DbmlResult<Vec<Row>> {
        query.check()?;
        let sql = query.to_numbered();
        tracing::debug!(target: "dbml.sql", link = self.name, params = query.params.len(), sql = %sql, "query");
        let stmt = self.prepare(&sql).await?;
        self.conn.query(&stmt, &query.params).await
    }

    async fn execute(&self, query: &Query) -> DbmlResult<u64> {
        query.check()?;
        let sql = query.to_numbered();
        tracing::debug!(target: "dbml.sql", link = self.name, params = query.params.len(), sql = %sql, "execute");
        let stmt = self.prepare(&sql).await?;
        self.conn.execute(&stmt, &query.params).await
    }

    fn stats(&self) -> LinkStats {
        let (cached, (hits, misses)) = self
            .cache
            .as_ref()
            .map_or((0, (0, 0)), |cache| (cache.len(), cache.stats()));
        LinkStats {
            link: self.name,
            cached,
            hits,
            misses,
        }
    }
}

/// Statement cache counters of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStats {
    pub link: &'static str,
    pub cached: usize,
    pub hits: u64,
    pub misses: u64,
}

#[derive(Debug, Default)]
struct State {
    depth: usize,
    master_mode: usize,
}

/// Master/slave database handle with nested transactions.
pub struct Database<C: Connection> {
    master: Link<C>,
    slave: Option<Link<C>>,
    schema: Arc<Schema>,
    scopes: Arc<ScopeRegistry>,
    aliases: BTreeMap<String, String>,
    config: DbmlConfig,
    state: Mutex<State>,
}

impl<C: Connection> std::fmt::Debug for Database<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("slave", &self.slave.is_some())
            .field("config", &self.config)
            .field("state", &*self.state())
            .finish_non_exhaustive()
    }
}

impl<C: Connection> Database<C> {
    pub fn new(conn: C, schema: Arc<Schema>) -> Self {
        Self::with_config(conn, schema, DbmlConfig::default())
    }

    pub fn with_config(conn: C, schema: Arc<Schema>, config: DbmlConfig) -> Self {
        Self {
            master: Link::new("master", conn, &config),
            slave: None,
            schema,
            scopes: Arc::new(ScopeRegistry::new()),
            aliases: BTreeMap::new(),
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Introspect the given namespaces through `conn` and build a handle on top.
    pub async fn from_introspection(
        conn: C,
        schemas: &[String],
        config: DbmlConfig,
    ) -> DbmlResult<Self> {
        let snapshot = introspect::load_schema(&conn, schemas).await?;
        Ok(Self::with_config(conn, Arc::new(Schema::new(snapshot)), config))
    }

    /// Route reads to a replica.
    pub fn with_slave(mut self, conn: C) -> Self {
        self.slave = Some(Link::new("slave", conn, &self.config));
        self
    }

    pub fn with_scopes(mut self, scopes: ScopeRegistry) -> Self {
        self.scopes = Arc::new(scopes);
        self
    }

    /// Register an extra gateway name for `table`.
    pub fn with_alias(mut self, alias: impl Into<String>, table: impl Into<String>) -> Self {
        self.aliases.insert(alias.into(), table.into());
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn config(&self) -> &DbmlConfig {
        &self.config
    }

    pub(crate) fn aliases(&self) -> &BTreeMap<String, String> {
        &self.aliases
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// A select builder wired to this handle's schema, scopes and defaults.
    pub fn select(&self) -> SelectBuilder {
        SelectBuilder::new(Arc::clone(&self.schema))
            .with_scopes(Arc::clone(&self.scopes))
            .default_join(self.config.default_join)
            .anywhere_options(self.config.anywhere.clone())
    }

    /// Statement cache counters, master first.
    pub fn statement_cache_stats(&self) -> Vec<LinkStats> {
        std::iter::once(&self.master)
            .chain(self.slave.as_ref())
            .map(Link::stats)
            .collect()
    }

    // ==================== Routing ====================

    /// Pin reads to the master until the returned guard is dropped.
    pub fn master_mode(&self) -> MasterMode<'_, C> {
        self.state().master_mode += 1;
        MasterMode { db: self }
    }

    pub fn is_master_mode(&self) -> bool {
        self.state().master_mode > 0
    }

    fn read_link(&self) -> &Link<C> {
        let state = self.state();
        match &self.slave {
            Some(slave) if state.master_mode == 0 && state.depth == 0 => slave,
            _ => &self.master,
        }
    }

    // ==================== Transactions ====================

    /// Current nesting depth; 0 outside any transaction.
    pub fn transaction_depth(&self) -> usize {
        self.state().depth
    }

    /// Enter a (possibly nested) transaction. Only the outermost level sends `BEGIN`.
    pub async fn begin(&self) -> DbmlResult<()> {
        let depth = {
            let mut state = self.state();
            state.depth += 1;
            state.depth
        };
        tracing::debug!(target: "dbml.tx", depth, "begin");
        if depth == 1 {
            if let Err(err) = self.master.conn.batch_execute("BEGIN").await {
                self.state().depth -= 1;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Leave one level; only the outermost level sends `COMMIT`.
    pub async fn commit(&self) -> DbmlResult<()> {
        let depth = self.leave("commit")?;
        if depth == 0 {
            self.master.conn.batch_execute("COMMIT").await?;
        }
        Ok(())
    }

    /// Leave one level; only the outermost level sends `ROLLBACK`.
    pub async fn rollback(&self) -> DbmlResult<()> {
        let depth = self.leave("rollback")?;
        if depth == 0 {
            self.master.conn.batch_execute("ROLLBACK").await?;
        }
        Ok(())
    }

    fn leave(&self, action: &str) -> DbmlResult<usize> {
        let mut state = self.state();
        if state.depth == 0 {
            return Err(DbmlError::invalid(format!("{action} without an open transaction")));
        }
        state.depth -= 1;
        tracing::debug!(target: "dbml.tx", depth = state.depth, "{action}");
        Ok(state.depth)
    }

    /// Run `f` inside a transaction level.
    ///
    /// On error every level opened since the call is rolled back and the error
    /// is returned unchanged.
    pub async fn transact<'a, T, F, Fut>(&'a self, f: F) -> DbmlResult<T>
    where
        F: FnOnce(&'a Self) -> Fut,
        Fut: Future<Output = DbmlResult<T>>,
    {
        let original = self.transaction_depth();
        self.begin().await?;
        match f(self).await {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(target: "dbml.tx", error = %err, depth = original, "rolling back after failure");
                while self.transaction_depth() > original {
                    if let Err(rollback_err) = self.rollback().await {
                        return Err(DbmlError::Other(format!(
                            "{err} (rollback failed: {rollback_err})"
                        )));
                    }
                }
                Err(err)
            }
        }
    }

    // ==================== Raw statements ====================

    /// Run a rendered query on the read link.
    pub async fn query(&self, query: &Query) -> DbmlResult<Vec<Row>> {
        self.read_link().query(query).await
    }

    /// Run a rendered statement on the master.
    pub async fn execute(&self, query: &Query) -> DbmlResult<u64> {
        self.master.execute(query).await
    }

    // ==================== Reads ====================

    pub async fn fetch_all(&self, builder: &SelectBuilder) -> DbmlResult<Vec<Row>> {
        self.query(&builder.build()?).await
    }

    pub async fn fetch_row(&self, builder: &SelectBuilder) -> DbmlResult<Option<Row>> {
        Ok(self.fetch_all(builder).await?.into_iter().next())
    }

    /// Like [`Database::fetch_row`] but a missing row is an error.
    pub async fn fetch_row_or_throw(&self, builder: &SelectBuilder) -> DbmlResult<Row> {
        let query = builder.build()?;
        self.query(&query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| DbmlError::NonSelected(format!("no row selected by {}", query.sql)))
    }

    /// First column of the first row.
    pub async fn fetch_value(&self, builder: &SelectBuilder) -> DbmlResult<Option<Value>> {
        Ok(self
            .fetch_row(builder)
            .await?
            .and_then(|row| row.first().cloned()))
    }

    pub async fn count(&self, builder: &SelectBuilder) -> DbmlResult<i64> {
        let rows = self.query(&builder.build_count()?).await?;
        let value = rows.first().and_then(Row::first).cloned().unwrap_or(Value::Int(0));
        value
            .as_i64()
            .ok_or_else(|| DbmlError::UnexpectedValue(format!("count returned {value:?}")))
    }

    pub async fn exists(&self, builder: &SelectBuilder) -> DbmlResult<bool> {
        let rows = self.query(&builder.build_exists()?).await?;
        Ok(matches!(rows.first().and_then(Row::first), Some(Value::Bool(true))))
    }

    // ==================== Writes ====================

    pub async fn insert(&self, table: &str, rows: &[Row]) -> DbmlResult<u64> {
        let query = crud::insert(&self.schema, table, rows, self.config.filter_unknown_columns)?;
        self.execute(&query).await
    }

    pub async fn insert_or_throw(&self, table: &str, rows: &[Row]) -> DbmlResult<u64> {
        affected("insert", table, self.insert(table, rows).await?)
    }

    pub async fn update(&self, table: &str, set: &Row, conds: &Conditions) -> DbmlResult<u64> {
        let query = crud::update(
            &self.schema,
            table,
            set,
            conds,
            self.config.filter_unknown_columns,
        )?;
        self.execute(&query).await
    }

    pub async fn update_or_throw(
        &self,
        table: &str,
        set: &Row,
        conds: &Conditions,
    ) -> DbmlResult<u64> {
        affected("update", table, self.update(table, set, conds).await?)
    }

    pub async fn delete(&self, table: &str, conds: &Conditions) -> DbmlResult<u64> {
        let query = crud::delete(&self.schema, table, conds)?;
        self.execute(&query).await
    }

    pub async fn delete_or_throw(&self, table: &str, conds: &Conditions) -> DbmlResult<u64> {
        affected("delete", table, self.delete(table, conds).await?)
    }

    /// Delete matching rows and, first, every row referencing them.
    /// Returns the number of rows deleted from `table` itself.
    pub async fn destroy(&self, table: &str, conds: &Conditions) -> DbmlResult<u64> {
        let queries = crud::destroy(&self.schema, table, conds)?;
        self.transact(|db| async move {
            let mut last = 0;
            for query in &queries {
                last = db.execute(query).await?;
            }
            Ok(last)
        })
        .await
    }

    pub async fn destroy_or_throw(&self, table: &str, conds: &Conditions) -> DbmlResult<u64> {
        affected("destroy", table, self.destroy(table, conds).await?)
    }

    /// Update the row with the same primary key, or insert it.
    ///
    /// A row carrying only key columns that already exists counts as one
    /// matched row.
    pub async fn upsert(&self, table: &str, row: &Row) -> DbmlResult<u64> {
        let plan = crud::upsert(&self.schema, table, row, self.config.filter_unknown_columns)?;
        self.transact(|db| async move {
            let rows = db.master.query(&plan.exists).await?;
            let exists = matches!(rows.first().and_then(Row::first), Some(Value::Bool(true)));
            match (exists, &plan.update) {
                (true, Some(update)) => db.execute(update).await,
                (true, None) => Ok(1),
                (false, _) => db.execute(&plan.insert).await,
            }
        })
        .await
    }

    pub async fn upsert_or_throw(&self, table: &str, row: &Row) -> DbmlResult<u64> {
        affected("upsert", table, self.upsert(table, row).await?)
    }

    /// Insert rows, updating non-key columns of rows whose primary key exists.
    pub async fn modify(&self, table: &str, rows: &[Row]) -> DbmlResult<u64> {
        let query = crud::modify(&self.schema, table, rows, self.config.filter_unknown_columns)?;
        self.execute(&query).await
    }

    pub async fn modify_or_throw(&self, table: &str, rows: &[Row]) -> DbmlResult<u64> {
        affected("modify", table, self.modify(table, rows).await?)
    }

    /// Copy matching rows with `overrides` applied.
    pub async fn duplicate(
        &self,
        table: &str,
        overrides: &Row,
        conds: &Conditions,
    ) -> DbmlResult<u64> {
        let query = crud::duplicate(&self.schema, table, overrides, conds)?;
        self.execute(&query).await
    }

    pub async fn duplicate_or_throw(
        &self,
        table: &str,
        overrides: &Row,
        conds: &Conditions,
    ) -> DbmlResult<u64> {
        affected("duplicate", table, self.duplicate(table, overrides, conds).await?)
    }

    // ==================== Dry run ====================

    /// Render operations without executing them.
    pub fn dry_run(&self) -> DryRun<'_, C> {
        DryRun { db: self }
    }
}

fn affected(action: &str, table: &str, count: u64) -> DbmlResult<u64> {
    if count == 0 {
        return Err(DbmlError::NonAffected(format!(
            "{action} on '{table}' affected no rows"
        )));
    }
    Ok(count)
}

/// Guard returned by [`Database::master_mode`].
pub struct MasterMode<'a, C: Connection> {
    db: &'a Database<C>,
}

impl<C: Connection> Drop for MasterMode<'_, C> {
    fn drop(&mut self) {
        let mut state = self.db.state();
        state.master_mode = state.master_mode.saturating_sub(1);
    }
}

/// Renders the same operations as [`Database`] into [`Query`] lists.
///
/// Nothing is executed, so the OrThrow checks never fire; malformed input
/// still fails.
pub struct DryRun<'a, C: Connection> {
    db: &'a Database<C>,
}

impl<C: Connection> DryRun<'_, C> {
    pub fn schema(&self) -> &Arc<Schema> {
        &self.db.schema
    }

    pub(crate) fn finish(&self, queries: Vec<Query>) -> DbmlResult<Vec<Query>> {
        if self.db.config.strict_dry_run {
            for query in &queries {
                query.check()?;
            }
        }
        Ok(queries)
    }

    fn filter(&self) -> bool {
        self.db.config.filter_unknown_columns
    }

    pub fn select(&self, builder: &SelectBuilder) -> DbmlResult<Vec<Query>> {
        self.finish(vec![builder.build()?])
    }

    pub fn count(&self, builder: &SelectBuilder) -> DbmlResult<Vec<Query>> {
        self.finish(vec![builder.build_count()?])
    }

    pub fn exists(&self, builder: &SelectBuilder) -> DbmlResult<Vec<Query>> {
        self.finish(vec![builder.build_exists()?])
    }

    pub fn insert(&self, table: &str, rows: &[Row]) -> DbmlResult<Vec<Query>> {
        self.finish(vec![crud::insert(&self.db.schema, table, rows, self.filter())?])
    }

    pub fn update(&self, table: &str, set: &Row, conds: &Conditions) -> DbmlResult<Vec<Query>> {
        self.finish(vec![crud::update(
            &self.db.schema,
            table,
            set,
            conds,
            self.filter(),
        )?])
    }

    pub fn delete(&self, table: &str, conds: &Conditions) -> DbmlResult<Vec<Query>> {
        self.finish(vec![crud::delete(&self.db.schema, table, conds)?])
    }

    pub fn destroy(&self, table: &str, conds: &Conditions) -> DbmlResult<Vec<Query>> {
        self.finish(crud::destroy(&self.db.schema, table, conds)?)
    }

    /// The existence probe followed by both possible outcomes.
    pub fn upsert(&self, table: &str, row: &Row) -> DbmlResult<Vec<Query>> {
        let plan = crud::upsert(&self.db.schema, table, row, self.filter())?;
        let mut out = vec![plan.exists];
        out.extend(plan.update);
        out.push(plan.insert);
        self.finish(out)
    }

    pub fn modify(&self, table: &str, rows: &[Row]) -> DbmlResult<Vec<Query>> {
        self.finish(vec![crud::modify(&self.db.schema, table, rows, self.filter())?])
    }

    pub fn duplicate(
        &self,
        table: &str,
        overrides: &Row,
        conds: &Conditions,
    ) -> DbmlResult<Vec<Query>> {
        self.finish(vec![crud::duplicate(&self.db.schema, table, overrides, conds)?])
    }
}
