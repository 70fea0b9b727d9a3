//! Table gateways.
//!
//! A [`Gateway`] is a table-bound view of a [`Database`]: the same reads and
//! writes with the table argument filled in. Names resolve through an explicit
//! [`GatewayRegistry`] built from the schema's table list plus the aliases
//! registered with [`Database::with_alias`].

use crate::client::Connection;
use crate::condition::{Cond, Conditions};
use crate::database::Database;
use crate::error::{DbmlError, DbmlResult};
use crate::schema::Schema;
use crate::select::SelectBuilder;
use crate::value::Row;
use std::collections::BTreeMap;

/// Gateway name to table name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayRegistry {
    entries: BTreeMap<String, String>,
}

impl GatewayRegistry {
    /// Every table under its own name, then the aliases. An alias naming an
    /// unknown table is rejected.
    pub fn build(schema: &Schema, aliases: &BTreeMap<String, String>) -> DbmlResult<Self> {
        let mut entries: BTreeMap<String, String> = schema
            .table_names()?
            .iter()
            .map(|name| (name.clone(), name.clone()))
            .collect();
        for (alias, table) in aliases {
            if !schema.has_table(table)? {
                return Err(DbmlError::not_found(format!(
                    "alias '{alias}' points at unknown table '{table}'"
                )));
            }
            entries.insert(alias.clone(), table.clone());
        }
        Ok(Self { entries })
    }

    pub fn resolve(&self, name: &str) -> DbmlResult<&str> {
        self.entries
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| DbmlError::not_found(format!("no gateway named '{name}'")))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<C: Connection> Database<C> {
    pub fn gateways(&self) -> DbmlResult<GatewayRegistry> {
        GatewayRegistry::build(self.schema(), self.aliases())
    }

    /// The gateway for a table name or alias.
    pub fn gateway(&self, name: &str) -> DbmlResult<Gateway<'_, C>> {
        let table = self.gateways()?.resolve(name)?.to_string();
        Ok(Gateway { db: self, table })
    }
}

/// A [`Database`] bound to one table.
pub struct Gateway<'a, C: Connection> {
    db: &'a Database<C>,
    table: String,
}

impl<C: Connection> std::fmt::Debug for Gateway<'_, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("db", self.db)
            .field("table", &self.table)
            .finish()
    }
}

impl<'a, C: Connection> Gateway<'a, C> {
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn database(&self) -> &'a Database<C> {
        self.db
    }

    /// A select builder over this table.
    pub fn select(&self) -> SelectBuilder {
        self.db.select().table(self.table.as_str())
    }

    /// Select rows matching `conds`.
    pub fn filter(&self, conds: Conditions) -> SelectBuilder {
        self.select().where_conds(conds)
    }

    /// Row by primary key. Composite keys take a `[[a, b]]` tuple.
    pub async fn find(&self, key: impl Into<Cond>) -> DbmlResult<Option<Row>> {
        let meta = self.db.schema().table(&self.table)?;
        let column = match meta.primary_key.as_slice() {
            [] => {
                return Err(DbmlError::invalid(format!(
                    "table '{}' has no primary key",
                    self.table
                )));
            }
            [single] => single.clone(),
            many => format!("({})", many.join(", ")),
        };
        self.db.fetch_row(&self.select().where_(column, key)).await
    }

    pub async fn fetch_all(&self, conds: Conditions) -> DbmlResult<Vec<Row>> {
        self.db.fetch_all(&self.filter(conds)).await
    }

    pub async fn count(&self, conds: Conditions) -> DbmlResult<i64> {
        self.db.count(&self.filter(conds)).await
    }

    pub async fn exists(&self, conds: Conditions) -> DbmlResult<bool> {
        self.db.exists(&self.filter(conds)).await
    }

    pub async fn insert(&self, rows: &[Row]) -> DbmlResult<u64> {
        self.db.insert(&self.table, rows).await
    }

    pub async fn update(&self, set: &Row, conds: &Conditions) -> DbmlResult<u64> {
        self.db.update(&self.table, set, conds).await
    }

    pub async fn upsert(&self, row: &Row) -> DbmlResult<u64> {
        self.db.upsert(&self.table, row).await
    }

    pub async fn modify(&self, rows: &[Row]) -> DbmlResult<u64> {
        self.db.modify(&self.table, rows).await
    }

    pub async fn delete(&self, conds: &Conditions) -> DbmlResult<u64> {
        self.db.delete(&self.table, conds).await
    }

    pub async fn destroy(&self, conds: &Conditions) -> DbmlResult<u64> {
        self.db.destroy(&self.table, conds).await
    }

    pub async fn duplicate(&self, overrides: &Row, conds: &Conditions) -> DbmlResult<u64> {
        self.db.duplicate(&self.table, overrides, conds).await
    }
}
