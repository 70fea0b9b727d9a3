//! Schema metadata, relation graph and virtual keys.
//!
//! [`Schema`] is the explicit context every builder resolves tables against.
//! Metadata comes from a [`SchemaProvider`] (usually a [`DbSchema`] snapshot
//! filled by [`introspect::load_schema`]), is memoized in memory and, when a
//! [`CacheStore`] is attached, persisted between processes.
//!
//! Virtual foreign keys, ignored keys, column type overrides and anywhere
//! overrides are an in-memory overlay: they are never written to the store and
//! they survive [`Schema::refresh`].

pub mod introspect;
pub mod relation;
pub mod store;

pub use relation::RelationIndex;
pub use store::{CacheStore, FileStore, MemoryStore};

use crate::anywhere::AnywhereOverride;
use crate::error::{DbmlError, DbmlResult};
use crate::ident::Ident;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const TABLE_NAMES_KEY: &str = "table-names";

fn table_key(name: &str) -> String {
    format!("table.{name}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    #[default]
    Table,
    View,
    MaterializedView,
    ForeignTable,
    Other,
}

impl RelationKind {
    /// Map a `pg_class.relkind` code.
    pub fn from_relkind(relkind: &str) -> Self {
        match relkind {
            "r" | "p" => Self::Table,
            "v" => Self::View,
            "m" => Self::MaterializedView,
            "f" => Self::ForeignTable,
            _ => Self::Other,
        }
    }
}

/// Coarse type family used by anywhere search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Numeric,
    Other,
}

impl ColumnKind {
    pub fn of(data_type: &str) -> Self {
        let ty = data_type.to_ascii_lowercase();
        if ty.contains("char") || ty == "text" || ty == "citext" || ty == "name" {
            Self::Text
        } else if matches!(ty.as_str(), "smallint" | "bigint" | "integer" | "int" | "int2" | "int4" | "int8")
            || ty.contains("serial")
            || ty.starts_with("numeric")
            || ty.starts_with("decimal")
            || ty == "real"
            || ty.starts_with("double")
            || ty.starts_with("float")
        {
            Self::Numeric
        } else {
            Self::Other
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
    pub default: Option<String>,
    pub auto_increment: bool,
    pub comment: Option<String>,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable: true,
            default: None,
            auto_increment: false,
            comment: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Mark as a serial/identity column (implies NOT NULL).
    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    pub fn kind(&self) -> ColumnKind {
        ColumnKind::of(&self.data_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub primary: bool,
}

/// A foreign key: `table(columns)` references `foreign_table(foreign_columns)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub foreign_table: String,
    pub foreign_columns: Vec<String>,
}

impl ForeignKey {
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        table: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        foreign_table: impl Into<String>,
        foreign_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            foreign_table: foreign_table.into(),
            foreign_columns: foreign_columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this key links `a` and `b`, in either direction.
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.table == a && self.foreign_table == b) || (self.table == b && self.foreign_table == a)
    }

    /// `(columns on side, columns on the other side)` as seen from `side`.
    pub fn columns_from(&self, side: &str) -> (&[String], &[String]) {
        if self.table == side {
            (&self.columns, &self.foreign_columns)
        } else {
            (&self.foreign_columns, &self.columns)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableMeta {
    pub name: String,
    #[serde(default)]
    pub kind: RelationKind,
    pub columns: Vec<ColumnMeta>,
    #[serde(default)]
    pub primary_key: Vec<String>,
    #[serde(default)]
    pub indexes: Vec<IndexMeta>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    #[serde(default)]
    pub comment: Option<String>,
}

impl TableMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: RelationKind::Table,
            columns: Vec::new(),
            primary_key: Vec::new(),
            indexes: Vec::new(),
            foreign_keys: Vec::new(),
            comment: None,
        }
    }

    pub fn column(mut self, column: ColumnMeta) -> Self {
        self.columns.push(column);
        self
    }

    pub fn primary_key<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.primary_key = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn index(mut self, index: IndexMeta) -> Self {
        self.indexes.push(index);
        self
    }

    /// Add a foreign key from this table; `table` is filled in.
    pub fn foreign_key<S: Into<String>>(
        mut self,
        name: impl Into<String>,
        columns: impl IntoIterator<Item = S>,
        foreign_table: impl Into<String>,
        foreign_columns: impl IntoIterator<Item = S>,
    ) -> Self {
        let fk = ForeignKey::new(name, self.name.clone(), columns, foreign_table, foreign_columns);
        self.foreign_keys.push(fk);
        self
    }

    pub fn find_column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.find_column(name).is_some()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// The serial/identity column, if any.
    pub fn auto_increment_column(&self) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.auto_increment)
    }

    /// Whether `column` is part of the primary key, a foreign key or an index.
    pub fn is_key_column(&self, column: &str) -> bool {
        let name = column.to_string();
        self.primary_key.contains(&name)
            || self.foreign_keys.iter().any(|fk| fk.columns.contains(&name))
            || self.indexes.iter().any(|ix| ix.columns.contains(&name))
    }
}

/// Source of table metadata.
pub trait SchemaProvider: Send + Sync {
    /// Namespaces the provider covers; qualifiers outside them are rejected.
    fn schema_names(&self) -> Vec<String> {
        vec!["public".to_string()]
    }

    fn table_names(&self) -> DbmlResult<Vec<String>>;

    /// Metadata for one table, `None` when it does not exist.
    fn table(&self, name: &str) -> DbmlResult<Option<TableMeta>>;
}

/// A metadata snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DbSchema {
    pub schemas: Vec<String>,
    pub tables: Vec<TableMeta>,
}

impl DbSchema {
    pub fn new() -> Self {
        Self {
            schemas: vec!["public".to_string()],
            tables: Vec::new(),
        }
    }

    pub fn with_table(mut self, table: TableMeta) -> Self {
        self.tables.push(table);
        self
    }

    pub fn find_table(&self, name: &str) -> Option<&TableMeta> {
        self.tables.iter().find(|t| t.name == name)
    }
}

impl SchemaProvider for DbSchema {
    fn schema_names(&self) -> Vec<String> {
        self.schemas.clone()
    }

    fn table_names(&self) -> DbmlResult<Vec<String>> {
        Ok(self.tables.iter().map(|t| t.name.clone()).collect())
    }

    fn table(&self, name: &str) -> DbmlResult<Option<TableMeta>> {
        Ok(self.find_table(name).cloned())
    }
}

#[derive(Debug, Default)]
struct Overlay {
    virtual_keys: Vec<ForeignKey>,
    ignored_keys: BTreeSet<String>,
    column_types: HashMap<(String, String), String>,
    table_anywhere: HashMap<String, AnywhereOverride>,
    column_anywhere: HashMap<(String, String), AnywhereOverride>,
}

#[derive(Debug, Default)]
struct SchemaState {
    table_names: Option<Arc<Vec<String>>>,
    tables: HashMap<String, Arc<TableMeta>>,
    relations: Option<Arc<RelationIndex>>,
    overlay: Overlay,
}

/// Schema context shared by builders and the database handle.
pub struct Schema {
    provider: Box<dyn SchemaProvider>,
    store: Option<Arc<dyn CacheStore>>,
    state: RwLock<SchemaState>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("store", &self.store.is_some())
            .field("state", &*self.read())
            .finish()
    }
}

impl Schema {
    pub fn new(provider: impl SchemaProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            store: None,
            state: RwLock::new(SchemaState::default()),
        }
    }

    /// Attach a persistent metadata store.
    pub fn with_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn read(&self) -> RwLockReadGuard<'_, SchemaState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, SchemaState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn fetch_stored<T: serde::de::DeserializeOwned>(&self, key: &str) -> DbmlResult<Option<T>> {
        let Some(store) = &self.store else {
            return Ok(None);
        };
        match store.fetch(key)? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    fn save_stored<T: Serialize>(&self, key: &str, value: &T) -> DbmlResult<()> {
        if let Some(store) = &self.store {
            store.save(key, &serde_json::to_value(value)?)?;
        }
        Ok(())
    }

    pub fn schema_names(&self) -> Vec<String> {
        self.provider.schema_names()
    }

    pub fn table_names(&self) -> DbmlResult<Arc<Vec<String>>> {
        if let Some(names) = &self.read().table_names {
            tracing::trace!(target: "dbml.schema", key = TABLE_NAMES_KEY, "cache hit");
            return Ok(Arc::clone(names));
        }
        tracing::trace!(target: "dbml.schema", key = TABLE_NAMES_KEY, "cache miss");
        let names = match self.fetch_stored::<Vec<String>>(TABLE_NAMES_KEY)? {
            Some(names) => names,
            None => {
                let names = self.provider.table_names()?;
                self.save_stored(TABLE_NAMES_KEY, &names)?;
                names
            }
        };
        let names = Arc::new(names);
        self.write().table_names = Some(Arc::clone(&names));
        Ok(names)
    }

    pub fn has_table(&self, name: &str) -> DbmlResult<bool> {
        Ok(self.table_names()?.iter().any(|t| t == name))
    }

    /// Table metadata; `NotFound` for unknown tables.
    pub fn table(&self, name: &str) -> DbmlResult<Arc<TableMeta>> {
        if let Some(meta) = self.read().tables.get(name) {
            tracing::trace!(target: "dbml.schema", key = %table_key(name), "cache hit");
            return Ok(Arc::clone(meta));
        }
        tracing::trace!(target: "dbml.schema", key = %table_key(name), "cache miss");
        let key = table_key(name);
        let meta = match self.fetch_stored::<TableMeta>(&key)? {
            Some(meta) => meta,
            None => {
                let meta = self
                    .provider
                    .table(name)?
                    .ok_or_else(|| DbmlError::not_found(format!("table '{name}' does not exist")))?;
                self.save_stored(&key, &meta)?;
                meta
            }
        };
        let meta = Arc::new(meta);
        self.write()
            .tables
            .insert(name.to_string(), Arc::clone(&meta));
        Ok(meta)
    }

    /// Resolve a possibly qualified table reference to a bare table name.
    ///
    /// Qualifiers outside the provider's namespaces are cross-schema
    /// references and are rejected, quoted or not.
    pub fn resolve_table_name(&self, raw: &str) -> DbmlResult<String> {
        let ident = Ident::parse(raw)?;
        let Some(qualifier) = ident.qualifier() else {
            return Ok(ident.name().to_string());
        };
        if !self.schema_names().contains(&qualifier) {
            return Err(DbmlError::invalid(format!(
                "cross-schema reference '{raw}' is not supported"
            )));
        }
        Ok(ident.name().to_string())
    }

    /// Effective data type of a column, honouring [`Schema::set_column_type`].
    pub fn column_type(&self, table: &str, column: &str) -> DbmlResult<Option<String>> {
        let key = (table.to_string(), column.to_string());
        if let Some(ty) = self.read().overlay.column_types.get(&key) {
            return Ok(Some(ty.clone()));
        }
        Ok(self.table(table)?.find_column(column).map(|c| c.data_type.clone()))
    }

    /// Override the logical type of a column (memory only).
    pub fn set_column_type(&self, table: &str, column: &str, data_type: impl Into<String>) {
        self.write()
            .overlay
            .column_types
            .insert((table.to_string(), column.to_string()), data_type.into());
    }

    pub fn set_table_anywhere(&self, table: &str, options: AnywhereOverride) {
        self.write()
            .overlay
            .table_anywhere
            .insert(table.to_string(), options);
    }

    pub fn set_column_anywhere(&self, table: &str, column: &str, options: AnywhereOverride) {
        self.write()
            .overlay
            .column_anywhere
            .insert((table.to_string(), column.to_string()), options);
    }

    /// `(table override, column override)` for anywhere search.
    pub fn anywhere_overrides(
        &self,
        table: &str,
        column: &str,
    ) -> (Option<AnywhereOverride>, Option<AnywhereOverride>) {
        let state = self.read();
        (
            state.overlay.table_anywhere.get(table).cloned(),
            state
                .overlay
                .column_anywhere
                .get(&(table.to_string(), column.to_string()))
                .cloned(),
        )
    }

    /// Register a foreign key that does not exist in the database.
    pub fn add_virtual_foreign_key(&self, fk: ForeignKey) {
        tracing::debug!(target: "dbml.schema", name = %fk.name, table = %fk.table, "virtual foreign key added");
        let mut state = self.write();
        state.overlay.virtual_keys.retain(|k| k.name != fk.name);
        state.overlay.virtual_keys.push(fk);
        state.relations = None;
    }

    /// Hide a database foreign key from join resolution.
    pub fn ignore_foreign_key(&self, name: impl Into<String>) {
        let mut state = self.write();
        state.overlay.ignored_keys.insert(name.into());
        state.relations = None;
    }

    /// Effective foreign keys declared on `table`.
    pub fn foreign_keys(&self, table: &str) -> DbmlResult<Vec<ForeignKey>> {
        let meta = self.table(table)?;
        let state = self.read();
        let overlay = &state.overlay;
        Ok(meta
            .foreign_keys
            .iter()
            .filter(|fk| !overlay.ignored_keys.contains(&fk.name))
            .chain(overlay.virtual_keys.iter().filter(|fk| fk.table == table))
            .cloned()
            .collect())
    }

    /// Every effective foreign key of every table.
    pub fn all_foreign_keys(&self) -> DbmlResult<Vec<ForeignKey>> {
        let known = self.table_names()?;
        let mut out = Vec::new();
        for name in known.iter() {
            out.extend(self.foreign_keys(name)?);
        }
        let state = self.read();
        out.extend(
            state
                .overlay
                .virtual_keys
                .iter()
                .filter(|fk| !known.contains(&fk.table))
                .cloned(),
        );
        Ok(out)
    }

    /// Keys of other tables referencing `table`.
    pub fn referencing_keys(&self, table: &str) -> DbmlResult<Vec<ForeignKey>> {
        Ok(self
            .all_foreign_keys()?
            .into_iter()
            .filter(|fk| fk.foreign_table == table)
            .collect())
    }

    /// The flattened relation index, built on first use.
    pub fn relations(&self) -> DbmlResult<Arc<RelationIndex>> {
        if let Some(index) = &self.read().relations {
            return Ok(Arc::clone(index));
        }
        let index = Arc::new(RelationIndex::build(&self.all_foreign_keys()?));
        self.write().relations = Some(Arc::clone(&index));
        Ok(index)
    }

    /// Pick the foreign key joining `from` and `to`.
    ///
    /// * `Some(name)`: that key, `NotFound` when it does not link the tables.
    /// * `Some("")`: a key is required; none is `NotFound`, several `Ambiguous`.
    /// * `None`: the single key if there is one, `Ambiguous` for several,
    ///   `Ok(None)` for none (callers fall back to [`Schema::indirect_columns`]).
    pub fn foreign_key_between(
        &self,
        from: &str,
        to: &str,
        name: Option<&str>,
    ) -> DbmlResult<Option<ForeignKey>> {
        let mut candidates: Vec<ForeignKey> = self.foreign_keys(from)?;
        if from != to {
            candidates.extend(self.foreign_keys(to)?);
        }
        candidates.retain(|fk| fk.links(from, to));

        match name {
            Some(name) if !name.is_empty() => candidates
                .into_iter()
                .find(|fk| fk.name == name)
                .map(Some)
                .ok_or_else(|| {
                    DbmlError::not_found(format!(
                        "foreign key '{name}' between '{from}' and '{to}' does not exist"
                    ))
                }),
            _ if candidates.len() > 1 => {
                let names: Vec<&str> = candidates.iter().map(|fk| fk.name.as_str()).collect();
                Err(DbmlError::ambiguous(format!(
                    "'{from}' and '{to}' are linked by several foreign keys: {}",
                    names.join(", ")
                )))
            }
            Some(_) if candidates.is_empty() => Err(DbmlError::not_found(format!(
                "no foreign key between '{from}' and '{to}'"
            ))),
            _ => Ok(candidates.pop()),
        }
    }

    /// Indirect join columns `(from_col, to_col)`, searched in both directions.
    pub fn indirect_columns(&self, from: &str, to: &str) -> DbmlResult<Vec<(String, String)>> {
        let index = self.relations()?;
        let forward = index.indirect_columns(from, to);
        if !forward.is_empty() {
            return Ok(forward);
        }
        Ok(index
            .indirect_columns(to, from)
            .into_iter()
            .map(|(to_col, from_col)| (from_col, to_col))
            .collect())
    }

    /// Drop every cached entry, in memory and in the store. The overlay stays.
    pub fn refresh(&self) -> DbmlResult<()> {
        tracing::debug!(target: "dbml.schema", "schema cache refresh");
        {
            let mut state = self.write();
            state.table_names = None;
            state.tables.clear();
            state.relations = None;
        }
        if let Some(store) = &self.store {
            store.flush_all()?;
        }
        Ok(())
    }
}
