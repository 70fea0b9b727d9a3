//! Rendering of the write operations.
//!
//! Every function here is pure: it reads table metadata from the [`Schema`]
//! and returns the statement(s) to run. [`Database`](crate::Database) executes
//! them (or hands them back in dry-run mode) and applies the OrThrow checks.

use crate::condition::{Conditions, QueryContext, render_predicate};
use crate::error::{DbmlError, DbmlResult};
use crate::expr::Query;
use crate::ident::Ident;
use crate::schema::{ForeignKey, Schema, TableMeta};
use crate::value::{Row, Value};
use std::sync::Arc;

/// Statements making up one upsert: the existence probe and both outcomes.
#[derive(Debug, Clone, PartialEq)]
pub struct UpsertPlan {
    /// `SELECT EXISTS (...)` on the primary key.
    pub exists: Query,
    /// `None` when the row carries nothing but its primary key.
    pub update: Option<Query>,
    pub insert: Query,
}

fn table_meta(schema: &Schema, table: &str) -> DbmlResult<Arc<TableMeta>> {
    let name = schema.resolve_table_name(table)?;
    schema.table(&name)
}

/// Validated column list of `row`, with unknown columns dropped when `filter` is set.
fn columns_of(meta: &TableMeta, row: &Row, filter: bool) -> DbmlResult<Vec<(String, Value)>> {
    let mut out = Vec::with_capacity(row.len());
    for (column, value) in row.iter() {
        if !meta.has_column(column) {
            if filter {
                tracing::debug!(target: "dbml.sql", table = %meta.name, column, "dropping unknown column");
                continue;
            }
            Ident::parse(column)?;
        }
        out.push((column.to_string(), value.clone()));
    }
    Ok(out)
}

fn where_clause(
    schema: &Schema,
    meta: &TableMeta,
    conds: &Conditions,
    params: &mut Vec<Value>,
) -> DbmlResult<String> {
    let ctx = QueryContext::new()
        .with_schema(schema)
        .with_table(meta.name.clone(), meta.name.clone());
    Ok(render_predicate(conds, params, &ctx)?
        .map(|predicate| format!(" WHERE {predicate}"))
        .unwrap_or_default())
}

fn primary_key_of(meta: &TableMeta) -> DbmlResult<&[String]> {
    if meta.primary_key.is_empty() {
        return Err(DbmlError::invalid(format!(
            "table '{}' has no primary key",
            meta.name
        )));
    }
    Ok(&meta.primary_key)
}

/// Shared column list of a batch; every row must name the same columns.
fn batch_columns(meta: &TableMeta, rows: &[Row], filter: bool) -> DbmlResult<(Vec<String>, Vec<Vec<Value>>)> {
    let Some(first) = rows.first() else {
        return Err(DbmlError::invalid(format!(
            "insert into '{}' needs at least one row",
            meta.name
        )));
    };
    let columns: Vec<String> = columns_of(meta, first, filter)?
        .into_iter()
        .map(|(c, _)| c)
        .collect();
    if columns.is_empty() {
        return Err(DbmlError::invalid(format!(
            "no insertable columns for '{}'",
            meta.name
        )));
    }

    let mut values = Vec::with_capacity(rows.len());
    for (i, row) in rows.iter().enumerate() {
        let entries = columns_of(meta, row, filter)?;
        let same_shape = entries.len() == columns.len()
            && entries.iter().zip(&columns).all(|((c, _), expected)| c == expected);
        if !same_shape {
            return Err(DbmlError::invalid(format!(
                "row {i} for '{}' does not have the columns of the first row ({})",
                meta.name,
                columns.join(", ")
            )));
        }
        values.push(entries.into_iter().map(|(_, v)| v).collect());
    }
    Ok((columns, values))
}

fn values_clause(rows: Vec<Vec<Value>>, params: &mut Vec<Value>) -> String {
    rows.into_iter()
        .map(|row| {
            let slots = vec!["?"; row.len()].join(", ");
            params.extend(row);
            format!("({slots})")
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `INSERT INTO t (a, b) VALUES (?, ?), (?, ?)`
pub fn insert(schema: &Schema, table: &str, rows: &[Row], filter: bool) -> DbmlResult<Query> {
    let meta = table_meta(schema, table)?;
    let (columns, values) = batch_columns(&meta, rows, filter)?;
    let mut params = Vec::new();
    let values = values_clause(values, &mut params);
    Ok(Query::new(
        format!("INSERT INTO {} ({}) VALUES {values}", meta.name, columns.join(", ")),
        params,
    ))
}

/// `UPDATE t SET a = ?, b = ? WHERE ...`
pub fn update(
    schema: &Schema,
    table: &str,
    set: &Row,
    conds: &Conditions,
    filter: bool,
) -> DbmlResult<Query> {
    let meta = table_meta(schema, table)?;
    let entries = columns_of(&meta, set, filter)?;
    if entries.is_empty() {
        return Err(DbmlError::invalid(format!(
            "nothing to update in '{}'",
            meta.name
        )));
    }
    let mut params = Vec::new();
    let assignments = entries
        .into_iter()
        .map(|(column, value)| {
            params.push(value);
            format!("{column} = ?")
        })
        .collect::<Vec<_>>()
        .join(", ");
    let where_sql = where_clause(schema, &meta, conds, &mut params)?;
    Ok(Query::new(
        format!("UPDATE {} SET {assignments}{where_sql}", meta.name),
        params,
    ))
}

/// `DELETE FROM t WHERE ...`
pub fn delete(schema: &Schema, table: &str, conds: &Conditions) -> DbmlResult<Query> {
    let meta = table_meta(schema, table)?;
    let mut params = Vec::new();
    let where_sql = where_clause(schema, &meta, conds, &mut params)?;
    Ok(Query::new(format!("DELETE FROM {}{where_sql}", meta.name), params))
}

/// Delete rows of `table` together with every row referencing them, children
/// first. Returns the statements in execution order; the parent delete is last.
pub fn destroy(schema: &Schema, table: &str, conds: &Conditions) -> DbmlResult<Vec<Query>> {
    let meta = table_meta(schema, table)?;
    let mut params = Vec::new();
    let where_sql = where_clause(schema, &meta, conds, &mut params)?;
    let mut out = Vec::new();
    let mut path = vec![meta.name.clone()];
    destroy_into(schema, &meta.name, &Query::new(where_sql, params), &mut path, &mut out)?;
    Ok(out)
}

/// `filter` is the rendered ` WHERE ...` (possibly empty) selecting rows of `table`.
fn destroy_into(
    schema: &Schema,
    table: &str,
    filter: &Query,
    path: &mut Vec<String>,
    out: &mut Vec<Query>,
) -> DbmlResult<()> {
    let keys = schema.referencing_keys(table)?;
    let mut filter = filter.clone();
    for fk in keys.iter().filter(|fk| fk.table == table) {
        filter = self_closure(table, fk, &filter);
    }
    let filter = &filter;
    for fk in keys.iter().filter(|fk| fk.table != table) {
        if path.contains(&fk.table) {
            continue;
        }
        let target = if fk.columns.len() == 1 {
            fk.columns[0].clone()
        } else {
            format!("({})", fk.columns.join(", "))
        };
        let child_filter = Query::new(
            format!(
                " WHERE {target} IN (SELECT {} FROM {table}{})",
                fk.foreign_columns.join(", "),
                filter.sql
            ),
            filter.params.clone(),
        );
        path.push(fk.table.clone());
        destroy_into(schema, &fk.table, &child_filter, path, out)?;
        path.pop();
    }
    out.push(Query::new(
        format!("DELETE FROM {table}{}", filter.sql),
        filter.params.clone(),
    ));
    Ok(())
}

/// Widen `filter` to the rows it selects plus every row reaching them through
/// the self-referencing key `fk`, at any depth.
fn self_closure(table: &str, fk: &ForeignKey, filter: &Query) -> Query {
    let keys = fk.foreign_columns.join(", ");
    let child_keys = fk
        .foreign_columns
        .iter()
        .map(|c| format!("c.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let on = fk
        .columns
        .iter()
        .zip(&fk.foreign_columns)
        .map(|(col, key)| format!("c.{col} = tree.{key}"))
        .collect::<Vec<_>>()
        .join(" AND ");
    let target = if fk.foreign_columns.len() == 1 {
        keys.clone()
    } else {
        format!("({keys})")
    };
    Query::new(
        format!(
            " WHERE {target} IN (WITH RECURSIVE tree ({keys}) AS (SELECT {keys} FROM {table}{} \
             UNION SELECT {child_keys} FROM {table} c JOIN tree ON {on}) SELECT {keys} FROM tree)",
            filter.sql
        ),
        filter.params.clone(),
    )
}

/// Existence probe plus update/insert for one row keyed by its primary key.
pub fn upsert(schema: &Schema, table: &str, row: &Row, filter: bool) -> DbmlResult<UpsertPlan> {
    let meta = table_meta(schema, table)?;
    let pk = primary_key_of(&meta)?;
    let entries = columns_of(&meta, row, filter)?;

    let mut key = Conditions::new();
    for column in pk {
        let value = entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| {
                DbmlError::invalid(format!(
                    "upsert into '{}' needs primary key column '{column}'",
                    meta.name
                ))
            })?;
        key.push_keyed(column.clone(), value);
    }

    let mut params = Vec::new();
    let where_sql = where_clause(schema, &meta, &key, &mut params)?;
    let exists = Query::new(
        format!("SELECT EXISTS (SELECT 1 FROM {}{where_sql}) AS found", meta.name),
        params,
    );

    let mut changes = Row::new();
    for (column, value) in entries.iter().filter(|(c, _)| !pk.contains(c)) {
        changes.push(column.clone(), value.clone());
    }
    let update = if changes.is_empty() {
        None
    } else {
        Some(update(schema, &meta.name, &changes, &key, false)?)
    };
    let insert = insert(schema, &meta.name, std::slice::from_ref(row), filter)?;
    Ok(UpsertPlan {
        exists,
        update,
        insert,
    })
}

/// `INSERT ... ON CONFLICT (pk) DO UPDATE SET c = EXCLUDED.c`
pub fn modify(schema: &Schema, table: &str, rows: &[Row], filter: bool) -> DbmlResult<Query> {
    let meta = table_meta(schema, table)?;
    let pk = primary_key_of(&meta)?;
    let (columns, values) = batch_columns(&meta, rows, filter)?;
    let mut params = Vec::new();
    let values = values_clause(values, &mut params);

    let updates: Vec<String> = columns
        .iter()
        .filter(|c| !pk.contains(c))
        .map(|c| format!("{c} = EXCLUDED.{c}"))
        .collect();
    let action = if updates.is_empty() {
        "DO NOTHING".to_string()
    } else {
        format!("DO UPDATE SET {}", updates.join(", "))
    };
    Ok(Query::new(
        format!(
            "INSERT INTO {} ({}) VALUES {values} ON CONFLICT ({}) {action}",
            meta.name,
            columns.join(", "),
            pk.join(", ")
        ),
        params,
    ))
}

/// Copy the rows matching `conds`, replacing the columns in `overrides`.
///
/// The auto-increment column is left out unless overridden so the copy gets
/// a fresh key.
pub fn duplicate(
    schema: &Schema,
    table: &str,
    overrides: &Row,
    conds: &Conditions,
) -> DbmlResult<Query> {
    let meta = table_meta(schema, table)?;
    for column in overrides.columns() {
        if !meta.has_column(column) {
            return Err(DbmlError::not_found(format!(
                "column '{column}' does not exist in '{}'",
                meta.name
            )));
        }
    }

    let mut columns = Vec::new();
    let mut select = Vec::new();
    let mut params = Vec::new();
    for column in &meta.columns {
        match overrides.get(&column.name) {
            Some(value) => {
                params.push(value.clone());
                select.push("?".to_string());
            }
            None if column.auto_increment => continue,
            None => select.push(column.name.clone()),
        }
        columns.push(column.name.clone());
    }
    let where_sql = where_clause(schema, &meta, conds, &mut params)?;
    Ok(Query::new(
        format!(
            "INSERT INTO {name} ({}) SELECT {} FROM {name}{where_sql}",
            columns.join(", "),
            select.join(", "),
            name = meta.name
        ),
        params,
    ))
}
