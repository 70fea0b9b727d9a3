//! PostgreSQL catalog introspection.

use super::{ColumnMeta, DbSchema, ForeignKey, IndexMeta, RelationKind, TableMeta};
use crate::client::Connection;
use crate::error::{DbmlError, DbmlResult};
use crate::value::{Row, Value};
use std::collections::BTreeMap;

const TABLES_SQL: &str = r#"
SELECT
  c.relname AS table_name,
  c.relkind::text AS relkind,
  obj_description(c.oid, 'pg_class') AS comment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
  AND n.nspname = ANY(string_to_array($1, ','))
ORDER BY c.relname
"#;

const COLUMNS_SQL: &str = r#"
SELECT
  c.relname AS table_name,
  a.attname AS column_name,
  pg_catalog.format_type(a.atttypid, a.atttypmod) AS data_type,
  a.attnotnull AS not_null,
  pg_get_expr(ad.adbin, ad.adrelid) AS default_expr,
  (a.attidentity <> '' OR COALESCE(pg_get_expr(ad.adbin, ad.adrelid), '') LIKE 'nextval(%') AS auto_increment,
  col_description(c.oid, a.attnum) AS comment
FROM pg_catalog.pg_class c
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid
LEFT JOIN pg_catalog.pg_attrdef ad ON ad.adrelid = c.oid AND ad.adnum = a.attnum
WHERE c.relkind IN ('r', 'p', 'v', 'm', 'f')
  AND a.attnum > 0
  AND NOT a.attisdropped
  AND n.nspname = ANY(string_to_array($1, ','))
ORDER BY c.relname, a.attnum
"#;

const INDEXES_SQL: &str = r#"
SELECT
  c.relname AS table_name,
  i.relname AS index_name,
  ix.indisunique AS is_unique,
  ix.indisprimary AS is_primary,
  array_to_string(ARRAY(
    SELECT a.attname
    FROM unnest(ix.indkey::int2[]) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = c.oid AND a.attnum = k.attnum
    ORDER BY k.ord
  ), ',') AS columns
FROM pg_catalog.pg_index ix
JOIN pg_catalog.pg_class c ON c.oid = ix.indrelid
JOIN pg_catalog.pg_class i ON i.oid = ix.indexrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE n.nspname = ANY(string_to_array($1, ','))
ORDER BY c.relname, i.relname
"#;

const FOREIGN_KEYS_SQL: &str = r#"
SELECT
  con.conname AS name,
  c.relname AS table_name,
  f.relname AS foreign_table,
  array_to_string(ARRAY(
    SELECT a.attname
    FROM unnest(con.conkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = con.conrelid AND a.attnum = k.attnum
    ORDER BY k.ord
  ), ',') AS columns,
  array_to_string(ARRAY(
    SELECT a.attname
    FROM unnest(con.confkey) WITH ORDINALITY AS k(attnum, ord)
    JOIN pg_catalog.pg_attribute a ON a.attrelid = con.confrelid AND a.attnum = k.attnum
    ORDER BY k.ord
  ), ',') AS foreign_columns
FROM pg_catalog.pg_constraint con
JOIN pg_catalog.pg_class c ON c.oid = con.conrelid
JOIN pg_catalog.pg_class f ON f.oid = con.confrelid
JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
WHERE con.contype = 'f'
  AND n.nspname = ANY(string_to_array($1, ','))
ORDER BY c.relname, con.conname
"#;

fn text(row: &Row, column: &str) -> DbmlResult<String> {
    match row.try_get(column)? {
        Value::Text(s) => Ok(s.clone()),
        other => Err(DbmlError::decode(column, format!("expected text, got {other:?}"))),
    }
}

fn opt_text(row: &Row, column: &str) -> DbmlResult<Option<String>> {
    match row.try_get(column)? {
        Value::Null => Ok(None),
        _ => text(row, column).map(Some),
    }
}

fn flag(row: &Row, column: &str) -> DbmlResult<bool> {
    match row.try_get(column)? {
        Value::Bool(b) => Ok(*b),
        Value::Null => Ok(false),
        other => Err(DbmlError::decode(column, format!("expected bool, got {other:?}"))),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Read tables, columns, indexes and foreign keys of `schemas` into a snapshot.
pub async fn load_schema<C: Connection>(conn: &C, schemas: &[String]) -> DbmlResult<DbSchema> {
    let param = [Value::Text(schemas.join(","))];

    let mut tables: BTreeMap<String, TableMeta> = BTreeMap::new();
    for row in conn.query_sql(TABLES_SQL, &param).await? {
        let name = text(&row, "table_name")?;
        let mut meta = TableMeta::new(name.clone());
        meta.kind = RelationKind::from_relkind(&text(&row, "relkind")?);
        meta.comment = opt_text(&row, "comment")?;
        tables.insert(name, meta);
    }

    for row in conn.query_sql(COLUMNS_SQL, &param).await? {
        let Some(table) = tables.get_mut(&text(&row, "table_name")?) else {
            continue;
        };
        table.columns.push(ColumnMeta {
            name: text(&row, "column_name")?,
            data_type: text(&row, "data_type")?,
            nullable: !flag(&row, "not_null")?,
            default: opt_text(&row, "default_expr")?,
            auto_increment: flag(&row, "auto_increment")?,
            comment: opt_text(&row, "comment")?,
        });
    }

    for row in conn.query_sql(INDEXES_SQL, &param).await? {
        let Some(table) = tables.get_mut(&text(&row, "table_name")?) else {
            continue;
        };
        let index = IndexMeta {
            name: text(&row, "index_name")?,
            columns: split_list(&text(&row, "columns")?),
            unique: flag(&row, "is_unique")?,
            primary: flag(&row, "is_primary")?,
        };
        if index.primary {
            table.primary_key = index.columns.clone();
        }
        table.indexes.push(index);
    }

    for row in conn.query_sql(FOREIGN_KEYS_SQL, &param).await? {
        let Some(table) = tables.get_mut(&text(&row, "table_name")?) else {
            continue;
        };
        table.foreign_keys.push(ForeignKey {
            name: text(&row, "name")?,
            table: table.name.clone(),
            columns: split_list(&text(&row, "columns")?),
            foreign_table: text(&row, "foreign_table")?,
            foreign_columns: split_list(&text(&row, "foreign_columns")?),
        });
    }

    tracing::debug!(target: "dbml.schema", tables = tables.len(), schemas = %schemas.join(","), "schema introspected");

    Ok(DbSchema {
        schemas: schemas.to_vec(),
        tables: tables.into_values().collect(),
    })
}
