//! Condition trees and the `where_into` flattener.
//!
//! A [`Conditions`] value is an ordered list of entries, each with an optional
//! string key. Keys name a column, possibly with an operator suffix
//! (`id:IN`, `title:%LIKE%`, `created_at:[~]`), an optional-prefix `!`, a `?`
//! template, a row-constructor tuple `(a, b)` or one of the grouping keywords
//! `AND`/`OR`/`NOT`. Entries without a key hold raw fragments or nested groups.
//!
//! Flattening runs in two steps: [`normalize`] turns entries into [`Node`]s,
//! then [`Node::render`] produces SQL and appends parameters in order.
//!
//! # Example
//!
//! ```ignore
//! use dbml::{cond, where_into, Conjunction, QueryContext};
//!
//! let conds = cond!["id" => 1, "title:%LIKE%" => "rust", [ "a" => 1, "b" => 2 ]];
//! let mut params = Vec::new();
//! let out = where_into(&conds, &mut params, Conjunction::Or, &QueryContext::new())?;
//! // ["id = ?", "title LIKE ?", "(a = ? OR b = ?)"]
//! ```

mod node;


pub use node::{Conjunction, Node};

use crate::anywhere::{self, Anywhere, AnywhereOverride};
use crate::error::{DbmlError, DbmlResult};
use crate::expr::{Expression, count_placeholders, split_placeholders};
use crate::schema::Schema;
use crate::select::SelectBuilder;
use crate::value::Value;
use chrono::NaiveDateTime;
use node::placeholders;
use std::fmt;
use std::sync::Arc;

/// Callback evaluated while flattening.
pub type CondFn = Arc<dyn Fn(&QueryContext<'_>) -> Cond + Send + Sync>;

/// One condition value.
#[derive(Clone)]
pub enum Cond {
    Value(Value),
    Array(Conditions),
    Closure(CondFn),
    Query(Box<SelectBuilder>),
    Expr(Expression),
    Anywhere(Anywhere),
}

impl Cond {
    pub fn closure<F>(f: F) -> Self
    where
        F: Fn(&QueryContext<'_>) -> Cond + Send + Sync + 'static,
    {
        Cond::Closure(Arc::new(f))
    }

    /// Null, empty string or empty list.
    fn is_empty_value(&self) -> bool {
        match self {
            Cond::Value(v) => v.is_blank(),
            Cond::Array(c) => c.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Debug for Cond {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cond::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Cond::Array(c) => f.debug_tuple("Array").field(c).finish(),
            Cond::Closure(_) => f.write_str("Closure(..)"),
            Cond::Query(q) => f.debug_tuple("Query").field(q).finish(),
            Cond::Expr(e) => f.debug_tuple("Expr").field(e).finish(),
            Cond::Anywhere(a) => f.debug_tuple("Anywhere").field(a).finish(),
        }
    }
}

macro_rules! impl_cond_from_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Cond {
                fn from(v: $ty) -> Self {
                    Cond::Value(Value::from(v))
                }
            }
        )*
    };
}

impl_cond_from_scalar!(
    bool,
    i16,
    i32,
    i64,
    u32,
    f32,
    f64,
    String,
    &str,
    &String,
    serde_json::Value,
    NaiveDateTime,
);

impl From<Value> for Cond {
    fn from(v: Value) -> Self {
        Cond::Value(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Cond {
    fn from(v: Option<T>) -> Self {
        Cond::Value(v.map_or(Value::Null, Into::into))
    }
}

impl<T: Into<Cond>> From<Vec<T>> for Cond {
    fn from(items: Vec<T>) -> Self {
        Cond::Array(items.into_iter().collect())
    }
}

impl<T: Into<Cond>, const N: usize> From<[T; N]> for Cond {
    fn from(items: [T; N]) -> Self {
        Cond::Array(items.into_iter().collect())
    }
}

impl From<Conditions> for Cond {
    fn from(c: Conditions) -> Self {
        Cond::Array(c)
    }
}

impl From<Expression> for Cond {
    fn from(e: Expression) -> Self {
        Cond::Expr(e)
    }
}

impl From<SelectBuilder> for Cond {
    fn from(b: SelectBuilder) -> Self {
        Cond::Query(Box::new(b))
    }
}

impl From<Anywhere> for Cond {
    fn from(a: Anywhere) -> Self {
        Cond::Anywhere(a)
    }
}

/// A keyed or positional entry.
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: Option<String>,
    pub value: Cond,
}

/// Ordered condition list.
#[derive(Debug, Clone, Default)]
pub struct Conditions {
    entries: Vec<Entry>,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a positional entry.
    pub fn push(&mut self, value: impl Into<Cond>) -> &mut Self {
        self.entries.push(Entry {
            key: None,
            value: value.into(),
        });
        self
    }

    /// Append a keyed entry. Repeated keys are kept, in order.
    pub fn push_keyed(&mut self, key: impl Into<String>, value: impl Into<Cond>) -> &mut Self {
        self.entries.push(Entry {
            key: Some(key.into()),
            value: value.into(),
        });
        self
    }

    /// Builder-style [`Conditions::push_keyed`].
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Cond>) -> Self {
        self.push_keyed(key, value);
        self
    }

    pub fn extend(&mut self, other: Conditions) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entry> {
        self.entries.iter()
    }
}

impl<T: Into<Cond>> FromIterator<T> for Conditions {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut out = Conditions::new();
        for item in iter {
            out.push(item);
        }
        out
    }
}

/// Build [`Conditions`] inline: `cond!["id" => 1, "deleted_at IS NULL", ["a" => 1, "b" => 2]]`.
///
/// `key => value` pairs become keyed entries, bare expressions positional ones.
/// A bracketed list nests a group.
#[macro_export]
macro_rules! cond {
    (@entries $c:ident; ) => {};
    (@entries $c:ident; [$($inner:tt)*] $(, $($rest:tt)*)?) => {
        $c.push($crate::cond![$($inner)*]);
        $crate::cond!(@entries $c; $($($rest)*)?);
    };
    (@entries $c:ident; $k:expr => [$($inner:tt)*] $(, $($rest:tt)*)?) => {
        $c.push_keyed($k, $crate::cond![$($inner)*]);
        $crate::cond!(@entries $c; $($($rest)*)?);
    };
    (@entries $c:ident; $k:expr => $v:expr $(, $($rest:tt)*)?) => {
        $c.push_keyed($k, $v);
        $crate::cond!(@entries $c; $($($rest)*)?);
    };
    (@entries $c:ident; $v:expr $(, $($rest:tt)*)?) => {
        $c.push($v);
        $crate::cond!(@entries $c; $($($rest)*)?);
    };
    () => { $crate::Conditions::new() };
    ($($body:tt)+) => {{
        let mut __c = $crate::Conditions::new();
        $crate::cond!(@entries __c; $($body)+);
        __c
    }};
}

/// What a condition is evaluated against: the schema (for anywhere search and
/// sub-queries) and the `(alias, table)` pairs of the statement being built,
/// base table first.
#[derive(Clone, Default)]
pub struct QueryContext<'a> {
    pub schema: Option<&'a Schema>,
    pub tables: Vec<(String, String)>,
    pub anywhere: AnywhereOverride,
}

impl<'a> QueryContext<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: &'a Schema) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn with_table(mut self, alias: impl Into<String>, table: impl Into<String>) -> Self {
        self.tables.push((alias.into(), table.into()));
        self
    }

    /// `(alias, table)` of the base table.
    pub fn base(&self) -> Option<(&str, &str)> {
        self.tables.first().map(|(a, t)| (a.as_str(), t.as_str()))
    }

    /// Table behind `alias` (or a bare table name present in the statement).
    pub fn table_of(&self, alias: &str) -> Option<&str> {
        self.tables
            .iter()
            .find(|(a, t)| a == alias || t == alias)
            .map(|(_, t)| t.as_str())
    }
}

impl fmt::Debug for QueryContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("schema", &self.schema.is_some())
            .field("tables", &self.tables)
            .finish()
    }
}

/// Result of [`where_into`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereInto {
    /// Rendered top-level fragments, to be joined by the caller.
    pub fragments: Vec<String>,
    /// Whether an optional top-level entry was dropped.
    pub filtered: bool,
}

/// Flatten `conds` into SQL fragments, appending bound values to `params`.
///
/// Nested positional groups are joined with `conjunction` and their own
/// children with the flipped conjunction, one level at a time. The caller joins
/// the returned top-level fragments with `conjunction.flip()`; `where` clauses
/// pass [`Conjunction::Or`] so the top level reads as `AND`.
pub fn where_into(
    conds: &Conditions,
    params: &mut Vec<Value>,
    conjunction: Conjunction,
    ctx: &QueryContext<'_>,
) -> DbmlResult<WhereInto> {
    let mut filtered = false;
    let nodes = normalize_into(conds, conjunction, ctx, Some(&mut filtered))?;
    let fragments = nodes.iter().map(|node| node.render(params)).collect();
    Ok(WhereInto {
        fragments,
        filtered,
    })
}

/// Normalize `conds` into nodes without rendering them.
pub fn normalize(
    conds: &Conditions,
    conjunction: Conjunction,
    ctx: &QueryContext<'_>,
) -> DbmlResult<Vec<Node>> {
    normalize_into(conds, conjunction, ctx, None)
}

/// Render conditions as one `AND`-joined predicate, or `None` when nothing remains.
pub(crate) fn render_predicate(
    conds: &Conditions,
    params: &mut Vec<Value>,
    ctx: &QueryContext<'_>,
) -> DbmlResult<Option<String>> {
    let out = where_into(conds, params, Conjunction::Or, ctx)?;
    Ok((!out.fragments.is_empty()).then(|| out.fragments.join(" AND ")))
}

fn normalize_into(
    conds: &Conditions,
    conjunction: Conjunction,
    ctx: &QueryContext<'_>,
    mut filtered: Option<&mut bool>,
) -> DbmlResult<Vec<Node>> {
    let mut out = Vec::with_capacity(conds.len());
    for entry in conds.iter() {
        match &entry.key {
            None => positional(&entry.value, conjunction, ctx, &mut out)?,
            Some(key) => {
                if let Some(node) = keyed(key, &entry.value, conjunction, ctx)? {
                    out.push(node);
                } else if let Some(flag) = filtered.as_deref_mut() {
                    *flag = true;
                }
            }
        }
    }
    Ok(out)
}

fn resolve_closure(value: &Cond, ctx: &QueryContext<'_>) -> Cond {
    let mut value = value.clone();
    while let Cond::Closure(f) = &value {
        value = f(ctx);
    }
    value
}

fn positional(
    value: &Cond,
    conjunction: Conjunction,
    ctx: &QueryContext<'_>,
    out: &mut Vec<Node>,
) -> DbmlResult<()> {
    match value {
        Cond::Value(Value::Null) => {}
        Cond::Value(Value::Text(sql)) if sql.trim().is_empty() => {}
        Cond::Value(Value::Text(sql)) => out.push(Node::Literal(sql.clone())),
        Cond::Value(other) => out.push(Node::Literal(other.to_literal())),
        Cond::Array(inner) => {
            let children = normalize_into(inner, conjunction.flip(), ctx, None)?;
            if !children.is_empty() {
                out.push(Node::group(conjunction, children));
            }
        }
        Cond::Closure(_) => match resolve_closure(value, ctx) {
            // a returned list is spliced in place
            Cond::Array(inner) => out.extend(normalize_into(&inner, conjunction, ctx, None)?),
            resolved => positional(&resolved, conjunction, ctx, out)?,
        },
        Cond::Query(builder) => {
            let (sql, params) = builder.build()?.into_parts();
            out.push(Node::Template(Expression::new(format!("({sql})"), params)));
        }
        Cond::Expr(expr) => out.push(Node::Raw(expr.clone())),
        Cond::Anywhere(search) => {
            let (alias, _) = ctx
                .base()
                .ok_or_else(|| DbmlError::invalid("anywhere search needs a base table"))?;
            let alias = alias.to_string();
            out.push(anywhere::expand(ctx, &alias, search)?);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeKind {
    Raw,
    Contains,
    Prefix,
    Suffix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operator {
    Compare(&'static str),
    In,
    NotIn,
    Like(LikeKind, bool),
    Between,
}

impl Operator {
    fn parse(raw: &str) -> Option<Self> {
        let op = match raw.trim().to_ascii_uppercase().as_str() {
            "=" => Operator::Compare("="),
            "<>" => Operator::Compare("<>"),
            "!=" => Operator::Compare("!="),
            "<" => Operator::Compare("<"),
            "<=" => Operator::Compare("<="),
            ">" => Operator::Compare(">"),
            ">=" => Operator::Compare(">="),
            "IN" => Operator::In,
            "!IN" | "NOT IN" | "!" => Operator::NotIn,
            "LIKE" => Operator::Like(LikeKind::Raw, false),
            "NOT LIKE" | "!LIKE" => Operator::Like(LikeKind::Raw, true),
            "%LIKE%" => Operator::Like(LikeKind::Contains, false),
            "LIKE%" => Operator::Like(LikeKind::Prefix, false),
            "%LIKE" => Operator::Like(LikeKind::Suffix, false),
            "[~]" => Operator::Between,
            _ => return None,
        };
        Some(op)
    }

    fn sql(self) -> &'static str {
        match self {
            Operator::Compare(op) => op,
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::Like(_, false) => "LIKE",
            Operator::Like(_, true) => "NOT LIKE",
            Operator::Between => "BETWEEN",
        }
    }

    fn is_negative(self) -> bool {
        matches!(
            self,
            Operator::NotIn | Operator::Compare("<>") | Operator::Compare("!=")
        )
    }
}

/// Split `column:OP` on the last single colon. `::` casts are left alone.
fn split_operator(key: &str) -> DbmlResult<(&str, Option<Operator>)> {
    let bytes = key.as_bytes();
    let split = (1..bytes.len()).rev().find(|&i| {
        bytes[i] == b':' && bytes[i - 1] != b':' && bytes.get(i + 1) != Some(&b':')
    });
    let Some(i) = split else {
        return Ok((key, None));
    };
    let raw = &key[i + 1..];
    match Operator::parse(raw) {
        Some(op) => Ok((key[..i].trim_end(), Some(op))),
        None => Err(DbmlError::invalid(format!(
            "unknown operator '{raw}' in condition key '{key}'"
        ))),
    }
}

/// Escape LIKE wildcards in `raw`.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn like_pattern(kind: LikeKind, value: &Value) -> Value {
    let text = value.to_string();
    match kind {
        LikeKind::Raw => value.clone(),
        LikeKind::Contains => Value::Text(format!("%{}%", escape_like(&text))),
        LikeKind::Prefix => Value::Text(format!("{}%", escape_like(&text))),
        LikeKind::Suffix => Value::Text(format!("%{}", escape_like(&text))),
    }
}

fn scalars(list: &Conditions, key: &str) -> DbmlResult<Vec<Value>> {
    list.iter()
        .map(|entry| match &entry.value {
            Cond::Value(v) => Ok(v.clone()),
            other => Err(DbmlError::invalid(format!(
                "condition '{key}' expects scalar list elements, got {other:?}"
            ))),
        })
        .collect()
}

fn is_tuple_key(column: &str) -> bool {
    let column = column.trim();
    column.starts_with('(') && column.ends_with(')') && column.contains(',')
}

fn is_anywhere_key(column: &str) -> bool {
    column == "*" || column.ends_with(".*")
}

fn keyed(
    key: &str,
    value: &Cond,
    conjunction: Conjunction,
    ctx: &QueryContext<'_>,
) -> DbmlResult<Option<Node>> {
    let grouping = key.trim().to_ascii_uppercase();
    if matches!(grouping.as_str(), "AND" | "OR" | "NOT") {
        let value = resolve_closure(value, ctx);
        let Cond::Array(inner) = &value else {
            return Err(DbmlError::invalid(format!("'{key}' expects a nested condition list")));
        };
        let node = match grouping.as_str() {
            "NOT" => {
                let children = normalize_into(inner, conjunction, ctx, None)?;
                (!children.is_empty())
                    .then(|| Node::Not(Box::new(Node::group(conjunction.flip(), children))))
            }
            pinned => {
                let pinned = if pinned == "AND" {
                    Conjunction::And
                } else {
                    Conjunction::Or
                };
                let children = normalize_into(inner, pinned.flip(), ctx, None)?;
                (!children.is_empty()).then(|| Node::group(pinned, children))
            }
        };
        return Ok(node);
    }

    let (key, optional) = match key.strip_prefix('!') {
        Some(rest) if !rest.is_empty() && !rest.starts_with('=') => (rest, true),
        _ => (key, false),
    };
    let value = resolve_closure(value, ctx);
    if optional && value.is_empty_value() {
        return Ok(None);
    }

    if count_placeholders(key) > 0 {
        return fill_template(key, &value).map(Some);
    }

    let (column, op) = split_operator(key)?;

    if is_anywhere_key(column) {
        let alias = match column.strip_suffix(".*") {
            Some(alias) => alias.to_string(),
            None => ctx
                .base()
                .map(|(alias, _)| alias.to_string())
                .ok_or_else(|| DbmlError::invalid("anywhere search needs a base table"))?,
        };
        let search = match value {
            Cond::Value(Value::Text(keyword)) => Anywhere::new(keyword),
            Cond::Anywhere(search) => search,
            other => {
                return Err(DbmlError::invalid(format!(
                    "anywhere key '{key}' expects a keyword, got {other:?}"
                )));
            }
        };
        return anywhere::expand(ctx, &alias, &search).map(Some);
    }

    if is_tuple_key(column) {
        return row_tuple(column, op, &value).map(Some);
    }

    match value {
        Cond::Value(v) => scalar(column, op, v).map(Some),
        Cond::Array(list) => list_condition(column, op, &list).map(Some),
        Cond::Query(builder) => {
            let (sql, params) = builder.build()?.into_parts();
            let sql = match op {
                None | Some(Operator::In) => format!("{column} IN ({sql})"),
                Some(Operator::NotIn) => format!("NOT ({column} IN ({sql}))"),
                Some(Operator::Compare(cmp)) => format!("{column} {cmp} ({sql})"),
                Some(other) => {
                    return Err(DbmlError::invalid(format!(
                        "operator {} cannot take a sub-query in '{key}'",
                        other.sql()
                    )));
                }
            };
            Ok(Some(Node::Template(Expression::new(sql, params))))
        }
        Cond::Expr(expr) => {
            let cmp = match op {
                None => "=",
                Some(Operator::Compare(cmp)) => cmp,
                Some(other) => other.sql(),
            };
            let (sql, params) = expr.into_parts();
            Ok(Some(Node::Template(Expression::new(
                format!("{column} {cmp} {sql}"),
                params,
            ))))
        }
        Cond::Anywhere(_) => Err(DbmlError::invalid(format!(
            "anywhere search must use a '*' key, got '{key}'"
        ))),
        Cond::Closure(_) => unreachable!("closures are resolved above"),
    }
}

fn scalar(column: &str, op: Option<Operator>, value: Value) -> DbmlResult<Node> {
    let column = column.to_string();
    if value.is_null() {
        return match op {
            None | Some(Operator::Compare("=")) | Some(Operator::In) => Ok(Node::IsNull {
                column,
                negated: false,
            }),
            Some(op) if op.is_negative() => Ok(Node::IsNull {
                column,
                negated: true,
            }),
            Some(op) => Err(DbmlError::invalid(format!(
                "operator {} cannot compare '{column}' with NULL",
                op.sql()
            ))),
        };
    }
    let node = match op {
        None => Node::Compare {
            column,
            op: "=".to_string(),
            value,
        },
        Some(Operator::Compare(cmp)) => Node::Compare {
            column,
            op: cmp.to_string(),
            value,
        },
        Some(Operator::In) => Node::In {
            column,
            values: vec![value],
            negated: false,
        },
        Some(Operator::NotIn) => Node::In {
            column,
            values: vec![value],
            negated: true,
        },
        Some(Operator::Like(kind, negated)) => Node::Like {
            column,
            pattern: like_pattern(kind, &value),
            negated,
        },
        Some(Operator::Between) => {
            return Err(DbmlError::invalid(format!(
                "range condition on '{column}' expects [low, high]"
            )));
        }
    };
    Ok(node)
}

fn list_condition(column: &str, op: Option<Operator>, list: &Conditions) -> DbmlResult<Node> {
    let values = scalars(list, column)?;
    let column = column.to_string();
    match op {
        None | Some(Operator::In) | Some(Operator::Compare("=")) => Ok(Node::In {
            column,
            values,
            negated: false,
        }),
        Some(op) if op.is_negative() => Ok(Node::In {
            column,
            values,
            negated: true,
        }),
        Some(Operator::Like(kind, negated)) => {
            let children = values
                .iter()
                .map(|v| Node::Like {
                    column: column.clone(),
                    pattern: like_pattern(kind, v),
                    negated,
                })
                .collect();
            let conj = if negated {
                Conjunction::And
            } else {
                Conjunction::Or
            };
            Ok(Node::group(conj, children))
        }
        Some(Operator::Between) => {
            let mut bounds = values.into_iter();
            let (Some(low), Some(high), None) = (bounds.next(), bounds.next(), bounds.next()) else {
                return Err(DbmlError::invalid(format!(
                    "range condition on '{column}' expects exactly two bounds"
                )));
            };
            let low = (!low.is_null()).then_some(low);
            let high = (!high.is_null()).then_some(high);
            if low.is_none() && high.is_none() {
                return Ok(Node::Literal("TRUE".to_string()));
            }
            Ok(Node::Between { column, low, high })
        }
        Some(op) => Err(DbmlError::invalid(format!(
            "operator {} cannot take a list for '{column}'",
            op.sql()
        ))),
    }
}

fn row_tuple(columns: &str, op: Option<Operator>, value: &Cond) -> DbmlResult<Node> {
    let arity = columns.matches(',').count() + 1;
    let negated = match op {
        None | Some(Operator::In) => false,
        Some(Operator::NotIn) => true,
        Some(other) => {
            return Err(DbmlError::invalid(format!(
                "operator {} is not supported on row tuple '{columns}'",
                other.sql()
            )));
        }
    };
    let node = match value {
        Cond::Array(rows) => {
            let rows = rows
                .iter()
                .map(|entry| match &entry.value {
                    Cond::Array(row) => {
                        let row = scalars(row, columns)?;
                        if row.len() != arity {
                            return Err(DbmlError::invalid(format!(
                                "row tuple '{columns}' expects {arity} values per row, got {}",
                                row.len()
                            )));
                        }
                        Ok(row)
                    }
                    other => Err(DbmlError::invalid(format!(
                        "row tuple '{columns}' expects rows, got {other:?}"
                    ))),
                })
                .collect::<DbmlResult<Vec<_>>>()?;
            Node::RowTuple {
                columns: columns.to_string(),
                arity,
                rows,
            }
        }
        Cond::Query(builder) => {
            let (sql, params) = builder.build()?.into_parts();
            Node::Template(Expression::new(format!("{columns} IN ({sql})"), params))
        }
        other => {
            return Err(DbmlError::invalid(format!(
                "row tuple '{columns}' expects a list of rows, got {other:?}"
            )));
        }
    };
    Ok(if negated { Node::Not(Box::new(node)) } else { node })
}

/// One filled `?` slot.
enum Slot {
    One(Value),
    List(Vec<Value>),
    Sub(String, Vec<Value>),
    Expr(Expression),
}

fn slot_of(value: &Cond, key: &str) -> DbmlResult<Slot> {
    Ok(match value {
        Cond::Value(v) => Slot::One(v.clone()),
        Cond::Array(list) => Slot::List(scalars(list, key)?),
        Cond::Query(builder) => {
            let (sql, params) = builder.build()?.into_parts();
            Slot::Sub(sql, params)
        }
        Cond::Expr(e) => Slot::Expr(e.clone()),
        other => {
            return Err(DbmlError::invalid(format!(
                "cannot bind {other:?} into template '{key}'"
            )));
        }
    })
}

fn fill_template(key: &str, value: &Cond) -> DbmlResult<Node> {
    let segments = split_placeholders(key);
    let wanted = segments.len() - 1;
    let slots: Vec<Slot> = match value {
        Cond::Array(list) if wanted == 1 && list.len() != 1 => vec![Slot::List(scalars(list, key)?)],
        Cond::Array(list) => list
            .iter()
            .map(|entry| slot_of(&entry.value, key))
            .collect::<DbmlResult<_>>()?,
        single => vec![slot_of(single, key)?],
    };
    if slots.len() != wanted {
        return Err(DbmlError::invalid(format!(
            "template '{key}' has {wanted} placeholder(s) but {} value(s) were given",
            slots.len()
        )));
    }

    let mut sql = segments[0].clone();
    let mut params = Vec::new();
    for (slot, next) in slots.into_iter().zip(&segments[1..]) {
        match slot {
            Slot::One(v) => {
                sql.push('?');
                params.push(v);
            }
            Slot::List(values) if values.is_empty() => sql.push_str("NULL"),
            Slot::List(values) => {
                sql.push_str(&placeholders(values.len()));
                params.extend(values);
            }
            Slot::Sub(sub, sub_params) => {
                if sql.trim_end().ends_with('(') && next.trim_start().starts_with(')') {
                    sql.push_str(&sub);
                } else {
                    sql.push_str(&format!("({sub})"));
                }
                params.extend(sub_params);
            }
            Slot::Expr(expr) => {
                let (expr_sql, expr_params) = expr.into_parts();
                sql.push_str(&expr_sql);
                params.extend(expr_params);
            }
        }
        sql.push_str(next);
    }
    Ok(Node::Template(Expression::new(sql, params)))
}
