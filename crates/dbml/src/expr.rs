//! Raw SQL expressions and rendered queries.
//!
//! Everything the builders emit uses `?` positional placeholders. [`Expression`]
//! additionally accepts `:name` placeholders which are resolved to `?` once, at
//! construction, so named and positional binding end up in the same shape.
//! [`Query::to_numbered`] rewrites `?` into PostgreSQL's `$n` right before
//! execution.

use crate::error::{DbmlError, DbmlResult};
use crate::value::Value;
use std::collections::BTreeMap;
use std::fmt;

/// A raw SQL fragment with its own bound parameters, emitted verbatim.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Expression {
    sql: String,
    params: Vec<Value>,
}

impl Expression {
    /// Fragment with positional `?` placeholders.
    pub fn new<V: Into<Value>>(sql: impl Into<String>, params: impl IntoIterator<Item = V>) -> Self {
        Self {
            sql: sql.into(),
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Fragment without parameters.
    pub fn raw(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Fragment with `:name` placeholders resolved against `params`.
    ///
    /// `::type` casts and quoted text are left alone. A placeholder without a
    /// matching key is an argument error.
    pub fn named<K, V>(sql: &str, params: impl IntoIterator<Item = (K, V)>) -> DbmlResult<Self>
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let map: BTreeMap<String, Value> = params
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let chars: Vec<char> = sql.chars().collect();
        let mut out = String::with_capacity(sql.len());
        let mut bound = Vec::new();
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\'' || c == '"' {
                let end = skip_quoted(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
                continue;
            }
            if c == ':' && chars.get(i + 1) == Some(&':') {
                out.push_str("::");
                i += 2;
                continue;
            }
            if c == ':' && chars.get(i + 1).is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && (chars[end].is_ascii_alphanumeric() || chars[end] == '_') {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let value = map.get(&name).ok_or_else(|| {
                    DbmlError::invalid(format!(
                        "placeholder ':{name}' has no matching parameter in \"{sql}\""
                    ))
                })?;
                out.push('?');
                bound.push(value.clone());
                i = end;
                continue;
            }
            out.push(c);
            i += 1;
        }

        Ok(Self {
            sql: out,
            params: bound,
        })
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

impl From<Query> for Expression {
    fn from(query: Query) -> Self {
        Self {
            sql: query.sql,
            params: query.params,
        }
    }
}

/// Fully rendered SQL text plus its ordered parameters.
///
/// This is also the dry-run output format.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Query {
    pub fn new(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }

    /// Ensure the number of `?` placeholders matches the parameter count.
    pub fn check(&self) -> DbmlResult<()> {
        let expected = count_placeholders(&self.sql);
        if expected != self.params.len() {
            return Err(DbmlError::invalid(format!(
                "statement has {expected} placeholder(s) but {} parameter(s): {}",
                self.params.len(),
                self.sql
            )));
        }
        Ok(())
    }

    /// The SQL with `?` rewritten to `$1, $2, ...`.
    pub fn to_numbered(&self) -> String {
        let mut n = 0;
        let mut out = String::with_capacity(self.sql.len() + 8);
        for (i, segment) in split_placeholders(&self.sql).iter().enumerate() {
            if i > 0 {
                n += 1;
                out.push('$');
                out.push_str(&n.to_string());
            }
            out.push_str(segment);
        }
        out
    }

    /// The SQL with every parameter inlined as a literal (display only).
    pub fn to_inlined(&self) -> String {
        let mut out = String::with_capacity(self.sql.len());
        for (i, segment) in split_placeholders(&self.sql).iter().enumerate() {
            if i > 0 {
                let literal = self
                    .params
                    .get(i - 1)
                    .map_or_else(|| "?".to_string(), Value::to_literal);
                out.push_str(&literal);
            }
            out.push_str(segment);
        }
        out
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)
    }
}

/// Index just past the quoted run starting at `start` (`'...'` or `"..."`, doubled quotes escape).
fn skip_quoted(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

/// Split SQL on `?` placeholders that sit outside quoted text.
pub(crate) fn split_placeholders(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut segments = vec![String::new()];
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\'' | '"' => {
                let end = skip_quoted(&chars, i);
                segments
                    .last_mut()
                    .expect("segments is never empty")
                    .extend(&chars[i..end]);
                i = end;
            }
            '?' => {
                segments.push(String::new());
                i += 1;
            }
            c => {
                segments.last_mut().expect("segments is never empty").push(c);
                i += 1;
            }
        }
    }
    segments
}

/// Count `?` placeholders outside quoted text.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    split_placeholders(sql).len() - 1
}
