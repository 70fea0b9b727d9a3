//! Named scopes: reusable query fragments attached to a table.
//!
//! A descriptor invokes them with `@name(args)`; `@` alone is the default
//! scope, registered under the empty name.

use crate::condition::{Cond, Conditions};
use crate::error::{DbmlError, DbmlResult};
use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Fragments a scope contributes to a SELECT.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    pub columns: Vec<String>,
    pub conditions: Conditions,
    pub order: Vec<String>,
    pub group: Vec<String>,
    pub having: Conditions,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    pub fn where_(mut self, key: impl Into<String>, value: impl Into<Cond>) -> Self {
        self.conditions.push_keyed(key, value);
        self
    }

    /// Positional condition (raw fragment or nested group).
    pub fn where_raw(mut self, value: impl Into<Cond>) -> Self {
        self.conditions.push(value);
        self
    }

    pub fn order_by(mut self, term: impl Into<String>) -> Self {
        self.order.push(term.into());
        self
    }

    pub fn group_by(mut self, column: impl Into<String>) -> Self {
        self.group.push(column.into());
        self
    }

    pub fn having(mut self, key: impl Into<String>, value: impl Into<Cond>) -> Self {
        self.having.push_keyed(key, value);
        self
    }

    pub fn limit(mut self, offset: Option<u64>, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Fold `other` into `self`; its range wins when set.
    pub fn merge(&mut self, other: Scope) {
        self.columns.extend(other.columns);
        self.conditions.extend(other.conditions);
        self.order.extend(other.order);
        self.group.extend(other.group);
        self.having.extend(other.having);
        if other.limit.is_some() {
            self.offset = other.offset;
            self.limit = other.limit;
        }
    }
}

type ScopeFn = Arc<dyn Fn(&[Value]) -> DbmlResult<Scope> + Send + Sync>;

#[derive(Clone)]
enum ScopeDef {
    Static(Scope),
    Dynamic(ScopeFn),
}

/// Scopes keyed by `(table, name)`.
#[derive(Clone, Default)]
pub struct ScopeRegistry {
    scopes: HashMap<(String, String), ScopeDef>,
}

impl fmt::Debug for ScopeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<String> = self.scopes.keys().map(|(t, n)| format!("{t}@{n}")).collect();
        names.sort();
        f.debug_struct("ScopeRegistry").field("scopes", &names).finish()
    }
}

impl ScopeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fixed scope; `name` may be empty for the default scope.
    pub fn add(&mut self, table: impl Into<String>, name: impl Into<String>, scope: Scope) -> &mut Self {
        self.scopes
            .insert((table.into(), name.into()), ScopeDef::Static(scope));
        self
    }

    /// Register a scope computed from its call arguments.
    pub fn add_fn<F>(&mut self, table: impl Into<String>, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&[Value]) -> DbmlResult<Scope> + Send + Sync + 'static,
    {
        self.scopes
            .insert((table.into(), name.into()), ScopeDef::Dynamic(Arc::new(f)));
        self
    }

    pub fn contains(&self, table: &str, name: &str) -> bool {
        self.scopes.contains_key(&(table.to_string(), name.to_string()))
    }

    /// Evaluate `table@name(args)`.
    pub fn get(&self, table: &str, name: &str, args: &[Value]) -> DbmlResult<Scope> {
        let def = self
            .scopes
            .get(&(table.to_string(), name.to_string()))
            .ok_or_else(|| {
                let shown = if name.is_empty() { "(default)" } else { name };
                DbmlError::not_found(format!("scope '{shown}' is not defined on '{table}'"))
            })?;
        match def {
            ScopeDef::Static(scope) if args.is_empty() => Ok(scope.clone()),
            ScopeDef::Static(_) => Err(DbmlError::invalid(format!(
                "scope '{name}' on '{table}' takes no arguments, got {}",
                args.len()
            ))),
            ScopeDef::Dynamic(f) => f(args),
        }
    }
}
