//! SELECT builder.
//!
//! Tables are given as descriptors (see [`crate::descriptor`]); joins take
//! their ON clause from explicit conditions and column maps, or else from the
//! schema's foreign keys, falling back to indirect relations.
//!
//! ```ignore
//! let query = SelectBuilder::new(schema)
//!     .table("t_article AS A.id,title")
//!     .table("+t_comment C.body")
//!     .where_("A.id", 1)
//!     .build()?;
//! // SELECT A.id, A.title, C.body FROM t_article A
//! //   INNER JOIN t_comment C ON C.article_id = A.id WHERE A.id = ?
//! ```

use crate::anywhere::AnywhereOverride;
use crate::condition::{Cond, Conditions, Conjunction, QueryContext, where_into};
use crate::descriptor::{JoinType, TableDescriptor};
use crate::error::{DbmlError, DbmlResult};
use crate::expr::{Expression, Query};
use crate::ident::qualify;
use crate::schema::{ForeignKey, Schema};
use crate::scope::{Scope, ScopeRegistry};
use crate::value::Value;
use std::sync::Arc;

/// A FROM-list or join source.
#[derive(Debug, Clone)]
pub enum TableSource {
    Text(String),
    Descriptor(TableDescriptor),
    /// Derived table `(SELECT ...) AS alias`.
    Query {
        builder: Box<SelectBuilder>,
        alias: String,
    },
}

impl From<&str> for TableSource {
    fn from(s: &str) -> Self {
        TableSource::Text(s.to_string())
    }
}

impl From<String> for TableSource {
    fn from(s: String) -> Self {
        TableSource::Text(s)
    }
}

impl From<TableDescriptor> for TableSource {
    fn from(d: TableDescriptor) -> Self {
        TableSource::Descriptor(d)
    }
}

#[derive(Debug, Clone)]
pub struct SelectBuilder {
    schema: Arc<Schema>,
    scopes: Arc<ScopeRegistry>,
    default_join: JoinType,
    anywhere: AnywhereOverride,
    sources: Vec<TableSource>,
    columns: Vec<String>,
    exprs: Vec<Expression>,
    distinct: bool,
    wheres: Conditions,
    group: Vec<String>,
    having: Conditions,
    order: Vec<String>,
    offset: Option<u64>,
    limit: Option<u64>,
}

enum Root {
    Table(TableDescriptor),
    Derived(String, Query),
}

#[derive(Default)]
struct Plan {
    select: Vec<String>,
    select_params: Vec<Value>,
    from: Vec<String>,
    from_params: Vec<Value>,
    wheres: Vec<String>,
    where_params: Vec<Value>,
    order: Vec<String>,
    group: Vec<String>,
    having: Conditions,
    offset: Option<u64>,
    limit: Option<u64>,
}

impl SelectBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            scopes: Arc::new(ScopeRegistry::new()),
            default_join: JoinType::Left,
            anywhere: AnywhereOverride::default(),
            sources: Vec::new(),
            columns: Vec::new(),
            exprs: Vec::new(),
            distinct: false,
            wheres: Conditions::new(),
            group: Vec::new(),
            having: Conditions::new(),
            order: Vec::new(),
            offset: None,
            limit: None,
        }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn with_scopes(mut self, scopes: Arc<ScopeRegistry>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Join type used for unsigned nested joins and unresolvable AUTO joins.
    pub fn default_join(mut self, join: JoinType) -> Self {
        self.default_join = join;
        self
    }

    /// Global anywhere options (lowest merge layer).
    pub fn anywhere_options(mut self, options: AnywhereOverride) -> Self {
        self.anywhere = options;
        self
    }

    /// Add a table descriptor. A signed descriptor joins the latest FROM entry.
    pub fn table(mut self, source: impl Into<TableSource>) -> Self {
        self.sources.push(source.into());
        self
    }

    /// Add a derived table.
    pub fn table_query(mut self, builder: SelectBuilder, alias: impl Into<String>) -> Self {
        self.sources.push(TableSource::Query {
            builder: Box::new(builder),
            alias: alias.into(),
        });
        self
    }

    /// Add a raw select-list column.
    pub fn column(mut self, column: impl Into<String>) -> Self {
        self.columns.push(column.into());
        self
    }

    /// Add a select-list expression with its own parameters.
    pub fn select(mut self, expr: Expression) -> Self {
        self.exprs.push(expr);
        self
    }

    pub fn distinct(mut self) -> Self {
        self.distinct = true;
        self
    }

    pub fn where_(mut self, key: impl Into<String>, value: impl Into<Cond>) -> Self {
        self.wheres.push_keyed(key, value);
        self
    }

    pub fn where_raw(mut self, value: impl Into<Cond>) -> Self {
        self.wheres.push(value);
        self
    }

    pub fn where_conds(mut self, conds: Conditions) -> Self {
        self.wheres.extend(conds);
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

    /// Raw ORDER BY term (`"A.id DESC"`).
    pub fn order_by(mut self, term: impl Into<String>) -> Self {
        self.order.push(term.into());
        self
    }

    pub fn limit(mut self, offset: Option<u64>, limit: u64) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Parsed and resolved FROM roots, signed descriptors attached to the latest FROM entry.
    fn roots(&self) -> DbmlResult<Vec<Root>> {
        let mut roots: Vec<Root> = Vec::new();
        for source in &self.sources {
            let desc = match source {
                TableSource::Text(text) => TableDescriptor::parse(text)?,
                TableSource::Descriptor(desc) => desc.clone(),
                TableSource::Query { builder, alias } => {
                    roots.push(Root::Derived(alias.clone(), builder.build()?));
                    continue;
                }
            };
            let desc = desc.resolve(&self.schema)?;
            if desc.join.is_some() {
                match roots.iter_mut().rev().find_map(|root| match root {
                    Root::Table(base) => Some(base),
                    Root::Derived(..) => None,
                }) {
                    Some(base) => base.children.push(desc),
                    None => {
                        return Err(DbmlError::invalid(format!(
                            "join '{}' has no base table to join against",
                            desc.key()
                        )));
                    }
                }
            } else {
                roots.push(Root::Table(desc));
            }
        }
        if roots.is_empty() {
            return Err(DbmlError::invalid("SELECT needs at least one table"));
        }
        Ok(roots)
    }

    fn context<'a>(&'a self, roots: &[Root]) -> QueryContext<'a> {
        fn collect(desc: &TableDescriptor, out: &mut Vec<(String, String)>) {
            out.push((desc.accessor().to_string(), desc.table.clone()));
            for child in &desc.children {
                collect(child, out);
            }
        }
        let mut tables = Vec::new();
        for root in roots {
            match root {
                Root::Table(desc) => collect(desc, &mut tables),
                Root::Derived(alias, _) => tables.push((alias.clone(), alias.clone())),
            }
        }
        QueryContext {
            schema: Some(self.schema.as_ref()),
            tables,
            anywhere: self.anywhere.clone(),
        }
    }

    fn scope_of(&self, desc: &TableDescriptor) -> DbmlResult<Scope> {
        let mut scope = Scope::new();
        for call in &desc.scopes {
            scope.merge(self.scopes.get(&desc.table, &call.name, &call.args)?);
        }
        Ok(scope)
    }

    /// `pk = ?`, `pk IN (...)` or a row tuple for the `table(1,2)` shorthand.
    fn primary_key_condition(&self, desc: &TableDescriptor, conds: &mut Conditions) -> DbmlResult<()> {
        if desc.primary_keys.is_empty() {
            return Ok(());
        }
        let meta = self.schema.table(&desc.table)?;
        let accessor = desc.accessor();
        match meta.primary_key.as_slice() {
            [] => Err(DbmlError::not_found(format!(
                "table '{}' has no primary key",
                desc.table
            ))),
            [column] => {
                let mut values = Vec::with_capacity(desc.primary_keys.len());
                for tuple in &desc.primary_keys {
                    match tuple.as_slice() {
                        [value] => values.push(value.clone()),
                        _ => {
                            return Err(DbmlError::invalid(format!(
                                "'{}' has a single-column primary key",
                                desc.table
                            )));
                        }
                    }
                }
                let key = qualify(accessor, column);
                match values.len() {
                    1 => conds.push_keyed(key, values.remove(0)),
                    _ => conds.push_keyed(key, values),
                };
                Ok(())
            }
            columns => {
                let key = format!(
                    "({})",
                    columns
                        .iter()
                        .map(|c| qualify(accessor, c))
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                let rows: Conditions = desc
                    .primary_keys
                    .iter()
                    .map(|tuple| tuple.iter().cloned().collect::<Conditions>())
                    .collect();
                conds.push_keyed(key, rows);
                Ok(())
            }
        }
    }

    /// Equalities from foreign keys or indirect relations, plus the effective join type.
    fn relation_on(
        &self,
        desc: &TableDescriptor,
        parent: &TableDescriptor,
        has_explicit: bool,
    ) -> DbmlResult<(Vec<String>, JoinType)> {
        let requested = desc.join.unwrap_or(self.default_join);
        let fallback = match self.default_join {
            JoinType::Auto => JoinType::Left,
            other => other,
        };
        let (alias, parent_alias) = (desc.accessor(), parent.accessor());

        let fk: Option<ForeignKey> = match (&desc.fkey, has_explicit) {
            (None, true) => None,
            (fkey, _) => self
                .schema
                .foreign_key_between(&desc.table, &parent.table, fkey.as_deref())?,
        };

        let Some(fk) = fk else {
            let mut on = Vec::new();
            if !has_explicit {
                for (column, parent_column) in self.schema.indirect_columns(&desc.table, &parent.table)? {
                    on.push(format!(
                        "{} = {}",
                        qualify(alias, &column),
                        qualify(parent_alias, &parent_column)
                    ));
                }
            }
            let join = if requested == JoinType::Auto { fallback } else { requested };
            return Ok((on, join));
        };

        let (columns, parent_columns) = fk.columns_from(&desc.table);
        let on = columns
            .iter()
            .zip(parent_columns)
            .map(|(c, p)| format!("{} = {}", qualify(alias, c), qualify(parent_alias, p)))
            .collect();

        let join = match requested {
            JoinType::Auto if fk.table == parent.table && fk.table != desc.table => {
                let meta = self.schema.table(&parent.table)?;
                let required = fk
                    .columns
                    .iter()
                    .all(|c| meta.find_column(c).is_some_and(|col| !col.nullable));
                if required { JoinType::Inner } else { JoinType::Left }
            }
            JoinType::Auto => JoinType::Left,
            other => other,
        };
        Ok((on, join))
    }

    fn plan_table(
        &self,
        desc: &TableDescriptor,
        parent: Option<&TableDescriptor>,
        ctx: &QueryContext<'_>,
        plan: &mut Plan,
        segment: &mut String,
    ) -> DbmlResult<()> {
        let accessor = desc.accessor();
        let scope = self.scope_of(desc)?;

        for column in desc.columns.iter().chain(&scope.columns) {
            plan.select.push(qualify(accessor, column));
        }

        let mut conds = Conditions::new();
        for raw in &desc.conditions {
            conds.push(raw.as_str());
        }
        self.primary_key_condition(desc, &mut conds)?;
        conds.extend(scope.conditions);

        for item in &desc.order {
            let direction = if item.ascending { "ASC" } else { "DESC" };
            plan.order.push(format!("{} {direction}", qualify(accessor, &item.column)));
        }
        plan.order.extend(scope.order);
        plan.group.extend(scope.group);
        plan.having.extend(scope.having);
        if scope.limit.is_some() {
            plan.offset = scope.offset;
            plan.limit = scope.limit;
        }
        if desc.limit.is_some() {
            plan.offset = desc.offset;
            plan.limit = desc.limit;
        }

        let table_ref = match &desc.alias {
            Some(alias) => format!("{} {alias}", desc.table),
            None => desc.table.clone(),
        };

        match parent {
            None => {
                if !desc.column_maps.is_empty() {
                    return Err(DbmlError::invalid(format!(
                        "column map on '{}' needs a parent table",
                        desc.key()
                    )));
                }
                segment.push_str(&table_ref);
                let out = where_into(&conds, &mut plan.where_params, Conjunction::Or, ctx)?;
                plan.wheres.extend(out.fragments);
            }
            Some(parent) => {
                // column maps replace key lookup; `[cond]` and scope filters only add to it
                let has_explicit = !desc.column_maps.is_empty();
                let (mut on, join) = self.relation_on(desc, parent, has_explicit)?;
                for (column, parent_column) in &desc.column_maps {
                    on.push(format!(
                        "{} = {}",
                        qualify(accessor, column),
                        qualify(parent.accessor(), parent_column)
                    ));
                }
                let out = where_into(&conds, &mut plan.from_params, Conjunction::Or, ctx)?;
                on.extend(out.fragments);
                if on.is_empty() {
                    return Err(DbmlError::invalid(format!(
                        "no-condition join between '{}' and '{}'",
                        parent.table, desc.table
                    )));
                }
                segment.push_str(&format!(" {} {table_ref} ON {}", join.sql(), on.join(" AND ")));
            }
        }

        for child in &desc.children {
            self.plan_table(child, Some(desc), ctx, plan, segment)?;
        }
        Ok(())
    }

    /// Render the statement.
    pub fn build(&self) -> DbmlResult<Query> {
        let roots = self.roots()?;
        let ctx = self.context(&roots);
        let mut plan = Plan::default();

        for root in &roots {
            match root {
                Root::Table(desc) => {
                    let mut segment = String::new();
                    self.plan_table(desc, None, &ctx, &mut plan, &mut segment)?;
                    plan.from.push(segment);
                }
                Root::Derived(alias, query) => {
                    plan.from.push(format!("({}) AS {alias}", query.sql));
                    plan.from_params.extend(query.params.iter().cloned());
                }
            }
        }

        plan.select.extend(self.columns.iter().cloned());
        for expr in &self.exprs {
            plan.select.push(expr.sql().to_string());
            plan.select_params.extend(expr.params().iter().cloned());
        }
        if plan.select.is_empty() {
            plan.select.push("*".to_string());
        }

        let user = where_into(&self.wheres, &mut plan.where_params, Conjunction::Or, &ctx)?;
        plan.wheres.extend(user.fragments);
        plan.group.extend(self.group.iter().cloned());
        plan.having.extend(self.having.clone());
        plan.order.extend(self.order.iter().cloned());
        if self.limit.is_some() {
            plan.offset = self.offset;
            plan.limit = self.limit;
        }

        let mut having_params = Vec::new();
        let having = where_into(&plan.having, &mut having_params, Conjunction::Or, &ctx)?;

        let mut sql = String::from("SELECT ");
        if self.distinct {
            sql.push_str("DISTINCT ");
        }
        sql.push_str(&plan.select.join(", "));
        sql.push_str(" FROM ");
        sql.push_str(&plan.from.join(", "));
        if !plan.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&plan.wheres.join(" AND "));
        }
        if !plan.group.is_empty() {
            sql.push_str(" GROUP BY ");
            sql.push_str(&plan.group.join(", "));
        }
        if !having.fragments.is_empty() {
            sql.push_str(" HAVING ");
            sql.push_str(&having.fragments.join(" AND "));
        }
        if !plan.order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&plan.order.join(", "));
        }
        if let Some(limit) = plan.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = plan.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }

        let mut params = plan.select_params;
        params.extend(plan.from_params);
        params.extend(plan.where_params);
        params.extend(having_params);
        let query = Query::new(sql, params);
        query.check()?;
        Ok(query)
    }

    /// `SELECT COUNT(*)` over the same rows.
    pub fn build_count(&self) -> DbmlResult<Query> {
        let inner = self.build()?;
        Ok(Query::new(
            format!("SELECT COUNT(*) AS count FROM ({}) AS counted", inner.sql),
            inner.params,
        ))
    }

    /// `SELECT EXISTS (...)` over the same rows.
    pub fn build_exists(&self) -> DbmlResult<Query> {
        let inner = self.build()?;
        Ok(Query::new(
            format!("SELECT EXISTS ({}) AS found", inner.sql),
            inner.params,
        ))
    }
}

#[cfg(test)]
mod tests;
