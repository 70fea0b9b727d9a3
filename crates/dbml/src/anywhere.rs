//! Free-text search across the columns of a table.
//!
//! Options come in layers that are merged key by key, later layers winning:
//! global configuration, table override, column override, then the overrides
//! carried by the request itself.

use crate::condition::{Conjunction, Node, QueryContext, escape_like};
use crate::error::{DbmlError, DbmlResult};
use crate::ident::qualify;
use crate::schema::ColumnKind;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A partial set of anywhere options; unset keys fall through to lower layers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnywhereOverride {
    pub enable: Option<bool>,
    pub greedy: Option<bool>,
    pub keyonly: Option<bool>,
    pub collate: Option<String>,
    pub like: Option<String>,
}

impl AnywhereOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(mut self, v: bool) -> Self {
        self.enable = Some(v);
        self
    }

    pub fn greedy(mut self, v: bool) -> Self {
        self.greedy = Some(v);
        self
    }

    pub fn keyonly(mut self, v: bool) -> Self {
        self.keyonly = Some(v);
        self
    }

    pub fn collate(mut self, v: impl Into<String>) -> Self {
        self.collate = Some(v.into());
        self
    }

    /// LIKE pattern; `{}` stands for the escaped keyword.
    pub fn like(mut self, v: impl Into<String>) -> Self {
        self.like = Some(v.into());
        self
    }

    /// Overwrite every key `upper` sets.
    pub fn merge(&mut self, upper: &AnywhereOverride) {
        if upper.enable.is_some() {
            self.enable = upper.enable;
        }
        if upper.greedy.is_some() {
            self.greedy = upper.greedy;
        }
        if upper.keyonly.is_some() {
            self.keyonly = upper.keyonly;
        }
        if upper.collate.is_some() {
            self.collate.clone_from(&upper.collate);
        }
        if upper.like.is_some() {
            self.like.clone_from(&upper.like);
        }
    }
}

/// Fully resolved options for one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnywhereOptions {
    pub enable: bool,
    /// Also search columns that are neither text nor numeric, cast to text.
    pub greedy: bool,
    /// Only search primary key, foreign key and indexed columns.
    pub keyonly: bool,
    pub collate: Option<String>,
    pub like: String,
}

impl Default for AnywhereOptions {
    fn default() -> Self {
        Self {
            enable: true,
            greedy: false,
            keyonly: false,
            collate: None,
            like: "%{}%".to_string(),
        }
    }
}

impl AnywhereOptions {
    /// Merge `layers` lowest first over the defaults.
    pub fn resolve<'a>(layers: impl IntoIterator<Item = &'a AnywhereOverride>) -> Self {
        let mut merged = AnywhereOverride::default();
        for layer in layers {
            merged.merge(layer);
        }
        let defaults = Self::default();
        Self {
            enable: merged.enable.unwrap_or(defaults.enable),
            greedy: merged.greedy.unwrap_or(defaults.greedy),
            keyonly: merged.keyonly.unwrap_or(defaults.keyonly),
            collate: merged.collate,
            like: merged.like.unwrap_or(defaults.like),
        }
    }
}

/// An anywhere search request.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Anywhere {
    pub keyword: String,
    /// Applies to every column.
    pub options: AnywhereOverride,
    /// Per-column request overrides.
    pub columns: BTreeMap<String, AnywhereOverride>,
}

impl Anywhere {
    pub fn new(keyword: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            ..Self::default()
        }
    }

    pub fn with_options(mut self, options: AnywhereOverride) -> Self {
        self.options = options;
        self
    }

    pub fn with_column(mut self, column: impl Into<String>, options: AnywhereOverride) -> Self {
        self.columns.insert(column.into(), options);
        self
    }
}

/// Expand a search over the table behind `alias` into an OR group.
pub(crate) fn expand(ctx: &QueryContext<'_>, alias: &str, search: &Anywhere) -> DbmlResult<Node> {
    let schema = ctx
        .schema
        .ok_or_else(|| DbmlError::invalid("anywhere search needs schema metadata"))?;
    let table = ctx
        .table_of(alias)
        .map(str::to_string)
        .ok_or_else(|| DbmlError::invalid(format!("anywhere search on unknown alias '{alias}'")))?;
    let meta = schema.table(&table)?;
    let keyword = search.keyword.as_str();
    let no_override = AnywhereOverride::default();

    let mut children = Vec::new();
    for column in &meta.columns {
        let (table_layer, column_layer) = schema.anywhere_overrides(&table, &column.name);
        let options = AnywhereOptions::resolve([
            &ctx.anywhere,
            table_layer.as_ref().unwrap_or(&no_override),
            column_layer.as_ref().unwrap_or(&no_override),
            &search.options,
            search.columns.get(&column.name).unwrap_or(&no_override),
        ]);
        if !options.enable || (options.keyonly && !meta.is_key_column(&column.name)) {
            continue;
        }

        let data_type = schema
            .column_type(&table, &column.name)?
            .unwrap_or_else(|| column.data_type.clone());
        let qualified = qualify(alias, &column.name);
        let collated = match &options.collate {
            Some(collation) => format!("{qualified} COLLATE \"{collation}\""),
            None => qualified.clone(),
        };
        let pattern = Value::Text(options.like.replace("{}", &escape_like(keyword)));

        match ColumnKind::of(&data_type) {
            ColumnKind::Text => children.push(Node::Like {
                column: collated,
                pattern,
                negated: false,
            }),
            ColumnKind::Numeric => {
                let number = Value::parse_literal(keyword);
                if matches!(number, Value::Int(_) | Value::Float(_)) {
                    children.push(Node::Compare {
                        column: qualified,
                        op: "=".to_string(),
                        value: number,
                    });
                }
            }
            ColumnKind::Other if options.greedy => children.push(Node::Like {
                column: format!("CAST({qualified} AS TEXT)"),
                pattern,
                negated: false,
            }),
            ColumnKind::Other => {}
        }
    }

    if children.is_empty() {
        return Ok(Node::Literal("FALSE".to_string()));
    }
    Ok(Node::group(Conjunction::Or, children))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, DbSchema, Schema, TableMeta};

    fn schema() -> Schema {
        Schema::new(
            DbSchema::new().with_table(
                TableMeta::new("t_article")
                    .column(ColumnMeta::new("id", "integer").auto_increment())
                    .column(ColumnMeta::new("title", "text"))
                    .column(ColumnMeta::new("created_at", "timestamp without time zone"))
                    .primary_key(["id"]),
            ),
        )
    }

    fn render(node: &Node) -> (String, Vec<Value>) {
        let mut params = Vec::new();
        (node.render(&mut params), params)
    }

    #[test]
    fn layers_merge_key_by_key() {
        let global = AnywhereOverride::new().greedy(true).like("{}%");
        let table = AnywhereOverride::new().collate("C");
        let request = AnywhereOverride::new().greedy(false);
        let merged = AnywhereOptions::resolve([&global, &table, &request]);
        assert!(!merged.greedy);
        assert_eq!(merged.like, "{}%");
        assert_eq!(merged.collate.as_deref(), Some("C"));
        assert!(merged.enable);
    }

    #[test]
    fn text_and_numeric_columns_are_searched() {
        let schema = schema();
        let ctx = QueryContext::new().with_schema(&schema).with_table("A", "t_article");
        let node = expand(&ctx, "A", &Anywhere::new("42")).unwrap();
        let (sql, params) = render(&node);
        assert_eq!(sql, "(A.id = ? OR A.title LIKE ?)");
        assert_eq!(params, vec![Value::Int(42), Value::from("%42%")]);
    }

    #[test]
    fn greedy_casts_other_columns_and_escapes_wildcards() {
        let schema = schema();
        let ctx = QueryContext::new().with_schema(&schema).with_table("A", "t_article");
        let search = Anywhere::new("50%").with_options(AnywhereOverride::new().greedy(true));
        let (sql, params) = render(&expand(&ctx, "A", &search).unwrap());
        assert_eq!(sql, "(A.title LIKE ? OR CAST(A.created_at AS TEXT) LIKE ?)");
        assert_eq!(params[0], Value::from("%50\\%%"));
    }

    #[test]
    fn column_override_can_disable_a_column() {
        let schema = schema();
        schema.set_column_anywhere("t_article", "title", AnywhereOverride::new().enable(false));
        let ctx = QueryContext::new().with_schema(&schema).with_table("A", "t_article");
        let (sql, _) = render(&expand(&ctx, "A", &Anywhere::new("rust")).unwrap());
        assert_eq!(sql, "FALSE");

        let search = Anywhere::new("rust").with_column("title", AnywhereOverride::new().enable(true));
        let (sql, _) = render(&expand(&ctx, "A", &search).unwrap());
        assert_eq!(sql, "A.title LIKE ?");
    }
}
