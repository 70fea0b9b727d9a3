//! Table descriptor mini-language.
//!
//! A descriptor names a table and everything attached to it in one string:
//!
//! ```text
//! +t_article(1,2)@published(2024)[views > 10]{user_id: id}:fk_article_user+created_at-id#10-20 AS A.id,title
//! ```
//!
//! Modifier classes (`(pk)`, `@scope`, `[cond]`, `{map}`, `:fkey`, `+order`,
//! `#range`, alias, `.columns`) are scanned independently and may appear in
//! any order after the table name. [`TableDescriptor::key`] re-serializes them
//! in a fixed order, so permutations of the same modifiers share a key.

use crate::error::{DbmlError, DbmlResult};
use crate::ident::{is_plain, quote_ident};
use crate::schema::Schema;
use crate::value::Value;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    /// INNER when the local foreign-key columns are all NOT NULL, LEFT otherwise.
    Auto,
}

impl JoinType {
    pub fn from_sign(c: char) -> Option<Self> {
        match c {
            '+' => Some(Self::Inner),
            '<' => Some(Self::Left),
            '>' => Some(Self::Right),
            '~' => Some(Self::Auto),
            _ => None,
        }
    }

    pub fn sign(self) -> char {
        match self {
            Self::Inner => '+',
            Self::Left => '<',
            Self::Right => '>',
            Self::Auto => '~',
        }
    }

    /// `INNER JOIN` etc. [`JoinType::Auto`] must be resolved before rendering.
    pub fn sql(self) -> &'static str {
        match self {
            Self::Inner | Self::Auto => "INNER JOIN",
            Self::Left => "LEFT JOIN",
            Self::Right => "RIGHT JOIN",
        }
    }
}

/// `@name(args)`; the default scope has an empty name.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeCall {
    pub name: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderItem {
    pub column: String,
    pub ascending: bool,
}

/// A parsed table descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TableDescriptor {
    /// `None` for a FROM-list entry.
    pub join: Option<JoinType>,
    pub table: String,
    /// Qualifier written as `"schema"."table"`, checked by [`TableDescriptor::resolve`].
    pub schema: Option<String>,
    pub alias: Option<String>,
    /// Primary-key shorthand, one tuple per row.
    pub primary_keys: Vec<Vec<Value>>,
    pub scopes: Vec<ScopeCall>,
    /// Raw `[...]` fragments.
    pub conditions: Vec<String>,
    /// `{join_column: parent_column}` pairs.
    pub column_maps: Vec<(String, String)>,
    /// `Some("")` requires a foreign key without naming one.
    pub fkey: Option<String>,
    pub order: Vec<OrderItem>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub columns: Vec<String>,
    /// Tables joined against this one.
    pub children: Vec<TableDescriptor>,
}

impl TableDescriptor {
    pub fn parse(text: &str) -> DbmlResult<Self> {
        Scanner::new(text).descriptor()
    }

    /// Parse and replace the column list.
    pub fn with_columns<S: Into<String>>(
        text: &str,
        columns: impl IntoIterator<Item = S>,
    ) -> DbmlResult<Self> {
        let mut desc = Self::parse(text)?;
        desc.columns = columns.into_iter().map(Into::into).collect();
        Ok(desc)
    }

    /// Attach a nested join.
    pub fn join(mut self, child: TableDescriptor) -> Self {
        self.children.push(child);
        self
    }

    /// Alias when given, table name otherwise.
    pub fn accessor(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.table)
    }

    /// Canonical form: `sign table(pk) @scopes [conds] {maps} :fkey +order #range AS alias .cols`.
    pub fn key(&self) -> String {
        let mut out = String::new();
        if let Some(join) = self.join {
            out.push(join.sign());
        }
        match &self.schema {
            Some(schema) => out.push_str(&format!("{}.{}", quote_ident(schema), quote_ident(&self.table))),
            None => out.push_str(&self.table),
        }
        if !self.primary_keys.is_empty() {
            let tuples: Vec<String> = self
                .primary_keys
                .iter()
                .map(|tuple| match tuple.as_slice() {
                    [single] => single.to_literal(),
                    many => format!("({})", literals(many)),
                })
                .collect();
            out.push_str(&format!("({})", tuples.join(",")));
        }
        for scope in &self.scopes {
            out.push('@');
            out.push_str(&scope.name);
            if !scope.args.is_empty() {
                out.push_str(&format!("({})", literals(&scope.args)));
            }
        }
        if !self.conditions.is_empty() {
            out.push_str(&format!("[{}]", self.conditions.join(", ")));
        }
        if !self.column_maps.is_empty() {
            let maps: Vec<String> = self
                .column_maps
                .iter()
                .map(|(a, b)| format!("{a}: {b}"))
                .collect();
            out.push_str(&format!("{{{}}}", maps.join(", ")));
        }
        if let Some(fkey) = &self.fkey {
            out.push(':');
            out.push_str(fkey);
        }
        for item in &self.order {
            out.push(if item.ascending { '+' } else { '-' });
            out.push_str(&item.column);
        }
        match (self.offset, self.limit) {
            (Some(offset), Some(1)) => out.push_str(&format!("#{offset}")),
            (Some(offset), Some(limit)) => out.push_str(&format!("#{offset}-{}", offset + limit)),
            (None, Some(limit)) => out.push_str(&format!("#-{limit}")),
            _ => {}
        }
        if let Some(alias) = &self.alias {
            out.push_str(" AS ");
            out.push_str(alias);
        }
        if !self.columns.is_empty() {
            out.push('.');
            out.push_str(&self.columns.join(","));
        }
        out
    }

    /// Apply schema-dependent rules: `schema.table` qualifiers, table
    /// existence, and `**`/`***` relation expansion.
    pub fn resolve(&self, schema: &Schema) -> DbmlResult<Self> {
        let mut desc = self.clone();

        if let Some(qualifier) = desc.schema.take() {
            let quoted = format!("{}.{}", quote_ident(&qualifier), quote_ident(&desc.table));
            desc.table = schema.resolve_table_name(&quoted)?;
        }
        // `public.t_article` scans as table `public` with column `t_article`
        if !schema.has_table(&desc.table)? && desc.columns.len() == 1 && is_plain(&desc.columns[0]) {
            let qualified = format!("{}.{}", desc.table, desc.columns[0]);
            if schema.has_table(&desc.columns[0])? {
                desc.table = schema.resolve_table_name(&qualified)?;
                desc.columns.clear();
            }
        }
        schema.table(&desc.table)?;

        desc.children = desc
            .children
            .iter()
            .map(|child| child.resolve(schema))
            .collect::<DbmlResult<_>>()?;

        let recursive = desc.columns.iter().any(|c| c == "***");
        if recursive || desc.columns.iter().any(|c| c == "**") {
            for column in &mut desc.columns {
                if column.starts_with("**") {
                    *column = "*".to_string();
                }
            }
            desc.columns.dedup();
            let mut used: BTreeSet<String> = BTreeSet::from([desc.accessor().to_string()]);
            used.extend(desc.children.iter().map(|c| c.accessor().to_string()));
            let mut path = vec![desc.table.clone()];
            let expanded = relation_joins(schema, &desc.table, recursive, &mut path, &mut used)?;
            desc.children.extend(expanded);
        }
        Ok(desc)
    }
}

impl fmt::Display for TableDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

fn literals(values: &[Value]) -> String {
    values
        .iter()
        .map(Value::to_literal)
        .collect::<Vec<_>>()
        .join(",")
}

/// LEFT JOIN every table referenced by `table`'s foreign keys.
fn relation_joins(
    schema: &Schema,
    table: &str,
    recursive: bool,
    path: &mut Vec<String>,
    used: &mut BTreeSet<String>,
) -> DbmlResult<Vec<TableDescriptor>> {
    let mut out = Vec::new();
    for fk in schema.foreign_keys(table)? {
        if path.contains(&fk.foreign_table) {
            continue;
        }
        let alias = (!used.insert(fk.foreign_table.clone())).then(|| fk.name.clone());
        if let Some(alias) = &alias {
            used.insert(alias.clone());
        }
        let mut child = TableDescriptor {
            join: Some(JoinType::Left),
            table: fk.foreign_table.clone(),
            alias,
            fkey: Some(fk.name.clone()),
            columns: vec!["*".to_string()],
            ..TableDescriptor::default()
        };
        if recursive {
            path.push(fk.foreign_table.clone());
            child.children = relation_joins(schema, &fk.foreign_table, true, path, used)?;
            path.pop();
        }
        out.push(child);
    }
    Ok(out)
}

/// Split on commas outside quotes and brackets.
pub(crate) fn split_top_level(s: &str) -> Vec<String> {
    if s.trim().is_empty() {
        return Vec::new();
    }
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for c in s.chars() {
        match (quote, c) {
            (Some(q), c) if c == q => {
                quote = None;
                current.push(c);
            }
            (Some(_), c) => current.push(c),
            (None, '\'' | '"') => {
                quote = Some(c);
                current.push(c);
            }
            (None, '(' | '[' | '{') => {
                depth += 1;
                current.push(c);
            }
            (None, ')' | ']' | '}') => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            (None, ',') if depth == 0 => parts.push(std::mem::take(&mut current).trim().to_string()),
            (None, c) => current.push(c),
        }
    }
    parts.push(current.trim().to_string());
    parts
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

struct Scanner<'a> {
    src: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        let src = src.trim();
        Self {
            src,
            chars: src.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        self.pos += 1;
        c
    }

    fn eat_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn err(&self, message: impl fmt::Display) -> DbmlError {
        DbmlError::invalid(format!("{message} in descriptor '{}'", self.src))
    }

    fn word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(is_word_char) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn dotted_word(&mut self) -> String {
        let start = self.pos;
        while self.peek().is_some_and(|c| is_word_char(c) || c == '.') {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn quoted_ident(&mut self) -> DbmlResult<String> {
        self.bump();
        let mut name = String::new();
        loop {
            match self.bump() {
                Some('"') if self.peek() == Some('"') => {
                    self.bump();
                    name.push('"');
                }
                Some('"') => return Ok(name),
                Some(c) => name.push(c),
                None => return Err(self.err("unclosed quoted identifier")),
            }
        }
    }

    /// Content between `open` and its matching `close`; the cursor sits on `open`.
    fn balanced(&mut self, open: char, close: char) -> DbmlResult<String> {
        self.bump();
        let start = self.pos;
        let mut depth = 1usize;
        let mut quote: Option<char> = None;
        while let Some(c) = self.bump() {
            match quote {
                Some(q) if c == q => quote = None,
                Some(_) => {}
                None if c == '\'' || c == '"' => quote = Some(c),
                None if c == open => depth += 1,
                None if c == close => {
                    depth -= 1;
                    if depth == 0 {
                        return Ok(self.chars[start..self.pos - 1].iter().collect());
                    }
                }
                None => {}
            }
        }
        Err(self.err(format!("unclosed '{open}'")))
    }

    fn number(&mut self) -> DbmlResult<u64> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().map_err(|_| self.err("expected a number after '#'"))
    }

    fn column_list(&mut self) -> DbmlResult<Vec<String>> {
        let mut columns = Vec::new();
        loop {
            self.eat_ws();
            let column = if self.peek() == Some('*') {
                let start = self.pos;
                while self.peek() == Some('*') {
                    self.pos += 1;
                }
                self.chars[start..self.pos].iter().collect()
            } else {
                self.dotted_word()
            };
            if column.is_empty() {
                return Err(self.err("empty column name"));
            }
            columns.push(column);
            let before = self.pos;
            self.eat_ws();
            if self.peek() == Some(',') {
                self.bump();
            } else {
                self.pos = before;
                return Ok(columns);
            }
        }
    }

    fn primary_keys(&self, inner: &str) -> DbmlResult<Vec<Vec<Value>>> {
        let parts = split_top_level(inner);
        if parts.is_empty() {
            return Err(self.err("empty primary key list"));
        }
        Ok(parts
            .iter()
            .map(|part| match part.strip_prefix('(').and_then(|p| p.strip_suffix(')')) {
                Some(tuple) => split_top_level(tuple)
                    .iter()
                    .map(|v| Value::parse_literal(v))
                    .collect(),
                None => vec![Value::parse_literal(part)],
            })
            .collect())
    }

    fn range(&mut self, desc: &mut TableDescriptor) -> DbmlResult<()> {
        if desc.limit.is_some() {
            return Err(self.err("duplicate range"));
        }
        if self.peek() == Some('-') {
            self.bump();
            desc.limit = Some(self.number()?);
            return Ok(());
        }
        let from = self.number()?;
        if self.peek() == Some('-') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            let to = self.number()?;
            if to < from {
                return Err(self.err(format!("range end {to} is before start {from}")));
            }
            desc.offset = Some(from);
            desc.limit = Some(to - from);
        } else {
            desc.offset = Some(from);
            desc.limit = Some(1);
        }
        Ok(())
    }

    fn descriptor(mut self) -> DbmlResult<TableDescriptor> {
        let mut desc = TableDescriptor::default();

        if let Some(join) = self.peek().and_then(JoinType::from_sign) {
            desc.join = Some(join);
            self.bump();
            self.eat_ws();
        }

        desc.table = if self.peek() == Some('"') {
            let name = self.quoted_ident()?;
            if self.peek() == Some('.') && self.peek_at(1) == Some('"') {
                self.bump();
                desc.schema = Some(name);
                self.quoted_ident()?
            } else {
                name
            }
        } else {
            self.word()
        };
        if desc.table.is_empty() {
            return Err(self.err("missing table name"));
        }
        if self.peek() == Some('(') {
            let inner = self.balanced('(', ')')?;
            desc.primary_keys = self.primary_keys(&inner)?;
        }

        loop {
            let spaced = self.eat_ws();
            let Some(c) = self.peek() else { break };
            match c {
                '@' => {
                    self.bump();
                    let name = self.word();
                    let args = if self.peek() == Some('(') {
                        split_top_level(&self.balanced('(', ')')?)
                            .iter()
                            .map(|arg| Value::parse_literal(arg))
                            .collect()
                    } else {
                        Vec::new()
                    };
                    desc.scopes.push(ScopeCall { name, args });
                }
                '[' => {
                    let inner = self.balanced('[', ']')?;
                    desc.conditions.extend(split_top_level(&inner).into_iter().filter(|c| !c.is_empty()));
                }
                '{' => {
                    let inner = self.balanced('{', '}')?;
                    for pair in split_top_level(&inner) {
                        let (left, right) = pair
                            .split_once(':')
                            .ok_or_else(|| self.err(format!("column map '{pair}' needs 'a: b'")))?;
                        desc.column_maps
                            .push((left.trim().to_string(), right.trim().to_string()));
                    }
                }
                ':' => {
                    self.bump();
                    if desc.fkey.is_some() {
                        return Err(self.err("duplicate foreign key"));
                    }
                    desc.fkey = Some(self.word());
                }
                '+' | '-' => {
                    self.bump();
                    let column = self.dotted_word();
                    if column.is_empty() {
                        return Err(self.err(format!("missing column after '{c}'")));
                    }
                    desc.order.push(OrderItem {
                        column,
                        ascending: c == '+',
                    });
                }
                '#' => {
                    self.bump();
                    self.range(&mut desc)?;
                }
                '.' => {
                    self.bump();
                    if !desc.columns.is_empty() {
                        return Err(self.err("duplicate column list"));
                    }
                    desc.columns = self.column_list()?;
                }
                c if spaced && is_word_char(c) => {
                    let mut word = self.word();
                    if word.eq_ignore_ascii_case("AS") {
                        self.eat_ws();
                        word = self.word();
                        if word.is_empty() {
                            return Err(self.err("missing alias after AS"));
                        }
                    }
                    if desc.alias.is_some() {
                        return Err(self.err(format!("unexpected '{word}'")));
                    }
                    desc.alias = Some(word);
                }
                c => return Err(self.err(format!("unexpected '{c}'"))),
            }
        }
        Ok(desc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, DbSchema, TableMeta};

    #[test]
    fn modifier_order_does_not_matter() {
        let permutations = [
            "t_article@scope(1)[id = 1]:fk_a+id#2 AS A",
            "t_article[id = 1]@scope(1)#2+id:fk_a AS A",
            "t_article:fk_a#2 AS A@scope(1)[id = 1]+id",
            "t_article+id#2[id = 1]:fk_a@scope(1) AS A",
            "t_article AS A#2+id:fk_a[id = 1]@scope(1)",
            "t_article#2:fk_a+id@scope(1) A[id = 1]",
        ];
        let first = TableDescriptor::parse(permutations[0]).unwrap();
        assert_eq!(first.key(), "t_article@scope(1)[id = 1]:fk_a+id#2 AS A");
        for text in &permutations[1..] {
            let desc = TableDescriptor::parse(text).unwrap();
            assert_eq!(desc, first, "{text}");
            assert_eq!(desc.key(), first.key());
        }
    }

    #[test]
    fn range_forms() {
        let d = TableDescriptor::parse("t#10").unwrap();
        assert_eq!((d.offset, d.limit), (Some(10), Some(1)));
        let d = TableDescriptor::parse("t#-20").unwrap();
        assert_eq!((d.offset, d.limit), (None, Some(20)));
        let d = TableDescriptor::parse("t#10-20").unwrap();
        assert_eq!((d.offset, d.limit), (Some(10), Some(10)));
        assert!(TableDescriptor::parse("t#20-10").unwrap_err().is_invalid_argument());
    }

    #[test]
    fn join_signs_and_fkey_forms() {
        let d = TableDescriptor::parse("+t_comment:fk_comment_article C").unwrap();
        assert_eq!(d.join, Some(JoinType::Inner));
        assert_eq!(d.fkey.as_deref(), Some("fk_comment_article"));
        assert_eq!(d.alias.as_deref(), Some("C"));

        let d = TableDescriptor::parse("<t_comment: C").unwrap();
        assert_eq!(d.join, Some(JoinType::Left));
        assert_eq!(d.fkey.as_deref(), Some(""));
        assert_eq!(d.alias.as_deref(), Some("C"));

        assert_eq!(TableDescriptor::parse(">t").unwrap().join, Some(JoinType::Right));
        assert_eq!(TableDescriptor::parse("~t").unwrap().join, Some(JoinType::Auto));
        assert_eq!(TableDescriptor::parse("t").unwrap().join, None);
    }

    #[test]
    fn primary_key_scopes_maps_and_columns() {
        let d = TableDescriptor::parse(r#"t_article(1,2)@@tagged("a,b", 3){user_id: id} AS A.id, title"#)
            .unwrap();
        assert_eq!(d.primary_keys, vec![vec![Value::Int(1)], vec![Value::Int(2)]]);
        assert_eq!(d.scopes.len(), 2);
        assert_eq!(d.scopes[0].name, "");
        assert_eq!(d.scopes[1].args, vec![Value::from("a,b"), Value::Int(3)]);
        assert_eq!(d.column_maps, vec![("user_id".to_string(), "id".to_string())]);
        assert_eq!(d.columns, vec!["id", "title"]);

        let d = TableDescriptor::parse("t_pair((1,2),(3,4))").unwrap();
        assert_eq!(
            d.primary_keys,
            vec![vec![Value::Int(1), Value::Int(2)], vec![Value::Int(3), Value::Int(4)]]
        );
        assert_eq!(TableDescriptor::parse(&d.key()).unwrap(), d);
    }

    #[test]
    fn malformed_descriptors() {
        assert!(TableDescriptor::parse("").is_err());
        assert!(TableDescriptor::parse("t[unclosed").is_err());
        assert!(TableDescriptor::parse("t A B").is_err());
        assert!(TableDescriptor::parse("t{nocolon}").is_err());
        assert!(TableDescriptor::parse(r#""public"."t_article"#).is_err());
    }

    fn schema() -> Schema {
        Schema::new(
            DbSchema::new()
                .with_table(
                    TableMeta::new("t_user")
                        .column(ColumnMeta::new("id", "integer"))
                        .primary_key(["id"]),
                )
                .with_table(
                    TableMeta::new("t_article")
                        .column(ColumnMeta::new("id", "integer"))
                        .column(ColumnMeta::new("user_id", "integer"))
                        .primary_key(["id"])
                        .foreign_key("fk_article_user", ["user_id"], "t_user", ["id"]),
                )
                .with_table(
                    TableMeta::new("t_comment")
                        .column(ColumnMeta::new("id", "integer"))
                        .column(ColumnMeta::new("article_id", "integer"))
                        .primary_key(["id"])
                        .foreign_key("fk_comment_article", ["article_id"], "t_article", ["id"]),
                ),
        )
    }

    #[test]
    fn schema_qualified_and_cross_schema() {
        let schema = schema();
        let d = TableDescriptor::parse("public.t_article").unwrap().resolve(&schema).unwrap();
        assert_eq!(d.table, "t_article");
        assert!(d.columns.is_empty());

        let err = TableDescriptor::parse("other.t_article").unwrap().resolve(&schema).unwrap_err();
        assert!(err.is_invalid_argument());

        let d = TableDescriptor::parse(r#"+"public"."t_article" A"#).unwrap();
        assert_eq!(d.schema.as_deref(), Some("public"));
        assert_eq!(d.key(), r#"+"public"."t_article" AS A"#);
        assert_eq!(TableDescriptor::parse(&d.key()).unwrap(), d);
        let d = d.resolve(&schema).unwrap();
        assert_eq!(d.table, "t_article");
        assert_eq!(d.schema, None);

        let err = TableDescriptor::parse(r#""other"."t_article""#)
            .unwrap()
            .resolve(&schema)
            .unwrap_err();
        assert!(err.to_string().contains("cross-schema"));
        assert!(
            TableDescriptor::parse("t_missing")
                .unwrap()
                .resolve(&schema)
                .unwrap_err()
                .is_not_found()
        );
    }

    #[test]
    fn double_star_joins_referenced_tables() {
        let schema = schema();
        let d = TableDescriptor::parse("t_comment.**").unwrap().resolve(&schema).unwrap();
        assert_eq!(d.columns, vec!["*"]);
        assert_eq!(d.children.len(), 1);
        assert_eq!(d.children[0].key(), "<t_article:fk_comment_article.*");
        assert!(d.children[0].children.is_empty());

        let d = TableDescriptor::parse("t_comment.***").unwrap().resolve(&schema).unwrap();
        assert_eq!(d.children[0].children[0].key(), "<t_user:fk_article_user.*");
    }
}
