//! CSV loading.
//!
//! Each target column takes its value from a [`CsvSource`]: the next CSV field,
//! a fixed literal, an expression with the field bound to its `?`, or a
//! closure over the field. Rows are inserted in chunks of multi-row `INSERT`s,
//! or handed to the server in one `COPY ... FROM` when `native` is set.

use crate::client::Connection;
use crate::database::{Database, DryRun};
use crate::error::{DbmlError, DbmlResult};
use crate::expr::{Expression, Query, count_placeholders};
use crate::schema::Schema;
use crate::value::Value;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

type TransformFn = Arc<dyn Fn(&str) -> Value + Send + Sync>;

/// Where a target column gets its value.
#[derive(Clone)]
pub enum CsvSource {
    /// The next CSV field; `default` when the record is too short.
    Field { default: Value },
    /// A fixed value. Does not consume a field.
    Literal(Value),
    /// Raw SQL; a `?` left without a parameter is bound to the next field.
    Expr(Expression),
    /// The next field passed through a closure.
    Transform(TransformFn),
}

impl fmt::Debug for CsvSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsvSource::Field { default } => f.debug_struct("Field").field("default", default).finish(),
            CsvSource::Literal(v) => f.debug_tuple("Literal").field(v).finish(),
            CsvSource::Expr(e) => f.debug_tuple("Expr").field(e).finish(),
            CsvSource::Transform(_) => f.write_str("Transform(<fn>)"),
        }
    }
}

impl CsvSource {
    fn consumes_field(&self) -> bool {
        match self {
            CsvSource::Field { .. } | CsvSource::Transform(_) => true,
            CsvSource::Literal(_) => false,
            CsvSource::Expr(expr) => count_placeholders(expr.sql()) > expr.params().len(),
        }
    }
}

/// A target column and its source.
#[derive(Debug, Clone)]
pub struct CsvColumn {
    pub name: String,
    pub source: CsvSource,
}

impl CsvColumn {
    pub fn field(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: CsvSource::Field { default: Value::Null },
        }
    }

    pub fn literal(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            source: CsvSource::Literal(value.into()),
        }
    }

    pub fn expr(name: impl Into<String>, expr: Expression) -> Self {
        Self {
            name: name.into(),
            source: CsvSource::Expr(expr),
        }
    }

    pub fn transform<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&str) -> Value + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            source: CsvSource::Transform(Arc::new(f)),
        }
    }

    /// Value used when the record has no field for this column.
    pub fn or(mut self, value: impl Into<Value>) -> Self {
        if let CsvSource::Field { default } = &mut self.source {
            *default = value.into();
        }
        self
    }
}

/// CSV text, in memory or on disk.
#[derive(Debug, Clone)]
pub enum CsvInput {
    Bytes(Vec<u8>),
    /// Read by the client, or by the server for native loads.
    Path(PathBuf),
}

impl From<&str> for CsvInput {
    fn from(s: &str) -> Self {
        CsvInput::Bytes(s.as_bytes().to_vec())
    }
}

impl From<String> for CsvInput {
    fn from(s: String) -> Self {
        CsvInput::Bytes(s.into_bytes())
    }
}

impl From<PathBuf> for CsvInput {
    fn from(p: PathBuf) -> Self {
        CsvInput::Path(p)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoding {
    Utf8,
    Latin1,
}

impl Encoding {
    fn parse(name: &str) -> DbmlResult<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Encoding::Utf8),
            "iso-8859-1" | "latin1" => Ok(Encoding::Latin1),
            other => Err(DbmlError::domain(format!("unsupported encoding '{other}'"))),
        }
    }

    fn server_name(self) -> &'static str {
        match self {
            Encoding::Utf8 => "UTF8",
            Encoding::Latin1 => "LATIN1",
        }
    }

    fn decode(self, raw: &[u8]) -> DbmlResult<String> {
        match self {
            Encoding::Utf8 => String::from_utf8(raw.to_vec())
                .map_err(|e| DbmlError::UnexpectedValue(format!("invalid utf-8 in csv field: {e}"))),
            Encoding::Latin1 => Ok(raw.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

/// CSV load options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Leading records to skip (header lines).
    pub skip: usize,
    /// Rows per `INSERT`; 0 puts every row in one statement.
    pub chunk: usize,
    pub delimiter: u8,
    pub encoding: String,
    /// Emit a server-side `COPY ... FROM` instead of row inserts.
    pub native: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            skip: 0,
            chunk: 1000,
            delimiter: b',',
            encoding: "utf-8".to_string(),
            native: false,
        }
    }
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip(mut self, n: usize) -> Self {
        self.skip = n;
        self
    }

    pub fn chunk(mut self, n: usize) -> Self {
        self.chunk = n;
        self
    }

    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }

    pub fn native(mut self, native: bool) -> Self {
        self.native = native;
        self
    }
}

/// Render the statements loading `input` into `table`.
pub fn render_load(
    schema: &Schema,
    table: &str,
    columns: &[CsvColumn],
    input: &CsvInput,
    options: &LoadOptions,
) -> DbmlResult<Vec<Query>> {
    let name = schema.resolve_table_name(table)?;
    let meta = schema.table(&name)?;
    if columns.is_empty() {
        return Err(DbmlError::invalid(format!("csv load into '{name}' maps no columns")));
    }
    for column in columns {
        if !meta.has_column(&column.name) {
            return Err(DbmlError::not_found(format!(
                "column '{}' does not exist in '{name}'",
                column.name
            )));
        }
    }
    let encoding = Encoding::parse(&options.encoding)?;
    let column_list = columns
        .iter()
        .map(|c| c.name.as_str())
        .collect::<Vec<_>>()
        .join(", ");

    if options.native {
        return native_copy(&name, &column_list, columns, input, options, encoding).map(|q| vec![q]);
    }

    let records = read_records(input, options, encoding)?;
    let chunk = if options.chunk == 0 {
        records.len().max(1)
    } else {
        options.chunk
    };

    let mut queries = Vec::new();
    for batch in records.chunks(chunk) {
        let mut params = Vec::new();
        let tuples = batch
            .iter()
            .map(|record| row_tuple(columns, record, &mut params))
            .collect::<Vec<_>>()
            .join(", ");
        queries.push(Query::new(
            format!("INSERT INTO {name} ({column_list}) VALUES {tuples}"),
            params,
        ));
    }
    tracing::debug!(target: "dbml.sql", table = %name, rows = records.len(), statements = queries.len(), "csv load rendered");
    Ok(queries)
}

fn native_copy(
    table: &str,
    column_list: &str,
    columns: &[CsvColumn],
    input: &CsvInput,
    options: &LoadOptions,
    encoding: Encoding,
) -> DbmlResult<Query> {
    let CsvInput::Path(path) = input else {
        return Err(DbmlError::invalid("native csv load needs a file path"));
    };
    if columns
        .iter()
        .any(|c| !matches!(c.source, CsvSource::Field { default: Value::Null }))
    {
        return Err(DbmlError::invalid(
            "native csv load maps plain fields only",
        ));
    }
    if options.skip > 1 {
        return Err(DbmlError::invalid(format!(
            "native csv load can skip at most one header line, got {}",
            options.skip
        )));
    }
    let path = Value::Text(path.to_string_lossy().into_owned()).to_literal();
    let delimiter = Value::Text(char::from(options.delimiter).to_string()).to_literal();
    Ok(Query::new(
        format!(
            "COPY {table} ({column_list}) FROM {path} WITH (FORMAT csv, DELIMITER {delimiter}, ENCODING '{}', HEADER {})",
            encoding.server_name(),
            options.skip == 1
        ),
        Vec::new(),
    ))
}

fn read_records(input: &CsvInput, options: &LoadOptions, encoding: Encoding) -> DbmlResult<Vec<Vec<String>>> {
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .flexible(true)
        .delimiter(options.delimiter);

    let mut records = Vec::new();
    let mut push = |record: csv::ByteRecord| -> DbmlResult<()> {
        let fields = record
            .iter()
            .map(|field| encoding.decode(field))
            .collect::<DbmlResult<Vec<_>>>()?;
        records.push(fields);
        Ok(())
    };
    match input {
        CsvInput::Bytes(bytes) => {
            for record in builder.from_reader(bytes.as_slice()).byte_records().skip(options.skip) {
                push(record?)?;
            }
        }
        CsvInput::Path(path) => {
            for record in builder.from_path(path)?.byte_records().skip(options.skip) {
                push(record?)?;
            }
        }
    }
    Ok(records)
}

fn row_tuple(columns: &[CsvColumn], record: &[String], params: &mut Vec<Value>) -> String {
    let mut fields = record.iter();
    let mut slots = Vec::with_capacity(columns.len());
    for column in columns {
        let field = if column.source.consumes_field() {
            fields.next()
        } else {
            None
        };
        match &column.source {
            CsvSource::Field { default } => {
                params.push(field.map_or_else(|| default.clone(), |f| Value::Text(f.clone())));
                slots.push("?".to_string());
            }
            CsvSource::Literal(value) => {
                params.push(value.clone());
                slots.push("?".to_string());
            }
            CsvSource::Transform(f) => {
                params.push(field.map_or(Value::Null, |raw| f(raw)));
                slots.push("?".to_string());
            }
            CsvSource::Expr(expr) => {
                params.extend(expr.params().iter().cloned());
                if column.source.consumes_field() {
                    params.push(field.map_or(Value::Null, |f| Value::Text(f.clone())));
                }
                slots.push(expr.sql().to_string());
            }
        }
    }
    format!("({})", slots.join(", "))
}

impl<C: Connection> Database<C> {
    /// Load CSV rows into `table`. Returns the number of rows written.
    pub async fn load_csv(
        &self,
        table: &str,
        columns: &[CsvColumn],
        input: &CsvInput,
        options: &LoadOptions,
    ) -> DbmlResult<u64> {
        let queries = render_load(self.schema(), table, columns, input, options)?;
        self.transact(|db| async move {
            let mut total = 0;
            for query in &queries {
                total += db.execute(query).await?;
            }
            Ok(total)
        })
        .await
    }
}

impl<C: Connection> DryRun<'_, C> {
    pub fn load_csv(
        &self,
        table: &str,
        columns: &[CsvColumn],
        input: &CsvInput,
        options: &LoadOptions,
    ) -> DbmlResult<Vec<Query>> {
        self.finish(render_load(self.schema(), table, columns, input, options)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnMeta, DbSchema, TableMeta};

    fn schema() -> Schema {
        Schema::new(
            DbSchema::new().with_table(
                TableMeta::new("t_post")
                    .column(ColumnMeta::new("id", "integer").not_null())
                    .column(ColumnMeta::new("title", "text"))
                    .column(ColumnMeta::new("status", "text"))
                    .column(ColumnMeta::new("source", "text"))
                    .primary_key(["id"]),
            ),
        )
    }

    fn columns() -> Vec<CsvColumn> {
        vec![
            CsvColumn::field("id"),
            CsvColumn::transform("title", |raw| Value::Text(raw.to_uppercase())),
            CsvColumn::field("status").or("draft"),
            CsvColumn::literal("source", "import"),
        ]
    }

    #[test]
    fn skip_and_chunk_keep_row_order() {
        let input = CsvInput::from("id,title\n1,alpha\n2,beta\n3,gamma,published\n");
        let queries = render_load(
            &schema(),
            "t_post",
            &columns(),
            &input,
            &LoadOptions::new().skip(1).chunk(2),
        )
        .unwrap();

        assert_eq!(queries.len(), 2);
        assert_eq!(
            queries[0].sql,
            "INSERT INTO t_post (id, title, status, source) VALUES (?, ?, ?, ?), (?, ?, ?, ?)"
        );
        assert_eq!(
            queries[1].sql,
            "INSERT INTO t_post (id, title, status, source) VALUES (?, ?, ?, ?)"
        );
        let texts = |q: &Query| q.params.iter().map(Value::to_string).collect::<Vec<_>>();
        assert_eq!(texts(&queries[0]), vec![
            "1", "ALPHA", "draft", "import", "2", "BETA", "draft", "import"
        ]);
        assert_eq!(texts(&queries[1]), vec!["3", "GAMMA", "published", "import"]);
    }

    #[test]
    fn expression_binds_field() {
        let input = CsvInput::from("5;x\n");
        let queries = render_load(
            &schema(),
            "t_post",
            &[
                CsvColumn::expr("id", Expression::raw("CAST(? AS integer) + 100")),
                CsvColumn::field("title"),
            ],
            &input,
            &LoadOptions::new().delimiter(b';'),
        )
        .unwrap();
        assert_eq!(
            queries[0].sql,
            "INSERT INTO t_post (id, title) VALUES (CAST(? AS integer) + 100, ?)"
        );
        assert_eq!(queries[0].params, vec![Value::from("5"), Value::from("x")]);
    }

    #[test]
    fn latin1_input() {
        let input = CsvInput::Bytes(vec![b'1', b',', 0xE9, b't', 0xE9]);
        let queries = render_load(
            &schema(),
            "t_post",
            &[CsvColumn::field("id"), CsvColumn::field("title")],
            &input,
            &LoadOptions::new().encoding("ISO-8859-1"),
        )
        .unwrap();
        assert_eq!(queries[0].params[1], Value::from("été"));
    }

    #[test]
    fn unknown_encoding_is_domain_error() {
        let err = render_load(
            &schema(),
            "t_post",
            &[CsvColumn::field("id")],
            &CsvInput::from("1\n"),
            &LoadOptions::new().encoding("shift_jis"),
        )
        .unwrap_err();
        assert!(err.is_domain());
    }

    #[test]
    fn native_copy_statement() {
        let queries = render_load(
            &schema(),
            "t_post",
            &[CsvColumn::field("id"), CsvColumn::field("title")],
            &CsvInput::Path(PathBuf::from("/tmp/posts.csv")),
            &LoadOptions::new().native(true).skip(1),
        )
        .unwrap();
        assert_eq!(
            queries[0].sql,
            "COPY t_post (id, title) FROM '/tmp/posts.csv' WITH (FORMAT csv, DELIMITER ',', ENCODING 'UTF8', HEADER true)"
        );

        let err = render_load(
            &schema(),
            "t_post",
            &columns(),
            &CsvInput::Path(PathBuf::from("/tmp/posts.csv")),
            &LoadOptions::new().native(true),
        )
        .unwrap_err();
        assert!(err.is_invalid_argument());
    }

    #[test]
    fn unknown_column_is_rejected() {
        let err = render_load(
            &schema(),
            "t_post",
            &[CsvColumn::field("nope")],
            &CsvInput::from("1\n"),
            &LoadOptions::new(),
        )
        .unwrap_err();
        assert!(err.is_not_found());
    }
}
