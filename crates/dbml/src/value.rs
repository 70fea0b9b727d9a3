//! Scalar values and result rows.
//!
//! [`Value`] is the single parameter/result type flowing through the builders. It
//! implements `ToSql`/`FromSql` so it can be handed straight to tokio-postgres,
//! while staying comparable in tests and printable in dry-run output.

use crate::error::{DbmlError, DbmlResult};
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use std::error::Error;
use std::fmt;
use tokio_postgres::types::{FromSql, IsNull, ToSql, Type, to_sql_checked};

/// A bound parameter or fetched column value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
    Timestamp(NaiveDateTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// `NULL` or the empty string: the values an optional (`!`-prefixed) condition drops.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Null => true,
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Whether the value looks numeric (an int/float, or a text holding one).
    pub fn is_numeric(&self) -> bool {
        match self {
            Value::Int(_) | Value::Float(_) => true,
            Value::Text(s) => s.trim().parse::<f64>().is_ok(),
            _ => false,
        }
    }

    /// Parse a literal as written inside a descriptor: quoted strings, numbers,
    /// `null`, `true`/`false`, anything else is kept as text.
    pub fn parse_literal(raw: &str) -> Value {
        let raw = raw.trim();
        if raw.len() >= 2 {
            let bytes = raw.as_bytes();
            let (first, last) = (bytes[0], bytes[raw.len() - 1]);
            if (first == b'"' || first == b'\'') && first == last {
                let quote = first as char;
                let inner = &raw[1..raw.len() - 1];
                let doubled = format!("{quote}{quote}");
                return Value::Text(
                    inner
                        .replace(&doubled, &quote.to_string())
                        .replace(&format!("\\{quote}"), &quote.to_string()),
                );
            }
        }
        if raw.eq_ignore_ascii_case("null") {
            return Value::Null;
        }
        if raw.eq_ignore_ascii_case("true") {
            return Value::Bool(true);
        }
        if raw.eq_ignore_ascii_case("false") {
            return Value::Bool(false);
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Value::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Value::Float(v);
        }
        Value::Text(raw.to_string())
    }

    /// Render as an inline SQL literal (used for canonical descriptor keys and dry-run display).
    pub fn to_literal(&self) -> String {
        match self {
            Value::Null => "NULL".to_string(),
            Value::Bool(v) => if *v { "TRUE" } else { "FALSE" }.to_string(),
            Value::Int(v) => v.to_string(),
            Value::Float(v) => v.to_string(),
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Value::Json(v) => format!("'{}'", v.to_string().replace('\'', "''")),
            Value::Timestamp(v) => format!("'{}'", v.format(TIMESTAMP_FORMAT)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Text(s) => f.write_str(s),
            other => f.write_str(&other.to_literal()),
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident as $conv:ty),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(<$conv>::from(v))
                }
            }
        )*
    };
}

impl_value_from!(
    bool => Bool as bool,
    i8 => Int as i64,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int as i64,
    u8 => Int as i64,
    u16 => Int as i64,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float as f64,
    String => Text as String,
    serde_json::Value => Json as serde_json::Value,
    NaiveDateTime => Timestamp as NaiveDateTime,
);

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::Text(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

type BoxError = Box<dyn Error + Sync + Send>;

/// Types [`Value`] encodes by converting to the column's own Rust type.
const TYPED: [Type; 12] = [
    Type::BOOL,
    Type::INT2,
    Type::INT4,
    Type::INT8,
    Type::FLOAT4,
    Type::FLOAT8,
    Type::NUMERIC,
    Type::JSON,
    Type::JSONB,
    Type::TIMESTAMP,
    Type::TIMESTAMPTZ,
    Type::DATE,
];

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Text(_) => "text",
            Value::Json(_) => "json",
            Value::Timestamp(_) => "timestamp",
        }
    }

    fn mismatch(&self, ty: &Type) -> BoxError {
        format!("cannot encode a {} value as {}", self.kind(), ty.name()).into()
    }

    fn encode_bool(&self, ty: &Type) -> Result<bool, BoxError> {
        match self {
            Value::Bool(v) => Ok(*v),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Text(s) => match s.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
                "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
                _ => Err(invalid_input(s, ty)),
            },
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_int(&self, ty: &Type) -> Result<i64, BoxError> {
        match self {
            Value::Int(v) => Ok(*v),
            Value::Float(v) if v.fract() == 0.0 && v.abs() < i64::MAX as f64 => Ok(*v as i64),
            Value::Text(s) => s.trim().parse().map_err(|_| invalid_input(s, ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_float(&self, ty: &Type) -> Result<f64, BoxError> {
        match self {
            Value::Int(v) => Ok(*v as f64),
            Value::Float(v) => Ok(*v),
            Value::Text(s) => s.trim().parse().map_err(|_| invalid_input(s, ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_decimal(&self, ty: &Type) -> Result<Decimal, BoxError> {
        match self {
            Value::Int(v) => Ok(Decimal::from(*v)),
            Value::Float(v) => Decimal::try_from(*v).map_err(|_| invalid_input(&v.to_string(), ty)),
            Value::Text(s) => {
                let s = s.trim();
                Decimal::from_str_exact(s)
                    .or_else(|_| Decimal::from_scientific(s))
                    .map_err(|_| invalid_input(s, ty))
            }
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_json(&self, ty: &Type) -> Result<serde_json::Value, BoxError> {
        match self {
            Value::Json(v) => Ok(v.clone()),
            Value::Text(s) => serde_json::from_str(s).map_err(|_| invalid_input(s, ty)),
            Value::Bool(v) => Ok(serde_json::Value::Bool(*v)),
            Value::Int(v) => Ok(serde_json::Value::from(*v)),
            Value::Float(v) => serde_json::Number::from_f64(*v)
                .map(serde_json::Value::Number)
                .ok_or_else(|| invalid_input(&v.to_string(), ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_timestamp(&self, ty: &Type) -> Result<NaiveDateTime, BoxError> {
        match self {
            Value::Timestamp(v) => Ok(*v),
            Value::Text(s) => parse_timestamp(s.trim()).ok_or_else(|| invalid_input(s, ty)),
            _ => Err(self.mismatch(ty)),
        }
    }

    fn encode_text(&self, ty: &Type) -> Result<String, BoxError> {
        match self {
            Value::Text(s) => Ok(s.clone()),
            Value::Bool(v) => Ok(v.to_string()),
            Value::Int(v) => Ok(v.to_string()),
            Value::Float(v) => Ok(v.to_string()),
            Value::Json(v) => Ok(v.to_string()),
            Value::Timestamp(v) => Ok(v.format(TIMESTAMP_FORMAT).to_string()),
            Value::Null => Err(self.mismatch(ty)),
        }
    }
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

fn invalid_input(raw: &str, ty: &Type) -> BoxError {
    format!("invalid input {raw:?} for type {}", ty.name()).into()
}

fn out_of_range(v: i64, ty: &Type) -> BoxError {
    format!("{v} is out of range for type {}", ty.name()).into()
}

/// `YYYY-MM-DD[ T]HH:MM:SS[.f]`, RFC 3339 with an offset (normalized to UTC),
/// or a bare date at midnight.
fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|v| v.naive_utc()))
        .or_else(|| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        if self.is_null() {
            return Ok(IsNull::Yes);
        }
        if *ty == Type::BOOL {
            self.encode_bool(ty)?.to_sql(ty, out)
        } else if *ty == Type::INT2 {
            let v = self.encode_int(ty)?;
            i16::try_from(v).map_err(|_| out_of_range(v, ty))?.to_sql(ty, out)
        } else if *ty == Type::INT4 {
            let v = self.encode_int(ty)?;
            i32::try_from(v).map_err(|_| out_of_range(v, ty))?.to_sql(ty, out)
        } else if *ty == Type::INT8 {
            self.encode_int(ty)?.to_sql(ty, out)
        } else if *ty == Type::FLOAT4 {
            (self.encode_float(ty)? as f32).to_sql(ty, out)
        } else if *ty == Type::FLOAT8 {
            self.encode_float(ty)?.to_sql(ty, out)
        } else if *ty == Type::NUMERIC {
            self.encode_decimal(ty)?.to_sql(ty, out)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            self.encode_json(ty)?.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMP {
            self.encode_timestamp(ty)?.to_sql(ty, out)
        } else if *ty == Type::TIMESTAMPTZ {
            self.encode_timestamp(ty)?.and_utc().to_sql(ty, out)
        } else if *ty == Type::DATE {
            self.encode_timestamp(ty)?.date().to_sql(ty, out)
        } else if <&str as ToSql>::accepts(ty) {
            self.encode_text(ty)?.as_str().to_sql(ty, out)
        } else {
            Err(self.mismatch(ty))
        }
    }

    fn accepts(ty: &Type) -> bool {
        TYPED.contains(ty) || <&str as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn Error + Sync + Send>> {
        let value = if *ty == Type::BOOL {
            Value::Bool(bool::from_sql(ty, raw)?)
        } else if *ty == Type::INT2 {
            Value::Int(i16::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT4 {
            Value::Int(i32::from_sql(ty, raw)?.into())
        } else if *ty == Type::INT8 {
            Value::Int(i64::from_sql(ty, raw)?)
        } else if *ty == Type::FLOAT4 {
            Value::Float(f32::from_sql(ty, raw)?.into())
        } else if *ty == Type::FLOAT8 {
            Value::Float(f64::from_sql(ty, raw)?)
        } else if *ty == Type::JSON || *ty == Type::JSONB {
            Value::Json(serde_json::Value::from_sql(ty, raw)?)
        } else if *ty == Type::TIMESTAMP {
            Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?)
        } else if *ty == Type::TIMESTAMPTZ {
            Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?.naive_utc())
        } else if *ty == Type::DATE {
            Value::Text(NaiveDate::from_sql(ty, raw)?.to_string())
        } else if *ty == Type::NUMERIC {
            Value::Text(Decimal::from_sql(ty, raw)?.to_string())
        } else {
            Value::Text(String::from_sql(ty, raw)?)
        };
        Ok(value)
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, Box<dyn Error + Sync + Send>> {
        Ok(Value::Null)
    }

    fn accepts(ty: &Type) -> bool {
        [
            Type::BOOL,
            Type::INT2,
            Type::INT4,
            Type::INT8,
            Type::FLOAT4,
            Type::FLOAT8,
            Type::JSON,
            Type::JSONB,
            Type::TIMESTAMP,
            Type::TIMESTAMPTZ,
            Type::DATE,
            Type::NUMERIC,
        ]
        .contains(ty)
            || <String as FromSql>::accepts(ty)
    }
}

/// A fetched row: column names with their values, in select-list order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a column (builder style, handy for fixtures).
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(column, value);
        self
    }

    pub fn push(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.push(column.into());
        self.values.push(value.into());
    }

    /// Get a column value by name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|i| &self.values[i])
    }

    /// Get a column value by name, failing with a decode error when missing.
    pub fn try_get(&self, column: &str) -> DbmlResult<&Value> {
        self.get(column)
            .ok_or_else(|| DbmlError::decode(column, "no such column in row"))
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(String::as_str).zip(self.values.iter())
    }

    /// Convert a tokio-postgres row.
    pub fn from_pg(row: &tokio_postgres::Row) -> DbmlResult<Self> {
        let mut out = Row::new();
        for (i, column) in row.columns().iter().enumerate() {
            let value: Value = row
                .try_get(i)
                .map_err(|e| DbmlError::decode(column.name(), e.to_string()))?;
            out.push(column.name(), value);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_literal_recognizes_quotes_numbers_and_keywords() {
        assert_eq!(Value::parse_literal("'a,b'"), Value::Text("a,b".into()));
        assert_eq!(Value::parse_literal("\"it\"\"s\""), Value::Text("it\"s".into()));
        assert_eq!(Value::parse_literal(" 42 "), Value::Int(42));
        assert_eq!(Value::parse_literal("1.5"), Value::Float(1.5));
        assert_eq!(Value::parse_literal("NULL"), Value::Null);
        assert_eq!(Value::parse_literal("true"), Value::Bool(true));
        assert_eq!(Value::parse_literal("abc"), Value::Text("abc".into()));
    }

    #[test]
    fn literal_rendering_escapes_quotes() {
        assert_eq!(Value::from("o'clock").to_literal(), "'o''clock'");
        assert_eq!(Value::from(3).to_literal(), "3");
        assert_eq!(Value::Null.to_literal(), "NULL");
    }

    #[test]
    fn blank_values() {
        assert!(Value::Null.is_blank());
        assert!(Value::from("").is_blank());
        assert!(!Value::from(0).is_blank());
        assert!(!Value::from("x").is_blank());
    }

    fn encode(value: impl Into<Value>, ty: &Type) -> Result<Vec<u8>, BoxError> {
        let mut buf = BytesMut::new();
        value.into().to_sql_checked(ty, &mut buf)?;
        Ok(buf.to_vec())
    }

    fn native<T: ToSql>(value: T, ty: &Type) -> Vec<u8> {
        let mut buf = BytesMut::new();
        value.to_sql(ty, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn text_binds_to_integer_float_and_bool_columns() {
        assert_eq!(encode("1", &Type::INT4).unwrap(), 1_i32.to_be_bytes());
        assert_eq!(encode(" 3 ", &Type::INT8).unwrap(), 3_i64.to_be_bytes());
        assert_eq!(encode("7", &Type::INT2).unwrap(), 7_i16.to_be_bytes());
        assert_eq!(encode("1.5", &Type::FLOAT8).unwrap(), 1.5_f64.to_be_bytes());
        assert_eq!(encode("t", &Type::BOOL).unwrap(), vec![1]);
        assert!(encode("x", &Type::INT4).is_err());
        assert!(encode("1.5", &Type::INT4).is_err());
        assert!(encode("maybe", &Type::BOOL).is_err());
    }

    #[test]
    fn numbers_bind_to_numeric_and_narrow_columns() {
        let decode = |bytes: Vec<u8>| Decimal::from_sql(&Type::NUMERIC, &bytes).unwrap();
        assert_eq!(decode(encode(5, &Type::NUMERIC).unwrap()), Decimal::from(5));
        assert_eq!(decode(encode("12.50", &Type::NUMERIC).unwrap()), Decimal::new(1250, 2));
        assert_eq!(decode(encode(1.25, &Type::NUMERIC).unwrap()), Decimal::new(125, 2));
        assert!(encode("abc", &Type::NUMERIC).is_err());

        assert_eq!(encode(2, &Type::FLOAT4).unwrap(), 2_f32.to_be_bytes());
        assert_eq!(
            encode(70_000, &Type::INT2).unwrap_err().to_string(),
            "70000 is out of range for type int2"
        );
    }

    #[test]
    fn scalars_bind_to_text_json_and_temporal_columns() {
        assert_eq!(encode(42, &Type::TEXT).unwrap(), b"42");
        assert_eq!(encode(true, &Type::VARCHAR).unwrap(), b"true");

        let at = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 5)
            .unwrap();
        assert_eq!(
            encode("2024-01-02 03:04:05", &Type::TIMESTAMP).unwrap(),
            native(at, &Type::TIMESTAMP)
        );
        assert_eq!(encode("2024-01-02", &Type::DATE).unwrap(), native(at.date(), &Type::DATE));
        assert_eq!(
            encode(r#"{"a":1}"#, &Type::JSONB).unwrap(),
            native(serde_json::json!({"a": 1}), &Type::JSONB)
        );
        assert!(encode("not json", &Type::JSON).is_err());
    }

    #[test]
    fn unsupported_column_types_are_refused() {
        assert!(!<Value as ToSql>::accepts(&Type::UUID));
        assert!(<Value as ToSql>::accepts(&Type::NUMERIC));
        assert!(<Value as ToSql>::accepts(&Type::VARCHAR));
        assert!(encode("00000000-0000-0000-0000-000000000000", &Type::UUID).is_err());

        let mut buf = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql_checked(&Type::INT4, &mut buf),
            Ok(IsNull::Yes)
        ));
    }

    #[test]
    fn row_lookup_by_name() {
        let row = Row::new().with("id", 1).with("name", "a");
        assert_eq!(row.get("name"), Some(&Value::from("a")));
        assert!(row.get("missing").is_none());
        assert!(row.try_get("missing").is_err());
        assert_eq!(row.first(), Some(&Value::Int(1)));
    }
}
