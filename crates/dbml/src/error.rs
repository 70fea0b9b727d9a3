//! Error types for dbml

use thiserror::Error;

/// Result type alias for dbml operations
pub type DbmlResult<T> = Result<T, DbmlError>;

/// Error types for query building and database operations
#[derive(Debug, Error)]
pub enum DbmlError {
    /// Malformed descriptor, mismatched placeholders, wrong value shapes
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// More than one foreign key (or join path) matched without a disambiguating name
    #[error("Ambiguous: {0}")]
    Ambiguous(String),

    /// Referenced table/column/foreign key/scope does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// An OrThrow read found zero rows
    #[error("Non selected: {0}")]
    NonSelected(String),

    /// An OrThrow write affected zero rows
    #[error("Non affected: {0}")]
    NonAffected(String),

    /// Unrecognized configuration option or option value
    #[error("Domain error: {0}")]
    Domain(String),

    /// A value had an unexpected shape or type
    #[error("Unexpected value: {0}")]
    UnexpectedValue(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Row decode error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Serialization error (metadata cache, config)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// CSV read error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl DbmlError {
    /// Create an invalid argument error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create an ambiguity error
    pub fn ambiguous(message: impl Into<String>) -> Self {
        Self::Ambiguous(message.into())
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Create a domain error
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is an invalid argument error
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Check if this is an ambiguity error
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Self::Ambiguous(_))
    }

    /// Check if this is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Check if this is a zero-row error raised by an OrThrow variant
    pub fn is_non_row(&self) -> bool {
        matches!(self, Self::NonSelected(_) | Self::NonAffected(_))
    }

    /// Check if this is a domain error
    pub fn is_domain(&self) -> bool {
        matches!(self, Self::Domain(_))
    }

    /// Parse a tokio_postgres error, mapping `undefined_table` to [`DbmlError::NotFound`]
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            if db_err.code().code() == "42P01" {
                return Self::NotFound(db_err.message().to_string());
            }
        }
        Self::Query(err)
    }
}

impl From<serde_json::Error> for DbmlError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for DbmlError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
