//! Runtime configuration for [`Database`](crate::Database).
//!
//! Built in code with the builder methods, loaded from TOML, or adjusted one
//! option at a time with [`DbmlConfig::set_option`]:
//!
//! ```toml
//! filter_unknown_columns = true
//! default_join = "auto"
//!
//! [statement_cache]
//! enabled = true
//! capacity = 128
//!
//! [anywhere]
//! greedy = true
//! collate = "C"
//! ```

use crate::anywhere::AnywhereOverride;
use crate::descriptor::JoinType;
use crate::error::{DbmlError, DbmlResult};
use serde::Deserialize;

/// Configuration for `Database`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "ConfigFile")]
pub struct DbmlConfig {
    /// Drop columns a table does not have from insert/update rows instead of
    /// sending them to the server.
    pub filter_unknown_columns: bool,
    /// Prepared statement cache (per link).
    pub statement_cache: StatementCacheConfig,
    /// Join used when a descriptor carries no join sign.
    pub default_join: JoinType,
    /// Global anywhere-search options, the lowest merge layer.
    pub anywhere: AnywhereOverride,
    /// Validate placeholder counts of every statement rendered in dry-run mode.
    pub strict_dry_run: bool,
}

/// Prepared statement cache configuration (per link).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatementCacheConfig {
    pub enabled: bool,
    pub capacity: usize,
}

impl Default for StatementCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 64,
        }
    }
}

impl Default for DbmlConfig {
    fn default() -> Self {
        Self {
            filter_unknown_columns: false,
            statement_cache: StatementCacheConfig::default(),
            default_join: JoinType::Left,
            anywhere: AnywhereOverride::default(),
            strict_dry_run: false,
        }
    }
}

impl DbmlConfig {
    /// Create a new configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter out columns the target table does not have.
    pub fn filter_unknown_columns(mut self, enabled: bool) -> Self {
        self.filter_unknown_columns = enabled;
        self
    }

    /// Enable prepared statement caching with a per-link capacity.
    pub fn statement_cache(mut self, cap: usize) -> Self {
        self.statement_cache = StatementCacheConfig {
            enabled: cap > 0,
            capacity: cap,
        };
        self
    }

    /// Disable prepared statement caching.
    pub fn no_statement_cache(mut self) -> Self {
        self.statement_cache.enabled = false;
        self
    }

    /// Join type for unsigned nested joins and AUTO joins without a foreign key.
    pub fn default_join(mut self, join: JoinType) -> Self {
        self.default_join = join;
        self
    }

    /// Global anywhere-search options, the lowest merge layer.
    pub fn anywhere(mut self, options: AnywhereOverride) -> Self {
        self.anywhere = options;
        self
    }

    /// Check placeholder and parameter counts of every dry-run statement.
    pub fn strict_dry_run(mut self, enabled: bool) -> Self {
        self.strict_dry_run = enabled;
        self
    }

    /// Parse a TOML document. Unknown keys and unrecognized values are domain errors.
    pub fn from_toml_str(source: &str) -> DbmlResult<Self> {
        let file: ConfigFile = toml::from_str(source).map_err(|e| {
            if e.message().contains("unknown field") || e.message().contains("unknown variant") {
                DbmlError::domain(e.message().to_string())
            } else {
                DbmlError::from(e)
            }
        })?;
        Self::try_from(file)
    }

    /// Set a single option by dotted name (`statement_cache.capacity`,
    /// `anywhere.greedy`, ...) from its textual value.
    pub fn set_option(&mut self, name: &str, value: &str) -> DbmlResult<()> {
        match name {
            "filter_unknown_columns" => self.filter_unknown_columns = parse_bool(name, value)?,
            "strict_dry_run" => self.strict_dry_run = parse_bool(name, value)?,
            "default_join" => self.default_join = parse_join(value)?,
            "statement_cache" | "statement_cache.enabled" => {
                self.statement_cache.enabled = parse_bool(name, value)?;
            }
            "statement_cache.capacity" => {
                let capacity = value.trim().parse::<usize>().map_err(|_| {
                    DbmlError::domain(format!("option '{name}' expects a count, got '{value}'"))
                })?;
                self.statement_cache.capacity = capacity;
                self.statement_cache.enabled = capacity > 0;
            }
            "anywhere.enable" => self.anywhere.enable = Some(parse_bool(name, value)?),
            "anywhere.greedy" => self.anywhere.greedy = Some(parse_bool(name, value)?),
            "anywhere.keyonly" => self.anywhere.keyonly = Some(parse_bool(name, value)?),
            "anywhere.collate" => {
                self.anywhere.collate = (!value.is_empty()).then(|| value.to_string());
            }
            "anywhere.like" => self.anywhere.like = Some(parse_like(value)?),
            _ => return Err(DbmlError::domain(format!("unknown option '{name}'"))),
        }
        Ok(())
    }
}

fn parse_bool(name: &str, value: &str) -> DbmlResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => Err(DbmlError::domain(format!(
            "option '{name}' expects a boolean, got '{value}'"
        ))),
    }
}

/// `inner`/`left`/`right`/`auto`, or the descriptor signs `+ < > ~`.
fn parse_join(value: &str) -> DbmlResult<JoinType> {
    let value = value.trim();
    let mut chars = value.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(join) = JoinType::from_sign(c) {
            return Ok(join);
        }
    }
    match value.to_ascii_lowercase().as_str() {
        "inner" => Ok(JoinType::Inner),
        "left" => Ok(JoinType::Left),
        "right" => Ok(JoinType::Right),
        "auto" => Ok(JoinType::Auto),
        _ => Err(DbmlError::domain(format!("unknown join type '{value}'"))),
    }
}

fn parse_like(value: &str) -> DbmlResult<String> {
    if !value.contains("{}") {
        return Err(DbmlError::domain(format!(
            "anywhere like pattern '{value}' must contain '{{}}'"
        )));
    }
    Ok(value.to_string())
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    filter_unknown_columns: Option<bool>,
    statement_cache: Option<CacheSection>,
    default_join: Option<String>,
    anywhere: Option<AnywhereOverride>,
    strict_dry_run: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct CacheSection {
    enabled: Option<bool>,
    capacity: Option<usize>,
}

impl TryFrom<ConfigFile> for DbmlConfig {
    type Error = DbmlError;

    fn try_from(file: ConfigFile) -> DbmlResult<Self> {
        let mut config = DbmlConfig::default();
        if let Some(v) = file.filter_unknown_columns {
            config.filter_unknown_columns = v;
        }
        if let Some(v) = file.strict_dry_run {
            config.strict_dry_run = v;
        }
        if let Some(join) = file.default_join {
            config.default_join = parse_join(&join)?;
        }
        if let Some(cache) = file.statement_cache {
            if let Some(capacity) = cache.capacity {
                config.statement_cache.capacity = capacity;
                config.statement_cache.enabled = capacity > 0;
            }
            if let Some(enabled) = cache.enabled {
                config.statement_cache.enabled = enabled;
            }
        }
        if let Some(anywhere) = file.anywhere {
            if let Some(like) = &anywhere.like {
                parse_like(like)?;
            }
            config.anywhere = anywhere;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = DbmlConfig::new();
        assert!(!config.filter_unknown_columns);
        assert!(config.statement_cache.enabled);
        assert_eq!(config.default_join, JoinType::Left);
        assert_eq!(config.anywhere, AnywhereOverride::default());
    }

    #[test]
    fn builder_chain() {
        let config = DbmlConfig::new()
            .filter_unknown_columns(true)
            .statement_cache(0)
            .default_join(JoinType::Auto)
            .anywhere(AnywhereOverride::new().greedy(true));
        assert!(config.filter_unknown_columns);
        assert!(!config.statement_cache.enabled);
        assert_eq!(config.default_join, JoinType::Auto);
        assert_eq!(config.anywhere.greedy, Some(true));
    }

    #[test]
    fn toml_document() {
        let config = DbmlConfig::from_toml_str(
            r#"
            filter_unknown_columns = true
            default_join = "~"

            [statement_cache]
            capacity = 8

            [anywhere]
            collate = "C"
            like = "{}%"
            "#,
        )
        .unwrap();
        assert!(config.filter_unknown_columns);
        assert_eq!(config.default_join, JoinType::Auto);
        assert_eq!(config.statement_cache, StatementCacheConfig {
            enabled: true,
            capacity: 8
        });
        assert_eq!(config.anywhere.collate.as_deref(), Some("C"));
        assert_eq!(config.anywhere.like.as_deref(), Some("{}%"));
    }

    #[test]
    fn toml_rejects_unknown_option_and_value() {
        assert!(DbmlConfig::from_toml_str("colour = 1").unwrap_err().is_domain());
        assert!(
            DbmlConfig::from_toml_str("default_join = \"sideways\"")
                .unwrap_err()
                .is_domain()
        );
        assert!(
            DbmlConfig::from_toml_str("[anywhere]\nlike = \"%\"")
                .unwrap_err()
                .is_domain()
        );
    }

    #[test]
    fn set_option_by_name() {
        let mut config = DbmlConfig::new();
        config.set_option("default_join", "inner").unwrap();
        config.set_option("anywhere.greedy", "on").unwrap();
        config.set_option("statement_cache.capacity", "0").unwrap();
        assert_eq!(config.default_join, JoinType::Inner);
        assert_eq!(config.anywhere.greedy, Some(true));
        assert!(!config.statement_cache.enabled);

        assert!(config.set_option("nope", "1").unwrap_err().is_domain());
        assert!(config.set_option("strict_dry_run", "maybe").unwrap_err().is_domain());
        assert!(config.set_option("statement_cache.capacity", "-3").unwrap_err().is_domain());
    }
}
