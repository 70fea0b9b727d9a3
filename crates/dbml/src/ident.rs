//! SQL identifier handling.
//!
//! [`Ident`] is a dotted, optionally quoted identifier (`t_article`,
//! `"Schema"."Table"`). Unquoted parts must match `[A-Za-z_][A-Za-z0-9_$]*`;
//! quoted parts may hold anything except NUL and escape `"` as `""`.

use crate::error::{DbmlError, DbmlResult};

/// One `.`-separated segment of an identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    Unquoted(String),
    Quoted(String),
}

impl IdentPart {
    pub fn as_str(&self) -> &str {
        match self {
            IdentPart::Unquoted(s) | IdentPart::Quoted(s) => s,
        }
    }
}

/// A possibly qualified SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<IdentPart>,
}

impl Ident {
    /// Parse `a`, `a.b`, `"A"."b"` or mixed forms.
    pub fn parse(s: &str) -> DbmlResult<Self> {
        if s.is_empty() {
            return Err(DbmlError::invalid("identifier cannot be empty"));
        }
        if s.contains('\0') {
            return Err(DbmlError::invalid("identifier cannot contain NUL character"));
        }

        let chars: Vec<char> = s.chars().collect();
        let mut parts = Vec::new();
        let mut i = 0;
        loop {
            if chars.get(i) == Some(&'"') {
                let mut name = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        Some('"') if chars.get(i + 1) == Some(&'"') => {
                            name.push('"');
                            i += 2;
                        }
                        Some('"') => {
                            i += 1;
                            break;
                        }
                        Some(c) => {
                            name.push(*c);
                            i += 1;
                        }
                        None => {
                            return Err(DbmlError::invalid(format!(
                                "unclosed quoted identifier in '{s}'"
                            )));
                        }
                    }
                }
                if name.is_empty() {
                    return Err(DbmlError::invalid(format!("empty quoted identifier in '{s}'")));
                }
                parts.push(IdentPart::Quoted(name));
            } else {
                let start = i;
                while i < chars.len() && chars[i] != '.' {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                if !is_plain(&name) {
                    return Err(DbmlError::invalid(format!(
                        "invalid identifier segment '{name}' in '{s}'"
                    )));
                }
                parts.push(IdentPart::Unquoted(name));
            }

            match chars.get(i) {
                None => break,
                Some('.') if i + 1 < chars.len() => i += 1,
                Some('.') => {
                    return Err(DbmlError::invalid(format!("trailing '.' in identifier '{s}'")));
                }
                Some(c) => {
                    return Err(DbmlError::invalid(format!(
                        "expected '.' between identifier parts of '{s}', got '{c}'"
                    )));
                }
            }
        }

        Ok(Self { parts })
    }

    /// The last segment (table or column name).
    pub fn name(&self) -> &str {
        self.parts.last().map_or("", IdentPart::as_str)
    }

    /// Everything before the last segment, if any.
    pub fn qualifier(&self) -> Option<String> {
        (self.parts.len() > 1).then(|| {
            self.parts[..self.parts.len() - 1]
                .iter()
                .map(IdentPart::as_str)
                .collect::<Vec<_>>()
                .join(".")
        })
    }

    pub fn is_qualified(&self) -> bool {
        self.parts.len() > 1
    }

    /// Whether any segment was written in double quotes.
    pub fn is_quoted(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, IdentPart::Quoted(_)))
    }

    /// Render the identifier as SQL.
    pub fn to_sql(&self) -> String {
        self.parts
            .iter()
            .map(|part| match part {
                IdentPart::Unquoted(s) => s.clone(),
                IdentPart::Quoted(s) => quote_ident(s),
            })
            .collect::<Vec<_>>()
            .join(".")
    }
}

/// Whether `s` is a bare identifier: `[A-Za-z_][A-Za-z0-9_$]*`.
pub fn is_plain(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c == '$' || c.is_ascii_alphanumeric())
}

/// Double-quote an identifier, escaping embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Prefix a bare column with its table alias; expressions and already
/// qualified names pass through untouched.
pub fn qualify(alias: &str, column: &str) -> String {
    if column == "*" || is_plain(column) {
        format!("{alias}.{column}")
    } else {
        column.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ident_simple_and_dotted() {
        assert_eq!(Ident::parse("users").unwrap().to_sql(), "users");
        let ident = Ident::parse("public.users").unwrap();
        assert_eq!(ident.name(), "users");
        assert_eq!(ident.qualifier().as_deref(), Some("public"));
        assert!(!ident.is_quoted());
    }

    #[test]
    fn ident_quoted_with_escape() {
        let ident = Ident::parse(r#""main"."has""quote""#).unwrap();
        assert!(ident.is_quoted());
        assert_eq!(ident.name(), "has\"quote");
        assert_eq!(ident.to_sql(), r#""main"."has""quote""#);
    }

    #[test]
    fn ident_rejects_malformed() {
        assert!(Ident::parse("").is_err());
        assert!(Ident::parse("1table").is_err());
        assert!(Ident::parse("my table").is_err());
        assert!(Ident::parse("schema..table").is_err());
        assert!(Ident::parse("schema.").is_err());
        assert!(Ident::parse(r#""unclosed"#).is_err());
    }

    #[test]
    fn qualify_only_touches_bare_columns() {
        assert_eq!(qualify("A", "title"), "A.title");
        assert_eq!(qualify("A", "*"), "A.*");
        assert_eq!(qualify("A", "B.title"), "B.title");
        assert_eq!(qualify("A", "COUNT(*)"), "COUNT(*)");
    }
}
