//! Normalized condition tree and its SQL rendering.

use crate::expr::Expression;
use crate::value::Value;
use std::fmt;

/// How sibling conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Conjunction {
    And,
    Or,
}

impl Conjunction {
    /// The other conjunction (one nesting level down).
    pub fn flip(self) -> Self {
        match self {
            Conjunction::And => Conjunction::Or,
            Conjunction::Or => Conjunction::And,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

impl fmt::Display for Conjunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One normalized boolean condition.
///
/// Built by [`super::normalize`]; every heterogeneous input shape is decided
/// there, so rendering is a plain walk that appends parameters in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// SQL text emitted as-is, no parameters.
    Literal(String),
    /// `column op ?`
    Compare {
        column: String,
        op: String,
        value: Value,
    },
    /// `column IS [NOT] NULL`
    IsNull { column: String, negated: bool },
    /// `column IN (?,...)`, `NOT (column IN (...))` when negated.
    In {
        column: String,
        values: Vec<Value>,
        negated: bool,
    },
    /// Inclusive range; a missing bound drops that side.
    Between {
        column: String,
        low: Option<Value>,
        high: Option<Value>,
    },
    /// `column [NOT] LIKE ?` with an already wrapped pattern.
    Like {
        column: String,
        pattern: Value,
        negated: bool,
    },
    /// Pre-assembled fragment with positional parameters (filled `?` templates, sub-queries).
    Template(Expression),
    /// Children joined by `conjunction`, parenthesized when more than one.
    Group {
        conjunction: Conjunction,
        children: Vec<Node>,
    },
    Not(Box<Node>),
    /// `(a, b) IN ((?,?),(?,?))`
    RowTuple {
        columns: String,
        arity: usize,
        rows: Vec<Vec<Value>>,
    },
    /// Raw expression object, emitted verbatim with its parameters.
    Raw(Expression),
}

impl Node {
    pub fn group(conjunction: Conjunction, children: Vec<Node>) -> Self {
        Node::Group {
            conjunction,
            children,
        }
    }

    /// Render into SQL, appending bound values to `params` in emission order.
    pub fn render(&self, params: &mut Vec<Value>) -> String {
        match self {
            Node::Group {
                conjunction,
                children,
            } if children.len() > 1 => format!("({})", render_joined(children, *conjunction, params)),
            other => other.render_bare(params),
        }
    }

    /// Like [`Node::render`] but without the outer parentheses of a group.
    fn render_bare(&self, params: &mut Vec<Value>) -> String {
        match self {
            Node::Literal(sql) => sql.clone(),
            Node::Compare { column, op, value } => {
                params.push(value.clone());
                format!("{column} {op} ?")
            }
            Node::IsNull { column, negated } => {
                format!("{column} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Node::In {
                column,
                values,
                negated,
            } => {
                let list = if values.is_empty() {
                    "NULL".to_string()
                } else {
                    params.extend(values.iter().cloned());
                    placeholders(values.len())
                };
                if *negated {
                    format!("NOT ({column} IN ({list}))")
                } else {
                    format!("{column} IN ({list})")
                }
            }
            Node::Between { column, low, high } => {
                let mut parts = Vec::with_capacity(2);
                if let Some(low) = low {
                    params.push(low.clone());
                    parts.push(format!("{column} >= ?"));
                }
                if let Some(high) = high {
                    params.push(high.clone());
                    parts.push(format!("{column} <= ?"));
                }
                parts.join(" AND ")
            }
            Node::Like {
                column,
                pattern,
                negated,
            } => {
                params.push(pattern.clone());
                format!("{column} {}LIKE ?", if *negated { "NOT " } else { "" })
            }
            Node::Template(expr) | Node::Raw(expr) => {
                params.extend(expr.params().iter().cloned());
                expr.sql().to_string()
            }
            Node::Group {
                conjunction,
                children,
            } => render_joined(children, *conjunction, params),
            Node::Not(inner) => format!("NOT ({})", inner.render_bare(params)),
            Node::RowTuple {
                columns,
                arity,
                rows,
            } => {
                if rows.is_empty() {
                    return format!("{columns} IN (({}))", vec!["NULL"; *arity].join(", "));
                }
                let tuples: Vec<String> = rows
                    .iter()
                    .map(|row| {
                        params.extend(row.iter().cloned());
                        format!("({})", placeholders(row.len()))
                    })
                    .collect();
                format!("{columns} IN ({})", tuples.join(","))
            }
        }
    }
}

fn render_joined(children: &[Node], conjunction: Conjunction, params: &mut Vec<Value>) -> String {
    children
        .iter()
        .map(|child| match child {
            // a two-sided range is itself an AND chain
            Node::Between {
                low: Some(_),
                high: Some(_),
                ..
            } if children.len() > 1 => format!("({})", child.render(params)),
            _ => child.render(params),
        })
        .collect::<Vec<_>>()
        .join(&format!(" {conjunction} "))
}

/// `?,?,?`
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}
