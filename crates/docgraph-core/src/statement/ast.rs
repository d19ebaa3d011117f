//! Syntax tree for the upsert-statement subset.

use std::fmt;

/// Literal property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    String(String),
    Integer(i64),
    /// Kept as written so rendering never changes precision.
    Float(String),
    Boolean(bool),
    Null,
    List(Vec<Literal>),
    Parameter(String),
    /// Function call such as `date("2024-01-02")`, kept as written.
    Expression(String),
}

impl Literal {
    /// Whether this value can identify a node (parameters and lists cannot).
    pub fn is_key_value(&self) -> bool {
        matches!(
            self,
            Literal::String(_) | Literal::Integer(_) | Literal::Float(_) | Literal::Boolean(_)
        )
    }

    /// Convert to JSON for the in-memory graph and query results.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Literal::String(s) => serde_json::Value::String(s.clone()),
            Literal::Integer(i) => serde_json::Value::from(*i),
            Literal::Float(f) => f
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Literal::Boolean(b) => serde_json::Value::Bool(*b),
            Literal::Null | Literal::Parameter(_) => serde_json::Value::Null,
            Literal::Expression(raw) => serde_json::Value::String(raw.clone()),
            Literal::List(items) => {
                serde_json::Value::Array(items.iter().map(Literal::to_json).collect())
            }
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::String(s) => write!(f, "\"{}\"", escape_string(s)),
            Literal::Integer(i) => write!(f, "{}", i),
            Literal::Float(s) => write!(f, "{}", s),
            Literal::Boolean(b) => write!(f, "{}", b),
            Literal::Null => write!(f, "null"),
            Literal::Parameter(p) => write!(f, "${}", p),
            Literal::Expression(raw) => write!(f, "{}", raw),
            Literal::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
        }
    }
}

fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out
}

/// Render a label, type, or property name, backtick-quoting when needed.
pub fn render_ident(name: &str) -> String {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

/// Whether a node pattern appears in a writing or a reading clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Write,
    Read,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodePattern {
    pub var: Option<String>,
    pub labels: Vec<String>,
    pub properties: Vec<(String, Literal)>,
    pub intent: Intent,
}

impl NodePattern {
    pub fn label(&self) -> Option<&str> {
        self.labels.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// `-[]->`
    Outgoing,
    /// `<-[]-`
    Incoming,
    /// `-[]-`
    Undirected,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelPattern {
    pub var: Option<String>,
    pub rel_type: Option<String>,
    pub direction: Direction,
    pub properties: Vec<(String, Literal)>,
}

/// `(a)-[r]->(b)<-[s]-(c)` as a start node followed by hops.
#[derive(Debug, Clone, PartialEq)]
pub struct Pattern {
    pub start: NodePattern,
    pub hops: Vec<(RelPattern, NodePattern)>,
}

impl Pattern {
    pub fn nodes(&self) -> impl Iterator<Item = &NodePattern> {
        std::iter::once(&self.start).chain(self.hops.iter().map(|(_, n)| n))
    }
}

/// `var.property = value`
#[derive(Debug, Clone, PartialEq)]
pub struct SetItem {
    pub var: String,
    pub property: String,
    pub value: Literal,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UniqueConstraint {
    pub name: Option<String>,
    pub label: String,
    pub property: String,
    pub if_not_exists: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    Match {
        optional: bool,
        patterns: Vec<Pattern>,
    },
    Merge {
        pattern: Pattern,
        on_set: Vec<SetItem>,
    },
    Create(Vec<Pattern>),
    Set(Vec<SetItem>),
    CreateConstraint(UniqueConstraint),
    DropConstraint {
        name: String,
        if_exists: bool,
    },
    /// Any other schema command (indexes, non-unique constraints).
    Schema(String),
    /// A clause kept as source text (WHERE, RETURN, WITH, ...).
    Other { keyword: String, text: String },
    /// Source the lenient parser could not understand.
    Unparsed(String),
}

impl Clause {
    /// Whether this clause mutates data or schema.
    pub fn is_write(&self) -> bool {
        match self {
            Clause::Merge { .. }
            | Clause::Create(_)
            | Clause::Set(_)
            | Clause::CreateConstraint(_)
            | Clause::DropConstraint { .. }
            | Clause::Schema(_) => true,
            Clause::Other { keyword, .. } => matches!(
                keyword.as_str(),
                "DELETE" | "DETACH" | "REMOVE" | "FOREACH" | "LOAD" | "CALL"
            ),
            Clause::Match { .. } | Clause::Unparsed(_) => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Statement {
    pub clauses: Vec<Clause>,
}

impl Statement {
    pub fn is_schema(&self) -> bool {
        self.clauses.iter().any(|c| {
            matches!(
                c,
                Clause::CreateConstraint(_) | Clause::DropConstraint { .. } | Clause::Schema(_)
            )
        })
    }

    pub fn is_read_only(&self) -> bool {
        !self.clauses.iter().any(Clause::is_write)
    }
}
