//! Named-parameter insert statements.
//!
//! The collector is configured with a statement such as
//!
//! ```sql
//! INSERT INTO cpu_samples (host, load, captured_at) VALUES (@host, @load, @ts)
//! ```
//!
//! [`InsertTemplate::parse`] finds the `@name` placeholders and rewrites
//! them to the positional `$1..$n` form the PostgreSQL driver expects. A
//! name used twice maps to one position. `@` inside quoted literals,
//! quoted identifiers, `$tag$` strings and comments is left alone.
//!
//! [`InsertTemplate::prepare`] checks the placeholders against the
//! [`ExtractionSpec`] once at startup and yields a [`PreparedInsert`],
//! which binds each extracted row into positional [`BindValue`]s.

use std::fmt;

use chrono::NaiveDateTime;

use crate::error::{ExtractionError, PipelineError, Result};
use crate::extraction::{is_identifier, ExtractedRow, ExtractionSpec, TypedValue};

/// A value bound to one positional statement parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum BindValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Timestamp(NaiveDateTime),
}

impl From<TypedValue> for BindValue {
    fn from(value: TypedValue) -> Self {
        match value {
            TypedValue::Int(v) => BindValue::Int(v),
            TypedValue::Float(v) => BindValue::Float(v),
            TypedValue::Bool(v) => BindValue::Bool(v),
            TypedValue::String(v) => BindValue::Text(v),
        }
    }
}

impl fmt::Display for BindValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindValue::Int(v) => write!(f, "{}", v),
            BindValue::Float(v) => write!(f, "{}", v),
            BindValue::Bool(v) => write!(f, "{}", v),
            BindValue::Text(v) => write!(f, "{:?}", v),
            BindValue::Timestamp(v) => write!(f, "{}", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexer {
    Code,
    SingleQuoted,
    DoubleQuoted,
    /// `$tag$ ... $tag$`, the tag may be empty.
    DollarQuoted(String),
    LineComment,
    /// Block comments nest, the depth is at least 1.
    BlockComment(u32),
}

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

/// The tag of a dollar-quote opener, given the characters after its `$`.
fn dollar_tag(mut rest: impl Iterator<Item = char>) -> Option<String> {
    let mut tag = String::new();
    loop {
        match rest.next()? {
            '$' => return Some(tag),
            c if c.is_ascii_alphabetic() || c == '_' || (!tag.is_empty() && c.is_ascii_digit()) => {
                tag.push(c)
            }
            _ => return None,
        }
    }
}

/// A statement with `@name` placeholders rewritten to `$n`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertTemplate {
    original: String,
    sql: String,
    parameters: Vec<String>,
}

impl InsertTemplate {
    /// Parse a statement and rewrite its named placeholders.
    ///
    /// String literals, quoted identifiers, dollar-quoted strings and
    /// comments (nested block comments included) are copied untouched. A
    /// `$` inside an identifier such as `col$1` is part of the identifier.
    pub fn parse(statement: &str) -> Result<Self> {
        let mut sql = String::with_capacity(statement.len());
        let mut parameters: Vec<String> = Vec::new();
        let mut state = Lexer::Code;
        let mut in_word = false;
        let mut chars = statement.chars().peekable();

        while let Some(c) = chars.next() {
            match &state {
                Lexer::Code => {
                    let after_word = in_word;
                    in_word = is_word_char(c);
                    match c {
                        '\'' => state = Lexer::SingleQuoted,
                        '"' => state = Lexer::DoubleQuoted,
                        '-' if chars.peek() == Some(&'-') => state = Lexer::LineComment,
                        '/' if chars.peek() == Some(&'*') => {
                            sql.push_str("/*");
                            chars.next();
                            state = Lexer::BlockComment(1);
                            continue;
                        }
                        '$' if after_word => {}
                        '$' if chars.peek().is_some_and(|n| n.is_ascii_digit()) => {
                            return Err(PipelineError::Config(
                                "insert statement must use @name placeholders, not $n".to_string(),
                            ));
                        }
                        '$' => {
                            if let Some(tag) = dollar_tag(chars.clone()) {
                                sql.push('$');
                                sql.push_str(&tag);
                                sql.push('$');
                                chars.nth(tag.len());
                                state = Lexer::DollarQuoted(tag);
                                in_word = false;
                                continue;
                            }
                        }
                        '@' if chars
                            .peek()
                            .is_some_and(|n| n.is_ascii_alphabetic() || *n == '_') =>
                        {
                            let mut name = String::new();
                            while let Some(&n) = chars.peek() {
                                if n.is_ascii_alphanumeric() || n == '_' {
                                    name.push(n);
                                    chars.next();
                                } else {
                                    break;
                                }
                            }
                            let position = match parameters.iter().position(|p| *p == name) {
                                Some(i) => i + 1,
                                None => {
                                    parameters.push(name);
                                    parameters.len()
                                }
                            };
                            sql.push('$');
                            sql.push_str(&position.to_string());
                            in_word = true;
                            continue;
                        }
                        _ => {}
                    }
                }
                Lexer::SingleQuoted if c == '\'' => state = Lexer::Code,
                Lexer::DoubleQuoted if c == '"' => state = Lexer::Code,
                Lexer::DollarQuoted(tag) if c == '$' => {
                    let closes = {
                        let mut rest = chars.clone();
                        tag.chars().all(|t| rest.next() == Some(t)) && rest.next() == Some('$')
                    };
                    if closes {
                        let tag = tag.clone();
                        sql.push('$');
                        sql.push_str(&tag);
                        sql.push('$');
                        chars.nth(tag.len());
                        state = Lexer::Code;
                        in_word = false;
                        continue;
                    }
                }
                Lexer::LineComment if c == '\n' => {
                    state = Lexer::Code;
                    in_word = false;
                }
                Lexer::BlockComment(depth) if c == '/' && chars.peek() == Some(&'*') => {
                    state = Lexer::BlockComment(depth + 1);
                    sql.push_str("/*");
                    chars.next();
                    continue;
                }
                Lexer::BlockComment(depth) if c == '*' && chars.peek() == Some(&'/') => {
                    state = match depth {
                        1 => {
                            in_word = false;
                            Lexer::Code
                        }
                        d => Lexer::BlockComment(d - 1),
                    };
                    sql.push_str("*/");
                    chars.next();
                    continue;
                }
                _ => {}
            }
            sql.push(c);
        }

        match state {
            Lexer::SingleQuoted => Err(PipelineError::Config(
                "insert statement has an unterminated string literal".to_string(),
            )),
            Lexer::DoubleQuoted => Err(PipelineError::Config(
                "insert statement has an unterminated quoted identifier".to_string(),
            )),
            Lexer::DollarQuoted(_) => Err(PipelineError::Config(
                "insert statement has an unterminated dollar-quoted string".to_string(),
            )),
            Lexer::BlockComment(_) => Err(PipelineError::Config(
                "insert statement has an unterminated block comment".to_string(),
            )),
            Lexer::Code | Lexer::LineComment => Ok(Self {
                original: statement.to_string(),
                sql,
                parameters,
            }),
        }
    }

    /// The statement as configured.
    pub fn original(&self) -> &str {
        &self.original
    }

    /// The statement with positional placeholders.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Placeholder names, index `i` is bound to `$(i + 1)`.
    pub fn parameters(&self) -> &[String] {
        &self.parameters
    }

    /// Check the placeholders against the extraction spec and the optional
    /// timestamp field.
    ///
    /// Every spec field and the timestamp field need a placeholder, and
    /// every placeholder must be one of them.
    pub fn validate(&self, spec: &ExtractionSpec, timestamp_field: Option<&str>) -> Result<()> {
        if self.parameters.is_empty() {
            return Err(PipelineError::Config(
                "insert statement has no @name placeholders".to_string(),
            ));
        }

        if let Some(ts) = timestamp_field {
            if !is_identifier(ts) {
                return Err(PipelineError::Config(format!(
                    "timestamp field '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                    ts
                )));
            }
            if spec.contains(ts) {
                return Err(PipelineError::Config(format!(
                    "timestamp field '{}' collides with an extraction field",
                    ts
                )));
            }
            if !self.parameters.iter().any(|p| p == ts) {
                return Err(PipelineError::Config(format!(
                    "timestamp field '{}' has no @{} placeholder in the insert statement",
                    ts, ts
                )));
            }
        }

        let missing: Vec<&str> = spec
            .field_names()
            .filter(|f| !self.parameters.iter().any(|p| p == f))
            .collect();
        if !missing.is_empty() {
            return Err(PipelineError::Config(format!(
                "extraction fields without a placeholder in the insert statement: {}",
                missing.join(", ")
            )));
        }

        let unknown: Vec<&str> = self
            .parameters
            .iter()
            .map(|p| p.as_str())
            .filter(|p| !spec.contains(p) && Some(*p) != timestamp_field)
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineError::Config(format!(
                "insert statement placeholders with no extraction field: {}",
                unknown.join(", ")
            )));
        }

        Ok(())
    }

    /// Validate and pair the template with its timestamp field.
    pub fn prepare(
        self,
        spec: &ExtractionSpec,
        timestamp_field: Option<String>,
    ) -> Result<PreparedInsert> {
        self.validate(spec, timestamp_field.as_deref())?;
        Ok(PreparedInsert {
            template: self,
            timestamp_field,
        })
    }
}

/// A template checked against its extraction spec, ready to bind rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedInsert {
    template: InsertTemplate,
    timestamp_field: Option<String>,
}

impl PreparedInsert {
    pub fn sql(&self) -> &str {
        self.template.sql()
    }

    pub fn template(&self) -> &InsertTemplate {
        &self.template
    }

    pub fn timestamp_field(&self) -> Option<&str> {
        self.timestamp_field.as_deref()
    }

    /// Bind an extracted row in placeholder order.
    ///
    /// `captured_at` fills the timestamp placeholder when one is configured.
    pub fn bind(
        &self,
        row: &ExtractedRow,
        captured_at: NaiveDateTime,
    ) -> std::result::Result<Vec<BindValue>, ExtractionError> {
        self.template
            .parameters
            .iter()
            .map(|name| {
                if self.timestamp_field.as_deref() == Some(name.as_str()) {
                    return Ok(BindValue::Timestamp(captured_at));
                }
                row.get(name)
                    .cloned()
                    .map(BindValue::from)
                    .ok_or_else(|| ExtractionError::Unbound(name.clone()))
            })
            .collect()
    }
}
