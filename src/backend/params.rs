//! Named placeholder binding.
//!
//! Pipeline statements reference the window as `:from` and `:to`. Drivers
//! only understand positional `?` markers, so statements are rewritten
//! before execution. Quoted literals, identifiers and comments are copied
//! untouched, and `::` is never treated as a placeholder.

use super::ExecutionError;
use crate::core::window::WindowParams;

/// A statement rewritten to positional placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundStatement {
    /// Statement text with `?` markers.
    pub sql: String,
    /// Values for each marker, in order.
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite `:name` placeholders in `statement` into `?` and collect values.
pub fn bind_named(
    statement: &str,
    params: &WindowParams,
) -> Result<BoundStatement, ExecutionError> {
    let mut sql = String::with_capacity(statement.len());
    let mut values = Vec::new();
    let mut chars = statement.chars().peekable();
    let mut state = Scan::Code;
    let mut prev: Option<char> = None;

    while let Some(c) = chars.next() {
        match state {
            Scan::Code => match c {
                '\'' | '"' | '`' => state = Scan::Quoted(c),
                '#' => state = Scan::LineComment,
                '-' if chars.peek() == Some(&'-') => state = Scan::LineComment,
                '/' if chars.peek() == Some(&'*') => {
                    sql.push('/');
                    sql.push('*');
                    chars.next();
                    state = Scan::BlockComment;
                    prev = None;
                    continue;
                }
                ':' => match chars.peek().copied() {
                    Some(':') => {
                        sql.push_str("::");
                        chars.next();
                        prev = Some(':');
                        continue;
                    }
                    Some(next) if is_ident_start(next) && !prev.is_some_and(is_ident_char) => {
                        let mut name = String::new();
                        while let Some(&n) = chars.peek() {
                            if !is_ident_char(n) {
                                break;
                            }
                            name.push(n);
                            chars.next();
                        }
                        let value = params
                            .get(&name)
                            .ok_or_else(|| ExecutionError::UnknownParameter(name.clone()))?;
                        sql.push('?');
                        values.push(value.to_string());
                        prev = Some('?');
                        continue;
                    }
                    _ => {}
                },
                _ => {}
            },
            Scan::Quoted(quote) => {
                if c == '\\' {
                    sql.push(c);
                    if let Some(escaped) = chars.next() {
                        sql.push(escaped);
                    }
                    prev = None;
                    continue;
                }
                if c == quote {
                    state = Scan::Code;
                }
            }
            Scan::LineComment => {
                if c == '\n' {
                    state = Scan::Code;
                }
            }
            Scan::BlockComment => {
                if c == '/' && prev == Some('*') {
                    state = Scan::Code;
                }
            }
        }
        sql.push(c);
        prev = Some(c);
    }

    Ok(BoundStatement { sql, values })
}
