use std::fmt;

use crate::error::{Error, Result};

/// How many values a caller expects from an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultShape {
    /// At most one eventual value.
    Single,

    /// Zero or more ordered values over time.
    Multiple,
}

/// Declared return type of an operation, e.g. `Future<Item>` or `futures::Stream<Item>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReturnType {
    /// Last path segment of the outer type.
    pub name: String,

    /// Generic argument, kept verbatim.
    pub argument: Option<String>,

    declared: String,
}

impl ReturnType {
    pub fn parse(declared: &str) -> Result<Self> {
        let unsupported = || Error::UnsupportedReturnShape(declared.to_string());
        let trimmed = declared.trim();

        let (outer, argument) = match trimmed.find('<') {
            Some(open) => {
                let inner = trimmed[open + 1..]
                    .strip_suffix('>')
                    .ok_or_else(unsupported)?
                    .trim();
                if inner.is_empty() || !balanced(inner) {
                    return Err(unsupported());
                }
                (&trimmed[..open], Some(inner.to_string()))
            }
            None => (trimmed, None),
        };

        let name = outer.trim().rsplit("::").next().unwrap_or_default();
        if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
            return Err(unsupported());
        }

        Ok(Self {
            name: name.to_string(),
            argument,
            declared: trimmed.to_string(),
        })
    }
}

/// Whether every '<' is closed by a later '>'.
fn balanced(argument: &str) -> bool {
    let mut depth = 0usize;
    for c in argument.chars() {
        match c {
            '<' => depth += 1,
            '>' => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            _ => {}
        }
    }
    depth == 0
}

impl fmt::Display for ReturnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declared)
    }
}

/// Decides the result shape from a declared return type. Called once when an operation is bound,
/// anything that is neither a future nor a stream is refused before a request can be sent.
pub fn classify(declared: &ReturnType) -> Result<ResultShape> {
    match declared.name.as_str() {
        "Future" => Ok(ResultShape::Single),
        "Stream" => Ok(ResultShape::Multiple),
        _ => Err(Error::UnsupportedReturnShape(declared.to_string())),
    }
}
