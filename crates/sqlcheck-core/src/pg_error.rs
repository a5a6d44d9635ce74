//! Structured PostgreSQL error
//!
//! Errors reported by the engine are kept in this form wherever they are
//! consumed so the position can be re-projected into source coordinates.

use serde::{Deserialize, Serialize};

/// An error reported by PostgreSQL for a specific statement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PostgreSqlError {
    /// SQLSTATE code (e.g. `42P01`)
    pub code: String,

    /// Primary human-readable message
    pub message: String,

    /// 1-based character position in the statement text
    pub position: Option<usize>,

    pub hint: Option<String>,

    pub detail: Option<String>,
}

impl PostgreSqlError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            position: None,
            hint: None,
            detail: None,
        }
    }

    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Shift the position back by `prefix_len` characters
    ///
    /// Used when the statement sent to the engine wraps user text in a
    /// synthetic prefix. Positions that fall inside the prefix are dropped.
    pub fn without_prefix(mut self, prefix_len: usize) -> Self {
        self.position = self
            .position
            .and_then(|p| p.checked_sub(prefix_len))
            .filter(|p| *p > 0);
        self
    }
}

impl std::fmt::Display for PostgreSqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)?;
        if let Some(position) = self.position {
            write!(f, " at position {}", position)?;
        }
        Ok(())
    }
}

impl std::error::Error for PostgreSqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_adjustment() {
        let err = PostgreSqlError::new("42601", "syntax error").with_position(40);
        assert_eq!(err.clone().without_prefix(30).position, Some(10));
        assert_eq!(err.without_prefix(40).position, None);
    }

    #[test]
    fn display_includes_position() {
        let err = PostgreSqlError::new("42P01", "relation \"x\" does not exist").with_position(15);
        assert_eq!(err.to_string(), "relation \"x\" does not exist (42P01) at position 15");
    }
}
