//! Error and diagnostic types for the CSS Forge compiler

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// A position inside one of the compiled source files (1-based line and column)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Location {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Compute the line and column of a byte offset in `source`
    pub fn from_offset(file: impl Into<String>, source: &str, offset: usize) -> Self {
        let (line, column) = line_and_column(source, offset);
        Self::new(file, line, column)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// 1-based line and column (in characters) of a byte offset
pub fn line_and_column(source: &str, offset: usize) -> (usize, usize) {
    let offset = offset.min(source.len());
    let before = &source[..floor_char_boundary(source, offset)];
    let line = before.matches('\n').count() + 1;
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let column = before[line_start..].chars().count() + 1;
    (line, column)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[derive(Error, Debug)]
pub enum CrushError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Syntax error in {file} at line {line}, column {column}: {message}")]
    Syntax {
        file: String,
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Import error: {message}")]
    Import { message: String },

    #[error("Variable error: {message}")]
    Variable { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Cache error: {message}")]
    Cache { message: String },

    #[error("Maximum limit exceeded: {limit_type} (limit: {limit})")]
    LimitExceeded { limit_type: String, limit: usize },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },
}

pub type Result<T> = std::result::Result<T, CrushError>;

impl CrushError {
    pub fn syntax(location: &Location, message: impl Into<String>) -> Self {
        Self::Syntax {
            file: location.file.clone(),
            line: location.line,
            column: location.column,
            message: message.into(),
        }
    }

    pub fn import(message: impl Into<String>) -> Self {
        Self::Import {
            message: message.into(),
        }
    }

    pub fn variable(message: impl Into<String>) -> Self {
        Self::Variable {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn cache(message: impl Into<String>) -> Self {
        Self::Cache {
            message: message.into(),
        }
    }

    pub fn limit(limit_type: impl Into<String>, limit: usize) -> Self {
        Self::LimitExceeded {
            limit_type: limit_type.into(),
            limit,
        }
    }
}

/// Severity of a diagnostic collected during a compilation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Notice,
    Warning,
    Error,
}

/// A non-fatal problem found while compiling
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: Level,
    pub message: String,
    pub location: Option<Location>,
}

impl Diagnostic {
    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            message: message.into(),
            location: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            message: message.into(),
            location: None,
        }
    }

    pub fn notice(message: impl Into<String>) -> Self {
        Self {
            level: Level::Notice,
            message: message.into(),
            location: None,
        }
    }

    pub fn at(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl From<CrushError> for Diagnostic {
    fn from(err: CrushError) -> Self {
        match err {
            CrushError::Syntax {
                file,
                line,
                column,
                message,
            } => Diagnostic::warning(message).at(Location::new(file, line, column)),
            other @ (CrushError::Import { .. } | CrushError::Variable { .. } | CrushError::LimitExceeded { .. }) => {
                Diagnostic::warning(other.to_string())
            }
            other => Diagnostic::error(other.to_string()),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::Notice => "notice",
            Level::Warning => "warning",
            Level::Error => "error",
        };
        match &self.location {
            Some(location) => write!(f, "{}: {} ({})", level, self.message, location),
            None => write!(f, "{}: {}", level, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_and_column() {
        let source = "a {\n  color: red;\n}";
        assert_eq!(line_and_column(source, 0), (1, 1));
        assert_eq!(line_and_column(source, 6), (2, 3));
        assert_eq!(line_and_column(source, source.len()), (3, 2));
    }

    #[test]
    fn test_syntax_error_display() {
        let location = Location::new("main.css", 3, 7);
        let err = CrushError::syntax(&location, "Unmatched '{'");
        assert_eq!(
            err.to_string(),
            "Syntax error in main.css at line 3, column 7: Unmatched '{'"
        );
    }

    #[test]
    fn test_diagnostic_from_syntax_error_keeps_location() {
        let location = Location::new("a.css", 1, 2);
        let diagnostic: Diagnostic = CrushError::syntax(&location, "bad").into();
        assert_eq!(diagnostic.level, Level::Warning);
        assert_eq!(diagnostic.location, Some(location));
    }

    #[test]
    fn test_content_errors_become_warnings() {
        let diagnostic: Diagnostic = CrushError::limit("import depth", 32).into();
        assert_eq!(diagnostic.level, Level::Warning);
        assert_eq!(diagnostic.message, "Maximum limit exceeded: import depth (limit: 32)");

        let diagnostic: Diagnostic = CrushError::config("bad flag").into();
        assert_eq!(diagnostic.level, Level::Error);
    }
}
