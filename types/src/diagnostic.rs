//! Diagnostics in editor coordinates: 1-based lines, 1-based byte columns.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub line: u32,
    /// Byte column, not a character count.
    pub column: u32,
    pub path: PathBuf,
}

impl Location {
    #[must_use]
    pub fn new(line: u32, column: u32, path: impl Into<PathBuf>) -> Self {
        Self {
            line,
            column,
            path: path.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path.display(), self.line, self.column)
    }
}

/// Half-open span between two locations in the same file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Location,
    pub end: Location,
}

impl Range {
    #[must_use]
    pub fn new(start: Location, end: Location) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DiagnosticKind {
    #[default]
    Error,
    Warning,
    Information,
    Hint,
}

impl DiagnosticKind {
    /// Servers may omit severity; an absent or unknown one counts as an error.
    #[must_use]
    pub fn from_lsp_severity(severity: Option<u64>) -> Self {
        match severity {
            Some(2) => Self::Warning,
            Some(3) => Self::Information,
            Some(4) => Self::Hint,
            _ => Self::Error,
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "ERROR",
            Self::Warning => "WARNING",
            Self::Information => "INFORMATION",
            Self::Hint => "HINT",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub ranges: Vec<Range>,
    pub location: Location,
    pub location_extent: Range,
    pub text: String,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    /// A diagnostic covering exactly `extent`.
    #[must_use]
    pub fn new(extent: Range, text: impl Into<String>, kind: DiagnosticKind) -> Self {
        Self {
            ranges: vec![extent.clone()],
            location: extent.start.clone(),
            location_extent: extent,
            text: text.into(),
            kind,
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.location, self.kind, self.text)
    }
}
