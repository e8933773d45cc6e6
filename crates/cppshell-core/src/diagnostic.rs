//! Compiler diagnostic parsing.
//!
//! GCC-style output is one message per line:
//! `<region>:<line>[:<column>]: <severity>: <message>`. Only locations in the
//! user's regions survive, remapped to submission lines.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::line_map::LineMap;

static LOCATION_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<region>[^:\s][^:]*):(?P<line>\d+):(?:(?P<column>\d+):)? (?P<body>.*)$")
        .expect("diagnostic pattern is valid")
});

/// Message shown when the compiler failed without a parseable error.
pub const UNKNOWN_ERROR: &str = "(unknown error)";

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A compiler message attributed to a line of the submission.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,

    pub message: String,

    /// 1-indexed line in the original submission.
    pub line: u32,

    /// 1-indexed column, when the compiler reported one.
    pub column: Option<u32>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>, line: u32) -> Self {
        Self {
            severity,
            message: message.into(),
            line,
            column: None,
        }
    }

    pub fn error(message: impl Into<String>, line: u32) -> Self {
        Self::new(Severity::Error, message, line)
    }

    pub fn warning(message: impl Into<String>, line: u32) -> Self {
        Self::new(Severity::Warning, message, line)
    }

    pub fn with_column(mut self, column: u32) -> Self {
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.column {
            Some(column) => write!(
                f,
                "line {}:{}: {}: {}",
                self.line,
                column,
                self.severity.as_str(),
                self.message
            ),
            None => write!(f, "line {}: {}: {}", self.line, self.severity.as_str(), self.message),
        }
    }
}

/// Split a message body into severity and text. Notes and other kinds are `None`.
fn classify(body: &str) -> Option<(Severity, &str)> {
    if let Some(message) = body.strip_prefix("error: ") {
        Some((Severity::Error, message))
    } else if let Some(message) = body.strip_prefix("fatal error: ") {
        Some((Severity::Error, message))
    } else if let Some(message) = body.strip_prefix("warning: ") {
        Some((Severity::Warning, message))
    } else {
        None
    }
}

/// Parse a single output line.
pub fn parse_line(line: &str, line_map: &LineMap) -> Option<Diagnostic> {
    let caps = LOCATION_PREFIX.captures(line)?;
    let region = caps.name("region")?.as_str();
    let local_line: u32 = caps.name("line")?.as_str().parse().ok()?;

    let (severity, message) = classify(caps.name("body")?.as_str())?;
    let Some(original_line) = line_map.resolve(region, local_line) else {
        debug!(region, local_line, "dropping diagnostic outside user code");
        return None;
    };

    let mut diagnostic = Diagnostic::new(severity, message, original_line);
    if let Some(column) = caps.name("column").and_then(|c| c.as_str().parse().ok()) {
        diagnostic = diagnostic.with_column(column);
    }
    Some(diagnostic)
}

/// Parse combined compiler output, preserving order.
pub fn parse_diagnostics(output: &str, line_map: &LineMap) -> Vec<Diagnostic> {
    output
        .lines()
        .filter_map(|line| parse_line(line, line_map))
        .collect()
}

/// Guarantee a failed build explains itself: if `diagnostics` holds no error,
/// append `(unknown error)` at line 1. Returns whether one was added.
pub fn ensure_error(diagnostics: &mut Vec<Diagnostic>) -> bool {
    if diagnostics.iter().any(Diagnostic::is_error) {
        return false;
    }
    diagnostics.push(Diagnostic::error(UNKNOWN_ERROR, 1));
    true
}
