//! Structured diagnostics extracted from toolchain output.
//!
//! The toolchains this core drives (TeX engines, BibTeX, MakeIndex) write
//! free-form logs; `patterns` knows the line shapes each family emits and
//! `parser` turns a stream of raw output chunks into an ordered sequence of
//! [`DiagnosticEntry`] values plus uncategorized passthrough lines.

pub mod parser;
pub mod patterns;

pub use parser::{LogScanner, ScanItem};
pub use patterns::PatternFamily;

use std::fmt;
use std::path::PathBuf;

/// Diagnostic severity, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// One structured diagnostic, read-only once emitted.
///
/// `file` is recorded as the toolchain printed it (possibly relative); the
/// orchestrator resolves it against the step's working directory before the
/// entry leaves the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticEntry {
    pub severity: Severity,
    pub file: Option<PathBuf>,
    /// 1-based source line; absent for file-level messages
    pub line: Option<u32>,
    pub message: String,
}

impl DiagnosticEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            file: None,
            line: None,
            message: message.into(),
        }
    }

    pub fn with_location(mut self, file: Option<PathBuf>, line: Option<u32>) -> Self {
        self.file = file;
        self.line = line;
        self
    }
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => {
                write!(f, "{}:{}: {}", file.display(), line, self.message)
            }
            (Some(file), None) => write!(f, "{}: {}", file.display(), self.message),
            (None, Some(line)) => write!(f, "line {}: {}", line, self.message),
            (None, None) => write!(f, "{}", self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_with_full_location() {
        let entry = DiagnosticEntry::new(Severity::Error, "Undefined control sequence")
            .with_location(Some(PathBuf::from("main.tex")), Some(12));
        assert_eq!(entry.to_string(), "main.tex:12: Undefined control sequence");
    }

    #[test]
    fn test_display_message_only() {
        let entry = DiagnosticEntry::new(Severity::Warning, "empty journal in knuth:84");
        assert_eq!(entry.to_string(), "empty journal in knuth:84");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
