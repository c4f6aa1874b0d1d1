//! Unified, `miette`-based diagnostics for the Among compiler.
//!
//! Every problem found while compiling a source, from a malformed escape to an
//! ambiguous macro overload, is recorded as a [`Report`]. Reports are plain
//! values: the compiler collects them in order and keeps going, and callers
//! decide success by checking for [`Severity::Error`].
//!
//! # Construction
//!
//! - Use `err_msg!` for a report without a source position:
//!   `err_msg!(Macro, "missing key '{}'", key)`
//! - Use `err_at!` when the codepoint offset is known:
//!   `err_at!(Syntax, token.start, "expected ':'")`
//! - Refine with the builder methods: `.hint(..)`, `.warning()`,
//!   `.at(..)`, `.with_severity(..)`.
//!
//! Do not build `Report` literals outside this module.

use std::any::Any;
use std::fmt::{self, Write as _};
use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::source::Source;

/// How serious a report is. Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Info => "info",
            Severity::Warn => "warning",
            Severity::Error => "error",
        })
    }
}

/// Type-safe classification of a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    /// Unterminated quoted primitives or block comments, bad unicode escapes
    Lexical,
    /// Missing delimiters, malformed definition statements, redundant commas
    Syntax,
    /// Operator/macro registration conflicts, duplicate properties
    Registration,
    /// Overload resolution, argument binding and type inference
    Macro,
    /// Unresolvable imports
    Resolution,
    /// Faults inside the compiler itself
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Lexical => "lexical",
            ErrorType::Syntax => "syntax",
            ErrorType::Registration => "registration",
            ErrorType::Macro => "macro",
            ErrorType::Resolution => "resolution",
            ErrorType::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single compiler message.
///
/// `offset` is a codepoint offset into the compiled [`Source`].
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct Report {
    pub severity: Severity,
    pub kind: ErrorType,
    pub message: String,
    pub offset: Option<usize>,
    pub hints: Vec<String>,
}

impl Report {
    /// Creates an error-severity report. Prefer the `err_msg!`/`err_at!` macros.
    pub fn new(kind: ErrorType, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            offset: None,
            hints: Vec::new(),
        }
    }

    /// Sets the source offset, keeping an offset that is already present.
    pub fn at(mut self, offset: usize) -> Self {
        self.offset.get_or_insert(offset);
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hints.push(hint.into());
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn warning(self) -> Self {
        self.with_severity(Severity::Warn)
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    /// Renders the report as plain text with line/column and a source snippet.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use among::diagnostics::{ErrorType, Report};
    /// use among::source::Source;
    /// let source = Source::new("demo.among", "a: b\n{x: }");
    /// let report = Report::new(ErrorType::Syntax, "expected value").at(9);
    /// let text = report.render(&source);
    /// assert!(text.starts_with("error[syntax]: expected value"));
    /// assert!(text.contains("demo.among:2:5"));
    /// ```
    pub fn render(&self, source: &Source) -> String {
        let mut out = format!("{}[{}]: {}\n", self.severity, self.kind, self.message);
        if let Some(offset) = self.offset {
            let (line, col) = source.line_col(offset);
            let _ = writeln!(out, " --> {}:{}:{}", source.name(), line, col);
            if let Some(text) = source.line(line) {
                let gutter = line.to_string();
                let pad = " ".repeat(gutter.len());
                let _ = writeln!(out, "{pad} |");
                let _ = writeln!(out, "{gutter} | {text}");
                let _ = writeln!(out, "{pad} | {}^", " ".repeat(col - 1));
            }
        }
        for hint in &self.hints {
            let _ = writeln!(out, "  = hint: {hint}");
        }
        out
    }

    /// Attaches the source so the report can be displayed through miette.
    pub fn with_source(self, source: &Source) -> SourcedReport {
        let span = self.offset.map(|offset| {
            // Reports at end of input point at the last character.
            let offset = offset.min(source.len().saturating_sub(1));
            let start = source.byte_offset(offset);
            (start, source.byte_offset(offset + 1) - start)
        });
        SourcedReport {
            report: self,
            named: source.to_named_source(),
            span,
        }
    }
}

/// A [`Report`] bundled with its source, implementing [`miette::Diagnostic`].
#[derive(Debug, Error)]
#[error("{}", .report.message)]
pub struct SourcedReport {
    report: Report,
    named: Arc<NamedSource<String>>,
    /// Byte offset and length of the primary label.
    span: Option<(usize, usize)>,
}

impl Diagnostic for SourcedReport {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("among::{}", self.report.kind)))
    }

    fn severity(&self) -> Option<miette::Severity> {
        Some(match self.report.severity {
            Severity::Info => miette::Severity::Advice,
            Severity::Warn => miette::Severity::Warning,
            Severity::Error => miette::Severity::Error,
        })
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        if self.report.hints.is_empty() {
            None
        } else {
            Some(Box::new(self.report.hints.join("\n")))
        }
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.span.map(|_| self.named.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let (start, len) = self.span?;
        let label = LabeledSpan::new(Some(self.report.kind.to_string()), start, len);
        Some(Box::new(std::iter::once(label)))
    }
}

/// Text carried by a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string())
}

/// Constructs an error [`Report`] with a formatted message and no position.
#[macro_export]
macro_rules! err_msg {
    ($kind:ident, $msg:literal $(,)?) => {
        $crate::diagnostics::Report::new($crate::diagnostics::ErrorType::$kind, format!($msg))
    };
    ($kind:ident, $msg:literal, $($arg:expr),+ $(,)?) => {
        $crate::diagnostics::Report::new(
            $crate::diagnostics::ErrorType::$kind,
            format!($msg, $($arg),+),
        )
    };
}

/// Constructs an error [`Report`] at a codepoint offset.
#[macro_export]
macro_rules! err_at {
    ($kind:ident, $offset:expr, $msg:literal $(,)?) => {
        $crate::err_msg!($kind, $msg).at($offset)
    };
    ($kind:ident, $offset:expr, $msg:literal, $($arg:expr),+ $(,)?) => {
        $crate::err_msg!($kind, $msg, $($arg),+).at($offset)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_keep_first_offset() {
        let report = err_msg!(Syntax, "expected {}", "':'").at(4).at(9);
        assert_eq!(report.offset, Some(4));
        assert_eq!(report.message, "expected ':'");
        assert!(report.is_error());
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Info < Severity::Warn);
        assert!(Severity::Warn < Severity::Error);
        let report = err_at!(Registration, 0, "duplicate").warning();
        assert_eq!(report.severity, Severity::Warn);
    }

    #[test]
    fn render_points_at_column() {
        let source = Source::new("x.among", "first\n  bad here");
        let report = err_at!(Lexical, 8, "unterminated").hint("close it");
        let text = report.render(&source);
        assert!(text.contains("x.among:2:3"));
        assert!(text.contains("2 |   bad here"));
        assert!(text.contains("  |   ^"));
        assert!(text.contains("= hint: close it"));
    }

    #[test]
    fn miette_report_includes_help_and_code() {
        let source = Source::new("x.among", "abc");
        let report = err_at!(Macro, 1, "wrong usage").hint("try b[]");
        let rendered = format!("{:?}", miette::Report::new(report.with_source(&source)));
        assert!(rendered.contains("wrong usage"));
        assert!(rendered.contains("try b[]"));
        assert!(rendered.contains("among::macro"));
    }
}
