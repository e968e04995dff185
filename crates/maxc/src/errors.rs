//! Compile-time diagnostics and runtime errors.
//!
//! Parse and semantic errors are collected in a [`Diagnostics`] sink and
//! never abort the pass that found them; the pipeline stops before emission
//! when any were reported. Runtime errors are [`RunError`] values that
//! propagate up the frame chain unless a failure block catches them.

use std::fmt;

use crate::token::Span;

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// A single compile-time diagnostic with the span it was reported against.
#[derive(Debug, Clone)]
pub struct CompileError {
    pub message: String,
    pub span: Span,
    /// Set when the error came from an imported module rather than the main
    /// file.
    pub file: Option<String>,
}

/// Accumulates compile-time diagnostics for one compilation.
///
/// Rendering produces one line per error (`file:line:col: message`) followed
/// by a bold summary line.
#[derive(Debug)]
pub struct Diagnostics {
    filename: String,
    errors: Vec<CompileError>,
}

impl Diagnostics {
    #[must_use]
    pub fn new(filename: &str) -> Self {
        Self {
            filename: filename.to_owned(),
            errors: Vec::new(),
        }
    }

    /// Reports an error against a span in the main file.
    pub fn report(&mut self, message: impl Into<String>, span: Span) {
        self.errors.push(CompileError {
            message: message.into(),
            span,
            file: None,
        });
    }

    /// Reports an error that occurred while processing an imported file.
    pub fn report_in(&mut self, message: impl Into<String>, span: Span, file: &str) {
        self.errors.push(CompileError {
            message: message.into(),
            span,
            file: Some(file.to_owned()),
        });
    }

    #[must_use]
    pub fn error_count(&self) -> usize {
        self.errors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    #[must_use]
    pub fn errors(&self) -> &[CompileError] {
        &self.errors
    }

    /// True when any reported message contains `needle`; test helper.
    #[must_use]
    pub fn has_message(&self, needle: &str) -> bool {
        self.errors.iter().any(|e| e.message.contains(needle))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for e in &self.errors {
            let file = e.file.as_deref().unwrap_or(&self.filename);
            writeln!(f, "{file}:{}: {}", e.span.start, e.message)?;
        }
        let n = self.errors.len();
        let plural = if n == 1 { "error" } else { "errors" };
        write!(f, "\x1b[1m{n} {plural} generated\x1b[0m")
    }
}

/// A runtime error carried up the frame chain.
///
/// The message is what `error("...")` was given, or a fixed description for
/// VM-raised failures (division by zero, subscript out of range, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub message: String,
}

impl RunError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "runtime error: {}", self.message)
    }
}

impl std::error::Error for RunError {}

/// Error type of one REPL submission: either the snippet failed to compile,
/// or it raised at runtime.
#[derive(Debug)]
pub enum ReplError {
    Compile(Diagnostics),
    Runtime(RunError),
}

impl fmt::Display for ReplError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compile(diags) => diags.fmt(f),
            Self::Runtime(err) => err.fmt(f),
        }
    }
}

impl From<RunError> for ReplError {
    fn from(err: RunError) -> Self {
        Self::Runtime(err)
    }
}
