//! # Error Types
//!
//! This module defines the error types of the score compiler.
//!
//! There are two families:
//! - [`ScoreError`] - fatal errors. Only these stop a run: the source text
//!   cannot be tokenized/parsed, the root of the tree is not a document, or the
//!   configuration is invalid.
//! - [`Diagnostic`] - recoverable problems found while analysing a document.
//!   They are collected as data in [`Diagnostics`] and never abort the run;
//!   the analyser always returns a best-effort model next to them.
//!
//! ## Usage
//! ```rust
//! use scorec::{compile, ScoreError};
//!
//! match compile("(score (vers 2.0) (instrument (musicData (n c4 q l)(n d4 q))))") {
//!     Ok(analysis) => eprint!("{}", analysis.diagnostics.report()),
//!     Err(ScoreError::ParseError { line, column, message }) => {
//!         eprintln!("Parse error at {}:{}: {}", line, column, message);
//!     }
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::tree::Locator;

#[derive(Error, Debug)]
pub enum ScoreError {
    /// Parse error with location information.
    ///
    /// Occurs while tokenizing or building the parse tree.
    ///
    /// # Example
    /// ```
    /// # use scorec::ScoreError;
    /// let err = ScoreError::ParseError {
    ///     line: 5,
    ///     column: 10,
    ///     message: "Unexpected ')'".to_string(),
    /// };
    /// assert_eq!(err.to_string(), "Parse error at line 5, column 10: Unexpected ')'");
    /// ```
    #[error("Parse error at line {line}, column {column}: {message}")]
    ParseError {
        line: usize,
        column: usize,
        message: String,
    },

    /// The root of the tree is neither a `lenmusdoc` nor a `score`.
    #[error("Not a document: root element is '{found}'")]
    NotADocument { found: String },

    /// Invalid configuration.
    ///
    /// # Example
    /// ```
    /// # use scorec::ScoreError;
    /// let err = ScoreError::ConfigError("default-channel must be in 0..16".to_string());
    /// assert_eq!(err.to_string(), "Invalid configuration: default-channel must be in 0..16");
    /// ```
    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("I/O error on '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Kind of a recoverable analysis problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosticKind {
    /// Node shape does not match its construct's grammar. The subtree is dropped.
    GrammarError,
    /// A second start arrived for a key that was still open. The old start is replaced.
    DuplicatedRelation,
    /// An end (or continue) marker without a pending start. The marker is ignored.
    UnmatchedEnd,
    /// A relation still open when its score ended. It is discarded.
    UnterminatedRelation,
    /// Tied notes with different pitch. The tie is still built.
    InvalidTie,
    /// Legacy `l` tie that could not be matched. No tie is built.
    InvalidOldTie,
    /// Legacy `g+` beam never closed. It is discarded.
    UnterminatedOldBeam,
}

impl DiagnosticKind {
    pub fn label(self) -> &'static str {
        match self {
            DiagnosticKind::GrammarError => "Grammar error",
            DiagnosticKind::DuplicatedRelation => "Duplicated relation",
            DiagnosticKind::UnmatchedEnd => "Unmatched end",
            DiagnosticKind::UnterminatedRelation => "Unterminated relation",
            DiagnosticKind::InvalidTie => "Invalid tie",
            DiagnosticKind::InvalidOldTie => "Invalid old tie",
            DiagnosticKind::UnterminatedOldBeam => "Unterminated old beam",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One recoverable problem, with the source location when known.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub locator: Option<Locator>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.locator {
            Some(loc) => write!(
                f,
                "{} at line {}, column {}: {}",
                self.kind, loc.line, loc.column, self.message
            ),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Ordered collection of diagnostics for one analysis run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: DiagnosticKind, locator: Option<Locator>, message: impl Into<String>) {
        let diagnostic = Diagnostic {
            kind,
            locator,
            message: message.into(),
        };
        log::warn!("{}", diagnostic);
        self.items.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    /// Number of diagnostics of the given kind.
    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|d| d.kind == kind).count()
    }

    /// Textual report, one line per diagnostic.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for d in &self.items {
            out.push_str(&d.to_string());
            out.push('\n');
        }
        out
    }
}
