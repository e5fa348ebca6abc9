//! Located diagnostics.
//!
//! Every fallible step of the toolkit returns `Result<T, Diagnostic>`.
//! Type-level helpers (promotion, casts, backend calls) do not know where
//! they were invoked from, so they produce an unlocated diagnostic and the
//! parser or code generator pins it to a node with [`Diagnostic::at`].

use std::fmt;

use crate::span::SourceLocation;

/// Failure class of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Unterminated literal, malformed escape.
    Lexical,
    /// Unexpected token or end of input.
    Syntax,
    /// Undefined symbol or type, non-unifiable types, bad member access.
    Type,
    /// Store into a value without an address.
    Assignment,
    /// Missing conversion, missing operator, backend misuse.
    Codegen,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub location: Option<SourceLocation>,
    pub message: String,
}

pub type Result<T, E = Diagnostic> = std::result::Result<T, E>;

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            location: None,
            message: message.into(),
        }
    }

    pub fn lexical(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Lexical, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Syntax, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Type, message)
    }

    pub fn assignment(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Assignment, message)
    }

    pub fn codegen(message: impl Into<String>) -> Self {
        Self::new(DiagnosticKind::Codegen, message)
    }

    /// Attach a location unless the diagnostic already carries a more
    /// precise one from deeper in the tree.
    pub fn at(mut self, location: &SourceLocation) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "at {location}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for Diagnostic {}
