//! Core toolkit for small statically-typed expression languages.
//!
//! The pipeline is roughly:
//!
//!   source text
//!     -> lexer     (tokens)
//!     -> parser    (typed AST; consults types, operators, symbols)
//!     -> codegen   (values and casts over a `Backend`)
//!     -> codegen_llvm (textual LLVM IR module)
//!
//! A concrete language registers its keywords and prefix expressions on a
//! [`Pipeline`] and reuses everything else.

// ---------------------------------------------------------------------
// Error handling and diagnostics
// ---------------------------------------------------------------------

pub mod span;
pub mod diagnostic;
pub mod error;

// ---------------------------------------------------------------------
// Front-end: lexing and parsing
// ---------------------------------------------------------------------

pub mod lexer;
pub mod parser;
pub mod ast;

// ---------------------------------------------------------------------
// Semantic layers: types, values, operators, scopes
// ---------------------------------------------------------------------

pub mod types;
pub mod value;
pub mod operators;
pub mod env;

// ---------------------------------------------------------------------
// Back-end: code generation and compiler orchestration
// ---------------------------------------------------------------------

pub mod backend;
pub mod builder;
pub mod codegen;
pub mod codegen_llvm;
pub mod pipeline;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use builder::Builder;
pub use diagnostic::{Diagnostic, DiagnosticKind};
pub use error::CoreError;
pub use pipeline::{Compilation, Pipeline};
