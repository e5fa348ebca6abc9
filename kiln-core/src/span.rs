//! Source locations attached to tokens and AST nodes.

use std::fmt;
use std::sync::Arc;

/// Position of a token in a named source.
///
/// Rows start at 1. The column counts characters read on the current row,
/// so the first character of a row sits at column 1.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceLocation {
    pub filename: Arc<str>,
    pub row: u32,
    pub column: u32,
}

impl SourceLocation {
    pub fn new(filename: impl Into<Arc<str>>, row: u32, column: u32) -> Self {
        SourceLocation {
            filename: filename.into(),
            row,
            column,
        }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({},{})", self.filename, self.row, self.column)
    }
}
