//! Typed syntax tree.
//!
//! Every expression node carries the type the parser resolved for it, so
//! code generation never has to re-derive types. Languages built on the
//! toolkit add their own constructs through [`StatementNode`] and
//! [`ExpressionNode`] and hang them off the `Extension` variants.

use std::fmt;

use crate::builder::Builder;
use crate::diagnostic::Result;
use crate::lexer::escape_literal;
use crate::span::SourceLocation;
use crate::types::TypeId;
use crate::value::Value;

/// Statement contributed by a language extension (`def`, `extern`, ...).
pub trait StatementNode: fmt::Display + fmt::Debug {
    fn location(&self) -> &SourceLocation;
    fn generate(&self, builder: &mut Builder) -> Result<()>;
}

/// Expression contributed by a language extension (`if`, ...).
///
/// The enclosing [`Expr`] holds its location and type.
pub trait ExpressionNode: fmt::Display + fmt::Debug {
    fn generate(&self, builder: &mut Builder) -> Result<Value>;
}

#[derive(Debug)]
pub struct Expr {
    pub location: SourceLocation,
    pub ty: TypeId,
    pub kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: String,
        operand: Box<Expr>,
        prefix: bool,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        base: Box<Expr>,
        index: Box<Expr>,
    },
    /// `object.member`, or `object!member` through a pointer.
    Member {
        object: Box<Expr>,
        member: String,
        dereference: bool,
    },
    Symbol(String),
    ConstChar(u8),
    ConstFloat(f64),
    ConstInt(u64),
    /// Contents without the terminating NUL.
    ConstString(Vec<u8>),
    Extension(Box<dyn ExpressionNode>),
}

#[derive(Debug)]
pub enum Stmt {
    Expr(Expr),
    Extension(Box<dyn StatementNode>),
}

impl Expr {
    pub fn new(location: SourceLocation, ty: TypeId, kind: ExprKind) -> Self {
        Expr { location, ty, kind }
    }
}

impl Stmt {
    pub fn location(&self) -> &SourceLocation {
        match self {
            Stmt::Expr(expr) => &expr.location,
            Stmt::Extension(node) => node.location(),
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Binary { op, lhs, rhs } => write!(f, "({lhs} {op} {rhs})"),
            ExprKind::Unary {
                op,
                operand,
                prefix: true,
            } => write!(f, "{op}{operand}"),
            ExprKind::Unary { op, operand, .. } => write!(f, "{operand}{op}"),
            ExprKind::Call { callee, args } => {
                write!(f, "{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
            ExprKind::Index { base, index } => write!(f, "{base}[{index}]"),
            ExprKind::Member {
                object,
                member,
                dereference,
            } => {
                let sep = if *dereference { '!' } else { '.' };
                write!(f, "{object}{sep}{member}")
            }
            ExprKind::Symbol(name) => f.write_str(name),
            ExprKind::ConstChar(c) => write!(f, "'{}'", escape_literal(&[*c])),
            ExprKind::ConstFloat(value) => write!(f, "{value:?}"),
            ExprKind::ConstInt(value) => write!(f, "{value}"),
            ExprKind::ConstString(text) => write!(f, "\"{}\"", escape_literal(text)),
            ExprKind::Extension(node) => write!(f, "{node}"),
        }
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stmt::Expr(expr) => write!(f, "{expr}"),
            Stmt::Extension(node) => write!(f, "{node}"),
        }
    }
}
