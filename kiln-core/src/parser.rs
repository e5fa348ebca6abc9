//! Precedence-climbing parser with pluggable statement and expression
//! handlers.
//!
//! The parser resolves the type of every node as it builds it, so it keeps a
//! type-level environment of its own and borrows the [`Builder`] for the
//! type table and the operator registry.

use std::collections::HashMap;
use std::mem;

use tracing::trace;

use crate::ast::{Expr, ExprKind, Stmt};
use crate::builder::Builder;
use crate::diagnostic::{Diagnostic, Result};
use crate::env::{Environment, FunctionKey};
use crate::lexer::{Lexer, Token, TokenKind};
use crate::operators::{undefined_binary, undefined_unary};
use crate::span::SourceLocation;
use crate::types::{FunctionMode, FunctionSignature, StructMember, TypeId};

/// Parses a statement introduced by a registered keyword. Called with the
/// keyword still current.
pub type StatementHandler = fn(&mut Parser<'_, '_>) -> Result<Stmt>;

/// Parses a primary expression introduced by a registered token text.
pub type ExpressionHandler = fn(&mut Parser<'_, '_>) -> Result<Expr>;

/// Binding power of a binary operator token, `-1` when the text is not a
/// binary operator.
pub fn precedence(op: &str) -> i32 {
    match op {
        "=" | "<<=" | ">>=" | ">>>=" | "+=" | "-=" | "*=" | "/=" | "%=" | "&=" | "|=" | "^=" => 0,
        "&&" | "||" | "^^" => 1,
        "<" | ">" | "<=" | ">=" | "==" | "!=" => 2,
        "&" | "|" | "^" => 3,
        "<<" | ">>" | ">>>" => 4,
        "+" | "-" => 5,
        "*" | "/" | "%" => 6,
        _ => -1,
    }
}

pub struct Parser<'src, 'b> {
    lexer: Lexer<'src>,
    token: Token,
    builder: &'b mut Builder,
    symbols: Environment<TypeId>,
    statements: HashMap<String, StatementHandler>,
    expressions: HashMap<String, ExpressionHandler>,
    deferred: Option<Diagnostic>,
    consumed: usize,
}

impl<'src, 'b> Parser<'src, 'b> {
    pub fn new(builder: &'b mut Builder, filename: &str, source: &'src str) -> Self {
        let mut lexer = Lexer::new(filename, source);
        let (token, deferred) = lex_recovering(&mut lexer);
        Parser {
            lexer,
            token,
            builder,
            symbols: Environment::new(),
            statements: HashMap::new(),
            expressions: HashMap::new(),
            deferred,
            consumed: 0,
        }
    }

    pub fn statement(&mut self, text: impl Into<String>, handler: StatementHandler) {
        self.statements.insert(text.into(), handler);
    }

    pub fn expression(&mut self, text: impl Into<String>, handler: ExpressionHandler) {
        self.expressions.insert(text.into(), handler);
    }

    pub fn builder(&mut self) -> &mut Builder {
        &mut *self.builder
    }

    /// Number of tokens consumed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn current(&self) -> &Token {
        &self.token
    }

    pub fn location(&self) -> SourceLocation {
        self.token.location.clone()
    }

    /// Consume the current token and return it.
    ///
    /// A lexical error in the following token is reported here; the lexer
    /// has already skipped the offending literal, so parsing can resume.
    pub fn next(&mut self) -> Result<Token> {
        let (following, failure) = lex_recovering(&mut self.lexer);
        let previous = mem::replace(&mut self.token, following);
        self.consumed += 1;
        trace!(kind = %previous.kind, text = %previous.text, "consume");
        match failure {
            Some(diag) => Err(diag),
            None => Ok(previous),
        }
    }

    pub fn at(&self, kind: TokenKind) -> bool {
        self.token.kind == kind
    }

    /// Whether the current token is the given name, operator or symbol.
    /// Char and string literals never match.
    pub fn at_text(&self, text: &str) -> bool {
        !matches!(
            self.token.kind,
            TokenKind::CharLiteral | TokenKind::StringLiteral | TokenKind::Eof
        ) && self.token.text == text
    }

    pub fn at_eof(&self) -> bool {
        self.at(TokenKind::Eof)
    }

    /// End of input reached and every lexical error reported.
    pub fn finished(&self) -> bool {
        self.deferred.is_none() && self.at_eof()
    }

    pub fn next_if_at(&mut self, text: &str) -> Result<bool> {
        if self.at_text(text) {
            self.next()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Drop the current token.
    pub fn skip(&mut self) -> Result<()> {
        self.next().map(|_| ())
    }

    pub fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if !self.at(kind) {
            return Err(self.syntax_error(format!("expected {kind}, got {}", self.token.kind)));
        }
        self.next()
    }

    pub fn expect_text(&mut self, text: &str) -> Result<Token> {
        if !self.at_text(text) {
            let got = match self.token.kind {
                TokenKind::Eof => "end of input".to_string(),
                _ => format!("'{}'", self.token.text),
            };
            return Err(self.syntax_error(format!("expected '{text}', got {got}")));
        }
        self.next()
    }

    fn syntax_error(&self, message: String) -> Diagnostic {
        Diagnostic::syntax(message).at(&self.token.location)
    }

    // -----------------------------------------------------------------
    // Symbols
    // -----------------------------------------------------------------

    pub fn push_scope(&mut self) {
        self.symbols.push();
    }

    pub fn pop_scope(&mut self) {
        self.symbols.pop();
    }

    pub fn define_symbol(&mut self, name: impl Into<String>, ty: TypeId) {
        self.symbols.insert(name, ty);
    }

    /// Make a function visible to later statements; `ty` is the type of the
    /// function value (a pointer to the function type). Redeclaring a
    /// function with a different type fails.
    pub fn define_function(&mut self, key: FunctionKey, ty: TypeId) -> Result<()> {
        if let Some(&existing) = self.symbols.function(&key) {
            if existing != ty {
                let types = &self.builder.types;
                return Err(Diagnostic::type_error(format!(
                    "conflicting declaration of '{}': {} was declared as {}",
                    key.name,
                    types.name(ty),
                    types.name(existing)
                )));
            }
        }
        self.symbols.define_function(key, ty);
        Ok(())
    }

    pub fn symbol(&self, name: &str) -> Option<TypeId> {
        self.symbols.get(name).copied()
    }

    // -----------------------------------------------------------------
    // Statements and expressions
    // -----------------------------------------------------------------

    pub fn parse_statement(&mut self) -> Result<Stmt> {
        if let Some(diag) = self.deferred.take() {
            self.consumed += 1;
            return Err(diag);
        }
        if let Some(handler) = self.handler(&self.statements) {
            return handler(self);
        }
        Ok(Stmt::Expr(self.parse_expr()?))
    }

    fn handler<H: Copy>(&self, handlers: &HashMap<String, H>) -> Option<H> {
        match self.token.kind {
            TokenKind::Name | TokenKind::Operator | TokenKind::Other => {
                handlers.get(&self.token.text).copied()
            }
            _ => None,
        }
    }

    pub fn parse_expr(&mut self) -> Result<Expr> {
        let lhs = self.parse_call()?;
        self.parse_binary(lhs, 0)
    }

    fn operator_precedence(&self) -> i32 {
        match self.token.kind {
            TokenKind::Operator => precedence(&self.token.text),
            _ => -1,
        }
    }

    fn parse_binary(&mut self, mut lhs: Expr, min: i32) -> Result<Expr> {
        loop {
            let prec = self.operator_precedence();
            if prec < min {
                return Ok(lhs);
            }
            let op = self.next()?;
            let mut rhs = self.parse_call()?;
            loop {
                let next = self.operator_precedence();
                // assignments bind to the right
                if next > prec || (next == prec && prec == 0) {
                    let min = if next > prec { prec + 1 } else { prec };
                    rhs = self.parse_binary(rhs, min)?;
                } else {
                    break;
                }
            }
            let ty = self
                .binary_type(&op.text, prec, &lhs, &rhs)
                .map_err(|diag| diag.at(&op.location))?;
            lhs = Expr::new(
                op.location,
                ty,
                ExprKind::Binary {
                    op: op.text,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
            );
        }
    }

    fn binary_type(&self, op: &str, prec: i32, lhs: &Expr, rhs: &Expr) -> Result<TypeId> {
        if prec == 0 {
            return Ok(lhs.ty);
        }
        let types = &self.builder.types;
        let unified = types.higher_order(lhs.ty, rhs.ty)?;
        self.builder
            .operators
            .binary(op)
            .and_then(|operator| (operator.result)(types, unified))
            .ok_or_else(|| undefined_binary(types, op, lhs.ty, rhs.ty))
    }

    /// A primary expression followed by any call, index, member and
    /// postfix increment suffixes.
    pub fn parse_call(&mut self) -> Result<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.at_text("(") {
                expr = self.parse_call_suffix(expr)?;
            } else if self.at_text("[") {
                expr = self.parse_index_suffix(expr)?;
            } else if self.at_text(".") || self.at_text("!") {
                expr = self.parse_member_suffix(expr)?;
            } else if self.at_text("++") || self.at_text("--") {
                let op = self.next()?;
                let ty = self.unary_type(&op, expr.ty)?;
                expr = Expr::new(
                    op.location,
                    ty,
                    ExprKind::Unary {
                        op: op.text,
                        operand: Box::new(expr),
                        prefix: false,
                    },
                );
            } else {
                return Ok(expr);
            }
        }
    }

    fn unary_type(&self, op: &Token, operand: TypeId) -> Result<TypeId> {
        let types = &self.builder.types;
        self.builder
            .operators
            .unary(&op.text)
            .and_then(|operator| (operator.result)(types, operand))
            .ok_or_else(|| undefined_unary(types, &op.text, operand).at(&op.location))
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        if self.at_eof() {
            return Err(self.syntax_error("unexpected end of input".to_string()));
        }
        if let Some(handler) = self.handler(&self.expressions) {
            return handler(self);
        }
        if self.next_if_at("(")? {
            let expr = self.parse_expr()?;
            self.expect_text(")")?;
            return Ok(expr);
        }

        let location = self.location();
        match self.token.kind {
            TokenKind::Operator => {
                let op = self.next()?;
                let operand = self.parse_call()?;
                let ty = self.unary_type(&op, operand.ty)?;
                Ok(Expr::new(
                    location,
                    ty,
                    ExprKind::Unary {
                        op: op.text,
                        operand: Box::new(operand),
                        prefix: true,
                    },
                ))
            }
            TokenKind::Name => {
                let Some(ty) = self.symbol(&self.token.text) else {
                    return Err(Diagnostic::type_error(format!(
                        "undefined symbol '{}'",
                        self.token.text
                    ))
                    .at(&location));
                };
                let token = self.next()?;
                Ok(Expr::new(location, ty, ExprKind::Symbol(token.text)))
            }
            kind if self.token.is_integer() => {
                let Some(value) = self.token.integer_value() else {
                    return Err(self.syntax_error(format!(
                        "malformed {kind} '{}'",
                        self.token.text
                    )));
                };
                let ty = self.builder.types.i64();
                self.next()?;
                Ok(Expr::new(location, ty, ExprKind::ConstInt(value)))
            }
            TokenKind::FloatLiteral => {
                let Some(value) = self.token.float_value() else {
                    return Err(self.syntax_error(format!(
                        "malformed FloatLiteral '{}'",
                        self.token.text
                    )));
                };
                let ty = self.builder.types.f64();
                self.next()?;
                Ok(Expr::new(location, ty, ExprKind::ConstFloat(value)))
            }
            TokenKind::CharLiteral => {
                let ty = self.builder.types.i8();
                let token = self.next()?;
                let value = token.bytes.first().copied().unwrap_or(0);
                Ok(Expr::new(location, ty, ExprKind::ConstChar(value)))
            }
            TokenKind::StringLiteral => {
                let i8 = self.builder.types.i8();
                let ty = self.builder.types.pointer(i8);
                let token = self.next()?;
                Ok(Expr::new(location, ty, ExprKind::ConstString(token.bytes)))
            }
            kind => Err(self.syntax_error(format!(
                "unhandled token '{}' ({kind})",
                self.token.text
            ))),
        }
    }

    fn parse_call_suffix(&mut self, callee: Expr) -> Result<Expr> {
        let location = self.location();
        let Some(signature) = self.builder.types.callable(callee.ty).cloned() else {
            return Err(Diagnostic::type_error(format!(
                "cannot call value of type {}",
                self.builder.types.name(callee.ty)
            ))
            .at(&location));
        };
        self.expect_text("(")?;
        let mut args = Vec::new();
        if !self.at_text(")") {
            loop {
                args.push(self.parse_expr()?);
                if !self.next_if_at(",")? {
                    break;
                }
            }
        }
        self.expect_text(")")?;

        let expected = signature.params.len();
        if args.len() < expected || (!signature.vararg && args.len() > expected) {
            return Err(Diagnostic::type_error(format!(
                "wrong number of arguments to {}: expected {expected}, got {}",
                callee,
                args.len()
            ))
            .at(&location));
        }
        let ty = match (signature.mode, signature.self_type) {
            (FunctionMode::Constructor, Some(self_type)) => self_type,
            _ => signature.result,
        };
        Ok(Expr::new(
            location,
            ty,
            ExprKind::Call {
                callee: Box::new(callee),
                args,
            },
        ))
    }

    fn parse_index_suffix(&mut self, base: Expr) -> Result<Expr> {
        let location = self.location();
        let Some(element) = self.builder.types.element(base.ty) else {
            return Err(Diagnostic::type_error(format!(
                "cannot index into type {}",
                self.builder.types.name(base.ty)
            ))
            .at(&location));
        };
        self.expect_text("[")?;
        let index = self.parse_expr()?;
        self.expect_text("]")?;
        Ok(Expr::new(
            location,
            element,
            ExprKind::Index {
                base: Box::new(base),
                index: Box::new(index),
            },
        ))
    }

    fn parse_member_suffix(&mut self, object: Expr) -> Result<Expr> {
        let location = self.location();
        let dereference = self.next()?.text == "!";
        let member = self.expect(TokenKind::Name)?.text;

        let types = &self.builder.types;
        let object_ty = if dereference {
            types.pointee(object.ty).ok_or_else(|| {
                Diagnostic::type_error(format!("cannot dereference type {}", types.name(object.ty)))
                    .at(&location)
            })?
        } else {
            object.ty
        };
        let ty = match types.member(object_ty, &member) {
            Some((_, ty)) => ty,
            None => self
                .symbols
                .function(&FunctionKey::member(object_ty, member.as_str()))
                .copied()
                .ok_or_else(|| {
                    Diagnostic::type_error(format!(
                        "no member '{member}' in type {}",
                        types.name(object_ty)
                    ))
                    .at(&location)
                })?,
        };
        Ok(Expr::new(
            location,
            ty,
            ExprKind::Member {
                object: Box::new(object),
                member,
                dereference,
            },
        ))
    }

    // -----------------------------------------------------------------
    // Types
    // -----------------------------------------------------------------

    /// Parse a type expression: a base type followed by any number of
    /// `*`, `[len]` and `(params)` suffixes.
    pub fn parse_type(&mut self) -> Result<TypeId> {
        let mut ty = self.parse_base_type()?;
        loop {
            if self.next_if_at("*")? {
                ty = self.builder.types.pointer(ty);
            } else if self.next_if_at("[")? {
                let len = self.parse_expr()?;
                self.expect_text("]")?;
                let ExprKind::ConstInt(len_value) = len.kind else {
                    return Err(Diagnostic::type_error("array length must be a constant integer")
                        .at(&len.location));
                };
                ty = self.builder.types.array(ty, len_value);
            } else if self.at_text("(") {
                ty = self.parse_function_suffix(ty)?;
            } else {
                return Ok(ty);
            }
        }
    }

    fn parse_base_type(&mut self) -> Result<TypeId> {
        let location = self.location();
        if self.next_if_at("struct")? {
            let mut members = Vec::new();
            if self.next_if_at("{")? && !self.next_if_at("}")? {
                loop {
                    let ty = self.parse_type()?;
                    let name = self.expect(TokenKind::Name)?.text;
                    members.push(StructMember::new(ty, name));
                    if !self.next_if_at(",")? {
                        break;
                    }
                }
                self.expect_text("}")?;
            }
            return Ok(self.builder.types.structure(members));
        }
        if !self.at(TokenKind::Name) {
            return Err(self.syntax_error(format!("expected type, got '{}'", self.token.text)));
        }
        let name = self.next()?.text;
        self.builder.types.get(&name).ok_or_else(|| {
            Diagnostic::type_error(format!("undefined type '{name}'")).at(&location)
        })
    }

    /// `R(+S)(P, ...)`, `R(-S)(...)`, `R(:S)(...)` or plain `R(P, ..., ?)`.
    fn parse_function_suffix(&mut self, result: TypeId) -> Result<TypeId> {
        self.expect_text("(")?;
        let mode = if self.next_if_at("+")? {
            Some(FunctionMode::Constructor)
        } else if self.next_if_at("-")? {
            Some(FunctionMode::Destructor)
        } else if self.next_if_at(":")? {
            Some(FunctionMode::Member)
        } else {
            None
        };
        let mut signature = FunctionSignature::free(result, Vec::new());
        if let Some(mode) = mode {
            signature.mode = mode;
            signature.self_type = Some(self.parse_type()?);
            self.expect_text(")")?;
            self.expect_text("(")?;
        }
        if !self.next_if_at(")")? {
            loop {
                if self.next_if_at("?")? {
                    signature.vararg = true;
                    break;
                }
                signature.params.push(self.parse_type()?);
                if !self.next_if_at(",")? {
                    break;
                }
            }
            self.expect_text(")")?;
        }
        Ok(self.builder.types.function(signature))
    }
}

/// Pull the next token, skipping over literals the lexer rejects. Returns
/// the first rejection alongside the token.
fn lex_recovering(lexer: &mut Lexer<'_>) -> (Token, Option<Diagnostic>) {
    let mut failure = None;
    loop {
        match lexer.next_token() {
            Ok(token) => return (token, failure),
            Err(diag) => {
                failure.get_or_insert(diag);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen_llvm::LlvmTextBackend;
    use crate::diagnostic::DiagnosticKind;
    use crate::operators::OperatorRegistry;
    use pretty_assertions::assert_eq;

    fn builder() -> Builder {
        Builder::new(
            Box::new(LlvmTextBackend::new("test", "t.ks")),
            OperatorRegistry::with_defaults(),
        )
    }

    fn with_parser<R>(source: &str, f: impl FnOnce(&mut Parser<'_, '_>) -> R) -> R {
        let mut builder = builder();
        let mut parser = Parser::new(&mut builder, "t.ks", source);
        let i64 = parser.builder().types.i64();
        let f64 = parser.builder().types.f64();
        parser.define_symbol("a", i64);
        parser.define_symbol("b", i64);
        parser.define_symbol("x", f64);
        f(&mut parser)
    }

    fn dump(source: &str) -> String {
        with_parser(source, |parser| {
            parser.parse_expr().map(|expr| expr.to_string())
        })
        .unwrap()
    }

    fn error(source: &str) -> Diagnostic {
        with_parser(source, |parser| parser.parse_expr()).unwrap_err()
    }

    #[test]
    fn binds_by_precedence() {
        assert_eq!(dump("1 + 2 * 3"), "(1 + (2 * 3))");
        assert_eq!(dump("1 * 2 + 3"), "((1 * 2) + 3)");
        assert_eq!(dump("1 + 2 * 3 - 4"), "((1 + (2 * 3)) - 4)");
        assert_eq!(dump("1 << 2 + 3"), "(1 << (2 + 3))");
        assert_eq!(dump("1 & 2 == 3"), "((1 & 2) == 3)");
        assert_eq!(dump("a < 2 && b > 4 || x"), "(((a < 2) && (b > 4)) || x)");
    }

    #[test]
    fn arithmetic_is_left_associative() {
        assert_eq!(dump("1 - 2 - 3"), "((1 - 2) - 3)");
        assert_eq!(dump("8 / 4 / 2"), "((8 / 4) / 2)");
    }

    #[test]
    fn assignment_is_right_associative() {
        assert_eq!(dump("a = b = 3"), "(a = (b = 3))");
        assert_eq!(dump("a += b -= 1 + 2"), "(a += (b -= (1 + 2)))");
    }

    #[test]
    fn unary_and_postfix_forms() {
        assert_eq!(dump("-a * 2"), "(-a * 2)");
        assert_eq!(dump("a++ + 1"), "(a++ + 1)");
        assert_eq!(dump("!(a == b)"), "!(a == b)");
        assert_eq!(dump("(1 + 2) * 3"), "((1 + 2) * 3)");
    }

    #[test]
    fn resolves_node_types() {
        with_parser("1 + 2.5", |parser| {
            let expr = parser.parse_expr().unwrap();
            assert_eq!(expr.ty, parser.builder().types.f64());
        });
        with_parser("a < 2", |parser| {
            let expr = parser.parse_expr().unwrap();
            assert_eq!(expr.ty, parser.builder().types.boolean());
        });
        with_parser("a = 2.5", |parser| {
            let expr = parser.parse_expr().unwrap();
            assert_eq!(expr.ty, parser.builder().types.i64());
        });
        with_parser(r#""hi""#, |parser| {
            let expr = parser.parse_expr().unwrap();
            assert_eq!(parser.builder().types.name(expr.ty), "i8*");
        });
        with_parser("'c'", |parser| {
            let expr = parser.parse_expr().unwrap();
            assert_eq!(expr.ty, parser.builder().types.i8());
        });
    }

    #[test]
    fn reports_undefined_symbols_and_operators() {
        let err = error("y + 1");
        assert_eq!(err.kind, DiagnosticKind::Type);
        assert_eq!(err.to_string(), "at t.ks(1,1): undefined symbol 'y'");

        let err = error("x & 2");
        assert_eq!(err.to_string(), "at t.ks(1,3): undefined binary operator 'f64 & i64'");

        let err = error("~x");
        assert_eq!(err.message, "undefined unary operator '~f64'");
    }

    #[test]
    fn reports_syntax_errors() {
        let err = error("1 +");
        assert_eq!(err.kind, DiagnosticKind::Syntax);
        assert_eq!(err.message, "unexpected end of input");

        let err = error("(1 + 2");
        assert_eq!(err.message, "expected ')', got end of input");

        let err = error(")");
        assert_eq!(err.message, "unhandled token ')' (Other)");
    }

    #[test]
    fn checks_calls_against_signatures() {
        with_parser("f(1) f(1, 2) a(1) g(\"%d\", 1, 2)", |parser| {
            let f64 = parser.builder().types.f64();
            let i8 = parser.builder().types.i8();
            let str_ty = parser.builder().types.pointer(i8);
            let f = parser
                .builder()
                .types
                .function_pointer(FunctionSignature::free(f64, vec![f64]));
            let g = parser.builder().types.function_pointer(FunctionSignature {
                vararg: true,
                ..FunctionSignature::free(f64, vec![str_ty])
            });
            parser.define_function(FunctionKey::free("f"), f).unwrap();
            parser.define_function(FunctionKey::free("g"), g).unwrap();

            let call = parser.parse_expr().unwrap();
            assert_eq!(call.to_string(), "f(1)");
            assert_eq!(call.ty, f64);

            let err = parser.parse_expr().unwrap_err();
            assert_eq!(err.message, "wrong number of arguments to f: expected 1, got 2");

            let err = parser.parse_expr().unwrap_err();
            assert_eq!(err.message, "cannot call value of type i64");
            // skip the unparsed argument list
            while !parser.at_text("g") {
                parser.skip().unwrap();
            }

            let call = parser.parse_expr().unwrap();
            assert_eq!(call.to_string(), r#"g("%d", 1, 2)"#);
        });
    }

    #[test]
    fn members_and_indexing() {
        with_parser("p.y q!x q.x p.z xs[a] a[1]", |parser| {
            let types = &mut parser.builder().types;
            let i64 = types.i64();
            let f64 = types.f64();
            let point = types.structure(vec![StructMember::new(i64, "x"), StructMember::new(f64, "y")]);
            let point_ptr = types.pointer(point);
            let xs = types.array(f64, 3);
            parser.define_symbol("p", point);
            parser.define_symbol("q", point_ptr);
            parser.define_symbol("xs", xs);

            assert_eq!(parser.parse_expr().unwrap().ty, f64);
            let deref = parser.parse_expr().unwrap();
            assert_eq!(deref.to_string(), "q!x");
            assert_eq!(deref.ty, i64);

            let err = parser.parse_expr().unwrap_err();
            assert_eq!(err.message, "no member 'x' in type { i64 x, f64 y }*");
            let err = parser.parse_expr().unwrap_err();
            assert_eq!(err.message, "no member 'z' in type { i64 x, f64 y }");

            assert_eq!(parser.parse_expr().unwrap().ty, f64);
            let err = parser.parse_expr().unwrap_err();
            assert_eq!(err.message, "cannot index into type i64");
        });
    }

    #[test]
    fn member_functions_are_found_by_self_type() {
        with_parser("p.norm", |parser| {
            let types = &mut parser.builder().types;
            let f64 = types.f64();
            let point = types.structure(vec![StructMember::new(f64, "x")]);
            let norm = types.function_pointer(FunctionSignature {
                mode: FunctionMode::Member,
                self_type: Some(point),
                ..FunctionSignature::free(f64, vec![])
            });
            parser.define_symbol("p", point);
            parser.define_function(FunctionKey::member(point, "norm"), norm).unwrap();

            let expr = parser.parse_expr().unwrap();
            assert_eq!(expr.ty, norm);
        });
    }

    fn type_name(source: &str) -> Result<String> {
        with_parser(source, |parser| {
            let ty = parser.parse_type()?;
            Ok(parser.builder().types.name(ty).to_string())
        })
    }

    #[test]
    fn parses_type_expressions() {
        assert_eq!(type_name("i8**").unwrap(), "i8**");
        assert_eq!(type_name("i64[4]").unwrap(), "i64[4]");
        assert_eq!(type_name("f32[2][3]").unwrap(), "f32[2][3]");
        assert_eq!(
            type_name("struct { i64 x, f64 y }").unwrap(),
            "{ i64 x, f64 y }"
        );
        assert_eq!(type_name("struct").unwrap(), "{}");
        assert_eq!(type_name("f64(i8*, ?)").unwrap(), "f64(i8*,?)");
        assert_eq!(type_name("void()").unwrap(), "void()");
        assert_eq!(
            type_name("void(:struct { i64 n })(i64)").unwrap(),
            "void(:{ i64 n })(i64)"
        );
        assert_eq!(type_name("i64(+i64)()").unwrap(), "i64(+i64)()");
    }

    #[test]
    fn rejects_bad_type_expressions() {
        let err = type_name("nope*").unwrap_err();
        assert_eq!(err.to_string(), "at t.ks(1,1): undefined type 'nope'");

        let err = type_name("i64[a]").unwrap_err();
        assert_eq!(err.message, "array length must be a constant integer");
    }

    #[test]
    fn scopes_hide_inner_bindings() {
        with_parser("inner", |parser| {
            let i64 = parser.builder().types.i64();
            parser.push_scope();
            parser.define_symbol("inner", i64);
            assert_eq!(parser.symbol("inner"), Some(i64));
            parser.pop_scope();
            assert_eq!(parser.symbol("inner"), None);
            assert_eq!(parser.symbol("a"), Some(i64));
        });
    }

    #[test]
    fn statement_handlers_take_over_their_keyword() {
        fn skip_keyword(parser: &mut Parser<'_, '_>) -> Result<Stmt> {
            parser.skip()?;
            parser.parse_statement()
        }
        with_parser("noise a + 1", |parser| {
            parser.statement("noise", skip_keyword);
            let stmt = parser.parse_statement().unwrap();
            assert_eq!(stmt.to_string(), "(a + 1)");
            assert!(parser.at_eof());
        });
    }

    #[test]
    fn lexical_errors_surface_once_and_parsing_resumes() {
        with_parser(r"'\xZZ' a", |parser| {
            let err = parser.parse_statement().unwrap_err();
            assert_eq!(err.kind, DiagnosticKind::Lexical);
            assert_eq!(parser.consumed(), 1);
            assert_eq!(parser.parse_statement().unwrap().to_string(), "a");
        });
    }
}
