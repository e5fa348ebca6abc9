//! Compilation driver.
//!
//! A [`Pipeline`] is configured once with a language's keywords, prefix
//! expressions and operators, then compiles any number of sources. Each
//! compilation gets its own type table, environment and copy of the
//! operator registry.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::ast::{Expr, Stmt};
use crate::builder::Builder;
use crate::codegen_llvm::LlvmTextBackend;
use crate::diagnostic::{Diagnostic, Result};
use crate::error::CoreError;
use crate::operators::{BinaryOperator, OperatorRegistry, UnaryOperator};
use crate::parser::{ExpressionHandler, Parser, StatementHandler};
use crate::types::FunctionSignature;

#[derive(Debug, Clone)]
pub struct Pipeline {
    statements: HashMap<String, StatementHandler>,
    expressions: HashMap<String, ExpressionHandler>,
    operators: OperatorRegistry,
    module_id: Option<String>,
    dump_ast: bool,
    wrap_top_level_expressions: bool,
}

/// Outcome of compiling one source.
#[derive(Debug)]
pub struct Compilation {
    /// Textual IR of every statement that generated successfully.
    pub module: String,
    pub diagnostics: Vec<Diagnostic>,
    /// `location:\n<tree>` per parsed statement, when enabled.
    pub ast_dump: Vec<String>,
}

impl Compilation {
    pub fn has_errors(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// The module, or every diagnostic if there was any.
    pub fn into_result(self) -> Result<String, CoreError> {
        if self.diagnostics.is_empty() {
            Ok(self.module)
        } else {
            Err(CoreError::Compilation(self.diagnostics))
        }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// A pipeline with the default operators and no language extensions.
    pub fn new() -> Self {
        Pipeline {
            statements: HashMap::new(),
            expressions: HashMap::new(),
            operators: OperatorRegistry::with_defaults(),
            module_id: None,
            dump_ast: false,
            wrap_top_level_expressions: false,
        }
    }

    pub fn statement(mut self, text: impl Into<String>, handler: StatementHandler) -> Self {
        self.statements.insert(text.into(), handler);
        self
    }

    pub fn expression(mut self, text: impl Into<String>, handler: ExpressionHandler) -> Self {
        self.expressions.insert(text.into(), handler);
        self
    }

    pub fn binary_operator(mut self, text: impl Into<String>, operator: BinaryOperator) -> Self {
        self.operators.register_binary(text, operator);
        self
    }

    pub fn unary_operator(mut self, text: impl Into<String>, operator: UnaryOperator) -> Self {
        self.operators.register_unary(text, operator);
        self
    }

    /// Module identifier written into the output. Defaults to the file stem
    /// of the compiled source.
    pub fn module_id(mut self, id: impl Into<String>) -> Self {
        self.module_id = Some(id.into());
        self
    }

    pub fn dump_ast(mut self, enabled: bool) -> Self {
        self.dump_ast = enabled;
        self
    }

    /// Generate each bare top-level expression inside its own
    /// `__anon_expr.N` function.
    pub fn wrap_top_level_expressions(mut self, enabled: bool) -> Self {
        self.wrap_top_level_expressions = enabled;
        self
    }

    pub fn compile(&self, filename: &str, source: &str) -> Compilation {
        let module_id = self.module_id.clone().unwrap_or_else(|| {
            Path::new(filename)
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| filename.to_string())
        });
        debug!(filename, module_id = %module_id, "compile");

        let backend = LlvmTextBackend::new(module_id, filename);
        let mut builder = Builder::new(Box::new(backend), self.operators.clone());
        let mut diagnostics = Vec::new();
        let mut ast_dump = Vec::new();

        let mut parser = Parser::new(&mut builder, filename, source);
        for (text, handler) in &self.statements {
            parser.statement(text.clone(), *handler);
        }
        for (text, handler) in &self.expressions {
            parser.expression(text.clone(), *handler);
        }

        let mut anonymous = 0;
        while !parser.finished() {
            let before = parser.consumed();
            let stmt = match parser.parse_statement() {
                Ok(stmt) => stmt,
                Err(diag) => {
                    debug!(%diag, "statement rejected");
                    // retrying at the offending token reports the same error
                    if diagnostics.last() != Some(&diag) {
                        diagnostics.push(diag);
                    }
                    // always make progress
                    if parser.consumed() == before {
                        if let Err(diag) = parser.skip() {
                            diagnostics.push(diag);
                        }
                    }
                    continue;
                }
            };
            if self.dump_ast {
                ast_dump.push(format!("{}:\n{stmt}", stmt.location()));
            }
            let generated = match &stmt {
                Stmt::Expr(expr) if self.wrap_top_level_expressions => {
                    anonymous += 1;
                    generate_anonymous(parser.builder(), expr, anonymous - 1)
                }
                _ => stmt.generate(parser.builder()),
            };
            if let Err(diag) = generated {
                debug!(%diag, "code generation failed");
                diagnostics.push(diag);
            }
        }
        drop(parser);

        Compilation {
            module: builder.finish(),
            diagnostics,
            ast_dump,
        }
    }

    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<Compilation, CoreError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Ok(self.compile(&path.display().to_string(), &source))
    }
}

fn generate_anonymous(builder: &mut Builder, expr: &Expr, index: usize) -> Result<()> {
    let name = format!("__anon_expr.{index}");
    let function_ty = builder
        .types
        .function(FunctionSignature::free(expr.ty, Vec::new()));
    let frame = builder
        .begin_function(&name, function_ty)
        .map_err(|diag| diag.at(&expr.location))?;
    match expr.generate(builder) {
        Ok(value) => builder
            .finish_function(frame, Some(value))
            .map_err(|diag| diag.at(&expr.location)),
        Err(diag) => {
            builder.abandon_function(frame);
            Err(diag)
        }
    }
}
