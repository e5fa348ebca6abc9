//! Kaleidoscope: every value is an `f64`, functions are introduced with
//! `def` and `extern`, and `if c then a else b` is the only control flow.
//! Anything else at the top level is an expression evaluated in its own
//! anonymous function.

use std::fmt;

use kiln_core::ast::{Expr, ExprKind, ExpressionNode, StatementNode, Stmt};
use kiln_core::backend::{BlockId, Handle};
use kiln_core::builder::FunctionFrame;
use kiln_core::diagnostic::Result;
use kiln_core::env::FunctionKey;
use kiln_core::lexer::{Token, TokenKind};
use kiln_core::parser::Parser;
use kiln_core::span::SourceLocation;
use kiln_core::types::{FunctionSignature, TypeId};
use kiln_core::value::Value;
use kiln_core::{Builder, Diagnostic, Pipeline};

/// Pipeline with the Kaleidoscope statements and expressions registered.
pub fn pipeline() -> Pipeline {
    Pipeline::new()
        .statement("def", parse_def)
        .statement("extern", parse_extern)
        .expression("if", parse_if)
        .wrap_top_level_expressions(true)
}

/// `name(a b c)`
#[derive(Debug, Clone)]
struct Prototype {
    location: SourceLocation,
    name: String,
    params: Vec<String>,
}

impl Prototype {
    fn parse(parser: &mut Parser<'_, '_>) -> Result<Self> {
        let Token { location, text: name, .. } = parser.expect(TokenKind::Name)?;
        parser.expect_text("(")?;
        let mut params = Vec::new();
        while !parser.next_if_at(")")? {
            params.push(parser.expect(TokenKind::Name)?.text);
        }
        Ok(Prototype {
            location,
            name,
            params,
        })
    }

    /// Make the function callable from here on.
    fn declare(&self, parser: &mut Parser<'_, '_>) -> Result<()> {
        let signature = self.signature(parser.builder());
        let function_ptr = parser.builder().types.function_pointer(signature);
        parser
            .define_function(FunctionKey::free(self.name.as_str()), function_ptr)
            .map_err(|diag| diag.at(&self.location))
    }

    fn signature(&self, builder: &Builder) -> FunctionSignature {
        let f64 = builder.types.f64();
        FunctionSignature::free(f64, vec![f64; self.params.len()])
    }

    fn function_type(&self, builder: &mut Builder) -> TypeId {
        let signature = self.signature(builder);
        builder.types.function(signature)
    }
}

impl fmt::Display for Prototype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.params.join(", "))
    }
}

#[derive(Debug)]
struct DefStatement {
    location: SourceLocation,
    proto: Prototype,
    body: Expr,
}

impl DefStatement {
    /// Spill the parameters into stack slots so the body can assign to them.
    fn generate_body(&self, builder: &mut Builder, frame: &FunctionFrame) -> Result<Value> {
        let f64 = builder.types.f64();
        for (index, name) in self.proto.params.iter().enumerate() {
            let Some(param) = builder.parameter(frame, index) else {
                return Err(Diagnostic::codegen(format!("missing parameter '{name}'")));
            };
            let slot = Value::alloca(builder, f64)?;
            slot.set(builder, param)?;
            builder.env.insert(name.as_str(), slot);
        }
        self.body.generate(builder)
    }
}

impl fmt::Display for DefStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "def {} {}", self.proto, self.body)
    }
}

impl StatementNode for DefStatement {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn generate(&self, builder: &mut Builder) -> Result<()> {
        let function_ty = self.proto.function_type(builder);
        let frame = builder.begin_function(&self.proto.name, function_ty)?;
        match self.generate_body(builder, &frame) {
            Ok(value) => builder.finish_function(frame, Some(value)),
            Err(diag) => {
                builder.abandon_function(frame);
                Err(diag)
            }
        }
    }
}

#[derive(Debug)]
struct ExternStatement {
    location: SourceLocation,
    proto: Prototype,
}

impl fmt::Display for ExternStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "extern {}", self.proto)
    }
}

impl StatementNode for ExternStatement {
    fn location(&self) -> &SourceLocation {
        &self.location
    }

    fn generate(&self, builder: &mut Builder) -> Result<()> {
        let function_ty = self.proto.function_type(builder);
        builder.declare_function(&self.proto.name, function_ty)?;
        Ok(())
    }
}

#[derive(Debug)]
struct IfExpression {
    ty: TypeId,
    condition: Expr,
    then: Expr,
    otherwise: Expr,
}

impl IfExpression {
    /// Generate one arm into `block` and jump to `end`. Returns the arm's
    /// value and the block control actually leaves from.
    fn generate_arm(
        &self,
        builder: &mut Builder,
        arm: &Expr,
        block: BlockId,
        end: BlockId,
    ) -> Result<(Handle, BlockId)> {
        builder.emit(|backend, _| backend.position_at_end(block));
        let value = arm
            .generate(builder)?
            .cast(builder, self.ty)
            .map_err(|diag| diag.at(&arm.location))?
            .get(builder)?;
        let exit = builder.emit(|backend, _| backend.insert_block()).unwrap_or(block);
        builder.emit(|backend, _| backend.branch(end))?;
        Ok((value, exit))
    }
}

impl fmt::Display for IfExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "if {} then {} else {}",
            self.condition, self.then, self.otherwise
        )
    }
}

impl ExpressionNode for IfExpression {
    fn generate(&self, builder: &mut Builder) -> Result<Value> {
        let Some(function) = builder.current_function() else {
            return Err(Diagnostic::codegen("'if' outside of a function body"));
        };
        let condition = self.condition.generate(builder)?;
        let flag = builder
            .truth(&condition)
            .map_err(|diag| diag.at(&self.condition.location))?;

        let then_block = builder.emit(|backend, _| backend.append_block(function, "then"))?;
        let else_block = builder.emit(|backend, _| backend.append_block(function, "else"))?;
        let end_block = builder.emit(|backend, _| backend.append_block(function, "end"))?;
        builder.emit(|backend, _| backend.cond_branch(flag, then_block, else_block))?;

        let then = self.generate_arm(builder, &self.then, then_block, end_block)?;
        let otherwise = self.generate_arm(builder, &self.otherwise, else_block, end_block)?;

        builder.emit(|backend, _| backend.position_at_end(end_block));
        let ty = self.ty;
        let merged = builder.emit(|backend, types| backend.phi(types, ty, &[then, otherwise]))?;
        Ok(Value::direct(ty, merged))
    }
}

fn parse_def(parser: &mut Parser<'_, '_>) -> Result<Stmt> {
    let location = parser.expect_text("def")?.location;
    let proto = Prototype::parse(parser)?;
    // the body is consumed even when the prototype clashes
    let declared = proto.declare(parser);
    let f64 = parser.builder().types.f64();
    parser.push_scope();
    for param in &proto.params {
        parser.define_symbol(param.as_str(), f64);
    }
    let body = parser.parse_expr();
    parser.pop_scope();
    declared?;
    Ok(Stmt::Extension(Box::new(DefStatement {
        location,
        proto,
        body: body?,
    })))
}

fn parse_extern(parser: &mut Parser<'_, '_>) -> Result<Stmt> {
    let location = parser.expect_text("extern")?.location;
    let proto = Prototype::parse(parser)?;
    proto.declare(parser)?;
    Ok(Stmt::Extension(Box::new(ExternStatement { location, proto })))
}

fn parse_if(parser: &mut Parser<'_, '_>) -> Result<Expr> {
    let location = parser.expect_text("if")?.location;
    let condition = parser.parse_expr()?;
    parser.expect_text("then")?;
    let then = parser.parse_expr()?;
    parser.expect_text("else")?;
    let otherwise = parser.parse_expr()?;
    let ty = parser
        .builder()
        .types
        .higher_order(then.ty, otherwise.ty)
        .map_err(|diag| diag.at(&location))?;
    let node = IfExpression {
        ty,
        condition,
        then,
        otherwise,
    };
    Ok(Expr::new(location, ty, ExprKind::Extension(Box::new(node))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;

    fn compile(source: &str) -> kiln_core::Compilation {
        pipeline().compile("k.ks", source)
    }

    #[test]
    fn defines_functions_over_stack_slots() {
        let compilation = compile("def add(a b) a + b");
        assert!(!compilation.has_errors(), "{:?}", compilation.diagnostics);
        assert_eq!(
            compilation.module,
            indoc! {r#"
                ; ModuleID = 'k'
                source_filename = "k.ks"

                define double @add(double %arg0, double %arg1) {
                entry:
                  %t0 = alloca double
                  %t1 = alloca double
                  store double %arg0, ptr %t0
                  store double %arg1, ptr %t1
                  %t2 = load double, ptr %t0
                  %t3 = load double, ptr %t1
                  %t4 = fadd double %t2, %t3
                  ret double %t4
                }
            "#}
        );
    }

    #[test]
    fn externs_are_declared_and_callable() {
        let compilation = compile("extern sin(x)\nsin(1)");
        assert!(!compilation.has_errors(), "{:?}", compilation.diagnostics);
        let module = &compilation.module;
        assert!(module.contains("declare double @sin(double)"), "{module}");
        assert!(module.contains("%t0 = sitofp i64 1 to double"), "{module}");
        assert!(module.contains("%t1 = call double @sin(double %t0)"), "{module}");
        assert!(module.contains("define double @__anon_expr.0()"), "{module}");
    }

    #[test]
    fn if_merges_both_arms() {
        let compilation = compile("def fib(n) if n < 2 then n else fib(n - 1) + fib(n - 2)");
        assert!(!compilation.has_errors(), "{:?}", compilation.diagnostics);
        let module = &compilation.module;
        assert!(module.contains("fcmp olt double"), "{module}");
        assert!(module.contains(", label %then1, label %else2"), "{module}");
        assert!(module.contains("call double @fib(double"), "{module}");
        assert!(module.contains("br label %end3"), "{module}");
        assert!(module.contains("phi double ["), "{module}");
    }

    #[test]
    fn if_unifies_arm_types() {
        let compilation = compile("if 1 then 2 else 0.5");
        assert!(!compilation.has_errors(), "{:?}", compilation.diagnostics);
        let module = &compilation.module;
        assert!(module.contains("define double @__anon_expr.0()"), "{module}");
        assert!(module.contains("icmp ne i64 1, 0"), "{module}");
        assert!(module.contains("sitofp i64 2 to double"), "{module}");
    }

    #[test]
    fn parameters_are_assignable() {
        let compilation = compile("def bump(x) x += 1");
        assert!(!compilation.has_errors(), "{:?}", compilation.diagnostics);
        assert!(compilation.module.contains("fadd double"));
    }

    #[test]
    fn redefinition_is_rejected() {
        let compilation = compile("def f(x) x\ndef f(x) x + 1");
        let messages: Vec<_> = compilation
            .diagnostics
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(messages, vec!["at k.ks(2,1): redefinition of function 'f'"]);
    }

    #[test]
    fn conflicting_prototypes_are_rejected() {
        let compilation = compile("extern f(a)\nextern f(a b)\ndef g(x) f(x, x)");
        let messages: Vec<_> = compilation
            .diagnostics
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(messages.len(), 2, "{messages:?}");
        assert!(
            messages[0].starts_with("at k.ks(2,8): conflicting declaration of 'f'"),
            "{messages:?}"
        );
        assert!(
            messages[1].contains("wrong number of arguments to f: expected 1, got 2"),
            "{messages:?}"
        );
        let module = &compilation.module;
        assert!(module.contains("declare double @f(double)"), "{module}");
        assert!(!module.contains("@f(double %"), "{module}");
    }

    #[test]
    fn definitions_must_match_their_extern() {
        let compilation = compile("extern f(a)\ndef f(a b) a + b");
        assert_eq!(compilation.diagnostics.len(), 1);
        let message = compilation.diagnostics[0].to_string();
        assert!(
            message.starts_with("at k.ks(2,5): conflicting declaration of 'f'"),
            "{message}"
        );
        assert!(!compilation.module.contains("define double @f"));
    }

    #[test]
    fn failed_bodies_leave_a_declaration() {
        let compilation = compile("def h(x) 1 = x");
        assert_eq!(compilation.diagnostics.len(), 1);
        assert_eq!(compilation.diagnostics[0].message, "cannot assign to rvalue");
        assert!(compilation.module.contains("declare double @h(double)"));
    }

    #[test]
    fn parameters_do_not_leak_out_of_the_body() {
        let compilation = compile("def id(x) x\nx");
        assert_eq!(
            compilation.diagnostics[0].to_string(),
            "at k.ks(2,1): undefined symbol 'x'"
        );
    }

    #[test]
    fn dumps_extension_nodes() {
        let compilation = pipeline()
            .dump_ast(true)
            .compile("k.ks", "extern cos(t)\ndef g(a b) if a then b else cos(a)");
        assert_eq!(
            compilation.ast_dump,
            vec![
                "k.ks(1,1):\nextern cos(t)",
                "k.ks(2,1):\ndef g(a, b) if a then b else cos(a)",
            ]
        );
    }
}
