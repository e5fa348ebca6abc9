//! Code generation for the built-in node kinds.

use tracing::trace;

use crate::ast::{Expr, ExprKind, Stmt};
use crate::backend::Handle;
use crate::builder::Builder;
use crate::diagnostic::{Diagnostic, Result};
use crate::env::FunctionKey;
use crate::operators::{undefined_binary, undefined_unary};
use crate::types::{FunctionMode, TypeId};
use crate::value::Value;

impl Stmt {
    pub fn generate(&self, builder: &mut Builder) -> Result<()> {
        match self {
            Stmt::Expr(expr) => expr.generate(builder).map(|_| ()),
            Stmt::Extension(node) => node
                .generate(builder)
                .map_err(|diag| diag.at(node.location())),
        }
    }
}

impl Expr {
    /// Emit the instructions computing this expression.
    pub fn generate(&self, builder: &mut Builder) -> Result<Value> {
        trace!(location = %self.location, "generate expression");
        self.generate_kind(builder)
            .map_err(|diag| diag.at(&self.location))
    }

    fn generate_kind(&self, builder: &mut Builder) -> Result<Value> {
        match &self.kind {
            ExprKind::Binary { op, lhs, rhs } => generate_binary(builder, op, lhs, rhs),
            ExprKind::Unary {
                op,
                operand,
                prefix,
            } => {
                let value = operand.generate(builder)?;
                let Some(operator) = builder.operators.unary(op) else {
                    return Err(undefined_unary(&builder.types, op, value.ty()));
                };
                (operator.emit)(builder, &value, *prefix)?
                    .ok_or_else(|| undefined_unary(&builder.types, op, value.ty()))
            }
            ExprKind::Call { callee, args } => generate_call(builder, callee, args),
            ExprKind::Index { base, index } => generate_index(builder, base, index),
            ExprKind::Member {
                object,
                member,
                dereference,
            } => {
                let object = object_value(builder, object, *dereference)?;
                let ty = object.ty();
                if let Some((index, member_ty)) = builder.types.member(ty, member) {
                    let Some(address) = object.address() else {
                        return Err(Diagnostic::codegen("cannot get member of constant struct"));
                    };
                    let address = builder
                        .emit(|backend, types| backend.member_address(types, ty, address, index))?;
                    return Ok(Value::addressable(member_ty, address));
                }
                builder
                    .env
                    .function(&FunctionKey::member(ty, member.as_str()))
                    .copied()
                    .ok_or_else(|| {
                        Diagnostic::type_error(format!(
                            "no member '{member}' in type {}",
                            builder.types.name(ty)
                        ))
                    })
            }
            ExprKind::Symbol(name) => builder
                .env
                .get(name)
                .copied()
                .ok_or_else(|| Diagnostic::codegen(format!("no such symbol '{name}'"))),
            ExprKind::ConstChar(c) => Ok(builder.const_int(self.ty, u64::from(*c))),
            ExprKind::ConstFloat(value) => Ok(builder.const_float(self.ty, *value)),
            ExprKind::ConstInt(value) => Ok(builder.const_int(self.ty, *value)),
            ExprKind::ConstString(bytes) => Ok(builder.const_string(bytes)),
            ExprKind::Extension(node) => node.generate(builder),
        }
    }
}

fn generate_binary(builder: &mut Builder, op: &str, lhs: &Expr, rhs: &Expr) -> Result<Value> {
    let left = lhs.generate(builder)?;
    let right = rhs.generate(builder)?;

    if op == "=" {
        if !left.is_addressable() {
            return Err(Diagnostic::assignment("cannot assign to rvalue"));
        }
        let value = right.cast(builder, left.ty())?.get(builder)?;
        left.set(builder, value)?;
        return Ok(left);
    }

    let ty = builder.types.higher_order(left.ty(), right.ty())?;
    let l = left.cast(builder, ty)?;
    let r = right.cast(builder, ty)?;
    let (lhs_ty, rhs_ty) = (left.ty(), right.ty());

    if let Some(operator) = builder.operators.binary(op) {
        return (operator.emit)(builder, &l, &r)?
            .ok_or_else(|| undefined_binary(&builder.types, op, lhs_ty, rhs_ty));
    }

    // compound assignment: `a op= b` stores `a op b` back into `a`
    let compound = op
        .find('=')
        .filter(|position| *position > 0)
        .and_then(|position| builder.operators.binary(&op[..position]));
    let Some(operator) = compound else {
        return Err(undefined_binary(&builder.types, op, lhs_ty, rhs_ty));
    };
    if !left.is_addressable() {
        return Err(Diagnostic::assignment("cannot assign to rvalue"));
    }
    let result = (operator.emit)(builder, &l, &r)?
        .ok_or_else(|| undefined_binary(&builder.types, op, lhs_ty, rhs_ty))?;
    let stored = result.cast(builder, left.ty())?.get(builder)?;
    left.set(builder, stored)?;
    Ok(left)
}

fn generate_call(builder: &mut Builder, callee: &Expr, args: &[Expr]) -> Result<Value> {
    let (Some(signature), Some(function_ty)) = (
        builder.types.callable(callee.ty).cloned(),
        builder.types.pointee(callee.ty),
    ) else {
        return Err(Diagnostic::type_error(format!(
            "cannot call value of type {}",
            builder.types.name(callee.ty)
        )));
    };

    let mut lowered: Vec<(TypeId, Handle)> = Vec::with_capacity(args.len() + 1);
    let mut constructed = None;
    let function = match (signature.mode, signature.self_type) {
        (FunctionMode::Constructor, Some(self_type)) => {
            let slot = Value::alloca(builder, self_type)?;
            let self_ptr = builder.types.pointer(self_type);
            if let Some(address) = slot.address() {
                lowered.push((self_ptr, address));
            }
            constructed = Some(slot);
            callee.generate(builder)?
        }
        (FunctionMode::Member | FunctionMode::Destructor, Some(self_type)) => {
            let ExprKind::Member {
                object,
                member,
                dereference,
            } = &callee.kind
            else {
                return Err(Diagnostic::codegen(
                    "member function called without an object",
                ));
            };
            let object = object_value(builder, object, *dereference)?;
            let Some(address) = object.address() else {
                return Err(Diagnostic::codegen(
                    "cannot call member function on a constant",
                ));
            };
            let self_ptr = builder.types.pointer(self_type);
            lowered.push((self_ptr, address));
            builder
                .env
                .function(&FunctionKey::member(object.ty(), member.as_str()))
                .copied()
                .ok_or_else(|| {
                    Diagnostic::type_error(format!(
                        "no member '{member}' in type {}",
                        builder.types.name(object.ty())
                    ))
                })?
        }
        _ => callee.generate(builder)?,
    };

    for (position, arg) in args.iter().enumerate() {
        let value = arg.generate(builder)?;
        // extra vararg arguments are passed as they are
        let value = match signature.params.get(position) {
            Some(&param) => value.cast(builder, param).map_err(|diag| diag.at(&arg.location))?,
            None => value,
        };
        let handle = value.get(builder)?;
        lowered.push((value.ty(), handle));
    }

    let callee_handle = function.get(builder)?;
    let result =
        builder.emit(|backend, types| backend.call(types, function_ty, callee_handle, &lowered))?;
    Ok(match constructed {
        Some(slot) => slot,
        None => Value::direct(signature.result, result),
    })
}

fn generate_index(builder: &mut Builder, base: &Expr, index: &Expr) -> Result<Value> {
    let base_value = base.generate(builder)?;
    let i64 = builder.types.i64();
    let offset = index
        .generate(builder)?
        .cast(builder, i64)
        .map_err(|diag| diag.at(&index.location))?
        .get(builder)?;
    let base_ty = base_value.ty();

    if let Some(element) = builder.types.pointee(base_ty) {
        let pointer = base_value.get(builder)?;
        let address = builder.emit(|backend, types| {
            backend.element_address(types, element, pointer, &[(i64, offset)])
        })?;
        return Ok(Value::addressable(element, address));
    }
    if let Some(element) = builder.types.element(base_ty) {
        let Some(address) = base_value.address() else {
            return Err(Diagnostic::codegen("cannot index into a constant array"));
        };
        let zero = builder.const_int(i64, 0).get(builder)?;
        let address = builder.emit(|backend, types| {
            backend.element_address(types, base_ty, address, &[(i64, zero), (i64, offset)])
        })?;
        return Ok(Value::addressable(element, address));
    }
    Err(Diagnostic::type_error(format!(
        "cannot index into type {}",
        builder.types.name(base_ty)
    )))
}

fn object_value(builder: &mut Builder, object: &Expr, dereference: bool) -> Result<Value> {
    let value = object.generate(builder)?;
    if dereference {
        value.dereference(builder)
    } else {
        Ok(value)
    }
}
