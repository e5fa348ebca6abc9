//! Operator registry and the default integer/float operator semantics.
//!
//! Each entry pairs a query (`result`: what type would this produce for an
//! operand type, without touching the backend) with an action (`emit`:
//! produce the value). `emit` returns `Ok(None)` when the operator exists
//! but does not apply to the operand kind; callers turn that into an
//! "undefined operator" diagnostic.

use std::collections::HashMap;

use crate::backend::{BinaryInst, Predicate};
use crate::builder::Builder;
use crate::diagnostic::{Diagnostic, Result};
use crate::types::{TypeContext, TypeId};
use crate::value::Value;

pub type ResultTypeFn = fn(&TypeContext, TypeId) -> Option<TypeId>;
pub type BinaryEmitFn = fn(&mut Builder, &Value, &Value) -> Result<Option<Value>>;
/// Unary action; the flag is `true` when the operator was written before
/// its operand.
pub type UnaryEmitFn = fn(&mut Builder, &Value, bool) -> Result<Option<Value>>;

#[derive(Debug, Clone, Copy)]
pub struct BinaryOperator {
    pub result: ResultTypeFn,
    pub emit: BinaryEmitFn,
}

#[derive(Debug, Clone, Copy)]
pub struct UnaryOperator {
    pub result: ResultTypeFn,
    pub emit: UnaryEmitFn,
}

#[derive(Debug, Clone, Default)]
pub struct OperatorRegistry {
    binary: HashMap<String, BinaryOperator>,
    unary: HashMap<String, UnaryOperator>,
}

impl OperatorRegistry {
    /// A registry without any operator.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        let comparisons: [(&str, BinaryEmitFn); 6] = [
            ("==", |b, l, r| compare(b, l, r, Predicate::Eq)),
            ("!=", |b, l, r| compare(b, l, r, Predicate::Ne)),
            ("<", |b, l, r| compare(b, l, r, Predicate::Lt)),
            (">", |b, l, r| compare(b, l, r, Predicate::Gt)),
            ("<=", |b, l, r| compare(b, l, r, Predicate::Le)),
            (">=", |b, l, r| compare(b, l, r, Predicate::Ge)),
        ];
        for (text, emit) in comparisons {
            registry.register_binary(text, BinaryOperator { result: boolean_result, emit });
        }

        let logical: [(&str, BinaryEmitFn); 3] = [
            ("&&", |b, l, r| logical(b, l, r, BinaryInst::And)),
            ("||", |b, l, r| logical(b, l, r, BinaryInst::Or)),
            ("^^", |b, l, r| logical(b, l, r, BinaryInst::Xor)),
        ];
        for (text, emit) in logical {
            registry.register_binary(text, BinaryOperator { result: boolean_result, emit });
        }

        let arithmetic: [(&str, BinaryEmitFn); 5] = [
            ("+", |b, l, r| arithmetic(b, l, r, BinaryInst::Add, BinaryInst::FAdd)),
            ("-", |b, l, r| arithmetic(b, l, r, BinaryInst::Sub, BinaryInst::FSub)),
            ("*", |b, l, r| arithmetic(b, l, r, BinaryInst::Mul, BinaryInst::FMul)),
            ("/", |b, l, r| arithmetic(b, l, r, BinaryInst::SDiv, BinaryInst::FDiv)),
            ("%", |b, l, r| arithmetic(b, l, r, BinaryInst::SRem, BinaryInst::FRem)),
        ];
        for (text, emit) in arithmetic {
            registry.register_binary(text, BinaryOperator { result: numeric_result, emit });
        }

        // `>>` shifts in zeros, `>>>` keeps the sign.
        let bitwise: [(&str, BinaryEmitFn); 6] = [
            ("&", |b, l, r| bitwise(b, l, r, BinaryInst::And)),
            ("|", |b, l, r| bitwise(b, l, r, BinaryInst::Or)),
            ("^", |b, l, r| bitwise(b, l, r, BinaryInst::Xor)),
            ("<<", |b, l, r| bitwise(b, l, r, BinaryInst::Shl)),
            (">>", |b, l, r| bitwise(b, l, r, BinaryInst::LShr)),
            (">>>", |b, l, r| bitwise(b, l, r, BinaryInst::AShr)),
        ];
        for (text, emit) in bitwise {
            registry.register_binary(text, BinaryOperator { result: integer_result, emit });
        }

        registry.register_unary(
            "++",
            UnaryOperator {
                result: numeric_result,
                emit: |b, v, prefix| step(b, v, prefix, true),
            },
        );
        registry.register_unary(
            "--",
            UnaryOperator {
                result: numeric_result,
                emit: |b, v, prefix| step(b, v, prefix, false),
            },
        );
        registry.register_unary(
            "-",
            UnaryOperator {
                result: numeric_result,
                emit: negate,
            },
        );
        registry.register_unary(
            "!",
            UnaryOperator {
                result: boolean_result,
                emit: logical_not,
            },
        );
        registry.register_unary(
            "~",
            UnaryOperator {
                result: integer_result,
                emit: bitwise_not,
            },
        );

        registry
    }

    /// Add or replace a binary operator.
    pub fn register_binary(&mut self, text: impl Into<String>, operator: BinaryOperator) {
        self.binary.insert(text.into(), operator);
    }

    pub fn register_unary(&mut self, text: impl Into<String>, operator: UnaryOperator) {
        self.unary.insert(text.into(), operator);
    }

    pub fn binary(&self, text: &str) -> Option<BinaryOperator> {
        self.binary.get(text).copied()
    }

    pub fn unary(&self, text: &str) -> Option<UnaryOperator> {
        self.unary.get(text).copied()
    }
}

pub fn undefined_binary(types: &TypeContext, op: &str, lhs: TypeId, rhs: TypeId) -> Diagnostic {
    Diagnostic::codegen(format!(
        "undefined binary operator '{} {op} {}'",
        types.name(lhs),
        types.name(rhs)
    ))
}

pub fn undefined_unary(types: &TypeContext, op: &str, operand: TypeId) -> Diagnostic {
    Diagnostic::codegen(format!(
        "undefined unary operator '{op}{}'",
        types.name(operand)
    ))
}

fn boolean_result(types: &TypeContext, operand: TypeId) -> Option<TypeId> {
    let scalar = types.is_integer(operand) || types.is_float(operand) || types.is_pointer(operand);
    scalar.then(|| types.boolean())
}

fn numeric_result(types: &TypeContext, operand: TypeId) -> Option<TypeId> {
    (types.is_integer(operand) || types.is_float(operand)).then_some(operand)
}

fn integer_result(types: &TypeContext, operand: TypeId) -> Option<TypeId> {
    types.is_integer(operand).then_some(operand)
}

fn compare(builder: &mut Builder, lhs: &Value, rhs: &Value, predicate: Predicate) -> Result<Option<Value>> {
    let ty = lhs.ty();
    if boolean_result(&builder.types, ty).is_none() {
        return Ok(None);
    }
    let l = lhs.get(builder)?;
    let r = rhs.get(builder)?;
    let handle = builder.emit(|backend, types| backend.compare(types, predicate, ty, l, r))?;
    Ok(Some(Value::direct(builder.types.boolean(), handle)))
}

fn logical(builder: &mut Builder, lhs: &Value, rhs: &Value, inst: BinaryInst) -> Result<Option<Value>> {
    if boolean_result(&builder.types, lhs.ty()).is_none() {
        return Ok(None);
    }
    let l = builder.truth(lhs)?;
    let r = builder.truth(rhs)?;
    let boolean = builder.types.boolean();
    let handle = builder.emit(|backend, types| backend.binary(types, inst, boolean, l, r))?;
    Ok(Some(Value::direct(boolean, handle)))
}

fn arithmetic(
    builder: &mut Builder,
    lhs: &Value,
    rhs: &Value,
    int_inst: BinaryInst,
    float_inst: BinaryInst,
) -> Result<Option<Value>> {
    let ty = lhs.ty();
    let inst = if builder.types.is_integer(ty) {
        int_inst
    } else if builder.types.is_float(ty) {
        float_inst
    } else {
        return Ok(None);
    };
    let l = lhs.get(builder)?;
    let r = rhs.get(builder)?;
    let handle = builder.emit(|backend, types| backend.binary(types, inst, ty, l, r))?;
    Ok(Some(Value::direct(ty, handle)))
}

fn bitwise(builder: &mut Builder, lhs: &Value, rhs: &Value, inst: BinaryInst) -> Result<Option<Value>> {
    let ty = lhs.ty();
    if !builder.types.is_integer(ty) {
        return Ok(None);
    }
    let l = lhs.get(builder)?;
    let r = rhs.get(builder)?;
    let handle = builder.emit(|backend, types| backend.binary(types, inst, ty, l, r))?;
    Ok(Some(Value::direct(ty, handle)))
}

/// `++` / `--`: store the stepped value back, yield the new value in prefix
/// position and the old one in postfix position.
fn step(builder: &mut Builder, operand: &Value, prefix: bool, increment: bool) -> Result<Option<Value>> {
    let ty = operand.ty();
    let (one, inst) = if builder.types.is_integer(ty) {
        let inst = if increment { BinaryInst::Add } else { BinaryInst::Sub };
        (builder.const_int(ty, 1), inst)
    } else if builder.types.is_float(ty) {
        let inst = if increment { BinaryInst::FAdd } else { BinaryInst::FSub };
        (builder.const_float(ty, 1.0), inst)
    } else {
        return Ok(None);
    };
    if !operand.is_addressable() {
        return Err(Diagnostic::assignment("cannot assign to rvalue"));
    }
    let old = operand.get(builder)?;
    let one = one.get(builder)?;
    let new = builder.emit(|backend, types| backend.binary(types, inst, ty, old, one))?;
    operand.set(builder, new)?;
    Ok(Some(Value::direct(ty, if prefix { new } else { old })))
}

fn negate(builder: &mut Builder, operand: &Value, _prefix: bool) -> Result<Option<Value>> {
    let ty = operand.ty();
    if numeric_result(&builder.types, ty).is_none() {
        return Ok(None);
    }
    let value = operand.get(builder)?;
    let handle = builder.emit(|backend, types| backend.negate(types, ty, value))?;
    Ok(Some(Value::direct(ty, handle)))
}

fn logical_not(builder: &mut Builder, operand: &Value, _prefix: bool) -> Result<Option<Value>> {
    let ty = operand.ty();
    if boolean_result(&builder.types, ty).is_none() {
        return Ok(None);
    }
    let value = operand.get(builder)?;
    let handle = builder.emit(|backend, types| {
        let zero = backend.const_zero(types, ty);
        backend.compare(types, Predicate::Eq, ty, value, zero)
    })?;
    Ok(Some(Value::direct(builder.types.boolean(), handle)))
}

fn bitwise_not(builder: &mut Builder, operand: &Value, _prefix: bool) -> Result<Option<Value>> {
    let ty = operand.ty();
    if !builder.types.is_integer(ty) {
        return Ok(None);
    }
    let value = operand.get(builder)?;
    let ones = builder.const_int(ty, u64::MAX).get(builder)?;
    let handle = builder.emit(|backend, types| backend.binary(types, BinaryInst::Xor, ty, value, ones))?;
    Ok(Some(Value::direct(ty, handle)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen_llvm::LlvmTextBackend;
    use crate::types::FunctionSignature;

    fn builder() -> Builder {
        let mut builder = Builder::new(
            Box::new(LlvmTextBackend::new("test", "test.ks")),
            OperatorRegistry::with_defaults(),
        );
        let void = builder.types.void();
        let sig = builder.types.function(FunctionSignature::free(void, vec![]));
        builder.begin_function("scratch", sig).expect("function");
        builder
    }

    #[test]
    fn queries_result_types_without_emitting() {
        let mut builder = builder();
        let before = builder.finish();
        let registry = OperatorRegistry::with_defaults();
        let types = &mut builder.types;
        let i64 = types.i64();
        let f64 = types.f64();
        let ptr = types.pointer(i64);

        let add = registry.binary("+").unwrap();
        assert_eq!((add.result)(types, f64), Some(f64));
        assert_eq!((add.result)(types, ptr), None);

        let less = registry.binary("<").unwrap();
        assert_eq!((less.result)(types, f64), Some(types.boolean()));

        let shl = registry.binary("<<").unwrap();
        assert_eq!((shl.result)(types, f64), None);

        let not = registry.unary("!").unwrap();
        assert_eq!((not.result)(types, ptr), Some(types.boolean()));

        assert_eq!(builder.finish(), before);
    }

    #[test]
    fn every_default_operator_is_registered() {
        let registry = OperatorRegistry::with_defaults();
        for text in [
            "==", "!=", "<", ">", "<=", ">=", "&&", "||", "^^", "+", "-", "*", "/", "%", "&", "|",
            "^", "<<", ">>", ">>>",
        ] {
            assert!(registry.binary(text).is_some(), "missing binary {text}");
        }
        for text in ["++", "--", "-", "!", "~"] {
            assert!(registry.unary(text).is_some(), "missing unary {text}");
        }
        assert!(registry.binary("+=").is_none());
    }

    #[test]
    fn integer_and_float_arithmetic() {
        let mut builder = builder();
        let i64 = builder.types.i64();
        let f64 = builder.types.f64();
        let add = builder.operators.binary("+").unwrap();
        let div = builder.operators.binary("/").unwrap();

        let a = builder.const_int(i64, 2);
        let b = builder.const_int(i64, 3);
        let sum = (add.emit)(&mut builder, &a, &b).unwrap().unwrap();
        assert_eq!(sum.ty(), i64);

        let x = builder.const_float(f64, 1.0);
        let quotient = (div.emit)(&mut builder, &x, &x).unwrap().unwrap();
        assert_eq!(quotient.ty(), f64);

        let ir = builder.finish();
        assert!(ir.contains("add i64 2, 3"), "{ir}");
        assert!(ir.contains("fdiv double"), "{ir}");
    }

    #[test]
    fn shifts_distinguish_logical_and_arithmetic() {
        let mut builder = builder();
        let i32 = builder.types.int(32).unwrap();
        let a = builder.const_int(i32, 8);
        let b = builder.const_int(i32, 1);
        let lshr = builder.operators.binary(">>").unwrap();
        let ashr = builder.operators.binary(">>>").unwrap();
        (lshr.emit)(&mut builder, &a, &b).unwrap();
        (ashr.emit)(&mut builder, &a, &b).unwrap();

        let ir = builder.finish();
        assert!(ir.contains("lshr i32 8, 1"), "{ir}");
        assert!(ir.contains("ashr i32 8, 1"), "{ir}");
    }

    #[test]
    fn logical_operators_test_against_zero() {
        let mut builder = builder();
        let f64 = builder.types.f64();
        let a = builder.const_float(f64, 1.0);
        let b = builder.const_float(f64, 0.0);
        let and = builder.operators.binary("&&").unwrap();
        let result = (and.emit)(&mut builder, &a, &b).unwrap().unwrap();
        assert_eq!(result.ty(), builder.types.boolean());

        let ir = builder.finish();
        assert!(ir.contains("fcmp one double 0x3FF0000000000000, 0.0"), "{ir}");
        assert!(ir.contains("and i1 %t0, %t1"), "{ir}");
    }

    #[test]
    fn bitwise_rejects_floats() {
        let mut builder = builder();
        let f64 = builder.types.f64();
        let a = builder.const_float(f64, 1.0);
        let xor = builder.operators.binary("^").unwrap();
        assert!((xor.emit)(&mut builder, &a, &a).unwrap().is_none());
    }

    #[test]
    fn increment_requires_storage() {
        let mut builder = builder();
        let i64 = builder.types.i64();
        let inc = builder.operators.unary("++").unwrap();

        let constant = builder.const_int(i64, 1);
        let err = (inc.emit)(&mut builder, &constant, true).unwrap_err();
        assert_eq!(err.message, "cannot assign to rvalue");

        let slot = Value::alloca(&mut builder, i64).unwrap();
        let post = (inc.emit)(&mut builder, &slot, false).unwrap().unwrap();
        assert!(!post.is_addressable());

        let ir = builder.finish();
        assert!(ir.contains("%t1 = load i64, ptr %t0"), "{ir}");
        assert!(ir.contains("%t2 = add i64 %t1, 1"), "{ir}");
        assert!(ir.contains("store i64 %t2, ptr %t0"), "{ir}");
    }

    #[test]
    fn unary_not_and_complement() {
        let mut builder = builder();
        let i8 = builder.types.i8();
        let value = builder.const_int(i8, 5);
        let not = builder.operators.unary("!").unwrap();
        let complement = builder.operators.unary("~").unwrap();
        let flag = (not.emit)(&mut builder, &value, true).unwrap().unwrap();
        assert_eq!(flag.ty(), builder.types.boolean());
        (complement.emit)(&mut builder, &value, true).unwrap();

        let ir = builder.finish();
        assert!(ir.contains("icmp eq i8 5, 0"), "{ir}");
        assert!(ir.contains("xor i8 5, -1"), "{ir}");
    }
}
