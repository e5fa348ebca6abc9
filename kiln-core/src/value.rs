//! Values produced while generating code.

use crate::backend::{CastInst, Handle};
use crate::builder::Builder;
use crate::diagnostic::{Diagnostic, Result};
use crate::types::{TypeId, TypeKind};

/// Result of evaluating an expression.
///
/// A direct value is the computed backend value itself. An addressable
/// value is a storage location: reading it loads, writing it stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    Direct { ty: TypeId, handle: Handle },
    Addressable { ty: TypeId, address: Handle },
}

impl Value {
    pub fn direct(ty: TypeId, handle: Handle) -> Self {
        Value::Direct { ty, handle }
    }

    pub fn addressable(ty: TypeId, address: Handle) -> Self {
        Value::Addressable { ty, address }
    }

    /// Fresh stack slot of type `ty` in the current function.
    pub fn alloca(builder: &mut Builder, ty: TypeId) -> Result<Self> {
        let address = builder.emit(|backend, types| backend.alloca(types, ty))?;
        Ok(Value::Addressable { ty, address })
    }

    pub fn ty(&self) -> TypeId {
        match self {
            Value::Direct { ty, .. } | Value::Addressable { ty, .. } => *ty,
        }
    }

    pub fn is_addressable(&self) -> bool {
        matches!(self, Value::Addressable { .. })
    }

    pub fn address(&self) -> Option<Handle> {
        match self {
            Value::Addressable { address, .. } => Some(*address),
            Value::Direct { .. } => None,
        }
    }

    /// The value itself, loading it if it lives in memory.
    pub fn get(&self, builder: &mut Builder) -> Result<Handle> {
        match *self {
            Value::Direct { handle, .. } => Ok(handle),
            Value::Addressable { ty, address } => {
                builder.emit(|backend, types| backend.load(types, ty, address))
            }
        }
    }

    pub fn set(&self, builder: &mut Builder, value: Handle) -> Result<()> {
        match *self {
            Value::Addressable { ty, address } => {
                builder.emit(|backend, types| backend.store(types, ty, value, address))
            }
            Value::Direct { .. } => Err(Diagnostic::assignment("cannot assign to rvalue")),
        }
    }

    /// View a pointer value as the storage it points to.
    pub fn dereference(&self, builder: &mut Builder) -> Result<Value> {
        let Some(pointee) = builder.types.pointee(self.ty()) else {
            return Err(Diagnostic::type_error(format!(
                "cannot dereference value of type {}",
                builder.types.name(self.ty())
            )));
        };
        let address = self.get(builder)?;
        Ok(Value::Addressable {
            ty: pointee,
            address,
        })
    }

    /// Convert to `target`. Converting to the value's own type returns the
    /// value untouched.
    pub fn cast(&self, builder: &mut Builder, target: TypeId) -> Result<Value> {
        let source = self.ty();
        if source == target {
            return Ok(*self);
        }
        let types = &builder.types;
        let inst = match (types.kind(source), types.kind(target)) {
            (TypeKind::Integer { bits: from }, TypeKind::Integer { bits: to }) => {
                if to < from {
                    CastInst::Truncate
                } else if *from == 1 {
                    CastInst::ZeroExtend
                } else {
                    CastInst::SignExtend
                }
            }
            (TypeKind::Integer { bits: 1 }, TypeKind::Float { .. }) => CastInst::UnsignedToFloat,
            (TypeKind::Integer { .. }, TypeKind::Float { .. }) => CastInst::SignedToFloat,
            (TypeKind::Integer { .. }, TypeKind::Pointer { .. }) => CastInst::IntToPointer,
            (TypeKind::Float { .. }, TypeKind::Integer { .. }) => CastInst::FloatToSigned,
            (TypeKind::Float { bits: from }, TypeKind::Float { bits: to }) => {
                if to > from {
                    CastInst::FloatExtend
                } else {
                    CastInst::FloatTruncate
                }
            }
            (TypeKind::Pointer { .. }, TypeKind::Integer { .. }) => CastInst::PointerToInt,
            (TypeKind::Pointer { .. }, TypeKind::Pointer { .. }) => CastInst::PointerCast,
            _ => {
                return Err(Diagnostic::codegen(format!(
                    "cannot cast from {} to {}",
                    types.name(source),
                    types.name(target)
                )));
            }
        };
        let handle = self.get(builder)?;
        let converted =
            builder.emit(|backend, types| backend.cast(types, inst, handle, source, target))?;
        Ok(Value::direct(target, converted))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen_llvm::LlvmTextBackend;
    use crate::diagnostic::DiagnosticKind;
    use crate::operators::OperatorRegistry;
    use crate::types::{FunctionSignature, StructMember};

    fn builder_in_function() -> Builder {
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
    fn cast_to_own_type_is_identity() {
        let mut builder = builder_in_function();
        let i64 = builder.types.i64();
        let value = builder.const_int(i64, 7);
        let before = builder.finish();

        let cast = value.cast(&mut builder, i64).unwrap();
        assert_eq!(cast, value);
        assert_eq!(builder.finish(), before);
    }

    #[test]
    fn widening_and_float_conversions() {
        let mut builder = builder_in_function();
        let i32 = builder.types.int(32).unwrap();
        let i64 = builder.types.i64();
        let f64 = builder.types.f64();
        let value = builder.const_int(i32, 3);

        let wide = value.cast(&mut builder, i64).unwrap();
        assert_eq!(wide.ty(), i64);
        let float = wide.cast(&mut builder, f64).unwrap();
        assert_eq!(float.ty(), f64);

        let ir = builder.finish();
        assert!(ir.contains("sext i32 3 to i64"), "{ir}");
        assert!(ir.contains("sitofp i64 %t0 to double"), "{ir}");
    }

    fn resolve(builder: &mut Builder, name: &str) -> TypeId {
        match name.strip_suffix('*') {
            Some(base) => {
                let base = resolve(builder, base);
                builder.types.pointer(base)
            }
            None => builder.types.get(name).expect("primitive"),
        }
    }

    #[test]
    fn cast_matrix_emits_one_conversion_per_pairing() {
        // (from, to, expected instruction; None when nothing is emitted)
        let cases = [
            ("i64", "i32", Some("trunc i64 %t1 to i32")),
            ("i32", "i64", Some("sext i32 %t1 to i64")),
            ("i1", "i8", Some("zext i1 %t1 to i8")),
            ("i64", "f64", Some("sitofp i64 %t1 to double")),
            ("i1", "f32", Some("uitofp i1 %t1 to float")),
            ("f64", "i32", Some("fptosi double %t1 to i32")),
            ("f32", "f64", Some("fpext float %t1 to double")),
            ("f64", "f16", Some("fptrunc double %t1 to half")),
            ("i64", "i8*", Some("inttoptr i64 %t1 to ptr")),
            ("i8*", "i64", Some("ptrtoint ptr %t1 to i64")),
            ("i8*", "f64*", None),
        ];
        for (from, to, expected) in cases {
            let mut builder = builder_in_function();
            let source = resolve(&mut builder, from);
            let target = resolve(&mut builder, to);
            let slot = Value::alloca(&mut builder, source).unwrap();
            let loaded = Value::direct(source, slot.get(&mut builder).unwrap());

            let cast = loaded.cast(&mut builder, target).unwrap();
            assert_eq!(cast.ty(), target, "{from} -> {to}");
            assert!(!cast.is_addressable());

            let ir = builder.finish();
            match expected {
                Some(line) => assert!(ir.contains(&format!("%t2 = {line}")), "{from} -> {to}: {ir}"),
                None => {
                    assert!(!ir.contains("%t2"), "{from} -> {to}: {ir}");
                    assert_eq!(
                        cast.get(&mut builder).unwrap(),
                        loaded.get(&mut builder).unwrap()
                    );
                }
            }
        }
    }

    #[test]
    fn booleans_extend_without_sign() {
        let mut builder = builder_in_function();
        let i1 = builder.types.boolean();
        let i64 = builder.types.i64();
        let flag = builder.const_int(i1, 1);
        flag.cast(&mut builder, i64).unwrap();
        assert!(builder.finish().contains("zext i1 true to i64"));
    }

    #[test]
    fn struct_cast_is_rejected() {
        let mut builder = builder_in_function();
        let i64 = builder.types.i64();
        let pair = builder
            .types
            .structure(vec![StructMember::new(i64, "a"), StructMember::new(i64, "b")]);
        let slot = Value::alloca(&mut builder, pair).unwrap();
        let err = slot.cast(&mut builder, i64).unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Codegen);
        assert_eq!(err.message, "cannot cast from { i64 a, i64 b } to i64");
    }

    #[test]
    fn direct_values_cannot_be_stored_to() {
        let mut builder = builder_in_function();
        let i64 = builder.types.i64();
        let value = builder.const_int(i64, 1);
        let handle = value.get(&mut builder).unwrap();
        let err = value.set(&mut builder, handle).unwrap_err();
        assert_eq!(err.kind, DiagnosticKind::Assignment);
    }

    #[test]
    fn addressable_values_load_and_store() {
        let mut builder = builder_in_function();
        let f64 = builder.types.f64();
        let slot = Value::alloca(&mut builder, f64).unwrap();
        let one = builder.const_float(f64, 1.0);
        let handle = one.get(&mut builder).unwrap();
        slot.set(&mut builder, handle).unwrap();
        slot.get(&mut builder).unwrap();

        let ir = builder.finish();
        assert!(ir.contains("%t0 = alloca double"), "{ir}");
        assert!(ir.contains("store double 0x3FF0000000000000, ptr %t0"), "{ir}");
        assert!(ir.contains("%t1 = load double, ptr %t0"), "{ir}");
    }

    #[test]
    fn dereference_yields_addressable_pointee() {
        let mut builder = builder_in_function();
        let i64 = builder.types.i64();
        let ptr_ty = builder.types.pointer(i64);
        let slot = Value::alloca(&mut builder, ptr_ty).unwrap();
        let target = slot.dereference(&mut builder).unwrap();
        assert!(target.is_addressable());
        assert_eq!(target.ty(), i64);

        let err = target.dereference(&mut builder).unwrap_err();
        assert_eq!(err.message, "cannot dereference value of type i64");
    }
}
