//! Interned structural types.
//!
//! Every type lives in a [`TypeContext`] owned by one compilation and is
//! addressed through a [`TypeId`]. Types are keyed by a canonical name
//! derived from their shape, so two structurally identical types always
//! share one id and type equality is a plain `==` on handles.

use std::collections::HashMap;
use std::fmt::Write as _;

use crate::diagnostic::{Diagnostic, Result};

/// Handle to a type interned in a [`TypeContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeId(u32);

/// How a function is invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionMode {
    /// Ordinary function, no self argument.
    Free,
    /// Allocates a fresh `self` on the caller's stack and returns it.
    Constructor,
    /// Receives the address of the object being torn down.
    Destructor,
    /// Receives the address of the object it was looked up on.
    Member,
}

impl FunctionMode {
    fn marker(self) -> &'static str {
        match self {
            FunctionMode::Free => "",
            FunctionMode::Constructor => "+",
            FunctionMode::Destructor => "-",
            FunctionMode::Member => ":",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructMember {
    pub ty: TypeId,
    pub name: String,
}

impl StructMember {
    pub fn new(ty: TypeId, name: impl Into<String>) -> Self {
        StructMember {
            ty,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub mode: FunctionMode,
    pub self_type: Option<TypeId>,
    pub result: TypeId,
    pub params: Vec<TypeId>,
    pub vararg: bool,
}

impl FunctionSignature {
    /// A free function `result(params)`.
    pub fn free(result: TypeId, params: Vec<TypeId>) -> Self {
        FunctionSignature {
            mode: FunctionMode::Free,
            self_type: None,
            result,
            params,
            vararg: false,
        }
    }

    /// Whether a call passes an implicit self address first.
    pub fn takes_self(&self) -> bool {
        self.self_type.is_some() && self.mode != FunctionMode::Free
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    Integer { bits: u32 },
    Float { bits: u32 },
    Pointer { base: TypeId },
    Array { base: TypeId, len: u64 },
    Struct { members: Vec<StructMember> },
    Function(FunctionSignature),
}

#[derive(Debug)]
struct TypeData {
    name: String,
    kind: TypeKind,
    size_bits: u64,
}

/// Per-compilation type table.
#[derive(Debug)]
pub struct TypeContext {
    types: Vec<TypeData>,
    by_name: HashMap<String, TypeId>,
}

const POINTER_BITS: u64 = 64;

impl Default for TypeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeContext {
    /// Create a context holding the primitive types
    /// `void i1 i8 i16 i32 i64 f16 f32 f64`.
    pub fn new() -> Self {
        let mut context = TypeContext {
            types: Vec::new(),
            by_name: HashMap::new(),
        };
        context.intern("void".to_string(), TypeKind::Void);
        for bits in [1, 8, 16, 32, 64] {
            context.intern(format!("i{bits}"), TypeKind::Integer { bits });
        }
        for bits in [16, 32, 64] {
            context.intern(format!("f{bits}"), TypeKind::Float { bits });
        }
        context
    }

    fn intern(&mut self, name: String, kind: TypeKind) -> TypeId {
        if let Some(id) = self.by_name.get(&name) {
            return *id;
        }
        let size_bits = match &kind {
            TypeKind::Void | TypeKind::Function(_) => 0,
            TypeKind::Integer { bits } | TypeKind::Float { bits } => u64::from(*bits),
            TypeKind::Pointer { .. } => POINTER_BITS,
            TypeKind::Array { base, len } => self.size_bits(*base).saturating_mul(*len),
            TypeKind::Struct { members } => members.iter().map(|m| self.size_bits(m.ty)).sum(),
        };
        let id = TypeId(self.types.len() as u32);
        self.by_name.insert(name.clone(), id);
        self.types.push(TypeData {
            name,
            kind,
            size_bits,
        });
        id
    }

    fn data(&self, id: TypeId) -> &TypeData {
        &self.types[id.0 as usize]
    }

    /// Look up a type by its canonical name.
    pub fn get(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn void(&self) -> TypeId {
        TypeId(0)
    }

    /// The boolean type `i1`.
    pub fn boolean(&self) -> TypeId {
        TypeId(1)
    }

    /// Integer type of the given width, if it is one of the primitives.
    pub fn int(&self, bits: u32) -> Option<TypeId> {
        self.get(&format!("i{bits}"))
    }

    pub fn float(&self, bits: u32) -> Option<TypeId> {
        self.get(&format!("f{bits}"))
    }

    pub fn i8(&self) -> TypeId {
        TypeId(2)
    }

    pub fn i64(&self) -> TypeId {
        TypeId(5)
    }

    pub fn f64(&self) -> TypeId {
        TypeId(8)
    }

    pub fn pointer(&mut self, base: TypeId) -> TypeId {
        let name = format!("{}*", self.name(base));
        self.intern(name, TypeKind::Pointer { base })
    }

    pub fn array(&mut self, base: TypeId, len: u64) -> TypeId {
        let name = format!("{}[{len}]", self.name(base));
        self.intern(name, TypeKind::Array { base, len })
    }

    pub fn structure(&mut self, members: Vec<StructMember>) -> TypeId {
        let name = if members.is_empty() {
            "{}".to_string()
        } else {
            let fields: Vec<String> = members
                .iter()
                .map(|m| format!("{} {}", self.name(m.ty), m.name))
                .collect();
            format!("{{ {} }}", fields.join(", "))
        };
        self.intern(name, TypeKind::Struct { members })
    }

    pub fn function(&mut self, signature: FunctionSignature) -> TypeId {
        let mut name = self.name(signature.result).to_string();
        if let Some(self_type) = signature.self_type {
            let _ = write!(name, "({}{})", signature.mode.marker(), self.name(self_type));
        }
        let mut params: Vec<&str> = signature.params.iter().map(|p| self.name(*p)).collect();
        if signature.vararg {
            params.push("?");
        }
        let _ = write!(name, "({})", params.join(","));
        self.intern(name, TypeKind::Function(signature))
    }

    /// Pointer to a free function, the static type of a function value.
    pub fn function_pointer(&mut self, signature: FunctionSignature) -> TypeId {
        let function = self.function(signature);
        self.pointer(function)
    }

    pub fn name(&self, id: TypeId) -> &str {
        &self.data(id).name
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.data(id).kind
    }

    pub fn size_bits(&self, id: TypeId) -> u64 {
        self.data(id).size_bits
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Void)
    }

    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Integer { .. })
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Float { .. })
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer { .. })
    }

    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer { base } => Some(*base),
            _ => None,
        }
    }

    /// Element type reached by indexing a pointer or an array.
    pub fn element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer { base } | TypeKind::Array { base, .. } => Some(*base),
            _ => None,
        }
    }

    /// Index and type of a named struct member.
    pub fn member(&self, id: TypeId, name: &str) -> Option<(u32, TypeId)> {
        match self.kind(id) {
            TypeKind::Struct { members } => members
                .iter()
                .position(|m| m.name == name)
                .map(|index| (index as u32, members[index].ty)),
            _ => None,
        }
    }

    pub fn signature(&self, id: TypeId) -> Option<&FunctionSignature> {
        match self.kind(id) {
            TypeKind::Function(signature) => Some(signature),
            _ => None,
        }
    }

    /// Signature behind a pointer-to-function type.
    pub fn callable(&self, id: TypeId) -> Option<&FunctionSignature> {
        self.pointee(id).and_then(|base| self.signature(base))
    }

    /// Unify two operand types under the implicit promotion rules.
    ///
    /// * identical types unify to themselves
    /// * integer/integer: the wider one (the left one on a tie)
    /// * integer/float: the float
    /// * float/float: the wider one
    /// * pointer with integer or float: the non-pointer side
    pub fn higher_order(&self, a: TypeId, b: TypeId) -> Result<TypeId> {
        if a == b {
            return Ok(a);
        }
        let promoted = match (self.kind(a), self.kind(b)) {
            (TypeKind::Integer { bits: x }, TypeKind::Integer { bits: y })
            | (TypeKind::Float { bits: x }, TypeKind::Float { bits: y }) => {
                Some(if y > x { b } else { a })
            }
            (TypeKind::Integer { .. }, TypeKind::Float { .. }) => Some(b),
            (TypeKind::Float { .. }, TypeKind::Integer { .. }) => Some(a),
            (TypeKind::Integer { .. } | TypeKind::Float { .. }, TypeKind::Pointer { .. }) => Some(a),
            (TypeKind::Pointer { .. }, TypeKind::Integer { .. } | TypeKind::Float { .. }) => Some(b),
            _ => None,
        };
        promoted.ok_or_else(|| {
            Diagnostic::type_error(format!(
                "cannot determine higher order type of {} and {}",
                self.name(a),
                self.name(b)
            ))
        })
    }
}
