//! Interface to the IR backend.
//!
//! The toolkit never talks about concrete instructions on its own: the
//! value model and the operator registry pick one of the abstract operations
//! below and the backend turns it into whatever its IR looks like. Values and
//! blocks are referred to through opaque handles owned by the backend.

use crate::diagnostic::Result;
use crate::types::{TypeContext, TypeId};

/// Backend-native value (constant, register, global, function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(u32);

impl Handle {
    pub fn new(index: u32) -> Self {
        Handle(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

/// Basic block inside a function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u32);

impl BlockId {
    pub fn new(index: u32) -> Self {
        BlockId(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryInst {
    Add,
    Sub,
    Mul,
    SDiv,
    SRem,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

/// Comparison predicate. Integers compare signed, floats compare ordered,
/// pointers compare as unsigned addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Predicate {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastInst {
    SignExtend,
    ZeroExtend,
    Truncate,
    SignedToFloat,
    UnsignedToFloat,
    FloatToSigned,
    FloatExtend,
    FloatTruncate,
    IntToPointer,
    PointerToInt,
    PointerCast,
}

pub trait Backend {
    fn const_int(&mut self, types: &TypeContext, ty: TypeId, value: u64) -> Handle;
    fn const_float(&mut self, types: &TypeContext, ty: TypeId, value: f64) -> Handle;
    /// Zero of a scalar type (null for pointers).
    fn const_zero(&mut self, types: &TypeContext, ty: TypeId) -> Handle;
    /// Address of a NUL-terminated global byte string.
    fn const_string(&mut self, bytes: &[u8]) -> Handle;

    fn binary(
        &mut self,
        types: &TypeContext,
        inst: BinaryInst,
        ty: TypeId,
        lhs: Handle,
        rhs: Handle,
    ) -> Result<Handle>;
    fn negate(&mut self, types: &TypeContext, ty: TypeId, value: Handle) -> Result<Handle>;
    /// Compare two operands of `operand_ty`, producing an `i1`.
    fn compare(
        &mut self,
        types: &TypeContext,
        predicate: Predicate,
        operand_ty: TypeId,
        lhs: Handle,
        rhs: Handle,
    ) -> Result<Handle>;
    fn cast(
        &mut self,
        types: &TypeContext,
        inst: CastInst,
        value: Handle,
        from: TypeId,
        to: TypeId,
    ) -> Result<Handle>;

    /// Stack slot in the entry block of the current function.
    fn alloca(&mut self, types: &TypeContext, ty: TypeId) -> Result<Handle>;
    fn load(&mut self, types: &TypeContext, ty: TypeId, address: Handle) -> Result<Handle>;
    fn store(&mut self, types: &TypeContext, ty: TypeId, value: Handle, address: Handle) -> Result<()>;
    /// Address computation over `aggregate` starting at `address`, one typed
    /// index per level.
    fn element_address(
        &mut self,
        types: &TypeContext,
        aggregate: TypeId,
        address: Handle,
        indices: &[(TypeId, Handle)],
    ) -> Result<Handle>;
    fn member_address(
        &mut self,
        types: &TypeContext,
        structure: TypeId,
        address: Handle,
        index: u32,
    ) -> Result<Handle>;
    /// Call `callee` of function type `function_ty`. Arguments are already
    /// converted, including any implicit self address.
    fn call(
        &mut self,
        types: &TypeContext,
        function_ty: TypeId,
        callee: Handle,
        args: &[(TypeId, Handle)],
    ) -> Result<Handle>;

    /// Declare (or fetch the existing declaration of) a function.
    fn declare_function(&mut self, types: &TypeContext, name: &str, function_ty: TypeId) -> Handle;
    fn parameter(&self, function: Handle, index: usize) -> Option<Handle>;
    fn has_body(&self, function: Handle) -> bool;
    /// Remove every block of a function, turning it back into a declaration.
    fn discard_body(&mut self, function: Handle);

    fn append_block(&mut self, function: Handle, name: &str) -> Result<BlockId>;
    fn insert_block(&self) -> Option<BlockId>;
    fn position_at_end(&mut self, block: BlockId);
    fn clear_position(&mut self);
    fn branch(&mut self, target: BlockId) -> Result<()>;
    fn cond_branch(&mut self, condition: Handle, then_block: BlockId, else_block: BlockId) -> Result<()>;
    fn phi(&mut self, types: &TypeContext, ty: TypeId, incoming: &[(Handle, BlockId)]) -> Result<Handle>;
    fn ret(&mut self, types: &TypeContext, ty: TypeId, value: Option<Handle>) -> Result<()>;

    /// Render the finished module.
    fn finish(&self) -> String;
}
