//! Textual LLVM IR backend.
//!
//! Produces a `.ll` module with opaque pointers. Every instruction result
//! gets a named register (`%t0`, `%t1`, ...) so blocks can be created and
//! discarded in any order without renumbering.

use std::collections::HashMap;
use std::fmt::Write as _;

use tracing::debug;

use crate::backend::{Backend, BinaryInst, BlockId, CastInst, Handle, Predicate};
use crate::diagnostic::{Diagnostic, Result};
use crate::types::{TypeContext, TypeId, TypeKind};

#[derive(Debug)]
struct Block {
    label: String,
    function: usize,
    instructions: Vec<String>,
    terminated: bool,
}

#[derive(Debug)]
struct Function {
    name: String,
    handle: Handle,
    result: String,
    params: Vec<String>,
    vararg: bool,
    param_handles: Vec<Handle>,
    allocas: Vec<String>,
    blocks: Vec<BlockId>,
    next_register: u32,
}

pub struct LlvmTextBackend {
    module_id: String,
    source_filename: String,
    operands: Vec<String>,
    globals: Vec<String>,
    functions: Vec<Function>,
    function_by_name: HashMap<String, usize>,
    function_by_handle: HashMap<Handle, usize>,
    blocks: Vec<Block>,
    position: Option<BlockId>,
}

impl LlvmTextBackend {
    pub fn new(module_id: impl Into<String>, source_filename: impl Into<String>) -> Self {
        LlvmTextBackend {
            module_id: module_id.into(),
            source_filename: source_filename.into(),
            operands: Vec::new(),
            globals: Vec::new(),
            functions: Vec::new(),
            function_by_name: HashMap::new(),
            function_by_handle: HashMap::new(),
            blocks: Vec::new(),
            position: None,
        }
    }

    /// Textual operand a handle stands for, e.g. `%t3`, `42` or `@main`.
    pub fn operand(&self, handle: Handle) -> &str {
        self.operands
            .get(handle.index() as usize)
            .map(String::as_str)
            .unwrap_or("poison")
    }

    fn handle(&mut self, text: String) -> Handle {
        let handle = Handle::new(self.operands.len() as u32);
        self.operands.push(text);
        handle
    }

    fn current(&self) -> Result<BlockId> {
        self.position.ok_or_else(|| {
            Diagnostic::codegen("instruction emitted outside of a function body")
        })
    }

    fn current_function(&mut self) -> Result<&mut Function> {
        let block = self.current()?;
        let index = self.blocks[block.index() as usize].function;
        Ok(&mut self.functions[index])
    }

    fn register(&mut self) -> Result<String> {
        let function = self.current_function()?;
        let name = format!("%t{}", function.next_register);
        function.next_register += 1;
        Ok(name)
    }

    fn emit(&mut self, instruction: String) -> Result<()> {
        let block = self.current()?;
        let block = &mut self.blocks[block.index() as usize];
        if block.terminated {
            return Err(Diagnostic::codegen(format!(
                "block '{}' already has a terminator",
                block.label
            )));
        }
        block.instructions.push(instruction);
        Ok(())
    }

    fn terminate(&mut self, instruction: String) -> Result<()> {
        self.emit(instruction)?;
        let block = self.current()?;
        self.blocks[block.index() as usize].terminated = true;
        Ok(())
    }

    /// Emit `%r = <body>` and return the handle of `%r`.
    fn assign(&mut self, body: String) -> Result<Handle> {
        let register = self.register()?;
        self.emit(format!("{register} = {body}"))?;
        Ok(self.handle(register))
    }

    fn typed(&self, types: &TypeContext, ty: TypeId, value: Handle) -> String {
        format!("{} {}", llvm_type(types, ty), self.operand(value))
    }

    fn label(&self, block: BlockId) -> &str {
        &self.blocks[block.index() as usize].label
    }
}

/// LLVM spelling of a type.
pub fn llvm_type(types: &TypeContext, ty: TypeId) -> String {
    match types.kind(ty) {
        TypeKind::Void => "void".to_string(),
        TypeKind::Integer { bits } => format!("i{bits}"),
        TypeKind::Float { bits: 16 } => "half".to_string(),
        TypeKind::Float { bits: 32 } => "float".to_string(),
        TypeKind::Float { .. } => "double".to_string(),
        TypeKind::Pointer { .. } => "ptr".to_string(),
        TypeKind::Array { base, len } => format!("[{len} x {}]", llvm_type(types, *base)),
        TypeKind::Struct { members } if members.is_empty() => "{}".to_string(),
        TypeKind::Struct { members } => {
            let fields: Vec<String> = members.iter().map(|m| llvm_type(types, m.ty)).collect();
            format!("{{ {} }}", fields.join(", "))
        }
        TypeKind::Function(signature) => {
            let mut params = parameter_types(types, ty);
            if signature.vararg {
                params.push("...".to_string());
            }
            format!("{} ({})", llvm_type(types, signature.result), params.join(", "))
        }
    }
}

/// Lowered parameter list, with the implicit self address first.
fn parameter_types(types: &TypeContext, function_ty: TypeId) -> Vec<String> {
    let Some(signature) = types.signature(function_ty) else {
        return Vec::new();
    };
    let mut params = Vec::with_capacity(signature.params.len() + 1);
    if signature.takes_self() {
        params.push("ptr".to_string());
    }
    params.extend(signature.params.iter().map(|p| llvm_type(types, *p)));
    params
}

fn int_literal(bits: u32, value: u64) -> String {
    if bits == 1 {
        return if value & 1 == 1 { "true" } else { "false" }.to_string();
    }
    if bits >= 64 {
        return (value as i64).to_string();
    }
    let mask = (1u64 << bits) - 1;
    let truncated = value & mask;
    if truncated >> (bits - 1) & 1 == 1 {
        (truncated as i64 - (1i64 << bits)).to_string()
    } else {
        truncated.to_string()
    }
}

fn float_literal(bits: u32, value: f64) -> String {
    match bits {
        16 => format!("0xH{:04X}", half_bits(value)),
        32 => format!("0x{:016X}", f64::from(value as f32).to_bits()),
        _ => format!("0x{:016X}", value.to_bits()),
    }
}

/// IEEE binary16 encoding, rounding toward zero.
fn half_bits(value: f64) -> u16 {
    let bits = (value as f32).to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xFF) as i32;
    let mantissa = bits & 0x7F_FFFF;
    if exponent == 0xFF {
        return sign | 0x7C00 | if mantissa != 0 { 0x200 } else { 0 };
    }
    let rebased = exponent - 127 + 15;
    if rebased >= 0x1F {
        return sign | 0x7C00;
    }
    if rebased <= 0 {
        if rebased < -10 {
            return sign;
        }
        let shifted = (mantissa | 0x80_0000) >> (14 - rebased) as u32;
        return sign | shifted as u16;
    }
    sign | ((rebased as u16) << 10) | (mantissa >> 13) as u16
}

fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        if b.is_ascii_graphic() && b != b'"' && b != b'\\' || b == b' ' {
            out.push(b as char);
        } else {
            let _ = write!(out, "\\{b:02X}");
        }
    }
    out
}

impl Backend for LlvmTextBackend {
    fn const_int(&mut self, types: &TypeContext, ty: TypeId, value: u64) -> Handle {
        let text = match types.kind(ty) {
            TypeKind::Integer { bits } => int_literal(*bits, value),
            _ => value.to_string(),
        };
        self.handle(text)
    }

    fn const_float(&mut self, types: &TypeContext, ty: TypeId, value: f64) -> Handle {
        let text = match types.kind(ty) {
            TypeKind::Float { bits } => float_literal(*bits, value),
            _ => float_literal(64, value),
        };
        self.handle(text)
    }

    fn const_zero(&mut self, types: &TypeContext, ty: TypeId) -> Handle {
        let text = match types.kind(ty) {
            TypeKind::Integer { bits: 1 } => "false",
            TypeKind::Integer { .. } => "0",
            TypeKind::Float { .. } => "0.0",
            TypeKind::Pointer { .. } => "null",
            _ => "zeroinitializer",
        };
        self.handle(text.to_string())
    }

    fn const_string(&mut self, bytes: &[u8]) -> Handle {
        let name = format!("@.str.{}", self.globals.len());
        self.globals.push(format!(
            "{name} = private unnamed_addr constant [{} x i8] c\"{}\\00\"",
            bytes.len() + 1,
            escape_bytes(bytes)
        ));
        self.handle(name)
    }

    fn binary(
        &mut self,
        types: &TypeContext,
        inst: BinaryInst,
        ty: TypeId,
        lhs: Handle,
        rhs: Handle,
    ) -> Result<Handle> {
        let opcode = match inst {
            BinaryInst::Add => "add",
            BinaryInst::Sub => "sub",
            BinaryInst::Mul => "mul",
            BinaryInst::SDiv => "sdiv",
            BinaryInst::SRem => "srem",
            BinaryInst::FAdd => "fadd",
            BinaryInst::FSub => "fsub",
            BinaryInst::FMul => "fmul",
            BinaryInst::FDiv => "fdiv",
            BinaryInst::FRem => "frem",
            BinaryInst::And => "and",
            BinaryInst::Or => "or",
            BinaryInst::Xor => "xor",
            BinaryInst::Shl => "shl",
            BinaryInst::LShr => "lshr",
            BinaryInst::AShr => "ashr",
        };
        let body = format!(
            "{opcode} {}, {}",
            self.typed(types, ty, lhs),
            self.operand(rhs)
        );
        self.assign(body)
    }

    fn negate(&mut self, types: &TypeContext, ty: TypeId, value: Handle) -> Result<Handle> {
        let body = if types.is_float(ty) {
            format!("fneg {}", self.typed(types, ty, value))
        } else {
            format!("sub {} 0, {}", llvm_type(types, ty), self.operand(value))
        };
        self.assign(body)
    }

    fn compare(
        &mut self,
        types: &TypeContext,
        predicate: Predicate,
        operand_ty: TypeId,
        lhs: Handle,
        rhs: Handle,
    ) -> Result<Handle> {
        let (opcode, cond) = match types.kind(operand_ty) {
            TypeKind::Float { .. } => (
                "fcmp",
                match predicate {
                    Predicate::Eq => "oeq",
                    Predicate::Ne => "one",
                    Predicate::Lt => "olt",
                    Predicate::Gt => "ogt",
                    Predicate::Le => "ole",
                    Predicate::Ge => "oge",
                },
            ),
            TypeKind::Pointer { .. } => (
                "icmp",
                match predicate {
                    Predicate::Eq => "eq",
                    Predicate::Ne => "ne",
                    Predicate::Lt => "ult",
                    Predicate::Gt => "ugt",
                    Predicate::Le => "ule",
                    Predicate::Ge => "uge",
                },
            ),
            _ => (
                "icmp",
                match predicate {
                    Predicate::Eq => "eq",
                    Predicate::Ne => "ne",
                    Predicate::Lt => "slt",
                    Predicate::Gt => "sgt",
                    Predicate::Le => "sle",
                    Predicate::Ge => "sge",
                },
            ),
        };
        let body = format!(
            "{opcode} {cond} {}, {}",
            self.typed(types, operand_ty, lhs),
            self.operand(rhs)
        );
        self.assign(body)
    }

    fn cast(
        &mut self,
        types: &TypeContext,
        inst: CastInst,
        value: Handle,
        from: TypeId,
        to: TypeId,
    ) -> Result<Handle> {
        let opcode = match inst {
            // opaque pointers: nothing to emit
            CastInst::PointerCast => return Ok(value),
            CastInst::SignExtend => "sext",
            CastInst::ZeroExtend => "zext",
            CastInst::Truncate => "trunc",
            CastInst::SignedToFloat => "sitofp",
            CastInst::UnsignedToFloat => "uitofp",
            CastInst::FloatToSigned => "fptosi",
            CastInst::FloatExtend => "fpext",
            CastInst::FloatTruncate => "fptrunc",
            CastInst::IntToPointer => "inttoptr",
            CastInst::PointerToInt => "ptrtoint",
        };
        let body = format!(
            "{opcode} {} to {}",
            self.typed(types, from, value),
            llvm_type(types, to)
        );
        self.assign(body)
    }

    fn alloca(&mut self, types: &TypeContext, ty: TypeId) -> Result<Handle> {
        let register = self.register()?;
        let line = format!("{register} = alloca {}", llvm_type(types, ty));
        self.current_function()?.allocas.push(line);
        Ok(self.handle(register))
    }

    fn load(&mut self, types: &TypeContext, ty: TypeId, address: Handle) -> Result<Handle> {
        let body = format!("load {}, ptr {}", llvm_type(types, ty), self.operand(address));
        self.assign(body)
    }

    fn store(&mut self, types: &TypeContext, ty: TypeId, value: Handle, address: Handle) -> Result<()> {
        let line = format!(
            "store {}, ptr {}",
            self.typed(types, ty, value),
            self.operand(address)
        );
        self.emit(line)
    }

    fn element_address(
        &mut self,
        types: &TypeContext,
        aggregate: TypeId,
        address: Handle,
        indices: &[(TypeId, Handle)],
    ) -> Result<Handle> {
        let mut body = format!(
            "getelementptr {}, ptr {}",
            llvm_type(types, aggregate),
            self.operand(address)
        );
        for (ty, index) in indices {
            let _ = write!(body, ", {}", self.typed(types, *ty, *index));
        }
        self.assign(body)
    }

    fn member_address(
        &mut self,
        types: &TypeContext,
        structure: TypeId,
        address: Handle,
        index: u32,
    ) -> Result<Handle> {
        let body = format!(
            "getelementptr {}, ptr {}, i32 0, i32 {index}",
            llvm_type(types, structure),
            self.operand(address)
        );
        self.assign(body)
    }

    fn call(
        &mut self,
        types: &TypeContext,
        function_ty: TypeId,
        callee: Handle,
        args: &[(TypeId, Handle)],
    ) -> Result<Handle> {
        let Some(signature) = types.signature(function_ty) else {
            return Err(Diagnostic::codegen(format!(
                "cannot call value of type {}",
                types.name(function_ty)
            )));
        };
        let callee_ty = if signature.vararg {
            llvm_type(types, function_ty)
        } else {
            llvm_type(types, signature.result)
        };
        let rendered: Vec<String> = args
            .iter()
            .map(|(ty, value)| self.typed(types, *ty, *value))
            .collect();
        let body = format!(
            "call {callee_ty} {}({})",
            self.operand(callee),
            rendered.join(", ")
        );
        if types.is_void(signature.result) {
            self.emit(body)?;
            Ok(self.handle("poison".to_string()))
        } else {
            self.assign(body)
        }
    }

    fn declare_function(&mut self, types: &TypeContext, name: &str, function_ty: TypeId) -> Handle {
        if let Some(&index) = self.function_by_name.get(name) {
            return self.functions[index].handle;
        }
        let index = self.functions.len();
        let params = parameter_types(types, function_ty);
        let param_handles = (0..params.len())
            .map(|i| self.handle(format!("%arg{i}")))
            .collect();
        let (result, vararg) = match types.signature(function_ty) {
            Some(signature) => (llvm_type(types, signature.result), signature.vararg),
            None => ("void".to_string(), false),
        };
        let handle = self.handle(format!("@{name}"));
        self.functions.push(Function {
            name: name.to_string(),
            handle,
            result,
            params,
            vararg,
            param_handles,
            allocas: Vec::new(),
            blocks: Vec::new(),
            next_register: 0,
        });
        self.function_by_name.insert(name.to_string(), index);
        self.function_by_handle.insert(handle, index);
        debug!(function = name, "declared function");
        handle
    }

    fn parameter(&self, function: Handle, index: usize) -> Option<Handle> {
        let function = self.function_by_handle.get(&function)?;
        self.functions[*function].param_handles.get(index).copied()
    }

    fn has_body(&self, function: Handle) -> bool {
        self.function_by_handle
            .get(&function)
            .is_some_and(|index| !self.functions[*index].blocks.is_empty())
    }

    fn discard_body(&mut self, function: Handle) {
        let Some(&index) = self.function_by_handle.get(&function) else {
            return;
        };
        let removed = std::mem::take(&mut self.functions[index].blocks);
        self.functions[index].allocas.clear();
        self.functions[index].next_register = 0;
        if self.position.is_some_and(|block| removed.contains(&block)) {
            self.position = None;
        }
        let name = &self.functions[index].name;
        debug!(function = %name, "discarded function body");
    }

    fn append_block(&mut self, function: Handle, name: &str) -> Result<BlockId> {
        let Some(&index) = self.function_by_handle.get(&function) else {
            return Err(Diagnostic::codegen(format!(
                "'{}' is not a function",
                self.operand(function)
            )));
        };
        let id = BlockId::new(self.blocks.len() as u32);
        let label = if self.functions[index].blocks.is_empty() {
            name.to_string()
        } else {
            format!("{name}{}", id.index())
        };
        self.blocks.push(Block {
            label,
            function: index,
            instructions: Vec::new(),
            terminated: false,
        });
        self.functions[index].blocks.push(id);
        Ok(id)
    }

    fn insert_block(&self) -> Option<BlockId> {
        self.position
    }

    fn position_at_end(&mut self, block: BlockId) {
        self.position = Some(block);
    }

    fn clear_position(&mut self) {
        self.position = None;
    }

    fn branch(&mut self, target: BlockId) -> Result<()> {
        let line = format!("br label %{}", self.label(target));
        self.terminate(line)
    }

    fn cond_branch(&mut self, condition: Handle, then_block: BlockId, else_block: BlockId) -> Result<()> {
        let line = format!(
            "br i1 {}, label %{}, label %{}",
            self.operand(condition),
            self.label(then_block),
            self.label(else_block)
        );
        self.terminate(line)
    }

    fn phi(&mut self, types: &TypeContext, ty: TypeId, incoming: &[(Handle, BlockId)]) -> Result<Handle> {
        let arms: Vec<String> = incoming
            .iter()
            .map(|(value, block)| format!("[ {}, %{} ]", self.operand(*value), self.label(*block)))
            .collect();
        let body = format!("phi {} {}", llvm_type(types, ty), arms.join(", "));
        self.assign(body)
    }

    fn ret(&mut self, types: &TypeContext, ty: TypeId, value: Option<Handle>) -> Result<()> {
        let line = match value {
            Some(value) if !types.is_void(ty) => format!("ret {}", self.typed(types, ty, value)),
            _ => "ret void".to_string(),
        };
        self.terminate(line)
    }

    fn finish(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "; ModuleID = '{}'", self.module_id);
        let _ = writeln!(out, "source_filename = \"{}\"", self.source_filename);
        if !self.globals.is_empty() {
            out.push('\n');
            for global in &self.globals {
                let _ = writeln!(out, "{global}");
            }
        }
        for function in &self.functions {
            out.push('\n');
            let mut params: Vec<String> = if function.blocks.is_empty() {
                function.params.clone()
            } else {
                function
                    .params
                    .iter()
                    .enumerate()
                    .map(|(i, ty)| format!("{ty} %arg{i}"))
                    .collect()
            };
            if function.vararg {
                params.push("...".to_string());
            }
            let head = format!("{} @{}({})", function.result, function.name, params.join(", "));
            if function.blocks.is_empty() {
                let _ = writeln!(out, "declare {head}");
                continue;
            }
            let _ = writeln!(out, "define {head} {{");
            for (position, block) in function.blocks.iter().enumerate() {
                let block = &self.blocks[block.index() as usize];
                let _ = writeln!(out, "{}:", block.label);
                if position == 0 {
                    for alloca in &function.allocas {
                        let _ = writeln!(out, "  {alloca}");
                    }
                }
                for instruction in &block.instructions {
                    let _ = writeln!(out, "  {instruction}");
                }
                if !block.terminated {
                    let _ = writeln!(out, "  unreachable");
                }
            }
            let _ = writeln!(out, "}}");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FunctionSignature;

    #[test]
    fn renders_integer_literals_by_width() {
        assert_eq!(int_literal(1, 1), "true");
        assert_eq!(int_literal(8, 0xFF), "-1");
        assert_eq!(int_literal(64, u64::MAX), "-1");
        assert_eq!(int_literal(32, 7), "7");
    }

    #[test]
    fn renders_float_literals_in_hex() {
        assert_eq!(float_literal(64, 1.0), "0x3FF0000000000000");
        assert_eq!(float_literal(32, 0.5), "0x3FE0000000000000");
        assert_eq!(float_literal(16, 1.0), "0xH3C00");
    }

    #[test]
    fn lowers_composite_types() {
        let mut types = TypeContext::new();
        let i64 = types.i64();
        let f64 = types.f64();
        let arr = types.array(i64, 3);
        let sig = types.function(FunctionSignature {
            vararg: true,
            ..FunctionSignature::free(i64, vec![f64])
        });
        assert_eq!(llvm_type(&types, arr), "[3 x i64]");
        assert_eq!(llvm_type(&types, sig), "i64 (double, ...)");
    }

    #[test]
    fn emits_definition_with_entry_allocas() {
        let mut types = TypeContext::new();
        let f64 = types.f64();
        let sig = types.function(FunctionSignature::free(f64, vec![f64]));
        let mut backend = LlvmTextBackend::new("demo", "demo.ks");

        let function = backend.declare_function(&types, "twice", sig);
        let entry = backend.append_block(function, "entry").unwrap();
        backend.position_at_end(entry);
        let param = backend.parameter(function, 0).unwrap();
        let slot = backend.alloca(&types, f64).unwrap();
        backend.store(&types, f64, param, slot).unwrap();
        let loaded = backend.load(&types, f64, slot).unwrap();
        let sum = backend.binary(&types, BinaryInst::FAdd, f64, loaded, loaded).unwrap();
        backend.ret(&types, f64, Some(sum)).unwrap();

        let module = backend.finish();
        let expected = "define double @twice(double %arg0) {\n\
                        entry:\n  \
                        %t0 = alloca double\n  \
                        store double %arg0, ptr %t0\n  \
                        %t1 = load double, ptr %t0\n  \
                        %t2 = fadd double %t1, %t1\n  \
                        ret double %t2\n\
                        }\n";
        assert!(module.contains(expected), "{module}");
        assert!(module.starts_with("; ModuleID = 'demo'\nsource_filename = \"demo.ks\"\n"));
    }

    #[test]
    fn declarations_and_strings() {
        let mut types = TypeContext::new();
        let i8 = types.i8();
        let i64 = types.i64();
        let str_ty = types.pointer(i8);
        let sig = types.function(FunctionSignature {
            vararg: true,
            ..FunctionSignature::free(i64, vec![str_ty])
        });
        let mut backend = LlvmTextBackend::new("m", "m.ks");
        backend.declare_function(&types, "printf", sig);
        backend.const_string(b"hi\n");

        let module = backend.finish();
        assert!(module.contains("declare i64 @printf(ptr, ...)"), "{module}");
        assert!(
            module.contains("@.str.0 = private unnamed_addr constant [4 x i8] c\"hi\\0A\\00\""),
            "{module}"
        );
    }

    #[test]
    fn refuses_instructions_without_a_block() {
        let types = TypeContext::new();
        let i64 = types.i64();
        let mut backend = LlvmTextBackend::new("m", "m.ks");
        let one = backend.const_int(&types, i64, 1);
        let err = backend
            .binary(&types, BinaryInst::Add, i64, one, one)
            .unwrap_err();
        assert!(err.message.contains("outside of a function body"));
    }

    #[test]
    fn discarding_a_body_leaves_a_declaration() {
        let mut types = TypeContext::new();
        let f64 = types.f64();
        let sig = types.function(FunctionSignature::free(f64, vec![]));
        let mut backend = LlvmTextBackend::new("m", "m.ks");
        let function = backend.declare_function(&types, "broken", sig);
        let entry = backend.append_block(function, "entry").unwrap();
        backend.position_at_end(entry);
        assert!(backend.has_body(function));

        backend.discard_body(function);
        assert!(!backend.has_body(function));
        assert_eq!(backend.insert_block(), None);
        assert!(backend.finish().contains("declare double @broken()"));
    }
}
