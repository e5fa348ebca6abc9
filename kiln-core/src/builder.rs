//! Code generation state shared by every AST node.

use std::collections::HashMap;

use tracing::debug;

use crate::backend::{Backend, BlockId, Handle, Predicate};
use crate::diagnostic::{Diagnostic, Result};
use crate::env::{Environment, FunctionKey};
use crate::operators::OperatorRegistry;
use crate::types::{TypeContext, TypeId};
use crate::value::Value;

/// A function whose body is being generated.
#[derive(Debug)]
pub struct FunctionFrame {
    pub function: Handle,
    pub function_ty: TypeId,
    saved_position: Option<BlockId>,
}

/// Owns everything one compilation needs while emitting code: the type
/// table, the operator registry, the value environment and the backend.
pub struct Builder {
    pub types: TypeContext,
    pub operators: OperatorRegistry,
    pub env: Environment<Value>,
    backend: Box<dyn Backend>,
    functions: Vec<Handle>,
    /// Function type of every symbol declared so far.
    declared: HashMap<String, TypeId>,
}

impl Builder {
    pub fn new(backend: Box<dyn Backend>, operators: OperatorRegistry) -> Self {
        Builder {
            types: TypeContext::new(),
            operators,
            env: Environment::new(),
            backend,
            functions: Vec::new(),
            declared: HashMap::new(),
        }
    }

    /// Run a backend operation with access to the type table.
    pub fn emit<R>(&mut self, op: impl FnOnce(&mut dyn Backend, &TypeContext) -> R) -> R {
        op(self.backend.as_mut(), &self.types)
    }

    pub fn const_int(&mut self, ty: TypeId, value: u64) -> Value {
        let handle = self.emit(|backend, types| backend.const_int(types, ty, value));
        Value::direct(ty, handle)
    }

    pub fn const_float(&mut self, ty: TypeId, value: f64) -> Value {
        let handle = self.emit(|backend, types| backend.const_float(types, ty, value));
        Value::direct(ty, handle)
    }

    /// Global NUL-terminated string, typed `i8*`.
    pub fn const_string(&mut self, bytes: &[u8]) -> Value {
        let i8 = self.types.i8();
        let ty = self.types.pointer(i8);
        let handle = self.emit(|backend, _| backend.const_string(bytes));
        Value::direct(ty, handle)
    }

    /// Reduce a value to an `i1`: booleans pass through, anything else is
    /// compared against zero.
    pub fn truth(&mut self, value: &Value) -> Result<Handle> {
        let ty = value.ty();
        let handle = value.get(self)?;
        if ty == self.types.boolean() {
            return Ok(handle);
        }
        if !(self.types.is_integer(ty) || self.types.is_float(ty) || self.types.is_pointer(ty)) {
            return Err(Diagnostic::type_error(format!(
                "cannot use value of type {} as a condition",
                self.types.name(ty)
            )));
        }
        self.emit(|backend, types| {
            let zero = backend.const_zero(types, ty);
            backend.compare(types, Predicate::Ne, ty, handle, zero)
        })
    }

    /// Declare a free function and bind it by name. Returns the function
    /// value, typed as a pointer to `function_ty`.
    pub fn declare_function(&mut self, name: &str, function_ty: TypeId) -> Result<Value> {
        let handle = self.declare(name, function_ty)?;
        let value = Value::direct(self.types.pointer(function_ty), handle);
        self.env.define_function(FunctionKey::free(name), value);
        Ok(value)
    }

    /// A symbol keeps the type it was first declared with.
    fn declare(&mut self, symbol: &str, function_ty: TypeId) -> Result<Handle> {
        match self.declared.get(symbol) {
            Some(&existing) if existing != function_ty => {
                return Err(Diagnostic::type_error(format!(
                    "conflicting declaration of '{symbol}': {} was declared as {}",
                    self.types.name(function_ty),
                    self.types.name(existing)
                )));
            }
            Some(_) => {}
            None => {
                self.declared.insert(symbol.to_string(), function_ty);
            }
        }
        Ok(self.emit(|backend, types| backend.declare_function(types, symbol, function_ty)))
    }

    /// Declare a function bound to `self_type` (member, constructor or
    /// destructor), reachable through `object.name`.
    pub fn declare_member_function(
        &mut self,
        self_type: TypeId,
        name: &str,
        function_ty: TypeId,
    ) -> Result<Value> {
        let symbol = format!("{}.{name}", self.types.name(self_type));
        let symbol: String = symbol
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
            .collect();
        let handle = self.declare(&symbol, function_ty)?;
        let value = Value::direct(self.types.pointer(function_ty), handle);
        self.env
            .define_function(FunctionKey::member(self_type, name), value);
        Ok(value)
    }

    /// Function currently being generated, if any.
    pub fn current_function(&self) -> Option<Handle> {
        self.functions.last().copied()
    }

    /// Start the body of `name`: declares it if needed, opens an entry block
    /// and a fresh scope. Redefining a function that already has a body fails.
    pub fn begin_function(&mut self, name: &str, function_ty: TypeId) -> Result<FunctionFrame> {
        let function_ptr = self.types.pointer(function_ty);
        let handle = self.declare(name, function_ty)?;
        self.env
            .define_function(FunctionKey::free(name), Value::direct(function_ptr, handle));
        if self.backend.has_body(handle) {
            return Err(Diagnostic::codegen(format!("redefinition of function '{name}'")));
        }
        let saved_position = self.backend.insert_block();
        let entry = self.backend.append_block(handle, "entry")?;
        self.backend.position_at_end(entry);
        self.env.push();
        self.functions.push(handle);
        debug!(function = name, "begin function");
        Ok(FunctionFrame {
            function: handle,
            function_ty,
            saved_position,
        })
    }

    pub fn parameter(&self, frame: &FunctionFrame, index: usize) -> Option<Handle> {
        self.backend.parameter(frame.function, index)
    }

    /// Return `result` (converted to the declared result type) and close the
    /// function.
    pub fn finish_function(&mut self, frame: FunctionFrame, result: Option<Value>) -> Result<()> {
        let result_ty = self
            .types
            .signature(frame.function_ty)
            .map(|signature| signature.result)
            .unwrap_or_else(|| self.types.void());
        let returned = match result {
            Some(value) if !self.types.is_void(result_ty) => {
                let converted = value.cast(self, result_ty);
                match converted.and_then(|value| value.get(self)) {
                    Ok(handle) => Some(handle),
                    Err(diag) => {
                        self.abandon_function(frame);
                        return Err(diag);
                    }
                }
            }
            _ => None,
        };
        let outcome = self.emit(|backend, types| backend.ret(types, result_ty, returned));
        if let Err(diag) = outcome {
            self.abandon_function(frame);
            return Err(diag);
        }
        self.close(&frame);
        Ok(())
    }

    /// Drop a partially generated body, leaving a declaration behind.
    pub fn abandon_function(&mut self, frame: FunctionFrame) {
        self.backend.discard_body(frame.function);
        self.close(&frame);
    }

    fn close(&mut self, frame: &FunctionFrame) {
        self.env.pop();
        self.functions.pop();
        match frame.saved_position {
            Some(block) => self.backend.position_at_end(block),
            None => self.backend.clear_position(),
        }
    }

    /// Render the module generated so far.
    pub fn finish(&self) -> String {
        self.backend.finish()
    }
}
