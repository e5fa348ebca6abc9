//! Scoped symbol environment.
//!
//! The same structure serves both passes: the parser binds names to
//! [`TypeId`]s, the code generator binds them to [`crate::value::Value`]s.

use std::collections::HashMap;

use crate::types::TypeId;

/// Key of a function in the global table. Member functions are keyed by the
/// struct type they were declared on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub self_type: Option<TypeId>,
    pub name: String,
}

impl FunctionKey {
    pub fn free(name: impl Into<String>) -> Self {
        FunctionKey {
            self_type: None,
            name: name.into(),
        }
    }

    pub fn member(self_type: TypeId, name: impl Into<String>) -> Self {
        FunctionKey {
            self_type: Some(self_type),
            name: name.into(),
        }
    }
}

/// Stack of scope frames plus the global function table.
///
/// `push` copies the innermost frame, so lookups only ever consult the top
/// frame; `pop` throws away everything bound since the matching `push`.
#[derive(Debug, Clone)]
pub struct Environment<T> {
    frames: Vec<HashMap<String, T>>,
    functions: HashMap<FunctionKey, T>,
}

impl<T: Clone> Default for Environment<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone> Environment<T> {
    pub fn new() -> Self {
        Environment {
            frames: vec![HashMap::new()],
            functions: HashMap::new(),
        }
    }

    pub fn push(&mut self) {
        let top = self.frames.last().cloned().unwrap_or_default();
        self.frames.push(top);
    }

    /// Drop the innermost frame. The outermost frame is never removed.
    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn insert(&mut self, name: impl Into<String>, binding: T) {
        if let Some(top) = self.frames.last_mut() {
            top.insert(name.into(), binding);
        }
    }

    /// Resolve a name: local bindings shadow free functions.
    pub fn get(&self, name: &str) -> Option<&T> {
        self.frames
            .last()
            .and_then(|top| top.get(name))
            .or_else(|| self.functions.get(&FunctionKey::free(name)))
    }

    pub fn define_function(&mut self, key: FunctionKey, binding: T) {
        self.functions.insert(key, binding);
    }

    pub fn function(&self, key: &FunctionKey) -> Option<&T> {
        self.functions.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_restores_previous_binding() {
        let mut env = Environment::new();
        env.insert("x", 1);
        env.push();
        env.insert("x", 2);
        env.insert("y", 3);
        assert_eq!(env.get("x"), Some(&2));
        env.pop();
        assert_eq!(env.get("x"), Some(&1));
        assert_eq!(env.get("y"), None);
    }

    #[test]
    fn pushed_frame_sees_outer_bindings() {
        let mut env = Environment::new();
        env.insert("outer", "a");
        env.push();
        assert_eq!(env.get("outer"), Some(&"a"));
        assert_eq!(env.depth(), 2);
    }

    #[test]
    fn functions_survive_scopes_and_are_shadowed_by_locals() {
        let mut env = Environment::new();
        env.push();
        env.define_function(FunctionKey::free("f"), 10);
        env.pop();
        assert_eq!(env.get("f"), Some(&10));

        env.push();
        env.insert("f", 20);
        assert_eq!(env.get("f"), Some(&20));
        env.pop();
        assert_eq!(env.get("f"), Some(&10));
    }

    #[test]
    fn outermost_frame_is_kept() {
        let mut env: Environment<i32> = Environment::new();
        env.pop();
        env.insert("x", 1);
        assert_eq!(env.depth(), 1);
        assert_eq!(env.get("x"), Some(&1));
    }
}
