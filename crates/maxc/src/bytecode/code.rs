//! Code objects and the literal pool.
//!
//! A [`Code`] is the compiled bytecode of one function body (or the
//! top-level program). The [`ConstPool`] is shared by a whole compilation
//! unit: every function's bytecode references the same pool, and the REPL
//! appends to it across submissions so indices stay stable.

use std::sync::Arc;

use crate::intern::StringId;

/// Compiled bytecode for a function body or the top-level program.
#[derive(Debug, Clone)]
pub struct Code {
    bytecode: Vec<u8>,
    /// Local slot count; the frame allocates this many locals.
    nlvars: u16,
    /// Maximum operand-stack depth, tracked during emission.
    stack_size: u16,
}

impl Code {
    #[must_use]
    pub fn new(bytecode: Vec<u8>, nlvars: u16, stack_size: u16) -> Self {
        Self {
            bytecode,
            nlvars,
            stack_size,
        }
    }

    #[must_use]
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }

    #[must_use]
    pub fn nlvars(&self) -> u16 {
        self.nlvars
    }

    #[must_use]
    pub fn stack_size(&self) -> u16 {
        self.stack_size
    }
}

/// A compiled user function stored in the literal pool.
#[derive(Debug)]
pub struct Function {
    /// Interned function name, for repr and error messages.
    pub name: StringId,
    /// Parameter count; the VM uses it to place the frame's stack base under
    /// the already-pushed arguments.
    pub nparams: u16,
    pub code: Code,
}

/// One literal-pool constant.
#[derive(Debug)]
pub enum Const {
    /// An integer outside the `IPush` i32 operand range.
    Int(i64),
    Float(f64),
    /// An interned string literal.
    Str(StringId),
    Function(Arc<Function>),
}

/// The literal pool: integers beyond the fast paths, floats, interned
/// strings, and compiled user functions. Indices are `u32` and stable for
/// the life of a compilation unit.
#[derive(Debug, Default)]
pub struct ConstPool {
    consts: Vec<Const>,
}

impl ConstPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, c: Const) -> u32 {
        let idx = u32::try_from(self.consts.len()).expect("literal pool exceeds u32 range");
        self.consts.push(c);
        idx
    }

    /// Adds an integer constant, reusing an existing entry.
    pub fn add_int(&mut self, value: i64) -> u32 {
        if let Some(idx) = self.consts.iter().position(|c| matches!(c, Const::Int(v) if *v == value)) {
            return idx as u32;
        }
        self.push(Const::Int(value))
    }

    /// Adds a float constant, deduplicated by bit pattern.
    pub fn add_float(&mut self, value: f64) -> u32 {
        let bits = value.to_bits();
        if let Some(idx) = self
            .consts
            .iter()
            .position(|c| matches!(c, Const::Float(v) if v.to_bits() == bits))
        {
            return idx as u32;
        }
        self.push(Const::Float(value))
    }

    /// Adds a string constant, reusing an existing entry for the same
    /// interned id.
    pub fn add_str(&mut self, id: StringId) -> u32 {
        if let Some(idx) = self.consts.iter().position(|c| matches!(c, Const::Str(v) if *v == id)) {
            return idx as u32;
        }
        self.push(Const::Str(id))
    }

    /// Adds a compiled function. Functions are never deduplicated; each
    /// definition gets its own entry.
    pub fn add_function(&mut self, function: Function) -> u32 {
        self.push(Const::Function(Arc::new(function)))
    }

    /// Returns the constant at `idx`.
    ///
    /// # Panics
    /// Panics on an out-of-range index; pool indices come from the compiler
    /// and are trusted.
    #[must_use]
    pub fn get(&self, idx: u32) -> &Const {
        &self.consts[idx as usize]
    }

    /// Returns the function at `idx`.
    ///
    /// # Panics
    /// Panics when the entry is not a function; `FunctionSet` operands always
    /// point at function entries.
    #[must_use]
    pub fn function(&self, idx: u32) -> &Arc<Function> {
        match &self.consts[idx as usize] {
            Const::Function(f) => f,
            other => panic!("pool index {idx} is not a function: {other:?}"),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.consts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_and_float_constants_deduplicate() {
        let mut pool = ConstPool::new();
        let a = pool.add_int(1 << 40);
        let b = pool.add_int(1 << 40);
        let c = pool.add_float(2.5);
        let d = pool.add_float(2.5);
        assert_eq!(a, b);
        assert_eq!(c, d);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn negative_zero_is_distinct_from_zero() {
        let mut pool = ConstPool::new();
        let a = pool.add_float(0.0);
        let b = pool.add_float(-0.0);
        assert_ne!(a, b);
    }
}
