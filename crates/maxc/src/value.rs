//! Runtime values carried on the operand stack.
//!
//! Small values (ints, floats, bools, chars, function and builtin tags) are
//! stored inline; everything else is a [`HeapId`] into the arena. `Clone` is
//! deliberately not derived: duplicating a heap reference must go through
//! [`Value::clone_with_heap`] so the refcount stays correct, and discarding
//! one must go through [`Value::drop_with_heap`].

use std::fmt::Write as _;

use crate::{
    builtins::Builtin,
    bytecode::code::ConstPool,
    heap::{Heap, HeapData, HeapId},
    intern::Interns,
    vm::NativeId,
};

/// A value on the operand stack, in a local slot, or in a global slot.
#[derive(Debug, PartialEq)]
pub enum Value {
    /// Uninitialized slot marker; loading one is a runtime error.
    Invalid,
    /// The none value: implicit function returns, statement results.
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Char(char),
    /// A compiled user function; the payload is its literal-pool index.
    Function(u32),
    /// A builtin tag pushed by `BltinFnSet`.
    Builtin(Builtin),
    /// A host-registered native function.
    CFunction(NativeId),
    /// A heap object reference.
    Ref(HeapId),
}

impl Value {
    /// Duplicates the value, bumping the refcount for heap references.
    #[must_use]
    pub fn clone_with_heap(&self, heap: &mut Heap) -> Self {
        if let Self::Ref(id) = self {
            heap.inc_ref(*id);
        }
        self.clone_immediate()
    }

    /// Clones without touching the heap. Correct only for immediates or when
    /// the caller separately accounts for the reference.
    #[must_use]
    pub fn clone_immediate(&self) -> Self {
        match self {
            Self::Invalid => Self::Invalid,
            Self::Null => Self::Null,
            Self::Int(n) => Self::Int(*n),
            Self::Float(f) => Self::Float(*f),
            Self::Bool(b) => Self::Bool(*b),
            Self::Char(c) => Self::Char(*c),
            Self::Function(idx) => Self::Function(*idx),
            Self::Builtin(b) => Self::Builtin(*b),
            Self::CFunction(id) => Self::CFunction(*id),
            Self::Ref(id) => Self::Ref(*id),
        }
    }

    /// Releases the value; heap references drop their count.
    pub fn drop_with_heap(self, heap: &mut Heap) {
        if let Self::Ref(id) = self {
            heap.dec_ref(id);
        }
    }

    /// The runtime type name, for REPL echo and error messages.
    #[must_use]
    pub fn type_name(&self, heap: &Heap) -> &'static str {
        match self {
            Self::Invalid => "<invalid>",
            Self::Null => "none",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Bool(_) => "bool",
            Self::Char(_) => "char",
            Self::Function(_) => "fn",
            Self::Builtin(_) => "builtin fn",
            Self::CFunction(_) => "native fn",
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(_) => "string",
                HeapData::List(_) => "list",
                HeapData::Tuple(_) => "tuple",
                HeapData::Struct(_) => "struct",
                HeapData::Err(_) => "error",
                HeapData::ListIter { .. } => "iterator",
            },
        }
    }

    /// Renders the value the way `print` does: strings are written raw,
    /// containers recursively quote their string elements.
    #[must_use]
    pub fn display(&self, heap: &Heap, interns: &Interns, pool: &ConstPool) -> String {
        if let Self::Ref(id) = self {
            if let HeapData::Str(s) = heap.get(*id) {
                return s.clone();
            }
        }
        self.repr(heap, interns, pool)
    }

    /// Renders the value for container elements and REPL echo; strings come
    /// out quoted.
    #[must_use]
    pub fn repr(&self, heap: &Heap, interns: &Interns, pool: &ConstPool) -> String {
        match self {
            Self::Invalid => "<invalid>".to_owned(),
            Self::Null => "none".to_owned(),
            Self::Int(n) => n.to_string(),
            Self::Float(f) => format_float(*f),
            Self::Bool(true) => "true".to_owned(),
            Self::Bool(false) => "false".to_owned(),
            Self::Char(c) => format!("'{c}'"),
            Self::Function(idx) => {
                let name = interns.get(pool.function(*idx).name);
                format!("<fn {name}>")
            }
            Self::Builtin(b) => format!("<builtin fn {}>", b.name()),
            Self::CFunction(_) => "<native fn>".to_owned(),
            Self::Ref(id) => match heap.get(*id) {
                HeapData::Str(s) => format!("\"{s}\""),
                HeapData::List(items) => {
                    let mut out = String::from("[");
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&item.repr(heap, interns, pool));
                    }
                    out.push(']');
                    out
                }
                HeapData::Tuple(items) => {
                    let mut out = String::from("(");
                    for (i, item) in items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&item.repr(heap, interns, pool));
                    }
                    out.push(')');
                    out
                }
                HeapData::Struct(fields) => {
                    let mut out = String::from("{ ");
                    for (i, field) in fields.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(&field.repr(heap, interns, pool));
                    }
                    out.push_str(" }");
                    out
                }
                HeapData::Err(msg) => format!("error(\"{msg}\")"),
                HeapData::ListIter { .. } => "<iterator>".to_owned(),
            },
        }
    }
}

/// Shortest round-trip float formatting, with a trailing `.0` for integral
/// values so floats stay visually distinct from ints.
#[must_use]
pub fn format_float(f: f64) -> String {
    if f.is_finite() {
        let mut buffer = ryu::Buffer::new();
        buffer.format(f).to_owned()
    } else {
        let mut out = String::new();
        let _ = write!(out, "{f}");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_with_heap_bumps_the_count() {
        let mut heap = Heap::new();
        let id = heap.allocate(HeapData::Str("x".to_owned()));
        let a = Value::Ref(id);
        let b = a.clone_with_heap(&mut heap);
        assert_eq!(heap.refcount(id), 2);
        a.drop_with_heap(&mut heap);
        b.drop_with_heap(&mut heap);
        assert!(!heap.is_live(id));
    }

    #[test]
    fn float_formatting_keeps_a_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(2.5), "2.5");
    }
}
