//! String interning for literals and runtime names.
//!
//! Unique strings are stored once in a vector and referenced by [`StringId`],
//! so the constant pool, function objects and struct objects carry 4-byte
//! ids instead of owned strings. Lookups during execution happen only for
//! output and error messages.

use ahash::AHashMap;

/// Index into the interner's storage.
///
/// `u32` keeps pool constants and heap headers small; four billion unique
/// strings is far more than any program needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StringId(u32);

impl StringId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The string interner. Owned by the compile context and shared with the VM.
#[derive(Debug, Default)]
pub struct Interns {
    strings: Vec<String>,
    lookup: AHashMap<String, StringId>,
}

impl Interns {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns a string, returning the existing id when already present.
    pub fn intern(&mut self, s: &str) -> StringId {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = StringId(u32::try_from(self.strings.len()).expect("interner exceeds u32 range"));
        self.strings.push(s.to_owned());
        self.lookup.insert(s.to_owned(), id);
        id
    }

    /// Returns the interned string for an id.
    ///
    /// # Panics
    /// Panics on an id that was not produced by this interner.
    #[must_use]
    pub fn get(&self, id: StringId) -> &str {
        &self.strings[id.index()]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_is_idempotent() {
        let mut interns = Interns::new();
        let a = interns.intern("hello");
        let b = interns.intern("hello");
        let c = interns.intern("world");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interns.get(a), "hello");
        assert_eq!(interns.get(c), "world");
        assert_eq!(interns.len(), 2);
    }
}
