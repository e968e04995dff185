//! The builtin-function table.
//!
//! Builtins are seeded into the analyzer's root scope as function variables
//! and dispatched at runtime by `CallBltin` on the tag pushed by
//! `BltinFnSet`. They never occupy a variable slot.

use strum::{Display, FromRepr, IntoStaticStr};

use crate::types::Type;

/// Builtin function kinds. The `#[repr(u8)]` discriminant is the
/// `BltinFnSet` operand.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FromRepr, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Builtin {
    Print,
    Println,
    ObjectId,
    Len,
    ToFloat,
    Error,
}

impl Builtin {
    /// All builtins, in the order they are seeded into the root scope.
    pub const ALL: [Self; 6] = [
        Self::Print,
        Self::Println,
        Self::ObjectId,
        Self::Len,
        Self::ToFloat,
        Self::Error,
    ];

    /// The source-language name.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Print => "print",
            Self::Println => "println",
            Self::ObjectId => "objectid",
            Self::Len => "len",
            Self::ToFloat => "tofloat",
            Self::Error => "error",
        }
    }

    /// The signature used by overload resolution and argument checking.
    #[must_use]
    pub fn signature(self) -> (Vec<Type>, Type) {
        match self {
            Self::Print | Self::Println => (vec![Type::AnyVararg], Type::None),
            Self::ObjectId => (vec![Type::Any], Type::Int),
            Self::Len => (vec![Type::Str], Type::Int),
            Self::ToFloat => (vec![Type::Int], Type::Float),
            Self::Error => (vec![Type::Str], Type::Error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discriminants_round_trip() {
        for b in Builtin::ALL {
            assert_eq!(Builtin::from_repr(b as u8), Some(b));
        }
    }

    #[test]
    fn names_match_the_source_language() {
        assert_eq!(Builtin::Print.name(), "print");
        assert_eq!(Builtin::ToFloat.name(), "tofloat");
        assert_eq!(Builtin::ObjectId.name(), "objectid");
    }
}
