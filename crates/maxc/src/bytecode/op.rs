//! Opcode definitions.
//!
//! One byte each; the operand layout is noted per opcode. Arithmetic and
//! comparison come in Int and Float families selected by the emitter from
//! compile-time types, so the VM never re-dispatches on operand tags for the
//! numeric fast path.

use strum::{FromRepr, IntoStaticStr};

/// VM opcodes. The `#[repr(u8)]` discriminant is the encoded byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr, IntoStaticStr)]
pub enum Opcode {
    /// Terminates top-level code.
    End,

    // constants
    PushConst0,
    PushConst1,
    PushConst2,
    PushConst3,
    /// i32 operand pushed as Int.
    IPush,
    /// u32 pool index of an Int constant outside i32 range.
    LPush,
    /// u32 pool index of a Float constant.
    FPush,
    /// u32 pool index of a Str constant; allocates a heap string.
    StrPush,
    /// u32 char code pushed as Char.
    CPush,
    PushTrue,
    PushFalse,
    /// Pushes the null/none value.
    PushNull,

    /// Discards the top of stack, releasing a heap reference.
    Pop,

    // int arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    // float arithmetic
    FAdd,
    FSub,
    FMul,
    FDiv,
    FMod,
    /// String concatenation.
    StrCat,

    // unary
    INeg,
    FNeg,
    Not,
    Inc,
    Dec,

    // int/bool/char comparison
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    // float comparison
    FEq,
    FNotEq,
    FLt,
    FLte,
    FGt,
    FGte,

    // eager boolean logic
    LogOr,
    LogAnd,

    /// u32 absolute target.
    Jmp,
    /// u32 absolute target; jumps when the popped condition is true.
    JmpIfTrue,
    /// u32 absolute target; jumps when the popped condition is false.
    JmpIfFalse,
    /// u32 absolute target; jumps when no error is pending on the frame.
    JmpNoErr,

    /// u16 slot operand.
    StoreLocal,
    LoadLocal,
    StoreGlobal,
    LoadGlobal,

    /// u16 element count; pops that many values pushed in reverse.
    ListSet,
    Subscr,
    SubscrStore,
    /// u16 element count.
    TupleSet,
    /// u16 field count.
    StructSet,
    /// u16 field index.
    MemberLoad,
    MemberStore,
    ListLength,
    /// u32 loop-exit target; pushes the next element or pops the iterator
    /// and jumps when exhausted.
    IterNext,

    /// u32 pool index of a compiled function.
    FunctionSet,
    /// u8 builtin discriminant.
    BltinFnSet,
    /// u32 native-function registry index.
    CFuncSet,
    /// Pops the callee and enters its frame.
    Call,
    /// u8 argument count; pops the builtin tag and the arguments.
    CallBltin,
    Ret,

    // compile-time format hints for print/println
    ShowInt,
    ShowFloat,
    ShowBool,
    ShowChar,
}

impl Opcode {
    /// Fixed stack effect for opcodes whose effect does not depend on an
    /// operand; `None` for the variable ones (`ListSet`, `CallBltin`, `Call`,
    /// ...), which the builder or compiler accounts for explicitly.
    #[must_use]
    pub fn stack_effect(self) -> Option<i16> {
        match self {
            Self::PushConst0
            | Self::PushConst1
            | Self::PushConst2
            | Self::PushConst3
            | Self::IPush
            | Self::LPush
            | Self::FPush
            | Self::StrPush
            | Self::CPush
            | Self::PushTrue
            | Self::PushFalse
            | Self::PushNull
            | Self::FunctionSet
            | Self::BltinFnSet
            | Self::CFuncSet
            | Self::LoadLocal
            | Self::LoadGlobal => Some(1),

            Self::Pop
            | Self::Add
            | Self::Sub
            | Self::Mul
            | Self::Div
            | Self::Mod
            | Self::FAdd
            | Self::FSub
            | Self::FMul
            | Self::FDiv
            | Self::FMod
            | Self::StrCat
            | Self::Eq
            | Self::NotEq
            | Self::Lt
            | Self::Lte
            | Self::Gt
            | Self::Gte
            | Self::FEq
            | Self::FNotEq
            | Self::FLt
            | Self::FLte
            | Self::FGt
            | Self::FGte
            | Self::LogOr
            | Self::LogAnd
            | Self::JmpIfTrue
            | Self::JmpIfFalse
            | Self::StoreLocal
            | Self::StoreGlobal
            | Self::Subscr
            | Self::Ret => Some(-1),

            Self::SubscrStore => Some(-3),
            Self::MemberStore => Some(-2),

            Self::End
            | Self::INeg
            | Self::FNeg
            | Self::Not
            | Self::Inc
            | Self::Dec
            | Self::Jmp
            | Self::JmpNoErr
            | Self::MemberLoad
            | Self::ListLength
            | Self::ShowInt
            | Self::ShowFloat
            | Self::ShowBool
            | Self::ShowChar => Some(0),

            Self::ListSet
            | Self::TupleSet
            | Self::StructSet
            | Self::IterNext
            | Self::Call
            | Self::CallBltin => None,
        }
    }
}
