//! Binary/unary operator kinds and the operator registry.
//!
//! The registry maps `(operator, lhs type, rhs type)` to a result type and,
//! for user-defined overloads, the function variable that implements the
//! operation. Built-in entries cover Int and Float arithmetic and
//! comparisons, Bool equality and logic, and `+` on String. A back-quoted
//! `` fn `+`(a: T, b: U): V `` definition registers a user entry; the
//! analyzer rewrites the binary node into a call of that function.

use std::fmt;

use crate::{
    ast::VarId,
    types::{self, Type},
};

/// Binary operator kinds, one per overloadable token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    Shl,
    Shr,
    LogAnd,
    LogOr,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Eq => "==",
            Self::NotEq => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Shl => "<<",
            Self::Shr => ">>",
            Self::LogAnd => "&&",
            Self::LogOr => "||",
        };
        f.write_str(s)
    }
}

/// Prefix operator kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `!x`
    Not,
    /// `++x`
    Inc,
    /// `--x`
    Dec,
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Neg => "-",
            Self::Not => "!",
            Self::Inc => "++",
            Self::Dec => "--",
        };
        f.write_str(s)
    }
}

/// One registry entry: the operand types it applies to, the result type, and
/// the implementing function for user overloads (`None` for built-ins).
#[derive(Debug, Clone)]
pub struct OpDef {
    pub op: BinOp,
    pub lhs: Type,
    pub rhs: Type,
    pub ret: Type,
    pub impl_var: Option<VarId>,
}

/// The operator registry.
///
/// Entries are few (a couple dozen built-ins plus user overloads), so lookup
/// is a linear scan with structural type matching. User entries are appended
/// after the built-ins and matched in the same pass; a duplicate signature is
/// rejected at registration time.
#[derive(Debug)]
pub struct OperatorTable {
    defs: Vec<OpDef>,
}

impl OperatorTable {
    /// Builds the registry with the built-in entries.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut defs = Vec::new();

        let arith = [BinOp::Add, BinOp::Sub, BinOp::Mul, BinOp::Div, BinOp::Mod];
        let cmp = [BinOp::Eq, BinOp::NotEq, BinOp::Lt, BinOp::Lte, BinOp::Gt, BinOp::Gte];

        for op in arith {
            defs.push(builtin(op, Type::Int, Type::Int, Type::Int));
            defs.push(builtin(op, Type::Float, Type::Float, Type::Float));
        }
        for op in cmp {
            defs.push(builtin(op, Type::Int, Type::Int, Type::Bool));
            defs.push(builtin(op, Type::Float, Type::Float, Type::Bool));
        }
        for op in [BinOp::Eq, BinOp::NotEq, BinOp::LogAnd, BinOp::LogOr] {
            defs.push(builtin(op, Type::Bool, Type::Bool, Type::Bool));
        }
        defs.push(builtin(BinOp::Add, Type::Str, Type::Str, Type::Str));

        Self { defs }
    }

    /// Finds the entry for `op` applied to `(lhs, rhs)`, or `None` when the
    /// operation is undefined for those types.
    #[must_use]
    pub fn lookup(&self, op: BinOp, lhs: &Type, rhs: &Type) -> Option<&OpDef> {
        self.defs
            .iter()
            .find(|d| d.op == op && types::checktype(&d.lhs, lhs) && types::checktype(&d.rhs, rhs))
    }

    /// Registers a user-defined overload.
    ///
    /// Returns `Err` when an entry for the same operator and operand types
    /// already exists (built-in or user), which the analyzer reports as a
    /// duplicate operator definition.
    pub fn register(&mut self, def: OpDef) -> Result<(), ()> {
        if self.lookup(def.op, &def.lhs, &def.rhs).is_some() {
            return Err(());
        }
        self.defs.push(def);
        Ok(())
    }
}

fn builtin(op: BinOp, lhs: Type, rhs: Type, ret: Type) -> OpDef {
    OpDef {
        op,
        lhs,
        rhs,
        ret,
        impl_var: None,
    }
}
