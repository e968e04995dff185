//! The bytecode layer: opcode definitions, code objects with the literal
//! pool, the emitting builder, and the AST-to-bytecode compiler.
//!
//! Bytecode is a flat byte vector: one opcode byte followed by little-endian
//! operands. Jump operands are 32-bit absolute byte offsets patched in place
//! once the target is known.

pub use builder::{CodeBuilder, JumpLabel};
pub use code::{Code, Const, ConstPool, Function};
pub use compiler::{compile_program, compile_repl, EmitCtx};
pub use op::Opcode;

pub mod builder;
pub mod code;
pub mod compiler;
pub mod op;
