//! Builder for emitting bytecode during compilation.
//!
//! `CodeBuilder` encodes opcodes and little-endian operands into raw bytes,
//! manages forward jumps that are patched once the target is known, and
//! tracks the operand-stack depth so the finished [`Code`] carries its
//! maximum stack size.

use super::{code::Code, op::Opcode};

/// Label for a forward jump that needs patching.
///
/// Stores the bytecode offset of the jump instruction. Pass it to
/// [`CodeBuilder::patch_jump`] once the target location is known.
#[derive(Debug, Clone, Copy)]
pub struct JumpLabel(usize);

/// Emits bytecode for one function body.
#[derive(Debug, Default)]
pub struct CodeBuilder {
    bytecode: Vec<u8>,

    /// Current stack depth while emitting straight-line code.
    current_stack_depth: u16,

    /// High-water mark of the stack depth.
    max_stack_depth: u16,
}

impl CodeBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits a no-operand instruction.
    pub fn emit(&mut self, op: Opcode) {
        self.bytecode.push(op as u8);
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits an instruction with a u8 operand.
    ///
    /// `CallBltin` gets its operand-dependent stack effect here: the tag and
    /// the arguments are popped, the result is pushed.
    pub fn emit_u8(&mut self, op: Opcode, operand: u8) {
        self.bytecode.push(op as u8);
        self.bytecode.push(operand);
        if op == Opcode::CallBltin {
            self.adjust_stack(-i16::from(operand));
        } else if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits an instruction with a u16 operand (little-endian).
    ///
    /// The aggregate constructors (`ListSet`, `TupleSet`, `StructSet`) get
    /// their operand-dependent effect here: n values popped, one pushed.
    pub fn emit_u16(&mut self, op: Opcode, operand: u16) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        match op {
            Opcode::ListSet | Opcode::TupleSet | Opcode::StructSet => {
                self.adjust_stack(1 - operand.cast_signed());
            }
            _ => {
                if let Some(effect) = op.stack_effect() {
                    self.adjust_stack(effect);
                }
            }
        }
    }

    /// Emits an instruction with a u32 operand (little-endian).
    pub fn emit_u32(&mut self, op: Opcode, operand: u32) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits an instruction with an i32 operand (little-endian).
    pub fn emit_i32(&mut self, op: Opcode, operand: i32) {
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&operand.to_le_bytes());
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// Emits a forward jump with a placeholder target, returning the label
    /// to patch later.
    #[must_use]
    pub fn emit_jump(&mut self, op: Opcode) -> JumpLabel {
        let label = JumpLabel(self.bytecode.len());
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&0u32.to_le_bytes());
        match op {
            // IterNext pushes the next element on the non-jump path
            Opcode::IterNext => self.adjust_stack(1),
            _ => {
                if let Some(effect) = op.stack_effect() {
                    self.adjust_stack(effect);
                }
            }
        }
        label
    }

    /// Patches a forward jump to land on the current offset.
    ///
    /// Targets are 32-bit absolute byte offsets, written in place over the
    /// placeholder.
    pub fn patch_jump(&mut self, label: JumpLabel) {
        let target = u32::try_from(self.bytecode.len()).expect("bytecode exceeds u32 range");
        let bytes = target.to_le_bytes();
        self.bytecode[label.0 + 1..label.0 + 5].copy_from_slice(&bytes);
    }

    /// Emits a backward jump to a known absolute offset.
    pub fn emit_jump_to(&mut self, op: Opcode, target: usize) {
        let target = u32::try_from(target).expect("bytecode exceeds u32 range");
        self.bytecode.push(op as u8);
        self.bytecode.extend_from_slice(&target.to_le_bytes());
        if let Some(effect) = op.stack_effect() {
            self.adjust_stack(effect);
        }
    }

    /// The current bytecode offset; record it before a loop body to target
    /// backward jumps.
    #[must_use]
    pub fn current_offset(&self) -> usize {
        self.bytecode.len()
    }

    /// The current tracked stack depth.
    #[must_use]
    pub fn stack_depth(&self) -> u16 {
        self.current_stack_depth
    }

    /// Resets the tracked depth to an absolute value. Used where branches
    /// reconverge (the arms of an expression `if` both leave one value).
    pub fn set_stack_depth(&mut self, depth: u16) {
        self.current_stack_depth = depth;
        self.max_stack_depth = self.max_stack_depth.max(depth);
    }

    /// Applies a stack effect the opcode tables cannot express (`Call`'s
    /// effect depends on the argument count only the compiler knows).
    pub fn adjust_stack_depth(&mut self, delta: i16) {
        self.adjust_stack(delta);
    }

    fn adjust_stack(&mut self, delta: i16) {
        let new_depth = i32::from(self.current_stack_depth) + i32::from(delta);
        debug_assert!(new_depth >= 0, "stack depth went negative: {new_depth}");
        self.current_stack_depth = u16::try_from(new_depth.max(0)).unwrap_or(u16::MAX);
        self.max_stack_depth = self.max_stack_depth.max(self.current_stack_depth);
    }

    /// Finishes the build, producing the [`Code`] object.
    #[must_use]
    pub fn build(self, nlvars: u16) -> Code {
        Code::new(self.bytecode, nlvars, self.max_stack_depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_basic() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::PushNull);
        builder.emit(Opcode::Pop);
        let code = builder.build(0);
        assert_eq!(code.bytecode(), &[Opcode::PushNull as u8, Opcode::Pop as u8]);
        assert_eq!(code.stack_size(), 1);
    }

    #[test]
    fn emit_u16_is_little_endian() {
        let mut builder = CodeBuilder::new();
        builder.emit_u16(Opcode::LoadLocal, 0x1234);
        let code = builder.build(0);
        assert_eq!(code.bytecode(), &[Opcode::LoadLocal as u8, 0x34, 0x12]);
    }

    #[test]
    fn forward_jump_patches_to_absolute_offset() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::PushTrue);
        let jump = builder.emit_jump(Opcode::JmpIfFalse);
        builder.emit(Opcode::PushNull); // skipped on the jump path
        builder.patch_jump(jump);
        builder.emit(Opcode::End);

        let code = builder.build(0);
        // layout: PushTrue(1) JmpIfFalse(5) PushNull(1) End
        // the jump target is the End opcode at absolute offset 7
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::PushTrue as u8,
                Opcode::JmpIfFalse as u8,
                7,
                0,
                0,
                0,
                Opcode::PushNull as u8,
                Opcode::End as u8,
            ]
        );
    }

    #[test]
    fn backward_jump_encodes_the_target() {
        let mut builder = CodeBuilder::new();
        let begin = builder.current_offset();
        builder.emit(Opcode::PushNull);
        builder.emit(Opcode::Pop);
        builder.emit_jump_to(Opcode::Jmp, begin);
        let code = builder.build(0);
        assert_eq!(
            code.bytecode(),
            &[
                Opcode::PushNull as u8,
                Opcode::Pop as u8,
                Opcode::Jmp as u8,
                0,
                0,
                0,
                0,
            ]
        );
    }

    #[test]
    fn aggregate_constructors_track_their_operand() {
        let mut builder = CodeBuilder::new();
        builder.emit(Opcode::PushConst1);
        builder.emit(Opcode::PushConst2);
        builder.emit(Opcode::PushConst3);
        builder.emit_u16(Opcode::ListSet, 3);
        assert_eq!(builder.stack_depth(), 1);
        let code = builder.build(0);
        assert_eq!(code.stack_size(), 3);
    }
}
