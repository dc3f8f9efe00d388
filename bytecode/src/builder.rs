use thiserror::Error;

use crate::op::Op;

/// Placeholder for a forward jump, patched by [`BytecodeBuilder::bind`].
#[derive(Debug)]
#[must_use = "an unbound label leaves a zero jump offset behind"]
pub struct Label {
    /// Where the i16 operand lives.
    offset_pos: usize,
    /// End of the jump; offsets are relative to it.
    base: usize,
}

/// A jump distance that does not fit the `i16` offset operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("jump distance {distance} does not fit in a 16-bit offset")]
pub struct JumpOutOfRange {
    pub distance: isize,
}

/// Appends encoded instructions to a routine's code buffer, choosing the
/// [`Op::Wide`] / [`Op::ExtraWide`] prefixes as operands require.
pub struct BytecodeBuilder {
    buf: Vec<u8>,
}

impl BytecodeBuilder {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Offset the next instruction will be written at.
    pub fn current_offset(&self) -> usize {
        self.buf.len()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    // Encoding.

    fn emit_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn emit_u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i16(&mut self, v: i16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn emit_op(&mut self, op: Op) {
        self.buf.push(op as u8);
    }

    fn needs_wide(reg: u16) -> bool {
        reg > u8::MAX as u16
    }

    fn emit_reg_op(&mut self, op: Op, reg: u16) {
        let wide = Self::needs_wide(reg);
        if wide {
            self.emit_op(Op::Wide);
            self.emit_op(op);
            self.emit_u16(reg);
        } else {
            self.emit_op(op);
            self.emit_u8(reg as u8);
        }
    }

    /// Emit an immediate-carrying opcode with the narrowest encoding:
    /// 8-bit, 16-bit (`Wide`), or 32-bit (`ExtraWide`).
    fn emit_imm_op(&mut self, op: Op, value: i32) {
        debug_assert!(op.has_immediate(), "{op:?} carries no immediate");
        if let Ok(v) = i8::try_from(value) {
            self.emit_op(op);
            self.emit_u8(v as u8);
        } else if let Ok(v) = i16::try_from(value) {
            self.emit_op(Op::Wide);
            self.emit_op(op);
            self.emit_i16(v);
        } else {
            self.emit_op(Op::ExtraWide);
            self.emit_op(op);
            self.emit_i32(value);
        }
    }

    fn emit_call_like(&mut self, op: Op, target: u16, argc: u8, returns: u8) {
        self.emit_op(op);
        self.emit_u16(target);
        self.emit_u8(argc);
        self.emit_u8(returns);
    }

    /// Emit an opcode that has no operands (`Pop`, `IntAdd`, `Contains`, …).
    pub fn simple(&mut self, op: Op) {
        debug_assert!(op.is_simple(), "{op:?} takes operands");
        self.emit_op(op);
    }

    /// `LoadConst <idx:u16>`: push a constant pool entry.
    pub fn load_const(&mut self, idx: u16) {
        self.emit_op(Op::LoadConst);
        self.emit_u16(idx);
    }

    /// `LoadSmi <value>`: push a small integer.
    pub fn load_smi(&mut self, value: i32) {
        self.emit_imm_op(Op::LoadSmi, value);
    }

    /// `LoadLocal <reg>`.
    pub fn load_local(&mut self, reg: u16) {
        self.emit_reg_op(Op::LoadLocal, reg);
    }

    /// `StoreLocal <reg>`.
    pub fn store_local(&mut self, reg: u16) {
        self.emit_reg_op(Op::StoreLocal, reg);
    }

    /// `LoadField <slot>`.
    pub fn load_field(&mut self, slot: u16) {
        self.emit_reg_op(Op::LoadField, slot);
    }

    /// `StoreField <slot>`.
    pub fn store_field(&mut self, slot: u16) {
        self.emit_reg_op(Op::StoreField, slot);
    }

    /// One of the `Int*Imm` opcodes with an inline right operand.
    pub fn int_imm(&mut self, op: Op, value: i32) {
        debug_assert!(
            matches!(
                op,
                Op::IntAddImm
                    | Op::IntSubImm
                    | Op::IntMulImm
                    | Op::IntDivImm
                    | Op::IntModImm
            ),
            "{op:?} is not an integer immediate opcode"
        );
        self.emit_imm_op(op, value);
    }

    /// `NewSequence <count:u16>`.
    pub fn new_sequence(&mut self, count: u16) {
        self.emit_op(Op::NewSequence);
        self.emit_u16(count);
    }

    /// `NewRange <closed:u8>`.
    pub fn new_range(&mut self, closed: bool) {
        self.emit_op(Op::NewRange);
        self.emit_u8(closed as u8);
    }

    /// `Slice <closed:u8>`.
    pub fn slice(&mut self, closed: bool) {
        self.emit_op(Op::Slice);
        self.emit_u8(closed as u8);
    }

    /// `Call <routine:u16> <argc:u8> <returns:u8>`.
    pub fn call(&mut self, routine: u16, argc: u8, returns: u8) {
        self.emit_call_like(Op::Call, routine, argc, returns);
    }

    /// `CallNative <native:u16> <argc:u8> <returns:u8>`.
    pub fn call_native(&mut self, native: u16, argc: u8, returns: u8) {
        self.emit_call_like(Op::CallNative, native, argc, returns);
    }

    /// `Invoke <name:u16> <argc:u8> <returns:u8>`.
    ///
    /// The receiver sits below the `argc` arguments on the stack.
    pub fn invoke(&mut self, name: u16, argc: u8, returns: u8) {
        self.emit_call_like(Op::Invoke, name, argc, returns);
    }

    /// `New <class:u16>`.
    pub fn new_object(&mut self, class: u16) {
        self.emit_op(Op::New);
        self.emit_u16(class);
    }

    pub fn jump(&mut self) -> Label {
        self.emit_jump_placeholder(Op::Jump)
    }

    /// Jumps when the popped value is truthy.
    pub fn jump_if_true(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfTrue)
    }

    pub fn jump_if_false(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfFalse)
    }

    /// Emit a forward jump taken when the popped optional is empty.
    pub fn jump_if_none(&mut self) -> Label {
        self.emit_jump_placeholder(Op::JumpIfNone)
    }

    /// Point `label` at the current offset.
    pub fn bind(&mut self, label: Label) -> Result<(), JumpOutOfRange> {
        let distance = self.buf.len() as isize - label.base as isize;
        let offset = i16::try_from(distance)
            .map_err(|_| JumpOutOfRange { distance })?;
        self.buf[label.offset_pos..label.offset_pos + 2]
            .copy_from_slice(&offset.to_le_bytes());
        Ok(())
    }

    /// `Jump` back to a loop head taken from [`current_offset`](Self::current_offset).
    pub fn jump_back(&mut self, target: usize) -> Result<(), JumpOutOfRange> {
        // offsets count from the end of the 3-byte jump
        let distance = target as isize - (self.buf.len() + 3) as isize;
        let offset = i16::try_from(distance)
            .map_err(|_| JumpOutOfRange { distance })?;
        self.emit_op(Op::Jump);
        self.emit_i16(offset);
        Ok(())
    }

    fn emit_jump_placeholder(&mut self, op: Op) -> Label {
        self.emit_op(op);
        let offset_pos = self.buf.len();
        self.emit_i16(0);
        Label {
            offset_pos,
            base: self.buf.len(),
        }
    }
}

impl Default for BytecodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
