use thiserror::Error;

use crate::instruction::Instruction;
use crate::op::Op;

/// Operand width selected by an optional prefix byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Width {
    Normal = 0,
    Wide = 1,
    ExtraWide = 2,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    UnknownOpcode { byte: u8, offset: usize },
    #[error("truncated instruction at offset {offset}")]
    Truncated { offset: usize },
    #[error("prefix {prefix:?} cannot precede {op:?} at offset {offset}")]
    InvalidPrefix { prefix: Op, op: Op, offset: usize },
}

/// Decodes a bytecode byte slice into [`Instruction`]s.
///
/// Malformed input yields a [`DecodeError`] instead of reading past the end
/// of the buffer, so images loaded from disk can be decoded directly.
pub struct BytecodeDecoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BytecodeDecoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Start decoding at `pos`.
    pub fn at(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    /// Current byte offset in the stream.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.pos
    }

    /// Whether the decoder has reached the end of the bytecode.
    #[inline(always)]
    pub fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    /// Decode the next instruction, or `None` at end-of-stream.
    pub fn decode_next(&mut self) -> Option<Result<Instruction, DecodeError>> {
        if self.is_at_end() {
            return None;
        }
        Some(self.decode())
    }

    fn decode(&mut self) -> Result<Instruction, DecodeError> {
        let start = self.pos;
        let op = self.read_op()?;

        match op {
            Op::Wide | Op::ExtraWide => {
                let next = self.read_op()?;
                let width = if op == Op::Wide {
                    Width::Wide
                } else {
                    Width::ExtraWide
                };
                let valid = match width {
                    Width::Wide => next.has_scalable_operands(),
                    _ => next.has_immediate(),
                };
                if !valid {
                    return Err(DecodeError::InvalidPrefix {
                        prefix: op,
                        op: next,
                        offset: start,
                    });
                }
                self.decode_op(next, width)
            }
            _ => self.decode_op(op, Width::Normal),
        }
    }

    fn decode_op(
        &mut self,
        op: Op,
        width: Width,
    ) -> Result<Instruction, DecodeError> {
        let wide = width as u8 >= Width::Wide as u8;

        let insn = match op {
            Op::Wide | Op::ExtraWide => {
                return Err(DecodeError::InvalidPrefix {
                    prefix: op,
                    op,
                    offset: self.pos.saturating_sub(1),
                });
            }

            Op::Nop => Instruction::Nop,
            Op::Pop => Instruction::Pop,
            Op::Dup => Instruction::Dup,
            Op::LoadConst => Instruction::LoadConst {
                idx: self.read_u16()?,
            },
            Op::LoadSmi => Instruction::LoadSmi {
                value: self.read_imm(width)?,
            },
            Op::LoadNone => Instruction::LoadNone,
            Op::LoadTrue => Instruction::LoadTrue,
            Op::LoadFalse => Instruction::LoadFalse,

            Op::LoadLocal => Instruction::LoadLocal {
                reg: self.read_reg(wide)?,
            },
            Op::StoreLocal => Instruction::StoreLocal {
                reg: self.read_reg(wide)?,
            },
            Op::LoadField => Instruction::LoadField {
                slot: self.read_reg(wide)?,
            },
            Op::StoreField => Instruction::StoreField {
                slot: self.read_reg(wide)?,
            },

            Op::IntAdd => Instruction::IntAdd,
            Op::IntSub => Instruction::IntSub,
            Op::IntMul => Instruction::IntMul,
            Op::IntDiv => Instruction::IntDiv,
            Op::IntMod => Instruction::IntMod,
            Op::IntNeg => Instruction::IntNeg,
            Op::IntAnd => Instruction::IntAnd,
            Op::IntOr => Instruction::IntOr,
            Op::IntXor => Instruction::IntXor,
            Op::IntShl => Instruction::IntShl,
            Op::IntShr => Instruction::IntShr,

            Op::IntAddImm => Instruction::IntAddImm {
                value: self.read_imm(width)?,
            },
            Op::IntSubImm => Instruction::IntSubImm {
                value: self.read_imm(width)?,
            },
            Op::IntMulImm => Instruction::IntMulImm {
                value: self.read_imm(width)?,
            },
            Op::IntDivImm => Instruction::IntDivImm {
                value: self.read_imm(width)?,
            },
            Op::IntModImm => Instruction::IntModImm {
                value: self.read_imm(width)?,
            },

            Op::Add => Instruction::Add,
            Op::Sub => Instruction::Sub,
            Op::Mul => Instruction::Mul,
            Op::Div => Instruction::Div,
            Op::Mod => Instruction::Mod,
            Op::Neg => Instruction::Neg,
            Op::Not => Instruction::Not,
            Op::Eq => Instruction::Eq,
            Op::Ne => Instruction::Ne,
            Op::Lt => Instruction::Lt,
            Op::Le => Instruction::Le,
            Op::Gt => Instruction::Gt,
            Op::Ge => Instruction::Ge,
            Op::ToStr => Instruction::ToStr,
            Op::Hash => Instruction::Hash,

            Op::NewSequence => Instruction::NewSequence {
                count: self.read_u16()?,
            },
            Op::NewRange => Instruction::NewRange {
                closed: self.read_u8()? != 0,
            },
            Op::WrapSome => Instruction::WrapSome,
            Op::GetItem => Instruction::GetItem,
            Op::SetItem => Instruction::SetItem,
            Op::Slice => Instruction::Slice {
                closed: self.read_u8()? != 0,
            },
            Op::Contains => Instruction::Contains,
            Op::Len => Instruction::Len,

            Op::Jump => Instruction::Jump {
                offset: self.read_i16()?,
            },
            Op::JumpIfTrue => Instruction::JumpIfTrue {
                offset: self.read_i16()?,
            },
            Op::JumpIfFalse => Instruction::JumpIfFalse {
                offset: self.read_i16()?,
            },
            Op::JumpIfNone => Instruction::JumpIfNone {
                offset: self.read_i16()?,
            },

            Op::Call => {
                let routine = self.read_u16()?;
                let argc = self.read_u8()?;
                let returns = self.read_u8()?;
                Instruction::Call {
                    routine,
                    argc,
                    returns,
                }
            }
            Op::CallNative => {
                let native = self.read_u16()?;
                let argc = self.read_u8()?;
                let returns = self.read_u8()?;
                Instruction::CallNative {
                    native,
                    argc,
                    returns,
                }
            }
            Op::Invoke => {
                let name = self.read_u16()?;
                let argc = self.read_u8()?;
                let returns = self.read_u8()?;
                Instruction::Invoke {
                    name,
                    argc,
                    returns,
                }
            }
            Op::New => Instruction::New {
                class: self.read_u16()?,
            },
            Op::Return => Instruction::Return,
            Op::GetIter => Instruction::GetIter,
            Op::IterNext => Instruction::IterNext,
        };
        Ok(insn)
    }

    // ── raw reads ──────────────────────────────────────────────────

    fn take<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        let end = self.pos + N;
        let bytes = self
            .bytes
            .get(self.pos..end)
            .ok_or(DecodeError::Truncated { offset: self.pos })?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        self.pos = end;
        Ok(out)
    }

    fn read_op(&mut self) -> Result<Op, DecodeError> {
        let offset = self.pos;
        let byte = self.read_u8()?;
        Op::try_from(byte)
            .map_err(|byte| DecodeError::UnknownOpcode { byte, offset })
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take::<1>()?[0])
    }

    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        Ok(u16::from_le_bytes(self.take()?))
    }

    fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(i16::from_le_bytes(self.take()?))
    }

    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(i32::from_le_bytes(self.take()?))
    }

    fn read_reg(&mut self, wide: bool) -> Result<u16, DecodeError> {
        if wide {
            self.read_u16()
        } else {
            Ok(self.read_u8()? as u16)
        }
    }

    fn read_imm(&mut self, width: Width) -> Result<i32, DecodeError> {
        Ok(match width {
            Width::Normal => self.read_u8()? as i8 as i32,
            Width::Wide => self.read_i16()? as i32,
            Width::ExtraWide => self.read_i32()?,
        })
    }
}

impl Iterator for BytecodeDecoder<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.decode_next()
    }
}

/// Decode the single instruction starting at `pc`.
///
/// Returns the instruction and the offset of the one that follows it.
#[inline]
pub fn decode_at(
    bytes: &[u8],
    pc: usize,
) -> Result<(Instruction, usize), DecodeError> {
    let mut decoder = BytecodeDecoder::at(bytes, pc);
    match decoder.decode_next() {
        Some(insn) => Ok((insn?, decoder.offset())),
        None => Err(DecodeError::Truncated { offset: pc }),
    }
}
