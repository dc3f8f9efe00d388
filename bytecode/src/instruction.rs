use core::fmt;

use crate::op::Op;

/// A decoded instruction with all operands resolved to their widest types.
///
/// Register and slot operands are always `u16` and immediates always `i32`,
/// regardless of whether the instruction was encoded narrow or wide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    Pop,
    Dup,
    LoadConst {
        idx: u16,
    },
    LoadSmi {
        value: i32,
    },
    LoadNone,
    LoadTrue,
    LoadFalse,
    LoadLocal {
        reg: u16,
    },
    StoreLocal {
        reg: u16,
    },
    LoadField {
        slot: u16,
    },
    StoreField {
        slot: u16,
    },
    IntAdd,
    IntSub,
    IntMul,
    IntDiv,
    IntMod,
    IntNeg,
    IntAnd,
    IntOr,
    IntXor,
    IntShl,
    IntShr,
    IntAddImm {
        value: i32,
    },
    IntSubImm {
        value: i32,
    },
    IntMulImm {
        value: i32,
    },
    IntDivImm {
        value: i32,
    },
    IntModImm {
        value: i32,
    },
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    ToStr,
    Hash,
    NewSequence {
        count: u16,
    },
    NewRange {
        closed: bool,
    },
    WrapSome,
    GetItem,
    SetItem,
    Slice {
        closed: bool,
    },
    Contains,
    Len,
    Jump {
        offset: i16,
    },
    JumpIfTrue {
        offset: i16,
    },
    JumpIfFalse {
        offset: i16,
    },
    JumpIfNone {
        offset: i16,
    },
    Call {
        routine: u16,
        argc: u8,
        returns: u8,
    },
    CallNative {
        native: u16,
        argc: u8,
        returns: u8,
    },
    Invoke {
        name: u16,
        argc: u8,
        returns: u8,
    },
    New {
        class: u16,
    },
    Return,
    GetIter,
    IterNext,
}

impl Instruction {
    /// The opcode this instruction was decoded from.
    pub const fn op(&self) -> Op {
        match self {
            Self::Nop => Op::Nop,
            Self::Pop => Op::Pop,
            Self::Dup => Op::Dup,
            Self::LoadConst { .. } => Op::LoadConst,
            Self::LoadSmi { .. } => Op::LoadSmi,
            Self::LoadNone => Op::LoadNone,
            Self::LoadTrue => Op::LoadTrue,
            Self::LoadFalse => Op::LoadFalse,
            Self::LoadLocal { .. } => Op::LoadLocal,
            Self::StoreLocal { .. } => Op::StoreLocal,
            Self::LoadField { .. } => Op::LoadField,
            Self::StoreField { .. } => Op::StoreField,
            Self::IntAdd => Op::IntAdd,
            Self::IntSub => Op::IntSub,
            Self::IntMul => Op::IntMul,
            Self::IntDiv => Op::IntDiv,
            Self::IntMod => Op::IntMod,
            Self::IntNeg => Op::IntNeg,
            Self::IntAnd => Op::IntAnd,
            Self::IntOr => Op::IntOr,
            Self::IntXor => Op::IntXor,
            Self::IntShl => Op::IntShl,
            Self::IntShr => Op::IntShr,
            Self::IntAddImm { .. } => Op::IntAddImm,
            Self::IntSubImm { .. } => Op::IntSubImm,
            Self::IntMulImm { .. } => Op::IntMulImm,
            Self::IntDivImm { .. } => Op::IntDivImm,
            Self::IntModImm { .. } => Op::IntModImm,
            Self::Add => Op::Add,
            Self::Sub => Op::Sub,
            Self::Mul => Op::Mul,
            Self::Div => Op::Div,
            Self::Mod => Op::Mod,
            Self::Neg => Op::Neg,
            Self::Not => Op::Not,
            Self::Eq => Op::Eq,
            Self::Ne => Op::Ne,
            Self::Lt => Op::Lt,
            Self::Le => Op::Le,
            Self::Gt => Op::Gt,
            Self::Ge => Op::Ge,
            Self::ToStr => Op::ToStr,
            Self::Hash => Op::Hash,
            Self::NewSequence { .. } => Op::NewSequence,
            Self::NewRange { .. } => Op::NewRange,
            Self::WrapSome => Op::WrapSome,
            Self::GetItem => Op::GetItem,
            Self::SetItem => Op::SetItem,
            Self::Slice { .. } => Op::Slice,
            Self::Contains => Op::Contains,
            Self::Len => Op::Len,
            Self::Jump { .. } => Op::Jump,
            Self::JumpIfTrue { .. } => Op::JumpIfTrue,
            Self::JumpIfFalse { .. } => Op::JumpIfFalse,
            Self::JumpIfNone { .. } => Op::JumpIfNone,
            Self::Call { .. } => Op::Call,
            Self::CallNative { .. } => Op::CallNative,
            Self::Invoke { .. } => Op::Invoke,
            Self::New { .. } => Op::New,
            Self::Return => Op::Return,
            Self::GetIter => Op::GetIter,
            Self::IterNext => Op::IterNext,
        }
    }
}

fn range_kind(closed: bool) -> &'static str {
    if closed { "..." } else { "..<" }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LoadConst { idx } => write!(f, "LoadConst #{idx}"),
            Self::LoadSmi { value } => write!(f, "LoadSmi {value}"),
            Self::LoadLocal { reg } => write!(f, "LoadLocal r{reg}"),
            Self::StoreLocal { reg } => write!(f, "StoreLocal r{reg}"),
            Self::LoadField { slot } => write!(f, "LoadField .{slot}"),
            Self::StoreField { slot } => write!(f, "StoreField .{slot}"),
            Self::IntAddImm { value } => write!(f, "IntAddImm {value}"),
            Self::IntSubImm { value } => write!(f, "IntSubImm {value}"),
            Self::IntMulImm { value } => write!(f, "IntMulImm {value}"),
            Self::IntDivImm { value } => write!(f, "IntDivImm {value}"),
            Self::IntModImm { value } => write!(f, "IntModImm {value}"),
            Self::NewSequence { count } => write!(f, "NewSequence {count}"),
            Self::NewRange { closed } => {
                write!(f, "NewRange {}", range_kind(*closed))
            }
            Self::Slice { closed } => write!(f, "Slice {}", range_kind(*closed)),
            Self::Jump { offset } => write!(f, "Jump {offset:+}"),
            Self::JumpIfTrue { offset } => write!(f, "JumpIfTrue {offset:+}"),
            Self::JumpIfFalse { offset } => write!(f, "JumpIfFalse {offset:+}"),
            Self::JumpIfNone { offset } => write!(f, "JumpIfNone {offset:+}"),
            Self::Call {
                routine,
                argc,
                returns,
            } => {
                write!(f, "Call @{routine} {argc} ->{returns}")
            }
            Self::CallNative {
                native,
                argc,
                returns,
            } => {
                write!(f, "CallNative !{native} {argc} ->{returns}")
            }
            Self::Invoke {
                name,
                argc,
                returns,
            } => {
                write!(f, "Invoke #{name} {argc} ->{returns}")
            }
            Self::New { class } => write!(f, "New %{class}"),
            simple => write!(f, "{:?}", simple.op()),
        }
    }
}
