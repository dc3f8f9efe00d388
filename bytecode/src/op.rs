/// Bytecode opcodes.
///
/// The interpreter is a stack machine: operands are popped from and results
/// pushed onto a single operand stack per program instance.
///
/// Register and field-slot operands are 8-bit by default. The
/// [`Wide`](Op::Wide) prefix promotes them to 16-bit and promotes immediates
/// from `i8` to `i16`. The [`ExtraWide`](Op::ExtraWide) prefix promotes
/// immediates to `i32`. Constant pool, name, class, native and routine
/// indices are always 16-bit. Jump offsets are always `i16` and relative to
/// the end of the jump instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Op {
    /// Prefix: the next instruction uses 16-bit register/immediate operands.
    Wide = 0x00,

    /// Prefix: the next instruction uses a 32-bit immediate.
    /// Only valid before immediate-carrying opcodes.
    ExtraWide,

    Nop,

    /// Discard the top of stack.
    Pop,

    /// Push a copy (alias) of the top of stack.
    Dup,

    /// Push a constant pool entry.
    /// Operands: `idx:u16`
    LoadConst,

    /// Push a small integer literal.
    /// Operands: `value:i8` (wide: `i16`, extra-wide: `i32`)
    LoadSmi,

    LoadNone,
    LoadTrue,
    LoadFalse,

    /// Push a local slot.
    /// Operands: `reg:u8` (wide: `u16`)
    LoadLocal,

    /// Pop into a local slot.
    /// Operands: `reg:u8` (wide: `u16`)
    StoreLocal,

    /// Pop an object, push one of its fields.
    /// Operands: `slot:u8` (wide: `u16`)
    LoadField,

    /// Pop a value, pop an object, store the value into a field.
    /// Operands: `slot:u8` (wide: `u16`)
    StoreField,

    /// Integer-only arithmetic. Pops `rhs`, then `lhs`.
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

    /// Integer arithmetic with an inline right operand. Pops `lhs`.
    /// Operands: `value:i8` (wide: `i16`, extra-wide: `i32`)
    IntAddImm,
    IntSubImm,
    IntMulImm,
    IntDivImm,
    IntModImm,

    /// Generic arithmetic over any operand kinds the runtime supports.
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Not,

    /// Equality honoring `__eq__` hooks.
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    /// Convert the top of stack to a string, honoring `__str__` hooks.
    ToStr,

    /// Hash the top of stack, honoring `__hash__` hooks.
    Hash,

    /// Pop `count` values and push a sequence of them in push order.
    /// Operands: `count:u16`
    NewSequence,

    /// Pop `end`, then `start`, push a range object.
    /// Operands: `closed:u8`
    NewRange,

    /// Wrap the top of stack into a present optional.
    WrapSome,

    /// Pop `index`, then `target`, push `target[index]`.
    GetItem,

    /// Pop `value`, `index`, `target`; store `target[index] = value`.
    SetItem,

    /// Pop `end`, `start`, `target`; push a copied sub-sequence.
    /// Operands: `closed:u8`
    Slice,

    /// Pop `haystack`, then `needle`, push a boolean.
    Contains,

    /// Pop a collection, push its length.
    Len,

    /// Unconditional relative jump.
    /// Operands: `offset:i16`
    Jump,

    /// Pop; jump if truthy.
    /// Operands: `offset:i16`
    JumpIfTrue,

    /// Pop; jump if falsy.
    /// Operands: `offset:i16`
    JumpIfFalse,

    /// Pop an optional; jump if empty, otherwise push its payload.
    /// Operands: `offset:i16`
    JumpIfNone,

    /// Call a statically resolved routine. Arguments (receiver first for
    /// methods) are on the stack, pushed left to right.
    /// Operands: `routine:u16`, `argc:u8`, `returns:u8`
    Call,

    /// Call a statically resolved native hook.
    /// Operands: `native:u16`, `argc:u8`, `returns:u8`
    CallNative,

    /// Call a method resolved at run time from the receiver's class.
    /// `argc` excludes the receiver.
    /// Operands: `name:u16` (constant pool string), `argc:u8`, `returns:u8`
    Invoke,

    /// Push a fresh instance of a class with every field set to `None`.
    /// Operands: `class:u16`
    New,

    /// Return the top of stack from the current routine.
    Return,

    /// Pop an iterable, push the iterator returned by its `iter()`.
    GetIter,

    /// Invoke `next()` on the iterator at the top of the stack, leaving the
    /// iterator in place and pushing the optional result.
    IterNext,
}

impl Op {
    pub const COUNT: usize = Op::IterNext as usize + 1;

    /// Whether this opcode has operands affected by the `Wide` prefix.
    pub const fn has_scalable_operands(self) -> bool {
        matches!(
            self,
            Op::LoadSmi
                | Op::LoadLocal
                | Op::StoreLocal
                | Op::LoadField
                | Op::StoreField
                | Op::IntAddImm
                | Op::IntSubImm
                | Op::IntMulImm
                | Op::IntDivImm
                | Op::IntModImm
        )
    }

    /// Whether this opcode carries an inline integer immediate, the only
    /// operand kind the `ExtraWide` prefix applies to.
    pub const fn has_immediate(self) -> bool {
        matches!(
            self,
            Op::LoadSmi
                | Op::IntAddImm
                | Op::IntSubImm
                | Op::IntMulImm
                | Op::IntDivImm
                | Op::IntModImm
        )
    }

    /// Whether the opcode is encoded as a single byte with no operands.
    pub const fn is_simple(self) -> bool {
        !matches!(
            self,
            Op::Wide
                | Op::ExtraWide
                | Op::LoadConst
                | Op::LoadSmi
                | Op::LoadLocal
                | Op::StoreLocal
                | Op::LoadField
                | Op::StoreField
                | Op::IntAddImm
                | Op::IntSubImm
                | Op::IntMulImm
                | Op::IntDivImm
                | Op::IntModImm
                | Op::NewSequence
                | Op::NewRange
                | Op::Slice
                | Op::Jump
                | Op::JumpIfTrue
                | Op::JumpIfFalse
                | Op::JumpIfNone
                | Op::Call
                | Op::CallNative
                | Op::Invoke
                | Op::New
        )
    }
}

impl TryFrom<u8> for Op {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, u8> {
        if (byte as usize) < Self::COUNT {
            // SAFETY: Op is repr(u8) with contiguous variants starting at 0.
            Ok(unsafe { core::mem::transmute::<u8, Op>(byte) })
        } else {
            Err(byte)
        }
    }
}
