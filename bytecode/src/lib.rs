mod builder;
mod constant;
mod decoder;
pub mod image;
mod instruction;
mod op;
mod routine;
mod source_map;

pub use builder::{BytecodeBuilder, JumpOutOfRange, Label};
pub use constant::{Constant, ConstantPool, PoolFull};
pub use decoder::{BytecodeDecoder, DecodeError, decode_at};
pub use image::{ImageError, image_to_bytes, read_image, write_image};
pub use instruction::Instruction;
pub use op::Op;
pub use routine::Routine;
pub use source_map::{SourceMap, SourceMapBuilder, Span};

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(bytes: &[u8]) -> Vec<Instruction> {
        BytecodeDecoder::new(bytes)
            .collect::<Result<_, _>>()
            .unwrap()
    }

    #[test]
    fn round_trip_narrow() {
        let mut b = BytecodeBuilder::new();
        b.load_const(42);
        b.load_local(5);
        b.store_local(10);
        b.load_field(2);
        b.store_field(3);
        b.new_sequence(4);
        b.new_range(true);
        b.slice(false);
        b.call(7, 2, 1);
        b.call_native(3, 1, 0);
        b.invoke(9, 0, 1);
        b.new_object(12);
        b.simple(Op::GetIter);
        b.simple(Op::Return);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadConst { idx: 42 },
            Instruction::LoadLocal { reg: 5 },
            Instruction::StoreLocal { reg: 10 },
            Instruction::LoadField { slot: 2 },
            Instruction::StoreField { slot: 3 },
            Instruction::NewSequence { count: 4 },
            Instruction::NewRange { closed: true },
            Instruction::Slice { closed: false },
            Instruction::Call { routine: 7, argc: 2, returns: 1 },
            Instruction::CallNative { native: 3, argc: 1, returns: 0 },
            Instruction::Invoke { name: 9, argc: 0, returns: 1 },
            Instruction::New { class: 12 },
            Instruction::GetIter,
            Instruction::Return,
        ]);
    }

    #[test]
    fn round_trip_wide() {
        let mut b = BytecodeBuilder::new();
        b.load_local(300);
        b.store_local(1000);
        b.load_field(256);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadLocal { reg: 300 },
            Instruction::StoreLocal { reg: 1000 },
            Instruction::LoadField { slot: 256 },
        ]);
    }

    #[test]
    fn forward_jump() {
        let mut b = BytecodeBuilder::new();
        b.load_const(0);
        let label = b.jump_if_false();
        b.load_const(1);
        b.bind(label).unwrap();
        b.simple(Op::Return);

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadConst { idx: 0 },
            Instruction::JumpIfFalse { offset: 3 },
            Instruction::LoadConst { idx: 1 },
            Instruction::Return,
        ]);
    }

    #[test]
    fn backward_jump() {
        let mut b = BytecodeBuilder::new();
        let loop_top = b.current_offset();
        b.load_local(0);
        b.jump_back(loop_top).unwrap();

        assert_eq!(decode_all(&b.into_bytes()), vec![
            Instruction::LoadLocal { reg: 0 },
            Instruction::Jump { offset: -5 },
        ]);
    }

    #[test]
    fn jump_too_far_is_an_error() {
        let mut b = BytecodeBuilder::new();
        let label = b.jump();
        for _ in 0..40_000 {
            b.simple(Op::Nop);
        }
        assert_eq!(b.bind(label), Err(JumpOutOfRange { distance: 40_000 }));
        assert!(b.jump_back(0).is_err());
    }

    #[test]
    fn display_instructions() {
        assert_eq!(
            Instruction::Call { routine: 5, argc: 2, returns: 1 }.to_string(),
            "Call @5 2 ->1"
        );
        assert_eq!(Instruction::Jump { offset: -7 }.to_string(), "Jump -7");
        assert_eq!(Instruction::JumpIfNone { offset: 4 }.to_string(), "JumpIfNone +4");
        assert_eq!(Instruction::Slice { closed: true }.to_string(), "Slice ...");
        assert_eq!(Instruction::NewRange { closed: false }.to_string(), "NewRange ..<");
        assert_eq!(Instruction::IntAdd.to_string(), "IntAdd");
    }

    #[test]
    fn immediates_pick_narrowest_width() {
        let mut b = BytecodeBuilder::new();
        b.int_imm(Op::IntAddImm, 2);
        assert_eq!(b.as_bytes().len(), 2);
        b.int_imm(Op::IntMulImm, 1000);
        assert_eq!(b.as_bytes().len(), 6);
        assert_eq!(b.as_bytes()[2], Op::Wide as u8);
        b.int_imm(Op::IntSubImm, -100_000);
        assert_eq!(b.as_bytes().len(), 12);
        assert_eq!(b.as_bytes()[6], Op::ExtraWide as u8);

        assert_eq!(decode_all(b.as_bytes()), vec![
            Instruction::IntAddImm { value: 2 },
            Instruction::IntMulImm { value: 1000 },
            Instruction::IntSubImm { value: -100_000 },
        ]);
    }

    #[test]
    fn load_smi_boundaries() {
        let values = [
            0, 127, -128, -1, 128, -129, 32767, -32768, 32768, -32769,
            i32::MAX, i32::MIN,
        ];
        let mut b = BytecodeBuilder::new();
        for v in values {
            b.load_smi(v);
        }
        let expected: Vec<_> = values
            .iter()
            .map(|&value| Instruction::LoadSmi { value })
            .collect();
        assert_eq!(decode_all(&b.into_bytes()), expected);
    }

    #[test]
    fn register_width_follows_the_operand() {
        let mut b = BytecodeBuilder::new();
        b.store_local(255);
        assert_eq!(b.as_bytes(), &[Op::StoreLocal as u8, 255]);

        b.load_field(256);
        assert_eq!(b.as_bytes().len(), 6);
        assert_eq!(&b.as_bytes()[2..4], &[Op::Wide as u8, Op::LoadField as u8]);
    }

    #[test]
    fn decode_at_reports_next_offset() {
        let mut b = BytecodeBuilder::new();
        b.load_smi(1000);
        b.simple(Op::Pop);
        let bytes = b.into_bytes();
        assert_eq!(
            decode_at(&bytes, 0).unwrap(),
            (Instruction::LoadSmi { value: 1000 }, 4)
        );
        assert_eq!(decode_at(&bytes, 4).unwrap(), (Instruction::Pop, 5));
        assert!(decode_at(&bytes, 5).is_err());
    }

    #[test]
    fn malformed_bytecode_is_an_error() {
        let unknown = [0xFF];
        assert_eq!(
            BytecodeDecoder::new(&unknown).next(),
            Some(Err(DecodeError::UnknownOpcode { byte: 0xFF, offset: 0 }))
        );

        let truncated = [Op::Call as u8, 1];
        assert_eq!(
            BytecodeDecoder::new(&truncated).next(),
            Some(Err(DecodeError::Truncated { offset: 1 }))
        );

        let bad_prefix = [Op::ExtraWide as u8, Op::LoadLocal as u8, 0];
        assert!(matches!(
            BytecodeDecoder::new(&bad_prefix).next(),
            Some(Err(DecodeError::InvalidPrefix { op: Op::LoadLocal, .. }))
        ));

        let wide_simple = [Op::Wide as u8, Op::Pop as u8];
        assert!(matches!(
            BytecodeDecoder::new(&wide_simple).next(),
            Some(Err(DecodeError::InvalidPrefix { .. }))
        ));
    }

    #[test]
    fn every_opcode_byte_round_trips() {
        for byte in 0..Op::COUNT as u8 {
            let op = Op::try_from(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(Op::try_from(Op::COUNT as u8), Err(Op::COUNT as u8));
    }
}
