use core::fmt::Write as _;

use crate::constant::Constant;
use crate::decoder::{BytecodeDecoder, DecodeError};
use crate::instruction::Instruction;
use crate::source_map::{SourceMap, Span};

/// A compiled unit of code: a function, a method, a trait default or the
/// program entry block. Immutable once built and shared by every caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routine {
    pub name: String,
    /// Number of stack arguments the routine takes, receiver included.
    pub params: u16,
    /// Number of local slots, parameters included.
    pub locals: u16,
    pub code: Vec<u8>,
    pub constants: Vec<Constant>,
    pub source_map: SourceMap,
}

impl Routine {
    pub fn span_at(&self, pc: usize) -> Option<Span> {
        self.source_map.lookup(u32::try_from(pc).ok()?)
    }

    /// Decode the whole body, stopping at the first malformed instruction.
    pub fn instructions(
        &self,
    ) -> Result<Vec<(usize, Instruction)>, DecodeError> {
        let mut decoder = BytecodeDecoder::new(&self.code);
        let mut out = Vec::new();
        while !decoder.is_at_end() {
            let offset = decoder.offset();
            if let Some(insn) = decoder.decode_next() {
                out.push((offset, insn?));
            }
        }
        Ok(out)
    }

    /// Render the routine as `offset  instruction  ; note` lines.
    ///
    /// The note is the referenced constant for pool loads and invokes, or the
    /// source span when a statement starts at that offset.
    pub fn disassemble(&self) -> Result<String, DecodeError> {
        let spans: Vec<(u32, Span)> = self.source_map.entries().collect();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "routine {} (params: {}, locals: {}, constants: {})",
            self.name,
            self.params,
            self.locals,
            self.constants.len()
        );

        for (offset, insn) in self.instructions()? {
            let text = insn.to_string();
            let note = match insn {
                Instruction::LoadConst { idx }
                | Instruction::Invoke { name: idx, .. } => self
                    .constants
                    .get(idx as usize)
                    .map(|c| c.to_string()),
                _ => spans
                    .iter()
                    .find(|(pc, _)| *pc as usize == offset)
                    .map(|(_, span)| format!("@{span}")),
            };
            let _ = match note {
                Some(note) => writeln!(out, "{offset:>6}  {text:<28}; {note}"),
                None => writeln!(out, "{offset:>6}  {text}"),
            };
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BytecodeBuilder, Op, SourceMapBuilder};

    fn sample() -> Routine {
        let mut b = BytecodeBuilder::new();
        let mut map = SourceMapBuilder::new();
        map.add(0, Span::new(0, 9));
        b.load_const(0);
        b.load_smi(2);
        b.simple(Op::Add);
        map.add(b.current_offset() as u32, Span::new(10, 16));
        b.simple(Op::Return);
        Routine {
            name: "main".into(),
            params: 0,
            locals: 1,
            code: b.into_bytes(),
            constants: vec![Constant::Str("hi".into())],
            source_map: map.finish(),
        }
    }

    #[test]
    fn span_at_uses_enclosing_statement() {
        let routine = sample();
        assert_eq!(routine.span_at(0), Some(Span::new(0, 9)));
        assert_eq!(routine.span_at(4), Some(Span::new(0, 9)));
        assert_eq!(routine.span_at(6), Some(Span::new(10, 16)));
    }

    #[test]
    fn disassembly_annotates_constants_and_spans() {
        let text = sample().disassemble().unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 5);
        assert!(lines[0].starts_with("routine main"));
        assert!(lines[1].contains("LoadConst #0"));
        assert!(lines[1].ends_with("; \"hi\""));
        assert!(lines[2].contains("LoadSmi 2"));
        assert!(lines[3].contains("Add"));
        assert!(lines[4].contains("Return"));
        assert!(lines[4].ends_with("; @10..16"));
    }

    #[test]
    fn malformed_code_is_reported() {
        let mut routine = sample();
        routine.code.push(Op::LoadConst as u8);
        assert!(matches!(
            routine.disassemble(),
            Err(DecodeError::Truncated { .. })
        ));
    }
}
