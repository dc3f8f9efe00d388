//! Persisted routine images.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic      b"TRTBC\0"
//! version    u16
//! count      u32
//! routine*   name:str params:u16 locals:u16
//!            constants:u32 constant*
//!            code:bytes source_map:bytes
//! ```
//!
//! `str` and `bytes` are a `u32` length followed by the payload. Constants are
//! a one-byte tag followed by the value.

use std::io::{self, Write};

use thiserror::Error;

use crate::constant::Constant;
use crate::routine::Routine;
use crate::source_map::SourceMap;

pub const MAGIC: &[u8; 6] = b"TRTBC\0";
pub const VERSION: u16 = 1;

const TAG_NONE: u8 = 0;
const TAG_INT: u8 = 1;
const TAG_BOOL: u8 = 2;
const TAG_STR: u8 = 3;
const TAG_SEQUENCE: u8 = 4;

#[derive(Debug, Error)]
pub enum ImageError {
    #[error("not a bytecode image (bad magic)")]
    BadMagic,
    #[error("unsupported image version {0} (expected {VERSION})")]
    UnsupportedVersion(u16),
    #[error("image truncated at byte {0}")]
    Truncated(usize),
    #[error("unknown constant tag {tag} at byte {offset}")]
    BadConstantTag { tag: u8, offset: usize },
    #[error("invalid UTF-8 string at byte {0}")]
    InvalidString(usize),
    #[error("{what} too large to persist")]
    TooLarge { what: &'static str },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub fn write_image<W: Write>(
    out: &mut W,
    routines: &[Routine],
) -> Result<(), ImageError> {
    out.write_all(MAGIC)?;
    out.write_all(&VERSION.to_le_bytes())?;
    write_len(out, routines.len(), "routine list")?;
    for routine in routines {
        write_str(out, &routine.name)?;
        out.write_all(&routine.params.to_le_bytes())?;
        out.write_all(&routine.locals.to_le_bytes())?;
        write_len(out, routine.constants.len(), "constant pool")?;
        for constant in &routine.constants {
            write_constant(out, constant)?;
        }
        write_bytes(out, &routine.code)?;
        write_bytes(out, routine.source_map.as_bytes())?;
    }
    Ok(())
}

pub fn image_to_bytes(routines: &[Routine]) -> Result<Vec<u8>, ImageError> {
    let mut buf = Vec::new();
    write_image(&mut buf, routines)?;
    Ok(buf)
}

pub fn read_image(bytes: &[u8]) -> Result<Vec<Routine>, ImageError> {
    let mut r = Reader { bytes, pos: 0 };
    if r.take(MAGIC.len())? != MAGIC {
        return Err(ImageError::BadMagic);
    }
    let version = r.u16()?;
    if version != VERSION {
        return Err(ImageError::UnsupportedVersion(version));
    }
    let count = r.u32()? as usize;
    let mut routines = Vec::new();
    for _ in 0..count {
        let name = r.string()?;
        let params = r.u16()?;
        let locals = r.u16()?;
        let constant_count = r.u32()? as usize;
        let mut constants = Vec::new();
        for _ in 0..constant_count {
            constants.push(r.constant()?);
        }
        let code = r.bytes()?.to_vec();
        let source_map = SourceMap::from_bytes(r.bytes()?.to_vec());
        routines.push(Routine {
            name,
            params,
            locals,
            code,
            constants,
            source_map,
        });
    }
    Ok(routines)
}

// ── writing ────────────────────────────────────────────────────────

fn write_len<W: Write>(
    out: &mut W,
    len: usize,
    what: &'static str,
) -> Result<(), ImageError> {
    let len = u32::try_from(len).map_err(|_| ImageError::TooLarge { what })?;
    out.write_all(&len.to_le_bytes())?;
    Ok(())
}

fn write_bytes<W: Write>(out: &mut W, bytes: &[u8]) -> Result<(), ImageError> {
    write_len(out, bytes.len(), "byte string")?;
    out.write_all(bytes)?;
    Ok(())
}

fn write_str<W: Write>(out: &mut W, s: &str) -> Result<(), ImageError> {
    write_bytes(out, s.as_bytes())
}

fn write_constant<W: Write>(
    out: &mut W,
    constant: &Constant,
) -> Result<(), ImageError> {
    match constant {
        Constant::None => out.write_all(&[TAG_NONE])?,
        Constant::Int(v) => {
            out.write_all(&[TAG_INT])?;
            out.write_all(&v.to_le_bytes())?;
        }
        Constant::Bool(v) => out.write_all(&[TAG_BOOL, *v as u8])?,
        Constant::Str(s) => {
            out.write_all(&[TAG_STR])?;
            write_str(out, s)?;
        }
        Constant::Sequence(items) => {
            out.write_all(&[TAG_SEQUENCE])?;
            write_len(out, items.len(), "sequence constant")?;
            for item in items {
                write_constant(out, item)?;
            }
        }
    }
    Ok(())
}

// ── reading ────────────────────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ImageError> {
        let end = self
            .pos
            .checked_add(n)
            .ok_or(ImageError::Truncated(self.pos))?;
        let slice = self
            .bytes
            .get(self.pos..end)
            .ok_or(ImageError::Truncated(self.pos))?;
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], ImageError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8, ImageError> {
        Ok(self.array::<1>()?[0])
    }

    fn u16(&mut self) -> Result<u16, ImageError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, ImageError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64, ImageError> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn bytes(&mut self) -> Result<&'a [u8], ImageError> {
        let len = self.u32()? as usize;
        self.take(len)
    }

    fn string(&mut self) -> Result<String, ImageError> {
        let at = self.pos;
        let bytes = self.bytes()?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ImageError::InvalidString(at))
    }

    fn constant(&mut self) -> Result<Constant, ImageError> {
        let offset = self.pos;
        let constant = match self.u8()? {
            TAG_NONE => Constant::None,
            TAG_INT => Constant::Int(self.i64()?),
            TAG_BOOL => Constant::Bool(self.u8()? != 0),
            TAG_STR => Constant::Str(self.string()?),
            TAG_SEQUENCE => {
                let len = self.u32()? as usize;
                let mut items = Vec::new();
                for _ in 0..len {
                    items.push(self.constant()?);
                }
                Constant::Sequence(items)
            }
            tag => return Err(ImageError::BadConstantTag { tag, offset }),
        };
        Ok(constant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source_map::{SourceMapBuilder, Span};
    use crate::{BytecodeBuilder, Op};

    fn routines() -> Vec<Routine> {
        let mut b = BytecodeBuilder::new();
        b.load_const(0);
        b.load_local(300);
        b.simple(Op::Return);
        let mut map = SourceMapBuilder::new();
        map.add(0, Span::new(3, 12));
        vec![
            Routine {
                name: "main".into(),
                params: 0,
                locals: 301,
                code: b.into_bytes(),
                constants: vec![
                    Constant::Sequence(vec![
                        Constant::Int(-5),
                        Constant::Bool(true),
                        Constant::None,
                    ]),
                    Constant::Str("héllo".into()),
                ],
                source_map: map.finish(),
            },
            Routine {
                name: "Point.norm".into(),
                params: 1,
                locals: 1,
                code: vec![Op::LoadNone as u8, Op::Return as u8],
                constants: Vec::new(),
                source_map: SourceMap::default(),
            },
        ]
    }

    #[test]
    fn image_reads_back_what_was_written() {
        let bytes = image_to_bytes(&routines()).unwrap();
        assert_eq!(&bytes[..6], MAGIC);
        assert_eq!(read_image(&bytes).unwrap(), routines());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = image_to_bytes(&routines()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(read_image(&bytes), Err(ImageError::BadMagic)));
    }

    #[test]
    fn future_version_is_rejected() {
        let mut bytes = image_to_bytes(&routines()).unwrap();
        bytes[6..8].copy_from_slice(&2u16.to_le_bytes());
        assert!(matches!(
            read_image(&bytes),
            Err(ImageError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn every_truncation_is_an_error() {
        let bytes = image_to_bytes(&routines()).unwrap();
        for len in 0..bytes.len() {
            assert!(read_image(&bytes[..len]).is_err(), "prefix of {len}");
        }
    }

    #[test]
    fn unknown_constant_tag() {
        let routine = Routine {
            name: "r".into(),
            params: 0,
            locals: 0,
            code: Vec::new(),
            constants: vec![Constant::None],
            source_map: SourceMap::default(),
        };
        let mut bytes = image_to_bytes(&[routine]).unwrap();
        // magic + version + count + name(4+1) + params + locals + pool len
        let tag_at = 6 + 2 + 4 + 5 + 2 + 2 + 4;
        bytes[tag_at] = 99;
        assert!(matches!(
            read_image(&bytes),
            Err(ImageError::BadConstantTag { tag: 99, .. })
        ));
    }
}
