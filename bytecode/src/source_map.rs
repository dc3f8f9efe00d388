//! Delta-encoded VLQ table mapping instruction offsets to source spans.
//!
//! Each entry is three VLQ values: the instruction offset delta (unsigned)
//! and the span start/end deltas (zigzag-signed).

/// A half-open range of character offsets in the program source.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

impl Span {
    pub const fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl core::fmt::Display for Span {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// Accumulates source map entries while a routine is emitted.
///
/// Entries must be added with non-decreasing offsets. Adding a second entry
/// at the same offset replaces the first one.
#[derive(Debug, Default)]
pub struct SourceMapBuilder {
    entries: Vec<(u32, Span)>,
}

impl SourceMapBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pc: u32, span: Span) {
        debug_assert!(
            self.entries.last().is_none_or(|(last, _)| *last <= pc),
            "source map entries must be added in offset order"
        );
        match self.entries.last_mut() {
            Some((last, prev)) if *last == pc => *prev = span,
            _ => self.entries.push((pc, span)),
        }
    }

    pub fn finish(self) -> SourceMap {
        let mut buf = Vec::new();
        let mut prev_pc: u32 = 0;
        let mut prev_start: i64 = 0;
        let mut prev_end: i64 = 0;

        for (pc, span) in &self.entries {
            encode_unsigned_vlq(pc - prev_pc, &mut buf);
            encode_unsigned_vlq(
                zigzag_encode(span.start as i64 - prev_start),
                &mut buf,
            );
            encode_unsigned_vlq(
                zigzag_encode(span.end as i64 - prev_end),
                &mut buf,
            );

            prev_pc = *pc;
            prev_start = span.start as i64;
            prev_end = span.end as i64;
        }

        SourceMap { encoded: buf }
    }
}

/// The encoded form of a routine's offset-to-span table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    encoded: Vec<u8>,
}

impl SourceMap {
    /// Wrap bytes read back from a persisted image.
    pub fn from_bytes(encoded: Vec<u8>) -> Self {
        Self { encoded }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.encoded
    }

    pub fn is_empty(&self) -> bool {
        self.encoded.is_empty()
    }

    /// Iterate `(offset, span)` entries in order. Stops at the first
    /// malformed entry.
    pub fn entries(&self) -> Entries<'_> {
        Entries {
            encoded: &self.encoded,
            pos: 0,
            pc: 0,
            start: 0,
            end: 0,
        }
    }

    /// The span of the last entry whose offset is `<= pc`.
    pub fn lookup(&self, pc: u32) -> Option<Span> {
        self.entries()
            .take_while(|(at, _)| *at <= pc)
            .last()
            .map(|(_, span)| span)
    }
}

pub struct Entries<'a> {
    encoded: &'a [u8],
    pos: usize,
    pc: u32,
    start: i64,
    end: i64,
}

impl Iterator for Entries<'_> {
    type Item = (u32, Span);

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.encoded.len() {
            return None;
        }
        let delta_pc = decode_unsigned_vlq(self.encoded, &mut self.pos)?;
        let delta_start =
            zigzag_decode(decode_unsigned_vlq(self.encoded, &mut self.pos)?);
        let delta_end =
            zigzag_decode(decode_unsigned_vlq(self.encoded, &mut self.pos)?);

        self.pc = self.pc.checked_add(delta_pc)?;
        self.start += delta_start;
        self.end += delta_end;

        let start = u32::try_from(self.start).ok()?;
        let end = u32::try_from(self.end).ok()?;
        Some((self.pc, Span { start, end }))
    }
}

// Variable-length integers.

/// 7 data bits per byte, MSB is the continuation bit.
fn encode_unsigned_vlq(mut value: u32, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

fn decode_unsigned_vlq(encoded: &[u8], pos: &mut usize) -> Option<u32> {
    let mut result: u32 = 0;
    let mut shift = 0;
    loop {
        let byte = *encoded.get(*pos)?;
        *pos += 1;
        result |= ((byte & 0x7F) as u32) << shift;
        if byte & 0x80 == 0 {
            return Some(result);
        }
        shift += 7;
        if shift >= 32 {
            return None;
        }
    }
}

fn zigzag_encode(value: i64) -> u32 {
    ((value << 1) ^ (value >> 63)) as u32
}

fn zigzag_decode(value: u32) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_map_has_no_spans() {
        let map = SourceMapBuilder::new().finish();
        assert!(map.is_empty());
        assert_eq!(map.lookup(0), None);
    }

    #[test]
    fn lookup_picks_last_entry_at_or_before_offset() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, Span::new(0, 5));
        builder.add(3, Span::new(10, 15));
        builder.add(7, Span::new(4, 30));
        let map = builder.finish();

        assert_eq!(map.lookup(0), Some(Span::new(0, 5)));
        assert_eq!(map.lookup(2), Some(Span::new(0, 5)));
        assert_eq!(map.lookup(3), Some(Span::new(10, 15)));
        assert_eq!(map.lookup(6), Some(Span::new(10, 15)));
        assert_eq!(map.lookup(7), Some(Span::new(4, 30)));
        assert_eq!(map.lookup(100), Some(Span::new(4, 30)));
    }

    #[test]
    fn same_offset_replaces_previous_entry() {
        let mut builder = SourceMapBuilder::new();
        builder.add(0, Span::new(0, 1));
        builder.add(0, Span::new(2, 9));
        let map = builder.finish();
        assert_eq!(map.entries().count(), 1);
        assert_eq!(map.lookup(0), Some(Span::new(2, 9)));
    }

    #[test]
    fn survives_byte_round_trip() {
        let mut builder = SourceMapBuilder::new();
        builder.add(1, Span::new(100, 200));
        builder.add(40, Span::new(20_000, 20_010));
        let map = builder.finish();
        let copy = SourceMap::from_bytes(map.as_bytes().to_vec());
        assert_eq!(copy.entries().collect::<Vec<_>>(), vec![
            (1, Span::new(100, 200)),
            (40, Span::new(20_000, 20_010)),
        ]);
    }

    #[test]
    fn truncated_bytes_stop_iteration() {
        let map = SourceMap::from_bytes(vec![0x80]);
        assert_eq!(map.entries().count(), 0);
        assert_eq!(map.lookup(0), None);
    }

    #[test]
    fn zigzag_is_reversible() {
        for v in [-1000, -1, 0, 1, 1000, i32::MAX as i64, i32::MIN as i64] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn hundred_entries_stay_compact() {
        let mut builder = SourceMapBuilder::new();
        for i in 0..100u32 {
            builder.add(i * 3, Span::new(i * 10, i * 10 + 5));
        }
        assert!(builder.finish().as_bytes().len() < 500);
    }
}
