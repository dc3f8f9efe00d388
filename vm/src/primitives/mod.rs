use object::{NativeId, ObjectRef, Value};

use crate::fault::RuntimeError;
use crate::interpreter::Interpreter;

pub mod int;
pub mod range;
pub mod sequence;
pub mod string;

/// A native hook. `args[0]` is the receiver.
pub type NativeFn =
    fn(&mut Interpreter, &[Value]) -> Result<Value, RuntimeError>;

#[derive(Clone, Copy)]
pub struct NativeDesc {
    pub name: &'static str,
    /// Argument count including the receiver.
    pub params: u8,
    pub func: NativeFn,
}

impl NativeDesc {
    pub const fn new(name: &'static str, params: u8, func: NativeFn) -> Self {
        Self { name, params, func }
    }
}

impl core::fmt::Debug for NativeDesc {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("NativeDesc")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish()
    }
}

pub const SEQUENCE_ITER: NativeId = NativeId(0);
pub const SEQUENCE_ITERATOR_NEXT: NativeId = NativeId(1);
pub const SEQUENCE_LEN: NativeId = NativeId(2);
pub const SEQUENCE_APPEND: NativeId = NativeId(3);
pub const RANGE_ITER: NativeId = NativeId(4);
pub const RANGE_ITERATOR_NEXT: NativeId = NativeId(5);
pub const RANGE_CONTAINS: NativeId = NativeId(6);
pub const RANGE_STR: NativeId = NativeId(7);
pub const RANGE_LEN: NativeId = NativeId(8);
pub const STRING_ITER: NativeId = NativeId(9);
pub const STRING_ITERATOR_NEXT: NativeId = NativeId(10);
pub const STRING_LEN: NativeId = NativeId(11);

static NATIVES: [NativeDesc; 12] = [
    NativeDesc::new("sequence_iter", 1, sequence::sequence_iter),
    NativeDesc::new("sequence_iterator_next", 1, sequence::sequence_iterator_next),
    NativeDesc::new("sequence_len", 1, sequence::sequence_len),
    NativeDesc::new("sequence_append", 2, sequence::sequence_append),
    NativeDesc::new("range_iter", 1, range::range_iter),
    NativeDesc::new("range_iterator_next", 1, range::range_iterator_next),
    NativeDesc::new("range_contains", 2, range::range_contains),
    NativeDesc::new("range_str", 1, range::range_str),
    NativeDesc::new("range_len", 1, range::range_len),
    NativeDesc::new("string_iter", 1, string::string_iter),
    NativeDesc::new("string_iterator_next", 1, string::string_iterator_next),
    NativeDesc::new("string_len", 1, string::string_len),
];

pub fn natives() -> &'static [NativeDesc] {
    &NATIVES
}

pub fn native(id: NativeId) -> Option<&'static NativeDesc> {
    NATIVES.get(id.0 as usize)
}

pub(crate) fn arg(args: &[Value], index: usize) -> Result<&Value, RuntimeError> {
    args.get(index).ok_or_else(|| {
        RuntimeError::invalid(format!("native hook missing argument {index}"))
    })
}

pub(crate) fn expect_int(value: &Value) -> Result<i64, RuntimeError> {
    match value {
        Value::Int(v) => Ok(*v),
        other => Err(RuntimeError::type_mismatch("Int", other.kind_name())),
    }
}

/// Unwrap an instance of one of the builtin classes.
pub(crate) fn expect_instance<'a>(
    value: &'a Value,
    class: object::ClassId,
    expected: &str,
) -> Result<&'a ObjectRef, RuntimeError> {
    match value {
        Value::Object(obj) if obj.class() == class => Ok(obj),
        other => Err(RuntimeError::type_mismatch(expected, other.kind_name())),
    }
}

/// Read an integer slot of a builtin iterator or range.
pub(crate) fn int_field(
    obj: &ObjectRef,
    slot: usize,
) -> Result<i64, RuntimeError> {
    let value = obj
        .get(slot)
        .ok_or_else(|| RuntimeError::invalid(format!("missing slot {slot}")))?;
    expect_int(&value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_match_table_order() {
        let expected = [
            (SEQUENCE_ITER, "sequence_iter"),
            (SEQUENCE_ITERATOR_NEXT, "sequence_iterator_next"),
            (SEQUENCE_LEN, "sequence_len"),
            (SEQUENCE_APPEND, "sequence_append"),
            (RANGE_ITER, "range_iter"),
            (RANGE_ITERATOR_NEXT, "range_iterator_next"),
            (RANGE_CONTAINS, "range_contains"),
            (RANGE_STR, "range_str"),
            (RANGE_LEN, "range_len"),
            (STRING_ITER, "string_iter"),
            (STRING_ITERATOR_NEXT, "string_iterator_next"),
            (STRING_LEN, "string_len"),
        ];
        assert_eq!(expected.len(), natives().len());
        for (id, name) in expected {
            assert_eq!(native(id).map(|d| d.name), Some(name));
        }
    }
}
