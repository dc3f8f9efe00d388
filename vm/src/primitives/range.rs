//! Ranges are ordinary instances of the builtin `Range` class with an
//! exclusive upper bound; closed ranges are normalized when created.

use object::{ClassId, ObjectRef, Value};

use crate::fault::RuntimeError;
use crate::interpreter::Interpreter;
use crate::primitives::{arg, expect_instance, expect_int, int_field};

const START: usize = 0;
const END: usize = 1;

const NEXT: usize = 0;
const ITER_END: usize = 1;

pub fn make_range(class: ClassId, start: i64, end: i64) -> Value {
    Value::Object(ObjectRef::with_fields(
        class,
        vec![Value::Int(start), Value::Int(end)],
    ))
}

/// `(start, end)` of a range instance, end exclusive.
pub fn bounds(range: &ObjectRef) -> Result<(i64, i64), RuntimeError> {
    Ok((int_field(range, START)?, int_field(range, END)?))
}

pub fn contains(range: &ObjectRef, value: i64) -> Result<bool, RuntimeError> {
    let (start, end) = bounds(range)?;
    Ok(start <= value && value < end)
}

pub fn len(range: &ObjectRef) -> Result<i64, RuntimeError> {
    let (start, end) = bounds(range)?;
    Ok(end.saturating_sub(start).max(0))
}

fn receiver<'a>(
    interp: &Interpreter,
    args: &'a [Value],
) -> Result<&'a ObjectRef, RuntimeError> {
    expect_instance(arg(args, 0)?, interp.specials().range, "Range")
}

pub fn range_iter(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let (start, end) = bounds(receiver(interp, args)?)?;
    let class = interp.specials().range_iterator;
    Ok(Value::Object(ObjectRef::with_fields(
        class,
        vec![Value::Int(start), Value::Int(end)],
    )))
}

pub fn range_iterator_next(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let class = interp.specials().range_iterator;
    let it = expect_instance(arg(args, 0)?, class, "RangeIterator")?;
    let next = int_field(it, NEXT)?;
    if next >= int_field(it, ITER_END)? {
        return Ok(Value::NONE);
    }
    // next < end, so this cannot overflow
    it.set(NEXT, Value::Int(next + 1));
    Ok(Value::some(Value::Int(next)))
}

pub fn range_contains(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let range = receiver(interp, args)?;
    let value = expect_int(arg(args, 1)?)?;
    Ok(Value::Bool(contains(range, value)?))
}

pub fn range_str(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let (start, end) = bounds(receiver(interp, args)?)?;
    Ok(Value::str(&format!("{start}..<{end}")))
}

pub fn range_len(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    Ok(Value::Int(len(receiver(interp, args)?)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn membership_is_half_open() {
        let Value::Object(r) = make_range(ClassId(5), 1, 4) else {
            panic!("range is an object");
        };
        assert!(contains(&r, 1).unwrap());
        assert!(contains(&r, 3).unwrap());
        assert!(!contains(&r, 4).unwrap());
        assert_eq!(len(&r).unwrap(), 3);
    }

    #[test]
    fn reversed_range_is_empty() {
        let Value::Object(r) = make_range(ClassId(5), 4, 1) else {
            panic!("range is an object");
        };
        assert_eq!(len(&r).unwrap(), 0);
        assert!(!contains(&r, 2).unwrap());
    }
}
