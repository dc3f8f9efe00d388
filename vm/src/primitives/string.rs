use object::{ObjectRef, Value};

use crate::fault::RuntimeError;
use crate::interpreter::Interpreter;
use crate::primitives::{arg, expect_instance, int_field};

const SOURCE: usize = 0;
const INDEX: usize = 1;

/// Strings index by character, not by byte.
pub fn char_count(s: &str) -> usize {
    s.chars().count()
}

pub fn char_at(s: &str, index: usize) -> Option<Value> {
    s.chars().nth(index).map(|c| Value::str(c.encode_utf8(&mut [0; 4])))
}

pub fn substring(s: &str, start: usize, end: usize) -> Value {
    let text: String = s.chars().skip(start).take(end.saturating_sub(start)).collect();
    Value::str(&text)
}

pub fn string_iter(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let source = match arg(args, 0)? {
        value @ Value::Str(_) => value.clone(),
        other => return Err(RuntimeError::type_mismatch("Str", other.kind_name())),
    };
    let class = interp.specials().string_iterator;
    Ok(Value::Object(ObjectRef::with_fields(
        class,
        vec![source, Value::Int(0)],
    )))
}

pub fn string_iterator_next(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let class = interp.specials().string_iterator;
    let it = expect_instance(arg(args, 0)?, class, "StringIterator")?;
    let index = int_field(it, INDEX)?;
    let Some(Value::Str(source)) = it.get(SOURCE) else {
        return Err(RuntimeError::invalid("string iterator lost its source"));
    };
    match usize::try_from(index).ok().and_then(|i| char_at(&source, i)) {
        Some(ch) => {
            it.set(INDEX, Value::Int(index + 1));
            Ok(Value::some(ch))
        }
        None => Ok(Value::NONE),
    }
}

pub fn string_len(
    _interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    match arg(args, 0)? {
        Value::Str(s) => Ok(Value::Int(char_count(s) as i64)),
        other => Err(RuntimeError::type_mismatch("Str", other.kind_name())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_indexing() {
        assert_eq!(char_count("héllo"), 5);
        assert!(matches!(char_at("héllo", 1), Some(Value::Str(s)) if &*s == "é"));
        assert!(char_at("abc", 3).is_none());
        assert!(matches!(substring("héllo", 1, 3), Value::Str(s) if &*s == "él"));
        assert!(matches!(substring("abc", 2, 1), Value::Str(s) if s.is_empty()));
    }
}
