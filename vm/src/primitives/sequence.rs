use object::{ObjectRef, Value};

use crate::fault::RuntimeError;
use crate::interpreter::Interpreter;
use crate::primitives::{arg, expect_instance, int_field};

const SOURCE: usize = 0;
const INDEX: usize = 1;

fn expect_sequence(value: &Value) -> Result<&Value, RuntimeError> {
    match value {
        Value::Sequence(_) => Ok(value),
        other => Err(RuntimeError::type_mismatch("Sequence", other.kind_name())),
    }
}

pub fn sequence_iter(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let source = expect_sequence(arg(args, 0)?)?.clone();
    let class = interp.specials().sequence_iterator;
    Ok(Value::Object(ObjectRef::with_fields(
        class,
        vec![source, Value::Int(0)],
    )))
}

pub fn sequence_iterator_next(
    interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let class = interp.specials().sequence_iterator;
    let it = expect_instance(arg(args, 0)?, class, "SequenceIterator")?;
    let index = int_field(it, INDEX)?;
    let Some(Value::Sequence(items)) = it.get(SOURCE) else {
        return Err(RuntimeError::invalid("sequence iterator lost its source"));
    };
    let item = usize::try_from(index)
        .ok()
        .and_then(|i| items.borrow().get(i).cloned());
    match item {
        Some(item) => {
            it.set(INDEX, Value::Int(index + 1));
            Ok(Value::some(item))
        }
        None => Ok(Value::NONE),
    }
}

pub fn sequence_len(
    _interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    match arg(args, 0)? {
        Value::Sequence(items) => Ok(Value::Int(items.borrow().len() as i64)),
        other => Err(RuntimeError::type_mismatch("Sequence", other.kind_name())),
    }
}

pub fn sequence_append(
    _interp: &mut Interpreter,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let item = arg(args, 1)?.clone();
    match arg(args, 0)? {
        Value::Sequence(items) => {
            items.borrow_mut().push(item);
            Ok(Value::NONE)
        }
        other => Err(RuntimeError::type_mismatch("Sequence", other.kind_name())),
    }
}
