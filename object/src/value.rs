use core::fmt;
use std::cell::RefCell;
use std::rc::Rc;

use crate::decl::ClassId;

/// A runtime value.
///
/// Primitives are stored inline. Sequences and objects are reference counted;
/// cloning a `Value` aliases them. A sequence may contain itself, so every
/// walk over nested sequences tracks the ones it is inside.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Bool(bool),
    Str(Rc<str>),
    Sequence(Rc<RefCell<Vec<Value>>>),
    Optional(Option<Box<Value>>),
    Object(ObjectRef),
}

impl Value {
    pub const NONE: Value = Value::Optional(None);

    pub fn str(s: &str) -> Self {
        Value::Str(Rc::from(s))
    }

    pub fn sequence(items: Vec<Value>) -> Self {
        Value::Sequence(Rc::new(RefCell::new(items)))
    }

    pub fn some(value: Value) -> Self {
        Value::Optional(Some(Box::new(value)))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::Optional(None))
    }

    /// Name of the value's kind, used in fault messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "Int",
            Value::Bool(_) => "Bool",
            Value::Str(_) => "Str",
            Value::Sequence(_) => "Sequence",
            Value::Optional(_) => "Optional",
            Value::Object(_) => "Object",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Optional(inner) => inner.is_some(),
            Value::Str(_) | Value::Sequence(_) | Value::Object(_) => true,
        }
    }

    /// Equality without hooks: primitives by value, containers
    /// element-wise, objects by identity. A pair of sequences met again
    /// while comparing them counts as equal.
    pub fn structural_eq(&self, other: &Value) -> bool {
        self.eq_within(other, &mut Vec::new())
    }

    fn eq_within(&self, other: &Value, path: &mut Vec<(SeqPtr, SeqPtr)>) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Sequence(a), Value::Sequence(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Rc::as_ptr(a), Rc::as_ptr(b));
                if path.contains(&pair) {
                    return true;
                }
                path.push(pair);
                let (a, b) = (a.borrow(), b.borrow());
                let equal = a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.eq_within(y, path));
                path.pop();
                equal
            }
            (Value::Optional(a), Value::Optional(b)) => match (a, b) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_within(b, path),
                _ => false,
            },
            (Value::Object(a), Value::Object(b)) => a.same_identity(b),
            _ => false,
        }
    }

    /// Shared by `Display` and `Debug`; `Debug` quotes strings. A sequence
    /// already being written shows as `[...]`.
    fn write_within(
        &self,
        f: &mut fmt::Formatter<'_>,
        quote: bool,
        path: &mut Vec<SeqPtr>,
    ) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Str(s) if quote => write!(f, "{s:?}"),
            Value::Str(s) => f.write_str(s),
            Value::Sequence(items) => {
                let ptr = Rc::as_ptr(items);
                if path.contains(&ptr) {
                    return f.write_str("[...]");
                }
                path.push(ptr);
                f.write_str("[")?;
                for (i, item) in items.borrow().iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_within(f, quote, path)?;
                }
                path.pop();
                f.write_str("]")
            }
            Value::Optional(None) => f.write_str("None"),
            Value::Optional(Some(v)) => {
                f.write_str("Some(")?;
                v.write_within(f, quote, path)?;
                f.write_str(")")
            }
            Value::Object(obj) => write!(f, "<object %{}>", obj.class().0),
        }
    }
}

type SeqPtr = *const RefCell<Vec<Value>>;

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::str(v)
    }
}

/// Values print the way the language shows them: strings raw, objects as
/// `<ClassId>` since the class name lives in the registry.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_within(f, false, &mut Vec::new())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_within(f, true, &mut Vec::new())
    }
}

/// A reference to a class instance.
///
/// Cloning aliases the instance; identity is pointer identity.
#[derive(Clone)]
pub struct ObjectRef {
    class: ClassId,
    fields: Rc<RefCell<Vec<Value>>>,
}

impl ObjectRef {
    /// A fresh instance with `field_count` slots, all `None`.
    pub fn new(class: ClassId, field_count: usize) -> Self {
        Self::with_fields(class, vec![Value::NONE; field_count])
    }

    pub fn with_fields(class: ClassId, fields: Vec<Value>) -> Self {
        Self {
            class,
            fields: Rc::new(RefCell::new(fields)),
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    pub fn field_count(&self) -> usize {
        self.fields.borrow().len()
    }

    pub fn get(&self, slot: usize) -> Option<Value> {
        self.fields.borrow().get(slot).cloned()
    }

    /// Store into `slot`. Returns `false` if the slot does not exist.
    pub fn set(&self, slot: usize, value: Value) -> bool {
        match self.fields.borrow_mut().get_mut(slot) {
            Some(field) => {
                *field = value;
                true
            }
            None => false,
        }
    }

    pub fn same_identity(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.fields, &other.fields)
    }

    /// Address of the instance, stable for its lifetime. Used for identity
    /// hashing.
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.fields) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRef")
            .field("class", &self.class)
            .field("fields", &self.field_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness() {
        assert!(!Value::Bool(false).is_truthy());
        assert!(!Value::NONE.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(Value::Int(-3).is_truthy());
        assert!(Value::some(Value::Bool(false)).is_truthy());
        assert!(Value::str("").is_truthy());
        assert!(Value::sequence(vec![]).is_truthy());
    }

    #[test]
    fn structural_equality_is_element_wise() {
        let a = Value::sequence(vec![Value::Int(1), Value::some(Value::str("x"))]);
        let b = Value::sequence(vec![Value::Int(1), Value::some(Value::str("x"))]);
        let c = Value::sequence(vec![Value::Int(1), Value::NONE]);
        assert!(a.structural_eq(&b));
        assert!(!a.structural_eq(&c));
        assert!(!Value::Int(1).structural_eq(&Value::Bool(true)));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = ObjectRef::new(ClassId(3), 2);
        let alias = a.clone();
        let other = ObjectRef::new(ClassId(3), 2);
        assert!(Value::Object(a.clone()).structural_eq(&Value::Object(alias.clone())));
        assert!(!Value::Object(a.clone()).structural_eq(&Value::Object(other)));

        alias.set(1, Value::Int(9));
        assert!(matches!(a.get(1), Some(Value::Int(9))));
        assert!(!a.set(2, Value::Int(0)));
    }

    #[test]
    fn display() {
        let v = Value::sequence(vec![
            Value::Int(1),
            Value::str("two"),
            Value::some(Value::Bool(true)),
            Value::NONE,
        ]);
        assert_eq!(v.to_string(), "[1, two, Some(true), None]");
        assert_eq!(format!("{v:?}"), "[1, \"two\", Some(true), None]");
    }

    #[test]
    fn self_containing_sequences() {
        let a = Value::sequence(vec![Value::Int(0)]);
        let b = Value::sequence(vec![Value::Int(0)]);
        for seq in [&a, &b] {
            if let Value::Sequence(items) = seq {
                items.borrow_mut()[0] = seq.clone();
            }
        }
        assert_eq!(a.to_string(), "[[...]]");
        assert_eq!(format!("{:?}", Value::some(a.clone())), "Some([[...]])");
        assert!(a.structural_eq(&b));
        assert!(!a.structural_eq(&Value::sequence(vec![Value::Int(0)])));

        // break the cycles so the test does not leak
        for seq in [&a, &b] {
            if let Value::Sequence(items) = seq {
                items.borrow_mut().clear();
            }
        }
    }
}
