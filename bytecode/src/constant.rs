use core::fmt;
use std::collections::HashMap;

use thiserror::Error;

/// A compile-time literal stored in a routine's constant pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Constant {
    None,
    Int(i64),
    Bool(bool),
    Str(String),
    /// A collection literal whose elements are all constants.
    Sequence(Vec<Constant>),
}

impl fmt::Display for Constant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constant::None => f.write_str("None"),
            Constant::Int(v) => write!(f, "{v}"),
            Constant::Bool(v) => write!(f, "{v}"),
            Constant::Str(s) => write!(f, "{s:?}"),
            Constant::Sequence(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("constant pool is full ({} entries)", u16::MAX as usize + 1)]
pub struct PoolFull;

/// Deduplicating constant pool. Equal constants share one index.
#[derive(Debug, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    index: HashMap<Constant, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of `constant`, adding it if it is not in the pool yet.
    pub fn add(&mut self, constant: Constant) -> Result<u16, PoolFull> {
        if let Some(&idx) = self.index.get(&constant) {
            return Ok(idx);
        }
        let idx = u16::try_from(self.entries.len()).map_err(|_| PoolFull)?;
        self.index.insert(constant.clone(), idx);
        self.entries.push(constant);
        Ok(idx)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Constant> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_constants_share_an_index() {
        let mut pool = ConstantPool::new();
        let a = pool.add(Constant::Str("x".into())).unwrap();
        let b = pool.add(Constant::Int(7)).unwrap();
        let c = pool.add(Constant::Str("x".into())).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn nested_sequences_deduplicate_structurally() {
        let mut pool = ConstantPool::new();
        let seq = || Constant::Sequence(vec![Constant::Int(1), Constant::Int(2)]);
        assert_eq!(pool.add(seq()).unwrap(), pool.add(seq()).unwrap());
        assert_eq!(pool.into_vec(), vec![seq()]);
    }

    #[test]
    fn display() {
        let c = Constant::Sequence(vec![
            Constant::Int(1),
            Constant::Str("a".into()),
            Constant::None,
        ]);
        assert_eq!(c.to_string(), "[1, \"a\", None]");
    }
}
