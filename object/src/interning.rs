use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;

/// An interned method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sym#{}", self.0)
    }
}

struct InternerImpl {
    table: Vec<Arc<str>>,
    mappings: HashMap<Arc<str>, Symbol>,
}

impl InternerImpl {
    fn new() -> Self {
        Self {
            table: Vec::new(),
            mappings: HashMap::new(),
        }
    }

    fn get_or_add(&mut self, value: &str) -> Symbol {
        if let Some(&sym) = self.mappings.get(value) {
            return sym;
        }
        let sym = Symbol(self.table.len() as u32);
        let interned = Arc::<str>::from(value);
        self.table.push(interned.clone());
        self.mappings.insert(interned, sym);
        sym
    }
}

/// Selector table shared by the registry, the emitter and every running
/// interpreter. Written during load, read-mostly afterwards.
#[derive(Clone)]
pub struct Interner(Arc<RwLock<InternerImpl>>);

impl Interner {
    pub fn new() -> Self {
        Self(Arc::new(RwLock::new(InternerImpl::new())))
    }

    pub fn intern(&self, value: &str) -> Symbol {
        if let Some(sym) = self.lookup(value) {
            return sym;
        }
        self.0.write().get_or_add(value)
    }

    /// Find an existing symbol without adding one.
    pub fn lookup(&self, value: &str) -> Option<Symbol> {
        self.0.read().mappings.get(value).copied()
    }

    pub fn resolve(&self, sym: Symbol) -> Option<Arc<str>> {
        self.0.read().table.get(sym.0 as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.read().table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Interner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Interner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interner").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_text_same_symbol() {
        let interner = Interner::new();
        let a = interner.intern("next");
        let b = interner.intern("iter");
        assert_eq!(interner.intern("next"), a);
        assert_ne!(a, b);
        assert_eq!(interner.resolve(b).as_deref(), Some("iter"));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn lookup_does_not_insert() {
        let interner = Interner::new();
        assert_eq!(interner.lookup("missing"), None);
        assert!(interner.is_empty());
    }

    #[test]
    fn clones_share_the_table() {
        let interner = Interner::new();
        let shared = interner.clone();
        let sym = std::thread::spawn(move || shared.intern("__eq__"))
            .join()
            .unwrap();
        assert_eq!(interner.lookup("__eq__"), Some(sym));
    }
}
