use crate::types::{MethodSig, TraitRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u16);

/// Index of a compiled bytecode routine in the loaded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoutineId(pub u16);

/// Index of a native hook in the primitive table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeId(pub u16);

/// Something a method-table entry can point at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Callable {
    Routine(RoutineId),
    Native(NativeId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitMethod {
    pub sig: MethodSig,
    pub default: Option<Callable>,
}

impl TraitMethod {
    pub fn required(sig: MethodSig) -> Self {
        Self { sig, default: None }
    }

    pub fn with_default(sig: MethodSig, body: Callable) -> Self {
        Self {
            sig,
            default: Some(body),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub requires: Vec<TraitRef>,
    pub methods: Vec<TraitMethod>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodImpl {
    pub sig: MethodSig,
    pub body: Callable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<String>,
    pub conformances: Vec<TraitRef>,
    pub methods: Vec<MethodImpl>,
}
