mod decl;
mod error;
mod interning;
mod registry;
mod types;
mod value;

pub use decl::{
    Callable, ClassDecl, ClassId, MethodImpl, NativeId, RoutineId, TraitDecl,
    TraitMethod,
};
pub use error::{RegistryError, Result};
pub use interning::{Interner, Symbol};
pub use registry::{Class, MethodKey, MethodTable, Registry};
pub use types::{Bindings, MethodSig, SELF_PARAM, TraitRef, TypeRef};
pub use value::{ObjectRef, Value};

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn loaded_registry_is_shareable() {
        assert_send_sync::<Registry>();
        assert_send_sync::<Interner>();
    }
}
