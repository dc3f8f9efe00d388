use object::{
    Callable, ClassDecl, ClassId, MethodImpl, MethodSig, NativeId, Registry,
    RegistryError, TraitDecl, TraitMethod, TraitRef, TypeRef,
};

use crate::primitives;

pub const ITERATOR: &str = "Iterator";
pub const ITERABLE: &str = "Iterable";

/// Class ids of the builtin classes every program starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Specials {
    pub int: ClassId,
    pub bool: ClassId,
    pub str: ClassId,
    pub sequence: ClassId,
    pub optional: ClassId,
    pub range: ClassId,
    pub sequence_iterator: ClassId,
    pub range_iterator: ClassId,
    pub string_iterator: ClassId,
}

fn iterator_of(item: TypeRef) -> TypeRef {
    TypeRef::generic(ITERATOR, vec![item])
}

fn iterable_of(item: TypeRef) -> TraitRef {
    TraitRef::new(ITERABLE, vec![item])
}

fn native(
    name: &str,
    params: Vec<TypeRef>,
    ret: TypeRef,
    id: NativeId,
) -> MethodImpl {
    MethodImpl {
        sig: MethodSig::new(name, params, ret),
        body: Callable::Native(id),
    }
}

fn builtin(
    registry: &mut Registry,
    name: &str,
    fields: &[&str],
    conformances: Vec<TraitRef>,
    methods: Vec<MethodImpl>,
) -> Result<ClassId, RegistryError> {
    registry.register_class(ClassDecl {
        name: name.to_string(),
        fields: fields.iter().map(|f| f.to_string()).collect(),
        conformances,
        methods,
    })
}

fn iterator_class(
    registry: &mut Registry,
    name: &str,
    fields: &[&str],
    item: TypeRef,
    next: NativeId,
) -> Result<ClassId, RegistryError> {
    builtin(
        registry,
        name,
        fields,
        vec![TraitRef::new(ITERATOR, vec![item.clone()])],
        vec![native("next", Vec::new(), TypeRef::optional(item), next)],
    )
}

/// Register the iteration traits and the builtin classes.
///
/// Must run on an empty registry, before any program declarations.
pub fn bootstrap(registry: &mut Registry) -> Result<Specials, RegistryError> {
    let t = || TypeRef::param("T");

    registry.register_trait(TraitDecl {
        name: ITERATOR.to_string(),
        type_params: vec!["T".to_string()],
        requires: Vec::new(),
        methods: vec![TraitMethod::required(MethodSig::new(
            "next",
            Vec::new(),
            TypeRef::optional(t()),
        ))],
    })?;
    registry.register_trait(TraitDecl {
        name: ITERABLE.to_string(),
        type_params: vec!["T".to_string()],
        requires: Vec::new(),
        methods: vec![TraitMethod::required(MethodSig::new(
            "iter",
            Vec::new(),
            iterator_of(t()),
        ))],
    })?;

    let int = builtin(registry, "Int", &[], Vec::new(), Vec::new())?;
    let bool = builtin(registry, "Bool", &[], Vec::new(), Vec::new())?;
    let str = builtin(
        registry,
        "Str",
        &[],
        vec![iterable_of(TypeRef::Str)],
        vec![
            native("iter", Vec::new(), iterator_of(TypeRef::Str), primitives::STRING_ITER),
            native("len", Vec::new(), TypeRef::Int, primitives::STRING_LEN),
        ],
    )?;
    let sequence = builtin(
        registry,
        "Sequence",
        &[],
        vec![iterable_of(TypeRef::Any)],
        vec![
            native("iter", Vec::new(), iterator_of(TypeRef::Any), primitives::SEQUENCE_ITER),
            native("len", Vec::new(), TypeRef::Int, primitives::SEQUENCE_LEN),
            native(
                "append",
                vec![TypeRef::Any],
                TypeRef::Any,
                primitives::SEQUENCE_APPEND,
            ),
        ],
    )?;
    let optional = builtin(registry, "Optional", &[], Vec::new(), Vec::new())?;
    let range = builtin(
        registry,
        "Range",
        &["start", "end"],
        vec![iterable_of(TypeRef::Int)],
        vec![
            native("iter", Vec::new(), iterator_of(TypeRef::Int), primitives::RANGE_ITER),
            native("contains", vec![TypeRef::Int], TypeRef::Bool, primitives::RANGE_CONTAINS),
            native("__str__", Vec::new(), TypeRef::Str, primitives::RANGE_STR),
            native("len", Vec::new(), TypeRef::Int, primitives::RANGE_LEN),
        ],
    )?;

    let sequence_iterator = iterator_class(
        registry,
        "SequenceIterator",
        &["source", "index"],
        TypeRef::Any,
        primitives::SEQUENCE_ITERATOR_NEXT,
    )?;
    let range_iterator = iterator_class(
        registry,
        "RangeIterator",
        &["next", "end"],
        TypeRef::Int,
        primitives::RANGE_ITERATOR_NEXT,
    )?;
    let string_iterator = iterator_class(
        registry,
        "StringIterator",
        &["source", "index"],
        TypeRef::Str,
        primitives::STRING_ITERATOR_NEXT,
    )?;

    Ok(Specials {
        int,
        bool,
        str,
        sequence,
        optional,
        range,
        sequence_iterator,
        range_iterator,
        string_iterator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_resolve_their_hooks() {
        let mut registry = Registry::new();
        let specials = bootstrap(&mut registry).unwrap();

        assert_eq!(
            registry.resolve_name(specials.sequence, "iter", 0),
            Some(Callable::Native(primitives::SEQUENCE_ITER))
        );
        assert_eq!(
            registry.resolve_name(specials.range, "contains", 1),
            Some(Callable::Native(primitives::RANGE_CONTAINS))
        );
        assert_eq!(registry.resolve_name(specials.int, "iter", 0), None);
        assert!(registry.conforms_to(
            specials.range,
            &TraitRef::new(ITERABLE, vec![TypeRef::Int])
        ));
        assert!(registry.conforms_to(
            specials.string_iterator,
            &TraitRef::new(ITERATOR, vec![TypeRef::Str])
        ));
    }

    #[test]
    fn range_fields_are_ordered() {
        let mut registry = Registry::new();
        let specials = bootstrap(&mut registry).unwrap();
        let range = registry.class(specials.range).unwrap();
        assert_eq!(range.field_slot("start"), Some(0));
        assert_eq!(range.field_slot("end"), Some(1));
    }
}
