use std::collections::{HashMap, HashSet};

use log::debug;

use crate::decl::{Callable, ClassDecl, ClassId, TraitDecl};
use crate::error::{RegistryError, Result};
use crate::interning::{Interner, Symbol};
use crate::types::{Bindings, MethodSig, SELF_PARAM, TraitRef, TypeRef};

/// Method-table key: selector plus explicit parameter count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodKey {
    pub name: Symbol,
    pub arity: usize,
}

/// A class's linearized methods: own implementations plus the inherited
/// trait defaults it did not override.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MethodTable {
    entries: HashMap<MethodKey, Callable>,
}

impl MethodTable {
    pub fn get(&self, key: MethodKey) -> Option<Callable> {
        self.entries.get(&key).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in key order.
    pub fn entries(&self) -> Vec<(MethodKey, Callable)> {
        let mut out: Vec<_> =
            self.entries.iter().map(|(k, v)| (*k, *v)).collect();
        out.sort_by_key(|(k, _)| *k);
        out
    }
}

/// A registered class.
#[derive(Debug, Clone)]
pub struct Class {
    id: ClassId,
    decl: ClassDecl,
    fields: HashMap<String, u16>,
    closure: Vec<TraitRef>,
    table: MethodTable,
    signatures: HashMap<MethodKey, MethodSig>,
}

impl Class {
    pub fn id(&self) -> ClassId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn decl(&self) -> &ClassDecl {
        &self.decl
    }

    pub fn field_count(&self) -> usize {
        self.decl.fields.len()
    }

    pub fn field_slot(&self, name: &str) -> Option<u16> {
        self.fields.get(name).copied()
    }

    /// Every trait the class conforms to, with arguments bound, in
    /// discovery order.
    pub fn conformances(&self) -> &[TraitRef] {
        &self.closure
    }

    pub fn method_table(&self) -> &MethodTable {
        &self.table
    }
}

struct Candidate<'a> {
    trait_name: &'a str,
    sig: MethodSig,
    default: Option<Callable>,
}

/// Process-wide table of traits and classes.
///
/// Populated during program load, then only read. Every query is a pure
/// lookup, so a loaded registry can be shared between threads.
#[derive(Debug, Default)]
pub struct Registry {
    interner: Interner,
    traits: HashMap<String, TraitDecl>,
    /// Traits found on a requirement cycle, with the cycle that poisoned
    /// them.
    poisoned: HashMap<String, Vec<String>>,
    classes: Vec<Class>,
    class_ids: HashMap<String, ClassId>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_interner(interner: Interner) -> Self {
        Self {
            interner,
            ..Self::default()
        }
    }

    pub fn interner(&self) -> &Interner {
        &self.interner
    }

    // ── registration ───────────────────────────────────────────────

    /// Register a trait. Required traits may be registered later.
    pub fn register_trait(&mut self, decl: TraitDecl) -> Result<()> {
        if let Some(cycle) = self.poisoned.get(&decl.name) {
            return Err(RegistryError::CyclicConformance {
                name: decl.name.clone(),
                cycle: cycle.clone(),
            });
        }
        if self.traits.contains_key(&decl.name) {
            return Err(RegistryError::DuplicateTrait(decl.name));
        }

        let mut seen = HashSet::new();
        for method in &decl.methods {
            if !seen.insert((method.sig.name.as_str(), method.sig.arity())) {
                return Err(RegistryError::DuplicateMethod {
                    owner: decl.name.clone(),
                    method: method.sig.name.clone(),
                    arity: method.sig.arity(),
                });
            }
        }

        for required in &decl.requires {
            let target = if required.name == decl.name {
                Some(&decl)
            } else {
                self.traits.get(&required.name)
            };
            if let Some(target) = target {
                check_arg_count(target, required, &decl.name)?;
            }
        }

        let mut path = Vec::new();
        let mut visited = HashSet::new();
        if let Some(cycle) =
            self.find_cycle(&decl.name, &decl, &mut path, &mut visited)
        {
            debug!("rejecting trait {}: cycle {}", decl.name, cycle.join(" -> "));
            for member in &cycle {
                self.poisoned.insert(member.clone(), cycle.clone());
            }
            return Err(RegistryError::CyclicConformance {
                name: decl.name,
                cycle,
            });
        }

        debug!(
            "registered trait {} ({} method(s), requires [{}])",
            decl.name,
            decl.methods.len(),
            decl.requires
                .iter()
                .map(|r| r.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
        self.traits.insert(decl.name.clone(), decl);
        Ok(())
    }

    /// Depth-first search with a visiting path and a visited set. `pending`
    /// is the trait being registered, not yet in the table.
    fn find_cycle<'a>(
        &'a self,
        name: &'a str,
        pending: &'a TraitDecl,
        path: &mut Vec<&'a str>,
        visited: &mut HashSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| *n == name) {
            let mut cycle: Vec<String> =
                path[pos..].iter().map(|n| n.to_string()).collect();
            cycle.push(name.to_string());
            return Some(cycle);
        }
        if !visited.insert(name) {
            return None;
        }

        let requires = if name == pending.name {
            Some(&pending.requires)
        } else {
            self.traits.get(name).map(|t| &t.requires)
        };

        path.push(name);
        for required in requires.into_iter().flatten() {
            if let Some(cycle) =
                self.find_cycle(&required.name, pending, path, visited)
            {
                return Some(cycle);
            }
        }
        path.pop();
        None
    }

    /// Register a class, computing its conformance closure and method table.
    /// On error nothing is inserted.
    pub fn register_class(&mut self, decl: ClassDecl) -> Result<ClassId> {
        if self.class_ids.contains_key(&decl.name) {
            return Err(RegistryError::DuplicateClass(decl.name));
        }
        let id = u16::try_from(self.classes.len())
            .map(ClassId)
            .map_err(|_| RegistryError::TooManyClasses)?;

        let class = self.build_class(id, decl)?;
        debug!(
            "registered class {} as %{} ({} conformance(s), {} method(s))",
            class.name(),
            id.0,
            class.closure.len(),
            class.table.len()
        );
        self.class_ids.insert(class.decl.name.clone(), id);
        self.classes.push(class);
        Ok(id)
    }

    fn build_class(&self, id: ClassId, decl: ClassDecl) -> Result<Class> {
        let fields = decl
            .fields
            .iter()
            .enumerate()
            .map(|(i, f)| u16::try_from(i).map(|slot| (f.clone(), slot)))
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| RegistryError::TooManyFields(decl.name.clone()))?;
        let closure = self.conformance_closure(&decl)?;
        let (table, signatures) = self.linearize(&decl, &closure)?;
        Ok(Class {
            id,
            decl,
            fields,
            closure,
            table,
            signatures,
        })
    }

    /// Recompute a class's method table from its stored declaration.
    /// Produces the same table as registration did.
    pub fn rebuild_method_table(&mut self, id: ClassId) -> Result<&MethodTable> {
        let class = self
            .classes
            .get(id.0 as usize)
            .ok_or_else(|| RegistryError::UnknownClass(format!("%{}", id.0)))?;
        let closure = self.conformance_closure(&class.decl)?;
        let (table, signatures) = self.linearize(&class.decl, &closure)?;
        debug!("rebuilt method table of {}", class.name());

        let class = &mut self.classes[id.0 as usize];
        class.closure = closure;
        class.table = table;
        class.signatures = signatures;
        Ok(&class.table)
    }

    // ── conformance closure ────────────────────────────────────────

    fn conformance_closure(&self, decl: &ClassDecl) -> Result<Vec<TraitRef>> {
        let mut self_env = Bindings::new();
        self_env.insert(SELF_PARAM.into(), TypeRef::named(&decl.name));

        let mut closure: Vec<TraitRef> = Vec::new();
        let mut work: Vec<(TraitRef, String)> = decl
            .conformances
            .iter()
            .rev()
            .map(|r| (r.substitute(&self_env), decl.name.clone()))
            .collect();

        while let Some((tref, referrer)) = work.pop() {
            if let Some(cycle) = self.poisoned.get(&tref.name) {
                return Err(RegistryError::CyclicConformance {
                    name: tref.name.clone(),
                    cycle: cycle.clone(),
                });
            }
            let Some(trait_decl) = self.traits.get(&tref.name) else {
                return Err(RegistryError::UnknownTrait {
                    name: tref.name.clone(),
                    referrer,
                });
            };
            check_arg_count(trait_decl, &tref, &referrer)?;

            if let Some(existing) = closure.iter().find(|c| c.name == tref.name) {
                if existing.args != tref.args {
                    return Err(RegistryError::ConflictingConformance {
                        class: decl.name.clone(),
                        first: existing.to_string(),
                        second: tref.to_string(),
                    });
                }
                continue;
            }

            let env = bindings(trait_decl, &tref.args, &decl.name);
            for required in trait_decl.requires.iter().rev() {
                work.push((required.substitute(&env), trait_decl.name.clone()));
            }
            closure.push(tref);
        }
        Ok(closure)
    }

    /// Whether trait `from` requires trait `to`, directly or through other
    /// traits.
    fn requires_transitively(&self, from: &str, to: &str) -> bool {
        let mut stack = vec![from];
        let mut seen = HashSet::new();
        while let Some(name) = stack.pop() {
            if !seen.insert(name) {
                continue;
            }
            let Some(decl) = self.traits.get(name) else {
                continue;
            };
            for required in &decl.requires {
                if required.name == to {
                    return true;
                }
                stack.push(&required.name);
            }
        }
        false
    }

    // ── linearization ──────────────────────────────────────────────

    fn key_for(&self, sig: &MethodSig) -> MethodKey {
        MethodKey {
            name: self.interner.intern(&sig.name),
            arity: sig.arity(),
        }
    }

    fn linearize(
        &self,
        decl: &ClassDecl,
        closure: &[TraitRef],
    ) -> Result<(MethodTable, HashMap<MethodKey, MethodSig>)> {
        let mut table = MethodTable::default();
        let mut signatures = HashMap::new();

        for method in &decl.methods {
            let key = self.key_for(&method.sig);
            if signatures.insert(key, method.sig.clone()).is_some() {
                return Err(RegistryError::DuplicateMethod {
                    owner: decl.name.clone(),
                    method: method.sig.name.clone(),
                    arity: key.arity,
                });
            }
            table.entries.insert(key, method.body);
        }

        // Trait-supplied methods grouped by key, in closure order.
        let mut order: Vec<MethodKey> = Vec::new();
        let mut inherited: HashMap<MethodKey, Vec<Candidate<'_>>> =
            HashMap::new();
        for tref in closure {
            let Some(trait_decl) = self.traits.get(&tref.name) else {
                continue;
            };
            let env = bindings(trait_decl, &tref.args, &decl.name);
            for method in &trait_decl.methods {
                let key = self.key_for(&method.sig);
                let candidates = inherited.entry(key).or_insert_with(|| {
                    order.push(key);
                    Vec::new()
                });
                candidates.push(Candidate {
                    trait_name: &trait_decl.name,
                    sig: method.sig.substitute(&env),
                    default: method.default,
                });
            }
        }

        for key in order {
            let candidates = &inherited[&key];
            let installed = match signatures.get(&key).cloned() {
                Some(own) => own,
                None => {
                    let (sig, body) = self.pick_default(decl, candidates)?;
                    table.entries.insert(key, body);
                    signatures.insert(key, sig.clone());
                    sig
                }
            };

            for candidate in candidates {
                if candidate.sig != installed {
                    return Err(RegistryError::SignatureMismatch {
                        class: decl.name.clone(),
                        trait_name: candidate.trait_name.to_string(),
                        expected: candidate.sig.to_string(),
                        found: installed.to_string(),
                    });
                }
            }
        }

        Ok((table, signatures))
    }

    /// Choose the default body for a method the class does not implement.
    /// A default is discarded when another candidate's trait requires its
    /// trait; more than one survivor is ambiguous.
    fn pick_default(
        &self,
        decl: &ClassDecl,
        candidates: &[Candidate<'_>],
    ) -> Result<(MethodSig, Callable)> {
        let with_default: Vec<(&Candidate<'_>, Callable)> = candidates
            .iter()
            .filter_map(|c| c.default.map(|body| (c, body)))
            .collect();
        let survivors: Vec<(&Candidate<'_>, Callable)> = with_default
            .iter()
            .filter(|(c, _)| {
                !with_default.iter().any(|(other, _)| {
                    other.trait_name != c.trait_name
                        && self.requires_transitively(
                            other.trait_name,
                            c.trait_name,
                        )
                })
            })
            .copied()
            .collect();

        match survivors.as_slice() {
            [] => {
                let first = candidates.first();
                Err(RegistryError::MissingMethod {
                    class: decl.name.clone(),
                    trait_name: first
                        .map(|c| c.trait_name.to_string())
                        .unwrap_or_default(),
                    method: first.map(|c| c.sig.name.clone()).unwrap_or_default(),
                })
            }
            [(first, body), rest @ ..]
                if rest.iter().all(|(_, other)| other == body) =>
            {
                Ok((first.sig.clone(), *body))
            }
            _ => Err(RegistryError::AmbiguousDefault {
                class: decl.name.clone(),
                method: survivors[0].0.sig.name.clone(),
                traits: survivors
                    .iter()
                    .map(|(c, _)| c.trait_name.to_string())
                    .collect(),
            }),
        }
    }

    // ── queries ────────────────────────────────────────────────────

    pub fn class(&self, id: ClassId) -> Option<&Class> {
        self.classes.get(id.0 as usize)
    }

    pub fn class_id(&self, name: &str) -> Option<ClassId> {
        self.class_ids.get(name).copied()
    }

    pub fn class_name(&self, id: ClassId) -> &str {
        self.class(id).map(Class::name).unwrap_or("<unknown>")
    }

    pub fn classes(&self) -> impl Iterator<Item = &Class> {
        self.classes.iter()
    }

    pub fn trait_decl(&self, name: &str) -> Option<&TraitDecl> {
        self.traits.get(name)
    }

    /// Look up the callable for `(name, arity)` on a class.
    pub fn resolve(
        &self,
        class: ClassId,
        name: Symbol,
        arity: usize,
    ) -> Option<Callable> {
        self.class(class)?.table.get(MethodKey { name, arity })
    }

    /// Like [`resolve`](Self::resolve) with a selector given as text.
    pub fn resolve_name(
        &self,
        class: ClassId,
        name: &str,
        arity: usize,
    ) -> Option<Callable> {
        self.resolve(class, self.interner.lookup(name)?, arity)
    }

    pub fn resolve_method(
        &self,
        class: ClassId,
        name: &str,
        arity: usize,
    ) -> Result<Callable> {
        self.resolve_name(class, name, arity).ok_or_else(|| {
            RegistryError::MethodNotFound {
                class: self.class_name(class).to_string(),
                method: name.to_string(),
                arity,
            }
        })
    }

    /// The signature installed for `(name, arity)`, own or inherited, with
    /// trait parameters bound.
    pub fn method_sig(
        &self,
        class: ClassId,
        name: &str,
        arity: usize,
    ) -> Option<&MethodSig> {
        let name = self.interner.lookup(name)?;
        self.class(class)?.signatures.get(&MethodKey { name, arity })
    }

    pub fn conforms_to(&self, class: ClassId, tref: &TraitRef) -> bool {
        self.class(class)
            .is_some_and(|c| c.closure.iter().any(|r| r == tref))
    }
}

fn check_arg_count(
    target: &TraitDecl,
    tref: &TraitRef,
    referrer: &str,
) -> Result<()> {
    if target.type_params.len() != tref.args.len() {
        return Err(RegistryError::TypeArgumentCount {
            name: target.name.clone(),
            referrer: referrer.to_string(),
            expected: target.type_params.len(),
            found: tref.args.len(),
        });
    }
    Ok(())
}

fn bindings(trait_decl: &TraitDecl, args: &[TypeRef], class: &str) -> Bindings {
    let mut env: Bindings = trait_decl
        .type_params
        .iter()
        .cloned()
        .zip(args.iter().cloned())
        .collect();
    env.insert(SELF_PARAM.into(), TypeRef::named(class));
    env
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::{MethodImpl, RoutineId, TraitMethod};

    fn body(n: u16) -> Callable {
        Callable::Routine(RoutineId(n))
    }

    fn sig(name: &str, ret: TypeRef) -> MethodSig {
        MethodSig::new(name, vec![], ret)
    }

    fn tr(name: &str) -> TraitRef {
        TraitRef::new(name, vec![])
    }

    fn trait_decl(
        name: &str,
        requires: Vec<TraitRef>,
        methods: Vec<TraitMethod>,
    ) -> TraitDecl {
        TraitDecl {
            name: name.into(),
            type_params: vec![],
            requires,
            methods,
        }
    }

    fn class(
        name: &str,
        conformances: Vec<TraitRef>,
        methods: Vec<MethodImpl>,
    ) -> ClassDecl {
        ClassDecl {
            name: name.into(),
            fields: vec![],
            conformances,
            methods,
        }
    }

    fn own(name: &str, ret: TypeRef, n: u16) -> MethodImpl {
        MethodImpl {
            sig: sig(name, ret),
            body: body(n),
        }
    }

    /// `Iterable[T]` requires `iter() -> Iterator[T]`,
    /// `Iterator[T]` requires `next() -> T?`.
    fn iteration_traits(reg: &mut Registry) {
        reg.register_trait(TraitDecl {
            name: "Iterator".into(),
            type_params: vec!["T".into()],
            requires: vec![],
            methods: vec![TraitMethod::required(sig(
                "next",
                TypeRef::optional(TypeRef::param("T")),
            ))],
        })
        .unwrap();
        reg.register_trait(TraitDecl {
            name: "Iterable".into(),
            type_params: vec!["T".into()],
            requires: vec![],
            methods: vec![TraitMethod::required(sig(
                "iter",
                TypeRef::generic("Iterator", vec![TypeRef::param("T")]),
            ))],
        })
        .unwrap();
    }

    #[test]
    fn mutual_requirement_is_a_cycle() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl("T1", vec![tr("T2")], vec![])).unwrap();
        let err = reg
            .register_trait(trait_decl("T2", vec![tr("T1")], vec![]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::CyclicConformance { ref name, .. } if name == "T2"));

        // No class referencing the cycle is accepted afterwards.
        let err = reg.register_class(class("C", vec![tr("T1")], vec![])).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicConformance { .. }));
        let err = reg.register_class(class("D", vec![tr("T2")], vec![])).unwrap_err();
        assert!(matches!(err, RegistryError::CyclicConformance { .. }));
        assert!(reg.class_id("C").is_none());
    }

    #[test]
    fn transitive_and_self_cycles() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl("A", vec![tr("B")], vec![])).unwrap();
        reg.register_trait(trait_decl("B", vec![tr("C")], vec![])).unwrap();
        match reg.register_trait(trait_decl("C", vec![tr("A")], vec![])) {
            Err(RegistryError::CyclicConformance { cycle, .. }) => {
                assert_eq!(cycle, vec!["C", "A", "B", "C"]);
            }
            other => panic!("expected a cycle, got {other:?}"),
        }

        let err = reg
            .register_trait(trait_decl("Selfish", vec![tr("Selfish")], vec![]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::CyclicConformance { .. }));
    }

    #[test]
    fn diamond_is_not_a_cycle() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl("Base", vec![], vec![])).unwrap();
        reg.register_trait(trait_decl("Left", vec![tr("Base")], vec![])).unwrap();
        reg.register_trait(trait_decl("Right", vec![tr("Base")], vec![])).unwrap();
        reg.register_trait(trait_decl("Both", vec![tr("Left"), tr("Right")], vec![]))
            .unwrap();
        let id = reg.register_class(class("C", vec![tr("Both")], vec![])).unwrap();
        let names: Vec<_> = reg
            .class(id)
            .unwrap()
            .conformances()
            .iter()
            .map(|r| r.name.as_str())
            .collect();
        assert_eq!(names, vec!["Both", "Left", "Base", "Right"]);
    }

    #[test]
    fn missing_required_method() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl(
            "Show",
            vec![],
            vec![TraitMethod::required(sig("show", TypeRef::Str))],
        ))
        .unwrap();
        let err = reg.register_class(class("Point", vec![tr("Show")], vec![])).unwrap_err();
        assert_eq!(err, RegistryError::MissingMethod {
            class: "Point".into(),
            trait_name: "Show".into(),
            method: "show".into(),
        });
    }

    #[test]
    fn unrelated_defaults_are_ambiguous() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl(
            "Loud",
            vec![],
            vec![TraitMethod::with_default(sig("greet", TypeRef::Str), body(1))],
        ))
        .unwrap();
        reg.register_trait(trait_decl(
            "Quiet",
            vec![],
            vec![TraitMethod::with_default(sig("greet", TypeRef::Str), body(2))],
        ))
        .unwrap();
        let err = reg
            .register_class(class("Dog", vec![tr("Loud"), tr("Quiet")], vec![]))
            .unwrap_err();
        assert!(matches!(err, RegistryError::AmbiguousDefault { ref traits, .. }
            if traits == &vec!["Loud".to_string(), "Quiet".to_string()]));

        // Overriding settles the ambiguity.
        let id = reg
            .register_class(class(
                "Cat",
                vec![tr("Loud"), tr("Quiet")],
                vec![own("greet", TypeRef::Str, 9)],
            ))
            .unwrap();
        assert_eq!(reg.resolve_name(id, "greet", 0), Some(body(9)));
    }

    #[test]
    fn override_precedence() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl(
            "Base",
            vec![],
            vec![
                TraitMethod::with_default(sig("a", TypeRef::Int), body(1)),
                TraitMethod::with_default(sig("b", TypeRef::Int), body(2)),
            ],
        ))
        .unwrap();
        reg.register_trait(trait_decl(
            "Derived",
            vec![tr("Base")],
            vec![TraitMethod::with_default(sig("a", TypeRef::Int), body(3))],
        ))
        .unwrap();

        let id = reg
            .register_class(class(
                "C",
                vec![tr("Derived")],
                vec![own("b", TypeRef::Int, 4)],
            ))
            .unwrap();
        // Most specific trait default beats the inherited one.
        assert_eq!(reg.resolve_name(id, "a", 0), Some(body(3)));
        // Own implementation beats every default.
        assert_eq!(reg.resolve_name(id, "b", 0), Some(body(4)));
        assert_eq!(reg.resolve_name(id, "a", 1), None);
    }

    #[test]
    fn generic_binding_checks_return_type() {
        let mut reg = Registry::new();
        iteration_traits(&mut reg);
        let iter_of = |t| TypeRef::generic("Iterator", vec![t]);

        let words = reg
            .register_class(class(
                "Words",
                vec![TraitRef::new("Iterable", vec![TypeRef::Str])],
                vec![own("iter", iter_of(TypeRef::Str), 1)],
            ))
            .unwrap();
        assert!(reg.conforms_to(words, &TraitRef::new("Iterable", vec![TypeRef::Str])));
        assert!(!reg.conforms_to(words, &TraitRef::new("Iterable", vec![TypeRef::Int])));

        let err = reg
            .register_class(class(
                "Liar",
                vec![TraitRef::new("Iterable", vec![TypeRef::Str])],
                vec![own("iter", iter_of(TypeRef::Int), 2)],
            ))
            .unwrap_err();
        assert_eq!(err, RegistryError::SignatureMismatch {
            class: "Liar".into(),
            trait_name: "Iterable".into(),
            expected: "iter() -> Iterator[Str]".into(),
            found: "iter() -> Iterator[Int]".into(),
        });
    }

    #[test]
    fn requirements_carry_type_arguments() {
        let mut reg = Registry::new();
        iteration_traits(&mut reg);
        reg.register_trait(TraitDecl {
            name: "Collection".into(),
            type_params: vec!["E".into()],
            requires: vec![TraitRef::new("Iterable", vec![TypeRef::param("E")])],
            methods: vec![],
        })
        .unwrap();
        let id = reg
            .register_class(class(
                "Bag",
                vec![TraitRef::new("Collection", vec![TypeRef::Int])],
                vec![own(
                    "iter",
                    TypeRef::generic("Iterator", vec![TypeRef::Int]),
                    1,
                )],
            ))
            .unwrap();
        assert!(reg.conforms_to(id, &TraitRef::new("Iterable", vec![TypeRef::Int])));
    }

    #[test]
    fn self_parameter_binds_to_the_class() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl(
            "Eq",
            vec![],
            vec![TraitMethod::required(MethodSig::new(
                "__eq__",
                vec![TypeRef::param(SELF_PARAM)],
                TypeRef::Bool,
            ))],
        ))
        .unwrap();
        let id = reg
            .register_class(class(
                "Point",
                vec![tr("Eq")],
                vec![MethodImpl {
                    sig: MethodSig::new("__eq__", vec![TypeRef::named("Point")], TypeRef::Bool),
                    body: body(5),
                }],
            ))
            .unwrap();
        assert_eq!(reg.resolve_method(id, "__eq__", 1), Ok(body(5)));
    }

    #[test]
    fn conformance_errors() {
        let mut reg = Registry::new();
        iteration_traits(&mut reg);

        let err = reg.register_class(class("A", vec![tr("Nope")], vec![])).unwrap_err();
        assert!(matches!(err, RegistryError::UnknownTrait { ref name, .. } if name == "Nope"));

        let err = reg.register_class(class("B", vec![tr("Iterable")], vec![])).unwrap_err();
        assert!(matches!(err, RegistryError::TypeArgumentCount { expected: 1, found: 0, .. }));

        reg.register_trait(TraitDecl {
            name: "Strs".into(),
            type_params: vec![],
            requires: vec![TraitRef::new("Iterable", vec![TypeRef::Str])],
            methods: vec![],
        })
        .unwrap();
        let err = reg
            .register_class(class(
                "C",
                vec![tr("Strs"), TraitRef::new("Iterable", vec![TypeRef::Int])],
                vec![],
            ))
            .unwrap_err();
        assert!(matches!(err, RegistryError::ConflictingConformance { .. }));
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut reg = Registry::new();
        reg.register_trait(trait_decl("T", vec![], vec![])).unwrap();
        assert_eq!(
            reg.register_trait(trait_decl("T", vec![], vec![])),
            Err(RegistryError::DuplicateTrait("T".into()))
        );
        let err = reg
            .register_class(class(
                "C",
                vec![],
                vec![own("m", TypeRef::Int, 1), own("m", TypeRef::Str, 2)],
            ))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateMethod { .. }));
        reg.register_class(class("C", vec![], vec![])).unwrap();
        assert_eq!(
            reg.register_class(class("C", vec![], vec![])),
            Err(RegistryError::DuplicateClass("C".into()))
        );
    }

    #[test]
    fn failed_registration_leaves_registry_unchanged() {
        let mut reg = Registry::new();
        assert!(reg.register_class(class("Bad", vec![tr("Missing")], vec![])).is_err());
        assert!(reg.class_id("Bad").is_none());
        let id = reg.register_class(class("Good", vec![], vec![])).unwrap();
        assert_eq!(id, ClassId(0));
        assert_eq!(reg.classes().count(), 1);
    }

    #[test]
    fn rebuild_is_idempotent() {
        let mut reg = Registry::new();
        iteration_traits(&mut reg);
        reg.register_trait(trait_decl(
            "Named",
            vec![],
            vec![TraitMethod::with_default(sig("name", TypeRef::Str), body(7))],
        ))
        .unwrap();
        let id = reg
            .register_class(class(
                "Words",
                vec![TraitRef::new("Iterable", vec![TypeRef::Str]), tr("Named")],
                vec![own("iter", TypeRef::generic("Iterator", vec![TypeRef::Str]), 1)],
            ))
            .unwrap();
        let before = reg.class(id).unwrap().method_table().clone();
        let after = reg.rebuild_method_table(id).unwrap().clone();
        assert_eq!(before, after);
        assert_eq!(after.len(), 2);
        assert_eq!(reg.rebuild_method_table(id).unwrap(), &before);
    }

    #[test]
    fn resolve_miss_names_the_class() {
        let mut reg = Registry::new();
        let id = reg.register_class(class("Empty", vec![], vec![])).unwrap();
        assert_eq!(
            reg.resolve_method(id, "frob", 2),
            Err(RegistryError::MethodNotFound {
                class: "Empty".into(),
                method: "frob".into(),
                arity: 2,
            })
        );
    }

    #[test]
    fn method_sig_reports_bound_types() {
        let mut reg = Registry::new();
        iteration_traits(&mut reg);
        reg.register_trait(TraitDecl {
            name: "Counted".into(),
            type_params: vec!["T".into()],
            requires: vec![],
            methods: vec![TraitMethod::with_default(
                sig("first", TypeRef::optional(TypeRef::param("T"))),
                body(3),
            )],
        })
        .unwrap();
        let id = reg
            .register_class(class(
                "Nums",
                vec![TraitRef::new("Counted", vec![TypeRef::Int])],
                vec![],
            ))
            .unwrap();
        assert_eq!(
            reg.method_sig(id, "first", 0).map(|s| s.ret.clone()),
            Some(TypeRef::optional(TypeRef::Int))
        );
    }

    #[test]
    fn registries_can_share_selectors() {
        let interner = Interner::new();
        let mut reg = Registry::with_interner(interner.clone());
        let id = reg
            .register_class(class("Bell", vec![], vec![own("ring", TypeRef::Str, 0)]))
            .unwrap();
        let ring = interner.lookup("ring").unwrap();
        assert_eq!(reg.interner().resolve(ring).as_deref(), Some("ring"));
        assert_eq!(reg.resolve_name(id, "ring", 0), Some(body(0)));
    }

    #[test]
    fn field_slots_must_fit_an_operand() {
        let mut reg = Registry::new();
        let mut wide = class("Wide", vec![], vec![]);
        wide.fields = (0..=u16::MAX as usize + 1).map(|i| format!("f{i}")).collect();
        assert_eq!(
            reg.register_class(wide),
            Err(RegistryError::TooManyFields("Wide".into()))
        );
        assert!(reg.class_id("Wide").is_none());

        let mut full = class("Full", vec![], vec![]);
        full.fields = (0..=u16::MAX as usize).map(|i| format!("f{i}")).collect();
        let id = reg.register_class(full).unwrap();
        assert_eq!(reg.class(id).and_then(|c| c.field_slot("f65535")), Some(u16::MAX));
    }
}
