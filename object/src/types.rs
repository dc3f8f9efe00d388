use core::fmt;
use std::collections::HashMap;

/// A declared type as written in signatures and annotations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Int,
    Bool,
    Str,
    /// No static information.
    Any,
    Sequence(Box<TypeRef>),
    Optional(Box<TypeRef>),
    /// A class or trait, possibly applied to type arguments.
    Named { name: String, args: Vec<TypeRef> },
    /// A trait type parameter. `Self` names the conforming class.
    Param(String),
}

pub const SELF_PARAM: &str = "Self";

/// Type parameter bindings used while walking conformances.
pub type Bindings = HashMap<String, TypeRef>;

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        TypeRef::Named {
            name: name.into(),
            args: Vec::new(),
        }
    }

    pub fn generic(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        TypeRef::Named {
            name: name.into(),
            args,
        }
    }

    pub fn param(name: impl Into<String>) -> Self {
        TypeRef::Param(name.into())
    }

    pub fn sequence(of: TypeRef) -> Self {
        TypeRef::Sequence(Box::new(of))
    }

    pub fn optional(of: TypeRef) -> Self {
        TypeRef::Optional(Box::new(of))
    }

    /// Replace bound parameters. Unbound parameters are left in place.
    pub fn substitute(&self, env: &Bindings) -> TypeRef {
        match self {
            TypeRef::Param(name) => {
                env.get(name).cloned().unwrap_or_else(|| self.clone())
            }
            TypeRef::Sequence(inner) => {
                TypeRef::Sequence(Box::new(inner.substitute(env)))
            }
            TypeRef::Optional(inner) => {
                TypeRef::Optional(Box::new(inner.substitute(env)))
            }
            TypeRef::Named { name, args } => TypeRef::Named {
                name: name.clone(),
                args: args.iter().map(|a| a.substitute(env)).collect(),
            },
            TypeRef::Int | TypeRef::Bool | TypeRef::Str | TypeRef::Any => {
                self.clone()
            }
        }
    }
}

fn write_args(f: &mut fmt::Formatter<'_>, args: &[TypeRef]) -> fmt::Result {
    if args.is_empty() {
        return Ok(());
    }
    f.write_str("[")?;
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str("]")
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeRef::Int => f.write_str("Int"),
            TypeRef::Bool => f.write_str("Bool"),
            TypeRef::Str => f.write_str("Str"),
            TypeRef::Any => f.write_str("Any"),
            TypeRef::Sequence(inner) => write!(f, "[{inner}]"),
            TypeRef::Optional(inner) => write!(f, "{inner}?"),
            TypeRef::Named { name, args } => {
                f.write_str(name)?;
                write_args(f, args)
            }
            TypeRef::Param(name) => f.write_str(name),
        }
    }
}

/// A reference to a trait applied to type arguments, e.g. `Iterable[Str]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TraitRef {
    pub name: String,
    pub args: Vec<TypeRef>,
}

impl TraitRef {
    pub fn new(name: impl Into<String>, args: Vec<TypeRef>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    pub fn substitute(&self, env: &Bindings) -> TraitRef {
        TraitRef {
            name: self.name.clone(),
            args: self.args.iter().map(|a| a.substitute(env)).collect(),
        }
    }
}

impl fmt::Display for TraitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        write_args(f, &self.args)
    }
}

/// A method signature. The receiver is implicit and not counted in `params`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    pub name: String,
    pub params: Vec<TypeRef>,
    pub ret: TypeRef,
}

impl MethodSig {
    pub fn new(
        name: impl Into<String>,
        params: Vec<TypeRef>,
        ret: TypeRef,
    ) -> Self {
        Self {
            name: name.into(),
            params,
            ret,
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn substitute(&self, env: &Bindings) -> MethodSig {
        MethodSig {
            name: self.name.clone(),
            params: self.params.iter().map(|p| p.substitute(env)).collect(),
            ret: self.ret.substitute(env),
        }
    }
}

impl fmt::Display for MethodSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{p}")?;
        }
        write!(f, ") -> {}", self.ret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitution_reaches_nested_arguments() {
        let mut env = Bindings::new();
        env.insert("T".into(), TypeRef::Str);
        env.insert(SELF_PARAM.into(), TypeRef::named("Words"));

        let sig = MethodSig::new(
            "zip",
            vec![TypeRef::param(SELF_PARAM)],
            TypeRef::generic(
                "Iterator",
                vec![TypeRef::optional(TypeRef::sequence(TypeRef::param("T")))],
            ),
        );
        let bound = sig.substitute(&env);
        assert_eq!(bound.params, vec![TypeRef::named("Words")]);
        assert_eq!(bound.ret.to_string(), "Iterator[[Str]?]");
    }

    #[test]
    fn unbound_parameters_survive() {
        let t = TypeRef::param("U");
        assert_eq!(t.substitute(&Bindings::new()), t);
    }

    #[test]
    fn trait_ref_display() {
        let r = TraitRef::new("Iterable", vec![TypeRef::Int]);
        assert_eq!(r.to_string(), "Iterable[Int]");
        assert_eq!(TraitRef::new("Show", vec![]).to_string(), "Show");
    }
}
