use thiserror::Error;

/// Load-time failures raised while registering traits and classes, plus the
/// static resolution miss reported by [`Registry::resolve_method`].
///
/// [`Registry::resolve_method`]: crate::Registry::resolve_method
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("trait `{name}` forms a requirement cycle: {}", .cycle.join(" -> "))]
    CyclicConformance { name: String, cycle: Vec<String> },

    #[error(
        "class `{class}` does not implement `{method}` required by trait `{trait_name}`"
    )]
    MissingMethod {
        class: String,
        trait_name: String,
        method: String,
    },

    #[error(
        "class `{class}` inherits conflicting defaults for `{method}` from {}",
        .traits.join(", ")
    )]
    AmbiguousDefault {
        class: String,
        method: String,
        traits: Vec<String>,
    },

    #[error("unknown trait `{name}` referenced by `{referrer}`")]
    UnknownTrait { name: String, referrer: String },

    #[error("trait `{0}` is already registered")]
    DuplicateTrait(String),

    #[error("class `{0}` is already registered")]
    DuplicateClass(String),

    #[error("unknown class `{0}`")]
    UnknownClass(String),

    #[error("class table is full")]
    TooManyClasses,

    #[error("class `{0}` has more fields than a slot index can address")]
    TooManyFields(String),

    #[error("`{owner}` declares `{method}` with {arity} parameter(s) twice")]
    DuplicateMethod {
        owner: String,
        method: String,
        arity: usize,
    },

    #[error(
        "trait `{name}` expects {expected} type argument(s), `{referrer}` gives {found}"
    )]
    TypeArgumentCount {
        name: String,
        referrer: String,
        expected: usize,
        found: usize,
    },

    #[error(
        "class `{class}` implements `{found}` but trait `{trait_name}` requires `{expected}`"
    )]
    SignatureMismatch {
        class: String,
        trait_name: String,
        expected: String,
        found: String,
    },

    #[error("class `{class}` conforms to both `{first}` and `{second}`")]
    ConflictingConformance {
        class: String,
        first: String,
        second: String,
    },

    #[error("class `{class}` has no method `{method}` taking {arity} argument(s)")]
    MethodNotFound {
        class: String,
        method: String,
        arity: usize,
    },
}

pub type Result<T> = std::result::Result<T, RegistryError>;
