//! Resolved input tree consumed by the emitter.
//!
//! The front end that produces it is out of scope: names are already
//! resolved to locals, classes and call targets, and optional type
//! annotations are trusted.

use bytecode::Span;
use object::{MethodSig, TraitRef, TypeRef};

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Bool(bool),
    Str(String),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    ToStr,
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// How a call's target was resolved by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallTarget {
    /// A free function, called without a receiver.
    Function,
    /// A method on a receiver whose class is statically known.
    Static(String),
    /// A method looked up on the receiver's runtime class.
    Dynamic,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Local(String),
    SelfRef,
    /// Collection literal.
    Sequence(Vec<Expr>),
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        closed: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Slice {
        target: Box<Expr>,
        start: Box<Expr>,
        end: Box<Expr>,
        closed: bool,
    },
    /// `needle in haystack`.
    Contains {
        needle: Box<Expr>,
        haystack: Box<Expr>,
    },
    Call {
        receiver: Option<Box<Expr>>,
        method: String,
        args: Vec<Expr>,
        target: CallTarget,
    },
    Construct {
        class: String,
        args: Vec<Expr>,
    },
    Field {
        target: Box<Expr>,
        class: String,
        name: String,
    },
    Some(Box<Expr>),
    Len(Box<Expr>),
}

// Shorthands used by the demo programs and tests.
impl Expr {
    pub fn int(v: i64) -> Self {
        Expr::Literal(Literal::Int(v))
    }

    pub fn boolean(v: bool) -> Self {
        Expr::Literal(Literal::Bool(v))
    }

    pub fn str(s: &str) -> Self {
        Expr::Literal(Literal::Str(s.to_string()))
    }

    pub fn none() -> Self {
        Expr::Literal(Literal::None)
    }

    pub fn local(name: &str) -> Self {
        Expr::Local(name.to_string())
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary {
            op,
            operand: Box::new(operand),
        }
    }

    pub fn range(start: Expr, end: Expr, closed: bool) -> Self {
        Expr::Range {
            start: Box::new(start),
            end: Box::new(end),
            closed,
        }
    }

    pub fn index(target: Expr, index: Expr) -> Self {
        Expr::Index {
            target: Box::new(target),
            index: Box::new(index),
        }
    }

    pub fn contains(needle: Expr, haystack: Expr) -> Self {
        Expr::Contains {
            needle: Box::new(needle),
            haystack: Box::new(haystack),
        }
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            receiver: None,
            method: name.to_string(),
            args,
            target: CallTarget::Function,
        }
    }

    pub fn invoke(receiver: Expr, method: &str, args: Vec<Expr>) -> Self {
        Expr::Call {
            receiver: Some(Box::new(receiver)),
            method: method.to_string(),
            args,
            target: CallTarget::Dynamic,
        }
    }

    pub fn call_static(
        receiver: Expr,
        class: &str,
        method: &str,
        args: Vec<Expr>,
    ) -> Self {
        Expr::Call {
            receiver: Some(Box::new(receiver)),
            method: method.to_string(),
            args,
            target: CallTarget::Static(class.to_string()),
        }
    }

    pub fn construct(class: &str, args: Vec<Expr>) -> Self {
        Expr::Construct {
            class: class.to_string(),
            args,
        }
    }

    pub fn field(target: Expr, class: &str, name: &str) -> Self {
        Expr::Field {
            target: Box::new(target),
            class: class.to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Let {
        name: String,
        ty: Option<TypeRef>,
        value: Expr,
    },
    Assign {
        name: String,
        value: Expr,
    },
    SetField {
        target: Expr,
        class: String,
        name: String,
        value: Expr,
    },
    SetIndex {
        target: Expr,
        index: Expr,
        value: Expr,
    },
    Expr(Expr),
    If {
        cond: Expr,
        then: Vec<Stmt>,
        otherwise: Vec<Stmt>,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
    },
    For {
        var: String,
        iterable: Expr,
        body: Vec<Stmt>,
    },
    Return(Option<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub span: Span,
}

impl Stmt {
    pub fn new(kind: StmtKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// A function, a class method, or (without a body owner) the entry block.
/// Methods take the receiver implicitly; `params` lists the explicit ones.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDecl {
    pub name: String,
    pub params: Vec<(String, TypeRef)>,
    pub ret: TypeRef,
    pub body: Vec<Stmt>,
}

impl MethodDecl {
    pub fn sig(&self) -> MethodSig {
        MethodSig::new(
            self.name.clone(),
            self.params.iter().map(|(_, ty)| ty.clone()).collect(),
            self.ret.clone(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub fields: Vec<String>,
    pub conformances: Vec<TraitRef>,
    pub methods: Vec<MethodDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitMethodDecl {
    pub sig: MethodSig,
    /// Parameter names for the default body, in signature order.
    pub param_names: Vec<String>,
    pub default: Option<Vec<Stmt>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: String,
    pub type_params: Vec<String>,
    pub requires: Vec<TraitRef>,
    pub methods: Vec<TraitMethodDecl>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub traits: Vec<TraitDecl>,
    pub classes: Vec<ClassDecl>,
    pub functions: Vec<MethodDecl>,
    pub entry: Vec<Stmt>,
}
