//! Bundled demo programs, built directly as resolved trees.
//!
//! Each demo keeps the source it stands for so statement spans point at
//! real lines when a fault trace is printed.

use bytecode::Span;
use object::{MethodSig, TraitRef, TypeRef};

use crate::ast::{
    BinaryOp, ClassDecl, Expr, MethodDecl, Module, Stmt, StmtKind, TraitDecl,
    TraitMethodDecl, UnaryOp,
};

pub struct Demo {
    pub name: &'static str,
    pub about: &'static str,
    pub source: &'static str,
    build: fn(&Lines) -> Module,
}

impl Demo {
    pub fn module(&self) -> Module {
        (self.build)(&Lines(self.source))
    }
}

impl core::fmt::Debug for Demo {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Demo").field("name", &self.name).finish()
    }
}

pub static DEMOS: [Demo; 6] = [
    Demo {
        name: "arith",
        about: "integer arithmetic with immediate operands",
        source: ARITH,
        build: arith,
    },
    Demo {
        name: "sequence",
        about: "indexing, slicing, membership and append",
        source: SEQUENCE,
        build: sequence,
    },
    Demo {
        name: "iterable",
        about: "for loops over a user iterable, a string and a range",
        source: ITERABLE,
        build: iterable,
    },
    Demo {
        name: "traits",
        about: "default methods, specificity and generic conformance",
        source: TRAITS,
        build: traits,
    },
    Demo {
        name: "hooks",
        about: "__eq__, __str__, __hash__, contains and __getitem__",
        source: HOOKS,
        build: hooks,
    },
    Demo {
        name: "fault",
        about: "an index fault with its frame trace",
        source: FAULT,
        build: fault,
    },
];

pub fn demo(name: &str) -> Option<&'static Demo> {
    DEMOS.iter().find(|d| d.name == name)
}

/// Statement spans by 1-based line of a demo source.
struct Lines(&'static str);

impl Lines {
    fn span(&self, line: usize) -> Span {
        let mut start = 0;
        for (i, text) in self.0.split('\n').enumerate() {
            if i + 1 == line {
                return Span::new(start as u32, (start + text.len()) as u32);
            }
            start += text.len() + 1;
        }
        Span::default()
    }

    fn at(&self, line: usize, kind: StmtKind) -> Stmt {
        Stmt::new(kind, self.span(line))
    }

    fn let_(&self, line: usize, name: &str, value: Expr) -> Stmt {
        self.at(
            line,
            StmtKind::Let {
                name: name.into(),
                ty: None,
                value,
            },
        )
    }

    fn assign(&self, line: usize, name: &str, value: Expr) -> Stmt {
        self.at(
            line,
            StmtKind::Assign {
                name: name.into(),
                value,
            },
        )
    }

    fn set_field(&self, line: usize, class: &str, name: &str, value: Expr) -> Stmt {
        self.at(
            line,
            StmtKind::SetField {
                target: Expr::SelfRef,
                class: class.into(),
                name: name.into(),
                value,
            },
        )
    }

    fn expr(&self, line: usize, expr: Expr) -> Stmt {
        self.at(line, StmtKind::Expr(expr))
    }

    fn ret(&self, line: usize, value: Expr) -> Stmt {
        self.at(line, StmtKind::Return(Some(value)))
    }

    fn for_(&self, line: usize, var: &str, iterable: Expr, body: Vec<Stmt>) -> Stmt {
        self.at(
            line,
            StmtKind::For {
                var: var.into(),
                iterable,
                body,
            },
        )
    }
}

fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::binary(op, lhs, rhs)
}

fn self_field(class: &str, name: &str) -> Expr {
    Expr::field(Expr::SelfRef, class, name)
}

fn to_str(expr: Expr) -> Expr {
    Expr::unary(UnaryOp::ToStr, expr)
}

fn method(name: &str, params: &[(&str, TypeRef)], ret: TypeRef, body: Vec<Stmt>) -> MethodDecl {
    MethodDecl {
        name: name.into(),
        params: params
            .iter()
            .map(|(n, ty)| (n.to_string(), ty.clone()))
            .collect(),
        ret,
        body,
    }
}

fn class(name: &str, fields: &[&str], conformances: Vec<TraitRef>, methods: Vec<MethodDecl>) -> ClassDecl {
    ClassDecl {
        name: name.into(),
        fields: fields.iter().map(|f| f.to_string()).collect(),
        conformances,
        methods,
    }
}

const ARITH: &str = "\
let a = 1
let b = a + 2
let c = b * 10 - 4
return [a, b, c, c / 3, c % 3, -c, 1 << 4, c & 7]";

fn arith(src: &Lines) -> Module {
    let c = || Expr::local("c");
    Module {
        entry: vec![
            src.let_(1, "a", Expr::int(1)),
            src.let_(2, "b", bin(BinaryOp::Add, Expr::local("a"), Expr::int(2))),
            src.let_(
                3,
                "c",
                bin(
                    BinaryOp::Sub,
                    bin(BinaryOp::Mul, Expr::local("b"), Expr::int(10)),
                    Expr::int(4),
                ),
            ),
            src.ret(
                4,
                Expr::Sequence(vec![
                    Expr::local("a"),
                    Expr::local("b"),
                    c(),
                    bin(BinaryOp::Div, c(), Expr::int(3)),
                    bin(BinaryOp::Mod, c(), Expr::int(3)),
                    Expr::unary(UnaryOp::Neg, c()),
                    bin(BinaryOp::Shl, Expr::int(1), Expr::int(4)),
                    bin(BinaryOp::BitAnd, c(), Expr::int(7)),
                ]),
            ),
        ],
        ..Module::default()
    }
}

const SEQUENCE: &str = "\
let arr = [1, 2, 3]
arr.append(4)
let total = 0
for x in arr { total = total + x }
return [arr[2], arr[1...3], arr[1..<3], 3 in arr, len(arr), total, \"n=\" + str(total)]";

fn sequence(src: &Lines) -> Module {
    let arr = || Expr::local("arr");
    let total = || Expr::local("total");
    Module {
        entry: vec![
            src.let_(1, "arr", Expr::Sequence(vec![Expr::int(1), Expr::int(2), Expr::int(3)])),
            src.expr(2, Expr::invoke(arr(), "append", vec![Expr::int(4)])),
            src.let_(3, "total", Expr::int(0)),
            src.for_(
                4,
                "x",
                arr(),
                vec![src.assign(4, "total", bin(BinaryOp::Add, total(), Expr::local("x")))],
            ),
            src.ret(
                5,
                Expr::Sequence(vec![
                    Expr::index(arr(), Expr::int(2)),
                    Expr::index(arr(), Expr::range(Expr::int(1), Expr::int(3), true)),
                    Expr::index(arr(), Expr::range(Expr::int(1), Expr::int(3), false)),
                    Expr::contains(Expr::int(3), arr()),
                    Expr::Len(Box::new(arr())),
                    total(),
                    bin(BinaryOp::Add, Expr::str("n="), to_str(total())),
                ]),
            ),
        ],
        ..Module::default()
    }
}

const ITERABLE: &str = "\
class Countdown: Iterable[Int] { from; fn iter() -> Iterator[Int] { return CountdownIter(self.from) } }
class CountdownIter: Iterator[Int] {
  n
  fn next() -> Int? {
    if self.n <= 0 { return None }
    let v = self.n
    self.n = self.n - 1
    return Some(v)
  }
}
let out = []
for i in Countdown(3) { out.append(i) }
for ch in \"hey\" { out.append(ch) }
for k in 0..<2 { out.append(k * 10) }
return out";

fn iterable(src: &Lines) -> Module {
    let int_iterator = TypeRef::generic("Iterator", vec![TypeRef::Int]);
    let countdown = class(
        "Countdown",
        &["from"],
        vec![TraitRef::new("Iterable", vec![TypeRef::Int])],
        vec![method(
            "iter",
            &[],
            int_iterator,
            vec![src.ret(
                1,
                Expr::construct("CountdownIter", vec![self_field("Countdown", "from")]),
            )],
        )],
    );
    let n = || self_field("CountdownIter", "n");
    let next = method(
        "next",
        &[],
        TypeRef::optional(TypeRef::Int),
        vec![
            src.at(
                5,
                StmtKind::If {
                    cond: bin(BinaryOp::Le, n(), Expr::int(0)),
                    then: vec![src.at(5, StmtKind::Return(None))],
                    otherwise: Vec::new(),
                },
            ),
            src.let_(6, "v", n()),
            src.set_field(7, "CountdownIter", "n", bin(BinaryOp::Sub, n(), Expr::int(1))),
            src.ret(8, Expr::Some(Box::new(Expr::local("v")))),
        ],
    );
    let iter = class(
        "CountdownIter",
        &["n"],
        vec![TraitRef::new("Iterator", vec![TypeRef::Int])],
        vec![next],
    );

    let out = || Expr::local("out");
    let append = |line, value| src.expr(line, Expr::invoke(out(), "append", vec![value]));
    Module {
        classes: vec![countdown, iter],
        entry: vec![
            src.let_(11, "out", Expr::Sequence(Vec::new())),
            src.for_(
                12,
                "i",
                Expr::construct("Countdown", vec![Expr::int(3)]),
                vec![append(12, Expr::local("i"))],
            ),
            src.for_(13, "ch", Expr::str("hey"), vec![append(13, Expr::local("ch"))]),
            src.for_(
                14,
                "k",
                Expr::range(Expr::int(0), Expr::int(2), false),
                vec![append(14, bin(BinaryOp::Mul, Expr::local("k"), Expr::int(10)))],
            ),
            src.ret(15, out()),
        ],
        ..Module::default()
    }
}

const TRAITS: &str = "\
trait Describe { fn name() -> Str; fn describe() -> Str { return \"I am \" + self.name() } }
trait Loud: Describe { fn describe() -> Str { return self.name() + \"!\" } }
trait Container[T] { fn first() -> T? }
class Cat: Describe { fn name() -> Str { return \"cat\" } }
class Dog: Loud { fn name() -> Str { return \"dog\" } }
class Crate: Container[Int] { item; fn first() -> Int? { return Some(self.item) } }
return [Cat().describe(), Dog().describe(), Crate(7).first()]";

fn traits(src: &Lines) -> Module {
    let describe_sig = MethodSig::new("describe", Vec::new(), TypeRef::Str);
    let name_of_self = || Expr::invoke(Expr::SelfRef, "name", Vec::new());
    let describe = TraitDecl {
        name: "Describe".into(),
        type_params: Vec::new(),
        requires: Vec::new(),
        methods: vec![
            TraitMethodDecl {
                sig: MethodSig::new("name", Vec::new(), TypeRef::Str),
                param_names: Vec::new(),
                default: None,
            },
            TraitMethodDecl {
                sig: describe_sig.clone(),
                param_names: Vec::new(),
                default: Some(vec![src.ret(
                    1,
                    bin(BinaryOp::Add, Expr::str("I am "), name_of_self()),
                )]),
            },
        ],
    };
    let loud = TraitDecl {
        name: "Loud".into(),
        type_params: Vec::new(),
        requires: vec![TraitRef::new("Describe", Vec::new())],
        methods: vec![TraitMethodDecl {
            sig: describe_sig,
            param_names: Vec::new(),
            default: Some(vec![src.ret(
                2,
                bin(BinaryOp::Add, name_of_self(), Expr::str("!")),
            )]),
        }],
    };
    let container = TraitDecl {
        name: "Container".into(),
        type_params: vec!["T".into()],
        requires: Vec::new(),
        methods: vec![TraitMethodDecl {
            sig: MethodSig::new(
                "first",
                Vec::new(),
                TypeRef::optional(TypeRef::param("T")),
            ),
            param_names: Vec::new(),
            default: None,
        }],
    };

    let named = |line, class_name: &str, trait_name: &str, text: &str| {
        class(
            class_name,
            &[],
            vec![TraitRef::new(trait_name, Vec::new())],
            vec![method("name", &[], TypeRef::Str, vec![src.ret(line, Expr::str(text))])],
        )
    };
    let crate_class = class(
        "Crate",
        &["item"],
        vec![TraitRef::new("Container", vec![TypeRef::Int])],
        vec![method(
            "first",
            &[],
            TypeRef::optional(TypeRef::Int),
            vec![src.ret(6, Expr::Some(Box::new(self_field("Crate", "item"))))],
        )],
    );

    let describe_new = |class_name: &str| {
        Expr::invoke(Expr::construct(class_name, Vec::new()), "describe", Vec::new())
    };
    Module {
        traits: vec![describe, loud, container],
        classes: vec![
            named(4, "Cat", "Describe", "cat"),
            named(5, "Dog", "Loud", "dog"),
            crate_class,
        ],
        entry: vec![src.ret(
            7,
            Expr::Sequence(vec![
                describe_new("Cat"),
                describe_new("Dog"),
                Expr::invoke(
                    Expr::construct("Crate", vec![Expr::int(7)]),
                    "first",
                    Vec::new(),
                ),
            ]),
        )],
        ..Module::default()
    }
}

const HOOKS: &str = "\
class Point {
  x; y
  fn __init__(x: Int, y: Int) { self.x = x; self.y = y }
  fn __eq__(other: Any) -> Bool { return self.x == other.x and self.y == other.y }
  fn __str__() -> Str { return \"(\" + str(self.x) + \", \" + str(self.y) + \")\" }
  fn __hash__() -> Int { return self.x * 31 + self.y }
}
class Bag { items; fn contains(x: Any) -> Bool { return x in self.items }; fn len() -> Int { return len(self.items) }; fn __getitem__(i: Int) -> Any { return self.items[i] } }
let p = Point(1, 2)
let bag = Bag([Point(1, 2), Point(3, 4)])
return [Point(1, 2) in [p], p == Point(1, 2), str(p), hash(p) == hash(Point(1, 2)), Point(3, 4) in bag, len(bag), str(bag[1]), str(0..<3)]";

fn hooks(src: &Lines) -> Module {
    let x = || self_field("Point", "x");
    let y = || self_field("Point", "y");
    let other = |name| Expr::field(Expr::local("other"), "Point", name);
    let point_class = class(
        "Point",
        &["x", "y"],
        Vec::new(),
        vec![
            method(
                "__init__",
                &[("x", TypeRef::Int), ("y", TypeRef::Int)],
                TypeRef::Any,
                vec![
                    src.set_field(3, "Point", "x", Expr::local("x")),
                    src.set_field(3, "Point", "y", Expr::local("y")),
                ],
            ),
            method(
                "__eq__",
                &[("other", TypeRef::Any)],
                TypeRef::Bool,
                vec![src.ret(
                    4,
                    bin(
                        BinaryOp::And,
                        bin(BinaryOp::Eq, x(), other("x")),
                        bin(BinaryOp::Eq, y(), other("y")),
                    ),
                )],
            ),
            method(
                "__str__",
                &[],
                TypeRef::Str,
                vec![src.ret(
                    5,
                    bin(
                        BinaryOp::Add,
                        bin(
                            BinaryOp::Add,
                            bin(
                                BinaryOp::Add,
                                bin(BinaryOp::Add, Expr::str("("), to_str(x())),
                                Expr::str(", "),
                            ),
                            to_str(y()),
                        ),
                        Expr::str(")"),
                    ),
                )],
            ),
            method(
                "__hash__",
                &[],
                TypeRef::Int,
                vec![src.ret(
                    6,
                    bin(BinaryOp::Add, bin(BinaryOp::Mul, x(), Expr::int(31)), y()),
                )],
            ),
        ],
    );

    let items = || self_field("Bag", "items");
    let bag_class = class(
        "Bag",
        &["items"],
        Vec::new(),
        vec![
            method(
                "contains",
                &[("x", TypeRef::Any)],
                TypeRef::Bool,
                vec![src.ret(8, Expr::contains(Expr::local("x"), items()))],
            ),
            method("len", &[], TypeRef::Int, vec![src.ret(8, Expr::Len(Box::new(items())))]),
            method(
                "__getitem__",
                &[("i", TypeRef::Int)],
                TypeRef::Any,
                vec![src.ret(8, Expr::index(items(), Expr::local("i")))],
            ),
        ],
    );

    let point = |a, b| Expr::construct("Point", vec![Expr::int(a), Expr::int(b)]);
    let p = || Expr::local("p");
    let bag = || Expr::local("bag");
    Module {
        classes: vec![point_class, bag_class],
        entry: vec![
            src.let_(9, "p", point(1, 2)),
            src.let_(
                10,
                "bag",
                Expr::construct("Bag", vec![Expr::Sequence(vec![point(1, 2), point(3, 4)])]),
            ),
            src.ret(
                11,
                Expr::Sequence(vec![
                    Expr::contains(point(1, 2), Expr::Sequence(vec![p()])),
                    bin(BinaryOp::Eq, p(), point(1, 2)),
                    to_str(p()),
                    bin(
                        BinaryOp::Eq,
                        Expr::unary(UnaryOp::Hash, p()),
                        Expr::unary(UnaryOp::Hash, point(1, 2)),
                    ),
                    Expr::contains(point(3, 4), bag()),
                    Expr::Len(Box::new(bag())),
                    to_str(Expr::index(bag(), Expr::int(1))),
                    to_str(Expr::range(Expr::int(0), Expr::int(3), false)),
                ]),
            ),
        ],
        ..Module::default()
    }
}

const FAULT: &str = "\
fn pick(xs: [Int], i: Int) -> Int {
  return xs[i]
}
let xs = [1, 2, 3]
return pick(xs, 5)";

fn fault(src: &Lines) -> Module {
    Module {
        functions: vec![method(
            "pick",
            &[("xs", TypeRef::sequence(TypeRef::Int)), ("i", TypeRef::Int)],
            TypeRef::Int,
            vec![src.ret(2, Expr::index(Expr::local("xs"), Expr::local("i")))],
        )],
        entry: vec![
            src.let_(4, "xs", Expr::Sequence(vec![Expr::int(1), Expr::int(2), Expr::int(3)])),
            src.ret(5, Expr::call("pick", vec![Expr::local("xs"), Expr::int(5)])),
        ],
        ..Module::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_unique() {
        for (i, a) in DEMOS.iter().enumerate() {
            assert!(DEMOS[i + 1..].iter().all(|b| b.name != a.name));
        }
        assert!(demo("hooks").is_some());
        assert!(demo("nope").is_none());
    }

    #[test]
    fn spans_follow_source_lines() {
        let lines = Lines("ab\ncde\nf");
        assert_eq!(lines.span(1), Span::new(0, 2));
        assert_eq!(lines.span(2), Span::new(3, 6));
        assert_eq!(lines.span(3), Span::new(7, 8));
        assert_eq!(lines.span(9), Span::default());
    }
}
