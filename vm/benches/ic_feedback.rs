use std::sync::Arc;

use bytecode::Span;
use criterion::{Criterion, black_box, criterion_group, criterion_main};
use object::TypeRef;
use vm::ast::{BinaryOp, ClassDecl, Expr, MethodDecl, Module, Stmt, StmtKind};
use vm::{Interpreter, InterpreterSettings, Program, compile_module};

fn stmt(kind: StmtKind) -> Stmt {
    Stmt::new(kind, Span::default())
}

fn ticker(name: &str, step: i64) -> ClassDecl {
    ClassDecl {
        name: name.into(),
        fields: Vec::new(),
        conformances: Vec::new(),
        methods: vec![MethodDecl {
            name: "tick".into(),
            params: vec![("x".into(), TypeRef::Int)],
            ret: TypeRef::Int,
            body: vec![stmt(StmtKind::Return(Some(Expr::binary(
                BinaryOp::Add,
                Expr::local("x"),
                Expr::int(step),
            ))))],
        }],
    }
}

// Two receiver classes alternate at one `Invoke` site.
fn stress_dispatch(iterations: i64) -> Program {
    let i = || Expr::local("i");
    let receiver = Expr::index(
        Expr::local("objs"),
        Expr::binary(BinaryOp::Mod, i(), Expr::int(2)),
    );
    let module = Module {
        classes: vec![ticker("Even", 1), ticker("Odd", 2)],
        entry: vec![
            stmt(StmtKind::Let {
                name: "objs".into(),
                ty: None,
                value: Expr::Sequence(vec![
                    Expr::construct("Even", Vec::new()),
                    Expr::construct("Odd", Vec::new()),
                ]),
            }),
            stmt(StmtKind::Let {
                name: "total".into(),
                ty: Some(TypeRef::Any),
                value: Expr::int(0),
            }),
            stmt(StmtKind::Let {
                name: "i".into(),
                ty: None,
                value: Expr::int(0),
            }),
            stmt(StmtKind::While {
                cond: Expr::binary(BinaryOp::Lt, i(), Expr::int(iterations)),
                body: vec![
                    stmt(StmtKind::Assign {
                        name: "total".into(),
                        value: Expr::invoke(receiver, "tick", vec![Expr::local("total")]),
                    }),
                    stmt(StmtKind::Assign {
                        name: "i".into(),
                        value: Expr::binary(BinaryOp::Add, i(), Expr::int(1)),
                    }),
                ],
            }),
            stmt(StmtKind::Return(Some(Expr::local("total")))),
        ],
        ..Module::default()
    };
    compile_module(&module).expect("compile")
}

fn run_case(c: &mut Criterion, name: &str, program: Program) {
    let program = Arc::new(program);
    let settings = |inline_cache| InterpreterSettings {
        inline_cache,
        ..InterpreterSettings::default()
    };

    let mut warmup = Interpreter::new(Arc::clone(&program), settings(true));
    black_box(warmup.run().expect("warmup"));

    c.bench_function(&format!("{name}_with_inline_cache"), |b| {
        let mut interp = Interpreter::new(Arc::clone(&program), settings(true));
        b.iter(|| black_box(interp.run().expect("run")))
    });

    c.bench_function(&format!("{name}_without_inline_cache"), |b| {
        let mut interp = Interpreter::new(Arc::clone(&program), settings(false));
        b.iter(|| black_box(interp.run().expect("run")))
    });
}

fn bench_ic_feedback(c: &mut Criterion) {
    run_case(c, "stress_dispatch", stress_dispatch(2_000));
}

criterion_group!(benches, bench_ic_feedback);
criterion_main!(benches);
