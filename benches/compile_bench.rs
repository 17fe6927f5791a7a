use criterion::{black_box, criterion_group, criterion_main, Criterion};
use bbjc::parser::{BinaryOp, Expr, LabeledStmt, MemoryLoader, Program, Stmt};
use bbjc::{CompileOptions, Compiler, MoveMachine};

fn countdown_program() -> Program {
    let bump = |at: u128, delta: u128| -> LabeledStmt {
        let cell = || Expr::deref(Expr::cast("addr", Expr::int(at)));
        Stmt::assign(
            cell(),
            Expr::binary(BinaryOp::Add, cell(), Expr::cast("n8", Expr::int(delta))),
        )
        .into()
    };
    Program::new(vec![
        Stmt::let_var("k", Expr::cast("n8", Expr::int(100))).into(),
        Stmt::let_var("count", Expr::cast("n8", Expr::int(0))).into(),
        Stmt::let_var("greeting", Expr::string("hello, world")).into(),
        Stmt::while_loop(Expr::id("k"), Stmt::block(vec![bump(32, 255), bump(48, 1)])).into(),
    ])
}

fn compile_benchmark(c: &mut Criterion) {
    let loader = MemoryLoader::new().with_file("main.bbj", countdown_program());
    let compiler = Compiler::with_loader(CompileOptions::default(), loader);

    c.bench_function("compile countdown loop", |b| {
        b.iter(|| compiler.compile_file(black_box("main.bbj")).unwrap())
    });

    let image = compiler.compile_file("main.bbj").unwrap().image;
    c.bench_function("run countdown loop", |b| {
        b.iter(|| {
            let mut machine = MoveMachine::new(black_box(&image));
            machine.run_to_halt().unwrap()
        })
    });
}

criterion_group!(benches, compile_benchmark);
criterion_main!(benches);
