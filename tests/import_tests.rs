//! Import search, include-once emission and alignment

use std::path::PathBuf;

use bbjc::parser::{
    BinaryOp, Expr, JsonFileLoader, LabeledStmt, MemoryLoader, Program, Stmt, TypeExpr,
};
use bbjc::{CompileOptions, CompileResult, Compiler, Error, MoveMachine};

fn options() -> CompileOptions {
    CompileOptions::default()
        .with_import_path("lib")
        .with_import_path("vendor")
}

fn compile(loader: MemoryLoader, main: Vec<LabeledStmt>) -> bbjc::Result<CompileResult> {
    let loader = loader.with_file("main.bbj", Program::new(main));
    Compiler::with_loader(options(), loader).compile_file("main.bbj")
}

fn run(loader: MemoryLoader, main: Vec<LabeledStmt>) -> MoveMachine {
    let result = compile(loader, main).unwrap();
    let mut machine = MoveMachine::new(&result.image);
    machine.run(5_000_000).unwrap();
    machine
}

fn n8(value: u128) -> Expr {
    Expr::cast("n8", Expr::int(value))
}

fn addr(value: u128) -> Expr {
    Expr::cast("addr", Expr::int(value))
}

/// `*((addr) 32) = *((addr) 32) + (n8) 1`
fn increment_r0() -> LabeledStmt {
    Stmt::assign(
        Expr::deref(addr(32)),
        Expr::binary(BinaryOp::Add, Expr::deref(addr(32)), n8(1)),
    )
    .into()
}

fn counter(multi: bool) -> Program {
    let mut stmts = Vec::new();
    if multi {
        stmts.push(Stmt::pragma("multi", None).into());
    }
    stmts.push(increment_r0());
    Program::new(stmts)
}

fn aligned(align: u128) -> Program {
    Program::new(vec![
        Stmt::pragma("align", Some(Expr::int(align))).into(),
        LabeledStmt::new(Stmt::let_var("inside", n8(1))).exported(".lib_start"),
    ])
}

#[test]
fn test_import_is_emitted_once() {
    let loader = MemoryLoader::new().with_file("lib/counter.bbj", counter(false));
    let machine = run(
        loader,
        vec![
            Stmt::let_var("c", n8(0)).into(),
            Stmt::import("counter.bbj").into(),
            Stmt::import("counter.bbj").into(),
        ],
    );
    assert_eq!(machine.register(0), Some(1));
}

#[test]
fn test_multi_import_is_emitted_every_time() {
    let loader = MemoryLoader::new().with_file("lib/counter.bbj", counter(true));
    let machine = run(
        loader,
        vec![
            Stmt::let_var("c", n8(0)).into(),
            Stmt::import("counter.bbj").into(),
            Stmt::import("counter.bbj").into(),
            Stmt::import("counter.bbj").into(),
        ],
    );
    assert_eq!(machine.register(0), Some(3));
}

#[test]
fn test_entry_is_first_copy_of_multi_import() {
    let lib = Program::new(vec![
        Stmt::pragma("multi", None).into(),
        increment_r0().exported("_start"),
    ]);
    let loader = MemoryLoader::new().with_file("lib/start.bbj", lib);
    let result = compile(
        loader,
        vec![
            Stmt::let_var("c", n8(0)).into(),
            Stmt::import("start.bbj").into(),
            Stmt::import("start.bbj").into(),
            Stmt::import("start.bbj").into(),
        ],
    )
    .unwrap();
    assert!(result.image.entry() > result.image.layout().code_start);

    // execution starts in the first copy and falls through the other two
    let mut machine = MoveMachine::new(&result.image);
    machine.run(5_000_000).unwrap();
    assert_eq!(machine.register(0), Some(3));
}

#[test]
fn test_oversized_alignment_is_rejected() {
    let big = Program::new(vec![
        Stmt::pragma("align", Some(Expr::int(1 << 62))).into(),
        Stmt::let_var("x", n8(1)).into(),
    ]);
    let loader = MemoryLoader::new().with_file("lib/big.bbj", big);
    let err = compile(loader, vec![Stmt::import("big.bbj").into()]).unwrap_err();
    assert_eq!(err.kind(), "InvalidPragmaValue");
    assert!(err.location().is_some());
}

#[test]
fn test_first_search_directory_wins() {
    let vendor = Program::new(vec![increment_r0(), increment_r0()]);
    let loader = MemoryLoader::new()
        .with_file("lib/pick.bbj", counter(false))
        .with_file("vendor/pick.bbj", vendor);
    let machine = run(
        loader,
        vec![Stmt::let_var("c", n8(0)).into(), Stmt::import("pick.bbj").into()],
    );
    assert_eq!(machine.register(0), Some(1));
}

#[test]
fn test_later_search_directory_is_used() {
    let loader = MemoryLoader::new().with_file("vendor/only.bbj", counter(false));
    let machine = run(
        loader,
        vec![Stmt::let_var("c", n8(0)).into(), Stmt::import("only.bbj").into()],
    );
    assert_eq!(machine.register(0), Some(1));
}

#[test]
fn test_aligned_import_starts_on_boundary() {
    for align in [256, 100] {
        let loader = MemoryLoader::new().with_file("lib/aligned.bbj", aligned(align));
        let machine = run(
            loader,
            vec![
                Stmt::let_var("pad", Expr::cast("n16", Expr::int(0x1234))).into(),
                Stmt::import("aligned.bbj").into(),
                Stmt::let_var("start", Expr::label(".lib_start")).into(),
            ],
        );
        // pad = r0, inside = r1, start = r2
        let start = machine.register(2).unwrap();
        assert_eq!(start % align, 0, "align {}", align);
        assert_eq!(machine.register(1), Some(1));
    }
}

#[test]
fn test_alignment_uses_one_jump_stub() {
    let loader = MemoryLoader::new().with_file("lib/aligned.bbj", aligned(256));
    let result = compile(
        loader,
        vec![
            Stmt::let_var("pad", n8(3)).into(),
            LabeledStmt::new(Stmt::import("aligned.bbj")).labeled(".before"),
            Stmt::let_var("before", Expr::label(".before")).into(),
            Stmt::let_var("start", Expr::label(".lib_start")).into(),
        ],
    )
    .unwrap();
    let mut machine = MoveMachine::new(&result.image);
    machine.run_to_halt().unwrap();

    let before = machine.register(2).unwrap() as u64;
    let start = machine.register(3).unwrap() as u64;
    assert_ne!(before % 256, 0);
    assert_eq!(start % 256, 0);
    assert!(start - before < 256 + 24);

    // src = 0, dst = 0, next = aligned start
    let image = &result.image;
    assert_eq!(image.read_u64(before), Some(0));
    assert_eq!(image.read_u64(before + 8), Some(0));
    assert_eq!(image.read_u64(before + 16), Some(start));
}

#[test]
fn test_label_from_repeated_import_is_placed() {
    let lib = Program::new(vec![
        LabeledStmt::new(Stmt::let_var("inside", n8(1))).exported(".lib_entry"),
    ]);
    let loader = MemoryLoader::new().with_file("lib/entry.bbj", lib);
    let machine = run(
        loader,
        vec![
            Stmt::import("entry.bbj").into(),
            Stmt::import("entry.bbj").into(),
            Stmt::let_var("entry", Expr::label(".lib_entry")).into(),
        ],
    );
    assert_eq!(machine.register(0), Some(1));
    assert_ne!(machine.register(1), Some(0));
}

#[test]
fn test_exported_label_and_struct_are_visible() {
    let lib = Program::new(vec![
        Stmt::struct_def("point", vec![("x", TypeExpr::named("n8"))]).into(),
        LabeledStmt::new(Stmt::let_var("y", n8(2))).exported(".lib_entry"),
    ]);
    let loader = MemoryLoader::new().with_file("lib/shapes.bbj", lib);
    let result = compile(
        loader,
        vec![
            Stmt::import("shapes.bbj").into(),
            Stmt::let_var("entry", Expr::label(".lib_entry")).into(),
            Stmt::let_array("points", Expr::int(2), Some(TypeExpr::named("point"))).into(),
        ],
    );
    assert!(result.is_ok(), "{:?}", result.err());
}

#[test]
fn test_import_not_found_lists_search_path() {
    let err = compile(MemoryLoader::new(), vec![Stmt::import("missing.bbj").into()]).unwrap_err();
    match err {
        Error::ImportNotFound { name, searched, .. } => {
            assert_eq!(name, "missing.bbj");
            assert_eq!(
                searched,
                vec![PathBuf::from("lib/missing.bbj"), PathBuf::from("vendor/missing.bbj")]
            );
        }
        other => panic!("expected ImportNotFound, got {:?}", other),
    }
}

#[test]
fn test_import_cycle_is_reported() {
    let loader = MemoryLoader::new()
        .with_file("lib/a.bbj", Program::new(vec![Stmt::import("b.bbj").into()]))
        .with_file("lib/b.bbj", Program::new(vec![Stmt::import("a.bbj").into()]));
    let err = compile(loader, vec![Stmt::import("a.bbj").into()]).unwrap_err();
    match err {
        Error::ImportCycle { chain, .. } => {
            assert_eq!(chain.first(), Some(&PathBuf::from("main.bbj")));
            assert_eq!(chain.last(), Some(&PathBuf::from("lib/a.bbj")));
        }
        other => panic!("expected ImportCycle, got {:?}", other),
    }
}

#[test]
fn test_compile_json_files_from_disk() {
    let dir = std::env::temp_dir().join(format!("bbjc-import-{}", std::process::id()));
    let lib = dir.join("lib");
    std::fs::create_dir_all(&lib).unwrap();

    let main = Program::new(vec![
        Stmt::let_var("c", n8(0)).into(),
        Stmt::import("counter.json").into(),
    ]);
    std::fs::write(dir.join("main.json"), serde_json::to_string(&main).unwrap()).unwrap();
    std::fs::write(
        lib.join("counter.json"),
        serde_json::to_string(&counter(false)).unwrap(),
    )
    .unwrap();

    let options = CompileOptions::default().with_import_path(&lib);
    let compiler = Compiler::with_loader(options, JsonFileLoader::new());
    let result = compiler.compile_file(dir.join("main.json")).unwrap();
    let mut machine = MoveMachine::new(&result.image);
    machine.run_to_halt().unwrap();
    assert_eq!(machine.register(0), Some(1));

    std::fs::remove_dir_all(&dir).ok();
}
