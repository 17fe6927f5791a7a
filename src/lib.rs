//! # bbjc - A Compiler for the Byte-Byte-Jump Move Machine
//!
//! Compiles a small systems language to a memory image for a machine with a
//! single instruction: copy one byte, then jump.
//!
//! ## Features
//!
//! - **Scope resolution** with nested blocks, struct and array types, labels
//!   that may be used before they are declared, and `extern` labels shared
//!   across files
//! - **Imports** searched in order along an import path, emitted once unless
//!   the imported file says `@multi`, optionally aligned with `@align`
//! - **Table-driven code generation**: additions and logical tests become
//!   lookups into tables laid out in the image itself
//! - **Reference interpreter** for running generated images
//!
//! ## Quick Start
//!
//! Syntax trees come from an external parser as JSON. Trees can also be
//! built directly:
//!
//! ```rust
//! use bbjc::parser::{Expr, MemoryLoader, Program, Stmt};
//! use bbjc::{CompileOptions, Compiler, MoveMachine};
//!
//! # fn main() -> bbjc::Result<()> {
//! // let x = (n8) 40 + (n8) 2;
//! let main = Program::new(vec![Stmt::let_var(
//!     "x",
//!     Expr::binary(
//!         bbjc::parser::BinaryOp::Add,
//!         Expr::cast("n8", Expr::int(40)),
//!         Expr::cast("n8", Expr::int(2)),
//!     ),
//! )
//! .into()]);
//!
//! let loader = MemoryLoader::new().with_file("main.bbj", main);
//! let compiler = Compiler::with_loader(CompileOptions::default(), loader);
//! let result = compiler.compile_file("main.bbj")?;
//!
//! let mut machine = MoveMachine::new(&result.image);
//! machine.run_to_halt()?;
//! assert_eq!(machine.register(0), Some(42));
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! JSON AST → Loader → Resolver → Resolved Program → Codegen → Machine Image
//! ```
//!
//! ### Main Components
//!
//! - [`parser`] - Raw syntax tree, loaders and preprocessor line maps
//! - [`compiler`] - Resolver, compile-time evaluation, code generation
//! - [`runtime`] - Move-machine interpreter
//! - [`error`] - Error type and diagnostics
//!
//! ## Memory Image
//!
//! ```text
//! 0x00000  entry address
//! 0x00010  immediate register
//! 0x00020  registers, 16 bytes each
//! 0x10000  addition table
//! 0x20000  logical-not table
//! 0x20100  code
//! ```

/// Version of the compiler
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod compiler;
pub mod error;
pub mod parser;
pub mod runtime;

// Re-export main types
pub use compiler::{CompileOptions, CompileResult, Compiler, MachineImage};
pub use error::{Diagnostic, Error, Result};
pub use runtime::MoveMachine;
