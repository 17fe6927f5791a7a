//! Front-end inputs: the raw syntax tree, the loaders that supply it and
//! line-marker mapping for preprocessed sources.
//!
//! Turning source text into a tree happens outside this crate; trees arrive
//! as JSON.

pub mod ast;
mod linemap;
mod loader;

pub use ast::{
    Accessor, BinaryOp, Expr, Field, Ident, LabelDecl, LabeledStmt, Location, Position, Program,
    Stmt, StrLit, TypeExpr, UnaryOp,
};
pub use linemap::{LineInfo, LineMap, Preprocessed};
pub use loader::{JsonFileLoader, MemoryLoader, SourceLoader};
