//! # BBJ Compiler - Syntax Trees to Move-Machine Images
//!
//! Compiles programs to memory images for a byte-byte-jump machine, whose
//! single instruction copies one byte and jumps.
//!
//! ## Architecture
//!
//! ```text
//! Raw AST → Resolver (scopes, types, imports) → Resolved Program → Codegen → Image
//! ```
//!
//! ## Usage
//!
//! ```ignore
//! use bbjc::compiler::{Compiler, CompileOptions};
//!
//! let options = CompileOptions::default().with_import_path("lib");
//! let compiler = Compiler::new(options);
//! let result = compiler.compile_file("main.json")?;
//! std::fs::write("main.bin", result.image.as_bytes())?;
//! ```

pub mod codegen;
pub mod const_eval;
pub mod debug;
pub mod image;
pub mod program;
pub mod resolver;
pub mod scope;
pub mod types;

pub use codegen::{generate, Codegen, CodegenStats};
pub use debug::{disassemble, dump_image, render_image};
pub use image::{ImageLayout, MachineImage};
pub use program::ResolvedProgram;
pub use resolver::resolve;

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::parser::{JsonFileLoader, Program, SourceLoader};
use crate::Result;

/// Compilation options
#[derive(Debug, Clone, Default)]
pub struct CompileOptions {
    /// Directories searched for imports, in order
    pub import_paths: Vec<PathBuf>,
}

impl CompileOptions {
    /// Appends a directory to the import search path
    pub fn with_import_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.import_paths.push(path.into());
        self
    }
}

/// Compilation result with metadata
#[derive(Debug)]
pub struct CompileResult {
    pub image: MachineImage,
    pub stats: CodegenStats,
}

/// Load → resolve → generate driver
pub struct Compiler {
    options: CompileOptions,
    loader: Box<dyn SourceLoader>,
}

impl Compiler {
    /// Create a compiler that reads JSON syntax trees from disk
    pub fn new(options: CompileOptions) -> Self {
        Self::with_loader(options, JsonFileLoader::new())
    }

    /// Create a compiler that obtains syntax trees from `loader`
    pub fn with_loader(options: CompileOptions, loader: impl SourceLoader + 'static) -> Self {
        Self {
            options,
            loader: Box::new(loader),
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compile the file at `path` and everything it imports
    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<CompileResult> {
        let path = path.as_ref();
        let identity = self.loader.identity(path);
        let raw = self.loader.load(path)?;
        self.compile_program(&raw, &identity)
    }

    /// Compile an already-loaded tree; `identity` names it in diagnostics and
    /// import cycle checks
    pub fn compile_program(&self, raw: &Program, identity: &Path) -> Result<CompileResult> {
        debug!(file = %identity.display(), "compiling");
        let program = resolve(raw, &self.options.import_paths, identity, &*self.loader)?;
        let (image, stats) = Codegen::new().generate(&program)?;
        Ok(CompileResult { image, stats })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{Expr, MemoryLoader, Stmt};

    #[test]
    fn test_compile_options() {
        let options = CompileOptions::default()
            .with_import_path("lib")
            .with_import_path("vendor");
        assert_eq!(options.import_paths, vec![PathBuf::from("lib"), PathBuf::from("vendor")]);
    }

    #[test]
    fn test_compile_file_from_memory() {
        let loader = MemoryLoader::new().with_file(
            "main.bbj",
            Program::new(vec![Stmt::let_var("x", Expr::cast("n8", Expr::int(7))).into()]),
        );
        let compiler = Compiler::with_loader(CompileOptions::default(), loader);
        let result = compiler.compile_file("main.bbj").unwrap();
        assert_eq!(result.image.entry(), result.image.layout().code_start);
        assert_eq!(result.stats.registers_used, 1);
        assert!(result.stats.instructions > 16);
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let compiler = Compiler::with_loader(CompileOptions::default(), MemoryLoader::new());
        let err = compiler.compile_file("absent.bbj").unwrap_err();
        assert_eq!(err.kind(), "Load");
    }
}
