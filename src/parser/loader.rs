//! Access to parsed source files.
//!
//! The resolver only needs to ask whether a candidate import path exists and
//! to obtain the syntax tree stored there, so both are behind [`SourceLoader`].

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::parser::ast::Program;

/// Source of syntax trees for the main file and its imports
pub trait SourceLoader {
    /// Whether `path` names a loadable file
    fn exists(&self, path: &Path) -> bool;

    /// Canonical identity of `path`, used for include-once and cycle checks
    fn identity(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }

    /// Loads and decodes the syntax tree stored at `path`
    fn load(&self, path: &Path) -> Result<Program>;
}

/// Reads JSON-encoded syntax trees from the filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFileLoader;

impl JsonFileLoader {
    pub fn new() -> Self {
        JsonFileLoader
    }
}

impl SourceLoader for JsonFileLoader {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn identity(&self, path: &Path) -> PathBuf {
        fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
    }

    fn load(&self, path: &Path) -> Result<Program> {
        let text = fs::read_to_string(path).map_err(|e| Error::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| Error::Load {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}

/// In-memory file set, keyed by path
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    files: HashMap<PathBuf, Program>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `program` under `path`
    pub fn insert(&mut self, path: impl Into<PathBuf>, program: Program) {
        self.files.insert(path.into(), program);
    }

    /// Builder form of [`MemoryLoader::insert`]
    pub fn with_file(mut self, path: impl Into<PathBuf>, program: Program) -> Self {
        self.insert(path, program);
        self
    }
}

impl SourceLoader for MemoryLoader {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn load(&self, path: &Path) -> Result<Program> {
        self.files.get(path).cloned().ok_or_else(|| Error::Load {
            path: path.to_path_buf(),
            message: "no such file".to_string(),
        })
    }
}
