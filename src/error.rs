//! Error types for the bbjc compiler

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::parser::ast::Location;
use crate::parser::LineMap;

/// A span inside a particular source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation {
    /// File identity the span belongs to
    pub file: Arc<Path>,
    /// Start and end positions reported by the parser
    pub span: Location,
}

impl SourceLocation {
    /// Creates a location for `span` inside `file`
    pub fn new(file: Arc<Path>, span: Location) -> Self {
        SourceLocation { file, span }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} from {}:{} to {}:{}",
            self.file.display(),
            self.span.start.line,
            self.span.start.column,
            self.span.end.line,
            self.span.end.column
        )
    }
}

/// Kind of symbol a failed lookup was looking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// A `let`-bound variable
    Variable,
    /// A builtin, imported or struct type
    Type,
}

impl fmt::Display for SymbolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SymbolKind::Variable => write!(f, "variable"),
            SymbolKind::Type => write!(f, "type"),
        }
    }
}

/// Compiler errors
///
/// Every failure aborts the compilation; nothing is recovered locally.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // Resolution errors
    /// Reference to a variable or type that no enclosing scope defines
    ///
    /// **Triggered by:** `x` or `(foo) 1` where `x`/`foo` was never declared
    #[error("undefined {kind} `{name}` at {location}")]
    UndefinedSymbol {
        /// What was being looked up
        kind: SymbolKind,
        /// Name as written
        name: String,
        /// Where the reference appears
        location: SourceLocation,
    },

    /// Operand or condition types do not agree
    ///
    /// **Triggered by:** `(n8) 1 + (n16) 2`, `if` on a struct value
    #[error("type mismatch: expected {expected}, found {found} at {location}")]
    TypeMismatch {
        /// Type that was required
        expected: String,
        /// Type that was supplied
        found: String,
        /// Offending expression
        location: SourceLocation,
    },

    /// Call or index applied to a type that does not support it
    #[error("invalid access: {message} at {location}")]
    InvalidAccess {
        /// What was attempted
        message: String,
        /// Offending expression
        location: SourceLocation,
    },

    /// Compile-time evaluation reached a non-constant operand
    #[error("expression is not a compile-time constant at {location}")]
    NotConstant {
        /// The non-constant subexpression
        location: SourceLocation,
    },

    /// A pragma received a value it cannot use
    #[error("invalid value `{value}` for pragma @{pragma} at {location}")]
    InvalidPragmaValue {
        /// Pragma name
        pragma: String,
        /// Rendered value, or `<none>`
        value: String,
        /// Pragma statement
        location: SourceLocation,
    },

    /// Pragma used inside a block or control-flow body
    #[error("pragma @{pragma} is only allowed at file top level ({location})")]
    MisplacedPragma {
        /// Pragma name
        pragma: String,
        /// Pragma statement
        location: SourceLocation,
    },

    /// Pragma name not recognised
    #[error("unknown pragma @{pragma} at {location}")]
    UnknownPragma {
        /// Pragma name
        pragma: String,
        /// Pragma statement
        location: SourceLocation,
    },

    /// No import search directory contains the requested file
    #[error("cannot find import \"{name}\" (searched {}) at {location}", display_paths(.searched))]
    ImportNotFound {
        /// Name as written in the import statement
        name: String,
        /// Candidate paths that were tried, in order
        searched: Vec<PathBuf>,
        /// Import statement
        location: SourceLocation,
    },

    /// A file imports itself, directly or through other files
    #[error("import cycle: {} at {location}", display_chain(.chain))]
    ImportCycle {
        /// Files currently being resolved, ending with the repeated one
        chain: Vec<PathBuf>,
        /// Import statement closing the cycle
        location: SourceLocation,
    },

    /// Label use with no matching declaration in its scope chain
    ///
    /// **Triggered by:** `goto .nowhere;` without a `.nowhere:` label
    #[error("unresolved label `{name}` at {location}")]
    UnresolvedLabel {
        /// Label name as written
        name: String,
        /// Label use
        location: SourceLocation,
    },

    /// Two fields with the same name in one struct definition
    #[error("duplicate field `{field}` in struct `{structure}` at {location}")]
    DuplicateField {
        /// Repeated field name
        field: String,
        /// Struct being defined
        structure: String,
        /// Struct definition
        location: SourceLocation,
    },

    // Code generation errors
    /// Assignment target is not a dereference
    #[error("unsupported assignment target at {location}")]
    UnsupportedLvalue {
        /// Assignment target
        location: SourceLocation,
    },

    /// Construct the code generator has no lowering for
    #[error("unimplemented: {construct}{}", display_at(.location))]
    Unimplemented {
        /// Description of the construct
        construct: String,
        /// Where it appears, when known
        location: Option<SourceLocation>,
    },

    /// Constant division or remainder by zero
    #[error("division by zero in constant expression at {location}")]
    DivisionByZero {
        /// Offending expression
        location: SourceLocation,
    },

    /// Register file exhausted
    #[error("out of registers: at most {limit} are available{}", display_at(.location))]
    OutOfRegisters {
        /// Number of register slots below the addition table
        limit: usize,
        /// Declaration that did not fit
        location: Option<SourceLocation>,
    },

    // Driver errors
    /// Source file could not be read or its syntax tree could not be decoded
    #[error("failed to load {}: {message}", .path.display())]
    Load {
        /// File that failed
        path: PathBuf,
        /// Underlying reason
        message: String,
    },

    /// Broken invariant between compiler stages
    #[error("internal compiler error: {0}")]
    Internal(String),

    // Interpreter errors
    /// Move machine touched an address outside its memory
    #[error("machine fault at pc {pc:#x}: address {address:#x} is out of bounds")]
    MachineFault {
        /// Instruction being executed
        pc: u64,
        /// Address that was out of range
        address: u64,
    },

    /// Move machine did not halt within the allowed number of steps
    #[error("step limit of {limit} exceeded")]
    StepLimitExceeded {
        /// Allowed steps
        limit: u64,
    },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn display_chain(chain: &[PathBuf]) -> String {
    chain
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn display_at(location: &Option<SourceLocation>) -> String {
    match location {
        Some(location) => format!(" at {}", location),
        None => String::new(),
    }
}

impl Error {
    /// Create an internal error with a message
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Create an unimplemented-construct error
    pub fn unimplemented(construct: impl Into<String>, location: &SourceLocation) -> Self {
        Error::Unimplemented {
            construct: construct.into(),
            location: Some(location.clone()),
        }
    }

    /// Stable name of the error kind, as printed in diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UndefinedSymbol { .. } => "UndefinedSymbol",
            Error::TypeMismatch { .. } => "TypeMismatch",
            Error::InvalidAccess { .. } => "InvalidAccess",
            Error::NotConstant { .. } => "NotConstant",
            Error::InvalidPragmaValue { .. } => "InvalidPragmaValue",
            Error::MisplacedPragma { .. } => "MisplacedPragma",
            Error::UnknownPragma { .. } => "UnknownPragma",
            Error::ImportNotFound { .. } => "ImportNotFound",
            Error::ImportCycle { .. } => "ImportCycle",
            Error::UnresolvedLabel { .. } => "UnresolvedLabel",
            Error::DuplicateField { .. } => "DuplicateField",
            Error::UnsupportedLvalue { .. } => "UnsupportedLvalue",
            Error::Unimplemented { .. } => "Unimplemented",
            Error::DivisionByZero { .. } => "DivisionByZero",
            Error::OutOfRegisters { .. } => "OutOfRegisters",
            Error::Load { .. } => "Load",
            Error::Internal(_) => "Internal",
            Error::MachineFault { .. } => "MachineFault",
            Error::StepLimitExceeded { .. } => "StepLimitExceeded",
        }
    }

    /// Source location the error points at, if any
    pub fn location(&self) -> Option<&SourceLocation> {
        match self {
            Error::UndefinedSymbol { location, .. }
            | Error::TypeMismatch { location, .. }
            | Error::InvalidAccess { location, .. }
            | Error::NotConstant { location }
            | Error::InvalidPragmaValue { location, .. }
            | Error::MisplacedPragma { location, .. }
            | Error::UnknownPragma { location, .. }
            | Error::ImportNotFound { location, .. }
            | Error::ImportCycle { location, .. }
            | Error::UnresolvedLabel { location, .. }
            | Error::DuplicateField { location, .. }
            | Error::UnsupportedLvalue { location }
            | Error::DivisionByZero { location } => Some(location),
            Error::Unimplemented { location, .. } | Error::OutOfRegisters { location, .. } => {
                location.as_ref()
            }
            Error::Load { .. }
            | Error::Internal(_)
            | Error::MachineFault { .. }
            | Error::StepLimitExceeded { .. } => None,
        }
    }

    /// Builds a user-facing diagnostic for this error
    pub fn diagnostic<'a>(&'a self) -> Diagnostic<'a> {
        Diagnostic {
            error: self,
            line_map: None,
        }
    }
}

/// Renders an [`Error`] for a terminal, optionally translating preprocessed
/// line numbers back to the original files through a [`LineMap`].
pub struct Diagnostic<'a> {
    error: &'a Error,
    line_map: Option<&'a LineMap>,
}

impl<'a> Diagnostic<'a> {
    /// Translate positions through `line_map`
    pub fn with_line_map(mut self, line_map: &'a LineMap) -> Self {
        self.line_map = Some(line_map);
        self
    }
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error[{}]: {}", self.error.kind(), self.error)?;
        let Some(location) = self.error.location() else {
            return Ok(());
        };
        let start = location.span.start;
        match self.line_map.and_then(|map| map.lookup(start.line)) {
            Some(info) => write!(f, "\n --> {}:{}:{}", info.file, info.line, start.column),
            None => write!(
                f,
                "\n --> {}:{}:{}",
                location.file.display(),
                start.line,
                start.column
            ),
        }
    }
}

/// Result type for bbjc operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ast::Position;

    fn loc(line: usize, column: usize) -> SourceLocation {
        SourceLocation::new(
            Arc::from(Path::new("main.bbj")),
            Location {
                start: Position { line, column },
                end: Position {
                    line,
                    column: column + 3,
                },
            },
        )
    }

    #[test]
    fn test_location_display() {
        assert_eq!(loc(4, 2).to_string(), "main.bbj from 4:2 to 4:5");
    }

    #[test]
    fn test_kind_and_location() {
        let err = Error::UnresolvedLabel {
            name: ".nowhere".to_string(),
            location: loc(1, 6),
        };
        assert_eq!(err.kind(), "UnresolvedLabel");
        assert_eq!(err.location(), Some(&loc(1, 6)));
        assert!(err.to_string().contains(".nowhere"));

        let err = Error::internal("register not bound");
        assert_eq!(err.kind(), "Internal");
        assert!(err.location().is_none());
    }

    #[test]
    fn test_diagnostic_without_line_map() {
        let err = Error::NotConstant { location: loc(3, 9) };
        let text = err.diagnostic().to_string();
        assert!(text.starts_with("error[NotConstant]"));
        assert!(text.ends_with("--> main.bbj:3:9"));
    }

    #[test]
    fn test_diagnostic_with_line_map() {
        let pre = LineMap::preprocess("# 10 \"lib.bbj\"\na\nb\nc\n", "main.bbj");
        let err = Error::DivisionByZero { location: loc(3, 1) };
        let text = err.diagnostic().with_line_map(&pre.line_map).to_string();
        assert!(text.ends_with("--> lib.bbj:12:1"), "{}", text);
    }

    #[test]
    fn test_import_errors_list_paths() {
        let err = Error::ImportNotFound {
            name: "foo".to_string(),
            searched: vec![PathBuf::from("a/foo"), PathBuf::from("b/foo")],
            location: loc(1, 1),
        };
        assert!(err.to_string().contains("a/foo, b/foo"));

        let err = Error::ImportCycle {
            chain: vec![PathBuf::from("a"), PathBuf::from("b"), PathBuf::from("a")],
            location: loc(1, 1),
        };
        assert!(err.to_string().contains("a -> b -> a"));
    }
}
