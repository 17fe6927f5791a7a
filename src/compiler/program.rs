//! Resolved program tree.
//!
//! Every identifier here already points at its declaration: variables and
//! labels are shared objects, and expressions carry their type. Addresses and
//! registers are filled in by the code generator while it emits the tree.

use std::cell::{Cell, OnceCell};
use std::collections::HashMap;
use std::path::PathBuf;
use std::rc::Rc;

use crate::compiler::types::TypeRef;
use crate::error::SourceLocation;
use crate::parser::ast::{BinaryOp, UnaryOp};

/// Shared handle to a label
pub type LabelRef = Rc<Label>;

/// Shared handle to a variable
pub type VarRef = Rc<Variable>;

/// Code position name
#[derive(Debug)]
pub struct Label {
    /// Name as written, or a generated name for compiler-internal labels
    pub name: String,
    /// Exported to importing files
    pub is_extern: bool,
    /// Declaration site
    pub location: Option<SourceLocation>,
    address: Cell<Option<u64>>,
}

impl Label {
    pub fn new(name: impl Into<String>, is_extern: bool, location: SourceLocation) -> LabelRef {
        Rc::new(Label {
            name: name.into(),
            is_extern,
            location: Some(location),
            address: Cell::new(None),
        })
    }

    /// Label with no source counterpart, used for branch targets
    pub fn internal(name: impl Into<String>) -> LabelRef {
        Rc::new(Label {
            name: name.into(),
            is_extern: false,
            location: None,
            address: Cell::new(None),
        })
    }

    /// Address assigned during emission
    pub fn address(&self) -> Option<u64> {
        self.address.get()
    }

    pub fn set_address(&self, address: u64) {
        self.address.set(Some(address));
    }
}

/// Storage shape of a variable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// Single 16-byte register
    Register,
    /// `count` consecutive registers
    Array { count: usize },
}

/// `let`-declared variable
#[derive(Debug)]
pub struct Variable {
    pub name: String,
    pub ty: TypeRef,
    pub kind: VarKind,
    pub location: SourceLocation,
    register: Cell<Option<usize>>,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: TypeRef, kind: VarKind, location: SourceLocation) -> VarRef {
        Rc::new(Variable {
            name: name.into(),
            ty,
            kind,
            location,
            register: Cell::new(None),
        })
    }

    /// First register bound at emission of the declaration
    pub fn register(&self) -> Option<usize> {
        self.register.get()
    }

    pub fn bind_register(&self, register: usize) {
        self.register.set(Some(register));
    }
}

/// Label use whose declaration is looked up once the whole file is known
#[derive(Debug)]
pub struct LabelSlot {
    pub name: String,
    target: OnceCell<LabelRef>,
}

impl LabelSlot {
    pub fn new(name: impl Into<String>) -> Rc<Self> {
        Rc::new(LabelSlot {
            name: name.into(),
            target: OnceCell::new(),
        })
    }

    /// Declaration this use refers to, once resolved
    pub fn target(&self) -> Option<&LabelRef> {
        self.target.get()
    }

    pub(crate) fn bind(&self, label: LabelRef) {
        // A slot is bound exactly once by the resolver; later binds are ignored.
        let _ = self.target.set(label);
    }
}

/// Typed expression
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    /// Result type; for casts this is the target type
    pub ty: TypeRef,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Int(u128),
    Str(String),
    Var(VarRef),
    Label(Rc<LabelSlot>),
    Cast(Box<Expr>),
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// `base[i][j]...`; calls never survive resolution
    Index { base: Box<Expr>, indices: Vec<Expr> },
}

impl Expr {
    /// Whether evaluating this expression needs a label address
    pub fn mentions_label(&self) -> bool {
        match &self.kind {
            ExprKind::Label(_) => true,
            ExprKind::Int(_) | ExprKind::Str(_) | ExprKind::Var(_) => false,
            ExprKind::Cast(inner) => inner.mentions_label(),
            ExprKind::Unary { operand, .. } => operand.mentions_label(),
            ExprKind::Binary { lhs, rhs, .. } => lhs.mentions_label() || rhs.mentions_label(),
            ExprKind::Index { base, indices } => {
                base.mentions_label() || indices.iter().any(Expr::mentions_label)
            }
        }
    }

    /// String literals in evaluation order
    pub fn string_literals<'e>(&'e self, out: &mut Vec<&'e str>) {
        match &self.kind {
            ExprKind::Str(value) => out.push(value),
            ExprKind::Int(_) | ExprKind::Var(_) | ExprKind::Label(_) => {}
            ExprKind::Cast(inner) => inner.string_literals(out),
            ExprKind::Unary { operand, .. } => operand.string_literals(out),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.string_literals(out);
                rhs.string_literals(out);
            }
            ExprKind::Index { base, indices } => {
                base.string_literals(out);
                for index in indices {
                    index.string_literals(out);
                }
            }
        }
    }
}

/// Resolved statement
#[derive(Debug, Clone)]
pub struct Stmt {
    /// Labels bound to this statement's first emitted byte
    pub labels: Vec<LabelRef>,
    pub kind: StmtKind,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub enum StmtKind {
    /// Carries labels of a statement that emits nothing (struct, pragma)
    Empty,
    Import(Rc<Import>),
    Expr(Expr),
    Goto(Expr),
    Let { var: VarRef, init: Expr },
    LetArray { var: VarRef },
    Assign { dst: Expr, src: Expr },
    Block(Vec<Stmt>),
    If { cond: Expr, then: Box<Stmt>, otherwise: Option<Box<Stmt>> },
    While { cond: Expr, body: Box<Stmt>, is_do: bool },
    Bbj(Vec<Expr>),
}

/// Resolved import statement
#[derive(Debug)]
pub struct Import {
    /// Canonical identity of the imported file
    pub identity: PathBuf,
    pub program: ResolvedProgram,
}

/// File-level settings from pragmas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pragmas {
    /// Code of this file starts at a multiple of `align`
    pub align: u64,
    /// Emit the file at every import instead of once
    pub multi: bool,
}

impl Default for Pragmas {
    fn default() -> Self {
        Pragmas {
            align: 1,
            multi: false,
        }
    }
}

/// Names a file exports to its importers
#[derive(Debug, Clone, Default)]
pub struct PublicScope {
    /// Top-level struct definitions
    pub types: HashMap<String, TypeRef>,
    /// `extern` labels
    pub labels: HashMap<String, LabelRef>,
}

/// Result of resolving one file
#[derive(Debug)]
pub struct ResolvedProgram {
    pub file: PathBuf,
    pub statements: Vec<Stmt>,
    pub public: PublicScope,
    pub pragmas: Pragmas,
}
