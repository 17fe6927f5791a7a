//! # Name Resolution
//!
//! Turns a raw syntax tree into a [`ResolvedProgram`]: identifiers are bound
//! to their declarations, expressions are typed, imports are loaded and
//! resolved recursively, and pragmas are applied.
//!
//! Labels may be used before they are declared, so label uses are collected
//! together with the scope they appeared in and bound after the whole file
//! has been seen.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use tracing::debug;

use crate::compiler::const_eval::{self, ResolutionEnv};
use crate::compiler::image::MAX_ALIGN;
use crate::compiler::program::{
    Expr, ExprKind, Import, Label, LabelRef, LabelSlot, Pragmas, PublicScope, ResolvedProgram,
    Stmt, StmtKind, VarKind, Variable,
};
use crate::compiler::scope::{ScopeArena, ScopeId};
use crate::compiler::types::{same_type, Builtins, Type, TypeRef};
use crate::error::{Error, Result, SourceLocation, SymbolKind};
use crate::parser::ast::{self, Location, UnaryOp};
use crate::parser::SourceLoader;

/// Resolves `raw` as the file `file`, searching `import_paths` for imports
pub fn resolve(
    raw: &ast::Program,
    import_paths: &[PathBuf],
    file: &Path,
    loader: &dyn SourceLoader,
) -> Result<ResolvedProgram> {
    Session::new(loader, import_paths).resolve(raw, file)
}

/// State shared by every file resolved in one compilation
pub struct Session<'a> {
    loader: &'a dyn SourceLoader,
    import_paths: &'a [PathBuf],
    builtins: Builtins,
    /// Files whose resolution is in progress, outermost first
    active: Vec<PathBuf>,
    /// Finished imports by identity; every import of a file shares one
    /// resolution so its labels and types have a single identity
    imports: HashMap<PathBuf, Rc<Import>>,
}

impl<'a> Session<'a> {
    pub fn new(loader: &'a dyn SourceLoader, import_paths: &'a [PathBuf]) -> Self {
        Session {
            loader,
            import_paths,
            builtins: Builtins::new(),
            active: Vec::new(),
            imports: HashMap::new(),
        }
    }

    pub fn builtins(&self) -> &Builtins {
        &self.builtins
    }

    /// Resolves one file with identity `file`
    pub fn resolve(&mut self, raw: &ast::Program, file: &Path) -> Result<ResolvedProgram> {
        debug!(file = %file.display(), statements = raw.statements.len(), "resolving file");
        self.active.push(file.to_path_buf());
        let result = FileResolver::new(self, file).run(raw);
        self.active.pop();
        result
    }
}

struct LabelUse {
    slot: Rc<LabelSlot>,
    scope: ScopeId,
    location: SourceLocation,
}

struct FileResolver<'s, 'a> {
    session: &'s mut Session<'a>,
    file: Arc<Path>,
    scopes: ScopeArena,
    /// Nesting below file top level
    depth: usize,
    public: PublicScope,
    pragmas: Pragmas,
    label_uses: Vec<LabelUse>,
}

impl<'s, 'a> FileResolver<'s, 'a> {
    fn new(session: &'s mut Session<'a>, file: &Path) -> Self {
        let scopes = ScopeArena::new(&session.builtins);
        FileResolver {
            session,
            file: Arc::from(file),
            scopes,
            depth: 0,
            public: PublicScope::default(),
            pragmas: Pragmas::default(),
            label_uses: Vec::new(),
        }
    }

    fn run(mut self, raw: &ast::Program) -> Result<ResolvedProgram> {
        let statements = self.resolve_stmts(&raw.statements)?;
        self.bind_label_uses()?;
        Ok(ResolvedProgram {
            file: self.file.to_path_buf(),
            statements,
            public: self.public,
            pragmas: self.pragmas,
        })
    }

    fn locate(&self, span: Location) -> SourceLocation {
        SourceLocation::new(self.file.clone(), span)
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn resolve_stmts(&mut self, stmts: &[ast::LabeledStmt]) -> Result<Vec<Stmt>> {
        let mut resolved = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            if let Some(stmt) = self.resolve_stmt(stmt)? {
                resolved.push(stmt);
            }
        }
        Ok(resolved)
    }

    /// Resolves a statement; definitions and pragmas produce nothing unless
    /// they carry labels.
    fn resolve_stmt(&mut self, labeled: &ast::LabeledStmt) -> Result<Option<Stmt>> {
        let location = self.locate(labeled.location);
        let mut labels = self.declare_labels(&labeled.labels);

        let kind = match &labeled.st {
            ast::Stmt::Import { imp } => Some(StmtKind::Import(self.resolve_import(imp, &location)?)),
            ast::Stmt::ExprSt { expr } => Some(StmtKind::Expr(self.resolve_expr(expr)?)),
            ast::Stmt::Goto { dest, labels: site } => {
                labels.extend(self.declare_labels(site));
                Some(StmtKind::Goto(self.resolve_expr(dest)?))
            }
            ast::Stmt::Let { name, val } => {
                let init = self.resolve_expr(val)?;
                let ty = if init.ty.is_unknown_integer() {
                    self.session.builtins.n128.clone()
                } else {
                    init.ty.clone()
                };
                let var = Variable::new(&name.value, ty, VarKind::Register, self.locate(name.location));
                self.scopes.define_var(&name.value, var.clone());
                Some(StmtKind::Let { var, init })
            }
            ast::Stmt::LetArray { name, asize, elem } => {
                let count = self.constant_count(asize)?;
                let elem = match elem {
                    Some(elem) => self.resolve_type(elem)?,
                    None => self.session.builtins.n128.clone(),
                };
                let var = Variable::new(
                    &name.value,
                    Type::array(elem, count),
                    VarKind::Array { count },
                    self.locate(name.location),
                );
                self.scopes.define_var(&name.value, var.clone());
                Some(StmtKind::LetArray { var })
            }
            ast::Stmt::Assign { dst, src } => Some(StmtKind::Assign {
                dst: self.resolve_expr(dst)?,
                src: self.resolve_expr(src)?,
            }),
            ast::Stmt::Block { body } => {
                self.scopes.push();
                let body = self.nested(|r| r.resolve_stmts(body));
                self.scopes.pop();
                Some(StmtKind::Block(body?))
            }
            ast::Stmt::If {
                cond,
                then,
                otherwise,
            } => {
                let cond = self.resolve_condition(cond)?;
                let then = self.nested(|r| r.resolve_branch(then))?;
                let otherwise = match otherwise {
                    Some(otherwise) => Some(self.nested(|r| r.resolve_branch(otherwise))?),
                    None => None,
                };
                Some(StmtKind::If {
                    cond,
                    then,
                    otherwise,
                })
            }
            ast::Stmt::While { cond, body, is_do } => {
                let cond = self.resolve_condition(cond)?;
                let body = self.nested(|r| r.resolve_branch(body))?;
                Some(StmtKind::While {
                    cond,
                    body,
                    is_do: *is_do,
                })
            }
            ast::Stmt::StructDef { name, fields } => {
                self.define_struct(name, fields)?;
                None
            }
            ast::Stmt::Bbj { body } => {
                let values = body
                    .iter()
                    .map(|value| self.resolve_expr(value))
                    .collect::<Result<Vec<_>>>()?;
                Some(StmtKind::Bbj(values))
            }
            ast::Stmt::Pragma { name, value } => {
                self.apply_pragma(name, value.as_ref(), &location)?;
                None
            }
        };

        Ok(match kind {
            Some(kind) => Some(Stmt {
                labels,
                kind,
                location,
            }),
            None if !labels.is_empty() => Some(Stmt {
                labels,
                kind: StmtKind::Empty,
                location,
            }),
            None => None,
        })
    }

    fn resolve_branch(&mut self, stmt: &ast::LabeledStmt) -> Result<Box<Stmt>> {
        let location = self.locate(stmt.location);
        let resolved = self.resolve_stmt(stmt)?.unwrap_or(Stmt {
            labels: Vec::new(),
            kind: StmtKind::Empty,
            location,
        });
        Ok(Box::new(resolved))
    }

    fn declare_labels(&mut self, decls: &[ast::LabelDecl]) -> Vec<LabelRef> {
        decls
            .iter()
            .map(|decl| {
                let label = Label::new(&decl.value, decl.is_extern, self.locate(decl.location));
                self.scopes.define_label(&decl.value, label.clone());
                if decl.is_extern {
                    self.public.labels.insert(decl.value.clone(), label.clone());
                }
                label
            })
            .collect()
    }

    fn resolve_import(&mut self, imp: &ast::StrLit, location: &SourceLocation) -> Result<Rc<Import>> {
        let candidates: Vec<PathBuf> = self
            .session
            .import_paths
            .iter()
            .map(|dir| dir.join(&imp.value))
            .collect();
        let found = candidates
            .iter()
            .find(|candidate| self.session.loader.exists(candidate))
            .cloned();
        let Some(path) = found else {
            return Err(Error::ImportNotFound {
                name: imp.value.clone(),
                searched: candidates,
                location: location.clone(),
            });
        };

        let identity = self.session.loader.identity(&path);
        if self.session.active.contains(&identity) {
            let mut chain = self.session.active.clone();
            chain.push(identity);
            return Err(Error::ImportCycle {
                chain,
                location: location.clone(),
            });
        }

        let import = match self.session.imports.get(&identity) {
            Some(import) => {
                debug!(import = %imp.value, path = %identity.display(), "import already resolved");
                import.clone()
            }
            None => {
                debug!(import = %imp.value, path = %identity.display(), "resolving import");
                let raw = self.session.loader.load(&identity)?;
                let program = self.session.resolve(&raw, &identity)?;
                let import = Rc::new(Import {
                    identity: identity.clone(),
                    program,
                });
                self.session.imports.insert(identity, import.clone());
                import
            }
        };

        for (name, ty) in &import.program.public.types {
            self.scopes.define_type(name.clone(), ty.clone());
        }
        for (name, label) in &import.program.public.labels {
            self.scopes.define_label(name.clone(), label.clone());
        }

        Ok(import)
    }

    fn define_struct(&mut self, name: &ast::Ident, fields: &[ast::Field]) -> Result<()> {
        let mut resolved: Vec<(String, TypeRef)> = Vec::with_capacity(fields.len());
        for field in fields {
            if resolved.iter().any(|(existing, _)| existing == &field.name) {
                return Err(Error::DuplicateField {
                    field: field.name.clone(),
                    structure: name.value.clone(),
                    location: self.locate(field.location),
                });
            }
            let ty = self.resolve_type(&field.ftype)?;
            resolved.push((field.name.clone(), ty));
        }

        let ty = Rc::new(Type::Struct {
            name: name.value.clone(),
            fields: resolved,
        });
        self.scopes.define_type(name.value.clone(), ty.clone());
        if self.depth == 0 {
            self.public.types.insert(name.value.clone(), ty);
        }
        Ok(())
    }

    fn apply_pragma(
        &mut self,
        name: &ast::Ident,
        value: Option<&ast::Expr>,
        location: &SourceLocation,
    ) -> Result<()> {
        let pragma = name.value.as_str();
        if self.depth > 0 {
            return Err(Error::MisplacedPragma {
                pragma: pragma.to_string(),
                location: location.clone(),
            });
        }
        let invalid = |value: String| Error::InvalidPragmaValue {
            pragma: pragma.to_string(),
            value,
            location: location.clone(),
        };

        match pragma {
            "align" => {
                let Some(value) = value else {
                    return Err(invalid("<none>".to_string()));
                };
                let align = match self.constant(value) {
                    Ok(align) => align,
                    Err(Error::NotConstant { .. }) => {
                        return Err(invalid("non-constant expression".to_string()))
                    }
                    Err(e) => return Err(e),
                };
                self.pragmas.align = u64::try_from(align)
                    .ok()
                    .filter(|align| (1..=MAX_ALIGN).contains(align))
                    .ok_or_else(|| invalid(align.to_string()))?;
            }
            "multi" => {
                if value.is_some() {
                    return Err(invalid("unexpected argument".to_string()));
                }
                self.pragmas.multi = true;
            }
            _ => {
                return Err(Error::UnknownPragma {
                    pragma: pragma.to_string(),
                    location: location.clone(),
                })
            }
        }
        Ok(())
    }

    fn resolve_type(&mut self, ty: &ast::TypeExpr) -> Result<TypeRef> {
        match ty {
            ast::TypeExpr::Named { value, location } => {
                self.scopes
                    .lookup_type(value)
                    .ok_or_else(|| Error::UndefinedSymbol {
                        kind: SymbolKind::Type,
                        name: value.clone(),
                        location: self.locate(*location),
                    })
            }
            ast::TypeExpr::Array { inner, size, .. } => {
                let inner = self.resolve_type(inner)?;
                let count = self.constant_count(size)?;
                Ok(Type::array(inner, count))
            }
        }
    }

    fn constant(&mut self, expr: &ast::Expr) -> Result<u128> {
        let resolved = self.resolve_expr(expr)?;
        const_eval::evaluate(&resolved, &ResolutionEnv)
    }

    fn constant_count(&mut self, expr: &ast::Expr) -> Result<usize> {
        let count = self.constant(expr)?;
        Ok(usize::try_from(count).unwrap_or(usize::MAX))
    }

    fn resolve_condition(&mut self, expr: &ast::Expr) -> Result<Expr> {
        let cond = self.resolve_expr(expr)?;
        expect_integer(&cond)?;
        Ok(cond)
    }

    fn resolve_expr(&mut self, expr: &ast::Expr) -> Result<Expr> {
        let location = self.locate(expr.location());
        let (kind, ty) = match expr {
            ast::Expr::Cast { a, restype, .. } => {
                let inner = self.resolve_expr(a)?;
                let ty = self.resolve_type(restype)?;
                (ExprKind::Cast(Box::new(inner)), ty)
            }
            ast::Expr::Access { base, list, .. } => self.resolve_access(base, list, &location)?,
            ast::Expr::PosInt { value, .. } => (
                ExprKind::Int(*value),
                self.session.builtins.unknown_integer.clone(),
            ),
            ast::Expr::StrLit { value, .. } => (
                ExprKind::Str(value.clone()),
                self.session.builtins.string.clone(),
            ),
            ast::Expr::Id { value, .. } => {
                let var = self
                    .scopes
                    .lookup_var(value)
                    .ok_or_else(|| Error::UndefinedSymbol {
                        kind: SymbolKind::Variable,
                        name: value.clone(),
                        location: location.clone(),
                    })?;
                let ty = var.ty.clone();
                (ExprKind::Var(var), ty)
            }
            ast::Expr::Label { value, .. } => {
                let slot = LabelSlot::new(value.clone());
                self.label_uses.push(LabelUse {
                    slot: slot.clone(),
                    scope: self.scopes.current(),
                    location: location.clone(),
                });
                (ExprKind::Label(slot), self.session.builtins.addr())
            }
            ast::Expr::Unary { op, a, .. } => {
                let operand = self.resolve_expr(a)?;
                expect_integer(&operand)?;
                let ty = match op {
                    UnaryOp::Deref => self.session.builtins.n8.clone(),
                    _ => operand.ty.clone(),
                };
                (
                    ExprKind::Unary {
                        op: *op,
                        operand: Box::new(operand),
                    },
                    ty,
                )
            }
            ast::Expr::Binary { op, a, b, .. } => {
                let lhs = self.resolve_expr(a)?;
                let rhs = self.resolve_expr(b)?;
                if !same_type(&lhs.ty, &rhs.ty) {
                    return Err(Error::TypeMismatch {
                        expected: lhs.ty.to_string(),
                        found: rhs.ty.to_string(),
                        location,
                    });
                }
                let ty = lhs.ty.clone();
                (
                    ExprKind::Binary {
                        op: *op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    },
                    ty,
                )
            }
        };
        Ok(Expr { kind, ty, location })
    }

    fn resolve_access(
        &mut self,
        base: &ast::Expr,
        list: &[ast::Accessor],
        location: &SourceLocation,
    ) -> Result<(ExprKind, TypeRef)> {
        let base = self.resolve_expr(base)?;
        let mut ty = base.ty.clone();
        let mut indices = Vec::with_capacity(list.len());
        for accessor in list {
            match accessor {
                ast::Accessor::Call { args } => {
                    for arg in args {
                        self.resolve_expr(arg)?;
                    }
                    return Err(Error::InvalidAccess {
                        message: format!("`{}` is not callable", ty),
                        location: location.clone(),
                    });
                }
                ast::Accessor::Index { index } => {
                    let index = self.resolve_expr(index)?;
                    expect_integer(&index)?;
                    let element = match &*ty {
                        Type::Array { inner, .. } => inner.clone(),
                        _ => {
                            return Err(Error::InvalidAccess {
                                message: format!("cannot index into `{}`", ty),
                                location: location.clone(),
                            })
                        }
                    };
                    ty = element;
                    indices.push(index);
                }
            }
        }
        Ok((
            ExprKind::Index {
                base: Box::new(base),
                indices,
            },
            ty,
        ))
    }

    fn bind_label_uses(&mut self) -> Result<()> {
        for usage in std::mem::take(&mut self.label_uses) {
            let label = self
                .scopes
                .lookup_label_from(usage.scope, &usage.slot.name)
                .ok_or_else(|| Error::UnresolvedLabel {
                    name: usage.slot.name.clone(),
                    location: usage.location.clone(),
                })?;
            usage.slot.bind(label);
        }
        Ok(())
    }
}

fn expect_integer(expr: &Expr) -> Result<()> {
    if expr.ty.is_integer_compatible() {
        Ok(())
    } else {
        Err(Error::TypeMismatch {
            expected: "integer".to_string(),
            found: expr.ty.to_string(),
            location: expr.location.clone(),
        })
    }
}
