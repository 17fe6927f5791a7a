//! # Move-Machine Code Generation
//!
//! Lowers a [`ResolvedProgram`] to a memory image for a machine whose only
//! instruction copies one byte and jumps:
//!
//! ```text
//! [src: u64 LE][dst: u64 LE][next: u64 LE]    mem[dst] = mem[src]; pc = next
//! ```
//!
//! Expressions are evaluated into the 16-byte immediate register. Arithmetic
//! and tests are table lookups: an instruction copies an operand byte into the
//! low byte of a later instruction's `src` field, and that instruction then
//! reads from the addition or logical-not table at the patched address.
//! Constants come from a pool of one-byte stubs that jump over their own data.
//!
//! Label addresses and label-dependent `bbj` words are unknown until the whole
//! program is laid out; they are recorded as pending patches and written in a
//! final pass.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use tracing::{debug, trace};

use crate::compiler::const_eval::{self, ConstEnv};
use crate::compiler::image::{
    align_up, register_address, ImageLayout, MachineImage, ADDRESS_SIZE, ADD_TABLE_ADDRESS,
    ADD_TABLE_SIZE, DST_FIELD, ENTRY_ADDRESS, IMMEDIATE_ADDRESS, INSTRUCTION_SIZE, NEXT_FIELD,
    NOT_TABLE_SIZE, REGISTER_COUNT, REGISTER_SIZE, SRC_FIELD, TRUTHY_SENTINEL,
};
use crate::compiler::program::{
    Expr, ExprKind, Import, Label, LabelRef, ResolvedProgram, Stmt, StmtKind, VarKind,
};
use crate::compiler::types::Type;
use crate::error::{Error, Result, SourceLocation};
use crate::parser::ast::{BinaryOp, UnaryOp};

/// Name of the extern label that overrides the entry address
pub const ENTRY_LABEL: &str = "_start";

/// Lowers `program` to a memory image
pub fn generate(program: &ResolvedProgram) -> Result<MachineImage> {
    Codegen::new().generate(program).map(|(image, _)| image)
}

/// Counters describing one generated image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodegenStats {
    /// Instructions emitted, including constant stubs
    pub instructions: usize,
    /// Highest number of registers live at once
    pub registers_used: usize,
    /// Distinct byte constants
    pub pooled_bytes: usize,
    /// Distinct string literals
    pub pooled_strings: usize,
    /// Addresses written by the backpatch pass
    pub patches: usize,
}

#[derive(Debug, Clone, Copy)]
struct PooledString {
    address: u64,
    len: u64,
}

enum PatchTarget {
    Label(LabelRef),
    Expr(Expr),
}

struct PendingPatch {
    offset: u64,
    target: PatchTarget,
    location: Option<SourceLocation>,
}

/// Code generator state for one compilation
pub struct Codegen {
    buf: Vec<u8>,
    next_register: usize,
    byte_pool: HashMap<u8, u64>,
    string_pool: HashMap<String, PooledString>,
    pending: Vec<PendingPatch>,
    emitted_imports: HashSet<PathBuf>,
    /// Address written to the entry word by the first placed `_start`
    entry: Option<u64>,
    not_table: u64,
    internal_labels: usize,
    stats: CodegenStats,
}

impl Codegen {
    pub fn new() -> Self {
        Codegen {
            buf: Vec::new(),
            next_register: 0,
            byte_pool: HashMap::new(),
            string_pool: HashMap::new(),
            pending: Vec::new(),
            emitted_imports: HashSet::new(),
            entry: None,
            not_table: 0,
            internal_labels: 0,
            stats: CodegenStats::default(),
        }
    }

    /// Lays out the tables, emits every statement, appends the halt and
    /// resolves pending patches.
    pub fn generate(mut self, program: &ResolvedProgram) -> Result<(MachineImage, CodegenStats)> {
        let code_start = self.emit_tables();
        debug!(code_start = format_args!("{:#x}", code_start), "tables emitted");

        self.emit_stmts(&program.statements)?;

        let halt = self.pos();
        self.instr(0, 0, halt);
        self.backpatch()?;

        self.stats.pooled_bytes = self.byte_pool.len();
        self.stats.pooled_strings = self.string_pool.len();
        debug!(
            bytes = self.buf.len(),
            instructions = self.stats.instructions,
            registers = self.stats.registers_used,
            "image generated"
        );

        let layout = ImageLayout {
            add_table: ADD_TABLE_ADDRESS,
            not_table: self.not_table,
            code_start,
            halt,
        };
        Ok((MachineImage::new(self.buf, layout), self.stats))
    }

    /// Header, register file, addition table and logical-not page. Returns
    /// the first code address, which is also the default entry.
    fn emit_tables(&mut self) -> u64 {
        self.pad_to(ADD_TABLE_ADDRESS);
        for index in 0..ADD_TABLE_SIZE {
            self.buf.push(((index >> 8) + (index & 0xff)) as u8);
        }

        self.not_table = align_up(self.pos(), NOT_TABLE_SIZE);
        self.pad_to(self.not_table);
        self.buf.push(TRUTHY_SENTINEL);
        self.pad_to(self.not_table + NOT_TABLE_SIZE);

        let code_start = self.pos();
        self.write_u64(ENTRY_ADDRESS, code_start);
        code_start
    }

    // =========================================================================
    // Primitives
    // =========================================================================

    fn pos(&self) -> u64 {
        self.buf.len() as u64
    }

    fn pad_to(&mut self, address: u64) {
        self.buf.resize(address as usize, 0);
    }

    fn push_u64(&mut self, value: u64) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn write_u64(&mut self, address: u64, value: u64) {
        let at = address as usize;
        self.buf[at..at + ADDRESS_SIZE as usize].copy_from_slice(&value.to_le_bytes());
    }

    fn instr(&mut self, src: u64, dst: u64, next: u64) -> u64 {
        let at = self.pos();
        self.push_u64(src);
        self.push_u64(dst);
        self.push_u64(next);
        self.stats.instructions += 1;
        at
    }

    /// Copies one byte and falls through
    fn copy(&mut self, src: u64, dst: u64) {
        let next = self.pos() + INSTRUCTION_SIZE;
        self.instr(src, dst, next);
    }

    fn copy_range(&mut self, src: u64, dst: u64, len: u64) {
        for i in 0..len {
            self.copy(src + i, dst + i);
        }
    }

    /// Jumps over `data` placed right after the jump; returns the data address
    fn jump_with_data(&mut self, data: &[u8]) -> u64 {
        let start = self.pos() + INSTRUCTION_SIZE;
        self.instr(0, 0, start + data.len() as u64);
        self.buf.extend_from_slice(data);
        start
    }

    /// Like [`Self::jump_with_data`] with the data starting at a multiple of `align`
    fn jump_with_aligned_data(&mut self, data: &[u8], align: u64) -> u64 {
        let start = align_up(self.pos() + INSTRUCTION_SIZE, align);
        self.instr(0, 0, start + data.len() as u64);
        self.pad_to(start);
        self.buf.extend_from_slice(data);
        start
    }

    /// Address of a byte holding `value`, emitting a stub the first time
    fn byte_constant(&mut self, value: u8) -> u64 {
        if let Some(&address) = self.byte_pool.get(&value) {
            return address;
        }
        let address = self.jump_with_data(&[value]);
        self.byte_pool.insert(value, address);
        address
    }

    fn pool_string(&mut self, value: &str) -> PooledString {
        if let Some(&pooled) = self.string_pool.get(value) {
            return pooled;
        }
        let pooled = PooledString {
            address: self.jump_with_data(value.as_bytes()),
            len: value.len() as u64,
        };
        self.string_pool.insert(value.to_string(), pooled);
        pooled
    }

    fn set_byte(&mut self, dst: u64, value: u8) {
        let src = self.byte_constant(value);
        self.copy(src, dst);
    }

    /// Stores the low `len` bytes of `value` at `dst`, little-endian
    fn set_bytes(&mut self, dst: u64, value: u128, len: u64) {
        for i in 0..len {
            self.set_byte(dst + i, (value >> (8 * i)) as u8);
        }
    }

    fn zero_immediate_from(&mut self, width: u64) {
        for i in width..REGISTER_SIZE {
            self.set_byte(IMMEDIATE_ADDRESS + i, 0);
        }
    }

    /// Emits one copy per `(source, field offset)` pair, each overwriting a
    /// byte of the instruction that follows them, then that instruction.
    /// Returns its address. `next` defaults to falling through.
    fn patched(&mut self, patches: &[(u64, u64)], src: u64, dst: u64, next: Option<u64>) -> u64 {
        let target = self.pos() + patches.len() as u64 * INSTRUCTION_SIZE;
        for &(from, offset) in patches {
            self.copy(from, target + offset);
        }
        debug_assert_eq!(self.pos(), target);
        let next = next.unwrap_or(target + INSTRUCTION_SIZE);
        self.instr(src, dst, next)
    }

    fn defer(&mut self, offset: u64, target: PatchTarget, location: Option<SourceLocation>) {
        self.pending.push(PendingPatch {
            offset,
            target,
            location,
        });
    }

    fn alloc_registers(&mut self, count: usize, location: Option<&SourceLocation>) -> Result<usize> {
        let base = self.next_register;
        let end = base
            .checked_add(count)
            .filter(|end| *end <= REGISTER_COUNT)
            .ok_or_else(|| Error::OutOfRegisters {
                limit: REGISTER_COUNT,
                location: location.cloned(),
            })?;
        self.next_register = end;
        self.stats.registers_used = self.stats.registers_used.max(end);
        Ok(base)
    }

    fn bind_label(&mut self, label: &Label) {
        let address = self.pos();
        label.set_address(address);
        if label.is_extern && label.name.trim_start_matches('.') == ENTRY_LABEL {
            match self.entry {
                // later @multi copies rebind the label but keep the entry
                Some(first) => debug!(
                    entry = format_args!("{:#x}", first),
                    address = format_args!("{:#x}", address),
                    "entry label placed again, keeping first"
                ),
                None => {
                    debug!(address = format_args!("{:#x}", address), "entry label placed");
                    self.entry = Some(address);
                    self.write_u64(ENTRY_ADDRESS, address);
                }
            }
        }
    }

    fn internal_label(&mut self, role: &str) -> LabelRef {
        self.internal_labels += 1;
        Label::internal(format!("{}.{}", role, self.internal_labels))
    }

    fn jump_to(&mut self, label: &LabelRef) {
        let at = self.instr(0, 0, 0);
        self.defer(at + NEXT_FIELD, PatchTarget::Label(label.clone()), None);
    }

    fn width_of(&self, ty: &Type, location: &SourceLocation) -> Result<u64> {
        ty.width()
            .map(|width| width as u64)
            .ok_or_else(|| Error::unimplemented(format!("sizeof `{}`", ty), location))
    }

    // =========================================================================
    // Table lookups
    // =========================================================================

    /// Replaces the low `width` bytes of the immediate register with 8 when
    /// they are all zero and 0 otherwise.
    ///
    /// Each byte is mapped through the logical-not page (zero → 8) and the
    /// results are summed into an accumulator that starts at `256 - 8 * width`,
    /// so the sum wraps to zero exactly when every byte was zero.
    fn logical_not(&mut self, width: u64, location: &SourceLocation) -> Result<()> {
        let width = width.clamp(1, REGISTER_SIZE);
        let mark = self.next_register;
        let scratch = register_address(self.alloc_registers(1, Some(location))?);
        let (acc, flag) = (scratch, scratch + 1);

        self.set_byte(acc, (256 - 8 * width) as u8);
        for i in 0..width {
            self.patched(&[(IMMEDIATE_ADDRESS + i, SRC_FIELD)], self.not_table, flag, None);
            self.patched(
                &[(acc, SRC_FIELD + 1), (flag, SRC_FIELD)],
                ADD_TABLE_ADDRESS,
                acc,
                None,
            );
        }
        self.patched(&[(acc, SRC_FIELD)], self.not_table, IMMEDIATE_ADDRESS, None);
        self.zero_immediate_from(1);

        self.next_register = mark;
        Ok(())
    }

    /// Jumps to `taken` when `cond` is non-zero and to `not_taken` otherwise.
    fn branch(&mut self, cond: &Expr, taken: &LabelRef, not_taken: &LabelRef) -> Result<()> {
        self.gen_expr(cond)?;
        let width = self.width_of(&cond.ty, &cond.location)?;
        self.logical_not(width, &cond.location)?;

        // imm[0] is now 0 when the condition holds and 8 otherwise: the
        // offset of the chosen target in the table.
        let table = self.jump_with_aligned_data(&[0; 16], 16);
        self.defer(table, PatchTarget::Label(taken.clone()), None);
        self.defer(table + ADDRESS_SIZE, PatchTarget::Label(not_taken.clone()), None);

        let low = table & 0xff;
        let jump = self.pos() + ADDRESS_SIZE * 3 * INSTRUCTION_SIZE;
        for i in 0..ADDRESS_SIZE {
            // select = table + i + imm[0]; the table is 16-aligned so only the
            // low address byte changes
            let select = self.pos() + 2 * INSTRUCTION_SIZE;
            self.patched(
                &[(IMMEDIATE_ADDRESS, SRC_FIELD)],
                ADD_TABLE_ADDRESS + ((low + i) << 8),
                select + SRC_FIELD,
                None,
            );
            self.instr(table + i, jump + NEXT_FIELD + i, select + INSTRUCTION_SIZE);
        }
        debug_assert_eq!(self.pos(), jump);
        self.instr(0, 0, 0);
        Ok(())
    }

    // =========================================================================
    // Expressions
    // =========================================================================

    /// Evaluates `expr` into the immediate register
    fn gen_expr(&mut self, expr: &Expr) -> Result<()> {
        match &expr.kind {
            ExprKind::Int(value) => self.set_bytes(IMMEDIATE_ADDRESS, *value, REGISTER_SIZE),
            ExprKind::Str(value) => {
                let pooled = self.pool_string(value);
                self.set_bytes(IMMEDIATE_ADDRESS, pooled.address as u128, ADDRESS_SIZE);
                self.set_bytes(
                    IMMEDIATE_ADDRESS + ADDRESS_SIZE,
                    pooled.len as u128,
                    ADDRESS_SIZE,
                );
            }
            ExprKind::Var(var) => {
                if let VarKind::Array { .. } = var.kind {
                    return Err(Error::unimplemented(
                        format!("array `{}` used as a value", var.name),
                        &expr.location,
                    ));
                }
                let register = var.register().ok_or_else(|| {
                    Error::internal(format!("variable `{}` has no register", var.name))
                })?;
                self.copy_range(register_address(register), IMMEDIATE_ADDRESS, REGISTER_SIZE);
            }
            ExprKind::Label(slot) => {
                let label = slot.target().cloned().ok_or_else(|| Error::UnresolvedLabel {
                    name: slot.name.clone(),
                    location: expr.location.clone(),
                })?;
                let data = self.jump_with_data(&[0; ADDRESS_SIZE as usize]);
                self.defer(data, PatchTarget::Label(label), Some(expr.location.clone()));
                self.copy_range(data, IMMEDIATE_ADDRESS, ADDRESS_SIZE);
                self.zero_immediate_from(ADDRESS_SIZE);
            }
            ExprKind::Cast(inner) => {
                self.gen_expr(inner)?;
                let width = self.width_of(&expr.ty, &expr.location)?;
                if width < REGISTER_SIZE {
                    self.zero_immediate_from(width);
                }
            }
            ExprKind::Unary { op, operand } => match op {
                UnaryOp::Plus => self.gen_expr(operand)?,
                UnaryOp::Not => {
                    self.gen_expr(operand)?;
                    let width = self.width_of(&operand.ty, &operand.location)?;
                    self.logical_not(width, &expr.location)?;
                }
                UnaryOp::Deref => {
                    self.gen_expr(operand)?;
                    self.patched(
                        &field_patches(IMMEDIATE_ADDRESS, SRC_FIELD),
                        0,
                        IMMEDIATE_ADDRESS,
                        None,
                    );
                    self.zero_immediate_from(1);
                }
                UnaryOp::Neg | UnaryOp::BitNot => {
                    return Err(Error::unimplemented(
                        format!("unary `{}`", op),
                        &expr.location,
                    ))
                }
            },
            ExprKind::Binary { op, lhs, rhs } => self.gen_binary(*op, lhs, rhs, expr)?,
            ExprKind::Index { .. } => {
                return Err(Error::unimplemented("array indexing", &expr.location))
            }
        }
        Ok(())
    }

    fn gen_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, expr: &Expr) -> Result<()> {
        let width = self.width_of(&expr.ty, &expr.location)?;
        if op != BinaryOp::Add {
            return Err(Error::unimplemented(
                format!("binary `{}`", op),
                &expr.location,
            ));
        }
        if width != 1 {
            return Err(Error::unimplemented(
                format!("`+` on {}-byte operands", width),
                &expr.location,
            ));
        }

        let mark = self.next_register;
        self.gen_expr(lhs)?;
        let saved = register_address(self.alloc_registers(1, Some(&expr.location))?);
        self.copy(IMMEDIATE_ADDRESS, saved);
        self.gen_expr(rhs)?;
        // ADD[a * 256 + b]: a patches address byte 1, b patches byte 0
        self.patched(
            &[(saved, SRC_FIELD + 1), (IMMEDIATE_ADDRESS, SRC_FIELD)],
            ADD_TABLE_ADDRESS,
            IMMEDIATE_ADDRESS,
            None,
        );
        self.zero_immediate_from(1);
        self.next_register = mark;
        Ok(())
    }

    // =========================================================================
    // Statements
    // =========================================================================

    fn emit_stmts(&mut self, stmts: &[Stmt]) -> Result<()> {
        for stmt in stmts {
            self.emit_stmt(stmt)?;
        }
        Ok(())
    }

    fn emit_stmt(&mut self, stmt: &Stmt) -> Result<()> {
        for label in &stmt.labels {
            self.bind_label(label);
        }
        trace!(at = self.pos(), location = %stmt.location, "emitting statement");

        match &stmt.kind {
            StmtKind::Empty => {}
            StmtKind::Import(import) => self.emit_import(import)?,
            StmtKind::Expr(expr) => self.gen_expr(expr)?,
            StmtKind::Goto(dest) => {
                self.gen_expr(dest)?;
                self.patched(&field_patches(IMMEDIATE_ADDRESS, NEXT_FIELD), 0, 0, Some(0));
            }
            StmtKind::Let { var, init } => {
                self.gen_expr(init)?;
                let register = self.alloc_registers(1, Some(&var.location))?;
                var.bind_register(register);
                self.copy_range(IMMEDIATE_ADDRESS, register_address(register), REGISTER_SIZE);
            }
            StmtKind::LetArray { var } => {
                let VarKind::Array { count } = var.kind else {
                    return Err(Error::internal(format!(
                        "`{}` declared as an array without a length",
                        var.name
                    )));
                };
                let base = self.alloc_registers(count, Some(&var.location))?;
                var.bind_register(base);
            }
            StmtKind::Assign { dst, src } => self.emit_store(dst, src)?,
            StmtKind::Block(body) => {
                let mark = self.next_register;
                let result = self.emit_stmts(body);
                self.next_register = mark;
                result?;
            }
            StmtKind::If {
                cond,
                then,
                otherwise,
            } => {
                let then_label = self.internal_label("if.then");
                let end_label = self.internal_label("if.end");
                match otherwise {
                    Some(otherwise) => {
                        let else_label = self.internal_label("if.else");
                        self.branch(cond, &then_label, &else_label)?;
                        self.bind_label(&then_label);
                        self.emit_stmt(then)?;
                        self.jump_to(&end_label);
                        self.bind_label(&else_label);
                        self.emit_stmt(otherwise)?;
                    }
                    None => {
                        self.branch(cond, &then_label, &end_label)?;
                        self.bind_label(&then_label);
                        self.emit_stmt(then)?;
                    }
                }
                self.bind_label(&end_label);
            }
            StmtKind::While {
                cond,
                body,
                is_do: false,
            } => {
                let top = self.internal_label("while.top");
                let body_label = self.internal_label("while.body");
                let end = self.internal_label("while.end");
                self.bind_label(&top);
                self.branch(cond, &body_label, &end)?;
                self.bind_label(&body_label);
                self.emit_stmt(body)?;
                self.jump_to(&top);
                self.bind_label(&end);
            }
            StmtKind::While {
                cond,
                body,
                is_do: true,
            } => {
                let top = self.internal_label("do.top");
                let end = self.internal_label("do.end");
                self.bind_label(&top);
                self.emit_stmt(body)?;
                self.branch(cond, &top, &end)?;
                self.bind_label(&end);
            }
            StmtKind::Bbj(values) => self.emit_raw_words(values)?,
        }
        Ok(())
    }

    fn emit_import(&mut self, import: &Import) -> Result<()> {
        let pragmas = import.program.pragmas;
        if !pragmas.multi && !self.emitted_imports.insert(import.identity.clone()) {
            debug!(file = %import.identity.display(), "import already emitted, skipping");
            return Ok(());
        }

        let align = pragmas.align;
        if align > 1 && self.pos() % align != 0 {
            let padding = (align - (self.pos() + INSTRUCTION_SIZE) % align) % align;
            self.jump_with_data(&vec![0; padding as usize]);
        }
        debug!(
            file = %import.identity.display(),
            at = format_args!("{:#x}", self.pos()),
            "emitting import"
        );
        self.emit_stmts(&import.program.statements)
    }

    /// `*pointer = value`: stores the low byte of `value`
    fn emit_store(&mut self, dst: &Expr, src: &Expr) -> Result<()> {
        let ExprKind::Unary {
            op: UnaryOp::Deref,
            operand: pointer,
        } = &dst.kind
        else {
            return Err(Error::UnsupportedLvalue {
                location: dst.location.clone(),
            });
        };

        let mark = self.next_register;
        self.gen_expr(pointer)?;
        let saved = register_address(self.alloc_registers(1, Some(&dst.location))?);
        self.copy_range(IMMEDIATE_ADDRESS, saved, ADDRESS_SIZE);
        self.gen_expr(src)?;
        self.patched(&field_patches(saved, DST_FIELD), IMMEDIATE_ADDRESS, 0, None);
        self.next_register = mark;
        Ok(())
    }

    /// `bbj { ... }`: each value becomes one 8-byte word in place
    fn emit_raw_words(&mut self, values: &[Expr]) -> Result<()> {
        let mut strings = Vec::new();
        for value in values {
            value.string_literals(&mut strings);
        }
        for string in strings {
            self.pool_string(string);
        }

        for value in values {
            let at = self.pos();
            if value.mentions_label() {
                self.defer(
                    at,
                    PatchTarget::Expr(value.clone()),
                    Some(value.location.clone()),
                );
                self.push_u64(0);
            } else {
                let word = const_eval::evaluate(value, &*self)?;
                self.push_u64(word as u64);
            }
        }
        Ok(())
    }

    fn backpatch(&mut self) -> Result<()> {
        let pending = std::mem::take(&mut self.pending);
        debug!(count = pending.len(), "backpatching");
        for patch in &pending {
            let value = match &patch.target {
                PatchTarget::Label(label) => label
                    .address()
                    .ok_or_else(|| unplaced(label, patch.location.as_ref()))?,
                PatchTarget::Expr(expr) => const_eval::evaluate(expr, &*self)? as u64,
            };
            self.write_u64(patch.offset, value);
        }
        self.stats.patches = pending.len();
        Ok(())
    }
}

impl Default for Codegen {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstEnv for Codegen {
    fn label_address(&self, label: &Label, location: &SourceLocation) -> Result<u128> {
        label
            .address()
            .map(u128::from)
            .ok_or_else(|| unplaced(label, Some(location)))
    }

    fn string_address(&self, value: &str, location: &SourceLocation) -> Result<u128> {
        self.string_pool
            .get(value)
            .map(|pooled| pooled.address as u128)
            .ok_or_else(|| Error::NotConstant {
                location: location.clone(),
            })
    }
}

/// Copies of the 8 bytes at `from` into an address field of the next instruction
fn field_patches(from: u64, field: u64) -> Vec<(u64, u64)> {
    (0..ADDRESS_SIZE).map(|i| (from + i, field + i)).collect()
}

fn unplaced(label: &Label, location: Option<&SourceLocation>) -> Error {
    match location.or(label.location.as_ref()) {
        Some(location) => Error::UnresolvedLabel {
            name: label.name.clone(),
            location: location.clone(),
        },
        None => Error::internal(format!("label `{}` was never placed", label.name)),
    }
}
