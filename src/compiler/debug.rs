//! Debug utilities for generated images
//!
//! Tools for inspecting the layout and the statically reachable code of a
//! [`MachineImage`]. Code rewrites its own address fields at run time, so a
//! static trace shows the instructions as laid out, before any patching.

use std::collections::HashSet;
use std::fmt::Write as _;

use super::image::{
    ImageLayout, MachineImage, ADD_TABLE_SIZE, ENTRY_ADDRESS, IMMEDIATE_ADDRESS,
    INSTRUCTION_SIZE, NEXT_FIELD, NOT_TABLE_SIZE, REGISTER_SIZE, STACK_POINTER_ADDRESS,
};

/// Symbolic name for `address` where it falls in a fixed region
pub fn describe_address(address: u64, layout: &ImageLayout) -> String {
    if address < STACK_POINTER_ADDRESS {
        return format!("entry+{}", address - ENTRY_ADDRESS);
    }
    if address < IMMEDIATE_ADDRESS {
        return format!("sp+{}", address - STACK_POINTER_ADDRESS);
    }
    if address < IMMEDIATE_ADDRESS + REGISTER_SIZE {
        return format!("imm+{}", address - IMMEDIATE_ADDRESS);
    }
    if address < layout.add_table {
        let register = address / REGISTER_SIZE - 2;
        return format!("r{}+{}", register, address % REGISTER_SIZE);
    }
    if address < layout.add_table + ADD_TABLE_SIZE {
        let offset = address - layout.add_table;
        return format!("add[{}][{}]", offset >> 8, offset & 0xff);
    }
    if address >= layout.not_table && address < layout.not_table + NOT_TABLE_SIZE {
        return format!("not[{}]", address - layout.not_table);
    }
    format!("{:#x}", address)
}

/// One instruction as `address: dst <- src  -> next`
pub fn format_instruction(address: u64, src: u64, dst: u64, next: u64, layout: &ImageLayout) -> String {
    if next == address {
        return format!("{:08x}: halt", address);
    }
    if src == 0 && dst == 0 {
        return format!("{:08x}: jmp {:#x}", address, next);
    }
    let flow = if next == address + INSTRUCTION_SIZE {
        String::new()
    } else {
        format!("  -> {:#x}", next)
    };
    format!(
        "{:08x}: {} <- {}{}",
        address,
        describe_address(dst, layout),
        describe_address(src, layout),
        flow
    )
}

/// Follows `next` fields from the entry point, one line per instruction.
///
/// Stops at the halt, at an instruction already listed, at a jump whose target
/// is filled in at run time (zero), or after `max` instructions.
pub fn disassemble(image: &MachineImage, max: usize) -> Vec<String> {
    let layout = image.layout();
    let mut lines = Vec::new();
    let mut seen = HashSet::new();
    let mut pc = image.entry();

    while lines.len() < max && seen.insert(pc) {
        let fields = (
            image.read_u64(pc),
            image.read_u64(pc + 8),
            image.read_u64(pc + NEXT_FIELD),
        );
        let (Some(src), Some(dst), Some(next)) = fields else {
            lines.push(format!("{:08x}: <outside image>", pc));
            break;
        };
        lines.push(format_instruction(pc, src, dst, next, &layout));
        if next == pc || next == 0 {
            break;
        }
        pc = next;
    }
    lines
}

/// Layout summary followed by a trace of the first `max` instructions
pub fn render_image(image: &MachineImage, max: usize) -> String {
    let layout = image.layout();
    let mut out = String::new();
    let _ = writeln!(out, "size:       {} bytes", image.len());
    let _ = writeln!(out, "entry:      {:#x}", image.entry());
    let _ = writeln!(out, "add table:  {:#x}", layout.add_table);
    let _ = writeln!(out, "not table:  {:#x}", layout.not_table);
    let _ = writeln!(out, "code:       {:#x}..{:#x}", layout.code_start, layout.halt + INSTRUCTION_SIZE);
    for line in disassemble(image, max) {
        let _ = writeln!(out, "{}", line);
    }
    out
}

/// Print an image summary and trace to stdout
pub fn dump_image(image: &MachineImage, max: usize) {
    println!("═══════════════════════════════════════════════════════════");
    println!("                    IMAGE DUMP");
    println!("═══════════════════════════════════════════════════════════");
    print!("{}", render_image(image, max));
    println!("═══════════════════════════════════════════════════════════\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::codegen::generate;
    use crate::compiler::resolver::resolve;
    use crate::parser::ast::{Expr, Program, Stmt};
    use crate::parser::MemoryLoader;
    use std::path::Path;

    fn layout() -> ImageLayout {
        ImageLayout {
            add_table: 0x10000,
            not_table: 0x20000,
            code_start: 0x20100,
            halt: 0x20100,
        }
    }

    #[test]
    fn test_describe_address() {
        let layout = layout();
        assert_eq!(describe_address(0, &layout), "entry+0");
        assert_eq!(describe_address(9, &layout), "sp+1");
        assert_eq!(describe_address(16, &layout), "imm+0");
        assert_eq!(describe_address(31, &layout), "imm+15");
        assert_eq!(describe_address(32, &layout), "r0+0");
        assert_eq!(describe_address(50, &layout), "r1+2");
        assert_eq!(describe_address(0x10000 + 3 * 256 + 5, &layout), "add[3][5]");
        assert_eq!(describe_address(0x20001, &layout), "not[1]");
        assert_eq!(describe_address(0x20200, &layout), "0x20200");
    }

    #[test]
    fn test_format_instruction() {
        let layout = layout();
        assert_eq!(format_instruction(0x20100, 0, 0, 0x20100, &layout), "00020100: halt");
        assert_eq!(format_instruction(0x20100, 0, 0, 0x20200, &layout), "00020100: jmp 0x20200");
        assert_eq!(
            format_instruction(0x20100, 0x20120, 16, 0x20118, &layout),
            "00020100: imm+0 <- 0x20120"
        );
        assert_eq!(
            format_instruction(0x20100, 16, 32, 0x20400, &layout),
            "00020100: r0+0 <- imm+0  -> 0x20400"
        );
    }

    #[test]
    fn test_disassemble_follows_code() {
        let program = resolve(
            &Program::new(vec![Stmt::let_var("x", Expr::cast("n8", Expr::int(1))).into()]),
            &[],
            Path::new("main.bbj"),
            &MemoryLoader::new(),
        )
        .unwrap();
        let image = generate(&program).unwrap();
        let lines = disassemble(&image, 10_000);
        assert!(lines.first().unwrap().starts_with("00020100: jmp"));
        assert!(lines.last().unwrap().ends_with("halt"));
        assert!(lines.iter().any(|line| line.contains("r0+15 <- imm+15")));

        let truncated = disassemble(&image, 3);
        assert_eq!(truncated.len(), 3);

        let rendered = render_image(&image, 5);
        assert!(rendered.contains("entry:      0x20100"));
    }
}
