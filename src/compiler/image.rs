//! Memory image layout and the finished image.
//!
//! ```text
//! 0x00000  entry address (8 bytes)
//! 0x00008  stack pointer slot (8 bytes, reserved)
//! 0x00010  immediate register (16 bytes)
//! 0x00020  register file, 16 bytes per register
//! 0x10000  addition table: ADD[a * 256 + b] = (a + b) & 0xff
//! 0x20000  logical-not page: NOT[0] = 8, all other bytes 0
//! 0x20100  code, constant stubs and inline data
//! ```

use std::io::{self, Write};

/// Size of one instruction: source, destination and next address
pub const INSTRUCTION_SIZE: u64 = 24;
/// Size of an address field
pub const ADDRESS_SIZE: u64 = 8;

/// Byte offsets of the fields of an instruction
pub const SRC_FIELD: u64 = 0;
pub const DST_FIELD: u64 = 8;
pub const NEXT_FIELD: u64 = 16;

/// Word holding the address execution starts at
pub const ENTRY_ADDRESS: u64 = 0;
/// Reserved for a future stack pointer
pub const STACK_POINTER_ADDRESS: u64 = 8;
/// Expression results are computed here
pub const IMMEDIATE_ADDRESS: u64 = 16;
/// Width of the immediate register and of every register slot
pub const REGISTER_SIZE: u64 = 16;

/// Base of the 256x256 addition table
pub const ADD_TABLE_ADDRESS: u64 = 0x10000;
/// Size of the addition table
pub const ADD_TABLE_SIZE: u64 = 0x10000;
/// Size of the logical-not page
pub const NOT_TABLE_SIZE: u64 = 256;

/// Largest `@align` a file may request
pub const MAX_ALIGN: u64 = ADD_TABLE_SIZE;

/// Value of a logical-not of zero; every other input yields 0
pub const TRUTHY_SENTINEL: u8 = 8;

/// Register slots between the header and the addition table
pub const REGISTER_COUNT: usize = (ADD_TABLE_ADDRESS / REGISTER_SIZE) as usize - 2;

/// Address of register `n`
pub fn register_address(n: usize) -> u64 {
    (n as u64 + 2) * REGISTER_SIZE
}

/// Rounds `value` up to a multiple of `align`
pub fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Where the fixed regions of an image ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLayout {
    pub add_table: u64,
    pub not_table: u64,
    pub code_start: u64,
    /// Address of the final self-jump
    pub halt: u64,
}

/// Finished memory image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineImage {
    bytes: Vec<u8>,
    layout: ImageLayout,
}

impl MachineImage {
    pub(crate) fn new(bytes: Vec<u8>, layout: ImageLayout) -> Self {
        MachineImage { bytes, layout }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn layout(&self) -> ImageLayout {
        self.layout
    }

    /// Address execution starts at
    pub fn entry(&self) -> u64 {
        self.read_u64(ENTRY_ADDRESS).unwrap_or(0)
    }

    /// Little-endian word at `address`, if it lies inside the image
    pub fn read_u64(&self, address: u64) -> Option<u64> {
        let start = usize::try_from(address).ok()?;
        let bytes = self.bytes.get(start..start.checked_add(8)?)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Some(u64::from_le_bytes(word))
    }

    /// Image as decimal 64-bit words, one per line; a trailing partial word
    /// is zero-padded
    pub fn to_text(&self) -> String {
        let mut text = String::with_capacity(self.bytes.len() * 2);
        for chunk in self.bytes.chunks(8) {
            let mut word = [0u8; 8];
            word[..chunk.len()].copy_from_slice(chunk);
            text.push_str(&u64::from_le_bytes(word).to_string());
            text.push('\n');
        }
        text
    }

    /// Writes the raw bytes
    pub fn write_to<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.bytes)
    }
}
