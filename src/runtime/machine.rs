use tracing::{debug, trace};

use crate::compiler::image::{
    register_address, MachineImage, ADDRESS_SIZE, DST_FIELD, ENTRY_ADDRESS, IMMEDIATE_ADDRESS,
    NEXT_FIELD, REGISTER_SIZE, SRC_FIELD,
};
use crate::error::{Error, Result};

/// Zeroed memory appended after the image
pub const SCRATCH_SIZE: usize = 0x10000;

/// Step budget used by [`MoveMachine::run_to_halt`]
pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// Outcome of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    /// The instruction jumped to itself
    Halted,
}

/// Byte-byte-jump interpreter
///
/// Each step reads the three address fields at `pc`, copies
/// `memory[src]` to `memory[dst]` and continues at `next`. All three
/// fields are read before the copy, so an instruction that overwrites
/// itself takes effect the next time it runs.
#[derive(Debug, Clone)]
pub struct MoveMachine {
    memory: Vec<u8>,
    pc: u64,
    steps: u64,
    halted: bool,
}

impl MoveMachine {
    /// Loads `image` followed by [`SCRATCH_SIZE`] zero bytes and starts at
    /// its entry address
    pub fn new(image: &MachineImage) -> Self {
        Self::from_bytes(image.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut memory = Vec::with_capacity(bytes.len() + SCRATCH_SIZE);
        memory.extend_from_slice(bytes);
        memory.resize(bytes.len() + SCRATCH_SIZE, 0);
        let mut machine = MoveMachine {
            memory,
            pc: 0,
            steps: 0,
            halted: false,
        };
        machine.pc = machine.read_u64(ENTRY_ADDRESS).unwrap_or(0);
        machine
    }

    /// Executes one instruction
    pub fn step(&mut self) -> Result<Step> {
        if self.halted {
            return Ok(Step::Halted);
        }
        let pc = self.pc;
        let src = self.field(pc, SRC_FIELD)?;
        let dst = self.field(pc, DST_FIELD)?;
        let next = self.field(pc, NEXT_FIELD)?;

        let byte = *self.byte_at(src).ok_or(Error::MachineFault { pc, address: src })?;
        *self
            .byte_at_mut(dst)
            .ok_or(Error::MachineFault { pc, address: dst })? = byte;
        trace!(pc, src, dst, next, byte, "step");

        self.steps += 1;
        if next == pc {
            self.halted = true;
            return Ok(Step::Halted);
        }
        self.pc = next;
        Ok(Step::Continue)
    }

    /// Runs until the machine halts; returns the number of steps taken
    pub fn run(&mut self, limit: u64) -> Result<u64> {
        while !self.halted {
            if self.steps >= limit {
                return Err(Error::StepLimitExceeded { limit });
            }
            self.step()?;
        }
        debug!(steps = self.steps, pc = self.pc, "machine halted");
        Ok(self.steps)
    }

    pub fn run_to_halt(&mut self) -> Result<u64> {
        self.run(DEFAULT_STEP_LIMIT)
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Little-endian word at `address`
    pub fn read_u64(&self, address: u64) -> Option<u64> {
        let bytes = self.slice(address, ADDRESS_SIZE)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(bytes);
        Some(u64::from_le_bytes(word))
    }

    /// Contents of register `n`
    pub fn register(&self, n: usize) -> Option<u128> {
        self.read_u128(register_address(n))
    }

    /// Contents of the immediate register
    pub fn immediate(&self) -> Option<u128> {
        self.read_u128(IMMEDIATE_ADDRESS)
    }

    /// `len` bytes starting at `address`
    pub fn slice(&self, address: u64, len: u64) -> Option<&[u8]> {
        let start = usize::try_from(address).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.memory.get(start..end)
    }

    fn read_u128(&self, address: u64) -> Option<u128> {
        let bytes = self.slice(address, REGISTER_SIZE)?;
        let mut word = [0u8; 16];
        word.copy_from_slice(bytes);
        Some(u128::from_le_bytes(word))
    }

    fn field(&self, pc: u64, offset: u64) -> Result<u64> {
        let address = pc.wrapping_add(offset);
        self.read_u64(address)
            .ok_or(Error::MachineFault { pc, address })
    }

    fn byte_at(&self, address: u64) -> Option<&u8> {
        self.memory.get(usize::try_from(address).ok()?)
    }

    fn byte_at_mut(&mut self, address: u64) -> Option<&mut u8> {
        self.memory.get_mut(usize::try_from(address).ok()?)
    }
}
