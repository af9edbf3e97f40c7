//! The 16 registers visible at any one time.
//!
//! R15 is the program counter; it holds the address of the *currently
//! executing* instruction. Operand reads of R15 apply the pipeline offset
//! (+8 in ARM state, +4 in Thumb state) at the use site. The banked
//! physical slots behind R8-R14 live in
//! [`RegisterBank`](super::register_bank::RegisterBank).

use serde::{Deserialize, Serialize};

/// Stack pointer index.
pub const REG_SP: u32 = 0xD;

/// Link register index.
pub const REG_LR: u32 = 0xE;

/// Program counter index.
pub const REG_PROGRAM_COUNTER: u32 = 0xF;

/// The currently-visible register file.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Registers([u32; 16]);

impl Registers {
    #[must_use]
    pub const fn program_counter(&self) -> u32 {
        self.0[15]
    }

    pub const fn set_program_counter(&mut self, new_value: u32) {
        self.0[15] = new_value;
    }

    pub const fn advance_program_counter(&mut self, bytes: u32) {
        self.0[15] = self.0[15].wrapping_add(bytes);
    }

    #[must_use]
    pub const fn register_at(&self, reg: u32) -> u32 {
        self.0[reg as usize]
    }

    pub const fn set_register_at(&mut self, reg: u32, new_value: u32) {
        self.0[reg as usize] = new_value;
    }

    pub const fn reset(&mut self) {
        self.0 = [0; 16];
    }
}
