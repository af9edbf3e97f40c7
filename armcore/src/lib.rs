//! Cycle-approximate ARM7/ARM9 instruction set emulation.
//!
//! The crate models the user-visible core: both instruction sets, the
//! banked register file, the CP15 system coprocessor with its two-level
//! MMU, tightly-coupled memories and the seven-exception priority
//! machine. Memory and devices live behind the host-provided [`Bus`];
//! drive the core with [`ArmCore::run`] and the input lines of
//! [`ArmCore::set_input_line`].

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
pub mod bitwise;

pub mod bus;

#[allow(clippy::cast_possible_truncation)]
#[allow(clippy::cast_sign_loss)]
#[allow(clippy::cast_possible_wrap)]
#[allow(clippy::unreadable_literal)]
pub mod cpu;

#[allow(clippy::missing_panics_doc)]
#[allow(clippy::unreadable_literal)]
pub mod mmu;

pub use bus::Bus;
pub use cpu::core::{AccessIntent, ArmCore, CoreConfig, CoreFeatures};
pub use cpu::exception::InputLine;
pub use mmu::MemoryFault;
