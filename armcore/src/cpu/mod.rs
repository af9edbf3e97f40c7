//! The processor model: registers, modes, decode and execute for both
//! instruction sets, the exception machine and the prefetch buffer.

pub mod alu;
pub mod arm;
pub mod condition;
pub mod core;
pub mod exception;
pub mod flags;
pub mod modes;
pub mod prefetch;
pub mod psr;
pub mod register_bank;
pub mod registers;
pub mod thumb;
