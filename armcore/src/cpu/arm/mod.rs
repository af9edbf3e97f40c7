//! The 32-bit ARM instruction set: decode and execute.

pub mod instructions;
pub mod operations;
