//! The 16-bit Thumb instruction set: decode and execute.

pub mod instructions;
pub mod operations;
