//! Small decode enums shared by the ARM and Thumb instruction sets.

use serde::{Deserialize, Serialize};

/// Single data transfer quantity (bit 22 of LDR/STR encodings).
#[derive(Debug, Default, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ReadWriteKind {
    #[default]
    Word,
    Byte,
}

impl From<bool> for ReadWriteKind {
    fn from(value: bool) -> Self {
        if value { Self::Byte } else { Self::Word }
    }
}

/// Transfer direction (the L bit).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum LoadStoreKind {
    Store,
    Load,
}

impl From<bool> for LoadStoreKind {
    fn from(b: bool) -> Self {
        if b { Self::Load } else { Self::Store }
    }
}

/// Whether the offset is applied before or after the transfer (the P bit).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Indexing {
    /// Add offset after transfer.
    Post,
    /// Add offset before transfer.
    Pre,
}

impl From<bool> for Indexing {
    fn from(state: bool) -> Self {
        if state { Self::Pre } else { Self::Post }
    }
}

/// Whether the offset is added to or subtracted from the base (the U bit).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Offsetting {
    /// Subtract the offset from base.
    Down,
    /// Add the offset to base.
    Up,
}

impl From<bool> for Offsetting {
    fn from(state: bool) -> Self {
        if state { Self::Up } else { Self::Down }
    }
}

/// The four barrel-shifter operations. ROR by zero encodes RRX.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ShiftKind {
    Lsl = 0b00,
    Lsr = 0b01,
    Asr = 0b10,
    Ror = 0b11,
}

impl From<u32> for ShiftKind {
    fn from(value: u32) -> Self {
        match value & 0b11 {
            0b00 => Self::Lsl,
            0b01 => Self::Lsr,
            0b10 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

impl std::fmt::Display for ShiftKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lsl => f.write_str("LSL"),
            Self::Lsr => f.write_str("LSR"),
            Self::Asr => f.write_str("ASR"),
            Self::Ror => f.write_str("ROR"),
        }
    }
}

/// Halfword / signed transfer sub-kind (the S and H bits).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum HalfwordTransferKind {
    UnsignedHalfword,
    SignedByte,
    SignedHalfword,
}

impl From<u32> for HalfwordTransferKind {
    fn from(sh: u32) -> Self {
        match sh & 0b11 {
            0b01 => Self::UnsignedHalfword,
            0b10 => Self::SignedByte,
            0b11 => Self::SignedHalfword,
            _ => unreachable!("SH=00 decodes as SWP/multiply, not a halfword transfer"),
        }
    }
}
