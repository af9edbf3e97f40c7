//! ARM conditional execution.
//!
//! Every ARM instruction carries a 4-bit condition field in bits 31-28 that
//! is tested against the CPSR flags before dispatch. A failed condition
//! turns the instruction into a no-op that still costs one cycle and still
//! advances the program counter. In Thumb state only conditional branches
//! carry a condition.

use serde::{Deserialize, Serialize};

/// The 16 ARM condition codes.
///
/// `NV` (0xF) never executes on architecture revisions below 5; revision 5
/// repurposes the 0xF space for unconditional extension encodings (BLX
/// immediate), which the decoder recognizes before the condition gate runs.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum Condition {
    /// Equal (Z=1)
    EQ = 0x0,
    /// Not equal (Z=0)
    NE = 0x1,
    /// Carry set / unsigned higher or same (C=1)
    CS = 0x2,
    /// Carry clear / unsigned lower (C=0)
    CC = 0x3,
    /// Minus / negative (N=1)
    MI = 0x4,
    /// Plus / positive or zero (N=0)
    PL = 0x5,
    /// Overflow set (V=1)
    VS = 0x6,
    /// Overflow clear (V=0)
    VC = 0x7,
    /// Unsigned higher (C=1 and Z=0)
    HI = 0x8,
    /// Unsigned lower or same (C=0 or Z=1)
    LS = 0x9,
    /// Signed greater or equal (N=V)
    GE = 0xA,
    /// Signed less than (N≠V)
    LT = 0xB,
    /// Signed greater than (Z=0 and N=V)
    GT = 0xC,
    /// Signed less or equal (Z=1 or N≠V)
    LE = 0xD,
    /// Always
    AL = 0xE,
    /// Never / extension space
    NV = 0xF,
}

impl From<u32> for Condition {
    fn from(value: u32) -> Self {
        match value & 0xF {
            0x0 => Self::EQ,
            0x1 => Self::NE,
            0x2 => Self::CS,
            0x3 => Self::CC,
            0x4 => Self::MI,
            0x5 => Self::PL,
            0x6 => Self::VS,
            0x7 => Self::VC,
            0x8 => Self::HI,
            0x9 => Self::LS,
            0xA => Self::GE,
            0xB => Self::LT,
            0xC => Self::GT,
            0xD => Self::LE,
            0xE => Self::AL,
            _ => Self::NV,
        }
    }
}

impl std::fmt::Display for Condition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EQ => f.write_str("EQ"),
            Self::NE => f.write_str("NE"),
            Self::CS => f.write_str("CS"),
            Self::CC => f.write_str("CC"),
            Self::MI => f.write_str("MI"),
            Self::PL => f.write_str("PL"),
            Self::VS => f.write_str("VS"),
            Self::VC => f.write_str("VC"),
            Self::HI => f.write_str("HI"),
            Self::LS => f.write_str("LS"),
            Self::GE => f.write_str("GE"),
            Self::LT => f.write_str("LT"),
            Self::GT => f.write_str("GT"),
            Self::LE => f.write_str("LE"),
            Self::AL => Ok(()),
            Self::NV => f.write_str("NV"),
        }
    }
}
