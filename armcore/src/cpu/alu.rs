//! Arithmetic flag algebra and the barrel shifter.
//!
//! Carry and overflow are derived with the same bit algebra the hardware
//! carry chain implements, not by widening to 64 bits: carry-out of
//! `a + b (+ cin)` is the majority function `(a&b) | (a&!r) | (b&!r)` at bit
//! 31, and subtraction reuses it through `a + !b + cin` with the ARM "C =
//! not borrow" convention. The formulas hold for any carry-in, which is what
//! makes ADC/SBC/RSC fall out of the same two functions.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::flags::ShiftKind;

/// Value plus the C/V outcomes of an arithmetic operation.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct AluResult {
    pub value: u32,
    pub carry: bool,
    pub overflow: bool,
}

/// `a + b + carry_in`, with carry-out and signed overflow.
#[must_use]
pub const fn add_with_carry(a: u32, b: u32, carry_in: bool) -> AluResult {
    let r = a.wrapping_add(b).wrapping_add(carry_in as u32);
    AluResult {
        value: r,
        carry: ((a & b) | (a & !r) | (b & !r)) >> 31 != 0,
        overflow: (!(a ^ b) & (a ^ r)) >> 31 != 0,
    }
}

/// `a - b - !carry_in`, with C = "no borrow" and signed overflow.
///
/// Plain SUB/RSB/CMP pass `carry_in = true`; SBC/RSC pass the current C
/// flag.
#[must_use]
pub const fn sub_with_carry(a: u32, b: u32, carry_in: bool) -> AluResult {
    let r = a.wrapping_sub(b).wrapping_sub(!carry_in as u32);
    AluResult {
        value: r,
        carry: ((a & !b) | (a & !r) | (!b & !r)) >> 31 != 0,
        overflow: ((a ^ b) & (a ^ r)) >> 31 != 0,
    }
}

/// Shifter output: the shifted value and the carry-out that logical ALU
/// operations move into C.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct ShiftResult {
    pub value: u32,
    pub carry: bool,
}

/// Barrel shift with an amount taken from the instruction's 5-bit immediate
/// field. Amount 0 encodes the special cases: LSL#0 passes the value through
/// untouched, LSR#0/ASR#0 mean a shift by 32, and ROR#0 is RRX.
#[must_use]
pub fn shift_immediate(kind: ShiftKind, amount: u32, value: u32, carry_in: bool) -> ShiftResult {
    debug_assert!(amount < 32);
    match (kind, amount) {
        (ShiftKind::Lsl, 0) => ShiftResult {
            value,
            carry: carry_in,
        },
        (ShiftKind::Lsr | ShiftKind::Asr, 0) => shift_register(kind, 32, value, carry_in),
        (ShiftKind::Ror, 0) => ShiftResult {
            // RRX: rotate right through carry by one.
            value: (value >> 1) | (u32::from(carry_in) << 31),
            carry: value.get_bit(0),
        },
        _ => shift_register(kind, amount, value, carry_in),
    }
}

/// Barrel shift with an amount taken from a register. Only the low 8 bits
/// of the register take part; a zero amount leaves value and carry alone.
#[must_use]
pub fn shift_register(kind: ShiftKind, amount: u32, value: u32, carry_in: bool) -> ShiftResult {
    let amount = amount & 0xFF;
    if amount == 0 {
        return ShiftResult {
            value,
            carry: carry_in,
        };
    }

    match kind {
        ShiftKind::Lsl => match amount {
            1..=31 => ShiftResult {
                value: value << amount,
                carry: value.get_bit(32 - amount),
            },
            32 => ShiftResult {
                value: 0,
                carry: value.get_bit(0),
            },
            _ => ShiftResult {
                value: 0,
                carry: false,
            },
        },
        ShiftKind::Lsr => match amount {
            1..=31 => ShiftResult {
                value: value >> amount,
                carry: value.get_bit(amount - 1),
            },
            32 => ShiftResult {
                value: 0,
                carry: value.get_bit(31),
            },
            _ => ShiftResult {
                value: 0,
                carry: false,
            },
        },
        ShiftKind::Asr => match amount {
            1..=31 => ShiftResult {
                value: ((value as i32) >> amount) as u32,
                carry: value.get_bit(amount - 1),
            },
            // ASR by 32 or more fills with the sign bit everywhere.
            _ => ShiftResult {
                value: ((value as i32) >> 31) as u32,
                carry: value.get_bit(31),
            },
        },
        ShiftKind::Ror => {
            let rot = amount % 32;
            if rot == 0 {
                // A multiple of 32: value unchanged, carry from bit 31.
                ShiftResult {
                    value,
                    carry: value.get_bit(31),
                }
            } else {
                ShiftResult {
                    value: value.rotate_right(rot),
                    carry: value.get_bit(rot - 1),
                }
            }
        }
    }
}
