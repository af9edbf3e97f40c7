//! Thumb instruction decoding.
//!
//! All 19 encoding formats, keyed on the top bits of the halfword. Decode is
//! total; the gaps (format 2 with both op bits clear is real, but e.g. the
//! `1011` miscellaneous space has holes) land in `Undefined`.

use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, sign_extend};
use crate::cpu::condition::Condition;
use crate::cpu::flags::{LoadStoreKind, ReadWriteKind, ShiftKind};

/// Format 4 register-register ALU operations, in encoding order.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ThumbAluOp {
    And = 0x0,
    Eor = 0x1,
    Lsl = 0x2,
    Lsr = 0x3,
    Asr = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Ror = 0x7,
    Tst = 0x8,
    Neg = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mul = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl From<u16> for ThumbAluOp {
    fn from(value: u16) -> Self {
        match value & 0xF {
            0x0 => Self::And,
            0x1 => Self::Eor,
            0x2 => Self::Lsl,
            0x3 => Self::Lsr,
            0x4 => Self::Asr,
            0x5 => Self::Adc,
            0x6 => Self::Sbc,
            0x7 => Self::Ror,
            0x8 => Self::Tst,
            0x9 => Self::Neg,
            0xA => Self::Cmp,
            0xB => Self::Cmn,
            0xC => Self::Orr,
            0xD => Self::Mul,
            0xE => Self::Bic,
            _ => Self::Mvn,
        }
    }
}

/// Format 3 immediate operations.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ImmediateOp {
    Mov,
    Cmp,
    Add,
    Sub,
}

/// Format 5 high-register operations (BX/BLX are split out).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum HiRegisterOp {
    Add,
    Cmp,
    Mov,
}

/// Format 2 second operand.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ThreeOpOperand {
    Register(u32),
    Immediate(u32),
}

/// Format 8 load/store with sign extension (the H/S bit pairs).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum SignExtendedKind {
    StoreHalfword,
    LoadSignedByte,
    LoadHalfword,
    LoadSignedHalfword,
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ThumbInstruction {
    /// Format 1: LSL/LSR/ASR by immediate.
    ShiftImmediate {
        kind: ShiftKind,
        amount: u32,
        rs: u32,
        rd: u32,
    },
    /// Format 2: three-operand ADD/SUB.
    AddSubtract {
        subtract: bool,
        operand: ThreeOpOperand,
        rs: u32,
        rd: u32,
    },
    /// Format 3: MOV/CMP/ADD/SUB with an 8-bit immediate.
    AluImmediate {
        op: ImmediateOp,
        rd: u32,
        value: u32,
    },
    /// Format 4.
    AluRegister {
        op: ThumbAluOp,
        rs: u32,
        rd: u32,
    },
    /// Format 5: ADD/CMP/MOV across the high registers.
    HiRegister {
        op: HiRegisterOp,
        rs: u32,
        rd: u32,
    },
    /// Format 5: BX / BLX register.
    BranchExchange {
        link: bool,
        rm: u32,
    },
    /// Format 6: LDR rd, [PC, #imm].
    LoadPcRelative {
        rd: u32,
        offset: u32,
    },
    /// Format 7: word/byte with register offset.
    TransferRegisterOffset {
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        ro: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 8: halfword/signed with register offset.
    TransferSignExtended {
        kind: SignExtendedKind,
        ro: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 9: word/byte with 5-bit immediate offset (scaled for words).
    TransferImmediateOffset {
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        offset: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 10: halfword with immediate offset.
    TransferHalfword {
        load_store: LoadStoreKind,
        offset: u32,
        rb: u32,
        rd: u32,
    },
    /// Format 11: SP-relative word transfer.
    TransferSpRelative {
        load_store: LoadStoreKind,
        rd: u32,
        offset: u32,
    },
    /// Format 12: ADD rd, PC/SP, #imm.
    LoadAddress {
        from_sp: bool,
        rd: u32,
        offset: u32,
    },
    /// Format 13: SP += / -= imm.
    AdjustStackPointer {
        negative: bool,
        offset: u32,
    },
    /// Format 14: PUSH {rlist, LR} / POP {rlist, PC}.
    PushPop {
        load_store: LoadStoreKind,
        /// Store LR (push) or load PC (pop).
        pc_lr: bool,
        register_list: u8,
    },
    /// Format 15: LDMIA/STMIA rb!, {rlist}.
    TransferMultiple {
        load_store: LoadStoreKind,
        rb: u32,
        register_list: u8,
    },
    /// Format 16.
    ConditionalBranch {
        condition: Condition,
        /// Byte offset relative to PC+4, already doubled and sign-extended.
        offset: i32,
    },
    /// Format 17.
    SoftwareInterrupt {
        comment: u32,
    },
    /// Format 18.
    Branch {
        offset: i32,
    },
    /// Format 19, first half: LR = PC + (offset << 12).
    LongBranchPrefix {
        offset_high: i32,
    },
    /// Format 19, second half: branch and link (H=11), or BLX to ARM state
    /// on v5 (H=01).
    LongBranchSuffix {
        exchange: bool,
        offset_low: u32,
    },
    Undefined {
        raw: u16,
    },
}

impl From<u16> for ThumbInstruction {
    fn from(op: u16) -> Self {
        let rd = u32::from(op.get_bits(0..=2));
        let rs = u32::from(op.get_bits(3..=5));

        match op.get_bits(13..=15) {
            0b000 => {
                if op.get_bits(11..=12) == 0b11 {
                    // Format 2.
                    let value = u32::from(op.get_bits(6..=8));
                    let operand = if op.get_bit(10) {
                        ThreeOpOperand::Immediate(value)
                    } else {
                        ThreeOpOperand::Register(value)
                    };
                    Self::AddSubtract {
                        subtract: op.get_bit(9),
                        operand,
                        rs,
                        rd,
                    }
                } else {
                    Self::ShiftImmediate {
                        kind: u32::from(op.get_bits(11..=12)).into(),
                        amount: u32::from(op.get_bits(6..=10)),
                        rs,
                        rd,
                    }
                }
            }
            0b001 => {
                let rd = u32::from(op.get_bits(8..=10));
                let op3 = match op.get_bits(11..=12) {
                    0b00 => ImmediateOp::Mov,
                    0b01 => ImmediateOp::Cmp,
                    0b10 => ImmediateOp::Add,
                    _ => ImmediateOp::Sub,
                };
                Self::AluImmediate {
                    op: op3,
                    rd,
                    value: u32::from(op.get_bits(0..=7)),
                }
            }
            0b010 => decode_010(op, rs, rd),
            0b011 => {
                // Format 9; words scale the 5-bit offset by 4.
                let quantity: ReadWriteKind = op.get_bit(12).into();
                let offset = u32::from(op.get_bits(6..=10));
                let offset = match quantity {
                    ReadWriteKind::Word => offset << 2,
                    ReadWriteKind::Byte => offset,
                };
                Self::TransferImmediateOffset {
                    load_store: op.get_bit(11).into(),
                    quantity,
                    offset,
                    rb: rs,
                    rd,
                }
            }
            0b100 => {
                if op.get_bit(12) {
                    // Format 11.
                    Self::TransferSpRelative {
                        load_store: op.get_bit(11).into(),
                        rd: u32::from(op.get_bits(8..=10)),
                        offset: u32::from(op.get_bits(0..=7)) << 2,
                    }
                } else {
                    // Format 10.
                    Self::TransferHalfword {
                        load_store: op.get_bit(11).into(),
                        offset: u32::from(op.get_bits(6..=10)) << 1,
                        rb: rs,
                        rd,
                    }
                }
            }
            0b101 => decode_101(op),
            0b110 => {
                if op.get_bit(12) {
                    let condition_bits = u32::from(op.get_bits(8..=11));
                    match condition_bits {
                        // 1110 is undefined, 1111 is SWI.
                        0b1110 => Self::Undefined { raw: op },
                        0b1111 => Self::SoftwareInterrupt {
                            comment: u32::from(op.get_bits(0..=7)),
                        },
                        _ => Self::ConditionalBranch {
                            condition: condition_bits.into(),
                            offset: sign_extend(u32::from(op.get_bits(0..=7)), 8) << 1,
                        },
                    }
                } else {
                    // Format 15.
                    Self::TransferMultiple {
                        load_store: op.get_bit(11).into(),
                        rb: u32::from(op.get_bits(8..=10)),
                        register_list: op.get_bits(0..=7) as u8,
                    }
                }
            }
            _ => match op.get_bits(11..=12) {
                0b00 => Self::Branch {
                    offset: sign_extend(u32::from(op.get_bits(0..=10)), 11) << 1,
                },
                // 11101: BLX suffix (halfword-aligned target, bit 0 clear).
                0b01 => {
                    if op.get_bit(0) {
                        Self::Undefined { raw: op }
                    } else {
                        Self::LongBranchSuffix {
                            exchange: true,
                            offset_low: u32::from(op.get_bits(0..=10)) << 1,
                        }
                    }
                }
                0b10 => Self::LongBranchPrefix {
                    offset_high: sign_extend(u32::from(op.get_bits(0..=10)), 11) << 12,
                },
                _ => Self::LongBranchSuffix {
                    exchange: false,
                    offset_low: u32::from(op.get_bits(0..=10)) << 1,
                },
            },
        }
    }
}

fn decode_010(op: u16, rs: u32, rd: u32) -> ThumbInstruction {
    if !op.get_bit(12) {
        if !op.get_bit(11) {
            if !op.get_bit(10) {
                // Format 4.
                return ThumbInstruction::AluRegister {
                    op: op.get_bits(6..=9).into(),
                    rs,
                    rd,
                };
            }
            // Format 5: H bits extend rs/rd to the full register range.
            let rs = rs | (u32::from(op.get_bit(6)) << 3);
            let rd = rd | (u32::from(op.get_bit(7)) << 3);
            return match op.get_bits(8..=9) {
                0b00 => ThumbInstruction::HiRegister {
                    op: HiRegisterOp::Add,
                    rs,
                    rd,
                },
                0b01 => ThumbInstruction::HiRegister {
                    op: HiRegisterOp::Cmp,
                    rs,
                    rd,
                },
                0b10 => ThumbInstruction::HiRegister {
                    op: HiRegisterOp::Mov,
                    rs,
                    rd,
                },
                _ => ThumbInstruction::BranchExchange {
                    link: op.get_bit(7),
                    rm: rs,
                },
            };
        }
        // Format 6.
        return ThumbInstruction::LoadPcRelative {
            rd: u32::from(op.get_bits(8..=10)),
            offset: u32::from(op.get_bits(0..=7)) << 2,
        };
    }

    let ro = u32::from(op.get_bits(6..=8));
    if op.get_bit(9) {
        // Format 8.
        let kind = match op.get_bits(10..=11) {
            0b00 => SignExtendedKind::StoreHalfword,
            0b01 => SignExtendedKind::LoadSignedByte,
            0b10 => SignExtendedKind::LoadHalfword,
            _ => SignExtendedKind::LoadSignedHalfword,
        };
        ThumbInstruction::TransferSignExtended {
            kind,
            ro,
            rb: rs,
            rd,
        }
    } else {
        // Format 7.
        ThumbInstruction::TransferRegisterOffset {
            load_store: op.get_bit(11).into(),
            quantity: op.get_bit(10).into(),
            ro,
            rb: rs,
            rd,
        }
    }
}

fn decode_101(op: u16) -> ThumbInstruction {
    if !op.get_bit(12) {
        // Format 12.
        return ThumbInstruction::LoadAddress {
            from_sp: op.get_bit(11),
            rd: u32::from(op.get_bits(8..=10)),
            offset: u32::from(op.get_bits(0..=7)) << 2,
        };
    }
    if op.get_bits(8..=11) == 0b0000 {
        // Format 13.
        return ThumbInstruction::AdjustStackPointer {
            negative: op.get_bit(7),
            offset: u32::from(op.get_bits(0..=6)) << 2,
        };
    }
    if op.get_bits(9..=10) == 0b10 {
        // Format 14.
        return ThumbInstruction::PushPop {
            load_store: op.get_bit(11).into(),
            pc_lr: op.get_bit(8),
            register_list: op.get_bits(0..=7) as u8,
        };
    }
    ThumbInstruction::Undefined { raw: op }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn decode(op: u16) -> ThumbInstruction {
        ThumbInstruction::from(op)
    }

    #[test]
    fn shift_immediate() {
        // LSL R0, R1, #4
        assert_eq!(
            decode(0x0108),
            ThumbInstruction::ShiftImmediate {
                kind: ShiftKind::Lsl,
                amount: 4,
                rs: 1,
                rd: 0,
            }
        );
        // ASR R2, R3, #31
        assert_eq!(
            decode(0x17DA),
            ThumbInstruction::ShiftImmediate {
                kind: ShiftKind::Asr,
                amount: 31,
                rs: 3,
                rd: 2,
            }
        );
    }

    #[test]
    fn add_subtract_three_operand() {
        // ADD R0, R1, R2
        assert_eq!(
            decode(0x1888),
            ThumbInstruction::AddSubtract {
                subtract: false,
                operand: ThreeOpOperand::Register(2),
                rs: 1,
                rd: 0,
            }
        );
        // SUB R4, R5, #7
        assert_eq!(
            decode(0x1FEC),
            ThumbInstruction::AddSubtract {
                subtract: true,
                operand: ThreeOpOperand::Immediate(7),
                rs: 5,
                rd: 4,
            }
        );
    }

    #[test]
    fn immediate_ops() {
        // MOV R3, #0x7F
        assert_eq!(
            decode(0x237F),
            ThumbInstruction::AluImmediate {
                op: ImmediateOp::Mov,
                rd: 3,
                value: 0x7F,
            }
        );
        // SUB R1, #1
        assert_eq!(
            decode(0x3901),
            ThumbInstruction::AluImmediate {
                op: ImmediateOp::Sub,
                rd: 1,
                value: 1,
            }
        );
    }

    #[test]
    fn alu_register() {
        // MUL R0, R7
        assert_eq!(
            decode(0x4378),
            ThumbInstruction::AluRegister {
                op: ThumbAluOp::Mul,
                rs: 7,
                rd: 0,
            }
        );
        // NEG R1, R2
        assert_eq!(
            decode(0x4251),
            ThumbInstruction::AluRegister {
                op: ThumbAluOp::Neg,
                rs: 2,
                rd: 1,
            }
        );
    }

    #[test]
    fn hi_register_and_bx() {
        // ADD R1, R8 (H2 set on rs)
        assert_eq!(
            decode(0x4441),
            ThumbInstruction::HiRegister {
                op: HiRegisterOp::Add,
                rs: 8,
                rd: 1,
            }
        );
        // MOV PC, R14
        assert_eq!(
            decode(0x46F7),
            ThumbInstruction::HiRegister {
                op: HiRegisterOp::Mov,
                rs: 14,
                rd: 15,
            }
        );
        // BX R3
        assert_eq!(
            decode(0x4718),
            ThumbInstruction::BranchExchange { link: false, rm: 3 }
        );
        // BLX R3
        assert_eq!(
            decode(0x4798),
            ThumbInstruction::BranchExchange { link: true, rm: 3 }
        );
    }

    #[test]
    fn loads_and_stores() {
        // LDR R2, [PC, #0x40]
        assert_eq!(
            decode(0x4A10),
            ThumbInstruction::LoadPcRelative {
                rd: 2,
                offset: 0x40
            }
        );
        // STR R0, [R1, R2]
        assert_eq!(
            decode(0x5088),
            ThumbInstruction::TransferRegisterOffset {
                load_store: LoadStoreKind::Store,
                quantity: ReadWriteKind::Word,
                ro: 2,
                rb: 1,
                rd: 0,
            }
        );
        // LDRSH R3, [R4, R5]
        assert_eq!(
            decode(0x5F63),
            ThumbInstruction::TransferSignExtended {
                kind: SignExtendedKind::LoadSignedHalfword,
                ro: 5,
                rb: 4,
                rd: 3,
            }
        );
        // LDR R1, [R2, #0x14] (imm5 = 5, scaled by 4)
        assert_eq!(
            decode(0x6951),
            ThumbInstruction::TransferImmediateOffset {
                load_store: LoadStoreKind::Load,
                quantity: ReadWriteKind::Word,
                offset: 0x14,
                rb: 2,
                rd: 1,
            }
        );
        // STRB R1, [R2, #5] (bytes are unscaled)
        assert_eq!(
            decode(0x7151),
            ThumbInstruction::TransferImmediateOffset {
                load_store: LoadStoreKind::Store,
                quantity: ReadWriteKind::Byte,
                offset: 5,
                rb: 2,
                rd: 1,
            }
        );
        // LDRH R0, [R1, #6]
        assert_eq!(
            decode(0x88C8),
            ThumbInstruction::TransferHalfword {
                load_store: LoadStoreKind::Load,
                offset: 6,
                rb: 1,
                rd: 0,
            }
        );
        // STR R5, [SP, #0x20]
        assert_eq!(
            decode(0x9508),
            ThumbInstruction::TransferSpRelative {
                load_store: LoadStoreKind::Store,
                rd: 5,
                offset: 0x20,
            }
        );
    }

    #[test]
    fn address_and_stack() {
        // ADD R2, PC, #0x28
        assert_eq!(
            decode(0xA20A),
            ThumbInstruction::LoadAddress {
                from_sp: false,
                rd: 2,
                offset: 0x28,
            }
        );
        // SUB SP, #0x18
        assert_eq!(
            decode(0xB086),
            ThumbInstruction::AdjustStackPointer {
                negative: true,
                offset: 0x18,
            }
        );
        // PUSH {R0-R2, LR}
        assert_eq!(
            decode(0xB507),
            ThumbInstruction::PushPop {
                load_store: LoadStoreKind::Store,
                pc_lr: true,
                register_list: 0x07,
            }
        );
        // POP {R4, PC}
        assert_eq!(
            decode(0xBD10),
            ThumbInstruction::PushPop {
                load_store: LoadStoreKind::Load,
                pc_lr: true,
                register_list: 0x10,
            }
        );
        // LDMIA R3!, {R0, R1}
        assert_eq!(
            decode(0xCB03),
            ThumbInstruction::TransferMultiple {
                load_store: LoadStoreKind::Load,
                rb: 3,
                register_list: 0x03,
            }
        );
    }

    #[test]
    fn branches() {
        // BEQ #-4 (offset field 0xFE)
        assert_eq!(
            decode(0xD0FE),
            ThumbInstruction::ConditionalBranch {
                condition: Condition::EQ,
                offset: -4,
            }
        );
        // SWI #0x12
        assert_eq!(
            decode(0xDF12),
            ThumbInstruction::SoftwareInterrupt { comment: 0x12 }
        );
        // B #+8
        assert_eq!(decode(0xE004), ThumbInstruction::Branch { offset: 8 });
        // BL pair: prefix then suffix.
        assert_eq!(
            decode(0xF000),
            ThumbInstruction::LongBranchPrefix { offset_high: 0 }
        );
        assert_eq!(
            decode(0xF801),
            ThumbInstruction::LongBranchSuffix {
                exchange: false,
                offset_low: 2,
            }
        );
        // BLX suffix (bit 0 must be clear).
        assert_eq!(
            decode(0xE802),
            ThumbInstruction::LongBranchSuffix {
                exchange: true,
                offset_low: 4,
            }
        );
        assert_eq!(decode(0xE801), ThumbInstruction::Undefined { raw: 0xE801 });
    }

    #[test]
    fn undefined_holes() {
        // 0xDE00: condition field 1110.
        assert_eq!(decode(0xDE00), ThumbInstruction::Undefined { raw: 0xDE00 });
        // 0xB100: a hole in the misc space.
        assert_eq!(decode(0xB100), ThumbInstruction::Undefined { raw: 0xB100 });
    }

    #[test]
    fn decode_is_total() {
        for op in 0..=u16::MAX {
            let _ = ThumbInstruction::from(op);
        }
    }
}
