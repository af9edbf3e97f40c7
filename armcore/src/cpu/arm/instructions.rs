//! ARM instruction decoding.
//!
//! `ArmInstruction::from(u32)` turns a raw opcode into a tagged variant with
//! every field pulled out. Decode is total: encodings the architecture does
//! not define land in `Undefined`, which the execute stage turns into an
//! undefined-instruction exception.
//!
//! Overlapping patterns in the `000` space are resolved in priority order:
//! BX/BLX, SWP, multiply long, multiply, halfword transfer, PSR transfer,
//! then plain data processing.

use serde::{Deserialize, Serialize};

use crate::bitwise::{Bits, sign_extend};
use crate::cpu::condition::Condition;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, ReadWriteKind, ShiftKind,
};

/// The 16 data-processing opcodes, in encoding order.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum AluOpcode {
    And = 0x0,
    Eor = 0x1,
    Sub = 0x2,
    Rsb = 0x3,
    Add = 0x4,
    Adc = 0x5,
    Sbc = 0x6,
    Rsc = 0x7,
    Tst = 0x8,
    Teq = 0x9,
    Cmp = 0xA,
    Cmn = 0xB,
    Orr = 0xC,
    Mov = 0xD,
    Bic = 0xE,
    Mvn = 0xF,
}

impl AluOpcode {
    /// TST/TEQ/CMP/CMN write flags only, never a destination.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }
}

impl From<u32> for AluOpcode {
    fn from(value: u32) -> Self {
        match value & 0xF {
            0x0 => Self::And,
            0x1 => Self::Eor,
            0x2 => Self::Sub,
            0x3 => Self::Rsb,
            0x4 => Self::Add,
            0x5 => Self::Adc,
            0x6 => Self::Sbc,
            0x7 => Self::Rsc,
            0x8 => Self::Tst,
            0x9 => Self::Teq,
            0xA => Self::Cmp,
            0xB => Self::Cmn,
            0xC => Self::Orr,
            0xD => Self::Mov,
            0xE => Self::Bic,
            _ => Self::Mvn,
        }
    }
}

impl std::fmt::Display for AluOpcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::And => "AND",
            Self::Eor => "EOR",
            Self::Sub => "SUB",
            Self::Rsb => "RSB",
            Self::Add => "ADD",
            Self::Adc => "ADC",
            Self::Sbc => "SBC",
            Self::Rsc => "RSC",
            Self::Tst => "TST",
            Self::Teq => "TEQ",
            Self::Cmp => "CMP",
            Self::Cmn => "CMN",
            Self::Orr => "ORR",
            Self::Mov => "MOV",
            Self::Bic => "BIC",
            Self::Mvn => "MVN",
        })
    }
}

/// Where a register-operand shift amount comes from.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ShiftSource {
    /// 5-bit immediate in the instruction.
    Amount(u32),
    /// Low byte of a register.
    Register(u32),
}

/// The data-processing second operand.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum SecondOperand {
    /// 8-bit value rotated right by twice the 4-bit rotate field.
    Immediate { base: u32, rotate: u32 },
    Register {
        register: u32,
        shift_kind: ShiftKind,
        shift: ShiftSource,
    },
}

/// MRS/MSR sub-operations. The MSR forms carry the 4-bit field mask from
/// bits 19-16 (c/x/s/f).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum PsrOpKind {
    Mrs { destination: u32 },
    Msr { source: u32, field_mask: u32 },
    MsrImmediate { value: u32, field_mask: u32 },
}

/// Halfword/signed transfer offset (bit 22 selects the form).
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum HalfwordOffset {
    Immediate(u32),
    Register(u32),
}

/// LDR/STR offset: 12-bit immediate or immediate-shifted register.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum TransferOffset {
    Immediate(u32),
    Register {
        register: u32,
        shift_kind: ShiftKind,
        amount: u32,
    },
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum ArmOperation {
    DataProcessing {
        opcode: AluOpcode,
        set_flags: bool,
        rn: u32,
        rd: u32,
        operand2: SecondOperand,
    },
    PsrTransfer {
        kind: PsrOpKind,
        use_spsr: bool,
    },
    Multiply {
        accumulate: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    },
    MultiplyLong {
        signed: bool,
        accumulate: bool,
        set_flags: bool,
        rd_hi: u32,
        rd_lo: u32,
        rs: u32,
        rm: u32,
    },
    SingleDataSwap {
        byte: bool,
        rn: u32,
        rd: u32,
        rm: u32,
    },
    BranchAndExchange {
        link: bool,
        rm: u32,
    },
    HalfwordTransfer {
        kind: HalfwordTransferKind,
        load_store: LoadStoreKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        rn: u32,
        rd: u32,
        offset: HalfwordOffset,
    },
    SingleDataTransfer {
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        rn: u32,
        rd: u32,
        offset: TransferOffset,
    },
    BlockDataTransfer {
        load_store: LoadStoreKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        /// The S bit: user-bank transfer, or SPSR restore when PC loads.
        psr_force_user: bool,
        rn: u32,
        register_list: u16,
    },
    Branch {
        link: bool,
        /// BLX immediate (the `1111` condition space on v5 cores).
        exchange: bool,
        /// Byte offset relative to PC+8, already shifted and sign-extended.
        offset: i32,
    },
    /// MRC/MCR. The raw opcode rides along for host pass-through of
    /// coprocessors the core does not model.
    CoprocessorRegisterTransfer {
        direction: LoadStoreKind,
        coprocessor: u32,
        opcode1: u32,
        crn: u32,
        crm: u32,
        opcode2: u32,
        rd: u32,
        raw: u32,
    },
    /// CDP / LDC / STC, which this model does not execute.
    CoprocessorOther {
        coprocessor: u32,
        raw: u32,
    },
    SoftwareInterrupt {
        comment: u32,
    },
    Undefined {
        raw: u32,
    },
}

#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub struct ArmInstruction {
    pub condition: Condition,
    pub operation: ArmOperation,
}

impl From<u32> for ArmInstruction {
    fn from(op: u32) -> Self {
        let condition = Condition::from(op.get_bits(28..=31));
        // The 1111 condition space holds unconditional extension encodings;
        // the only one modeled is BLX immediate.
        if condition == Condition::NV && op.get_bits(25..=27) == 0b101 {
            let half = u32::from(op.get_bit(24));
            let offset = (sign_extend(op.get_bits(0..=23), 24) << 2) | (half << 1) as i32;
            return Self {
                condition: Condition::AL,
                operation: ArmOperation::Branch {
                    link: true,
                    exchange: true,
                    offset,
                },
            };
        }

        let operation = match op.get_bits(25..=27) {
            0b000 => decode_000(op),
            0b001 => decode_001(op),
            0b010 => decode_single_transfer(op),
            0b011 => {
                if op.get_bit(4) {
                    ArmOperation::Undefined { raw: op }
                } else {
                    decode_single_transfer(op)
                }
            }
            0b100 => ArmOperation::BlockDataTransfer {
                load_store: op.get_bit(20).into(),
                indexing: op.get_bit(24).into(),
                offsetting: op.get_bit(23).into(),
                write_back: op.get_bit(21),
                psr_force_user: op.get_bit(22),
                rn: op.get_bits(16..=19),
                register_list: op.get_bits(0..=15) as u16,
            },
            0b101 => ArmOperation::Branch {
                link: op.get_bit(24),
                exchange: false,
                offset: sign_extend(op.get_bits(0..=23), 24) << 2,
            },
            0b110 => ArmOperation::CoprocessorOther {
                coprocessor: op.get_bits(8..=11),
                raw: op,
            },
            _ => {
                if op.get_bit(24) {
                    ArmOperation::SoftwareInterrupt {
                        comment: op.get_bits(0..=23),
                    }
                } else if op.get_bit(4) {
                    ArmOperation::CoprocessorRegisterTransfer {
                        direction: op.get_bit(20).into(),
                        coprocessor: op.get_bits(8..=11),
                        opcode1: op.get_bits(21..=23),
                        crn: op.get_bits(16..=19),
                        crm: op.get_bits(0..=3),
                        opcode2: op.get_bits(5..=7),
                        rd: op.get_bits(12..=15),
                        raw: op,
                    }
                } else {
                    ArmOperation::CoprocessorOther {
                        coprocessor: op.get_bits(8..=11),
                        raw: op,
                    }
                }
            }
        };

        Self {
            condition,
            operation,
        }
    }
}

fn decode_000(op: u32) -> ArmOperation {
    // BX / BLX register: fixed 0001_0010_1111_1111_1111 core.
    if op.get_bits(8..=27) == 0b0001_0010_1111_1111_1111 {
        match op.get_bits(4..=7) {
            0b0001 => {
                return ArmOperation::BranchAndExchange {
                    link: false,
                    rm: op.get_bits(0..=3),
                };
            }
            0b0011 => {
                return ArmOperation::BranchAndExchange {
                    link: true,
                    rm: op.get_bits(0..=3),
                };
            }
            _ => {}
        }
    }

    if op.get_bits(4..=7) == 0b1001 {
        return match op.get_bits(23..=24) {
            0b00 => ArmOperation::Multiply {
                accumulate: op.get_bit(21),
                set_flags: op.get_bit(20),
                rd: op.get_bits(16..=19),
                rn: op.get_bits(12..=15),
                rs: op.get_bits(8..=11),
                rm: op.get_bits(0..=3),
            },
            0b01 => ArmOperation::MultiplyLong {
                signed: op.get_bit(22),
                accumulate: op.get_bit(21),
                set_flags: op.get_bit(20),
                rd_hi: op.get_bits(16..=19),
                rd_lo: op.get_bits(12..=15),
                rs: op.get_bits(8..=11),
                rm: op.get_bits(0..=3),
            },
            0b10 if op.get_bits(20..=21) == 0 && op.get_bits(8..=11) == 0 => {
                ArmOperation::SingleDataSwap {
                    byte: op.get_bit(22),
                    rn: op.get_bits(16..=19),
                    rd: op.get_bits(12..=15),
                    rm: op.get_bits(0..=3),
                }
            }
            _ => ArmOperation::Undefined { raw: op },
        };
    }

    // Halfword / signed transfer: bit 7 and bit 4 set, SH != 00.
    if op.get_bit(7) && op.get_bit(4) {
        let sh = op.get_bits(5..=6);
        if sh == 0 {
            return ArmOperation::Undefined { raw: op };
        }
        let offset = if op.get_bit(22) {
            HalfwordOffset::Immediate((op.get_bits(8..=11) << 4) | op.get_bits(0..=3))
        } else {
            HalfwordOffset::Register(op.get_bits(0..=3))
        };
        return ArmOperation::HalfwordTransfer {
            kind: sh.into(),
            load_store: op.get_bit(20).into(),
            indexing: op.get_bit(24).into(),
            offsetting: op.get_bit(23).into(),
            write_back: op.get_bit(21),
            rn: op.get_bits(16..=19),
            rd: op.get_bits(12..=15),
            offset,
        };
    }

    // A comparison opcode without S is a PSR transfer.
    if op.get_bits(23..=24) == 0b10 && !op.get_bit(20) {
        let use_spsr = op.get_bit(22);
        if !op.get_bit(21) {
            return ArmOperation::PsrTransfer {
                kind: PsrOpKind::Mrs {
                    destination: op.get_bits(12..=15),
                },
                use_spsr,
            };
        }
        return ArmOperation::PsrTransfer {
            kind: PsrOpKind::Msr {
                source: op.get_bits(0..=3),
                field_mask: op.get_bits(16..=19),
            },
            use_spsr,
        };
    }

    let shift = if op.get_bit(4) {
        ShiftSource::Register(op.get_bits(8..=11))
    } else {
        ShiftSource::Amount(op.get_bits(7..=11))
    };
    ArmOperation::DataProcessing {
        opcode: op.get_bits(21..=24).into(),
        set_flags: op.get_bit(20),
        rn: op.get_bits(16..=19),
        rd: op.get_bits(12..=15),
        operand2: SecondOperand::Register {
            register: op.get_bits(0..=3),
            shift_kind: op.get_bits(5..=6).into(),
            shift,
        },
    }
}

fn decode_001(op: u32) -> ArmOperation {
    // Immediate-form MSR lives in the comparison-without-S hole.
    if op.get_bits(23..=24) == 0b10 && !op.get_bit(20) {
        if op.get_bit(21) {
            return ArmOperation::PsrTransfer {
                kind: PsrOpKind::MsrImmediate {
                    value: op
                        .get_bits(0..=7)
                        .rotate_right(op.get_bits(8..=11) * 2),
                    field_mask: op.get_bits(16..=19),
                },
                use_spsr: op.get_bit(22),
            };
        }
        // MRS has no immediate form.
        return ArmOperation::Undefined { raw: op };
    }

    ArmOperation::DataProcessing {
        opcode: op.get_bits(21..=24).into(),
        set_flags: op.get_bit(20),
        rn: op.get_bits(16..=19),
        rd: op.get_bits(12..=15),
        operand2: SecondOperand::Immediate {
            base: op.get_bits(0..=7),
            rotate: op.get_bits(8..=11) * 2,
        },
    }
}

fn decode_single_transfer(op: u32) -> ArmOperation {
    let offset = if op.get_bit(25) {
        TransferOffset::Register {
            register: op.get_bits(0..=3),
            shift_kind: op.get_bits(5..=6).into(),
            amount: op.get_bits(7..=11),
        }
    } else {
        TransferOffset::Immediate(op.get_bits(0..=11))
    };
    ArmOperation::SingleDataTransfer {
        load_store: op.get_bit(20).into(),
        quantity: op.get_bit(22).into(),
        indexing: op.get_bit(24).into(),
        offsetting: op.get_bit(23).into(),
        write_back: op.get_bit(21),
        rn: op.get_bits(16..=19),
        rd: op.get_bits(12..=15),
        offset,
    }
}

impl std::fmt::Display for ArmInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cond = self.condition;
        match &self.operation {
            ArmOperation::DataProcessing {
                opcode,
                set_flags,
                rn,
                rd,
                operand2,
            } => {
                let s = if *set_flags && !opcode.is_comparison() {
                    "S"
                } else {
                    ""
                };
                write!(f, "{opcode}{cond}{s} ")?;
                if opcode.is_comparison() {
                    write!(f, "R{rn}, ")?;
                } else {
                    write!(f, "R{rd}, ")?;
                    if !matches!(opcode, AluOpcode::Mov | AluOpcode::Mvn) {
                        write!(f, "R{rn}, ")?;
                    }
                }
                match operand2 {
                    SecondOperand::Immediate { base, rotate } => {
                        write!(f, "#0x{:X}", base.rotate_right(*rotate))
                    }
                    SecondOperand::Register {
                        register,
                        shift_kind,
                        shift,
                    } => {
                        write!(f, "R{register}")?;
                        match shift {
                            ShiftSource::Amount(0) => Ok(()),
                            ShiftSource::Amount(n) => write!(f, ", {shift_kind} #{n}"),
                            ShiftSource::Register(rs) => write!(f, ", {shift_kind} R{rs}"),
                        }
                    }
                }
            }
            ArmOperation::PsrTransfer { kind, use_spsr } => {
                let psr = if *use_spsr { "SPSR" } else { "CPSR" };
                match kind {
                    PsrOpKind::Mrs { destination } => {
                        write!(f, "MRS{cond} R{destination}, {psr}")
                    }
                    PsrOpKind::Msr { source, .. } => write!(f, "MSR{cond} {psr}, R{source}"),
                    PsrOpKind::MsrImmediate { value, .. } => {
                        write!(f, "MSR{cond} {psr}, #0x{value:X}")
                    }
                }
            }
            ArmOperation::Multiply {
                accumulate,
                rd,
                rn,
                rs,
                rm,
                ..
            } => {
                if *accumulate {
                    write!(f, "MLA{cond} R{rd}, R{rm}, R{rs}, R{rn}")
                } else {
                    write!(f, "MUL{cond} R{rd}, R{rm}, R{rs}")
                }
            }
            ArmOperation::MultiplyLong {
                signed,
                accumulate,
                rd_hi,
                rd_lo,
                rs,
                rm,
                ..
            } => {
                let name = match (signed, accumulate) {
                    (false, false) => "UMULL",
                    (false, true) => "UMLAL",
                    (true, false) => "SMULL",
                    (true, true) => "SMLAL",
                };
                write!(f, "{name}{cond} R{rd_lo}, R{rd_hi}, R{rm}, R{rs}")
            }
            ArmOperation::SingleDataSwap { byte, rn, rd, rm } => {
                let b = if *byte { "B" } else { "" };
                write!(f, "SWP{cond}{b} R{rd}, R{rm}, [R{rn}]")
            }
            ArmOperation::BranchAndExchange { link, rm } => {
                let l = if *link { "L" } else { "" };
                write!(f, "B{l}X{cond} R{rm}")
            }
            ArmOperation::HalfwordTransfer {
                kind,
                load_store,
                rn,
                rd,
                ..
            } => {
                let op = match load_store {
                    LoadStoreKind::Load => "LDR",
                    LoadStoreKind::Store => "STR",
                };
                let suffix = match kind {
                    HalfwordTransferKind::UnsignedHalfword => "H",
                    HalfwordTransferKind::SignedByte => "SB",
                    HalfwordTransferKind::SignedHalfword => "SH",
                };
                write!(f, "{op}{cond}{suffix} R{rd}, [R{rn}, ...]")
            }
            ArmOperation::SingleDataTransfer {
                load_store,
                quantity,
                rn,
                rd,
                ..
            } => {
                let op = match load_store {
                    LoadStoreKind::Load => "LDR",
                    LoadStoreKind::Store => "STR",
                };
                let b = match quantity {
                    ReadWriteKind::Byte => "B",
                    ReadWriteKind::Word => "",
                };
                write!(f, "{op}{cond}{b} R{rd}, [R{rn}, ...]")
            }
            ArmOperation::BlockDataTransfer {
                load_store,
                rn,
                register_list,
                ..
            } => {
                let op = match load_store {
                    LoadStoreKind::Load => "LDM",
                    LoadStoreKind::Store => "STM",
                };
                write!(f, "{op}{cond} R{rn}, {{{register_list:#06X}}}")
            }
            ArmOperation::Branch {
                link, exchange, offset, ..
            } => {
                let name = match (link, exchange) {
                    (_, true) => "BLX",
                    (true, false) => "BL",
                    (false, false) => "B",
                };
                write!(f, "{name}{cond} #{offset}")
            }
            ArmOperation::CoprocessorRegisterTransfer {
                direction,
                coprocessor,
                crn,
                crm,
                opcode2,
                rd,
                ..
            } => {
                let op = match direction {
                    LoadStoreKind::Load => "MRC",
                    LoadStoreKind::Store => "MCR",
                };
                write!(f, "{op}{cond} p{coprocessor}, R{rd}, c{crn}, c{crm}, {opcode2}")
            }
            ArmOperation::CoprocessorOther { coprocessor, raw } => {
                write!(f, "COP{cond} p{coprocessor} ({raw:08X})")
            }
            ArmOperation::SoftwareInterrupt { comment } => {
                write!(f, "SWI{cond} #0x{comment:X}")
            }
            ArmOperation::Undefined { raw } => write!(f, "UND ({raw:08X})"),
        }
    }
}
