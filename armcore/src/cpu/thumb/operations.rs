//! Thumb instruction execution.
//!
//! Same return convention as the ARM side: `Some(bytes)` advances PC,
//! `None` means the instruction branched. Thumb data-processing always
//! sets flags, so there is no S bit to thread through.

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::cpu::alu::{add_with_carry, shift_immediate, shift_register, sub_with_carry};
use crate::cpu::core::ArmCore;
use crate::cpu::exception::InputLine;
use crate::cpu::flags::{LoadStoreKind, ReadWriteKind, ShiftKind};
use crate::cpu::psr::CpuState;
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER, REG_SP};
use crate::cpu::thumb::instructions::{
    HiRegisterOp, ImmediateOp, SignExtendedKind, ThreeOpOperand, ThumbAluOp, ThumbInstruction,
};

/// Per-class cycle costs, aligned with the ARM table.
pub(crate) const fn class_cycles(instruction: &ThumbInstruction) -> u32 {
    match instruction {
        ThumbInstruction::ConditionalBranch { .. }
        | ThumbInstruction::Branch { .. }
        | ThumbInstruction::BranchExchange { .. }
        | ThumbInstruction::LongBranchSuffix { .. }
        | ThumbInstruction::SoftwareInterrupt { .. }
        | ThumbInstruction::Undefined { .. } => 3,
        ThumbInstruction::AluRegister {
            op: ThumbAluOp::Mul,
            ..
        }
        | ThumbInstruction::PushPop { .. }
        | ThumbInstruction::TransferMultiple { .. } => 4,
        ThumbInstruction::LoadPcRelative { .. }
        | ThumbInstruction::TransferRegisterOffset {
            load_store: LoadStoreKind::Load,
            ..
        }
        | ThumbInstruction::TransferImmediateOffset {
            load_store: LoadStoreKind::Load,
            ..
        }
        | ThumbInstruction::TransferHalfword {
            load_store: LoadStoreKind::Load,
            ..
        }
        | ThumbInstruction::TransferSpRelative {
            load_store: LoadStoreKind::Load,
            ..
        } => 2,
        ThumbInstruction::TransferSignExtended { kind, .. } => match kind {
            SignExtendedKind::StoreHalfword => 1,
            _ => 2,
        },
        _ => 1,
    }
}

impl ArmCore {
    pub(crate) fn execute_thumb(
        &mut self,
        bus: &mut impl Bus,
        instruction: ThumbInstruction,
    ) -> Option<u32> {
        match instruction {
            ThumbInstruction::ShiftImmediate {
                kind,
                amount,
                rs,
                rd,
            } => {
                let result = shift_immediate(
                    kind,
                    amount,
                    self.registers.register_at(rs),
                    self.cpsr.carry_flag(),
                );
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_logical_flags(result.value);
                self.cpsr.set_carry_flag(result.carry);
                Some(2)
            }
            ThumbInstruction::AddSubtract {
                subtract,
                operand,
                rs,
                rd,
            } => {
                let a = self.registers.register_at(rs);
                let b = match operand {
                    ThreeOpOperand::Register(r) => self.registers.register_at(r),
                    ThreeOpOperand::Immediate(value) => value,
                };
                let result = if subtract {
                    sub_with_carry(a, b, true)
                } else {
                    add_with_carry(a, b, false)
                };
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_arithmetic_flags(result);
                Some(2)
            }
            ThumbInstruction::AluImmediate { op, rd, value } => {
                let a = self.registers.register_at(rd);
                match op {
                    ImmediateOp::Mov => {
                        self.registers.set_register_at(rd, value);
                        self.cpsr.set_logical_flags(value);
                    }
                    ImmediateOp::Cmp => {
                        self.cpsr
                            .set_arithmetic_flags(sub_with_carry(a, value, true));
                    }
                    ImmediateOp::Add => {
                        let result = add_with_carry(a, value, false);
                        self.registers.set_register_at(rd, result.value);
                        self.cpsr.set_arithmetic_flags(result);
                    }
                    ImmediateOp::Sub => {
                        let result = sub_with_carry(a, value, true);
                        self.registers.set_register_at(rd, result.value);
                        self.cpsr.set_arithmetic_flags(result);
                    }
                }
                Some(2)
            }
            ThumbInstruction::AluRegister { op, rs, rd } => self.thumb_alu(op, rs, rd),
            ThumbInstruction::HiRegister { op, rs, rd } => {
                let b = self.thumb_operand(rs);
                match op {
                    // ADD and MOV across high registers leave the flags alone.
                    HiRegisterOp::Add => {
                        let value = self.thumb_operand(rd).wrapping_add(b);
                        self.thumb_write_destination(rd, value)
                    }
                    HiRegisterOp::Cmp => {
                        let result = sub_with_carry(self.thumb_operand(rd), b, true);
                        self.cpsr.set_arithmetic_flags(result);
                        Some(2)
                    }
                    HiRegisterOp::Mov => self.thumb_write_destination(rd, b),
                }
            }
            ThumbInstruction::BranchExchange { link, rm } => {
                if link && self.revision() < 5 {
                    return self.thumb_undefined();
                }
                let target = self.thumb_operand(rm);
                if link {
                    let pc = self.registers.program_counter();
                    self.registers
                        .set_register_at(REG_LR, pc.wrapping_add(2) | 1);
                }
                let thumb = target.get_bit(0);
                self.cpsr.set_cpu_state(thumb.into());
                self.force_dispatch_refresh();
                self.registers
                    .set_program_counter(target & if thumb { !1 } else { !3 });
                None
            }
            ThumbInstruction::LoadPcRelative { rd, offset } => {
                let base = self.registers.program_counter().wrapping_add(4) & !3;
                let Some(value) =
                    self.read_word(bus, base.wrapping_add(offset), self.privileged())
                else {
                    return Some(2);
                };
                self.registers.set_register_at(rd, value);
                Some(2)
            }
            ThumbInstruction::TransferRegisterOffset {
                load_store,
                quantity,
                ro,
                rb,
                rd,
            } => {
                let address = self
                    .registers
                    .register_at(rb)
                    .wrapping_add(self.registers.register_at(ro));
                self.thumb_transfer(bus, load_store, quantity, address, rd)
            }
            ThumbInstruction::TransferSignExtended { kind, ro, rb, rd } => {
                let address = self
                    .registers
                    .register_at(rb)
                    .wrapping_add(self.registers.register_at(ro));
                self.thumb_sign_extended(bus, kind, address, rd)
            }
            ThumbInstruction::TransferImmediateOffset {
                load_store,
                quantity,
                offset,
                rb,
                rd,
            } => {
                let address = self.registers.register_at(rb).wrapping_add(offset);
                self.thumb_transfer(bus, load_store, quantity, address, rd)
            }
            ThumbInstruction::TransferHalfword {
                load_store,
                offset,
                rb,
                rd,
            } => {
                let address = self.registers.register_at(rb).wrapping_add(offset) & !1;
                let privileged = self.privileged();
                match load_store {
                    LoadStoreKind::Load => {
                        let Some(value) = self.read_half(bus, address, privileged) else {
                            return Some(2);
                        };
                        self.registers.set_register_at(rd, u32::from(value));
                    }
                    LoadStoreKind::Store => {
                        let value = self.registers.register_at(rd) as u16;
                        if self.write_half(bus, address, value, privileged).is_none() {
                            return Some(2);
                        }
                    }
                }
                Some(2)
            }
            ThumbInstruction::TransferSpRelative {
                load_store,
                rd,
                offset,
            } => {
                let address = self.registers.register_at(REG_SP).wrapping_add(offset);
                self.thumb_transfer(bus, load_store, ReadWriteKind::Word, address, rd)
            }
            ThumbInstruction::LoadAddress {
                from_sp,
                rd,
                offset,
            } => {
                let base = if from_sp {
                    self.registers.register_at(REG_SP)
                } else {
                    self.registers.program_counter().wrapping_add(4) & !3
                };
                self.registers.set_register_at(rd, base.wrapping_add(offset));
                Some(2)
            }
            ThumbInstruction::AdjustStackPointer { negative, offset } => {
                let sp = self.registers.register_at(REG_SP);
                let sp = if negative {
                    sp.wrapping_sub(offset)
                } else {
                    sp.wrapping_add(offset)
                };
                self.registers.set_register_at(REG_SP, sp);
                Some(2)
            }
            ThumbInstruction::PushPop {
                load_store,
                pc_lr,
                register_list,
            } => self.push_pop(bus, load_store, pc_lr, register_list),
            ThumbInstruction::TransferMultiple {
                load_store,
                rb,
                register_list,
            } => self.thumb_transfer_multiple(bus, load_store, rb, register_list),
            ThumbInstruction::ConditionalBranch { offset, .. }
            | ThumbInstruction::Branch { offset } => {
                // The failed-condition case never reaches execution.
                let pc = self.registers.program_counter();
                self.registers
                    .set_program_counter(pc.wrapping_add(4).wrapping_add(offset as u32) & !1);
                None
            }
            ThumbInstruction::SoftwareInterrupt { comment } => {
                tracing::trace!("SWI #{comment:X}");
                self.pending.raise_swi();
                Some(2)
            }
            ThumbInstruction::LongBranchPrefix { offset_high } => {
                let pc = self.registers.program_counter();
                self.registers.set_register_at(
                    REG_LR,
                    pc.wrapping_add(4).wrapping_add(offset_high as u32),
                );
                Some(2)
            }
            ThumbInstruction::LongBranchSuffix {
                exchange,
                offset_low,
            } => {
                if exchange && self.revision() < 5 {
                    return self.thumb_undefined();
                }
                let pc = self.registers.program_counter();
                let target = self
                    .registers
                    .register_at(REG_LR)
                    .wrapping_add(offset_low);
                self.registers
                    .set_register_at(REG_LR, pc.wrapping_add(2) | 1);
                if exchange {
                    self.cpsr.set_cpu_state(CpuState::Arm);
                    self.force_dispatch_refresh();
                    self.registers.set_program_counter(target & !3);
                } else {
                    self.registers.set_program_counter(target & !1);
                }
                None
            }
            ThumbInstruction::Undefined { raw } => {
                tracing::debug!("undefined Thumb instruction {raw:04X}");
                self.thumb_undefined()
            }
        }
    }

    /// Operand read with the Thumb pipeline offset: R15 reads as PC+4.
    fn thumb_operand(&self, register: u32) -> u32 {
        if register == REG_PROGRAM_COUNTER {
            self.registers.program_counter().wrapping_add(4)
        } else {
            self.registers.register_at(register)
        }
    }

    fn thumb_write_destination(&mut self, rd: u32, value: u32) -> Option<u32> {
        if rd == REG_PROGRAM_COUNTER {
            self.registers.set_program_counter(value & !1);
            None
        } else {
            self.registers.set_register_at(rd, value);
            Some(2)
        }
    }

    fn thumb_undefined(&mut self) -> Option<u32> {
        self.pending.set(InputLine::Undefined, true);
        Some(2)
    }

    fn thumb_alu(&mut self, op: ThumbAluOp, rs: u32, rd: u32) -> Option<u32> {
        let a = self.registers.register_at(rd);
        let b = self.registers.register_at(rs);
        let carry = self.cpsr.carry_flag();

        match op {
            ThumbAluOp::And => self.thumb_logical(rd, a & b),
            ThumbAluOp::Eor => self.thumb_logical(rd, a ^ b),
            ThumbAluOp::Orr => self.thumb_logical(rd, a | b),
            ThumbAluOp::Bic => self.thumb_logical(rd, a & !b),
            ThumbAluOp::Mvn => self.thumb_logical(rd, !b),
            ThumbAluOp::Tst => self.cpsr.set_logical_flags(a & b),
            ThumbAluOp::Mul => self.thumb_logical(rd, a.wrapping_mul(b)),
            ThumbAluOp::Lsl | ThumbAluOp::Lsr | ThumbAluOp::Asr | ThumbAluOp::Ror => {
                let kind = match op {
                    ThumbAluOp::Lsl => ShiftKind::Lsl,
                    ThumbAluOp::Lsr => ShiftKind::Lsr,
                    ThumbAluOp::Asr => ShiftKind::Asr,
                    _ => ShiftKind::Ror,
                };
                let result = shift_register(kind, b & 0xFF, a, carry);
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_logical_flags(result.value);
                self.cpsr.set_carry_flag(result.carry);
            }
            ThumbAluOp::Adc => {
                let result = add_with_carry(a, b, carry);
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_arithmetic_flags(result);
            }
            ThumbAluOp::Sbc => {
                let result = sub_with_carry(a, b, carry);
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_arithmetic_flags(result);
            }
            ThumbAluOp::Neg => {
                let result = sub_with_carry(0, b, true);
                self.registers.set_register_at(rd, result.value);
                self.cpsr.set_arithmetic_flags(result);
            }
            ThumbAluOp::Cmp => self
                .cpsr
                .set_arithmetic_flags(sub_with_carry(a, b, true)),
            ThumbAluOp::Cmn => self
                .cpsr
                .set_arithmetic_flags(add_with_carry(a, b, false)),
        }
        Some(2)
    }

    fn thumb_logical(&mut self, rd: u32, value: u32) {
        self.registers.set_register_at(rd, value);
        self.cpsr.set_logical_flags(value);
    }

    fn thumb_transfer(
        &mut self,
        bus: &mut impl Bus,
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        address: u32,
        rd: u32,
    ) -> Option<u32> {
        let privileged = self.privileged();
        match (load_store, quantity) {
            (LoadStoreKind::Load, ReadWriteKind::Word) => {
                let Some(value) = self.read_word_rotated(bus, address, privileged) else {
                    return Some(2);
                };
                self.registers.set_register_at(rd, value);
            }
            (LoadStoreKind::Load, ReadWriteKind::Byte) => {
                let Some(value) = self.read_byte(bus, address, privileged) else {
                    return Some(2);
                };
                self.registers.set_register_at(rd, u32::from(value));
            }
            (LoadStoreKind::Store, ReadWriteKind::Word) => {
                let value = self.registers.register_at(rd);
                if self.write_word(bus, address & !3, value, privileged).is_none() {
                    return Some(2);
                }
            }
            (LoadStoreKind::Store, ReadWriteKind::Byte) => {
                let value = self.registers.register_at(rd) as u8;
                if self.write_byte(bus, address, value, privileged).is_none() {
                    return Some(2);
                }
            }
        }
        Some(2)
    }

    fn thumb_sign_extended(
        &mut self,
        bus: &mut impl Bus,
        kind: SignExtendedKind,
        address: u32,
        rd: u32,
    ) -> Option<u32> {
        let privileged = self.privileged();
        match kind {
            SignExtendedKind::StoreHalfword => {
                let value = self.registers.register_at(rd) as u16;
                if self.write_half(bus, address & !1, value, privileged).is_none() {
                    return Some(2);
                }
            }
            SignExtendedKind::LoadSignedByte => {
                let Some(value) = self.read_byte(bus, address, privileged) else {
                    return Some(2);
                };
                self.registers
                    .set_register_at(rd, value as i8 as i32 as u32);
            }
            SignExtendedKind::LoadHalfword => {
                let Some(value) = self.read_half(bus, address & !1, privileged) else {
                    return Some(2);
                };
                self.registers.set_register_at(rd, u32::from(value));
            }
            SignExtendedKind::LoadSignedHalfword => {
                let Some(value) = self.read_half(bus, address & !1, privileged) else {
                    return Some(2);
                };
                self.registers
                    .set_register_at(rd, value as i16 as i32 as u32);
            }
        }
        Some(2)
    }

    fn push_pop(
        &mut self,
        bus: &mut impl Bus,
        load_store: LoadStoreKind,
        pc_lr: bool,
        register_list: u8,
    ) -> Option<u32> {
        let count = register_list.count_ones() + u32::from(pc_lr);
        if count == 0 {
            tracing::debug!("PUSH/POP with an empty register list");
            return Some(2);
        }
        let privileged = self.privileged();
        let sp = self.registers.register_at(REG_SP);

        match load_store {
            // PUSH: full descending, lowest register at the lowest address.
            LoadStoreKind::Store => {
                let mut address = sp.wrapping_sub(count * 4);
                self.registers.set_register_at(REG_SP, address);
                for r in 0..8_u32 {
                    if !register_list.get_bit(r) {
                        continue;
                    }
                    let value = self.registers.register_at(r);
                    if self.write_word(bus, address & !3, value, privileged).is_none() {
                        return Some(2);
                    }
                    address = address.wrapping_add(4);
                }
                if pc_lr {
                    let value = self.registers.register_at(REG_LR);
                    if self.write_word(bus, address & !3, value, privileged).is_none() {
                        return Some(2);
                    }
                }
                Some(2)
            }
            LoadStoreKind::Load => {
                let mut address = sp;
                for r in 0..8_u32 {
                    if !register_list.get_bit(r) {
                        continue;
                    }
                    let Some(value) = self.read_word(bus, address & !3, privileged) else {
                        return Some(2);
                    };
                    self.registers.set_register_at(r, value);
                    address = address.wrapping_add(4);
                }
                let mut jumped = false;
                if pc_lr {
                    let Some(value) = self.read_word(bus, address & !3, privileged) else {
                        return Some(2);
                    };
                    address = address.wrapping_add(4);
                    self.load_program_counter(value);
                    jumped = true;
                }
                self.registers.set_register_at(REG_SP, address);
                if jumped { None } else { Some(2) }
            }
        }
    }

    fn thumb_transfer_multiple(
        &mut self,
        bus: &mut impl Bus,
        load_store: LoadStoreKind,
        rb: u32,
        register_list: u8,
    ) -> Option<u32> {
        if register_list == 0 {
            tracing::debug!("LDMIA/STMIA with an empty register list");
            return Some(2);
        }
        let privileged = self.privileged();
        let base = self.registers.register_at(rb);
        let total = register_list.count_ones() * 4;
        let mut address = base;

        match load_store {
            LoadStoreKind::Load => {
                // Write back first so a loaded base wins.
                self.registers.set_register_at(rb, base.wrapping_add(total));
                for r in 0..8_u32 {
                    if !register_list.get_bit(r) {
                        continue;
                    }
                    let Some(value) = self.read_word(bus, address & !3, privileged) else {
                        return Some(2);
                    };
                    self.registers.set_register_at(r, value);
                    address = address.wrapping_add(4);
                }
            }
            LoadStoreKind::Store => {
                let mut first = true;
                for r in 0..8_u32 {
                    if !register_list.get_bit(r) {
                        continue;
                    }
                    let value = if r == rb && !first {
                        base.wrapping_add(total)
                    } else {
                        self.registers.register_at(r)
                    };
                    if self.write_word(bus, address & !3, value, privileged).is_none() {
                        return Some(2);
                    }
                    address = address.wrapping_add(4);
                    first = false;
                }
                self.registers.set_register_at(rb, base.wrapping_add(total));
            }
        }
        Some(2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::core::{ArmCore, CoreConfig};
    use crate::cpu::modes::Mode;
    use pretty_assertions::assert_eq;

    struct RamBus {
        ram: Vec<u8>,
    }

    impl RamBus {
        fn new() -> Self {
            Self {
                ram: vec![0; 0x1_0000],
            }
        }

        fn load_half(&mut self, address: u32, value: u16) {
            let a = address as usize & 0xFFFF;
            self.ram[a..a + 2].copy_from_slice(&value.to_le_bytes());
        }

        fn load_word(&mut self, address: u32, value: u32) {
            let a = address as usize & 0xFFFF;
            self.ram[a..a + 4].copy_from_slice(&value.to_le_bytes());
        }

        fn word(&self, address: u32) -> u32 {
            let a = address as usize & 0xFFFF;
            u32::from_le_bytes(self.ram[a..a + 4].try_into().unwrap())
        }
    }

    impl Bus for RamBus {
        fn read8(&mut self, address: u32) -> u8 {
            self.ram[address as usize & 0xFFFF]
        }

        fn read16(&mut self, address: u32) -> u16 {
            let a = address as usize & 0xFFFF;
            u16::from_le_bytes(self.ram[a..a + 2].try_into().unwrap())
        }

        fn read32(&mut self, address: u32) -> u32 {
            self.word(address)
        }

        fn write8(&mut self, address: u32, value: u8) {
            self.ram[address as usize & 0xFFFF] = value;
        }

        fn write16(&mut self, address: u32, value: u16) {
            self.load_half(address, value);
        }

        fn write32(&mut self, address: u32, value: u32) {
            self.load_word(address, value);
        }
    }

    fn core_with(program: &[u16]) -> (ArmCore, RamBus) {
        let mut core = ArmCore::new(CoreConfig::arm7tdmi());
        core.cpsr.set_cpu_state(CpuState::Thumb);
        core.force_dispatch_refresh();
        let mut bus = RamBus::new();
        for (i, half) in program.iter().enumerate() {
            bus.load_half(i as u32 * 2, *half);
        }
        (core, bus)
    }

    #[test]
    fn shift_immediate_sets_carry() {
        // LSL R0, R1, #4
        let (mut core, mut bus) = core_with(&[0x0108]);
        core.registers.set_register_at(1, 0xF000_0001);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 1);
        assert_eq!(core.registers.register_at(0), 0x10);
        assert!(core.cpsr.carry_flag());
        assert!(!core.cpsr.sign_flag());
        assert_eq!(core.registers.program_counter(), 2);
    }

    #[test]
    fn subtract_immediate_three_op() {
        // SUB R4, R5, #7
        let (mut core, mut bus) = core_with(&[0x1FEC]);
        core.registers.set_register_at(5, 10);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(4), 3);
        assert!(core.cpsr.carry_flag());
        assert!(!core.cpsr.sign_flag());
    }

    #[test]
    fn multiply_register_cycles() {
        // MUL R0, R7
        let (mut core, mut bus) = core_with(&[0x4378]);
        core.registers.set_register_at(0, 6);
        core.registers.set_register_at(7, 7);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 4);
        assert_eq!(core.registers.register_at(0), 42);
    }

    #[test]
    fn hi_register_add_reads_pc_plus_four() {
        // ADD R1, PC
        let (mut core, mut bus) = core_with(&[0x4479]);
        core.registers.set_register_at(1, 5);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(1), 9);
    }

    #[test]
    fn pc_relative_load() {
        // LDR R2, [PC, #0x40]
        let (mut core, mut bus) = core_with(&[0x4A10]);
        bus.load_word(0x44, 0xCAFE);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 2);
        assert_eq!(core.registers.register_at(2), 0xCAFE);
    }

    #[test]
    fn push_stores_descending() {
        // PUSH {R0, R1, R2, LR}
        let (mut core, mut bus) = core_with(&[0xB507]);
        core.registers.set_register_at(REG_SP, 0x1000);
        core.registers.set_register_at(0, 0xA0);
        core.registers.set_register_at(1, 0xA1);
        core.registers.set_register_at(2, 0xA2);
        core.registers.set_register_at(REG_LR, 0x88);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 4);
        assert_eq!(core.registers.register_at(REG_SP), 0x0FF0);
        assert_eq!(bus.word(0x0FF0), 0xA0);
        assert_eq!(bus.word(0x0FF4), 0xA1);
        assert_eq!(bus.word(0x0FF8), 0xA2);
        assert_eq!(bus.word(0x0FFC), 0x88);
    }

    #[test]
    fn pop_into_pc_branches() {
        // POP {R4, PC}
        let (mut core, mut bus) = core_with(&[0xBD10]);
        core.registers.set_register_at(REG_SP, 0x800);
        bus.load_word(0x800, 0xAA);
        bus.load_word(0x804, 0x301);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(4), 0xAA);
        assert_eq!(core.registers.register_at(REG_SP), 0x808);
        // v4 cores ignore bit 0 of a popped PC; the state stays Thumb.
        assert_eq!(core.registers.program_counter(), 0x300);
        assert_eq!(core.cpsr.cpu_state(), CpuState::Thumb);
    }

    #[test]
    fn conditional_branch_taken_and_failed() {
        // BEQ -4 (a tight loop back onto itself)
        let (mut core, mut bus) = core_with(&[0xD0FE]);
        core.cpsr.set_zero_flag(true);

        let cycles = core.run(&mut bus, 1);
        assert_eq!(cycles, 3);
        assert_eq!(core.registers.program_counter(), 0);

        core.cpsr.set_zero_flag(false);
        let cycles = core.run(&mut bus, 1);
        assert_eq!(cycles, 1);
        assert_eq!(core.registers.program_counter(), 2);
    }

    #[test]
    fn long_branch_and_link() {
        // BL with a zero high part and +2 low part.
        let (mut core, mut bus) = core_with(&[0xF000, 0xF801]);

        core.run(&mut bus, 2);

        assert_eq!(core.registers.program_counter(), 6);
        // The return address points past the pair, with bit 0 set.
        assert_eq!(core.registers.register_at(REG_LR), 5);
    }

    #[test]
    fn adjust_stack_pointer_down() {
        // SUB SP, #0x18
        let (mut core, mut bus) = core_with(&[0xB086]);
        core.registers.set_register_at(REG_SP, 0x1000);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(REG_SP), 0x0FE8);
    }

    #[test]
    fn load_signed_halfword_extends() {
        // LDRSH R3, [R4, R5]
        let (mut core, mut bus) = core_with(&[0x5F63]);
        core.registers.set_register_at(4, 0x600);
        core.registers.set_register_at(5, 2);
        bus.load_half(0x602, 0x8001);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(3), 0xFFFF_8001);
    }

    #[test]
    fn store_multiple_with_writeback() {
        // STMIA R3!, {R0, R1}
        let (mut core, mut bus) = core_with(&[0xC303]);
        core.registers.set_register_at(3, 0x400);
        core.registers.set_register_at(0, 0x10);
        core.registers.set_register_at(1, 0x20);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 4);
        assert_eq!(bus.word(0x400), 0x10);
        assert_eq!(bus.word(0x404), 0x20);
        assert_eq!(core.registers.register_at(3), 0x408);
    }

    #[test]
    fn swi_leaves_thumb_for_the_handler() {
        let (mut core, mut bus) = core_with(&[0xDF12]);
        core.change_mode(Mode::System);

        core.run(&mut bus, 1);
        assert!(core.pending.any());
        core.run(&mut bus, 1);

        assert_eq!(core.cpsr.mode(), Mode::Supervisor);
        assert_eq!(core.cpsr.cpu_state(), CpuState::Arm);
        assert_eq!(core.registers.register_at(REG_LR), 2);
        assert_eq!(core.registers.program_counter(), 0x08);
        // The saved PSR remembers the Thumb state for the return.
        assert!(core.current_spsr().state_bit());
    }

    #[test]
    fn bx_to_arm_state() {
        // BX R0 with bit 0 clear.
        let (mut core, mut bus) = core_with(&[0x4700]);
        core.registers.set_register_at(0, 0x2000);

        core.run(&mut bus, 1);

        assert_eq!(core.cpsr.cpu_state(), CpuState::Arm);
        assert_eq!(core.registers.program_counter(), 0x2000);
    }
}
