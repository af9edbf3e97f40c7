//! ARM instruction execution.
//!
//! Every method returns `Some(bytes)` when PC should advance normally and
//! `None` when the instruction wrote PC itself (the caller flushes the
//! prefetch ring). A data access that faults latches the abort and bails
//! out with the normal advance; the pending data abort is serviced before
//! the next instruction issues.

use crate::bitwise::Bits;
use crate::bus::Bus;
use crate::cpu::alu::{AluResult, ShiftResult, add_with_carry, shift_immediate, shift_register, sub_with_carry};
use crate::cpu::arm::instructions::{
    AluOpcode, ArmOperation, HalfwordOffset, PsrOpKind, SecondOperand, ShiftSource, TransferOffset,
};
use crate::cpu::core::ArmCore;
use crate::cpu::exception::InputLine;
use crate::cpu::flags::{
    HalfwordTransferKind, Indexing, LoadStoreKind, Offsetting, ReadWriteKind,
};
use crate::cpu::psr::Psr;
use crate::cpu::registers::{REG_LR, REG_PROGRAM_COUNTER};
use crate::mmu::cp15::Cp15Effects;

/// Fixed per-class cycle costs (branches and exceptions 3, multiplies and
/// block transfers 4, loads 2, everything else 1).
pub(crate) const fn class_cycles(operation: &ArmOperation) -> u32 {
    match operation {
        ArmOperation::Branch { .. }
        | ArmOperation::BranchAndExchange { .. }
        | ArmOperation::SoftwareInterrupt { .. }
        | ArmOperation::Undefined { .. }
        | ArmOperation::CoprocessorOther { .. } => 3,
        ArmOperation::Multiply { .. }
        | ArmOperation::MultiplyLong { .. }
        | ArmOperation::BlockDataTransfer { .. } => 4,
        ArmOperation::SingleDataSwap { .. } => 2,
        ArmOperation::SingleDataTransfer {
            load_store: LoadStoreKind::Load,
            ..
        }
        | ArmOperation::HalfwordTransfer {
            load_store: LoadStoreKind::Load,
            ..
        } => 2,
        _ => 1,
    }
}

impl ArmCore {
    pub(crate) fn execute_arm(&mut self, bus: &mut impl Bus, operation: ArmOperation) -> Option<u32> {
        match operation {
            ArmOperation::DataProcessing {
                opcode,
                set_flags,
                rn,
                rd,
                operand2,
            } => self.data_processing(opcode, set_flags, rn, rd, operand2),
            ArmOperation::PsrTransfer { kind, use_spsr } => self.psr_transfer(kind, use_spsr),
            ArmOperation::Multiply {
                accumulate,
                set_flags,
                rd,
                rn,
                rs,
                rm,
            } => self.multiply(accumulate, set_flags, rd, rn, rs, rm),
            ArmOperation::MultiplyLong {
                signed,
                accumulate,
                set_flags,
                rd_hi,
                rd_lo,
                rs,
                rm,
            } => self.multiply_long(signed, accumulate, set_flags, rd_hi, rd_lo, rs, rm),
            ArmOperation::SingleDataSwap { byte, rn, rd, rm } => {
                self.single_data_swap(bus, byte, rn, rd, rm)
            }
            ArmOperation::BranchAndExchange { link, rm } => self.branch_and_exchange(link, rm),
            ArmOperation::HalfwordTransfer {
                kind,
                load_store,
                indexing,
                offsetting,
                write_back,
                rn,
                rd,
                offset,
            } => self.halfword_transfer(
                bus, kind, load_store, indexing, offsetting, write_back, rn, rd, offset,
            ),
            ArmOperation::SingleDataTransfer {
                load_store,
                quantity,
                indexing,
                offsetting,
                write_back,
                rn,
                rd,
                offset,
            } => self.single_data_transfer(
                bus, load_store, quantity, indexing, offsetting, write_back, rn, rd, offset,
            ),
            ArmOperation::BlockDataTransfer {
                load_store,
                indexing,
                offsetting,
                write_back,
                psr_force_user,
                rn,
                register_list,
            } => self.block_data_transfer(
                bus,
                load_store,
                indexing,
                offsetting,
                write_back,
                psr_force_user,
                rn,
                register_list,
            ),
            ArmOperation::Branch {
                link,
                exchange,
                offset,
            } => self.branch(link, exchange, offset),
            ArmOperation::CoprocessorRegisterTransfer {
                direction,
                coprocessor,
                rd,
                crn,
                opcode2,
                raw,
                ..
            } => self.coprocessor_register_transfer(bus, direction, coprocessor, crn, opcode2, rd, raw),
            ArmOperation::CoprocessorOther { coprocessor, raw } => {
                tracing::debug!("unsupported coprocessor operation p{coprocessor}: {raw:08X}");
                self.raise_undefined()
            }
            ArmOperation::SoftwareInterrupt { comment } => {
                tracing::trace!("SWI #{comment:X}");
                self.pending.raise_swi();
                Some(4)
            }
            ArmOperation::Undefined { raw } => {
                tracing::debug!("undefined instruction {raw:08X}");
                self.raise_undefined()
            }
        }
    }

    /// Operand read with the standard pipeline offset: R15 reads as PC+8.
    pub(crate) fn arm_operand(&self, register: u32) -> u32 {
        if register == REG_PROGRAM_COUNTER {
            self.registers.program_counter().wrapping_add(8)
        } else {
            self.registers.register_at(register)
        }
    }

    /// R15 read in the cases where the extra internal cycle makes it PC+12:
    /// register-specified shifts and stores of the PC.
    fn arm_operand_late(&self, register: u32) -> u32 {
        if register == REG_PROGRAM_COUNTER {
            self.registers.program_counter().wrapping_add(12)
        } else {
            self.registers.register_at(register)
        }
    }

    fn raise_undefined(&mut self) -> Option<u32> {
        self.pending.set(InputLine::Undefined, true);
        Some(4)
    }

    /// Writes an execution result, turning a write to R15 into a branch.
    fn write_destination(&mut self, rd: u32, value: u32) -> Option<u32> {
        if rd == REG_PROGRAM_COUNTER {
            let mask = if self.cpsr.state_bit() { !1 } else { !3 };
            self.registers.set_program_counter(value & mask);
            None
        } else {
            self.registers.set_register_at(rd, value);
            Some(4)
        }
    }

    /// PC load with v5T interworking: bit 0 selects Thumb. Earlier
    /// revisions ignore the low bits.
    pub(crate) fn load_program_counter(&mut self, value: u32) {
        if self.revision() >= 5 && self.has_thumb() {
            let thumb = value.get_bit(0);
            self.cpsr.set_cpu_state(thumb.into());
            self.force_dispatch_refresh();
            self.registers
                .set_program_counter(value & if thumb { !1 } else { !3 });
        } else {
            let mask = if self.cpsr.state_bit() { !1 } else { !3 };
            self.registers.set_program_counter(value & mask);
        }
    }

    fn resolve_second_operand(&self, operand2: SecondOperand) -> ShiftResult {
        let carry_in = self.cpsr.carry_flag();
        match operand2 {
            SecondOperand::Immediate { base, rotate } => {
                if rotate == 0 {
                    ShiftResult {
                        value: base,
                        carry: carry_in,
                    }
                } else {
                    let value = base.rotate_right(rotate);
                    ShiftResult {
                        value,
                        carry: value.get_bit(31),
                    }
                }
            }
            SecondOperand::Register {
                register,
                shift_kind,
                shift,
            } => match shift {
                ShiftSource::Amount(amount) => {
                    shift_immediate(shift_kind, amount, self.arm_operand(register), carry_in)
                }
                ShiftSource::Register(rs) => shift_register(
                    shift_kind,
                    self.registers.register_at(rs) & 0xFF,
                    self.arm_operand_late(register),
                    carry_in,
                ),
            },
        }
    }

    fn data_processing(
        &mut self,
        opcode: AluOpcode,
        set_flags: bool,
        rn: u32,
        rd: u32,
        operand2: SecondOperand,
    ) -> Option<u32> {
        let late_pc = matches!(
            operand2,
            SecondOperand::Register {
                shift: ShiftSource::Register(_),
                ..
            }
        );
        let rn_value = if late_pc {
            self.arm_operand_late(rn)
        } else {
            self.arm_operand(rn)
        };
        let shifter = self.resolve_second_operand(operand2);
        let op2 = shifter.value;
        let carry = self.cpsr.carry_flag();

        let arith = |r: AluResult| (r.value, Some(r));
        let (result, arithmetic) = match opcode {
            AluOpcode::And | AluOpcode::Tst => (rn_value & op2, None),
            AluOpcode::Eor | AluOpcode::Teq => (rn_value ^ op2, None),
            AluOpcode::Orr => (rn_value | op2, None),
            AluOpcode::Bic => (rn_value & !op2, None),
            AluOpcode::Mov => (op2, None),
            AluOpcode::Mvn => (!op2, None),
            AluOpcode::Sub | AluOpcode::Cmp => arith(sub_with_carry(rn_value, op2, true)),
            AluOpcode::Rsb => arith(sub_with_carry(op2, rn_value, true)),
            AluOpcode::Add | AluOpcode::Cmn => arith(add_with_carry(rn_value, op2, false)),
            AluOpcode::Adc => arith(add_with_carry(rn_value, op2, carry)),
            AluOpcode::Sbc => arith(sub_with_carry(rn_value, op2, carry)),
            AluOpcode::Rsc => arith(sub_with_carry(op2, rn_value, carry)),
        };

        if set_flags {
            if rd == REG_PROGRAM_COUNTER && !opcode.is_comparison() {
                // MOVS PC / SUBS PC, LR: return-from-exception form.
                let spsr = self.current_spsr();
                self.install_cpsr(spsr);
            } else {
                match arithmetic {
                    Some(r) => self.cpsr.set_arithmetic_flags(r),
                    None => {
                        self.cpsr.set_logical_flags(result);
                        self.cpsr.set_carry_flag(shifter.carry);
                    }
                }
            }
        }

        if opcode.is_comparison() {
            Some(4)
        } else {
            self.write_destination(rd, result)
        }
    }

    fn psr_transfer(&mut self, kind: PsrOpKind, use_spsr: bool) -> Option<u32> {
        match kind {
            PsrOpKind::Mrs { destination } => {
                let value: u32 = if use_spsr {
                    self.current_spsr().into()
                } else {
                    self.cpsr.into()
                };
                self.write_destination(destination, value)
            }
            PsrOpKind::Msr { source, field_mask } => {
                let value = self.registers.register_at(source);
                self.write_psr(value, field_mask, use_spsr)
            }
            PsrOpKind::MsrImmediate { value, field_mask } => {
                self.write_psr(value, field_mask, use_spsr)
            }
        }
    }

    fn write_psr(&mut self, value: u32, field_mask: u32, use_spsr: bool) -> Option<u32> {
        let mut mask = 0_u32;
        for (bit, bytes) in [
            (0, 0x0000_00FF_u32),
            (1, 0x0000_FF00),
            (2, 0x00FF_0000),
            (3, 0xFF00_0000),
        ] {
            if field_mask.get_bit(bit) {
                mask |= bytes;
            }
        }

        if use_spsr {
            let mode = self.cpsr.mode();
            if let Some(spsr) = self.register_bank.spsr_mut(mode) {
                let old: u32 = (*spsr).into();
                *spsr = Psr::from((old & !mask) | (value & mask));
            } else {
                tracing::debug!("MSR SPSR in {mode} which has no SPSR");
            }
            return Some(4);
        }

        if !self.privileged() {
            // User mode may only touch the flags byte.
            mask &= 0xFF00_0000;
        }
        let old: u32 = self.cpsr.into();
        let mut new = (old & !mask) | (value & mask);
        if (new ^ old) & 0b10_0000 != 0 {
            tracing::debug!("MSR attempted to change the T bit, ignoring");
            new = (new & !0b10_0000) | (old & 0b10_0000);
        }
        self.install_cpsr(Psr::from(new));
        Some(4)
    }

    fn multiply(
        &mut self,
        accumulate: bool,
        set_flags: bool,
        rd: u32,
        rn: u32,
        rs: u32,
        rm: u32,
    ) -> Option<u32> {
        let mut result = self.arm_operand(rm).wrapping_mul(self.arm_operand(rs));
        if accumulate {
            result = result.wrapping_add(self.arm_operand(rn));
        }
        if set_flags {
            self.cpsr.set_logical_flags(result);
        }
        self.write_destination(rd, result)
    }

    #[allow(clippy::too_many_arguments)]
    fn multiply_long(
        &mut self,
        signed: bool,
        accumulate: bool,
        set_flags: bool,
        rd_hi: u32,
        rd_lo: u32,
        rs: u32,
        rm: u32,
    ) -> Option<u32> {
        let a = self.arm_operand(rm);
        let b = self.arm_operand(rs);
        let mut result = if signed {
            (i64::from(a as i32) * i64::from(b as i32)) as u64
        } else {
            u64::from(a) * u64::from(b)
        };
        if accumulate {
            let existing = (u64::from(self.registers.register_at(rd_hi)) << 32)
                | u64::from(self.registers.register_at(rd_lo));
            result = result.wrapping_add(existing);
        }

        self.registers.set_register_at(rd_lo, result as u32);
        self.registers.set_register_at(rd_hi, (result >> 32) as u32);
        if set_flags {
            self.cpsr.set_zero_flag(result == 0);
            self.cpsr.set_sign_flag(result.get_bit(63));
        }
        Some(4)
    }

    fn single_data_swap(
        &mut self,
        bus: &mut impl Bus,
        byte: bool,
        rn: u32,
        rd: u32,
        rm: u32,
    ) -> Option<u32> {
        let address = self.arm_operand(rn);
        let privileged = self.privileged();

        bus.lock();
        let loaded = if byte {
            self.read_byte(bus, address, privileged).map(u32::from)
        } else {
            self.read_word_rotated(bus, address, privileged)
        };
        let Some(loaded) = loaded else {
            bus.unlock();
            return Some(4);
        };

        let stored = self.registers.register_at(rm);
        let written = if byte {
            self.write_byte(bus, address, stored as u8, privileged)
        } else {
            self.write_word(bus, address & !3, stored, privileged)
        };
        bus.unlock();
        if written.is_none() {
            return Some(4);
        }

        self.write_destination(rd, loaded)
    }

    fn branch_and_exchange(&mut self, link: bool, rm: u32) -> Option<u32> {
        if !self.has_thumb() || (link && self.revision() < 5) {
            return self.raise_undefined();
        }

        let target = self.arm_operand(rm);
        if link {
            let pc = self.registers.program_counter();
            self.registers.set_register_at(REG_LR, pc.wrapping_add(4));
        }

        let thumb = target.get_bit(0);
        self.cpsr.set_cpu_state(thumb.into());
        self.force_dispatch_refresh();
        self.registers
            .set_program_counter(target & if thumb { !1 } else { !3 });
        None
    }

    fn branch(&mut self, link: bool, exchange: bool, offset: i32) -> Option<u32> {
        let pc = self.registers.program_counter();
        if link {
            self.registers.set_register_at(REG_LR, pc.wrapping_add(4));
        }
        let target = pc.wrapping_add(8).wrapping_add(offset as u32);
        if exchange {
            self.cpsr.set_cpu_state(crate::cpu::psr::CpuState::Thumb);
            self.force_dispatch_refresh();
            self.registers.set_program_counter(target & !1);
        } else {
            self.registers.set_program_counter(target & !3);
        }
        None
    }

    #[allow(clippy::too_many_arguments)]
    fn halfword_transfer(
        &mut self,
        bus: &mut impl Bus,
        kind: HalfwordTransferKind,
        load_store: LoadStoreKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        rn: u32,
        rd: u32,
        offset: HalfwordOffset,
    ) -> Option<u32> {
        let offset = match offset {
            HalfwordOffset::Immediate(value) => value,
            HalfwordOffset::Register(rm) => self.registers.register_at(rm),
        };
        let base = self.arm_operand(rn);
        let offset_address = match offsetting {
            Offsetting::Up => base.wrapping_add(offset),
            Offsetting::Down => base.wrapping_sub(offset),
        };
        let address = match indexing {
            Indexing::Pre => offset_address,
            Indexing::Post => base,
        };
        let write_back = write_back || indexing == Indexing::Post;
        let privileged = self.privileged();

        match load_store {
            LoadStoreKind::Load => {
                // Halfword addresses are force-aligned.
                let value = match kind {
                    HalfwordTransferKind::UnsignedHalfword => {
                        let Some(raw) = self.read_half(bus, address & !1, privileged) else {
                            return Some(4);
                        };
                        u32::from(raw)
                    }
                    HalfwordTransferKind::SignedByte => {
                        let Some(raw) = self.read_byte(bus, address, privileged) else {
                            return Some(4);
                        };
                        raw as i8 as i32 as u32
                    }
                    HalfwordTransferKind::SignedHalfword => {
                        let Some(raw) = self.read_half(bus, address & !1, privileged) else {
                            return Some(4);
                        };
                        raw as i16 as i32 as u32
                    }
                };
                if write_back && rn != rd {
                    self.registers.set_register_at(rn, offset_address);
                }
                self.write_destination(rd, value)
            }
            LoadStoreKind::Store => {
                let value = self.arm_operand_late(rd) as u16;
                if self
                    .write_half(bus, address & !1, value, privileged)
                    .is_none()
                {
                    return Some(4);
                }
                if write_back {
                    self.registers.set_register_at(rn, offset_address);
                }
                Some(4)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn single_data_transfer(
        &mut self,
        bus: &mut impl Bus,
        load_store: LoadStoreKind,
        quantity: ReadWriteKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        rn: u32,
        rd: u32,
        offset: TransferOffset,
    ) -> Option<u32> {
        let offset = match offset {
            TransferOffset::Immediate(value) => value,
            TransferOffset::Register {
                register,
                shift_kind,
                amount,
            } => {
                shift_immediate(
                    shift_kind,
                    amount,
                    self.registers.register_at(register),
                    self.cpsr.carry_flag(),
                )
                .value
            }
        };
        let base = self.arm_operand(rn);
        let offset_address = match offsetting {
            Offsetting::Up => base.wrapping_add(offset),
            Offsetting::Down => base.wrapping_sub(offset),
        };
        let address = match indexing {
            Indexing::Pre => offset_address,
            Indexing::Post => base,
        };
        // Post-indexed with W is the translate variant (LDRT/STRT): the
        // access is checked as if in User mode.
        let forced_user = indexing == Indexing::Post && write_back;
        let privileged = self.privileged() && !forced_user;
        let write_back = write_back || indexing == Indexing::Post;

        match load_store {
            LoadStoreKind::Load => {
                let value = match quantity {
                    ReadWriteKind::Word => {
                        let Some(value) = self.read_word_rotated(bus, address, privileged) else {
                            return Some(4);
                        };
                        value
                    }
                    ReadWriteKind::Byte => {
                        let Some(raw) = self.read_byte(bus, address, privileged) else {
                            return Some(4);
                        };
                        u32::from(raw)
                    }
                };
                if write_back && rn != rd {
                    self.registers.set_register_at(rn, offset_address);
                }
                if rd == REG_PROGRAM_COUNTER {
                    self.load_program_counter(value);
                    None
                } else {
                    self.registers.set_register_at(rd, value);
                    Some(4)
                }
            }
            LoadStoreKind::Store => {
                let value = self.arm_operand_late(rd);
                let written = match quantity {
                    ReadWriteKind::Word => self.write_word(bus, address & !3, value, privileged),
                    ReadWriteKind::Byte => self.write_byte(bus, address, value as u8, privileged),
                };
                if written.is_none() {
                    return Some(4);
                }
                if write_back {
                    self.registers.set_register_at(rn, offset_address);
                }
                Some(4)
            }
        }
    }

    /// Unaligned word loads rotate the aligned word so the addressed byte
    /// lands in the low lane.
    pub(crate) fn read_word_rotated(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        privileged: bool,
    ) -> Option<u32> {
        let word = self.read_word(bus, address & !3, privileged)?;
        Some(word.rotate_right(8 * (address & 3)))
    }

    #[allow(clippy::too_many_arguments)]
    fn block_data_transfer(
        &mut self,
        bus: &mut impl Bus,
        load_store: LoadStoreKind,
        indexing: Indexing,
        offsetting: Offsetting,
        write_back: bool,
        psr_force_user: bool,
        rn: u32,
        register_list: u16,
    ) -> Option<u32> {
        if register_list == 0 {
            tracing::debug!("LDM/STM with an empty register list");
            return Some(4);
        }

        let base = self.registers.register_at(rn);
        let total = register_list.count_ones() * 4;
        let (start, final_base) = match (indexing, offsetting) {
            (Indexing::Pre, Offsetting::Up) => (base.wrapping_add(4), base.wrapping_add(total)),
            (Indexing::Post, Offsetting::Up) => (base, base.wrapping_add(total)),
            (Indexing::Pre, Offsetting::Down) => {
                (base.wrapping_sub(total), base.wrapping_sub(total))
            }
            (Indexing::Post, Offsetting::Down) => (
                base.wrapping_sub(total).wrapping_add(4),
                base.wrapping_sub(total),
            ),
        };

        let privileged = self.privileged();
        let pc_in_list = register_list.get_bit(15);
        // S without PC in a load (or any store) means the user bank.
        let user_bank =
            psr_force_user && !(load_store == LoadStoreKind::Load && pc_in_list);
        let mut address = start;

        match load_store {
            LoadStoreKind::Load => {
                // Write back first so a loaded base register wins.
                if write_back {
                    self.registers.set_register_at(rn, final_base);
                }
                let mut jumped = false;
                for r in 0..16_u32 {
                    if !register_list.get_bit(r) {
                        continue;
                    }
                    let Some(value) = self.read_word(bus, address & !3, privileged) else {
                        return Some(4);
                    };
                    address = address.wrapping_add(4);

                    if r == REG_PROGRAM_COUNTER {
                        if psr_force_user {
                            let spsr = self.current_spsr();
                            self.install_cpsr(spsr);
                            let mask = if self.cpsr.state_bit() { !1 } else { !3 };
                            self.registers.set_program_counter(value & mask);
                        } else {
                            self.load_program_counter(value);
                        }
                        jumped = true;
                    } else if user_bank {
                        self.set_banked_register(crate::cpu::modes::Mode::User, r, value);
                    } else {
                        self.registers.set_register_at(r, value);
                    }
                }
                if jumped { None } else { Some(4) }
            }
            LoadStoreKind::Store => {
                let mut first = true;
                for r in 0..16_u32 {
                    if !register_list.get_bit(r) {
                        continue;
                    }
                    let value = if r == REG_PROGRAM_COUNTER {
                        self.arm_operand_late(r)
                    } else if r == rn {
                        // Base in the list stores the original value only
                        // when it is the first register transferred.
                        if first { base } else { final_base }
                    } else if user_bank {
                        self.banked_register(crate::cpu::modes::Mode::User, r)
                    } else {
                        self.registers.register_at(r)
                    };
                    if self
                        .write_word(bus, address & !3, value, privileged)
                        .is_none()
                    {
                        return Some(4);
                    }
                    address = address.wrapping_add(4);
                    first = false;
                }
                if write_back {
                    self.registers.set_register_at(rn, final_base);
                }
                Some(4)
            }
        }
    }

    fn coprocessor_register_transfer(
        &mut self,
        bus: &mut impl Bus,
        direction: LoadStoreKind,
        coprocessor: u32,
        crn: u32,
        opcode2: u32,
        rd: u32,
        raw: u32,
    ) -> Option<u32> {
        match coprocessor {
            15 if self.config().features.mmu || self.config().features.tcm => {
                if !self.privileged() {
                    return self.raise_undefined();
                }
                match direction {
                    LoadStoreKind::Load => {
                        let value = self.mmu.read_register(crn, opcode2);
                        self.write_destination(rd, value)
                    }
                    LoadStoreKind::Store => {
                        let value = self.registers.register_at(rd);
                        let Cp15Effects {
                            refresh_dispatch, ..
                        } = self.mmu.write_register(crn, opcode2, value);
                        if refresh_dispatch {
                            self.force_dispatch_refresh();
                        }
                        Some(4)
                    }
                }
            }
            // CP14 passes through to the host (cycle counters and debug
            // registers on the cores that have them).
            14 => match direction {
                LoadStoreKind::Load => {
                    let value = bus.coprocessor_read(raw);
                    self.write_destination(rd, value)
                }
                LoadStoreKind::Store => {
                    bus.coprocessor_write(raw, self.registers.register_at(rd));
                    Some(4)
                }
            },
            _ => self.raise_undefined(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::core::{ArmCore, CoreConfig};
    use crate::cpu::modes::Mode;
    use crate::cpu::psr::CpuState;
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
            let a = address as usize & 0xFFFF;
            self.ram[a..a + 2].copy_from_slice(&value.to_le_bytes());
        }

        fn write32(&mut self, address: u32, value: u32) {
            self.load_word(address, value);
        }
    }

    fn core_with(program: &[u32]) -> (ArmCore, RamBus) {
        let core = ArmCore::new(CoreConfig::arm7tdmi());
        let mut bus = RamBus::new();
        for (i, word) in program.iter().enumerate() {
            bus.load_word(i as u32 * 4, *word);
        }
        (core, bus)
    }

    /// Revision-5 core with the vectors kept low so the bus doubles stay
    /// simple.
    fn v5_core_with(program: &[u32]) -> (ArmCore, RamBus) {
        let mut config = CoreConfig::arm946es();
        config.high_vectors_at_reset = false;
        let core = ArmCore::new(config);
        let mut bus = RamBus::new();
        for (i, word) in program.iter().enumerate() {
            bus.load_word(i as u32 * 4, *word);
        }
        (core, bus)
    }

    #[test]
    fn add_with_shifted_register() {
        // ADD R0, R1, R2, LSL #3
        let (mut core, mut bus) = core_with(&[0xE081_0182]);
        core.registers.set_register_at(1, 1);
        core.registers.set_register_at(2, 2);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 1);
        assert_eq!(core.registers.register_at(0), 0x11);
        assert_eq!(core.registers.program_counter(), 4);
    }

    #[test]
    fn movs_rotated_immediate_flags() {
        // MOVS R3, #0xFF000000
        let (mut core, mut bus) = core_with(&[0xE3B3_34FF]);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(3), 0xFF00_0000);
        assert!(core.cpsr.sign_flag());
        assert!(!core.cpsr.zero_flag());
        // Rotated immediates feed bit 31 into the carry.
        assert!(core.cpsr.carry_flag());
    }

    #[test]
    fn cmp_borrow_clears_carry() {
        // CMP R5, #10 with R5 = 5
        let (mut core, mut bus) = core_with(&[0xE355_000A]);
        core.registers.set_register_at(5, 5);

        core.run(&mut bus, 1);

        assert!(core.cpsr.sign_flag());
        assert!(!core.cpsr.carry_flag());
        assert!(!core.cpsr.overflow_flag());
        // Comparisons never write the destination.
        assert_eq!(core.registers.register_at(0), 0);
    }

    #[test]
    fn branch_with_link() {
        // BL +8
        let (mut core, mut bus) = core_with(&[0xEB00_0002]);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 3);
        assert_eq!(core.registers.register_at(14), 4);
        assert_eq!(core.registers.program_counter(), 16);
    }

    #[test]
    fn failed_condition_is_one_cycle() {
        // BNE +8 with Z clear... set Z so it fails.
        let (mut core, mut bus) = core_with(&[0x1B00_0002]);
        core.cpsr.set_zero_flag(true);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 1);
        assert_eq!(core.registers.program_counter(), 4);
        assert_eq!(core.registers.register_at(14), 0);
    }

    #[test]
    fn unaligned_word_load_rotates() {
        // LDR R0, [R1]
        let (mut core, mut bus) = core_with(&[0xE591_0000]);
        bus.load_word(0x100, 0xAABB_CCDD);
        core.registers.set_register_at(1, 0x102);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 2);
        assert_eq!(core.registers.register_at(0), 0xCCDD_AABB);
    }

    #[test]
    fn store_multiple_with_writeback() {
        // STMIA R0!, {R1, R2}
        let (mut core, mut bus) = core_with(&[0xE8A0_0006]);
        core.registers.set_register_at(0, 0x200);
        core.registers.set_register_at(1, 0x11);
        core.registers.set_register_at(2, 0x22);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 4);
        assert_eq!(bus.word(0x200), 0x11);
        assert_eq!(bus.word(0x204), 0x22);
        assert_eq!(core.registers.register_at(0), 0x208);
    }

    #[test]
    fn load_multiple_into_pc_branches() {
        // LDMIA R0, {R1, PC}
        let (mut core, mut bus) = core_with(&[0xE890_8002]);
        core.registers.set_register_at(0, 0x300);
        bus.load_word(0x300, 0xDEAD);
        bus.load_word(0x304, 0x1000);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(1), 0xDEAD);
        assert_eq!(core.registers.program_counter(), 0x1000);
    }

    #[test]
    fn swap_word() {
        // SWP R0, R2, [R1]
        let (mut core, mut bus) = core_with(&[0xE101_0092]);
        core.registers.set_register_at(1, 0x400);
        core.registers.set_register_at(2, 0x1122_3344);
        bus.load_word(0x400, 0xAABB_CCDD);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 2);
        assert_eq!(core.registers.register_at(0), 0xAABB_CCDD);
        assert_eq!(bus.word(0x400), 0x1122_3344);
    }

    #[test]
    fn multiply_cycles_and_result() {
        // MUL R5, R1, R2
        let (mut core, mut bus) = core_with(&[0xE005_0291]);
        core.registers.set_register_at(1, 7);
        core.registers.set_register_at(2, 6);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 4);
        assert_eq!(core.registers.register_at(5), 42);
    }

    #[test]
    fn long_multiply_negative_sets_sign() {
        // SMULLS R0, R1, R2, R3 with a negative product.
        let (mut core, mut bus) = core_with(&[0xE0D1_0293]);
        core.registers.set_register_at(2, 5);
        core.registers.set_register_at(3, 0xFFFF_FFFF); // -1

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 4);
        assert_eq!(core.registers.register_at(0), 0xFFFF_FFFB);
        assert_eq!(core.registers.register_at(1), 0xFFFF_FFFF);
        assert!(core.cpsr.sign_flag());
        assert!(!core.cpsr.zero_flag());
    }

    #[test]
    fn blx_immediate_never_executes_on_v4() {
        // BLX +8 out of the 1111 space; a v4 core treats the whole space
        // as a failed condition.
        let (mut core, mut bus) = core_with(&[0xFA00_0002]);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 1);
        assert_eq!(core.registers.program_counter(), 4);
        assert_eq!(core.registers.register_at(14), 0);
        assert_eq!(core.cpsr.cpu_state(), CpuState::Arm);
    }

    #[test]
    fn blx_immediate_branches_on_v5() {
        let (mut core, mut bus) = v5_core_with(&[0xFA00_0002]);

        let cycles = core.run(&mut bus, 1);

        assert_eq!(cycles, 3);
        assert_eq!(core.registers.register_at(14), 4);
        assert_eq!(core.registers.program_counter(), 16);
        assert_eq!(core.cpsr.cpu_state(), CpuState::Thumb);
    }

    #[test]
    fn extension_space_is_undefined_on_v5() {
        // A 1111-condition encoding that is not BLX immediate.
        let (mut core, mut bus) = v5_core_with(&[0xF300_0000]);

        let cycles = core.run(&mut bus, 1);
        assert_eq!(cycles, 3);
        assert!(core.pending.any());

        core.run(&mut bus, 1);
        assert_eq!(core.cpsr.mode(), Mode::Undefined);
        assert_eq!(core.registers.register_at(14), 4);
        assert_eq!(core.registers.program_counter(), 0x04);
    }

    #[test]
    fn bx_switches_to_thumb() {
        // BX R1 with bit 0 set
        let (mut core, mut bus) = core_with(&[0xE12F_FF11]);
        core.registers.set_register_at(1, 0x101);

        core.run(&mut bus, 1);

        assert_eq!(core.cpsr.cpu_state(), CpuState::Thumb);
        assert_eq!(core.registers.program_counter(), 0x100);
    }

    #[test]
    fn swi_enters_supervisor_with_link() {
        // Start from System mode so the bank switch is observable.
        let (mut core, mut bus) = core_with(&[0xEF00_0012]);
        core.change_mode(Mode::System);

        let cycles = core.run(&mut bus, 1);
        assert_eq!(cycles, 3);
        assert!(core.pending.any());

        // The next step services the exception instead of executing.
        let cycles = core.run(&mut bus, 1);
        assert_eq!(cycles, 3);
        assert_eq!(core.cpsr.mode(), Mode::Supervisor);
        assert_eq!(core.registers.register_at(14), 4);
        assert_eq!(core.registers.program_counter(), 0x08);
        assert!(core.cpsr.irq_disable());
    }

    #[test]
    fn msr_in_user_mode_touches_flags_only() {
        // MSR CPSR_fc, R0 attempting to reach System mode.
        let (mut core, mut bus) = core_with(&[0xE129_F000]);
        core.change_mode(Mode::User);
        core.registers.set_register_at(0, 0xF000_001F);

        core.run(&mut bus, 1);

        assert_eq!(core.cpsr.mode(), Mode::User);
        assert!(core.cpsr.sign_flag());
        assert!(core.cpsr.zero_flag());
        assert!(core.cpsr.carry_flag());
        assert!(core.cpsr.overflow_flag());
    }

    #[test]
    fn str_of_pc_stores_plus_twelve() {
        // STR PC, [R1]
        let (mut core, mut bus) = core_with(&[0xE581_F000]);
        core.registers.set_register_at(1, 0x500);

        core.run(&mut bus, 1);

        assert_eq!(bus.word(0x500), 12);
    }

    #[test]
    fn post_index_writeback() {
        // LDR R0, [R1], #4
        let (mut core, mut bus) = core_with(&[0xE491_0004]);
        core.registers.set_register_at(1, 0x600);
        bus.load_word(0x600, 0x77);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(0), 0x77);
        assert_eq!(core.registers.register_at(1), 0x604);
    }

    #[test]
    fn signed_halfword_load_extends() {
        // LDRSH R0, [R1]
        let (mut core, mut bus) = core_with(&[0xE1D1_00F0]);
        core.registers.set_register_at(1, 0x700);
        bus.load_word(0x700, 0x0000_8001);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(0), 0xFFFF_8001);
    }

    #[test]
    fn class_cycle_table() {
        let branch = ArmOperation::Branch {
            link: false,
            exchange: false,
            offset: 0,
        };
        assert_eq!(class_cycles(&branch), 3);

        let store = ArmOperation::SingleDataTransfer {
            load_store: LoadStoreKind::Store,
            quantity: ReadWriteKind::Word,
            indexing: Indexing::Pre,
            offsetting: Offsetting::Up,
            write_back: false,
            rn: 0,
            rd: 1,
            offset: TransferOffset::Immediate(0),
        };
        assert_eq!(class_cycles(&store), 1);

        let load = ArmOperation::SingleDataTransfer {
            load_store: LoadStoreKind::Load,
            quantity: ReadWriteKind::Word,
            indexing: Indexing::Pre,
            offsetting: Offsetting::Up,
            write_back: false,
            rn: 0,
            rd: 1,
            offset: TransferOffset::Immediate(0),
        };
        assert_eq!(class_cycles(&load), 2);
    }

    #[test]
    fn undefined_instruction_raises() {
        let (mut core, mut bus) = core_with(&[0xE7F0_00F0]);

        core.run(&mut bus, 1);
        assert!(core.pending.any());

        core.run(&mut bus, 1);
        assert_eq!(core.cpsr.mode(), Mode::Undefined);
        // LR points at the instruction after the undefined one.
        assert_eq!(core.registers.register_at(14), 4);
        assert_eq!(core.registers.program_counter(), 0x04);
    }

    #[test]
    fn pc_operand_reads_plus_eight() {
        // MOV R0, PC at address 0
        let (mut core, mut bus) = core_with(&[0xE1A0_000F]);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(0), 8);
    }

    #[test]
    fn ldrt_uses_user_permissions() {
        // LDRT decodes as post-indexed with W; with the MMU off it behaves
        // as a plain load.
        let (mut core, mut bus) = core_with(&[0xE4B1_0000]);
        core.registers.set_register_at(1, 0x800);
        bus.load_word(0x800, 0x5A);

        core.run(&mut bus, 1);

        assert_eq!(core.registers.register_at(0), 0x5A);
    }

    #[test]
    fn spsr_restore_on_subs_pc() {
        // SUBS PC, LR, #4 out of an IRQ-shaped frame.
        let (mut core, mut bus) = core_with(&[0xE25E_F004]);
        core.change_mode(Mode::Irq);
        let mut saved = core.cpsr;
        saved.set_mode(Mode::System);
        saved.set_carry_flag(true);
        *core.register_bank.spsr_mut(Mode::Irq).unwrap() = saved;
        core.registers.set_register_at(14, 0x204);

        core.run(&mut bus, 1);

        assert_eq!(core.cpsr.mode(), Mode::System);
        assert!(core.cpsr.carry_flag());
        assert_eq!(core.registers.program_counter(), 0x200);
    }
}
