//! The CPU core: state, the fetch/decode/execute loop, exception entry and
//! the host-facing API.
//!
//! `run` executes until the cycle budget is spent; an instruction may
//! overshoot the budget (cycle accounting, not preemption). The loop keeps a
//! small cached [`DispatchState`] (ARM/Thumb, privilege, instruction size)
//! instead of re-deriving it from the CPSR on every step; any event that can
//! change it — mode switch, MSR, exception entry, CP15 control writes —
//! raises `dispatch_stale` and the loop refreshes before the next fetch.

use serde::{Deserialize, Serialize};

use crate::bus::Bus;
use crate::cpu::arm::instructions::{ArmInstruction, ArmOperation};
use crate::cpu::condition::Condition;
use crate::cpu::exception::{Exception, InputLine, PendingLines};
use crate::cpu::modes::Mode;
use crate::cpu::prefetch::{FetchSlot, PrefetchRing};
use crate::cpu::psr::{CpuState, Psr};
use crate::cpu::register_bank::RegisterBank;
use crate::cpu::registers::{REG_LR, Registers};
use crate::cpu::thumb::instructions::ThumbInstruction;
use crate::mmu::cp15::Cp15;
use crate::mmu::{MemoryFault, Mmu};

/// Cycle cost of taking any exception.
pub(crate) const CYCLES_EXCEPTION: u32 = 3;

/// Optional hardware blocks, set per core variant.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct CoreFeatures {
    /// Thumb decoder present (the T in ARM7TDMI).
    pub thumb: bool,
    /// CP15 + virtual memory translation.
    pub mmu: bool,
    /// Tightly-coupled memories with their CP15 region registers.
    pub tcm: bool,
}

/// Construction parameters for a core variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Architecture revision: 3, 4 or 5. Gates BX (4+) and BLX (5+).
    pub revision: u8,
    pub features: CoreFeatures,
    /// Value the guest reads from CP15 register 0.
    pub cp15_id: u32,
    /// Prefetch ring depth, 1-3.
    pub prefetch_depth: usize,
    pub itcm_size: usize,
    pub dtcm_size: usize,
    /// Start with the exception vectors at 0xFFFF0000.
    pub high_vectors_at_reset: bool,
}

impl CoreConfig {
    /// ARMv4T without an MMU (GBA-class).
    #[must_use]
    pub const fn arm7tdmi() -> Self {
        Self {
            revision: 4,
            features: CoreFeatures {
                thumb: true,
                mmu: false,
                tcm: false,
            },
            cp15_id: 0x4101_7100,
            prefetch_depth: 3,
            itcm_size: 0,
            dtcm_size: 0,
            high_vectors_at_reset: false,
        }
    }

    /// ARMv4T with the full MMU.
    #[must_use]
    pub const fn arm920t() -> Self {
        Self {
            revision: 4,
            features: CoreFeatures {
                thumb: true,
                mmu: true,
                tcm: false,
            },
            cp15_id: 0x4109_2000,
            prefetch_depth: 3,
            itcm_size: 0,
            dtcm_size: 0,
            high_vectors_at_reset: false,
        }
    }

    /// ARMv5TE with MMU and tightly-coupled memories (DS-class).
    #[must_use]
    pub const fn arm946es() -> Self {
        Self {
            revision: 5,
            features: CoreFeatures {
                thumb: true,
                mmu: true,
                tcm: true,
            },
            cp15_id: 0x4105_9461,
            prefetch_depth: 3,
            itcm_size: 0x8000,
            dtcm_size: 0x4000,
            high_vectors_at_reset: true,
        }
    }
}

/// Debugger intent for [`ArmCore::translate_address`].
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum AccessIntent {
    Read,
    Write,
    Fetch,
}

/// Cached per-instruction dispatch configuration.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
struct DispatchState {
    thumb: bool,
    privileged: bool,
    instruction_size: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArmCore {
    pub registers: Registers,
    pub cpsr: Psr,
    pub register_bank: RegisterBank,
    pub mmu: Mmu,
    pub(crate) pending: PendingLines,
    prefetch: PrefetchRing,
    config: CoreConfig,
    dispatch: DispatchState,
    dispatch_stale: bool,
    /// Address of the instruction whose data access aborted; the data-abort
    /// return address is computed from it, not from the advanced PC.
    abort_pc: u32,
}

impl ArmCore {
    #[must_use]
    pub fn new(config: CoreConfig) -> Self {
        let mut core = Self {
            registers: Registers::default(),
            cpsr: Psr::from(Mode::Supervisor),
            register_bank: RegisterBank::default(),
            mmu: Mmu::new(Cp15::new(
                config.cp15_id,
                config.itcm_size,
                config.dtcm_size,
            )),
            pending: PendingLines::default(),
            prefetch: PrefetchRing::new(config.prefetch_depth),
            config,
            dispatch: DispatchState::default(),
            dispatch_stale: true,
            abort_pc: 0,
        };
        core.reset();
        core
    }

    #[must_use]
    pub const fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Architectural reset: everything zeroed, Supervisor mode, IRQ and FIQ
    /// masked, ARM state, PC at the reset vector.
    pub fn reset(&mut self) {
        self.registers.reset();
        self.register_bank = RegisterBank::default();
        self.pending = PendingLines::default();
        self.mmu.reset();
        if self.config.high_vectors_at_reset {
            self.mmu.write_register(1, 0, 1 << 13);
        }

        self.cpsr = Psr::from(Mode::Supervisor);
        self.cpsr.set_irq_disable(true);
        self.cpsr.set_fiq_disable(true);
        self.cpsr.set_cpu_state(CpuState::Arm);

        let vector = self.mmu.cp15.vector_base();
        self.registers.set_program_counter(vector);
        self.prefetch.invalidate(vector);
        self.dispatch_stale = true;
        self.abort_pc = 0;
    }

    /// Asserts or clears an interrupt/abort line.
    pub fn set_input_line(&mut self, line: InputLine, state: bool) {
        self.pending.set(line, state);
    }

    /// Executes instructions until at least `cycles` cycles are consumed,
    /// returning the actual count (the last instruction may overshoot).
    pub fn run(&mut self, bus: &mut impl Bus, cycles: u32) -> u32 {
        let mut remaining = i64::from(cycles);
        let mut consumed = 0_u32;
        while remaining > 0 {
            let spent = self.step(bus);
            remaining -= i64::from(spent);
            consumed += spent;
        }
        consumed
    }

    fn step(&mut self, bus: &mut impl Bus) -> u32 {
        if self.pending.any() {
            if let Some(exception) = self.pending.take_highest(self.cpsr) {
                self.enter_exception(exception);
                return CYCLES_EXCEPTION;
            }
        }
        if self.dispatch_stale {
            self.refresh_dispatch();
        }

        let pc = self.registers.program_counter();
        bus.instruction_hook(pc);

        let size = self.dispatch.instruction_size;
        let slot = match self.prefetch.pop(pc) {
            Some(slot) => slot,
            None => {
                // The buffer does not continue at PC (branch, mode change,
                // first instruction): restart it past this direct fetch.
                let slot = self.fetch(bus, pc, size);
                self.prefetch.invalidate(pc.wrapping_add(size));
                slot
            }
        };

        if let Some(fault) = slot.fault {
            // The abort was deferred until this slot was actually consumed;
            // the fault registers are latched only now.
            tracing::debug!(
                "prefetch abort at {:08X}, status {:04X}",
                fault.address,
                fault.status
            );
            self.mmu.cp15.latch_fault(fault.status, fault.address);
            self.pending.set(InputLine::AbortPrefetch, true);
            return 1;
        }

        self.refill(bus);

        if self.dispatch.thumb {
            self.execute_thumb_word(bus, slot.word as u16)
        } else {
            self.execute_arm_word(bus, slot.word)
        }
    }

    fn execute_arm_word(&mut self, bus: &mut impl Bus, word: u32) -> u32 {
        let instruction = ArmInstruction::from(word);
        tracing::trace!(
            "{:08X}: {:08X} {}",
            self.registers.program_counter(),
            word,
            instruction
        );

        if instruction.condition == Condition::NV {
            // The 1111 space never executes before revision 5; revision 5
            // reserves it for extension encodings, and the ones without a
            // modeled meaning trap as undefined.
            self.registers.advance_program_counter(4);
            if self.config.revision >= 5 {
                tracing::debug!("extension-space encoding {word:08X}");
                self.pending.set(InputLine::Undefined, true);
                return 3;
            }
            return 1;
        }
        if !self.cpsr.can_execute(instruction.condition) {
            self.registers.advance_program_counter(4);
            return 1;
        }
        if let ArmOperation::Branch { exchange: true, .. } = instruction.operation {
            // BLX immediate was recognized out of the 1111 space by the
            // decoder; earlier revisions never execute anything there.
            if self.config.revision < 5 || !self.config.features.thumb {
                self.registers.advance_program_counter(4);
                return 1;
            }
        }

        let cycles = crate::cpu::arm::operations::class_cycles(&instruction.operation);
        match self.execute_arm(bus, instruction.operation) {
            Some(bytes) => self.registers.advance_program_counter(bytes),
            None => self
                .prefetch
                .invalidate(self.registers.program_counter()),
        }
        cycles
    }

    fn execute_thumb_word(&mut self, bus: &mut impl Bus, word: u16) -> u32 {
        let instruction = ThumbInstruction::from(word);
        tracing::trace!(
            "{:08X}: {:04X} {:?}",
            self.registers.program_counter(),
            word,
            instruction
        );

        if let ThumbInstruction::ConditionalBranch { condition, .. } = instruction {
            if !self.cpsr.can_execute(condition) {
                self.registers.advance_program_counter(2);
                return 1;
            }
        }

        let cycles = crate::cpu::thumb::operations::class_cycles(&instruction);
        match self.execute_thumb(bus, instruction) {
            Some(bytes) => self.registers.advance_program_counter(bytes),
            None => self
                .prefetch
                .invalidate(self.registers.program_counter()),
        }
        cycles
    }

    fn refresh_dispatch(&mut self) {
        let thumb = self.cpsr.state_bit() && self.config.features.thumb;
        self.dispatch = DispatchState {
            thumb,
            privileged: self.cpsr.mode().is_privileged(),
            instruction_size: if thumb { 2 } else { 4 },
        };
        self.dispatch_stale = false;
    }

    /// True while the cached dispatch state says Thumb.
    pub(crate) const fn in_thumb(&self) -> bool {
        self.dispatch.thumb
    }

    pub(crate) const fn privileged(&self) -> bool {
        self.dispatch.privileged
    }

    pub(crate) const fn revision(&self) -> u8 {
        self.config.revision
    }

    pub(crate) const fn has_thumb(&self) -> bool {
        self.config.features.thumb
    }

    /// Marks the cached dispatch state stale after a state or mapping
    /// change that bypassed `install_cpsr`.
    pub(crate) const fn force_dispatch_refresh(&mut self) {
        self.dispatch_stale = true;
    }

    // ------------------------------------------------------------------
    // Mode and status plumbing
    // ------------------------------------------------------------------

    pub(crate) fn change_mode(&mut self, new: Mode) {
        let old = self.cpsr.mode();
        if old != new {
            self.register_bank.swap_mode(old, new, &mut self.registers);
        }
        self.cpsr.set_mode(new);
        self.dispatch_stale = true;
    }

    /// Installs a complete CPSR value (SPSR restore, MSR result), swapping
    /// register banks when the mode bits changed.
    pub(crate) fn install_cpsr(&mut self, new: Psr) {
        let old_mode = self.cpsr.mode();
        let new_mode = new.mode();
        if old_mode != new_mode {
            self.register_bank
                .swap_mode(old_mode, new_mode, &mut self.registers);
        }
        self.cpsr = new;
        self.dispatch_stale = true;
    }

    /// The SPSR of the current mode, or the CPSR itself for User/System
    /// (reading a missing SPSR is unpredictable; mirroring the CPSR is the
    /// conventional choice).
    pub(crate) fn current_spsr(&self) -> Psr {
        self.register_bank
            .spsr(self.cpsr.mode())
            .unwrap_or(self.cpsr)
    }

    fn enter_exception(&mut self, exception: Exception) {
        let pc = self.registers.program_counter();
        let return_address = match exception {
            Exception::Reset => 0,
            // The aborting instruction already retired; its address was
            // recorded when the fault was latched.
            Exception::DataAbort => self.abort_pc.wrapping_add(8),
            Exception::PrefetchAbort | Exception::Irq | Exception::Fiq => pc.wrapping_add(4),
            // PC has already advanced past the SWI/undefined instruction.
            Exception::SoftwareInterrupt | Exception::Undefined => pc,
        };

        let old_cpsr = self.cpsr;
        let target = exception.target_mode();
        self.change_mode(target);
        if let Some(spsr) = self.register_bank.spsr_mut(target) {
            *spsr = old_cpsr;
        }

        self.cpsr.set_cpu_state(CpuState::Arm);
        self.cpsr.set_irq_disable(true);
        if exception.masks_fiq() {
            self.cpsr.set_fiq_disable(true);
        }

        self.registers.set_register_at(REG_LR, return_address);
        let vector = self
            .mmu
            .cp15
            .vector_base()
            .wrapping_add(exception.vector_offset());
        self.registers.set_program_counter(vector);
        self.prefetch.invalidate(vector);
        self.dispatch_stale = true;

        tracing::debug!(
            "exception {exception:?}: vector {vector:08X}, return {return_address:08X}"
        );
    }

    // ------------------------------------------------------------------
    // Memory access
    // ------------------------------------------------------------------

    fn latch_data_abort(&mut self, fault: MemoryFault) {
        tracing::debug!(
            "data abort at {:08X}, status {:04X}",
            fault.address,
            fault.status
        );
        self.mmu.cp15.latch_fault(fault.status, fault.address);
        self.abort_pc = self.registers.program_counter();
        self.pending.set(InputLine::AbortData, true);
    }

    fn data_tcm(&mut self, address: u32) -> Option<&mut crate::mmu::cp15::TcmRegion> {
        if !self.config.features.tcm {
            return None;
        }
        if self.mmu.cp15.dtcm.contains(address) {
            Some(&mut self.mmu.cp15.dtcm)
        } else if self.mmu.cp15.itcm.contains(address) {
            Some(&mut self.mmu.cp15.itcm)
        } else {
            None
        }
    }

    pub(crate) fn read_word(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        privileged: bool,
    ) -> Option<u32> {
        if let Some(tcm) = self.data_tcm(address) {
            return Some(tcm.read32(address));
        }
        match self.mmu.translate(bus, address, false, privileged, true) {
            Ok(physical) => Some(bus.read32(physical)),
            Err(fault) => {
                self.latch_data_abort(fault);
                None
            }
        }
    }

    pub(crate) fn read_half(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        privileged: bool,
    ) -> Option<u16> {
        if let Some(tcm) = self.data_tcm(address) {
            return Some(tcm.read16(address));
        }
        match self.mmu.translate(bus, address, false, privileged, true) {
            Ok(physical) => Some(bus.read16(physical)),
            Err(fault) => {
                self.latch_data_abort(fault);
                None
            }
        }
    }

    pub(crate) fn read_byte(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        privileged: bool,
    ) -> Option<u8> {
        if let Some(tcm) = self.data_tcm(address) {
            return Some(tcm.read8(address));
        }
        match self.mmu.translate(bus, address, false, privileged, true) {
            Ok(physical) => Some(bus.read8(physical)),
            Err(fault) => {
                self.latch_data_abort(fault);
                None
            }
        }
    }

    pub(crate) fn write_word(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        value: u32,
        privileged: bool,
    ) -> Option<()> {
        if let Some(tcm) = self.data_tcm(address) {
            tcm.write32(address, value);
            return Some(());
        }
        match self.mmu.translate(bus, address, true, privileged, true) {
            Ok(physical) => {
                bus.write32(physical, value);
                Some(())
            }
            Err(fault) => {
                self.latch_data_abort(fault);
                None
            }
        }
    }

    pub(crate) fn write_half(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        value: u16,
        privileged: bool,
    ) -> Option<()> {
        if let Some(tcm) = self.data_tcm(address) {
            tcm.write16(address, value);
            return Some(());
        }
        match self.mmu.translate(bus, address, true, privileged, true) {
            Ok(physical) => {
                bus.write16(physical, value);
                Some(())
            }
            Err(fault) => {
                self.latch_data_abort(fault);
                None
            }
        }
    }

    pub(crate) fn write_byte(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        value: u8,
        privileged: bool,
    ) -> Option<()> {
        if let Some(tcm) = self.data_tcm(address) {
            tcm.write8(address, value);
            return Some(());
        }
        match self.mmu.translate(bus, address, true, privileged, true) {
            Ok(physical) => {
                bus.write8(physical, value);
                Some(())
            }
            Err(fault) => {
                self.latch_data_abort(fault);
                None
            }
        }
    }

    /// One instruction fetch; a translation fault rides along in the slot
    /// instead of latching anything, so the abort stays deferred.
    fn fetch(&mut self, bus: &mut impl Bus, address: u32, size: u32) -> FetchSlot {
        let aligned = address & !(size - 1);
        if self.config.features.tcm {
            // Fetches hit the ITCM window first.
            if self.mmu.cp15.itcm.contains(aligned) {
                let word = if size == 2 {
                    u32::from(self.mmu.cp15.itcm.read16(aligned))
                } else {
                    self.mmu.cp15.itcm.read32(aligned)
                };
                return FetchSlot {
                    word,
                    address,
                    fault: None,
                };
            }
            if self.mmu.cp15.dtcm.contains(aligned) {
                let word = if size == 2 {
                    u32::from(self.mmu.cp15.dtcm.read16(aligned))
                } else {
                    self.mmu.cp15.dtcm.read32(aligned)
                };
                return FetchSlot {
                    word,
                    address,
                    fault: None,
                };
            }
        }

        let privileged = self.dispatch.privileged;
        match self.mmu.translate(bus, aligned, false, privileged, true) {
            Ok(physical) => {
                let word = if size == 2 {
                    u32::from(bus.read16(physical))
                } else {
                    bus.read32(physical)
                };
                FetchSlot {
                    word,
                    address,
                    fault: None,
                }
            }
            Err(fault) => FetchSlot {
                word: 0,
                address,
                fault: Some(fault),
            },
        }
    }

    /// Fetches ahead until the ring is full, stopping at the first abort
    /// (nothing is fetched past a faulting slot).
    fn refill(&mut self, bus: &mut impl Bus) {
        let size = self.dispatch.instruction_size;
        while self.prefetch.has_room() {
            let address = self.prefetch.next_fetch_address();
            let slot = self.fetch(bus, address, size);
            let aborted = slot.fault.is_some();
            self.prefetch.push(slot, size);
            if aborted {
                break;
            }
        }
    }

    // ------------------------------------------------------------------
    // Debugger surface
    // ------------------------------------------------------------------

    /// Translates a virtual address the way the given access would, without
    /// disturbing fault state.
    pub fn translate_address(
        &mut self,
        bus: &mut impl Bus,
        address: u32,
        intent: AccessIntent,
    ) -> Result<u32, MemoryFault> {
        let write = intent == AccessIntent::Write;
        let privileged = self.cpsr.mode().is_privileged();
        self.mmu.translate(bus, address, write, privileged, true)
    }

    /// Reads a register as seen from `mode`, going through the bank for
    /// slots not currently visible.
    #[must_use]
    pub fn banked_register(&self, mode: Mode, index: u32) -> u32 {
        let current = self.cpsr.mode();
        if Self::same_bank(current, mode, index) {
            return self.registers.register_at(index);
        }
        match index {
            8..=12 => {
                if mode == Mode::Fiq {
                    self.register_bank.r8_12_fiq[index as usize - 8]
                } else {
                    self.register_bank.r8_12_usr[index as usize - 8]
                }
            }
            13 | 14 => {
                let (r13, r14) = self.bank_slots(mode);
                if index == 13 { r13 } else { r14 }
            }
            _ => self.registers.register_at(index),
        }
    }

    pub fn set_banked_register(&mut self, mode: Mode, index: u32, value: u32) {
        let current = self.cpsr.mode();
        if Self::same_bank(current, mode, index) {
            self.registers.set_register_at(index, value);
            return;
        }
        match index {
            8..=12 => {
                if mode == Mode::Fiq {
                    self.register_bank.r8_12_fiq[index as usize - 8] = value;
                } else {
                    self.register_bank.r8_12_usr[index as usize - 8] = value;
                }
            }
            13 => *self.bank_slots_mut(mode).0 = value,
            14 => *self.bank_slots_mut(mode).1 = value,
            _ => self.registers.set_register_at(index, value),
        }
    }

    /// Whether `index` resolves to the same physical slot in both modes.
    fn same_bank(a: Mode, b: Mode, index: u32) -> bool {
        if a == b || !(8..=14).contains(&index) {
            return true;
        }
        let user_group = |m: Mode| matches!(m, Mode::User | Mode::System);
        match index {
            8..=12 => (a == Mode::Fiq) == (b == Mode::Fiq),
            _ => user_group(a) && user_group(b),
        }
    }

    fn bank_slots(&self, mode: Mode) -> (u32, u32) {
        match mode {
            Mode::User | Mode::System => (self.register_bank.r13_usr, self.register_bank.r14_usr),
            Mode::Fiq => (self.register_bank.r13_fiq, self.register_bank.r14_fiq),
            Mode::Irq => (self.register_bank.r13_irq, self.register_bank.r14_irq),
            Mode::Supervisor => (self.register_bank.r13_svc, self.register_bank.r14_svc),
            Mode::Abort => (self.register_bank.r13_abt, self.register_bank.r14_abt),
            Mode::Undefined => (self.register_bank.r13_und, self.register_bank.r14_und),
            Mode::Reserved => (self.register_bank.r13_rsv, self.register_bank.r14_rsv),
        }
    }

    fn bank_slots_mut(&mut self, mode: Mode) -> (&mut u32, &mut u32) {
        let bank = &mut self.register_bank;
        match mode {
            Mode::User | Mode::System => (&mut bank.r13_usr, &mut bank.r14_usr),
            Mode::Fiq => (&mut bank.r13_fiq, &mut bank.r14_fiq),
            Mode::Irq => (&mut bank.r13_irq, &mut bank.r14_irq),
            Mode::Supervisor => (&mut bank.r13_svc, &mut bank.r14_svc),
            Mode::Abort => (&mut bank.r13_abt, &mut bank.r14_abt),
            Mode::Undefined => (&mut bank.r13_und, &mut bank.r14_und),
            Mode::Reserved => (&mut bank.r13_rsv, &mut bank.r14_rsv),
        }
    }

    /// Debugger flag display, e.g. `"-ZC--I-- SVC"`.
    #[must_use]
    pub fn flags_string(&self) -> String {
        self.cpsr.flags_string()
    }
}
