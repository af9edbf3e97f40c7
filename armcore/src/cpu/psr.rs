//! Program status registers (CPSR and the banked SPSRs).
//!
//! ```text
//! 31 30 29 28 27 26      8 7 6 5 4   0
//! ┌──┬──┬──┬──┬──┬────────┬─┬─┬─┬─────┐
//! │N │Z │C │V │Q │Reserved│I│F│T│Mode │
//! └──┴──┴──┴──┴──┴────────┴─┴─┴─┴─────┘
//! ```
//!
//! The packed word is the single source of truth: every accessor reads or
//! rewrites it in place, so the flag view and the packed view can never
//! disagree, whichever write path (MSR, exception entry, SPSR restore) was
//! taken.

use serde::{Deserialize, Serialize};

use crate::bitwise::Bits;
use crate::cpu::alu::AluResult;
use crate::cpu::condition::Condition;
use crate::cpu::modes::Mode;

/// A CPSR or SPSR value.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq, Serialize, Deserialize)]
pub struct Psr(u32);

impl Psr {
    /// Evaluates an instruction's condition field against N/Z/C/V.
    #[must_use]
    pub fn can_execute(self, cond: Condition) -> bool {
        use Condition::{AL, CC, CS, EQ, GE, GT, HI, LE, LS, LT, MI, NE, NV, PL, VC, VS};
        match cond {
            EQ => self.zero_flag(),
            NE => !self.zero_flag(),
            CS => self.carry_flag(),
            CC => !self.carry_flag(),
            MI => self.sign_flag(),
            PL => !self.sign_flag(),
            VS => self.overflow_flag(),
            VC => !self.overflow_flag(),
            HI => self.carry_flag() && !self.zero_flag(),
            LS => !self.carry_flag() || self.zero_flag(),
            GE => self.sign_flag() == self.overflow_flag(),
            LT => self.sign_flag() != self.overflow_flag(),
            GT => !self.zero_flag() && (self.sign_flag() == self.overflow_flag()),
            LE => self.zero_flag() || (self.sign_flag() != self.overflow_flag()),
            AL => true,
            // Never on revision < 5; the revision-5 extension encodings are
            // recognized by the decoder before the gate runs.
            NV => false,
        }
    }

    /// N, bit 31.
    #[must_use]
    pub fn sign_flag(self) -> bool {
        self.0.get_bit(31)
    }

    /// Z, bit 30.
    #[must_use]
    pub fn zero_flag(self) -> bool {
        self.0.get_bit(30)
    }

    /// C, bit 29. Subtract family: C means "no borrow".
    #[must_use]
    pub fn carry_flag(self) -> bool {
        self.0.get_bit(29)
    }

    /// V, bit 28.
    #[must_use]
    pub fn overflow_flag(self) -> bool {
        self.0.get_bit(28)
    }

    /// Q, bit 27. Sticky overflow, set by the extended-DSP ops only.
    #[must_use]
    pub fn sticky_overflow(self) -> bool {
        self.0.get_bit(27)
    }

    /// I, bit 7. 1 masks IRQ.
    #[must_use]
    pub fn irq_disable(self) -> bool {
        self.0.get_bit(7)
    }

    /// F, bit 6. 1 masks FIQ.
    #[must_use]
    pub fn fiq_disable(self) -> bool {
        self.0.get_bit(6)
    }

    /// T, bit 5. 0 = ARM state, 1 = Thumb state.
    #[must_use]
    pub fn state_bit(self) -> bool {
        self.0.get_bit(5)
    }

    #[must_use]
    pub fn cpu_state(self) -> CpuState {
        self.state_bit().into()
    }

    /// Decodes the mode bits. Invalid patterns (the three reserved 5-bit
    /// values and the 26-bit encodings) resolve to [`Mode::Reserved`]
    /// rather than crashing; hardware treats them as "don't care".
    #[must_use]
    pub fn mode(self) -> Mode {
        Mode::try_from(self.0 & 0b11111).unwrap_or_else(|bits| {
            tracing::debug!("reserved mode bits {bits:05b} in PSR {:08X}", self.0);
            Mode::Reserved
        })
    }

    pub fn set_sign_flag(&mut self, value: bool) {
        self.0.set_bit(31, value);
    }

    pub fn set_zero_flag(&mut self, value: bool) {
        self.0.set_bit(30, value);
    }

    pub fn set_carry_flag(&mut self, value: bool) {
        self.0.set_bit(29, value);
    }

    pub fn set_overflow_flag(&mut self, value: bool) {
        self.0.set_bit(28, value);
    }

    pub fn set_sticky_overflow(&mut self, value: bool) {
        self.0.set_bit(27, value);
    }

    pub fn set_irq_disable(&mut self, value: bool) {
        self.0.set_bit(7, value);
    }

    pub fn set_fiq_disable(&mut self, value: bool) {
        self.0.set_bit(6, value);
    }

    pub fn set_state_bit(&mut self, value: bool) {
        self.0.set_bit(5, value);
    }

    pub fn set_cpu_state(&mut self, state: CpuState) {
        self.set_state_bit(state.into());
    }

    /// Sets N/Z from a result value, leaving C and V alone (logical ops
    /// route the shifter carry separately).
    pub fn set_logical_flags(&mut self, result: u32) {
        self.set_zero_flag(result == 0);
        self.set_sign_flag(result.get_bit(31));
    }

    /// Sets all four arithmetic flags from an ALU result.
    pub fn set_arithmetic_flags(&mut self, r: AluResult) {
        self.set_zero_flag(r.value == 0);
        self.set_sign_flag(r.value.get_bit(31));
        self.set_carry_flag(r.carry);
        self.set_overflow_flag(r.overflow);
    }

    pub const fn set_mode(&mut self, mode: Mode) {
        self.set_mode_raw(mode as u32);
    }

    /// Writes the raw mode bits without validation. Guests (and some BIOS
    /// code) occasionally write invalid patterns into an SPSR.
    pub const fn set_mode_raw(&mut self, bits: u32) {
        self.0 = (self.0 & !0b11111) | (bits & 0b11111);
    }

    /// Formatted flag string for debugger display: set flags show their
    /// letter, clear flags a dash, followed by the mode name.
    #[must_use]
    pub fn flags_string(self) -> String {
        let bit = |on: bool, c: char| if on { c } else { '-' };
        format!(
            "{}{}{}{}{}{}{}{} {}",
            bit(self.sign_flag(), 'N'),
            bit(self.zero_flag(), 'Z'),
            bit(self.carry_flag(), 'C'),
            bit(self.overflow_flag(), 'V'),
            bit(self.sticky_overflow(), 'Q'),
            bit(self.irq_disable(), 'I'),
            bit(self.fiq_disable(), 'F'),
            bit(self.state_bit(), 'T'),
            self.mode(),
        )
    }
}

impl From<Mode> for Psr {
    fn from(mode: Mode) -> Self {
        let mut psr = Self(0);
        psr.set_mode(mode);
        psr
    }
}

impl From<u32> for Psr {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<Psr> for u32 {
    fn from(psr: Psr) -> Self {
        psr.0
    }
}

/// The instruction-set state selected by the T bit.
#[derive(Debug, Eq, PartialEq, Copy, Clone, Serialize, Deserialize)]
pub enum CpuState {
    /// 32-bit instructions.
    Arm,
    /// 16-bit compressed instructions.
    Thumb,
}

impl From<CpuState> for bool {
    fn from(state: CpuState) -> Self {
        match state {
            CpuState::Arm => false,
            CpuState::Thumb => true,
        }
    }
}

impl From<bool> for CpuState {
    fn from(bit: bool) -> Self {
        if bit { Self::Thumb } else { Self::Arm }
    }
}
