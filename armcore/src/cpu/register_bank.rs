//! Banked register storage.
//!
//! Exactly 17 registers (16 general + CPSR) are visible at any time; this
//! module owns the physical slots that back the invisible ones. R13/R14 are
//! banked for every exception mode, R8-R12 additionally for FIQ, and each
//! exception mode has its own SPSR. Swapping modes moves values between the
//! visible file and the bank; it never touches CPSR mode bits — that is the
//! caller's job.

use serde::{Deserialize, Serialize};

use crate::cpu::modes::Mode;
use crate::cpu::psr::Psr;
use crate::cpu::registers::Registers;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RegisterBank {
    pub r8_12_usr: [u32; 5],
    pub r8_12_fiq: [u32; 5],

    pub r13_usr: u32,
    pub r14_usr: u32,
    pub r13_fiq: u32,
    pub r14_fiq: u32,
    pub r13_irq: u32,
    pub r14_irq: u32,
    pub r13_svc: u32,
    pub r14_svc: u32,
    pub r13_abt: u32,
    pub r14_abt: u32,
    pub r13_und: u32,
    pub r14_und: u32,
    // Scratch slots addressed by the reserved mode patterns. Architecturally
    // "don't care"; kept zeroed on reset so guest bugs read zeroes.
    pub r13_rsv: u32,
    pub r14_rsv: u32,

    pub spsr_fiq: Psr,
    pub spsr_irq: Psr,
    pub spsr_svc: Psr,
    pub spsr_abt: Psr,
    pub spsr_und: Psr,
    pub spsr_rsv: Psr,
}

impl RegisterBank {
    /// Moves the visible file from `old` mode to `new` mode: saves the
    /// slots banked for `old`, loads the slots banked for `new`, and leaves
    /// every unbanked register untouched.
    pub fn swap_mode(&mut self, old: Mode, new: Mode, registers: &mut Registers) {
        if old == new {
            return;
        }

        // R8-R12 are banked only across the FIQ boundary.
        if (old == Mode::Fiq) != (new == Mode::Fiq) {
            let (save, load) = if new == Mode::Fiq {
                (&mut self.r8_12_usr, &self.r8_12_fiq)
            } else {
                (&mut self.r8_12_fiq, &self.r8_12_usr)
            };
            for (i, slot) in save.iter_mut().enumerate() {
                *slot = registers.register_at(8 + i as u32);
            }
            let load = *load;
            for (i, value) in load.iter().enumerate() {
                registers.set_register_at(8 + i as u32, *value);
            }
        }

        let (r13_old, r14_old) = self.r13_r14_slots(old);
        *r13_old = registers.register_at(13);
        *r14_old = registers.register_at(14);

        let (r13_new, r14_new) = self.r13_r14_slots(new);
        let (r13, r14) = (*r13_new, *r14_new);
        registers.set_register_at(13, r13);
        registers.set_register_at(14, r14);
    }

    fn r13_r14_slots(&mut self, mode: Mode) -> (&mut u32, &mut u32) {
        match mode {
            Mode::User | Mode::System => (&mut self.r13_usr, &mut self.r14_usr),
            Mode::Fiq => (&mut self.r13_fiq, &mut self.r14_fiq),
            Mode::Irq => (&mut self.r13_irq, &mut self.r14_irq),
            Mode::Supervisor => (&mut self.r13_svc, &mut self.r14_svc),
            Mode::Abort => (&mut self.r13_abt, &mut self.r14_abt),
            Mode::Undefined => (&mut self.r13_und, &mut self.r14_und),
            Mode::Reserved => (&mut self.r13_rsv, &mut self.r14_rsv),
        }
    }

    /// The SPSR banked for `mode`, or `None` for User/System which have
    /// none.
    #[must_use]
    pub const fn spsr(&self, mode: Mode) -> Option<Psr> {
        match mode {
            Mode::User | Mode::System => None,
            Mode::Fiq => Some(self.spsr_fiq),
            Mode::Irq => Some(self.spsr_irq),
            Mode::Supervisor => Some(self.spsr_svc),
            Mode::Abort => Some(self.spsr_abt),
            Mode::Undefined => Some(self.spsr_und),
            Mode::Reserved => Some(self.spsr_rsv),
        }
    }

    pub const fn spsr_mut(&mut self, mode: Mode) -> Option<&mut Psr> {
        match mode {
            Mode::User | Mode::System => None,
            Mode::Fiq => Some(&mut self.spsr_fiq),
            Mode::Irq => Some(&mut self.spsr_irq),
            Mode::Supervisor => Some(&mut self.spsr_svc),
            Mode::Abort => Some(&mut self.spsr_abt),
            Mode::Undefined => Some(&mut self.spsr_und),
            Mode::Reserved => Some(&mut self.spsr_rsv),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BANKED_MODES: [Mode; 7] = [
        Mode::User,
        Mode::Fiq,
        Mode::Irq,
        Mode::Supervisor,
        Mode::Abort,
        Mode::Undefined,
        Mode::System,
    ];

    #[test]
    fn mode_bank_isolation() {
        // Writing R13 in mode A, detouring through mode B, must preserve
        // A's value for every pair of valid modes.
        for a in BANKED_MODES {
            for b in BANKED_MODES {
                if a == b {
                    continue;
                }
                let mut bank = RegisterBank::default();
                let mut registers = Registers::default();

                registers.set_register_at(13, 0xAAAA_0000 + a as u32);
                bank.swap_mode(a, b, &mut registers);
                registers.set_register_at(13, 0xBBBB_0000 + b as u32);
                bank.swap_mode(b, a, &mut registers);

                // User and System share a bank, so skip that aliasing pair.
                let shares_bank = matches!(
                    (a, b),
                    (Mode::User, Mode::System) | (Mode::System, Mode::User)
                );
                if !shares_bank {
                    assert_eq!(
                        registers.register_at(13),
                        0xAAAA_0000 + a as u32,
                        "{a:?} -> {b:?} -> {a:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn unbanked_registers_survive_swaps() {
        let mut bank = RegisterBank::default();
        let mut registers = Registers::default();
        for r in 0..8 {
            registers.set_register_at(r, 0x100 + r);
        }

        bank.swap_mode(Mode::Supervisor, Mode::Irq, &mut registers);
        bank.swap_mode(Mode::Irq, Mode::Fiq, &mut registers);
        bank.swap_mode(Mode::Fiq, Mode::User, &mut registers);

        for r in 0..8 {
            assert_eq!(registers.register_at(r), 0x100 + r);
        }
    }

    #[test]
    fn fiq_banks_r8_to_r12() {
        let mut bank = RegisterBank::default();
        let mut registers = Registers::default();
        for r in 8..13 {
            registers.set_register_at(r, r);
        }

        bank.swap_mode(Mode::Supervisor, Mode::Fiq, &mut registers);
        for r in 8..13 {
            // FIQ bank starts zeroed.
            assert_eq!(registers.register_at(r), 0);
            registers.set_register_at(r, 0xF00 + r);
        }

        bank.swap_mode(Mode::Fiq, Mode::Supervisor, &mut registers);
        for r in 8..13 {
            assert_eq!(registers.register_at(r), r);
        }

        bank.swap_mode(Mode::Supervisor, Mode::Fiq, &mut registers);
        for r in 8..13 {
            assert_eq!(registers.register_at(r), 0xF00 + r);
        }
    }

    #[test]
    fn reserved_mode_reads_zeroed_slots() {
        let mut bank = RegisterBank::default();
        let mut registers = Registers::default();
        registers.set_register_at(13, 0xDEAD);
        registers.set_register_at(14, 0xBEEF);

        bank.swap_mode(Mode::Supervisor, Mode::Reserved, &mut registers);
        assert_eq!(registers.register_at(13), 0);
        assert_eq!(registers.register_at(14), 0);

        bank.swap_mode(Mode::Reserved, Mode::Supervisor, &mut registers);
        assert_eq!(registers.register_at(13), 0xDEAD);
        assert_eq!(registers.register_at(14), 0xBEEF);
    }

    #[test]
    fn spsr_banking() {
        let bank = RegisterBank::default();
        assert!(bank.spsr(Mode::User).is_none());
        assert!(bank.spsr(Mode::System).is_none());
        for mode in [
            Mode::Fiq,
            Mode::Irq,
            Mode::Supervisor,
            Mode::Abort,
            Mode::Undefined,
        ] {
            assert!(bank.spsr(mode).is_some());
        }
    }
}
